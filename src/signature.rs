use std::fmt;

use openssl::{ecdsa::EcdsaSig, hash::MessageDigest, sign::Signer};
use thiserror::Error;

use crate::key_pair::{KeyAlgorithm, KeyPair};

/// 定義簽名操作可能遇到的錯誤類型。
#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("Signing error: {0}")]
    Signing(#[from] openssl::error::ErrorStack),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// 產生 JWS 簽章的密碼學提供者。
///
/// 由呼叫端顯式建立並交給 [`JwsSigner`](crate::jws::JwsSigner)，不存在全域註冊表。
pub trait SigningProvider: Send + Sync + fmt::Debug {
    /// 以金鑰對 `data` 簽名，回傳 JWS 格式的簽章位元組。
    fn sign(&self, key_pair: &KeyPair, data: &[u8]) -> Result<Vec<u8>, SignatureError>;
}

/// 以 OpenSSL 實作的簽名提供者，支援 RS256 與 ES256。
#[derive(Debug, Default, Clone, Copy)]
pub struct OpensslProvider;

impl SigningProvider for OpensslProvider {
    fn sign(&self, key_pair: &KeyPair, data: &[u8]) -> Result<Vec<u8>, SignatureError> {
        SignatureAlgorithmFactory::get_algorithm(key_pair.algorithm()).sign(data, key_pair)
    }
}

trait SignatureAlgorithmT {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError>;
}

/// RSASSA-PKCS1-v1_5 搭配 SHA-256。
struct RsaSignature;

impl SignatureAlgorithmT for RsaSignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
        let mut signer = Signer::new(MessageDigest::sha256(), key_pair.private_key())?;
        signer.update(data)?;
        Ok(signer.sign_to_vec()?)
    }
}

/// ECDSA P-256 搭配 SHA-256。
///
/// OpenSSL 產生 DER 編碼的簽章，JWS 則要求固定長度的 `r || s`。
struct EcdsaSignature;

impl SignatureAlgorithmT for EcdsaSignature {
    fn sign(&self, data: &[u8], key_pair: &KeyPair) -> Result<Vec<u8>, SignatureError> {
        let mut signer = Signer::new(MessageDigest::sha256(), key_pair.private_key())?;
        signer.update(data)?;
        let der = signer.sign_to_vec()?;

        let sig = EcdsaSig::from_der(&der)?;
        let mut raw = sig.r().to_vec_padded(32)?;
        raw.extend(sig.s().to_vec_padded(32)?);
        Ok(raw)
    }
}

struct SignatureAlgorithmFactory;

impl SignatureAlgorithmFactory {
    fn get_algorithm(algorithm: KeyAlgorithm) -> Box<dyn SignatureAlgorithmT> {
        match algorithm {
            KeyAlgorithm::Rsa => Box::new(RsaSignature),
            KeyAlgorithm::Ec => Box::new(EcdsaSignature),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::{bn::BigNum, sign::Verifier};

    #[test]
    fn test_rs256_signature_verifies() {
        let key = KeyPair::generate(KeyAlgorithm::Rsa, Some(2048)).unwrap();
        let signature = OpensslProvider.sign(&key, b"header.payload").unwrap();
        assert_eq!(signature.len(), 256);

        let mut verifier = Verifier::new(MessageDigest::sha256(), key.private_key()).unwrap();
        verifier.update(b"header.payload").unwrap();
        assert!(verifier.verify(&signature).unwrap());
    }

    #[test]
    fn test_es256_signature_is_raw_and_verifies() {
        let key = KeyPair::generate(KeyAlgorithm::Ec, None).unwrap();
        let signature = OpensslProvider.sign(&key, b"header.payload").unwrap();
        assert_eq!(signature.len(), 64);

        let r = BigNum::from_slice(&signature[..32]).unwrap();
        let s = BigNum::from_slice(&signature[32..]).unwrap();
        let sig = EcdsaSig::from_private_components(r, s).unwrap();
        let digest = openssl::sha::sha256(b"header.payload");
        let ec = key.private_key().ec_key().unwrap();
        assert!(sig.verify(&digest, &ec).unwrap());
    }
}
