use std::{fmt, str::FromStr};

use openssl::{
    ec::{EcGroup, EcKey},
    error::ErrorStack,
    nid::Nid,
    pkey::{Id, PKey, Private},
    rsa::Rsa,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::jwk::{Jwk, JwkError};

/// 鍵相關操作的錯誤列舉。
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("OpenSSL error: {0}")]
    OpenSSL(#[from] ErrorStack),
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("JWK error: {0}")]
    Jwk(#[from] JwkError),
}

type Result<T> = std::result::Result<T, KeyError>;

/// RSA 金鑰的預設長度。
pub const DEFAULT_RSA_BITS: u32 = 2048;

/// 支援的非對稱金鑰演算法。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    #[serde(rename = "RSA", alias = "rsa")]
    Rsa,
    /// P-256 曲線上的 ECDSA 金鑰。
    #[serde(rename = "EC", alias = "ec")]
    Ec,
}

impl KeyAlgorithm {
    /// 對應的 JWS `alg` 參數。
    pub fn jws_algorithm(&self) -> &'static str {
        match self {
            Self::Rsa => "RS256",
            Self::Ec => "ES256",
        }
    }
}

impl FromStr for KeyAlgorithm {
    type Err = KeyError;

    /// 將輸入的演算法名稱標準化（不分大小寫）。
    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "RSA" | "RS256" => Ok(Self::Rsa),
            "EC" | "ECDSA" | "ES256" => Ok(Self::Ec),
            other => Err(KeyError::UnsupportedAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rsa => f.write_str("RSA"),
            Self::Ec => f.write_str("EC"),
        }
    }
}

/// 表示一組非對稱加密的金鑰對。
///
/// 帳戶金鑰與憑證金鑰都以此結構表示；公鑰永遠由私鑰派生，不另外保存。
#[derive(Debug, Clone)]
pub struct KeyPair {
    algorithm: KeyAlgorithm,
    pri_key: PKey<Private>,
}

impl KeyPair {
    /// 根據指定演算法產生新的金鑰對。
    ///
    /// `bits` 僅對 RSA 有效，未提供時使用 [`DEFAULT_RSA_BITS`]。
    pub fn generate(algorithm: KeyAlgorithm, bits: Option<u32>) -> Result<Self> {
        let pri_key = match algorithm {
            KeyAlgorithm::Rsa => PKey::from_rsa(Rsa::generate(bits.unwrap_or(DEFAULT_RSA_BITS))?)?,
            KeyAlgorithm::Ec => {
                let group = EcGroup::from_curve_name(Nid::X9_62_PRIME256V1)?;
                PKey::from_ec_key(EcKey::generate(&group)?)?
            }
        };

        Ok(Self {
            algorithm,
            pri_key,
        })
    }

    /// 以同樣的演算法與參數產生另一組金鑰，用於帳戶金鑰輪替。
    pub fn generate_like(&self) -> Result<Self> {
        match self.algorithm {
            KeyAlgorithm::Rsa => Self::generate(KeyAlgorithm::Rsa, Some(self.key_parameters()?)),
            KeyAlgorithm::Ec => Self::generate(KeyAlgorithm::Ec, None),
        }
    }

    /// 根據 PEM 格式的私鑰資料建立一組金鑰對。
    pub fn from_pem(pri_key_pem: &[u8]) -> Result<Self> {
        Self::from_pkey(PKey::private_key_from_pem(pri_key_pem)?)
    }

    /// 包裝現有的 OpenSSL 私鑰，僅接受 RSA 與 P-256 EC 金鑰。
    pub fn from_pkey(pri_key: PKey<Private>) -> Result<Self> {
        let algorithm = match pri_key.id() {
            Id::RSA => KeyAlgorithm::Rsa,
            Id::EC => {
                let curve = pri_key.ec_key()?.group().curve_name();
                if curve != Some(Nid::X9_62_PRIME256V1) {
                    return Err(KeyError::UnsupportedAlgorithm(format!("EC curve {:?}", curve)));
                }
                KeyAlgorithm::Ec
            }
            id => return Err(KeyError::UnsupportedAlgorithm(format!("{:?}", id))),
        };

        Ok(Self { algorithm, pri_key })
    }

    /// 以 PKCS#8 PEM 格式匯出私鑰。
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.pri_key.private_key_to_pem_pkcs8()?)
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn private_key(&self) -> &PKey<Private> {
        &self.pri_key
    }

    /// 公鑰的 DER 編碼，可用於比較兩組金鑰是否相同。
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        Ok(self.pri_key.public_key_to_der()?)
    }

    /// 公鑰的 JWK 表示。
    pub fn jwk(&self) -> Result<Jwk> {
        Ok(Jwk::new(self)?)
    }

    /// 計算金鑰的 RFC 7638 縮影（thumbprint），以 URL-safe Base64 字串回傳。
    pub fn thumbprint(&self) -> Result<String> {
        Ok(self.jwk()?.thumbprint())
    }

    /// 組合挑戰所需的 key authorization：`token.thumbprint`。
    pub fn key_authorization(&self, token: &str) -> Result<String> {
        Ok(format!("{}.{}", token, self.thumbprint()?))
    }

    /// 取得金鑰的位元長度。
    pub fn key_parameters(&self) -> Result<u32> {
        match self.pri_key.id() {
            Id::RSA => Ok(self.pri_key.rsa()?.size() * 8),
            Id::EC => Ok(self.pri_key.ec_key()?.group().degree()),
            id => Err(KeyError::UnsupportedAlgorithm(format!("{:?}", id))),
        }
    }
}
