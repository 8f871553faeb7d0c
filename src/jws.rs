//! 此模組提供 JSON Web Signature (JWS) 的結構與簽名器，
//! 輸出 ACME 要求的 flattened JSON 序列化格式。

use std::{result, sync::Arc};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{
    base64::{self, Base64, DecodeError},
    key_pair::{KeyError, KeyPair},
    protection::{KeyIdentity, Protection, ProtectedHeader, ProtectionError},
    signature::{OpensslProvider, SignatureError, SigningProvider},
};

/// 表示與 JWS 相關的錯誤。
#[derive(Error, Debug)]
pub enum JwsError {
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] DecodeError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Protection error: {0}")]
    Protection(#[from] ProtectionError),
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

type Result<T> = result::Result<T, JwsError>;

/// 表示一個 JSON Web Signature (JWS) 物件，各部分皆為 Base64 URL 編碼字串。
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Jws {
    #[serde(rename = "protected")]
    header: String,
    payload: String,
    signature: String,
}

impl Jws {
    pub fn new(header_b64: &Base64, payload_b64: &Base64, signature_b64: &Base64) -> Self {
        Jws {
            header: header_b64.base64_url(),
            payload: payload_b64.base64_url(),
            signature: signature_b64.base64_url(),
        }
    }

    pub fn protected(&self) -> &str {
        &self.header
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// 將 `Jws` 實例序列化為 JSON 格式的字串。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// 解碼保護頭部。
    pub fn decode_header(&self) -> Result<ProtectedHeader> {
        Ok(serde_json::from_slice(&base64::decode(&self.header)?)?)
    }

    /// 解碼負載；POST-as-GET 的空負載回傳 `None`。
    pub fn decode_payload(&self) -> Result<Option<Value>> {
        if self.payload.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&base64::decode(&self.payload)?)?))
    }

    /// 解碼簽章的原始位元組。
    pub fn decode_signature(&self) -> Result<Vec<u8>> {
        Ok(base64::decode(&self.signature)?)
    }
}

/// 建立並簽署 ACME 請求的 JWS。
///
/// 簽名本身沒有副作用；Nonce 由呼叫端事先取得後傳入。
#[derive(Debug, Clone)]
pub struct JwsSigner {
    provider: Arc<dyn SigningProvider>,
}

impl Default for JwsSigner {
    fn default() -> Self {
        Self::new(OpensslProvider)
    }
}

impl JwsSigner {
    pub fn new(provider: impl SigningProvider + 'static) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }

    /// 簽署一個請求。
    ///
    /// - `payload` 為 `None` 時負載為空字串（POST-as-GET）。
    /// - `key_id` 為帳戶 URL；為 `None` 時在保護頭部內嵌 `jwk` 公鑰。
    /// - `nonce` 為 `None` 時保護頭部不含 `nonce`（僅用於金鑰輪替的內層 JWS）。
    pub fn sign(
        &self,
        url: &str,
        payload: Option<&Value>,
        key: &KeyPair,
        key_id: Option<&str>,
        nonce: Option<String>,
    ) -> Result<Jws> {
        let identity = match key_id {
            Some(kid) => KeyIdentity::Kid(kid.to_string()),
            None => KeyIdentity::Jwk(key.jwk()?),
        };
        let header = Protection::new(key.algorithm(), identity)
            .create_header(url, nonce)
            .to_base64()?;
        let payload = match payload {
            Some(value) => Base64::new(serde_json::to_vec(value)?),
            None => Base64::new(b""),
        };

        let signing_input = format!("{}.{}", header.as_str(), payload.as_str());
        let signature = Base64::new(self.provider.sign(key, signing_input.as_bytes())?);

        Ok(Jws::new(&header, &payload, &signature))
    }
}
