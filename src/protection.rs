use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{base64::Base64, jwk::Jwk, key_pair::KeyAlgorithm};

/// 定義保護機制中可能產生的錯誤類型。
#[derive(Debug, Error)]
pub enum ProtectionError {
    /// JSON 序列化錯誤
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, ProtectionError>;

/// 請求者身分的表示方式：尚未註冊時內嵌公鑰，註冊後以帳戶 URL 指稱。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyIdentity {
    Jwk(Jwk),
    Kid(String),
}

/// 數字簽章保護頭部的資料結構。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedHeader {
    /// 簽章演算法
    pub alg: String,
    /// 用於防止重放攻擊的隨機數；金鑰輪替的內層 JWS 不帶此欄位。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    /// 請求目標 URL，必須與實際請求的 URL 相同
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwk: Option<Jwk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl ProtectedHeader {
    /// 將 [`ProtectedHeader`] 序列化後轉換為 Base64 格式。
    pub fn to_base64(&self) -> Result<Base64> {
        Ok(Base64::new(serde_json::to_vec(self)?))
    }
}

/// 用於生成保護頭（Protected Header）的結構體。
pub struct Protection {
    alg: &'static str,
    identity: KeyIdentity,
}

impl Protection {
    pub fn new(algorithm: KeyAlgorithm, identity: KeyIdentity) -> Self {
        Self {
            alg: algorithm.jws_algorithm(),
            identity,
        }
    }

    /// 根據目前設定的參數生成一個 [`ProtectedHeader`]。
    pub fn create_header(&self, url: impl Into<String>, nonce: Option<String>) -> ProtectedHeader {
        let (jwk, kid) = match &self.identity {
            KeyIdentity::Jwk(jwk) => (Some(jwk.clone()), None),
            KeyIdentity::Kid(kid) => (None, Some(kid.clone())),
        };

        ProtectedHeader {
            alg: self.alg.to_string(),
            nonce,
            url: url.into(),
            jwk,
            kid,
        }
    }
}

impl std::fmt::Display for ProtectedHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        serde_json::to_string(self)
            .map_err(|_| std::fmt::Error)
            .and_then(|s| write!(f, "{}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_jwk() -> Jwk {
        Jwk::Ec {
            crv: "P-256".into(),
            x: "x".into(),
            y: "y".into(),
        }
    }

    #[test]
    fn test_jwk_handling() {
        let protection = Protection::new(KeyAlgorithm::Ec, KeyIdentity::Jwk(sample_jwk()));
        let header = protection.create_header("https://example.com", Some("n1".into()));

        assert_eq!(header.alg, "ES256");
        assert_eq!(header.jwk, Some(sample_jwk()));
        assert!(header.kid.is_none());
    }

    #[test]
    fn test_kid_handling() {
        let protection = Protection::new(
            KeyAlgorithm::Rsa,
            KeyIdentity::Kid("http://ca/acme/acct/1".into()),
        );
        let header = protection.create_header("https://example.com", Some("n1".into()));

        assert_eq!(header.alg, "RS256");
        assert_eq!(header.kid.as_deref(), Some("http://ca/acme/acct/1"));
        assert!(header.jwk.is_none());
    }

    #[test]
    fn test_header_serialization() {
        let header = Protection::new(KeyAlgorithm::Ec, KeyIdentity::Kid("k".into()))
            .create_header("https://example.com", Some("test-nonce".into()));

        let json = header.to_string();
        assert!(json.contains("\"nonce\":\"test-nonce\""));
        assert!(json.contains("\"url\":\"https://example.com\""));
        assert!(json.contains("\"alg\":\"ES256\""));
        assert!(!json.contains("jwk"));
    }

    #[test]
    fn test_nonce_omitted_when_absent() {
        let header = Protection::new(KeyAlgorithm::Ec, KeyIdentity::Jwk(sample_jwk()))
            .create_header("https://example.com/key-change", None);
        assert!(!header.to_string().contains("nonce"));
    }
}
