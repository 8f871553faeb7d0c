use openssl::{
    bn::{BigNum, BigNumContext},
    error::ErrorStack,
    nid::Nid,
    pkey::Id,
    sha::sha256,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{base64, key_pair::KeyPair};

/// JWK 相關操作的錯誤類型。
#[derive(Debug, Error)]
pub enum JwkError {
    /// 不支援的金鑰類型。
    #[error("Unsupported key type: {0}")]
    UnsupportedKey(String),
    /// 金鑰轉換失敗。
    #[error("Failed to convert key: {0}")]
    KeyConversion(#[from] ErrorStack),
    /// 序列化錯誤。
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// JSON Web Key (JWK) 的公開部分，支援 RSA 與 P-256 EC 金鑰。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kty")]
pub enum Jwk {
    #[serde(rename = "RSA")]
    Rsa { e: String, n: String },
    #[serde(rename = "EC")]
    Ec { crv: String, x: String, y: String },
}

impl Jwk {
    /// 根據給定的金鑰對產生對應的 JWK。
    pub fn new(key_pair: &KeyPair) -> Result<Self, JwkError> {
        let key = key_pair.private_key();
        match key.id() {
            Id::RSA => {
                let rsa = key.rsa()?;
                Ok(Jwk::Rsa {
                    e: base64::encode(rsa.e().to_vec()),
                    n: base64::encode(rsa.n().to_vec()),
                })
            }
            Id::EC => {
                let ec = key.ec_key()?;
                let group = ec.group();
                if group.curve_name() != Some(Nid::X9_62_PRIME256V1) {
                    return Err(JwkError::UnsupportedKey("EC curve other than P-256".into()));
                }

                let mut ctx = BigNumContext::new()?;
                let mut x = BigNum::new()?;
                let mut y = BigNum::new()?;
                ec.public_key()
                    .affine_coordinates_gfp(group, &mut x, &mut y, &mut ctx)?;

                let size = group.degree().div_ceil(8) as i32;
                Ok(Jwk::Ec {
                    crv: "P-256".to_string(),
                    x: base64::encode(x.to_vec_padded(size)?),
                    y: base64::encode(y.to_vec_padded(size)?),
                })
            }
            id => Err(JwkError::UnsupportedKey(format!("{:?}", id))),
        }
    }

    /// RFC 7638 規定的雜湊輸入：僅包含必要成員、依字典序排列且無空白。
    pub fn thumbprint_input(&self) -> String {
        match self {
            Jwk::Rsa { e, n } => format!(r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#, e, n),
            Jwk::Ec { crv, x, y } => format!(
                r#"{{"crv":"{}","kty":"EC","x":"{}","y":"{}"}}"#,
                crv, x, y
            ),
        }
    }

    /// 計算 JWK 縮影，以 URL-safe Base64 字串回傳。
    pub fn thumbprint(&self) -> String {
        base64::encode(sha256(self.thumbprint_input().as_bytes()))
    }

    pub fn to_value(&self) -> Result<Value, JwkError> {
        Ok(serde_json::to_value(self)?)
    }
}
