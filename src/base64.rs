//! ACME 所使用的 Base64 URL 安全編碼（RFC 4648 §5，不帶填充）。

use ::base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

pub use ::base64::DecodeError;

/// 已完成 Base64 URL 安全編碼的資料。
///
/// # 示例
///
/// ```
/// # use acme_engine::base64::Base64;
/// let b64 = Base64::new("Hello, World!");
/// assert_eq!(b64.as_str(), "SGVsbG8sIFdvcmxkIQ");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64 {
    encoded: String,
}

impl Base64 {
    /// 根據輸入數據生成 Base64 URL 編碼。
    pub fn new<T: AsRef<[u8]>>(input: T) -> Self {
        Self {
            encoded: URL_SAFE_NO_PAD.encode(input.as_ref()),
        }
    }

    /// 從已編碼的 URL 安全字串建立實例，並確認其可被解碼。
    ///
    /// 若輸入帶有 `=` 填充，會先移除後再驗證。
    pub fn from_url(url_encoded: &str) -> Result<Self, DecodeError> {
        let trimmed = url_encoded.trim_end_matches('=');
        URL_SAFE_NO_PAD.decode(trimmed)?;
        Ok(Self {
            encoded: trimmed.to_string(),
        })
    }

    /// 將內容解碼為原始位元組。
    pub fn decode(&self) -> Result<Vec<u8>, DecodeError> {
        URL_SAFE_NO_PAD.decode(&self.encoded)
    }

    /// 返回編碼字串的副本。
    pub fn base64_url(&self) -> String {
        self.encoded.clone()
    }

    /// 返回內部編碼字串的引用。
    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

/// 直接將位元組編碼成 URL 安全字串。
pub fn encode<T: AsRef<[u8]>>(input: T) -> String {
    URL_SAFE_NO_PAD.encode(input.as_ref())
}

/// 直接將 URL 安全字串解碼。
pub fn decode(input: &str) -> Result<Vec<u8>, DecodeError> {
    URL_SAFE_NO_PAD.decode(input.trim_end_matches('='))
}
