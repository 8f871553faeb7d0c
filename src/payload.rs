//! ACME 請求載荷（Payload）的資料結構。

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{base64::Base64, jwk::Jwk};

/// 載荷驗證或序列化失敗時的錯誤。
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Invalid payload: {0}")]
    Invalid(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

type Result<T> = std::result::Result<T, PayloadError>;

/// 定義所有 API 載荷必須實作的功能。
///
/// 實作者能夠序列化，並在送出前以 [`PayloadT::validate`] 做本地檢查；
/// 驗證失敗時不會發出任何網路請求。
pub trait PayloadT: Serialize {
    /// 將載荷轉換成 JSON 值，送出前會先驗證。
    fn to_value(&self) -> Result<Value> {
        self.validate()?;
        Ok(serde_json::to_value(self)?)
    }

    /// 將載荷轉換成 JSON 格式的字串。
    fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 驗證載荷資料是否符合預期的規範。
    fn validate(&self) -> Result<()> {
        Ok(())
    }
}

/// 將電子郵件補上 `mailto:` 前綴；已是 URI 時原樣保留。
pub fn contact_uri(contact: &str) -> String {
    if contact.contains(':') {
        contact.to_string()
    } else {
        format!("mailto:{}", contact)
    }
}

/// 建立新帳號或查詢既有帳號的載荷。
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAccountPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    contact: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    terms_of_service_agreed: Option<bool>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    only_return_existing: bool,
}

impl NewAccountPayload {
    /// 建立一個新的 `NewAccountPayload` 實例，聯絡資訊會補足 `mailto:` 前綴。
    pub fn new(contacts: &[String], terms_of_service_agreed: bool) -> Self {
        NewAccountPayload {
            contact: contacts.iter().map(|c| contact_uri(c)).collect(),
            terms_of_service_agreed: Some(terms_of_service_agreed),
            only_return_existing: false,
        }
    }

    /// 僅查詢此金鑰對應的既有帳號，不建立新帳號。
    pub fn only_return_existing() -> Self {
        NewAccountPayload {
            only_return_existing: true,
            ..Default::default()
        }
    }
}

impl PayloadT for NewAccountPayload {
    fn validate(&self) -> Result<()> {
        if self.only_return_existing {
            return Ok(());
        }
        if self.terms_of_service_agreed != Some(true) {
            return Err(PayloadError::Invalid(
                "Terms of service must be agreed".into(),
            ));
        }
        Ok(())
    }
}

/// 更新帳號聯絡資訊的載荷。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAccountPayload {
    contact: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    terms_of_service_agreed: Option<bool>,
}

impl UpdateAccountPayload {
    pub fn new(contacts: &[String], terms_of_service_agreed: Option<bool>) -> Self {
        UpdateAccountPayload {
            contact: contacts.iter().map(|c| contact_uri(c)).collect(),
            terms_of_service_agreed,
        }
    }
}

impl PayloadT for UpdateAccountPayload {}

/// 更新帳號或授權狀態的載荷，例如 `{"status":"deactivated"}`。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusPayload {
    status: String,
}

impl StatusPayload {
    pub fn deactivated() -> Self {
        StatusPayload {
            status: "deactivated".to_string(),
        }
    }
}

impl PayloadT for StatusPayload {}

/// 金鑰輪替內層 JWS 的載荷。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyChangePayload {
    pub account: String,
    pub old_key: Jwk,
}

impl KeyChangePayload {
    pub fn new(account: &str, old_key: Jwk) -> Self {
        KeyChangePayload {
            account: account.to_string(),
            old_key,
        }
    }
}

impl PayloadT for KeyChangePayload {
    fn validate(&self) -> Result<()> {
        if self.account.is_empty() {
            return Err(PayloadError::Invalid("Account URL is required".into()));
        }
        Ok(())
    }
}

/// 表示一個識別項，用來描述證書所涵蓋的主機名稱等資訊。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub type_: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(value: &str) -> Self {
        Identifier {
            type_: "dns".to_string(),
            value: value.to_string(),
        }
    }
}

/// 表示建立新訂單時所需的載荷資料。
///
/// 該載荷中包含一組識別項，代表需驗證的域名。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderPayload {
    pub identifiers: Vec<Identifier>,
}

impl NewOrderPayload {
    /// 給定一組域名，為每個域名建立一個類型為 `"dns"` 的識別項。
    pub fn new<S: AsRef<str>>(domains: &[S]) -> Self {
        let identifiers = domains
            .iter()
            .map(|domain| Identifier::dns(domain.as_ref()))
            .collect();

        NewOrderPayload { identifiers }
    }
}

impl PayloadT for NewOrderPayload {
    /// 驗證新訂單載荷資料：
    ///
    /// - 必須至少包含一個識別項。
    /// - 所有識別項的類型必須為 `"dns"` 且值不得為空。
    fn validate(&self) -> Result<()> {
        if self.identifiers.is_empty() {
            return Err(PayloadError::Invalid(
                "At least one identifier is required".into(),
            ));
        }
        for identifier in &self.identifiers {
            if identifier.type_ != "dns" {
                return Err(PayloadError::Invalid("Identifier type must be 'dns'".into()));
            }
            if identifier.value.is_empty() {
                return Err(PayloadError::Invalid("Identifier value cannot be empty".into()));
            }
        }
        Ok(())
    }
}

/// 表示挑戰驗證的載荷資料，固定為空物件 `{}`。
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChallengeValidationPayload {}

impl ChallengeValidationPayload {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PayloadT for ChallengeValidationPayload {}

/// 表示最終化訂單時所需的載荷資料。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizeOrderPayload {
    #[serde(rename = "csr")]
    csr_b64_str: String,
}

impl FinalizeOrderPayload {
    /// 以 DER 編碼的 CSR 建立載荷。
    pub fn new(csr_der: &[u8]) -> Self {
        FinalizeOrderPayload {
            csr_b64_str: Base64::new(csr_der).base64_url(),
        }
    }
}

impl PayloadT for FinalizeOrderPayload {
    fn validate(&self) -> Result<()> {
        if self.csr_b64_str.is_empty() {
            return Err(PayloadError::Invalid("CSR cannot be empty".into()));
        }
        Ok(())
    }
}

/// 撤銷憑證的載荷。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevocationPayload {
    certificate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<u8>,
}

impl RevocationPayload {
    /// 以 DER 編碼的憑證與可選的 RFC 5280 撤銷原因碼建立載荷。
    pub fn new(certificate_der: &[u8], reason: Option<u8>) -> Self {
        RevocationPayload {
            certificate: Base64::new(certificate_der).base64_url(),
            reason,
        }
    }
}

impl PayloadT for RevocationPayload {
    fn validate(&self) -> Result<()> {
        if self.certificate.is_empty() {
            return Err(PayloadError::Invalid("Certificate cannot be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_account_payload() {
        let payload =
            NewAccountPayload::new(&["admin@example.com".into(), "mailto:ops@example.com".into()], true);
        assert_eq!(
            payload.to_value().unwrap(),
            json!({
                "contact": ["mailto:admin@example.com", "mailto:ops@example.com"],
                "termsOfServiceAgreed": true
            })
        );
    }

    #[test]
    fn test_new_account_requires_terms() {
        let payload = NewAccountPayload::new(&[], false);
        assert!(matches!(payload.to_value(), Err(PayloadError::Invalid(_))));
    }

    #[test]
    fn test_only_return_existing() {
        assert_eq!(
            NewAccountPayload::only_return_existing().to_value().unwrap(),
            json!({"onlyReturnExisting": true})
        );
    }

    #[test]
    fn test_new_order_payload() {
        let payload = NewOrderPayload::new(&["example.com", "www.example.com"]);
        assert_eq!(
            payload.to_value().unwrap(),
            json!({"identifiers": [
                {"type": "dns", "value": "example.com"},
                {"type": "dns", "value": "www.example.com"}
            ]})
        );
    }

    #[test]
    fn test_new_order_validation() {
        let empty: [&str; 0] = [];
        assert!(NewOrderPayload::new(&empty).validate().is_err());
        assert!(NewOrderPayload::new(&[""]).validate().is_err());
    }

    #[test]
    fn test_challenge_payload_is_empty_object() {
        assert_eq!(
            ChallengeValidationPayload::new().to_json_string().unwrap(),
            "{}"
        );
    }

    #[test]
    fn test_revocation_reason_is_optional() {
        let value = RevocationPayload::new(&[0xFB, 0xFF], None).to_value().unwrap();
        assert_eq!(value, json!({"certificate": "-_8"}));
        let value = RevocationPayload::new(&[0xFB, 0xFF], Some(4)).to_value().unwrap();
        assert_eq!(value["reason"], 4);
    }

    #[test]
    fn test_deactivate_payload() {
        assert_eq!(
            StatusPayload::deactivated().to_value().unwrap(),
            json!({"status": "deactivated"})
        );
    }
}
