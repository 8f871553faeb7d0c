//! CA 回傳的 `application/problem+json` 錯誤文件（RFC 7807 / RFC 8555 §6.7）。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::transport::{HttpResponse, PROBLEM_JSON};

/// ACME 錯誤類型 URN 的共同前綴。
pub const ACME_ERROR_PREFIX: &str = "urn:ietf:params:acme:error:";

pub const BAD_NONCE: &str = "urn:ietf:params:acme:error:badNonce";
pub const ACCOUNT_DOES_NOT_EXIST: &str = "urn:ietf:params:acme:error:accountDoesNotExist";
pub const USER_ACTION_REQUIRED: &str = "urn:ietf:params:acme:error:userActionRequired";

/// CA 回傳的錯誤文件，欄位原樣保留。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    /// 各識別項的子錯誤。
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subproblems: Vec<Subproblem>,
}

/// 針對單一識別項的子錯誤。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subproblem {
    #[serde(rename = "type", default)]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<crate::payload::Identifier>,
}

impl Problem {
    /// 從錯誤回應解析問題文件。
    ///
    /// 內容無法解析時仍產生一個以 HTTP 狀態碼與原文組成的文件，
    /// 讓呼叫端總能取得 CA 的原始訊息。
    pub fn from_response(response: &HttpResponse) -> Self {
        let parsed = match response.content_type() {
            Some(ct) if ct.starts_with(PROBLEM_JSON) || ct.starts_with("application/json") => {
                response.json::<Problem>().ok()
            }
            _ => None,
        };

        let mut problem = parsed.unwrap_or_else(|| Problem {
            type_: "about:blank".to_string(),
            detail: Some(response.text()).filter(|t| !t.is_empty()),
            ..Default::default()
        });
        if problem.status.is_none() {
            problem.status = Some(response.status);
        }
        problem
    }

    /// 去除 URN 前綴後的錯誤名稱，例如 `badNonce`。
    pub fn kind(&self) -> &str {
        self.type_
            .strip_prefix(ACME_ERROR_PREFIX)
            .unwrap_or(&self.type_)
    }

    pub fn is_bad_nonce(&self) -> bool {
        self.type_ == BAD_NONCE
    }

    pub fn is_account_does_not_exist(&self) -> bool {
        self.type_ == ACCOUNT_DOES_NOT_EXIST
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.type_)?;
        if let Some(status) = self.status {
            write!(f, " ({})", status)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ": {}", detail)?;
        }
        for sub in &self.subproblems {
            write!(f, "; {}", sub.type_)?;
            if let Some(id) = &sub.identifier {
                write!(f, " [{}]", id.value)?;
            }
            if let Some(detail) = &sub.detail {
                write!(f, ": {}", detail)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_problem_with_subproblems() {
        let response = HttpResponse::new(400)
            .with_header("Content-Type", PROBLEM_JSON)
            .with_json(&json!({
                "type": "urn:ietf:params:acme:error:malformed",
                "detail": "Some of the identifiers requested were rejected",
                "subproblems": [{
                    "type": "urn:ietf:params:acme:error:rejectedIdentifier",
                    "detail": "This CA will not issue for \"example.net\"",
                    "identifier": {"type": "dns", "value": "example.net"}
                }]
            }));

        let problem = Problem::from_response(&response);
        assert_eq!(problem.kind(), "malformed");
        assert_eq!(problem.status, Some(400));
        assert_eq!(problem.subproblems.len(), 1);
        assert_eq!(
            problem.subproblems[0].identifier.as_ref().unwrap().value,
            "example.net"
        );
        assert!(problem.to_string().contains("[example.net]"));
    }

    #[test]
    fn test_non_json_body_is_kept() {
        let response = HttpResponse::new(502).with_body("Bad Gateway");
        let problem = Problem::from_response(&response);
        assert_eq!(problem.type_, "about:blank");
        assert_eq!(problem.detail.as_deref(), Some("Bad Gateway"));
        assert_eq!(problem.status, Some(502));
    }

    #[test]
    fn test_bad_nonce_detection() {
        let response = HttpResponse::new(400)
            .with_header("Content-Type", PROBLEM_JSON)
            .with_json(&json!({"type": BAD_NONCE, "status": 400}));
        assert!(Problem::from_response(&response).is_bad_nonce());
    }
}
