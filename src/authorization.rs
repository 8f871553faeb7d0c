//! 授權（Authorization）與挑戰（Challenge）資源。

use serde::{Deserialize, Serialize};

use crate::{payload::Identifier, problem::Problem};

/// 表示 ACME 挑戰的類型，可用於選擇相應的驗證策略。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(rename = "tls-alpn-01")]
    TlsAlpn01,
    #[serde(other)]
    Unknown,
}

impl ChallengeType {
    /// 返回挑戰類型對應的字串表示。
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::TlsAlpn01 => "tls-alpn-01",
            Self::Unknown => "unknown",
        }
    }
}

/// 挑戰狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

/// 授權狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl AuthorizationStatus {
    /// 判斷該狀態是否為終結狀態，即無法再進行狀態轉換。
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// 表示一個 ACME 驗證挑戰。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub challenge_type: ChallengeType,
    pub url: String,
    pub status: ChallengeStatus,
    /// 挑戰 token，用於生成 key authorization
    #[serde(default)]
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<String>,
    /// 驗證失敗時 CA 回報的錯誤。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
}

/// 一個識別項的授權。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    #[serde(default)]
    pub wildcard: bool,
}

impl Authorization {
    pub fn challenge(&self, challenge_type: &ChallengeType) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|c| &c.challenge_type == challenge_type)
    }

    pub fn http_challenge(&self) -> Option<&Challenge> {
        self.challenge(&ChallengeType::Http01)
    }

    /// 第一個帶有錯誤的挑戰所回報的問題。
    pub fn challenge_error(&self) -> Option<&Problem> {
        self.challenges.iter().find_map(|c| c.error.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_authorization() {
        let authz: Authorization = serde_json::from_value(json!({
            "status": "pending",
            "expires": "2016-01-02T14:09:30Z",
            "identifier": {"type": "dns", "value": "www.example.org"},
            "challenges": [
                {"type": "http-01", "url": "https://ca/chall/prV_B7yEyA4", "status": "pending",
                 "token": "DGyRejmCefe7v4NfDGDKfA"},
                {"type": "dns-01", "url": "https://ca/chall/Rg5dV14Gh1Q", "status": "pending",
                 "token": "DGyRejmCefe7v4NfDGDKfA"},
                {"type": "something-new", "url": "https://ca/chall/x", "status": "pending"}
            ]
        }))
        .unwrap();

        assert_eq!(authz.status, AuthorizationStatus::Pending);
        assert_eq!(authz.identifier.value, "www.example.org");
        assert_eq!(
            authz.http_challenge().unwrap().url,
            "https://ca/chall/prV_B7yEyA4"
        );
        assert_eq!(authz.challenges[2].challenge_type, ChallengeType::Unknown);
        assert!(!authz.wildcard);
    }

    #[test]
    fn test_challenge_error_surfaces() {
        let authz: Authorization = serde_json::from_value(json!({
            "status": "invalid",
            "identifier": {"type": "dns", "value": "example.org"},
            "challenges": [{
                "type": "http-01", "url": "https://ca/chall/1", "status": "invalid", "token": "t",
                "error": {"type": "urn:ietf:params:acme:error:connection", "detail": "refused"}
            }]
        }))
        .unwrap();

        assert!(authz.status.is_terminal());
        assert_eq!(authz.challenge_error().unwrap().kind(), "connection");
    }
}
