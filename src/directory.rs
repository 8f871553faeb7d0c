//! ACME 目錄（RFC 8555 §7.1.1）的取得與快取。

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{AcmeError, Result},
    nonce::NonceCache,
    transport::{HttpRequest, Transport},
};

/// 表示與目錄相關的 API 結構，包含帳號、nonce、訂單、金鑰輪替、續期資訊及撤銷憑證的 URL。
///
/// 未知的欄位會被忽略。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    /// 用於新帳號註冊的 API 路徑。
    pub new_account: String,
    /// 用於取得新的 nonce 值的 API 路徑。
    pub new_nonce: String,
    /// 用於訂單相關操作的 API 路徑。
    pub new_order: String,
    /// 帳戶金鑰輪替的 API 路徑。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_change: Option<String>,
    /// 用於撤銷憑證的 API 路徑。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoke_cert: Option<String>,
    /// 用於取得續期資訊的 API 路徑，可能不存在。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewal_info: Option<String>,
    #[serde(default)]
    pub meta: Metadata,
}

/// 目錄的 `meta` 物件。CA 未提供的欄位一律為 `None`，不套用預設值。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caa_identities: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_account_required: Option<bool>,
}

impl Directory {
    pub fn key_change_url(&self) -> Result<&str> {
        self.key_change
            .as_deref()
            .ok_or_else(|| missing_endpoint("keyChange"))
    }

    pub fn revoke_cert_url(&self) -> Result<&str> {
        self.revoke_cert
            .as_deref()
            .ok_or_else(|| missing_endpoint("revokeCert"))
    }
}

fn missing_endpoint(name: &str) -> AcmeError {
    AcmeError::UnexpectedResponse {
        url: name.to_string(),
        status: 0,
        detail: format!("directory does not advertise {}", name),
    }
}

/// 由 CA 基礎 URL 推導目錄 URL；已經以 `/directory` 結尾時原樣使用。
pub fn directory_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with("/directory") {
        trimmed.to_string()
    } else {
        format!("{}/directory", trimmed)
    }
}

/// 在客戶端生命週期內最多取得一次目錄。
#[derive(Debug)]
pub struct DirectoryResolver {
    url: String,
    cached: RwLock<Option<Arc<Directory>>>,
}

impl DirectoryResolver {
    pub fn new(base_url: &str) -> Self {
        Self {
            url: directory_url(base_url),
            cached: RwLock::new(None),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// 回傳快取的目錄；第一次呼叫時以未簽名的 GET 取得。
    ///
    /// 連線失敗、非 2xx 或內容無法解析時回傳 [`AcmeError::DirectoryUnavailable`]，
    /// 此層不做自動重試。
    pub fn get(&self, transport: &dyn Transport, nonce: &NonceCache) -> Result<Arc<Directory>> {
        if let Some(directory) = self.cached.read().map_err(|_| self.poisoned())?.as_ref() {
            return Ok(Arc::clone(directory));
        }

        let mut slot = self.cached.write().map_err(|_| self.poisoned())?;
        if let Some(directory) = slot.as_ref() {
            return Ok(Arc::clone(directory));
        }

        debug!(url = %self.url, "Fetching ACME directory");
        let response = transport
            .execute(&HttpRequest::get(&self.url))
            .map_err(|e| self.unavailable(e.to_string()))?;
        nonce.observe(&response)?;

        if !response.is_success() {
            return Err(self.unavailable(format!("HTTP {}", response.status)));
        }
        let directory: Directory = response
            .json()
            .map_err(|e| self.unavailable(format!("invalid directory: {}", e)))?;

        info!(url = %self.url, "ACME directory loaded");
        let directory = Arc::new(directory);
        *slot = Some(Arc::clone(&directory));
        Ok(directory)
    }

    fn unavailable(&self, reason: String) -> AcmeError {
        AcmeError::DirectoryUnavailable {
            url: self.url.clone(),
            reason,
        }
    }

    fn poisoned(&self) -> AcmeError {
        self.unavailable("directory cache lock poisoned".to_string())
    }
}
