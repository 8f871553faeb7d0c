use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, trace};

use crate::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// 表示在取得 Nonce 時可能發生的錯誤狀況。
#[derive(Error, Debug)]
pub enum NonceError {
    /// 當請求過程中發生錯誤時回傳此錯誤。
    #[error("Failed to make request: {0}")]
    RequestFailed(#[from] TransportError),
    /// 當回應中缺少 `Replay-Nonce` 標頭時回傳此錯誤。
    #[error("No Replay-Nonce header found in response from {0}")]
    NoNonceHeader(String),
    #[error("Lock poisoned")]
    LockPoisoned,
}

type Result<T> = std::result::Result<T, NonceError>;

/// 保存 CA 最近一次發出的防重放 Nonce。
///
/// 快取最多只持有一個 Nonce：每個簽名請求都會取走它，而每個帶有 `Replay-Nonce`
/// 標頭的回應（不論成功或失敗）都會無條件覆寫它。
#[derive(Debug, Default)]
pub struct NonceCache {
    slot: Mutex<Option<String>>,
}

impl NonceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取走目前快取的 Nonce；若沒有，則對 `new_nonce_url` 發送 HEAD 請求取得新的。
    pub fn next_nonce(&self, transport: &dyn Transport, new_nonce_url: &str) -> Result<String> {
        if let Some(nonce) = self.take()? {
            trace!("Using cached nonce");
            return Ok(nonce);
        }

        debug!(url = %new_nonce_url, "Fetching fresh nonce");
        let response = transport.execute(&HttpRequest::head(new_nonce_url))?;
        match response.replay_nonce() {
            Some(nonce) => Ok(nonce.to_string()),
            None => Err(NonceError::NoNonceHeader(new_nonce_url.to_string())),
        }
    }

    /// 若回應帶有 `Replay-Nonce`，將其存入快取。
    pub fn observe(&self, response: &HttpResponse) -> Result<()> {
        if let Some(nonce) = response.replay_nonce() {
            *self.slot.lock().map_err(|_| NonceError::LockPoisoned)? = Some(nonce.to_string());
        }
        Ok(())
    }

    /// 返回目前快取的 Nonce 而不取走。
    pub fn peek(&self) -> Result<Option<String>> {
        Ok(self
            .slot
            .lock()
            .map_err(|_| NonceError::LockPoisoned)?
            .clone())
    }

    /// 丟棄快取中的 Nonce，下一次請求將重新取得。
    pub fn clear(&self) -> Result<()> {
        self.take().map(|_| ())
    }

    fn take(&self) -> Result<Option<String>> {
        Ok(self.slot.lock().map_err(|_| NonceError::LockPoisoned)?.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Method, MockTransport};

    const NEW_NONCE: &str = "http://ca/acme/new-nonce";

    #[test]
    fn test_fetches_when_empty() {
        let mock = MockTransport::new();
        mock.on(
            Method::Head,
            NEW_NONCE,
            HttpResponse::new(200).with_header("Replay-Nonce", "fresh-1"),
        );
        let cache = NonceCache::new();

        assert_eq!(cache.next_nonce(&mock, NEW_NONCE).unwrap(), "fresh-1");
        assert_eq!(mock.request_count(), 1);
    }

    #[test]
    fn test_cached_nonce_is_consumed_once() {
        let mock = MockTransport::new();
        mock.on(
            Method::Head,
            NEW_NONCE,
            HttpResponse::new(200).with_header("Replay-Nonce", "fresh-2"),
        );
        let cache = NonceCache::new();
        cache
            .observe(&HttpResponse::new(201).with_header("Replay-Nonce", "observed"))
            .unwrap();

        assert_eq!(cache.next_nonce(&mock, NEW_NONCE).unwrap(), "observed");
        assert_eq!(mock.request_count(), 0);
        assert_eq!(cache.next_nonce(&mock, NEW_NONCE).unwrap(), "fresh-2");
        assert_eq!(mock.request_count(), 1);
    }

    #[test]
    fn test_error_response_still_replaces_nonce() {
        let cache = NonceCache::new();
        cache
            .observe(&HttpResponse::new(200).with_header("Replay-Nonce", "first"))
            .unwrap();
        cache
            .observe(&HttpResponse::new(400).with_header("Replay-Nonce", "second"))
            .unwrap();
        assert_eq!(cache.peek().unwrap(), Some("second".to_string()));

        cache.observe(&HttpResponse::new(500)).unwrap();
        assert_eq!(cache.peek().unwrap(), Some("second".to_string()));
    }

    #[test]
    fn test_missing_header() {
        let mock = MockTransport::new();
        mock.on(Method::Head, NEW_NONCE, HttpResponse::new(200));
        let cache = NonceCache::new();

        assert!(matches!(
            cache.next_nonce(&mock, NEW_NONCE),
            Err(NonceError::NoNonceHeader(_))
        ));
    }
}
