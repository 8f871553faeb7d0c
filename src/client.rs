//! 簽名請求引擎：負責取得 Nonce、簽署 JWS、送出請求並處理重試。

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    directory::{Directory, DirectoryResolver},
    error::{AcmeError, RequestKind, Result},
    jws::JwsSigner,
    key_pair::KeyPair,
    nonce::{NonceCache, NonceError},
    problem::Problem,
    transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError},
};

/// 每個簽名請求最多送出的次數：首次加上一次重試。
const MAX_ATTEMPTS: u32 = 2;

/// 簽署請求所用的金鑰，以及要放進保護頭部的身分。
#[derive(Debug, Clone, Copy)]
pub struct RequestKey<'a> {
    pub key: &'a KeyPair,
    pub key_id: Option<&'a str>,
}

impl<'a> RequestKey<'a> {
    /// 內嵌 `jwk` 公鑰，用於註冊帳戶或以憑證金鑰撤銷。
    pub fn jwk(key: &'a KeyPair) -> Self {
        Self { key, key_id: None }
    }

    /// 以帳戶 URL 作為 `kid`。
    pub fn kid(key: &'a KeyPair, account_url: &'a str) -> Self {
        Self {
            key,
            key_id: Some(account_url),
        }
    }
}

/// 與單一 CA 溝通的客戶端。
///
/// 同一個客戶端的簽名請求以互斥鎖串行化，確保「取走 Nonce → 送出 → 記錄新 Nonce」
/// 不會交錯。切換 CA 時需建立新的客戶端。
#[derive(Debug)]
pub struct AcmeClient {
    transport: Arc<dyn Transport>,
    directory: DirectoryResolver,
    nonce: NonceCache,
    signer: JwsSigner,
    request_lock: Mutex<()>,
}

/// 單次請求的重試計數。
struct Retry(u32);

impl Retry {
    fn exhausted(&mut self) -> bool {
        self.0 += 1;
        self.0 >= MAX_ATTEMPTS
    }
}

impl AcmeClient {
    /// 使用 `reqwest` 傳輸層建立客戶端。
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self::with_transport(
            base_url,
            Arc::new(ReqwestTransport::new()?),
        ))
    }

    /// 使用指定的傳輸層建立客戶端。
    pub fn with_transport(base_url: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            directory: DirectoryResolver::new(base_url),
            nonce: NonceCache::new(),
            signer: JwsSigner::default(),
            request_lock: Mutex::new(()),
        }
    }

    /// 替換簽名器（例如使用其他的 [`SigningProvider`](crate::signature::SigningProvider)）。
    pub fn with_signer(mut self, signer: JwsSigner) -> Self {
        self.signer = signer;
        self
    }

    pub fn directory_url(&self) -> &str {
        self.directory.url()
    }

    /// 取得（並快取）CA 目錄。
    pub fn directory(&self) -> Result<Arc<Directory>> {
        self.directory.get(self.transport.as_ref(), &self.nonce)
    }

    pub fn nonce_cache(&self) -> &NonceCache {
        &self.nonce
    }

    pub fn signer(&self) -> &JwsSigner {
        &self.signer
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// 送出帶有 JSON 載荷的簽名 POST 請求。
    pub fn post(
        &self,
        url: &str,
        payload: &Value,
        key: RequestKey<'_>,
        kind: RequestKind,
    ) -> Result<HttpResponse> {
        self.send_signed(url, Some(payload), key, kind, None)
    }

    /// 送出 POST-as-GET 請求（空載荷）。
    pub fn post_as_get(
        &self,
        url: &str,
        key: RequestKey<'_>,
        kind: RequestKind,
    ) -> Result<HttpResponse> {
        self.send_signed(url, None, key, kind, None)
    }

    /// 送出指定 `Accept` 標頭的 POST-as-GET 請求，用於下載憑證鏈。
    pub fn post_as_get_accept(
        &self,
        url: &str,
        key: RequestKey<'_>,
        kind: RequestKind,
        accept: &'static str,
    ) -> Result<HttpResponse> {
        self.send_signed(url, None, key, kind, Some(accept))
    }

    /// 傳輸錯誤與 `badNonce` 各自共用同一次重試額度；其他問題文件直接轉為錯誤。
    fn send_signed(
        &self,
        url: &str,
        payload: Option<&Value>,
        key: RequestKey<'_>,
        kind: RequestKind,
        accept: Option<&'static str>,
    ) -> Result<HttpResponse> {
        let directory = self.directory()?;
        let mut retry = Retry(0);

        loop {
            match self.attempt(&directory, url, payload, key, accept) {
                Ok(response) if response.is_success() => return Ok(response),
                Ok(response) => {
                    let problem = Problem::from_response(&response);
                    if problem.is_bad_nonce() && !retry.exhausted() {
                        warn!(url = %url, "CA rejected nonce, retrying with a fresh one");
                        continue;
                    }
                    debug!(url = %url, status = response.status, problem = %problem, "ACME request failed");
                    return Err(kind.problem_error(url, problem));
                }
                Err(AcmeError::Transport(err)) if !retry.exhausted() => {
                    warn!(url = %url, error = %err, "Transport error, retrying once");
                    continue;
                }
                // 取得 Nonce 的 HEAD 請求失敗，與傳輸錯誤共用同一次重試
                Err(AcmeError::Nonce(NonceError::RequestFailed(err))) if !retry.exhausted() => {
                    warn!(url = %url, error = %err, "Fetching nonce failed, retrying once");
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn attempt(
        &self,
        directory: &Directory,
        url: &str,
        payload: Option<&Value>,
        key: RequestKey<'_>,
        accept: Option<&'static str>,
    ) -> Result<HttpResponse> {
        let _guard = self
            .request_lock
            .lock()
            .map_err(|_| AcmeError::Transport(TransportError::LockPoisoned))?;

        let nonce = self
            .nonce
            .next_nonce(self.transport.as_ref(), &directory.new_nonce)?;
        let jws = self
            .signer
            .sign(url, payload, key.key, key.key_id, Some(nonce))?;

        let mut request = HttpRequest::post_jose(url, jws.to_json()?);
        if let Some(accept) = accept {
            request = request.accept(accept);
        }

        debug!(url = %url, post_as_get = payload.is_none(), "Sending signed request");
        let response = self.transport.execute(&request)?;
        self.nonce.observe(&response)?;
        Ok(response)
    }
}
