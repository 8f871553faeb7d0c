//! HTTP-01 挑戰回應者。
//!
//! 訂單流程把 (token, key authorization) 交給 [`ChallengeResponder`]，由其負責讓
//! `http://<domain>/.well-known/acme-challenge/<token>` 回傳對應內容。

use std::{
    collections::HashMap,
    fmt, fs, io,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use thiserror::Error;
use tracing::{debug, trace};

/// HTTP-01 挑戰的路徑前綴。
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

#[derive(Debug, Error)]
pub enum ChallengeError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    #[error("Lock poisoned")]
    LockPoisoned,
}

type Result<T> = std::result::Result<T, ChallengeError>;

/// 發佈 HTTP-01 驗證內容的協作者。
pub trait ChallengeResponder: Send + Sync + fmt::Debug {
    fn deploy(&self, token: &str, key_authorization: &str) -> Result<()>;

    /// 確認 token 已可被存取。
    fn is_deployed(&self, token: &str) -> Result<bool>;

    fn cleanup(&self, token: &str) -> Result<()>;
}

/// token 只能使用 base64url 字元。
fn validate_token(token: &str) -> Result<()> {
    let valid = !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if !valid {
        return Err(ChallengeError::InvalidToken(token.to_string()));
    }
    Ok(())
}

/// 以記憶體保存挑戰內容，供內嵌的 HTTP 伺服器查詢。
///
/// 複本共用同一份表。
#[derive(Debug, Clone, Default)]
pub struct InMemoryResponder {
    challenges: Arc<RwLock<HashMap<String, String>>>,
}

impl InMemoryResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取得 token 對應的 key authorization。
    pub fn get_response(&self, token: &str) -> Option<String> {
        let result = self
            .challenges
            .read()
            .ok()
            .and_then(|map| map.get(token).cloned());
        trace!(token = %token, found = result.is_some(), "ACME challenge lookup");
        result
    }

    /// 若路徑為挑戰路徑，回傳其中的 token。
    pub fn extract_token(path: &str) -> Option<&str> {
        path.strip_prefix(ACME_CHALLENGE_PREFIX)
    }

    /// 依請求路徑回應；非挑戰路徑或未知 token 時為 `None`。
    pub fn respond(&self, path: &str) -> Option<String> {
        Self::extract_token(path).and_then(|token| self.get_response(token))
    }

    pub fn pending_count(&self) -> usize {
        self.challenges.read().map(|map| map.len()).unwrap_or(0)
    }
}

impl ChallengeResponder for InMemoryResponder {
    fn deploy(&self, token: &str, key_authorization: &str) -> Result<()> {
        validate_token(token)?;
        debug!(token = %token, "Registering ACME HTTP-01 challenge");
        self.challenges
            .write()
            .map_err(|_| ChallengeError::LockPoisoned)?
            .insert(token.to_string(), key_authorization.to_string());
        Ok(())
    }

    fn is_deployed(&self, token: &str) -> Result<bool> {
        Ok(self
            .challenges
            .read()
            .map_err(|_| ChallengeError::LockPoisoned)?
            .contains_key(token))
    }

    fn cleanup(&self, token: &str) -> Result<()> {
        let removed = self
            .challenges
            .write()
            .map_err(|_| ChallengeError::LockPoisoned)?
            .remove(token);
        if removed.is_some() {
            debug!(token = %token, "Removed ACME challenge");
        }
        Ok(())
    }
}

/// 把挑戰內容寫到網站根目錄下，由既有的 web 伺服器提供。
#[derive(Debug, Clone)]
pub struct WebrootResponder {
    challenge_dir: PathBuf,
}

impl WebrootResponder {
    pub fn new(webroot: impl AsRef<Path>) -> Self {
        Self {
            challenge_dir: webroot
                .as_ref()
                .join(ACME_CHALLENGE_PREFIX.trim_matches('/')),
        }
    }

    pub fn challenge_dir(&self) -> &Path {
        &self.challenge_dir
    }

    fn token_path(&self, token: &str) -> Result<PathBuf> {
        validate_token(token)?;
        Ok(self.challenge_dir.join(token))
    }
}

impl ChallengeResponder for WebrootResponder {
    fn deploy(&self, token: &str, key_authorization: &str) -> Result<()> {
        let path = self.token_path(token)?;
        fs::create_dir_all(&self.challenge_dir)?;
        fs::write(&path, key_authorization)?;
        debug!(path = %path.display(), "Wrote ACME HTTP-01 challenge");
        Ok(())
    }

    fn is_deployed(&self, token: &str) -> Result<bool> {
        Ok(self.token_path(token)?.is_file())
    }

    fn cleanup(&self, token: &str) -> Result<()> {
        match fs::remove_file(self.token_path(token)?) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
