//! 整個引擎共用的錯誤類型。
//!
//! 各元件保有自己的錯誤列舉，在此匯集為 [`AcmeError`]；CA 回傳的問題文件依照請求的
//! 情境轉換為對應的型別化錯誤，內容原樣保留。

use thiserror::Error;

use crate::{
    certificate::CertificateError,
    challenge::ChallengeError,
    config::ConfigError,
    csr::CsrError,
    jws::JwsError,
    key_pair::KeyError,
    nonce::NonceError,
    payload::PayloadError,
    problem::Problem,
    store::StoreError,
    transport::TransportError,
};

#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("Directory unavailable at {url}: {reason}")]
    DirectoryUnavailable { url: String, reason: String },
    #[error("Terms of service must be agreed before creating an account")]
    TermsNotAgreed,
    #[error("Nonce rejected twice: {0}")]
    BadNonce(Problem),
    #[error("Account request failed: {0}")]
    AccountProblem(Problem),
    #[error("Order request failed: {0}")]
    OrderProblem(Problem),
    #[error("Authorization for {identifier} failed: {problem}")]
    AuthorizationProblem { identifier: String, problem: Problem },
    #[error("Revocation failed: {0}")]
    RevocationProblem(Problem),
    #[error("Authorization {url} not valid after {attempts} attempts")]
    AuthorizationTimeout { url: String, attempts: u32 },
    #[error("Order {url} did not reach {expected} after {attempts} attempts")]
    OrderTimeout {
        url: String,
        expected: &'static str,
        attempts: u32,
    },
    #[error("Order {url} is {status}")]
    OrderNotReady { url: String, status: String },
    #[error("Unknown key alias: {0}")]
    UnknownKeyAlias(String),
    #[error("Account is not registered")]
    AccountNotRegistered,
    #[error("No http-01 challenge offered for {0}")]
    NoHttpChallenge(String),
    #[error("Challenge token {0} is not deployed")]
    ChallengeNotDeployed(String),
    #[error("No Location header in response from {0}")]
    MissingLocation(String),
    #[error("Unexpected response from {url}: {status} {detail}")]
    UnexpectedResponse {
        url: String,
        status: u16,
        detail: String,
    },
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Nonce error: {0}")]
    Nonce(#[from] NonceError),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("JWS error: {0}")]
    Jws(#[from] JwsError),
    #[error("Invalid request: {0}")]
    Payload(#[from] PayloadError),
    #[error("CSR error: {0}")]
    Csr(#[from] CsrError),
    #[error("Certificate error: {0}")]
    Certificate(#[from] CertificateError),
    #[error("Credential store error: {0}")]
    Store(StoreError),
    #[error("Challenge responder error: {0}")]
    Challenge(#[from] ChallengeError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<StoreError> for AcmeError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownKeyAlias(alias) => AcmeError::UnknownKeyAlias(alias),
            other => AcmeError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, AcmeError>;

impl AcmeError {
    /// 取得 CA 回傳的問題文件（若有）。
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            AcmeError::BadNonce(p)
            | AcmeError::AccountProblem(p)
            | AcmeError::OrderProblem(p)
            | AcmeError::RevocationProblem(p) => Some(p),
            AcmeError::AuthorizationProblem { problem, .. } => Some(problem),
            _ => None,
        }
    }
}

/// 簽名請求所屬的情境，決定 CA 問題文件要轉換成哪一種錯誤。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Account,
    Order,
    Authorization,
    Revocation,
}

impl RequestKind {
    pub(crate) fn problem_error(self, url: &str, problem: Problem) -> AcmeError {
        if problem.is_bad_nonce() {
            return AcmeError::BadNonce(problem);
        }
        match self {
            RequestKind::Account => AcmeError::AccountProblem(problem),
            RequestKind::Order => AcmeError::OrderProblem(problem),
            RequestKind::Authorization => AcmeError::AuthorizationProblem {
                identifier: url.to_string(),
                problem,
            },
            RequestKind::Revocation => AcmeError::RevocationProblem(problem),
        }
    }
}
