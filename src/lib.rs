//! # ACME 客戶端協議引擎
//!
//! 本庫實作 ACME（RFC 8555）客戶端：向 CA（例如 Let's Encrypt）註冊帳戶、申請與下載
//! X.509 憑證、輪替帳戶金鑰以及撤銷憑證。
//!
//! - **client**: 簽名請求引擎，負責目錄、Nonce、JWS 簽署與重試。
//! - **account**: 帳戶的建立、查詢、更新、金鑰輪替與停用。
//! - **order**: 訂單流程，從建立訂單、HTTP-01 挑戰、送出 CSR 到下載憑證鏈。
//! - **revocation**: 以帳戶金鑰或憑證金鑰撤銷憑證。
//!
//! 帳戶金鑰與帳戶 URL 由 [`CredentialStore`] 保存，挑戰內容由 [`ChallengeResponder`]
//! 發佈，兩者皆可替換。
//!
//! ## 示例
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use acme_engine::{
//!     AccountConfig, AccountManager, AcmeClient, CaRegistry, FileCredentialStore,
//!     KeyConfig, OrderOrchestrator, WebrootResponder,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AccountConfig::new("example")
//!         .staging(true)
//!         .contact("admin@example.com")
//!         .agree_to_terms_of_service(true);
//!     let url = CaRegistry::new().resolve(&config)?;
//!
//!     // 1. 建立帳戶
//!     let client = Arc::new(AcmeClient::new(&url)?);
//!     let store = Arc::new(FileCredentialStore::open("/var/lib/acme")?);
//!     let mut account = AccountManager::new(client, store, &config)?;
//!     account.register()?;
//!
//!     // 2. 申請憑證
//!     let responder = WebrootResponder::new("/var/www/html");
//!     let orchestrator = OrderOrchestrator::new(&account, &responder, config.poll);
//!     let issued = orchestrator.obtain_certificate(&["example.com"], KeyConfig::default())?;
//!
//!     std::fs::write("cert.pem", issued.chain.to_pem()?)?;
//!     std::fs::write("key.pem", issued.key.to_pem()?)?;
//!     Ok(())
//! }
//! ```

pub mod account;
pub mod authorization;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod client;
pub mod config;
pub mod csr;
pub mod directory;
pub mod error;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod problem;
pub mod protection;
pub mod revocation;
pub mod signature;
pub mod store;
pub mod transport;

pub use account::{Account, AccountManager};
pub use certificate::CertificateChain;
pub use challenge::{ChallengeResponder, InMemoryResponder, WebrootResponder};
pub use client::AcmeClient;
pub use config::{AccountConfig, CaRegistry, CertificateAuthority, KeyConfig, PollConfig};
pub use error::{AcmeError, Result};
pub use key_pair::{KeyAlgorithm, KeyPair};
pub use order::{IssuedCertificate, Order, OrderOrchestrator};
pub use problem::Problem;
pub use revocation::{CertificateRevoker, RevocationReason};
pub use store::{CredentialStore, FileCredentialStore, MemCredentialStore};
