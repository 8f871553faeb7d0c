//! 引擎的設定：CA 端點、帳戶參數與輪詢額度。
//!
//! 所有設定皆可由 JSON（kebab-case 欄位名）載入，也可用建構器方式在程式中組合。

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
    key_pair::{KeyAlgorithm, DEFAULT_RSA_BITS},
    store::validate_alias,
};

pub const LETS_ENCRYPT: &str = "LetsEncrypt";
pub const LETS_ENCRYPT_PRODUCTION_URL: &str = "https://acme-v02.api.letsencrypt.org/directory";
pub const LETS_ENCRYPT_STAGING_URL: &str =
    "https://acme-staging-v02.api.letsencrypt.org/directory";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown certificate authority: {0}")]
    UnknownCertificateAuthority(String),
    #[error("Certificate authority {name} is referenced by account {alias}")]
    CertificateAuthorityInUse { name: String, alias: String },
    #[error("Account {alias} is already bound to certificate authority {name}")]
    AccountAlreadyBound { alias: String, name: String },
    #[error("Certificate authority {0} already exists")]
    DuplicateCertificateAuthority(String),
    #[error("Certificate authority {0} has no staging URL")]
    NoStagingUrl(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, ConfigError>;

/// 一個 ACME 憑證簽發機構的端點。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CertificateAuthority {
    pub name: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging_url: Option<String>,
}

impl CertificateAuthority {
    pub fn lets_encrypt() -> Self {
        Self::custom(
            LETS_ENCRYPT,
            LETS_ENCRYPT_PRODUCTION_URL,
            Some(LETS_ENCRYPT_STAGING_URL),
        )
    }

    pub fn custom(name: &str, url: &str, staging_url: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            staging_url: staging_url.map(str::to_string),
        }
    }

    /// 回傳正式或測試環境的端點。
    pub fn endpoint(&self, staging: bool) -> Result<&str> {
        if !staging {
            return Ok(&self.url);
        }
        self.staging_url
            .as_deref()
            .ok_or_else(|| ConfigError::NoStagingUrl(self.name.clone()))
    }
}

/// 已知 CA 的登錄表，並記錄哪些帳戶引用了哪個 CA。
///
/// 仍被帳戶引用的 CA 不能移除。
#[derive(Debug, Clone)]
pub struct CaRegistry {
    authorities: BTreeMap<String, CertificateAuthority>,
    references: HashMap<String, String>,
}

impl Default for CaRegistry {
    fn default() -> Self {
        let mut authorities = BTreeMap::new();
        let lets_encrypt = CertificateAuthority::lets_encrypt();
        authorities.insert(lets_encrypt.name.clone(), lets_encrypt);
        Self {
            authorities,
            references: HashMap::new(),
        }
    }
}

impl CaRegistry {
    /// 建立一個內含 Let's Encrypt 的登錄表。
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, authority: CertificateAuthority) -> Result<()> {
        if authority.name.is_empty() || authority.url.is_empty() {
            return Err(ConfigError::Invalid(
                "certificate authority needs a name and a url".to_string(),
            ));
        }
        if self.authorities.contains_key(&authority.name) {
            return Err(ConfigError::DuplicateCertificateAuthority(authority.name));
        }
        debug!(name = %authority.name, url = %authority.url, "Registered certificate authority");
        self.authorities.insert(authority.name.clone(), authority);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&CertificateAuthority> {
        self.authorities
            .get(name)
            .ok_or_else(|| ConfigError::UnknownCertificateAuthority(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.authorities.keys().map(String::as_str)
    }

    pub fn remove(&mut self, name: &str) -> Result<CertificateAuthority> {
        if let Some((alias, _)) = self.references.iter().find(|(_, ca)| *ca == name) {
            return Err(ConfigError::CertificateAuthorityInUse {
                name: name.to_string(),
                alias: alias.clone(),
            });
        }
        self.authorities
            .remove(name)
            .ok_or_else(|| ConfigError::UnknownCertificateAuthority(name.to_string()))
    }

    /// 記錄帳戶引用的 CA，並回傳帳戶應使用的目錄端點。
    ///
    /// 別名已綁定其他 CA 時返回錯誤，需先 [`unbind`](Self::unbind)。
    pub fn bind(&mut self, account: &AccountConfig) -> Result<String> {
        let url = self.resolve(account)?;
        if let Some(bound) = self.references.get(&account.alias) {
            if *bound != account.certificate_authority {
                return Err(ConfigError::AccountAlreadyBound {
                    alias: account.alias.clone(),
                    name: bound.clone(),
                });
            }
        }
        self.references.insert(
            account.alias.clone(),
            account.certificate_authority.clone(),
        );
        Ok(url)
    }

    pub fn unbind(&mut self, alias: &str) {
        self.references.remove(alias);
    }

    /// 不記錄引用，只解析帳戶的端點。
    pub fn resolve(&self, account: &AccountConfig) -> Result<String> {
        Ok(self
            .get(&account.certificate_authority)?
            .endpoint(account.staging)?
            .to_string())
    }
}

/// 金鑰設定。`size` 僅對 RSA 有效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KeyConfig {
    pub algorithm: KeyAlgorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
}

impl Default for KeyConfig {
    fn default() -> Self {
        Self {
            algorithm: KeyAlgorithm::Rsa,
            size: Some(DEFAULT_RSA_BITS),
        }
    }
}

/// 授權與訂單輪詢的額度：固定次數、固定間隔。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PollConfig {
    pub attempts: u32,
    #[serde(rename = "interval-ms", with = "duration_millis")]
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            attempts: 10,
            interval: Duration::from_secs(5),
        }
    }
}

impl PollConfig {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self { attempts, interval }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

fn default_certificate_authority() -> String {
    LETS_ENCRYPT.to_string()
}

/// 一個 ACME 帳戶的設定。
///
/// ```
/// # use acme_engine::config::AccountConfig;
/// let config = AccountConfig::from_json(r#"{
///     "alias": "acct",
///     "contact-urls": ["mailto:admin@example.com"],
///     "agree-to-terms-of-service": true,
///     "staging": true
/// }"#).unwrap();
/// assert_eq!(config.certificate_authority, "LetsEncrypt");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AccountConfig {
    /// 憑證儲存中帳戶金鑰的別名。
    pub alias: String,
    #[serde(default = "default_certificate_authority")]
    pub certificate_authority: String,
    #[serde(default)]
    pub staging: bool,
    #[serde(default)]
    pub contact_urls: Vec<String>,
    #[serde(default)]
    pub agree_to_terms_of_service: bool,
    #[serde(default)]
    pub key: KeyConfig,
    /// 帳戶憑證的 DN，未設定時為 `CN=<alias>`。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dn: Option<String>,
    #[serde(default)]
    pub poll: PollConfig,
}

impl AccountConfig {
    pub fn new(alias: &str) -> Self {
        Self {
            alias: alias.to_string(),
            certificate_authority: default_certificate_authority(),
            staging: false,
            contact_urls: Vec::new(),
            agree_to_terms_of_service: false,
            key: KeyConfig::default(),
            dn: None,
            poll: PollConfig::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }

    pub fn certificate_authority(mut self, name: &str) -> Self {
        self.certificate_authority = name.to_string();
        self
    }

    pub fn staging(mut self, staging: bool) -> Self {
        self.staging = staging;
        self
    }

    pub fn contact(mut self, url: &str) -> Self {
        self.contact_urls.push(url.to_string());
        self
    }

    pub fn agree_to_terms_of_service(mut self, agree: bool) -> Self {
        self.agree_to_terms_of_service = agree;
        self
    }

    pub fn key_algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.key.algorithm = algorithm;
        if algorithm == KeyAlgorithm::Ec {
            self.key.size = None;
        }
        self
    }

    pub fn key_size(mut self, bits: u32) -> Self {
        self.key.size = Some(bits);
        self
    }

    pub fn dn(mut self, dn: &str) -> Self {
        self.dn = Some(dn.to_string());
        self
    }

    pub fn poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// 帳戶憑證實際使用的 DN。
    pub fn distinguished_name(&self) -> String {
        self.dn
            .clone()
            .unwrap_or_else(|| format!("CN={}", self.alias))
    }

    pub fn validate(&self) -> Result<()> {
        validate_alias(&self.alias).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.contact_urls.iter().any(|c| c.trim().is_empty()) {
            return Err(ConfigError::Invalid("contact URL cannot be empty".to_string()));
        }
        if self.poll.attempts == 0 {
            return Err(ConfigError::Invalid("poll attempts must be positive".to_string()));
        }
        Ok(())
    }
}
