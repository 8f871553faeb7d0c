//! 帳戶憑證的持久化儲存。
//!
//! 每個別名（alias）對應一組帳戶金鑰、包覆其公鑰的憑證，以及註冊後取得的帳戶 URL。
//!
//! 檔案版的目錄結構：
//!
//! ```text
//! root/
//! └── <alias>/
//!     ├── credentials.pem   # 私鑰與帳戶憑證
//!     └── account_url       # 帳戶 URL
//! ```

use std::{
    collections::HashMap,
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::RwLock,
};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::key_pair::{KeyError, KeyPair};

/// 儲存操作可能發生的錯誤類型。
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to persist file: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("Alias is invalid: {0}")]
    InvalidAlias(String),
    #[error("Unknown key alias: {0}")]
    UnknownKeyAlias(String),
    #[error("Stored credentials are corrupted: {0}")]
    Corrupted(String),
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
    #[error("Lock poisoned")]
    LockPoisoned,
}

type Result<T> = std::result::Result<T, StoreError>;

const CERTIFICATE_BEGIN: &str = "-----BEGIN CERTIFICATE-----";

/// 一組帳戶金鑰與包覆其公鑰的憑證（PEM）。
#[derive(Debug, Clone)]
pub struct KeyEntry {
    pub key: KeyPair,
    pub certificate_pem: Vec<u8>,
}

impl KeyEntry {
    pub fn new(key: KeyPair, certificate_pem: Vec<u8>) -> Self {
        Self {
            key,
            certificate_pem,
        }
    }

    /// 私鑰在前、憑證在後，串接成單一 PEM 檔案內容。
    pub fn to_pem(&self) -> Result<Vec<u8>> {
        let mut pem = self.key.to_pem()?;
        pem.extend_from_slice(&self.certificate_pem);
        Ok(pem)
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let text = String::from_utf8_lossy(pem);
        let split = text
            .find(CERTIFICATE_BEGIN)
            .ok_or_else(|| StoreError::Corrupted("missing certificate".to_string()))?;

        Ok(Self {
            key: KeyPair::from_pem(text[..split].as_bytes())?,
            certificate_pem: text[split..].as_bytes().to_vec(),
        })
    }
}

/// 憑證儲存必須提供的操作。寫入皆為整筆取代。
pub trait CredentialStore: Send + Sync + fmt::Debug {
    fn store_key(&self, alias: &str, entry: &KeyEntry) -> Result<()>;

    /// 讀取金鑰；別名不存在時回傳 [`StoreError::UnknownKeyAlias`]。
    fn load_key(&self, alias: &str) -> Result<KeyEntry>;

    fn store_account_url(&self, alias: &str, url: &str) -> Result<()>;

    fn load_account_url(&self, alias: &str) -> Result<Option<String>>;

    fn has_key(&self, alias: &str) -> Result<bool> {
        match self.load_key(alias) {
            Ok(_) => Ok(true),
            Err(StoreError::UnknownKeyAlias(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// 檢查別名可安全地作為目錄名稱。
pub fn validate_alias(alias: &str) -> Result<()> {
    let invalid = alias.is_empty()
        || alias == "."
        || alias == ".."
        || alias.contains(['/', '\\', '\0', '\n', '\r']);
    if invalid {
        return Err(StoreError::InvalidAlias(alias.to_string()));
    }
    Ok(())
}

/// 以記憶體保存的憑證儲存，通常用於測試環境。
#[derive(Debug, Default)]
pub struct MemCredentialStore {
    keys: RwLock<HashMap<String, KeyEntry>>,
    account_urls: RwLock<HashMap<String, String>>,
}

impl MemCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemCredentialStore {
    fn store_key(&self, alias: &str, entry: &KeyEntry) -> Result<()> {
        validate_alias(alias)?;
        self.keys
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert(alias.to_string(), entry.clone());
        Ok(())
    }

    fn load_key(&self, alias: &str) -> Result<KeyEntry> {
        validate_alias(alias)?;
        self.keys
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .get(alias)
            .cloned()
            .ok_or_else(|| StoreError::UnknownKeyAlias(alias.to_string()))
    }

    fn store_account_url(&self, alias: &str, url: &str) -> Result<()> {
        validate_alias(alias)?;
        self.account_urls
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert(alias.to_string(), url.to_string());
        Ok(())
    }

    fn load_account_url(&self, alias: &str) -> Result<Option<String>> {
        validate_alias(alias)?;
        Ok(self
            .account_urls
            .read()
            .map_err(|_| StoreError::LockPoisoned)?
            .get(alias)
            .cloned())
    }
}

/// 以檔案系統保存的憑證儲存。
///
/// 每次寫入都先寫到同目錄下的暫存檔，再以 rename 原子地取代目標檔案；
/// Unix 上目錄權限為 0700、檔案為 0600。
#[derive(Debug)]
pub struct FileCredentialStore {
    root: PathBuf,
}

impl FileCredentialStore {
    const CREDENTIALS_FILE: &'static str = "credentials.pem";
    const ACCOUNT_URL_FILE: &'static str = "account_url";

    /// 開啟（必要時建立）儲存根目錄。
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        create_private_dir(&root)?;
        info!(path = %root.display(), "Opened credential store");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn alias_dir(&self, alias: &str) -> Result<PathBuf> {
        validate_alias(alias)?;
        Ok(self.root.join(alias))
    }

    fn write_atomic(&self, alias: &str, file: &str, contents: &[u8]) -> Result<()> {
        let dir = self.alias_dir(alias)?;
        create_private_dir(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(contents)?;
        tmp.as_file().sync_all()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))?;
        }
        tmp.persist(dir.join(file))?;

        trace!(alias = %alias, file = %file, "Wrote credential file");
        Ok(())
    }

    fn read(&self, alias: &str, file: &str) -> Result<Option<Vec<u8>>> {
        let path = self.alias_dir(alias)?.join(file);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn create_private_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    }
    Ok(())
}

impl CredentialStore for FileCredentialStore {
    fn store_key(&self, alias: &str, entry: &KeyEntry) -> Result<()> {
        self.write_atomic(alias, Self::CREDENTIALS_FILE, &entry.to_pem()?)?;
        debug!(alias = %alias, "Stored account key");
        Ok(())
    }

    fn load_key(&self, alias: &str) -> Result<KeyEntry> {
        let pem = self
            .read(alias, Self::CREDENTIALS_FILE)?
            .ok_or_else(|| StoreError::UnknownKeyAlias(alias.to_string()))?;
        KeyEntry::from_pem(&pem)
    }

    fn store_account_url(&self, alias: &str, url: &str) -> Result<()> {
        self.write_atomic(alias, Self::ACCOUNT_URL_FILE, url.as_bytes())
    }

    fn load_account_url(&self, alias: &str) -> Result<Option<String>> {
        Ok(self
            .read(alias, Self::ACCOUNT_URL_FILE)?
            .map(|data| String::from_utf8_lossy(&data).trim().to_string())
            .filter(|url| !url.is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{certificate::AccountCertificate, key_pair::KeyAlgorithm};
    use tempfile::TempDir;

    fn entry() -> KeyEntry {
        let key = KeyPair::generate(KeyAlgorithm::Ec, None).unwrap();
        let cert = AccountCertificate::generate(&key, "CN=acct").unwrap();
        KeyEntry::new(key, cert.to_pem().unwrap())
    }

    #[test]
    fn test_alias_validation() {
        for alias in ["", ".", "..", "a/b", "a\\b", "x\0"] {
            assert!(matches!(validate_alias(alias), Err(StoreError::InvalidAlias(_))));
        }
        assert!(validate_alias("account-1").is_ok());
    }

    #[test]
    fn test_mem_store() {
        let store = MemCredentialStore::new();
        assert!(matches!(
            store.load_key("acct"),
            Err(StoreError::UnknownKeyAlias(_))
        ));
        assert!(!store.has_key("acct").unwrap());

        let entry = entry();
        store.store_key("acct", &entry).unwrap();
        assert!(store.has_key("acct").unwrap());
        assert_eq!(store.load_account_url("acct").unwrap(), None);
        store.store_account_url("acct", "http://ca/acct/1").unwrap();
        assert_eq!(
            store.load_account_url("acct").unwrap().as_deref(),
            Some("http://ca/acct/1")
        );
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::open(dir.path().join("creds")).unwrap();
        let entry = entry();

        store.store_key("acct", &entry).unwrap();
        store.store_account_url("acct", "http://ca/acct/384").unwrap();

        let loaded = store.load_key("acct").unwrap();
        assert_eq!(
            loaded.key.public_key_der().unwrap(),
            entry.key.public_key_der().unwrap()
        );
        assert_eq!(loaded.certificate_pem, entry.certificate_pem);
        assert_eq!(
            store.load_account_url("acct").unwrap().as_deref(),
            Some("http://ca/acct/384")
        );
    }

    #[test]
    fn test_file_store_replaces_entry() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::open(dir.path()).unwrap();
        store.store_key("acct", &entry()).unwrap();
        let replacement = entry();
        store.store_key("acct", &replacement).unwrap();

        let loaded = store.load_key("acct").unwrap();
        assert_eq!(
            loaded.key.public_key_der().unwrap(),
            replacement.key.public_key_der().unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::open(dir.path()).unwrap();
        store.store_key("acct", &entry()).unwrap();

        let mode = fs::metadata(dir.path().join("acct").join("credentials.pem"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_file_store_unknown_alias() {
        let dir = TempDir::new().unwrap();
        let store = FileCredentialStore::open(dir.path()).unwrap();
        assert!(matches!(
            store.load_key("missing"),
            Err(StoreError::UnknownKeyAlias(_))
        ));
        assert!(matches!(
            store.load_key("../escape"),
            Err(StoreError::InvalidAlias(_))
        ));
    }
}
