//! 模塊提供與 ACME 帳戶管理相關的功能，包括帳戶創建、查詢、更新、金鑰輪替與停用。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    certificate::AccountCertificate,
    client::{AcmeClient, RequestKey},
    config::AccountConfig,
    directory::Metadata,
    error::{AcmeError, RequestKind, Result},
    key_pair::KeyPair,
    payload::{
        contact_uri, KeyChangePayload, NewAccountPayload, PayloadT, StatusPayload,
        UpdateAccountPayload,
    },
    store::{CredentialStore, KeyEntry, StoreError},
    transport::HttpResponse,
};

/// CA 回報的帳戶狀態。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Valid,
    Deactivated,
    Revoked,
}

/// CA 端的帳戶資源。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountResource {
    pub status: AccountStatus,
    #[serde(default)]
    pub contact: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terms_of_service_agreed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orders: Option<String>,
}

/// 表示本地端的 ACME 帳戶狀態。
#[derive(Debug, Clone)]
pub struct Account {
    /// 憑證儲存中的別名。
    pub alias: String,
    key: KeyPair,
    certificate: AccountCertificate,
    dn: String,
    contacts: Vec<String>,
    terms_of_service_agreed: bool,
    account_url: Option<String>,
    terms_of_service_link: Option<String>,
}

impl Account {
    pub fn key(&self) -> &KeyPair {
        &self.key
    }

    /// 包覆帳戶公鑰的憑證。
    pub fn certificate(&self) -> &AccountCertificate {
        &self.certificate
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    pub fn contacts(&self) -> &[String] {
        &self.contacts
    }

    pub fn terms_of_service_agreed(&self) -> bool {
        self.terms_of_service_agreed
    }

    pub fn account_url(&self) -> Option<&str> {
        self.account_url.as_deref()
    }

    /// 註冊時 CA 以 `Link: rel="terms-of-service"` 回報的條款位置。
    pub fn terms_of_service_link(&self) -> Option<&str> {
        self.terms_of_service_link.as_deref()
    }
}

/// 管理單一帳戶與 CA 之間的互動，並把金鑰與帳戶 URL 同步到憑證儲存。
#[derive(Debug)]
pub struct AccountManager {
    client: Arc<AcmeClient>,
    store: Arc<dyn CredentialStore>,
    account: Account,
}

impl AccountManager {
    /// 從憑證儲存載入帳戶金鑰；別名不存在時依設定產生新的金鑰與帳戶憑證並保存。
    pub fn new(
        client: Arc<AcmeClient>,
        store: Arc<dyn CredentialStore>,
        config: &AccountConfig,
    ) -> Result<Self> {
        config.validate()?;
        let alias = config.alias.clone();

        let (key, certificate) = match store.load_key(&alias) {
            Ok(entry) => {
                debug!(alias = %alias, "Loaded account key");
                (entry.key, AccountCertificate::from_pem(&entry.certificate_pem)?)
            }
            Err(StoreError::UnknownKeyAlias(_)) => {
                let key = KeyPair::generate(config.key.algorithm, config.key.size)?;
                let certificate = AccountCertificate::generate(&key, &config.distinguished_name())?;
                store.store_key(&alias, &KeyEntry::new(key.clone(), certificate.to_pem()?))?;
                info!(alias = %alias, algorithm = %key.algorithm(), "Generated account key");
                (key, certificate)
            }
            Err(e) => return Err(e.into()),
        };

        let account_url = store.load_account_url(&alias)?;
        let account = Account {
            alias,
            dn: certificate.dn()?,
            key,
            certificate,
            contacts: config.contact_urls.iter().map(|c| contact_uri(c)).collect(),
            terms_of_service_agreed: config.agree_to_terms_of_service,
            account_url,
            terms_of_service_link: None,
        };

        Ok(Self {
            client,
            store,
            account,
        })
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn client(&self) -> &Arc<AcmeClient> {
        &self.client
    }

    pub fn is_registered(&self) -> bool {
        self.account.account_url.is_some()
    }

    /// 帳戶 URL；尚未註冊時回傳 [`AcmeError::AccountNotRegistered`]。
    pub fn account_url(&self) -> Result<&str> {
        self.account
            .account_url
            .as_deref()
            .ok_or(AcmeError::AccountNotRegistered)
    }

    /// 以帳戶 URL 作為 `kid` 的簽名身分。
    pub fn request_key(&self) -> Result<RequestKey<'_>> {
        Ok(RequestKey::kid(&self.account.key, self.account_url()?))
    }

    /// 以設定中的聯絡資訊與條款同意狀態建立帳戶。
    pub fn register(&mut self) -> Result<bool> {
        let contacts = self.account.contacts.clone();
        let agree = self.account.terms_of_service_agreed;
        self.create_account(&contacts, agree)
    }

    /// 向 CA 建立帳戶，回傳是否為新建立（`false` 表示此金鑰已有帳戶）。
    ///
    /// 未同意服務條款時直接回傳 [`AcmeError::TermsNotAgreed`]，不發送任何請求。
    pub fn create_account(&mut self, contacts: &[String], agree: bool) -> Result<bool> {
        if !agree {
            return Err(AcmeError::TermsNotAgreed);
        }
        let payload = NewAccountPayload::new(contacts, true).to_value()?;
        let directory = self.client.directory()?;

        let response = self.client.post(
            &directory.new_account,
            &payload,
            RequestKey::jwk(&self.account.key),
            RequestKind::Account,
        )?;
        let created = response.status == 201;
        let account_url = required_location(&response, &directory.new_account)?;

        self.set_account_url(account_url)?;
        self.account.contacts = contacts.iter().map(|c| contact_uri(c)).collect();
        self.account.terms_of_service_agreed = true;
        self.account.terms_of_service_link = response.link("terms-of-service");

        info!(
            alias = %self.account.alias,
            url = ?self.account.account_url,
            created,
            "ACME account registered"
        );
        Ok(created)
    }

    /// 查詢此金鑰是否已有帳戶；找到時記錄並保存帳戶 URL。
    pub fn find_existing_account(&mut self) -> Result<Option<String>> {
        let payload = NewAccountPayload::only_return_existing().to_value()?;
        let directory = self.client.directory()?;

        let response = match self.client.post(
            &directory.new_account,
            &payload,
            RequestKey::jwk(&self.account.key),
            RequestKind::Account,
        ) {
            Ok(response) => response,
            Err(AcmeError::AccountProblem(problem)) if problem.is_account_does_not_exist() => {
                debug!(alias = %self.account.alias, "No existing account for this key");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let account_url = required_location(&response, &directory.new_account)?;
        self.set_account_url(account_url.clone())?;
        Ok(Some(account_url))
    }

    /// 更新聯絡資訊；帳戶 URL 未知時先查詢，查無帳戶則直接建立。
    ///
    /// CA 拒絕時本地狀態保持不變。
    pub fn update_account(&mut self, contacts: &[String], agree: bool) -> Result<AccountResource> {
        if !self.is_registered() && self.find_existing_account()?.is_none() {
            self.create_account(contacts, agree)?;
            return self.fetch_account();
        }

        let terms_changed = agree && !self.account.terms_of_service_agreed;
        let payload =
            UpdateAccountPayload::new(contacts, terms_changed.then_some(true)).to_value()?;
        let resource: AccountResource = self
            .client
            .post(self.account_url()?, &payload, self.request_key()?, RequestKind::Account)?
            .json()?;

        self.account.contacts = contacts.iter().map(|c| contact_uri(c)).collect();
        if terms_changed {
            self.account.terms_of_service_agreed = true;
        }
        debug!(alias = %self.account.alias, "ACME account updated");
        Ok(resource)
    }

    /// 以 POST-as-GET 取得 CA 端的帳戶資源。
    pub fn fetch_account(&self) -> Result<AccountResource> {
        let response =
            self.client
                .post_as_get(self.account_url()?, self.request_key()?, RequestKind::Account)?;
        Ok(response.json()?)
    }

    /// 輪替帳戶金鑰（RFC 8555 §7.3.5）。
    ///
    /// 新金鑰與以相同 DN 重新產生的帳戶憑證在 CA 接受後才取代舊的；任何失敗都不會改變現有金鑰。
    pub fn change_account_key(&mut self) -> Result<()> {
        let account_url = self.account_url()?.to_string();
        let directory = self.client.directory()?;
        let key_change_url = directory.key_change_url()?;

        let new_key = self.account.key.generate_like()?;
        let new_certificate = AccountCertificate::generate(&new_key, &self.account.dn)?;
        let entry = KeyEntry::new(new_key.clone(), new_certificate.to_pem()?);

        let inner_payload = KeyChangePayload::new(&account_url, self.account.key.jwk()?).to_value()?;
        let inner = self
            .client
            .signer()
            .sign(key_change_url, Some(&inner_payload), &new_key, None, None)?;

        self.client.post(
            key_change_url,
            &inner.to_value()?,
            RequestKey::kid(&self.account.key, &account_url),
            RequestKind::Account,
        )?;

        self.account.key = new_key;
        self.account.certificate = new_certificate;
        if let Err(e) = self.store.store_key(&self.account.alias, &entry) {
            error!(alias = %self.account.alias, error = %e, "CA accepted new account key but it could not be stored");
            return Err(e.into());
        }

        info!(alias = %self.account.alias, "Account key rolled over");
        Ok(())
    }

    /// 停用帳戶。停用後 CA 不再接受此帳戶的任何請求。
    pub fn deactivate_account(&mut self) -> Result<AccountResource> {
        let payload = StatusPayload::deactivated().to_value()?;
        let resource: AccountResource = self
            .client
            .post(self.account_url()?, &payload, self.request_key()?, RequestKind::Account)?
            .json()?;

        if resource.status != AccountStatus::Deactivated {
            warn!(alias = %self.account.alias, status = ?resource.status, "Account not reported as deactivated");
        }
        info!(alias = %self.account.alias, "ACME account deactivated");
        Ok(resource)
    }

    /// 目錄的 `meta` 資訊；目錄只會取得一次。
    pub fn get_metadata(&self) -> Result<Metadata> {
        Ok(self.client.directory()?.meta.clone())
    }

    fn set_account_url(&mut self, url: String) -> Result<()> {
        self.store.store_account_url(&self.account.alias, &url)?;
        self.account.account_url = Some(url);
        Ok(())
    }
}

fn required_location(response: &HttpResponse, url: &str) -> Result<String> {
    response
        .location()
        .map(str::to_string)
        .ok_or_else(|| AcmeError::MissingLocation(url.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        jws::Jws,
        key_pair::KeyAlgorithm,
        problem::ACCOUNT_DOES_NOT_EXIST,
        store::MemCredentialStore,
        transport::{Method, MockTransport, PROBLEM_JSON},
    };
    use serde_json::json;

    const ACCOUNT_URL: &str = "http://ca/acme/acct/384";

    fn transport() -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        transport.on(
            Method::Get,
            "http://ca/directory",
            HttpResponse::new(200).with_json(&json!({
                "newNonce": "http://ca/acme/new-nonce",
                "newAccount": "http://ca/acme/new-acct",
                "newOrder": "http://ca/acme/new-order",
                "keyChange": "http://ca/acme/key-change",
                "meta": {"termsOfService": "http://ca/tos", "caaIdentities": ["ca.example"]}
            })),
        );
        transport.on(
            Method::Head,
            "http://ca/acme/new-nonce",
            HttpResponse::new(200).with_header("Replay-Nonce", "n"),
        );
        transport
    }

    fn manager(transport: Arc<MockTransport>) -> AccountManager {
        let client = Arc::new(AcmeClient::with_transport("http://ca", transport));
        let config = AccountConfig::new("acct")
            .key_algorithm(KeyAlgorithm::Ec)
            .contact("admin@example.com")
            .agree_to_terms_of_service(true);
        AccountManager::new(client, Arc::new(MemCredentialStore::new()), &config).unwrap()
    }

    fn decode(request: &crate::transport::HttpRequest) -> Jws {
        serde_json::from_str(request.body.as_deref().unwrap()).unwrap()
    }

    #[test]
    fn test_create_account() {
        let transport = transport();
        transport.on(
            Method::Post,
            "http://ca/acme/new-acct",
            HttpResponse::new(201)
                .with_header("Location", ACCOUNT_URL)
                .with_header("Link", "<http://ca/tos>;rel=\"terms-of-service\"")
                .with_json(&json!({"status": "valid"})),
        );
        let mut manager = manager(transport.clone());

        assert!(manager.register().unwrap());
        assert_eq!(manager.account().account_url(), Some(ACCOUNT_URL));
        assert_eq!(manager.account().terms_of_service_link(), Some("http://ca/tos"));

        let jws = decode(&transport.requests_to(Method::Post, "http://ca/acme/new-acct")[0]);
        assert!(jws.decode_header().unwrap().jwk.is_some());
        assert_eq!(
            jws.decode_payload().unwrap().unwrap(),
            json!({"contact": ["mailto:admin@example.com"], "termsOfServiceAgreed": true})
        );
    }

    #[test]
    fn test_existing_account_returns_200() {
        let transport = transport();
        transport.on(
            Method::Post,
            "http://ca/acme/new-acct",
            HttpResponse::new(200).with_header("Location", ACCOUNT_URL),
        );
        let mut manager = manager(transport);
        assert!(!manager.create_account(&[], true).unwrap());
        assert_eq!(manager.account().account_url(), Some(ACCOUNT_URL));
    }

    #[test]
    fn test_terms_not_agreed_sends_nothing() {
        let transport = transport();
        let mut manager = manager(transport.clone());
        assert!(matches!(
            manager.create_account(&[], false),
            Err(AcmeError::TermsNotAgreed)
        ));
        assert_eq!(transport.request_count(), 0);
    }

    #[test]
    fn test_find_existing_account_absent() {
        let transport = transport();
        transport.on(
            Method::Post,
            "http://ca/acme/new-acct",
            HttpResponse::new(400)
                .with_header("Content-Type", PROBLEM_JSON)
                .with_body(json!({"type": ACCOUNT_DOES_NOT_EXIST}).to_string()),
        );
        let mut manager = manager(transport);
        assert_eq!(manager.find_existing_account().unwrap(), None);
        assert!(!manager.is_registered());
    }

    #[test]
    fn test_rejected_update_keeps_contacts() {
        let transport = transport();
        transport.on(
            Method::Post,
            "http://ca/acme/new-acct",
            HttpResponse::new(201).with_header("Location", ACCOUNT_URL),
        );
        transport.on(
            Method::Post,
            ACCOUNT_URL,
            HttpResponse::new(400)
                .with_header("Content-Type", PROBLEM_JSON)
                .with_body(json!({"type": "urn:ietf:params:acme:error:invalidContact"}).to_string()),
        );
        let mut manager = manager(transport);
        manager.register().unwrap();

        let err = manager
            .update_account(&["bad@invalid".to_string()], true)
            .unwrap_err();
        assert!(matches!(err, AcmeError::AccountProblem(_)));
        assert_eq!(manager.account().contacts(), ["mailto:admin@example.com"]);
    }

    #[test]
    fn test_key_change_rollback_on_failure() {
        let transport = transport();
        transport.on(
            Method::Post,
            "http://ca/acme/new-acct",
            HttpResponse::new(201).with_header("Location", ACCOUNT_URL),
        );
        transport.on(
            Method::Post,
            "http://ca/acme/key-change",
            HttpResponse::new(409)
                .with_header("Content-Type", PROBLEM_JSON)
                .with_body(json!({"type": "urn:ietf:params:acme:error:malformed"}).to_string()),
        );
        let mut manager = manager(transport);
        manager.register().unwrap();
        let before = manager.account().key().public_key_der().unwrap();

        assert!(manager.change_account_key().is_err());
        assert_eq!(manager.account().key().public_key_der().unwrap(), before);
    }

    #[test]
    fn test_unregistered_operations_fail_locally() {
        let transport = transport();
        let mut manager = manager(transport.clone());
        assert!(matches!(
            manager.change_account_key(),
            Err(AcmeError::AccountNotRegistered)
        ));
        assert!(matches!(
            manager.deactivate_account(),
            Err(AcmeError::AccountNotRegistered)
        ));
        assert!(matches!(
            manager.fetch_account(),
            Err(AcmeError::AccountNotRegistered)
        ));
    }

    #[test]
    fn test_metadata() {
        let transport = transport();
        let manager = manager(transport.clone());
        let meta = manager.get_metadata().unwrap();
        assert_eq!(meta.terms_of_service.as_deref(), Some("http://ca/tos"));
        assert_eq!(meta.caa_identities, Some(vec!["ca.example".to_string()]));
        assert_eq!(meta.website, None);
        assert_eq!(meta.external_account_required, None);
    }
}
