//! 訂單流程：建立訂單、完成授權、送出 CSR、等待簽發並下載憑證鏈。
//!
//! ```text
//! newOrder → pending → (挑戰、輪詢) → ready → finalize → processing → (輪詢) → valid → 下載
//! ```

use std::{fmt, thread};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    account::AccountManager,
    authorization::{Authorization, AuthorizationStatus},
    certificate::CertificateChain,
    challenge::ChallengeResponder,
    client::AcmeClient,
    config::{KeyConfig, PollConfig},
    csr::CSR,
    error::{AcmeError, RequestKind, Result},
    key_pair::KeyPair,
    payload::{ChallengeValidationPayload, FinalizeOrderPayload, Identifier, NewOrderPayload, PayloadT},
    problem::Problem,
    transport::PEM_CERTIFICATE_CHAIN,
};

/// 訂單狀態，目前支援的狀態有 pending、ready、processing、valid 與 invalid。
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// 表示訂單資料。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Order {
    /// 伺服器回傳的訂單 URL，來自 `Location` 標頭
    #[serde(skip)]
    pub order_url: String,
    pub status: OrderStatus,
    /// 過期時間（RFC 3339 格式字串）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    pub identifiers: Vec<Identifier>,
    /// 授權 URL 列表
    #[serde(default)]
    pub authorizations: Vec<String>,
    /// 最終確認 URL
    pub finalize: String,
    /// 憑證 URL（僅在有效時存在）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    /// 訂單失敗時 CA 回報的錯誤
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
}

/// 完成簽發後的結果：憑證金鑰與憑證鏈。
#[derive(Debug, Clone)]
pub struct IssuedCertificate {
    pub order_url: String,
    pub key: KeyPair,
    pub chain: CertificateChain,
}

/// 未附帶錯誤文件的失敗狀態，補上一份描述性的問題文件。
fn status_problem(detail: String) -> Problem {
    Problem {
        type_: "about:blank".to_string(),
        detail: Some(detail),
        ..Default::default()
    }
}

/// 以固定次數與固定間隔輪詢，`check` 回傳 `Some` 時結束。
fn poll<T>(config: &PollConfig, mut check: impl FnMut() -> Result<Option<T>>) -> Result<Option<T>> {
    for attempt in 1..=config.attempts {
        if let Some(done) = check()? {
            return Ok(Some(done));
        }
        if attempt < config.attempts && !config.interval.is_zero() {
            thread::sleep(config.interval);
        }
    }
    Ok(None)
}

/// 以已註冊帳戶推進訂單的各個步驟。
#[derive(Debug)]
pub struct OrderOrchestrator<'a> {
    account: &'a AccountManager,
    responder: &'a dyn ChallengeResponder,
    poll: PollConfig,
}

impl<'a> OrderOrchestrator<'a> {
    pub fn new(
        account: &'a AccountManager,
        responder: &'a dyn ChallengeResponder,
        poll: PollConfig,
    ) -> Self {
        Self {
            account,
            responder,
            poll,
        }
    }

    fn client(&self) -> &AcmeClient {
        self.account.client()
    }

    /// 建立新訂單。識別項清單為空時在本地失敗。
    pub fn create_order<S: AsRef<str>>(&self, domains: &[S]) -> Result<Order> {
        let payload = NewOrderPayload::new(domains).to_value()?;
        let key = self.account.request_key()?;
        let directory = self.client().directory()?;

        let response = self
            .client()
            .post(&directory.new_order, &payload, key, RequestKind::Order)?;
        let order_url = response
            .location()
            .ok_or_else(|| AcmeError::MissingLocation(directory.new_order.clone()))?
            .to_string();

        let mut order: Order = response.json()?;
        order.order_url = order_url;
        info!(url = %order.order_url, status = %order.status, "Order created");
        Ok(order)
    }

    /// 以 POST-as-GET 重新取得訂單。
    pub fn fetch_order(&self, order_url: &str) -> Result<Order> {
        let response = self
            .client()
            .post_as_get(order_url, self.account.request_key()?, RequestKind::Order)?;
        let mut order: Order = response.json()?;
        order.order_url = order_url.to_string();
        Ok(order)
    }

    pub fn fetch_authorization(&self, url: &str) -> Result<Authorization> {
        let response = self.client().post_as_get(
            url,
            self.account.request_key()?,
            RequestKind::Authorization,
        )?;
        Ok(response.json()?)
    }

    /// 逐一完成訂單的授權；已經有效的授權會略過。
    pub fn authorize(&self, order: &Order) -> Result<()> {
        for url in &order.authorizations {
            self.authorize_one(url)?;
        }
        Ok(())
    }

    fn authorize_one(&self, url: &str) -> Result<()> {
        let authz = self.fetch_authorization(url)?;
        let identifier = authz.identifier.value.clone();
        match authz.status {
            AuthorizationStatus::Valid => {
                debug!(identifier = %identifier, "Authorization already valid");
                return Ok(());
            }
            AuthorizationStatus::Pending => {}
            status => {
                return Err(AcmeError::AuthorizationProblem {
                    problem: authz.challenge_error().cloned().unwrap_or_else(|| {
                        status_problem(format!("authorization is {:?}", status))
                    }),
                    identifier,
                })
            }
        }

        let challenge = authz
            .http_challenge()
            .ok_or_else(|| AcmeError::NoHttpChallenge(identifier.clone()))?;
        let key_authorization = self.account.account().key().key_authorization(&challenge.token)?;

        self.responder.deploy(&challenge.token, &key_authorization)?;
        let result = self.respond_and_wait(url, &identifier, &challenge.url, &challenge.token);
        if let Err(e) = self.responder.cleanup(&challenge.token) {
            warn!(token = %challenge.token, error = %e, "Failed to clean up challenge");
        }
        result.map(|_| ())
    }

    fn respond_and_wait(
        &self,
        authz_url: &str,
        identifier: &str,
        challenge_url: &str,
        token: &str,
    ) -> Result<Authorization> {
        if !self.responder.is_deployed(token)? {
            return Err(AcmeError::ChallengeNotDeployed(token.to_string()));
        }

        let payload = ChallengeValidationPayload::new().to_value()?;
        self.client().post(
            challenge_url,
            &payload,
            self.account.request_key()?,
            RequestKind::Authorization,
        )?;
        debug!(identifier = %identifier, "Challenge submitted");

        self.poll_authorization(authz_url)
    }

    /// 輪詢授權直到 `valid`；`invalid` 時回報挑戰錯誤，額度用盡時回傳逾時。
    pub fn poll_authorization(&self, url: &str) -> Result<Authorization> {
        let result = poll(&self.poll, || {
            let authz = self.fetch_authorization(url)?;
            match authz.status {
                AuthorizationStatus::Valid => Ok(Some(authz)),
                AuthorizationStatus::Pending => Ok(None),
                status => Err(AcmeError::AuthorizationProblem {
                    identifier: authz.identifier.value.clone(),
                    problem: authz.challenge_error().cloned().unwrap_or_else(|| {
                        status_problem(format!("authorization is {:?}", status))
                    }),
                }),
            }
        })?;

        result.ok_or_else(|| AcmeError::AuthorizationTimeout {
            url: url.to_string(),
            attempts: self.poll.attempts,
        })
    }

    /// 輪詢訂單直到離開 `pending`。
    pub fn poll_order_ready(&self, order: &Order) -> Result<Order> {
        self.poll_order(order, "ready", |status| status != OrderStatus::Pending)
    }

    /// 輪詢訂單直到 `valid` 並帶有憑證 URL。
    pub fn poll_order_valid(&self, order: &Order) -> Result<Order> {
        self.poll_order(order, "valid", |status| {
            matches!(status, OrderStatus::Valid | OrderStatus::Invalid)
        })
    }

    fn poll_order(
        &self,
        order: &Order,
        expected: &'static str,
        done: impl Fn(OrderStatus) -> bool,
    ) -> Result<Order> {
        let result = poll(&self.poll, || {
            let current = self.fetch_order(&order.order_url)?;
            if current.status == OrderStatus::Invalid {
                return Err(AcmeError::OrderProblem(current.error.clone().unwrap_or_else(
                    || status_problem(format!("order {} is invalid", current.order_url)),
                )));
            }
            Ok(done(current.status).then_some(current))
        })?;

        result.ok_or_else(|| AcmeError::OrderTimeout {
            url: order.order_url.clone(),
            expected,
            attempts: self.poll.attempts,
        })
    }

    /// 送出 DER 編碼的 CSR。訂單必須是 `ready`。
    pub fn finalize(&self, order: &Order, csr_der: &[u8]) -> Result<Order> {
        if order.status != OrderStatus::Ready {
            return Err(AcmeError::OrderNotReady {
                url: order.order_url.clone(),
                status: order.status.to_string(),
            });
        }

        let payload = FinalizeOrderPayload::new(csr_der).to_value()?;
        let response = self.client().post(
            &order.finalize,
            &payload,
            self.account.request_key()?,
            RequestKind::Order,
        )?;
        let mut updated: Order = response.json()?;
        updated.order_url = order.order_url.clone();
        info!(url = %updated.order_url, status = %updated.status, "Order finalized");
        Ok(updated)
    }

    /// 下載憑證鏈。失敗不影響訂單狀態，可單獨重試。
    pub fn download_certificate(&self, order: &Order) -> Result<CertificateChain> {
        let url = match (&order.status, &order.certificate) {
            (OrderStatus::Valid, Some(url)) => url,
            _ => {
                return Err(AcmeError::OrderNotReady {
                    url: order.order_url.clone(),
                    status: order.status.to_string(),
                })
            }
        };

        let response = self.client().post_as_get_accept(
            url,
            self.account.request_key()?,
            RequestKind::Order,
            PEM_CERTIFICATE_CHAIN,
        )?;
        let chain = CertificateChain::from_pem(&response.body)?;
        info!(url = %url, certificates = chain.len(), "Certificate chain downloaded");
        Ok(chain)
    }

    /// 從建立訂單到下載憑證的完整流程。憑證金鑰依 `key` 設定產生，CSR 的 CN 為第一個域名。
    pub fn obtain_certificate<S: AsRef<str>>(
        &self,
        domains: &[S],
        key: KeyConfig,
    ) -> Result<IssuedCertificate> {
        let order = self.create_order(domains)?;
        self.authorize(&order)?;
        let order = self.poll_order_ready(&order)?;

        let certificate_key = KeyPair::generate(key.algorithm, key.size)?;
        let order = if order.status == OrderStatus::Ready {
            let csr = CSR::for_domains(domains).build_der(&certificate_key)?;
            self.finalize(&order, &csr)?
        } else {
            order
        };
        let order = self.poll_order_valid(&order)?;
        let chain = self.download_certificate(&order)?;

        Ok(IssuedCertificate {
            order_url: order.order_url,
            key: certificate_key,
            chain,
        })
    }
}
