//! 憑證撤銷。
//!
//! 撤銷請求可以用帳戶金鑰（`kid`）簽署，也可以用憑證本身的金鑰（`jwk`）簽署，
//! 後者讓遺失帳戶的持有者仍能撤銷自己的憑證。

use std::fmt;

use tracing::info;

use crate::{
    account::AccountManager,
    certificate::certificate_der,
    client::{AcmeClient, RequestKey},
    error::{AcmeError, RequestKind, Result},
    key_pair::KeyPair,
    payload::{PayloadT, RevocationPayload},
};

/// RFC 5280 定義的撤銷原因碼。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    pub fn code(self) -> u8 {
        match self {
            Self::Unspecified => 0,
            Self::KeyCompromise => 1,
            Self::CaCompromise => 2,
            Self::AffiliationChanged => 3,
            Self::Superseded => 4,
            Self::CessationOfOperation => 5,
            Self::CertificateHold => 6,
            // 7 未使用
            Self::RemoveFromCrl => 8,
            Self::PrivilegeWithdrawn => 9,
            Self::AaCompromise => 10,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        let reason = match code {
            0 => Self::Unspecified,
            1 => Self::KeyCompromise,
            2 => Self::CaCompromise,
            3 => Self::AffiliationChanged,
            4 => Self::Superseded,
            5 => Self::CessationOfOperation,
            6 => Self::CertificateHold,
            8 => Self::RemoveFromCrl,
            9 => Self::PrivilegeWithdrawn,
            10 => Self::AaCompromise,
            _ => return None,
        };
        Some(reason)
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unspecified => "unspecified",
            Self::KeyCompromise => "keyCompromise",
            Self::CaCompromise => "cACompromise",
            Self::AffiliationChanged => "affiliationChanged",
            Self::Superseded => "superseded",
            Self::CessationOfOperation => "cessationOfOperation",
            Self::CertificateHold => "certificateHold",
            Self::RemoveFromCrl => "removeFromCRL",
            Self::PrivilegeWithdrawn => "privilegeWithdrawn",
            Self::AaCompromise => "aACompromise",
        };
        f.write_str(s)
    }
}

/// 送出撤銷請求。
#[derive(Debug)]
pub struct CertificateRevoker<'a> {
    client: &'a AcmeClient,
    account: Option<&'a AccountManager>,
}

impl<'a> CertificateRevoker<'a> {
    /// 不綁定帳戶，只能以憑證金鑰撤銷。
    pub fn new(client: &'a AcmeClient) -> Self {
        Self {
            client,
            account: None,
        }
    }

    /// 綁定帳戶，並使用帳戶所屬的客戶端。
    pub fn with_account(account: &'a AccountManager) -> Self {
        Self {
            client: account.client(),
            account: Some(account),
        }
    }

    /// 以帳戶金鑰撤銷憑證。`certificate` 可為 PEM 或 DER。
    pub fn revoke(&self, certificate: &[u8], reason: Option<RevocationReason>) -> Result<()> {
        let account = self.account.ok_or(AcmeError::AccountNotRegistered)?;
        self.send(certificate, reason, account.request_key()?)
    }

    /// 以憑證本身的金鑰撤銷，保護頭部內嵌 `jwk`。
    pub fn revoke_with_certificate_key(
        &self,
        certificate: &[u8],
        certificate_key: &KeyPair,
        reason: Option<RevocationReason>,
    ) -> Result<()> {
        self.send(certificate, reason, RequestKey::jwk(certificate_key))
    }

    /// 帳戶已註冊時使用帳戶金鑰，否則退回憑證金鑰。
    pub fn revoke_with_fallback(
        &self,
        certificate: &[u8],
        certificate_key: &KeyPair,
        reason: Option<RevocationReason>,
    ) -> Result<()> {
        match self.account {
            Some(account) if account.is_registered() => {
                self.send(certificate, reason, account.request_key()?)
            }
            _ => self.revoke_with_certificate_key(certificate, certificate_key, reason),
        }
    }

    fn send(
        &self,
        certificate: &[u8],
        reason: Option<RevocationReason>,
        key: RequestKey<'_>,
    ) -> Result<()> {
        let der = certificate_der(certificate)?;
        let payload = RevocationPayload::new(&der, reason.map(RevocationReason::code)).to_value()?;
        let directory = self.client.directory()?;
        let url = directory.revoke_cert_url()?;

        self.client.post(url, &payload, key, RequestKind::Revocation)?;
        info!(
            reason = %reason.unwrap_or(RevocationReason::Unspecified),
            by_account = key.key_id.is_some(),
            "Certificate revoked"
        );
        Ok(())
    }
}
