use chrono::{DateTime, Duration, Utc};
use openssl::{
    asn1::{Asn1Integer, Asn1Time, Asn1TimeRef},
    bn::{BigNum, MsbOption},
    hash::MessageDigest,
    nid::Nid,
    x509::{X509Name, X509NameBuilder, X509NameRef, X509},
};
use thiserror::Error;

use crate::key_pair::{KeyError, KeyPair};

/// 證書相關操作可能出現的錯誤類型
#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("Failed to parse certificate: {0}")]
    ParseError(#[from] openssl::error::ErrorStack),
    #[error("Certificate chain is empty")]
    EmptyChain,
    #[error("Invalid distinguished name: {0}")]
    InvalidDn(String),
    #[error("Invalid expiration timestamp")]
    InvalidTimestamp,
    #[error("Key error: {0}")]
    Key(#[from] KeyError),
}

type Result<T> = std::result::Result<T, CertificateError>;

/// 帳戶憑證的有效天數。
const ACCOUNT_CERTIFICATE_DAYS: u32 = 3650;

/// CA 簽發的憑證鏈，葉憑證在前。
#[derive(Debug, Clone)]
pub struct CertificateChain {
    certs: Vec<X509>,
}

impl CertificateChain {
    /// 解析 `application/pem-certificate-chain` 內容，順序與 CA 回傳的相同。
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        let certs = X509::stack_from_pem(pem)?;
        if certs.is_empty() {
            return Err(CertificateError::EmptyChain);
        }
        Ok(Self { certs })
    }

    pub fn leaf(&self) -> &X509 {
        &self.certs[0]
    }

    pub fn certificates(&self) -> &[X509] {
        &self.certs
    }

    pub fn len(&self) -> usize {
        self.certs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certs.is_empty()
    }

    /// 葉憑證主體的 CN。
    pub fn subject_common_name(&self) -> Option<String> {
        common_name(self.leaf().subject_name())
    }

    /// 葉憑證涵蓋的 DNS 名稱。
    pub fn dns_names(&self) -> Vec<String> {
        self.leaf()
            .subject_alt_names()
            .map(|names| {
                names
                    .iter()
                    .filter_map(|name| name.dnsname().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn leaf_der(&self) -> Result<Vec<u8>> {
        Ok(self.leaf().to_der()?)
    }

    pub fn to_pem(&self) -> Result<Vec<u8>> {
        let mut pem = Vec::new();
        for cert in &self.certs {
            pem.extend(cert.to_pem()?);
        }
        Ok(pem)
    }

    /// 葉憑證的到期時間。
    pub fn expires_at(&self) -> Result<DateTime<Utc>> {
        asn1_to_datetime(self.leaf().not_after())
    }

    /// 判斷證書是否應該進行續約：剩餘有效時間不足 `threshold_days` 天（或已過期）時為 `true`。
    pub fn should_renew(&self, threshold_days: u32) -> Result<bool> {
        let remaining = self.expires_at()? - Utc::now();
        Ok(remaining < Duration::days(i64::from(threshold_days)))
    }
}

fn asn1_to_datetime(time: &Asn1TimeRef) -> Result<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0)?;
    let diff = epoch.diff(time)?;
    let seconds = i64::from(diff.days) * 86400 + i64::from(diff.secs);
    DateTime::from_timestamp(seconds, 0).ok_or(CertificateError::InvalidTimestamp)
}

fn common_name(name: &X509NameRef) -> Option<String> {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|cn| cn.to_string())
}

/// 將 `CN=acct,O=Example` 形式的字串轉換為 X.509 名稱，保留屬性順序。
pub fn parse_dn(dn: &str) -> Result<X509Name> {
    let mut builder = X509NameBuilder::new()?;
    let mut count = 0;
    for part in dn.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (field, value) = part
            .split_once('=')
            .ok_or_else(|| CertificateError::InvalidDn(dn.to_string()))?;
        builder
            .append_entry_by_text(field.trim(), value.trim())
            .map_err(|_| CertificateError::InvalidDn(dn.to_string()))?;
        count += 1;
    }
    if count == 0 {
        return Err(CertificateError::InvalidDn(dn.to_string()));
    }
    Ok(builder.build())
}

/// 將 X.509 名稱轉回 `CN=acct,O=Example` 形式。
pub fn dn_of(name: &X509NameRef) -> Result<String> {
    let mut parts = Vec::new();
    for entry in name.entries() {
        let field = entry.object().nid().short_name()?;
        let value = entry.data().as_utf8()?;
        parts.push(format!("{}={}", field, value));
    }
    Ok(parts.join(","))
}

/// 包覆帳戶公鑰的自簽憑證。
///
/// 金鑰輪替時以相同的 DN 重新產生。
#[derive(Debug, Clone)]
pub struct AccountCertificate {
    cert: X509,
}

impl AccountCertificate {
    /// 以帳戶金鑰自簽一張憑證，主體與簽發者皆為 `dn`。
    pub fn generate(key: &KeyPair, dn: &str) -> Result<Self> {
        let name = parse_dn(dn)?;

        let mut serial = BigNum::new()?;
        serial.rand(127, MsbOption::MAYBE_ZERO, false)?;

        let serial = Asn1Integer::from_bn(&serial)?;
        let not_before = Asn1Time::days_from_now(0)?;
        let not_after = Asn1Time::days_from_now(ACCOUNT_CERTIFICATE_DAYS)?;

        let mut builder = X509::builder()?;
        builder.set_version(2)?;
        builder.set_serial_number(&serial)?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;
        builder.set_pubkey(key.private_key())?;
        builder.set_not_before(&not_before)?;
        builder.set_not_after(&not_after)?;
        builder.sign(key.private_key(), MessageDigest::sha256())?;

        Ok(Self {
            cert: builder.build(),
        })
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        Ok(Self {
            cert: X509::from_pem(pem)?,
        })
    }

    pub fn to_pem(&self) -> Result<Vec<u8>> {
        Ok(self.cert.to_pem()?)
    }

    pub fn x509(&self) -> &X509 {
        &self.cert
    }

    /// 憑證主體的 DN。
    pub fn dn(&self) -> Result<String> {
        dn_of(self.cert.subject_name())
    }

    /// 判斷憑證包覆的是否為此金鑰的公鑰。
    pub fn matches_key(&self, key: &KeyPair) -> Result<bool> {
        Ok(self.cert.public_key()?.public_key_to_der()? == key.public_key_der()?)
    }
}

/// 接受 PEM 或 DER 格式的憑證，回傳 DER 編碼。
pub fn certificate_der(input: &[u8]) -> Result<Vec<u8>> {
    let trimmed = input.trim_ascii_start();
    let cert = if trimmed.starts_with(b"-----BEGIN") {
        X509::from_pem(trimmed)?
    } else {
        X509::from_der(input)?
    };
    Ok(cert.to_der()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_pair::KeyAlgorithm;
    use openssl::x509::extension::SubjectAlternativeName;

    fn issue(domain: &str, days: u32) -> X509 {
        let key = KeyPair::generate(KeyAlgorithm::Ec, None).unwrap();
        let name = parse_dn(&format!("CN={}", domain)).unwrap();
        let mut builder = X509::builder().unwrap();
        builder.set_version(2).unwrap();
        builder.set_subject_name(&name).unwrap();
        builder.set_issuer_name(&name).unwrap();
        builder.set_pubkey(key.private_key()).unwrap();
        builder.set_not_before(&Asn1Time::days_from_now(0).unwrap()).unwrap();
        builder
            .set_not_after(&Asn1Time::days_from_now(days).unwrap())
            .unwrap();
        let san = SubjectAlternativeName::new()
            .dns(domain)
            .build(&builder.x509v3_context(None, None))
            .unwrap();
        builder.append_extension(san).unwrap();
        builder.sign(key.private_key(), MessageDigest::sha256()).unwrap();
        builder.build()
    }

    #[test]
    fn test_chain_order_is_preserved() {
        let mut pem = issue("leaf.example", 90).to_pem().unwrap();
        pem.extend(issue("intermediate.example", 900).to_pem().unwrap());

        let chain = CertificateChain::from_pem(&pem).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.subject_common_name().as_deref(), Some("leaf.example"));
        assert_eq!(chain.dns_names(), vec!["leaf.example".to_string()]);
    }

    #[test]
    fn test_empty_chain() {
        assert!(CertificateChain::from_pem(b"").is_err());
    }

    #[test]
    fn test_renewal_threshold() {
        let pem = issue("soon.example", 10).to_pem().unwrap();
        let chain = CertificateChain::from_pem(&pem).unwrap();
        assert!(chain.should_renew(30).unwrap());
        assert!(!chain.should_renew(5).unwrap());

        let remaining = chain.expires_at().unwrap() - Utc::now();
        assert!(remaining > Duration::days(9) && remaining <= Duration::days(10));
    }

    #[test]
    fn test_account_certificate_keeps_dn() {
        let key = KeyPair::generate(KeyAlgorithm::Ec, None).unwrap();
        let cert = AccountCertificate::generate(&key, "CN=acct, O=Example").unwrap();
        assert_eq!(cert.dn().unwrap(), "CN=acct,O=Example");
        assert!(cert.matches_key(&key).unwrap());

        let other = key.generate_like().unwrap();
        assert!(!cert.matches_key(&other).unwrap());

        let restored = AccountCertificate::from_pem(&cert.to_pem().unwrap()).unwrap();
        assert_eq!(restored.dn().unwrap(), "CN=acct,O=Example");
    }

    #[test]
    fn test_account_certificate_validity() {
        let key = KeyPair::generate(KeyAlgorithm::Rsa, Some(2048)).unwrap();
        let cert = AccountCertificate::generate(&key, "CN=acct").unwrap();

        let not_after = asn1_to_datetime(cert.x509().not_after()).unwrap();
        let remaining = not_after - Utc::now();
        assert!(remaining > Duration::days(3649));
        assert!(remaining <= Duration::days(i64::from(ACCOUNT_CERTIFICATE_DAYS)));
        assert!(cert.x509().verify(key.private_key()).unwrap());
    }

    #[test]
    fn test_invalid_dn() {
        assert!(matches!(parse_dn(""), Err(CertificateError::InvalidDn(_))));
        assert!(matches!(parse_dn("acct"), Err(CertificateError::InvalidDn(_))));
    }

    #[test]
    fn test_certificate_der_accepts_pem_and_der() {
        let cert = issue("x.example", 1);
        let der = cert.to_der().unwrap();
        assert_eq!(certificate_der(&cert.to_pem().unwrap()).unwrap(), der);
        assert_eq!(certificate_der(&der).unwrap(), der);
    }
}
