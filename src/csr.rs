use std::result;

use openssl::{
    hash::MessageDigest,
    stack::Stack,
    x509::{extension::SubjectAlternativeName, X509NameBuilder, X509Req},
};
use thiserror::Error;

use crate::key_pair::KeyPair;

/// 用於描述建立 CSR（證書簽名請求）過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum CsrError {
    #[error("Openssl error: {0}")]
    OpensslError(#[from] openssl::error::ErrorStack),
    #[error("No SAN entries")]
    NoSanEntries,
}

type Result<T> = result::Result<T, CsrError>;

/// CSR 建構器：主體 CN 為第一個域名，所有域名都放進主體替代名稱 (SAN) 擴展。
///
/// # 範例
///
/// ```
/// # use acme_engine::{csr::CSR, key_pair::{KeyAlgorithm, KeyPair}};
/// let key_pair = KeyPair::generate(KeyAlgorithm::Ec, None).unwrap();
/// let der = CSR::new()
///     .set_san("example.com")
///     .set_san("www.example.com")
///     .build_der(&key_pair)
///     .unwrap();
/// assert!(!der.is_empty());
/// ```
#[derive(Debug, Default, Clone)]
pub struct CSR {
    san_entries: Vec<String>,
}

impl CSR {
    pub fn new() -> Self {
        Self::default()
    }

    /// 由一組域名建立，順序即為 SAN 順序。
    pub fn for_domains<S: AsRef<str>>(domains: &[S]) -> Self {
        domains
            .iter()
            .fold(Self::new(), |csr, domain| csr.set_san(domain.as_ref()))
    }

    /// 新增一個 DNS 主體替代名稱 (SAN) 到 CSR 中。
    pub fn set_san(mut self, dns_name: &str) -> Self {
        self.san_entries.push(dns_name.to_string());
        self
    }

    /// 以指定的金鑰對簽署並產生 CSR。
    ///
    /// 未設定任何 SAN 時回傳 [`CsrError::NoSanEntries`]。
    pub fn build(self, key_pair: &KeyPair) -> Result<X509Req> {
        let common_name = self.san_entries.first().ok_or(CsrError::NoSanEntries)?;

        let mut req_builder = X509Req::builder()?;

        let mut name = X509NameBuilder::new()?;
        name.append_entry_by_text("CN", common_name)?;
        req_builder.set_subject_name(&name.build())?;

        let mut san_builder = SubjectAlternativeName::new();
        for entry in &self.san_entries {
            san_builder.dns(entry);
        }
        let san_extension = san_builder.build(&req_builder.x509v3_context(None))?;

        let mut stack = Stack::new()?;
        stack.push(san_extension)?;
        req_builder.add_extensions(&stack)?;

        req_builder.set_pubkey(key_pair.private_key())?;
        req_builder.sign(key_pair.private_key(), MessageDigest::sha256())?;

        Ok(req_builder.build())
    }

    /// 產生 DER 編碼的 CSR，即 finalize 請求所需的格式。
    pub fn build_der(self, key_pair: &KeyPair) -> Result<Vec<u8>> {
        Ok(self.build(key_pair)?.to_der()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key_pair::KeyAlgorithm;
    use openssl::nid::Nid;

    #[test]
    fn test_subject_is_first_domain() {
        let key = KeyPair::generate(KeyAlgorithm::Ec, None).unwrap();
        let req = CSR::for_domains(&["example.com", "www.example.com"])
            .build(&key)
            .unwrap();

        let cn = req
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string();
        assert_eq!(cn, "example.com");
        assert!(req.verify(key.private_key()).unwrap());
    }

    #[test]
    fn test_san_lists_all_domains() {
        let key = KeyPair::generate(KeyAlgorithm::Rsa, Some(2048)).unwrap();
        let req = CSR::for_domains(&["a.example", "b.example"]).build(&key).unwrap();

        assert_eq!(req.extensions().unwrap().len(), 1);
        let der = req.to_der().unwrap();
        assert!(der.windows(9).any(|w| w == b"a.example"));
        assert!(der.windows(9).any(|w| w == b"b.example"));
    }

    #[test]
    fn test_requires_a_domain() {
        let key = KeyPair::generate(KeyAlgorithm::Ec, None).unwrap();
        assert!(matches!(CSR::new().build(&key), Err(CsrError::NoSanEntries)));
    }
}
