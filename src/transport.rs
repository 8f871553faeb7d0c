//! HTTP 傳輸層。
//!
//! 引擎所有對 CA 的請求都經過 [`Transport`] 特徵，正式環境使用以 `reqwest`
//! 阻塞客戶端實作的 [`ReqwestTransport`]。測試則可注入 `MockTransport` 預先編排回應，
//! 它只在本庫自身的測試或啟用 `testing` 功能時編譯。

use std::{fmt, time::Duration};

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::trace;

/// 簽名請求所使用的內容類型。
pub const JOSE_JSON: &str = "application/jose+json";
/// 憑證鏈下載的內容類型。
pub const PEM_CERTIFICATE_CHAIN: &str = "application/pem-certificate-chain";
/// CA 錯誤文件的內容類型。
pub const PROBLEM_JSON: &str = "application/problem+json";

pub const REPLAY_NONCE: &str = "Replay-Nonce";
pub const LOCATION: &str = "Location";
pub const LINK: &str = "Link";

const DEFAULT_USER_AGENT: &str = concat!("acme-engine/", env!("CARGO_PKG_VERSION"));
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// 傳輸過程中可能發生的錯誤。
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Lock poisoned")]
    LockPoisoned,
}

type Result<T> = std::result::Result<T, TransportError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次待送出的 HTTP 請求。
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub content_type: Option<&'static str>,
    pub accept: Option<&'static str>,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            content_type: None,
            accept: None,
            body: None,
        }
    }

    pub fn head(url: impl Into<String>) -> Self {
        Self {
            method: Method::Head,
            ..Self::get(url)
        }
    }

    /// 以 `application/jose+json` 送出 JWS 內容的 POST 請求。
    pub fn post_jose(url: impl Into<String>, body: String) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            content_type: Some(JOSE_JSON),
            accept: None,
            body: Some(body),
        }
    }

    pub fn accept(mut self, accept: &'static str) -> Self {
        self.accept = Some(accept);
        self
    }
}

/// CA 回傳的 HTTP 回應，標頭名稱一律以小寫儲存。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// 以 JSON 內容建立回應，並設定對應的內容類型。
    pub fn with_json(self, value: &serde_json::Value) -> Self {
        self.with_header("Content-Type", "application/json")
            .with_body(value.to_string())
    }

    /// 取得指定標頭的第一個值（名稱大小寫不敏感）。
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers_all(name).next()
    }

    /// 取得指定標頭的所有值。
    pub fn headers_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .filter(move |(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn replay_nonce(&self) -> Option<&str> {
        self.header(REPLAY_NONCE)
    }

    pub fn location(&self) -> Option<&str> {
        self.header(LOCATION)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// 從 `Link` 標頭中找出指定 `rel` 的目標 URL。
    pub fn link(&self, rel: &str) -> Option<String> {
        self.headers_all(LINK)
            .flat_map(|value| value.split(','))
            .find_map(|entry| parse_link(entry, rel))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: DeserializeOwned>(&self) -> std::result::Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// 解析單一 link 項目，例如 `<https://ca/tos>;rel="terms-of-service"`。
fn parse_link(entry: &str, rel: &str) -> Option<String> {
    let entry = entry.trim();
    let start = entry.find('<')?;
    let end = entry[start..].find('>')? + start;
    let target = &entry[start + 1..end];

    let matches = entry[end + 1..].split(';').any(|param| {
        let mut parts = param.trim().splitn(2, '=');
        let key = parts.next().unwrap_or_default().trim();
        let value = parts.next().unwrap_or_default().trim().trim_matches('"');
        key.eq_ignore_ascii_case("rel") && value.split_whitespace().any(|r| r == rel)
    });

    matches.then(|| target.to_string())
}

/// 發送 HTTP 請求的抽象。
pub trait Transport: Send + Sync + fmt::Debug {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse>;
}

/// 以 `reqwest` 阻塞客戶端實作的傳輸層。
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// 使用預設的 User-Agent 與逾時設定建立傳輸層。
    pub fn new() -> Result<Self> {
        Self::with_options(DEFAULT_USER_AGENT, DEFAULT_TIMEOUT)
    }

    pub fn with_options(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for ReqwestTransport {
    fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Head => self.client.head(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        if let Some(content_type) = request.content_type {
            builder = builder.header("Content-Type", content_type);
        }
        if let Some(accept) = request.accept {
            builder = builder.header("Accept", accept);
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send()?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response.bytes()?.to_vec();

        trace!(method = %request.method, url = %request.url, status, "ACME round trip");

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(any(test, feature = "testing"))]
pub use mock::MockTransport;

#[cfg(any(test, feature = "testing"))]
mod mock {
    use std::{
        collections::{HashMap, VecDeque},
        sync::Mutex,
    };

    use super::{HttpRequest, HttpResponse, Method, Result, Transport, TransportError};

    #[derive(Debug, Clone)]
    enum MockReply {
        Response(HttpResponse),
        Failure(String),
    }

    /// 預先編排回應的傳輸層，通常用於測試環境。
    ///
    /// 每個 (方法, URL) 維護一個回應佇列，依序取出；佇列只剩最後一筆時會重複回傳該筆，
    /// 方便模擬輪詢。所有收到的請求都會被記錄下來。
    #[derive(Debug, Default)]
    pub struct MockTransport {
        routes: Mutex<HashMap<(Method, String), VecDeque<MockReply>>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// 為指定的方法與 URL 追加一筆回應。
        pub fn on(&self, method: Method, url: &str, response: HttpResponse) -> &Self {
            self.push(method, url, MockReply::Response(response))
        }

        /// 為指定的方法與 URL 追加一次傳輸失敗。
        pub fn fail(&self, method: Method, url: &str, message: &str) -> &Self {
            self.push(method, url, MockReply::Failure(message.to_string()))
        }

        fn push(&self, method: Method, url: &str, reply: MockReply) -> &Self {
            if let Ok(mut routes) = self.routes.lock() {
                routes
                    .entry((method, url.to_string()))
                    .or_default()
                    .push_back(reply);
            }
            self
        }

        /// 返回目前為止收到的所有請求。
        pub fn requests(&self) -> Vec<HttpRequest> {
            self.requests
                .lock()
                .map(|requests| requests.clone())
                .unwrap_or_default()
        }

        pub fn requests_to(&self, method: Method, url: &str) -> Vec<HttpRequest> {
            self.requests()
                .into_iter()
                .filter(|request| request.method == method && request.url == url)
                .collect()
        }

        pub fn request_count(&self) -> usize {
            self.requests().len()
        }
    }

    impl Transport for MockTransport {
        fn execute(&self, request: &HttpRequest) -> Result<HttpResponse> {
            self.requests
                .lock()
                .map_err(|_| TransportError::LockPoisoned)?
                .push(request.clone());

            let mut routes = self.routes.lock().map_err(|_| TransportError::LockPoisoned)?;
            let queue = routes
                .get_mut(&(request.method, request.url.clone()))
                .ok_or_else(|| {
                    TransportError::Connection(format!(
                        "no scripted response for {} {}",
                        request.method, request.url
                    ))
                })?;

            let reply = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };

            match reply {
                Some(MockReply::Response(response)) => Ok(response),
                Some(MockReply::Failure(message)) => Err(TransportError::Connection(message)),
                None => Err(TransportError::Connection(format!(
                    "no scripted response for {} {}",
                    request.method, request.url
                ))),
            }
        }
    }
}
