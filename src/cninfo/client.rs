// src/cninfo/client.rs
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use crate::config::SessionConfig;
use crate::session::identity::IdentitySignature;
use crate::stock::{OrganizationId, StockCode};
use crate::utils::error::{FetchError, TransportError};

pub const BASE_URL: &str = "https://www.cninfo.com.cn";
pub const STATIC_BASE_URL: &str = "https://static.cninfo.com.cn";
pub const TOP_SEARCH_URL: &str = "https://www.cninfo.com.cn/new/information/topSearch/query";
pub const LISTING_URL: &str = "https://www.cninfo.com.cn/new/hisAnnouncement/query";

/// Full-text search page; the portal redirects or links to the company page carrying `orgId`.
pub fn search_url(code: &StockCode) -> String {
    format!("{}/new/fulltextSearch?notautosubmit=&keyWord={}", BASE_URL, code)
}

/// Company disclosure page, research tab. Used as the referer for listing and fetch requests.
pub fn stock_page_url(code: &StockCode, org_id: &OrganizationId) -> String {
    format!("{}/new/disclosure/stock?orgId={}&stockCode={}#research", BASE_URL, org_id, code)
}

pub fn document_url(adjunct_url: &str) -> String {
    format!("{}/{}", STATIC_BASE_URL, adjunct_url.trim_start_matches('/'))
}

/// A single request issued through a transport.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub form: Vec<(String, String)>,
    pub referer: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self { method: Method::GET, url: url.into(), form: Vec::new(), referer: None }
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>) -> Self {
        Self { method: Method::POST, url: url.into(), form, referer: None }
    }

    pub fn with_referer(mut self, referer: impl Into<String>) -> Self {
        self.referer = Some(referer.into());
        self
    }

    /// Value of a form field, if present.
    pub fn form_value(&self, key: &str) -> Option<&str> {
        self.form.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| FetchError::Parse(format!("{} ({} bytes from {})", e, self.body.len(), self.final_url)))
    }

    /// A challenge or error page served where a binary document was expected.
    pub fn looks_like_html(&self) -> bool {
        let declared = self
            .content_type
            .as_deref()
            .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
            .unwrap_or(false);
        let head: String = String::from_utf8_lossy(&self.body[..self.body.len().min(256)])
            .trim_start()
            .to_ascii_lowercase();
        declared || head.starts_with("<!doctype html") || head.starts_with("<html")
    }
}

/// Maps a non-success status onto the transport error taxonomy.
pub fn check_status(status: StatusCode, url: &str) -> Result<(), TransportError> {
    if status.is_success() {
        return Ok(());
    }
    tracing::warn!("HTTP error status: {} for URL: {}", status, url);
    match status {
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            Err(TransportError::Blocked(format!("{} from {}", status, url)))
        }
        StatusCode::NOT_FOUND => Err(TransportError::NotFound(url.to_string())),
        _ => Err(TransportError::Http(status)),
    }
}

/// The automation capability a session drives: page navigation plus raw requests.
#[async_trait]
pub trait Transport: Send {
    /// Loads a page, following redirects. The final URL and source become the current page.
    async fn navigate(&mut self, url: &str) -> Result<(), TransportError>;

    fn current_url(&self) -> Option<&str>;

    fn page_source(&self) -> Option<&str>;

    async fn request(&mut self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Advisory scroll / pointer movement. Transports without a rendered page ignore it.
    async fn simulate_activity(&mut self, _scroll_px: u32, _pointer: (i32, i32)) {}

    async fn close(&mut self) {}
}

/// Opens a fresh transport presenting the given identity.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn open(
        &self,
        identity: IdentitySignature,
        config: &SessionConfig,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

/// reqwest-backed transport: one client (and cookie jar) per session.
pub struct HttpTransport {
    client: reqwest::Client,
    current_url: Option<String>,
    page_source: Option<String>,
    closed: bool,
}

impl HttpTransport {
    pub fn new(identity: IdentitySignature, config: &SessionConfig) -> Result<Self, TransportError> {
        let (width, height) = identity.viewport();
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("zh-CN,zh;q=0.9,en;q=0.8"));
        headers.insert("Viewport-Width", HeaderValue::from(width));
        headers.insert("Sec-CH-Viewport-Height", HeaderValue::from(height));

        let client = reqwest::Client::builder()
            .user_agent(identity.user_agent())
            .default_headers(headers)
            .cookie_store(true)
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self { client, current_url: None, page_source: None, closed: false })
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn navigate(&mut self, url: &str) -> Result<(), TransportError> {
        self.ensure_open()?;
        tracing::debug!("Navigating to {}", url);

        let response = self.client.get(url)
            .header(header::ACCEPT, "text/html,application/xhtml+xml,*/*;q=0.8")
            .send()
            .await?;
        let final_url = response.url().to_string();
        check_status(response.status(), url)?;

        let body = response.text().await?;
        if body.trim().is_empty() {
            return Err(TransportError::EmptyResponse(url.to_string()));
        }
        tracing::debug!("Loaded {} bytes from {}", body.len(), final_url);

        self.current_url = Some(final_url);
        self.page_source = Some(body);
        Ok(())
    }

    fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    fn page_source(&self) -> Option<&str> {
        self.page_source.as_deref()
    }

    async fn request(&mut self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.ensure_open()?;

        let mut builder = self.client.request(request.method.clone(), &request.url)
            .header(header::ACCEPT, "application/json,application/pdf,*/*;q=0.8");
        if let Some(referer) = &request.referer {
            builder = builder.header(header::REFERER, referer);
        }
        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }

        let response = builder.send().await?;
        let status = response.status();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        check_status(status, &request.url)?;

        let body = response.bytes().await?.to_vec();
        tracing::debug!("Received {} bytes from {}", body.len(), final_url);
        Ok(HttpResponse { status, final_url, content_type, body })
    }

    async fn close(&mut self) {
        self.closed = true;
        self.current_url = None;
        self.page_source = None;
    }
}

/// Factory used by both executables.
pub struct HttpTransportFactory;

#[async_trait]
impl TransportFactory for HttpTransportFactory {
    async fn open(
        &self,
        identity: IdentitySignature,
        config: &SessionConfig,
    ) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(HttpTransport::new(identity, config)?))
    }
}
