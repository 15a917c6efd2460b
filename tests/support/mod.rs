// tests/support/mod.rs
//
// Scripted stand-in for the cninfo portal. Every transport opened by
// `FakePortal` shares one `PortalLog`, so tests can count sessions,
// navigations and requests across rotations.
//
#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use cninfo_fetcher::cninfo::client::{LISTING_URL, STATIC_BASE_URL, TOP_SEARCH_URL};
use cninfo_fetcher::cninfo::{HttpRequest, HttpResponse, Transport, TransportFactory};
use cninfo_fetcher::config::{DelayWindow, FetcherConfig, RetryPolicy, SessionConfig};
use cninfo_fetcher::extractors::StrategySet;
use cninfo_fetcher::orchestrator::Orchestrator;
use cninfo_fetcher::resolver::IdentifierCache;
use cninfo_fetcher::retry::RetryController;
use cninfo_fetcher::session::identity::IdentitySignature;
use cninfo_fetcher::session::SessionManager;
use cninfo_fetcher::storage::{MappingStore, StorageManager};
use cninfo_fetcher::utils::TransportError;

pub const ORG_ID: &str = "9900008267";

#[derive(Debug, Default)]
pub struct PortalLog {
    pub identities: Vec<IdentitySignature>,
    pub closed: usize,
    pub navigations: usize,
    pub top_search_calls: usize,
    pub listing_pages: Vec<u32>,
    pub fetches: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SearchPage {
    /// Redirects to the company page with `orgId` in the URL.
    Redirect,
    /// Plain result page listing the company with a `data-orgid` attribute.
    DomAttribute,
    /// `orgId` only appears in an inline script.
    ScriptOnly,
    /// Nothing useful on the page.
    Empty,
    /// Every navigation is answered with a block.
    Blocked,
}

#[derive(Debug, Clone)]
pub struct Script {
    pub search: SearchPage,
    /// JSON array answered by the top-search endpoint.
    pub top_search: String,
    /// JSON bodies of listing pages 1.., anything beyond is an empty page.
    pub listing: Vec<String>,
    pub document: Vec<u8>,
    /// Number of document fetches that are answered with an HTML challenge first.
    pub challenge_fetches: usize,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            search: SearchPage::Redirect,
            top_search: "[]".to_string(),
            listing: Vec::new(),
            document: b"%PDF-1.7 fake".to_vec(),
            challenge_fetches: 0,
        }
    }
}

#[derive(Clone)]
pub struct FakePortal {
    pub script: Arc<Mutex<Script>>,
    pub log: Arc<Mutex<PortalLog>>,
}

impl FakePortal {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script: Arc::new(Mutex::new(script)),
            log: Arc::new(Mutex::new(PortalLog::default())),
        })
    }

    pub fn sessions_opened(&self) -> usize {
        self.log.lock().unwrap().identities.len()
    }

    pub fn navigations(&self) -> usize {
        self.log.lock().unwrap().navigations
    }

    pub fn listing_pages(&self) -> Vec<u32> {
        self.log.lock().unwrap().listing_pages.clone()
    }

    pub fn fetches(&self) -> usize {
        self.log.lock().unwrap().fetches.len()
    }

    pub fn network_calls(&self) -> usize {
        let log = self.log.lock().unwrap();
        log.navigations + log.top_search_calls + log.listing_pages.len() + log.fetches.len()
    }
}

#[async_trait]
impl TransportFactory for FakePortal {
    async fn open(
        &self,
        identity: IdentitySignature,
        _config: &SessionConfig,
    ) -> Result<Box<dyn Transport>, TransportError> {
        self.log.lock().unwrap().identities.push(identity);
        Ok(Box::new(FakeTransport {
            script: self.script.clone(),
            log: self.log.clone(),
            current_url: None,
            page_source: None,
        }))
    }
}

struct FakeTransport {
    script: Arc<Mutex<Script>>,
    log: Arc<Mutex<PortalLog>>,
    current_url: Option<String>,
    page_source: Option<String>,
}

fn ok(url: &str, content_type: &str, body: Vec<u8>) -> HttpResponse {
    HttpResponse {
        status: reqwest::StatusCode::OK,
        final_url: url.to_string(),
        content_type: Some(content_type.to_string()),
        body,
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn navigate(&mut self, url: &str) -> Result<(), TransportError> {
        self.log.lock().unwrap().navigations += 1;
        let search = self.script.lock().unwrap().search;
        let (final_url, source) = match search {
            SearchPage::Redirect => (
                format!("https://www.cninfo.com.cn/new/disclosure/stock?orgId={}&stockCode=300010", ORG_ID),
                "<html><body><h1>豆神教育</h1></body></html>".to_string(),
            ),
            SearchPage::DomAttribute => (
                url.to_string(),
                format!(r#"<html><body><ul><li data-orgid="{}">300010 豆神教育</li></ul></body></html>"#, ORG_ID),
            ),
            SearchPage::ScriptOnly => (
                url.to_string(),
                format!(r#"<html><body><script>var stockInfo = {{orgId: "{}"}};</script></body></html>"#, ORG_ID),
            ),
            SearchPage::Empty => (url.to_string(), "<html><body>没有找到相关结果</body></html>".to_string()),
            SearchPage::Blocked => return Err(TransportError::Blocked(format!("403 Forbidden from {}", url))),
        };
        self.current_url = Some(final_url);
        self.page_source = Some(source);
        Ok(())
    }

    fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    fn page_source(&self) -> Option<&str> {
        self.page_source.as_deref()
    }

    async fn request(&mut self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut script = self.script.lock().unwrap();
        let mut log = self.log.lock().unwrap();

        if request.url == TOP_SEARCH_URL {
            log.top_search_calls += 1;
            return Ok(ok(&request.url, "application/json", script.top_search.clone().into_bytes()));
        }
        if request.url == LISTING_URL {
            let page: u32 = request
                .form_value("pageNum")
                .and_then(|p| p.parse().ok())
                .unwrap_or(1);
            log.listing_pages.push(page);
            let body = script
                .listing
                .get(page as usize - 1)
                .cloned()
                .unwrap_or_else(|| r#"{"announcements":null,"totalAnnouncement":0,"hasMore":false}"#.to_string());
            return Ok(ok(&request.url, "application/json", body.into_bytes()));
        }
        if request.url.starts_with(STATIC_BASE_URL) {
            log.fetches.push(request.url.clone());
            if script.challenge_fetches > 0 {
                script.challenge_fetches -= 1;
                return Ok(ok(&request.url, "text/html", b"<html>verify you are human</html>".to_vec()));
            }
            return Ok(ok(&request.url, "application/pdf", script.document.clone()));
        }
        Err(TransportError::NotFound(request.url))
    }

    async fn close(&mut self) {
        self.log.lock().unwrap().closed += 1;
    }
}

/// Listing page body with one announcement per `(id, title, yyyy-mm-dd)`.
pub fn listing_page(entries: &[(&str, &str, &str)], has_more: bool) -> String {
    let announcements: Vec<serde_json::Value> = entries
        .iter()
        .map(|(id, title, date)| {
            let millis = chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d")
                .unwrap()
                .and_hms_opt(2, 0, 0)
                .unwrap()
                .and_utc()
                .timestamp_millis();
            serde_json::json!({
                "announcementId": id,
                "announcementTitle": title,
                "announcementTime": millis,
                "adjunctUrl": format!("finalpage/{}/{}.PDF", date, id),
                "secCode": "300010",
                "secName": "豆神教育"
            })
        })
        .collect();
    serde_json::json!({
        "announcements": announcements,
        "totalAnnouncement": entries.len(),
        "hasMore": has_more
    })
    .to_string()
}

/// Defaults with every delay removed.
pub fn quiet_config() -> FetcherConfig {
    FetcherConfig {
        session: SessionConfig {
            pacing: DelayWindow::ZERO,
            restart_pause: DelayWindow::ZERO,
            request_timeout_secs: 5,
            ..SessionConfig::default()
        },
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
        },
    }
}

pub fn mapping_path(root: &Path) -> std::path::PathBuf {
    root.join("stock_orgid_mapping.json")
}

/// A mapping path whose parent directory is a regular file, so every flush fails.
pub fn unwritable_mapping_path(root: &Path) -> std::path::PathBuf {
    let blocker = root.join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    blocker.join("stock_orgid_mapping.json")
}

/// Orchestrator over the fake portal with mapping and downloads under `root`.
pub fn orchestrator(portal: &Arc<FakePortal>, root: &Path, config: FetcherConfig) -> Orchestrator {
    orchestrator_with_mapping(portal, root, &mapping_path(root), config)
}

pub fn orchestrator_with_mapping(
    portal: &Arc<FakePortal>,
    root: &Path,
    mapping: &Path,
    config: FetcherConfig,
) -> Orchestrator {
    let cache = IdentifierCache::new(MappingStore::load(mapping), StrategySet::default());
    Orchestrator::new(
        cache,
        SessionManager::with_seed(portal.clone(), config.session, 7),
        RetryController::new(config.retry, CancellationToken::new()),
        StorageManager::new(root.join("downloads")).unwrap(),
    )
}
