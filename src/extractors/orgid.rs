// src/extractors/orgid.rs

// --- Imports ---
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use crate::cninfo::client::{HttpRequest, TOP_SEARCH_URL};
use crate::cninfo::models::TopSearchEntry;
use crate::session::Session;
use crate::stock::{OrganizationId, StockCode};
use crate::utils::error::FetchError;

// --- Patterns (Lazy Static) ---
static URL_ORG_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"orgId=(\d+)").expect("Failed to compile URL_ORG_ID_RE")
});

// Covers `orgId=123`, `"orgId":"123"`, `orgid: 123` and similar assignments in scripts
static SOURCE_ORG_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)orgId["\s:=]+(\d+)"#).expect("Failed to compile SOURCE_ORG_ID_RE")
});

static ALL_ELEMENTS: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("*").expect("Failed to compile ALL_ELEMENTS")
});

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
}

fn to_org_id(raw: String, source: &str) -> Result<OrganizationId, String> {
    OrganizationId::parse(&raw).map_err(|e| format!("{} produced an invalid id: {}", source, e))
}

/// One independent way of deriving an organization id for a stock code.
///
/// Strategies that read the current page expect the session to already be on
/// the search result page for `code`. A failure carries a human-readable reason.
#[async_trait]
pub trait OrgIdStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn attempt(&self, code: &StockCode, session: &mut Session) -> Result<OrganizationId, String>;
}

/// `orgId=<digits>` in the URL the search page ended up on.
pub struct SearchRedirectUrl;

#[async_trait]
impl OrgIdStrategy for SearchRedirectUrl {
    fn name(&self) -> &'static str {
        "search-redirect-url"
    }

    async fn attempt(&self, _code: &StockCode, session: &mut Session) -> Result<OrganizationId, String> {
        let url = session.current_url().ok_or("no page loaded")?;
        let raw = first_capture(&URL_ORG_ID_RE, url).ok_or_else(|| format!("no orgId in URL {}", url))?;
        to_org_id(raw, self.name())
    }
}

/// Scans the parsed DOM for orgId-bearing attributes and text.
pub struct DomPattern;

impl DomPattern {
    /// Attribute names containing `orgid`, attribute values and text containing `orgId=<digits>`.
    pub fn scan(source: &str) -> Option<String> {
        let document = Html::parse_document(source);

        for element in document.select(&ALL_ELEMENTS) {
            for (name, value) in element.value().attrs() {
                let value = value.trim();
                if name.to_ascii_lowercase().contains("orgid")
                    && !value.is_empty()
                    && value.bytes().all(|b| b.is_ascii_digit())
                {
                    tracing::trace!("orgId found in attribute {} of <{}>", name, element.value().name());
                    return Some(value.to_string());
                }
                if let Some(id) = first_capture(&URL_ORG_ID_RE, value) {
                    tracing::trace!("orgId found in {} value of <{}>", name, element.value().name());
                    return Some(id);
                }
            }
        }

        document
            .root_element()
            .text()
            .find_map(|text| first_capture(&URL_ORG_ID_RE, text))
    }
}

#[async_trait]
impl OrgIdStrategy for DomPattern {
    fn name(&self) -> &'static str {
        "dom-pattern"
    }

    async fn attempt(&self, _code: &StockCode, session: &mut Session) -> Result<OrganizationId, String> {
        let source = session.page_source().ok_or("no page loaded")?;
        let raw = Self::scan(source).ok_or("no orgId attribute or text in DOM")?;
        to_org_id(raw, self.name())
    }
}

/// Regular expression over the raw page source, scripts included.
pub struct PageSourceRegex;

#[async_trait]
impl OrgIdStrategy for PageSourceRegex {
    fn name(&self) -> &'static str {
        "page-source-regex"
    }

    async fn attempt(&self, _code: &StockCode, session: &mut Session) -> Result<OrganizationId, String> {
        let source = session.page_source().ok_or("no page loaded")?;
        let raw = first_capture(&SOURCE_ORG_ID_RE, source).ok_or("no orgId pattern in page source")?;
        to_org_id(raw, self.name())
    }
}

/// The portal's structured top-search endpoint.
pub struct TopSearchApi;

#[async_trait]
impl OrgIdStrategy for TopSearchApi {
    fn name(&self) -> &'static str {
        "top-search-api"
    }

    async fn attempt(&self, code: &StockCode, session: &mut Session) -> Result<OrganizationId, String> {
        let form = vec![
            ("keyWord".to_string(), code.to_string()),
            ("maxNum".to_string(), "10".to_string()),
        ];
        let response = session
            .request(HttpRequest::post_form(TOP_SEARCH_URL, form))
            .await
            .map_err(|e| format!("top search request failed: {}", e))?;
        let entries: Vec<TopSearchEntry> = response.json().map_err(|e| e.to_string())?;

        let entry = entries
            .into_iter()
            .find(|entry| entry.code == code.as_str())
            .ok_or_else(|| format!("top search returned no entry for {}", code))?;
        to_org_id(entry.orgId, self.name())
    }
}

/// An organization id together with the strategy that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub org_id: OrganizationId,
    /// 1-based position in the strategy set.
    pub strategy: u8,
    pub strategy_name: &'static str,
}

/// Ordered strategies, tried until the first success.
pub struct StrategySet {
    strategies: Vec<Box<dyn OrgIdStrategy>>,
}

impl Default for StrategySet {
    fn default() -> Self {
        Self::new(vec![
            Box::new(SearchRedirectUrl),
            Box::new(DomPattern),
            Box::new(PageSourceRegex),
            Box::new(TopSearchApi),
        ])
    }
}

impl StrategySet {
    pub fn new(strategies: Vec<Box<dyn OrgIdStrategy>>) -> Self {
        Self { strategies }
    }

    /// Appends a strategy with the lowest priority.
    pub fn push(&mut self, strategy: Box<dyn OrgIdStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub async fn resolve(&self, code: &StockCode, session: &mut Session) -> Result<Resolved, FetchError> {
        let mut reasons = Vec::with_capacity(self.strategies.len());

        for (index, strategy) in self.strategies.iter().enumerate() {
            match strategy.attempt(code, session).await {
                Ok(org_id) => {
                    tracing::info!("Resolved {} -> {} via {} (strategy {})", code, org_id, strategy.name(), index + 1);
                    return Ok(Resolved {
                        org_id,
                        strategy: (index + 1) as u8,
                        strategy_name: strategy.name(),
                    });
                }
                Err(reason) => {
                    tracing::debug!("Strategy {} failed for {}: {}", strategy.name(), code, reason);
                    reasons.push(format!("{}: {}", strategy.name(), reason));
                }
            }
        }

        Err(FetchError::ResolutionExhausted {
            stock_code: code.to_string(),
            reasons,
        })
    }
}
