// src/cninfo/models.rs
#![allow(non_snake_case)]
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use crate::stock::{OrganizationId, StockCode};

/// Rows per listing page requested from the portal.
pub const LISTING_PAGE_SIZE: u32 = 30;

/// Listing tab holding investor-relations activity records.
pub const LISTING_TAB: &str = "relation";

static ILLEGAL_FILENAME_CHARS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"[\\/:*?"<>|]"#).expect("Failed to compile ILLEGAL_FILENAME_CHARS")
});

/// One suggestion returned by the portal's top-search endpoint
/// Example: `[{"code":"300010","orgId":"9900008267","zwjc":"豆神教育", ...}]`
#[derive(Debug, Clone, Deserialize)]
pub struct TopSearchEntry {
    pub code: String,
    pub orgId: String,
    #[serde(default)]
    pub zwjc: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// Response of the announcement listing query.
#[derive(Debug, Deserialize)]
pub struct ListingResponse {
    #[serde(default)]
    pub announcements: Option<Vec<Announcement>>,
    #[serde(default)]
    pub totalAnnouncement: u64,
    #[serde(default)]
    pub hasMore: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Announcement {
    #[serde(default)]
    pub announcementId: Option<String>,
    pub announcementTitle: String,
    /// Milliseconds since the Unix epoch.
    pub announcementTime: i64,
    pub adjunctUrl: String,
    #[serde(default)]
    pub secCode: Option<String>,
    #[serde(default)]
    pub secName: Option<String>,
}

/// A document found by the listing query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub title: String,
    pub publish_date: NaiveDate,
    pub source_url: String,
    pub local_filename: String,
}

impl DocumentRecord {
    pub fn from_announcement(code: &StockCode, announcement: &Announcement) -> Option<Self> {
        let publish_date = publish_date_from_millis(announcement.announcementTime)?;
        let title = strip_highlight_tags(&announcement.announcementTitle);
        let extension = extension_of(&announcement.adjunctUrl);
        Some(Self {
            local_filename: local_filename(code, &title, publish_date, &extension),
            title,
            publish_date,
            source_url: super::client::document_url(&announcement.adjunctUrl),
        })
    }
}

/// Everything a single orchestrator run needs, resolved up front.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    pub stock_code: StockCode,
    pub org_id: OrganizationId,
    pub date_range_start: NaiveDate,
    pub date_range_end: NaiveDate,
    pub max_pages: u32,
    /// `<save-dir>/<StockCode>`
    pub target_directory: PathBuf,
}

impl DownloadTask {
    /// `seDate` form value of the listing query.
    pub fn date_range_param(&self) -> String {
        format!(
            "{}~{}",
            self.date_range_start.format("%Y-%m-%d"),
            self.date_range_end.format("%Y-%m-%d")
        )
    }

    pub fn listing_form(&self, page: u32) -> Vec<(String, String)> {
        [
            ("stock", format!("{},{}", self.stock_code, self.org_id)),
            ("tabName", LISTING_TAB.to_string()),
            ("pageSize", LISTING_PAGE_SIZE.to_string()),
            ("pageNum", page.to_string()),
            ("column", self.stock_code.exchange_column().to_string()),
            ("category", String::new()),
            ("plate", String::new()),
            ("seDate", self.date_range_param()),
            ("searchkey", String::new()),
            ("secid", String::new()),
            ("sortName", String::new()),
            ("sortType", String::new()),
            ("isHLtitle", "true".to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

/// Replaces characters that are illegal in file names on common filesystems.
pub fn clean_filename(name: &str) -> String {
    ILLEGAL_FILENAME_CHARS.replace_all(name.trim(), "_").into_owned()
}

/// Deterministic file name for a document: `<code>_<yyyy-MM-dd>_<title>.<ext>`.
pub fn local_filename(code: &StockCode, title: &str, publish_date: NaiveDate, extension: &str) -> String {
    format!(
        "{}_{}_{}.{}",
        code,
        publish_date.format("%Y-%m-%d"),
        clean_filename(title),
        extension
    )
}

/// Listing timestamps are rendered in China Standard Time.
fn publish_date_from_millis(millis: i64) -> Option<NaiveDate> {
    let cst = FixedOffset::east_opt(8 * 3600)?;
    DateTime::<Utc>::from_timestamp_millis(millis).map(|utc| utc.with_timezone(&cst).date_naive())
}

/// Titles come back with `<em>` search highlighting when `isHLtitle` is set.
fn strip_highlight_tags(title: &str) -> String {
    title.replace("<em>", "").replace("</em>", "").trim().to_string()
}

fn extension_of(adjunct_url: &str) -> String {
    adjunct_url
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| "pdf".to_string())
}
