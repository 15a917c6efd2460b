// src/orchestrator.rs
//! Download orchestration for one stock code.
//!
//! `Orchestrator::run` validates the request, resolves the organization id
//! and hands back a `DownloadRun`: a lazy, single-pass sequence that pages
//! through the listing and fetches one document at a time.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::VecDeque;
use std::path::PathBuf;
use crate::cninfo::client::{stock_page_url, HttpRequest, LISTING_URL};
use crate::cninfo::models::{DocumentRecord, DownloadTask, ListingResponse};
use crate::resolver::IdentifierCache;
use crate::retry::{Attempt, RetryController};
use crate::session::{Session, SessionManager};
use crate::stock::{OrganizationId, StockCode};
use crate::storage::documents::{is_present, save_document};
use crate::storage::StorageManager;
use crate::utils::error::{FetchError, TransportError};

/// Unvalidated parameters as they arrive from the command line or a caller.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub stock_code: String,
    /// Skips resolution when given.
    pub org_id: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub max_pages: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentStatus {
    Fetched(PathBuf),
    /// Already on disk from an earlier run.
    Skipped(PathBuf),
}

/// One element of a download run.
#[derive(Debug, Clone)]
pub struct DocumentOutcome {
    pub record: DocumentRecord,
    pub status: DocumentStatus,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub listing_queries: u32,
    pub fetched: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl RunSummary {
    pub fn documents(&self) -> u32 {
        self.fetched + self.skipped
    }
}

pub struct Orchestrator {
    cache: IdentifierCache,
    sessions: SessionManager,
    retry: RetryController,
    storage: StorageManager,
}

impl Orchestrator {
    pub fn new(
        cache: IdentifierCache,
        sessions: SessionManager,
        retry: RetryController,
        storage: StorageManager,
    ) -> Self {
        Self { cache, sessions, retry, storage }
    }

    pub fn cache(&self) -> &IdentifierCache {
        &self.cache
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    /// Validates `request`, resolves the organization id and returns the document sequence.
    ///
    /// Malformed input is rejected before any session is opened.
    pub async fn run(&mut self, request: &DownloadRequest) -> Result<DownloadRun<'_>, FetchError> {
        let stock_code = StockCode::parse(&request.stock_code)?;
        let supplied_org_id = request.org_id.as_deref().map(OrganizationId::parse).transpose()?;
        if request.start_date > request.end_date {
            return Err(FetchError::MalformedInput(format!(
                "start date {} is after end date {}",
                request.start_date, request.end_date
            )));
        }
        if request.max_pages == 0 {
            return Err(FetchError::MalformedInput("max pages must be at least 1".to_string()));
        }

        let org_id = match supplied_org_id {
            Some(org_id) => {
                tracing::info!("Using supplied orgId {} for {}", org_id, stock_code);
                org_id
            }
            None => {
                let org_id = self
                    .cache
                    .resolve(&stock_code, false, &mut self.sessions, &self.retry)
                    .await?;
                self.cache.flush().await;
                org_id
            }
        };

        let target_directory = self.storage.ensure_stock_dir(&stock_code)?;
        let task = DownloadTask {
            stock_code,
            org_id,
            date_range_start: request.start_date,
            date_range_end: request.end_date,
            max_pages: request.max_pages,
            target_directory,
        };
        tracing::info!(
            "Downloading {} (orgId {}) for {}, up to {} pages into {}",
            task.stock_code,
            task.org_id,
            task.date_range_param(),
            task.max_pages,
            task.target_directory.display()
        );

        Ok(DownloadRun::new(self, task))
    }

    /// Saves the mapping and closes the live session.
    pub async fn shutdown(&mut self) {
        self.cache.flush().await;
        self.sessions.release().await;
    }
}

pub struct DownloadRun<'a> {
    orchestrator: &'a mut Orchestrator,
    task: DownloadTask,
    referer: String,
    next_page: u32,
    pending: VecDeque<DocumentRecord>,
    listing_done: bool,
    finished: bool,
    summary: RunSummary,
}

impl<'a> DownloadRun<'a> {
    fn new(orchestrator: &'a mut Orchestrator, task: DownloadTask) -> Self {
        Self {
            referer: stock_page_url(&task.stock_code, &task.org_id),
            orchestrator,
            task,
            next_page: 1,
            pending: VecDeque::new(),
            listing_done: false,
            finished: false,
            summary: RunSummary::default(),
        }
    }

    pub fn task(&self) -> &DownloadTask {
        &self.task
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// True once `next()` has returned `None` or a sequence-ending error.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Next fetched or skipped document. `None` once the listing is exhausted.
    ///
    /// A document whose fetch failed yields `Err` and the sequence continues;
    /// a listing failure or cancellation yields `Err` and ends it.
    pub async fn next(&mut self) -> Option<Result<DocumentOutcome, FetchError>> {
        loop {
            if self.finished {
                return None;
            }
            if self.orchestrator.retry.cancel_token().is_cancelled() {
                tracing::info!("Cancellation requested, stopping {}", self.task.stock_code);
                self.finished = true;
                return Some(Err(FetchError::Cancelled));
            }

            if let Some(record) = self.pending.pop_front() {
                return Some(self.process(record).await);
            }

            if self.listing_done || self.next_page > self.task.max_pages {
                self.finished = true;
                tracing::info!(
                    "Finished {}: {} fetched, {} skipped, {} failed over {} listing pages",
                    self.task.stock_code,
                    self.summary.fetched,
                    self.summary.skipped,
                    self.summary.failed,
                    self.summary.listing_queries
                );
                return None;
            }

            let page = self.next_page;
            self.next_page += 1;
            match self.fetch_listing(page).await {
                Ok((records, has_more)) => {
                    if records.is_empty() {
                        tracing::info!("Listing page {} is empty, stopping", page);
                        self.listing_done = true;
                        continue;
                    }
                    tracing::info!("Listing page {} returned {} documents", page, records.len());
                    self.pending.extend(records);
                    if !has_more {
                        self.listing_done = true;
                    }
                }
                Err(FetchError::NoData(reason)) => {
                    tracing::info!("No data for {}: {}", self.task.stock_code, reason);
                    self.listing_done = true;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }

    async fn fetch_listing(&mut self, page: u32) -> Result<(Vec<DocumentRecord>, bool), FetchError> {
        self.summary.listing_queries += 1;
        let mut attempt = ListingAttempt {
            task: &self.task,
            referer: &self.referer,
            page,
        };
        let orchestrator = &mut *self.orchestrator;
        let listing = orchestrator.retry.run(&mut orchestrator.sessions, &mut attempt).await?;

        let records = listing
            .announcements
            .unwrap_or_default()
            .iter()
            .filter_map(|announcement| {
                let record = DocumentRecord::from_announcement(&self.task.stock_code, announcement);
                if record.is_none() {
                    tracing::warn!("Skipping announcement with invalid timestamp: {}", announcement.announcementTitle);
                }
                record
            })
            .collect();
        Ok((records, listing.hasMore))
    }

    async fn process(&mut self, record: DocumentRecord) -> Result<DocumentOutcome, FetchError> {
        let dir = self.task.target_directory.clone();
        if is_present(&dir, &record) {
            tracing::info!("Already downloaded, skipping: {}", record.local_filename);
            self.summary.skipped += 1;
            let path = dir.join(&record.local_filename);
            return Ok(DocumentOutcome { record, status: DocumentStatus::Skipped(path) });
        }

        let mut attempt = FetchAttempt {
            url: &record.source_url,
            referer: &self.referer,
        };
        let orchestrator = &mut *self.orchestrator;
        let content = match orchestrator.retry.run(&mut orchestrator.sessions, &mut attempt).await {
            Ok(content) => content,
            Err(e) => {
                if matches!(e, FetchError::Cancelled) {
                    self.finished = true;
                } else {
                    self.summary.failed += 1;
                    tracing::error!("Failed to download {}: {}", record.title, e);
                }
                return Err(e);
            }
        };

        let path = match save_document(&dir, &record, &content) {
            Ok(path) => path,
            Err(e) => {
                self.summary.failed += 1;
                tracing::error!("Failed to save {}: {}", record.local_filename, e);
                return Err(e.into());
            }
        };
        orchestrator.sessions.record_download();
        self.summary.fetched += 1;
        Ok(DocumentOutcome { record, status: DocumentStatus::Fetched(path) })
    }
}

struct ListingAttempt<'a> {
    task: &'a DownloadTask,
    referer: &'a str,
    page: u32,
}

#[async_trait]
impl<'a> Attempt for ListingAttempt<'a> {
    type Output = ListingResponse;

    fn label(&self) -> String {
        format!("Listing page {} for {}", self.page, self.task.stock_code)
    }

    async fn attempt(&mut self, session: &mut Session) -> Result<ListingResponse, FetchError> {
        let request = HttpRequest::post_form(LISTING_URL, self.task.listing_form(self.page))
            .with_referer(self.referer);
        let response = match session.request(request).await {
            Ok(response) => response,
            Err(TransportError::NotFound(url)) => return Err(FetchError::NoData(url)),
            Err(e) => return Err(e.into()),
        };
        if response.body.is_empty() {
            return Err(TransportError::EmptyResponse(response.final_url).into());
        }
        response.json()
    }
}

struct FetchAttempt<'a> {
    url: &'a str,
    referer: &'a str,
}

#[async_trait]
impl<'a> Attempt for FetchAttempt<'a> {
    type Output = Vec<u8>;

    fn label(&self) -> String {
        format!("Fetching {}", self.url)
    }

    async fn attempt(&mut self, session: &mut Session) -> Result<Vec<u8>, FetchError> {
        let response = session
            .request(HttpRequest::get(self.url).with_referer(self.referer))
            .await?;
        if response.body.is_empty() {
            return Err(TransportError::EmptyResponse(response.final_url).into());
        }
        if response.looks_like_html() {
            return Err(TransportError::Blocked(format!("HTML page served for {}", self.url)).into());
        }
        Ok(response.body)
    }
}
