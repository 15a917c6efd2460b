// src/resolver.rs
//! Stock code → organization id lookups backed by the mapping store.
//!
//! A cached id is returned without touching the network. Otherwise the
//! search page is loaded on a session and the strategy set runs against it,
//! wrapped in the retry controller so each retry uses a fresh identity.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use crate::cninfo::client::search_url;
use crate::extractors::{Resolved, StrategySet};
use crate::retry::{Attempt, RetryController};
use crate::session::{Session, SessionManager};
use crate::stock::{OrganizationId, StockCode};
use crate::storage::MappingStore;
use crate::utils::error::FetchError;
use crate::utils::html_debug::{create_debug_html, ORG_ID_DEBUG_PATTERNS};

pub struct IdentifierCache {
    store: MappingStore,
    strategies: StrategySet,
    debug_dir: Option<PathBuf>,
}

impl IdentifierCache {
    pub fn new(store: MappingStore, strategies: StrategySet) -> Self {
        Self { store, strategies, debug_dir: None }
    }

    /// Dump the search page to `<dir>/<code>_search.html` whenever every strategy fails.
    pub fn with_debug_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.debug_dir = Some(dir.into());
        self
    }

    pub fn store(&self) -> &MappingStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut MappingStore {
        &mut self.store
    }

    pub fn cached(&self, code: &StockCode) -> Option<&OrganizationId> {
        self.store.get(code)
    }

    pub async fn resolve(
        &mut self,
        code: &StockCode,
        force_run: bool,
        sessions: &mut SessionManager,
        retry: &RetryController,
    ) -> Result<OrganizationId, FetchError> {
        if !force_run {
            if let Some(org_id) = self.store.get(code) {
                tracing::debug!("Mapping hit for {}: {}", code, org_id);
                return Ok(org_id.clone());
            }
        }

        tracing::info!("Resolving orgId for {}{}", code, if force_run { " (forced)" } else { "" });
        let mut attempt = ResolveAttempt {
            code,
            strategies: &self.strategies,
            debug_dir: self.debug_dir.as_deref(),
        };
        let resolved = retry.run(sessions, &mut attempt).await?;

        self.store.put(code.clone(), resolved.org_id.clone(), Some(resolved.strategy));
        Ok(resolved.org_id)
    }

    /// Persists the store on the blocking pool, since the file lock may wait on
    /// another process. A failed write is logged and the run continues in memory.
    pub async fn flush(&mut self) -> bool {
        let mut snapshot = self.store.clone();
        let written = tokio::task::spawn_blocking(move || snapshot.flush().map(|_| snapshot)).await;
        match written {
            Ok(Ok(merged)) => {
                self.store = merged;
                true
            }
            Ok(Err(e)) => {
                tracing::warn!("Could not save mapping to {}: {}", self.store.path().display(), e);
                false
            }
            Err(e) => {
                tracing::warn!("Mapping flush task failed: {}", e);
                false
            }
        }
    }
}

struct ResolveAttempt<'a> {
    code: &'a StockCode,
    strategies: &'a StrategySet,
    debug_dir: Option<&'a Path>,
}

#[async_trait]
impl<'a> Attempt for ResolveAttempt<'a> {
    type Output = Resolved;

    fn label(&self) -> String {
        format!("Resolving {}", self.code)
    }

    async fn attempt(&mut self, session: &mut Session) -> Result<Resolved, FetchError> {
        session.navigate(&search_url(self.code)).await?;

        let result = self.strategies.resolve(self.code, session).await;
        if let (Err(FetchError::ResolutionExhausted { .. }), Some(dir)) = (&result, self.debug_dir) {
            if let Some(source) = session.page_source() {
                let path = dir.join(format!("{}_search.html", self.code));
                if let Err(e) = create_debug_html(source, &path, ORG_ID_DEBUG_PATTERNS) {
                    tracing::warn!("Failed to save debug page {}: {}", path.display(), e);
                }
            }
        }
        result
    }
}
