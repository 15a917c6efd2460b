// src/lib.rs
pub mod cninfo;
pub mod config;
pub mod extractors;
pub mod orchestrator;
pub mod resolver;
pub mod retry;
pub mod session;
pub mod stock;
pub mod storage;
pub mod universe;
pub mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use cninfo::{HttpTransportFactory, TransportFactory};
use config::{FetcherConfig, DEFAULT_MAPPING_FILE};
use extractors::StrategySet;
use resolver::IdentifierCache;
use retry::RetryController;
use session::SessionManager;
use storage::MappingStore;

pub use stock::{OrganizationId, StockCode};

/// Resolves the organization id for `stock_code`, consulting the mapping
/// file first (`stock_orgid_mapping.json` when `mapping_file` is `None`).
///
/// Never fails: malformed codes and exhausted resolutions are logged and
/// reported as `None`.
pub async fn resolve(
    stock_code: &str,
    force_run: bool,
    mapping_file: Option<&Path>,
    headless: bool,
) -> Option<OrganizationId> {
    let mut config = FetcherConfig::default();
    config.session.headless = headless;
    let mapping_file = mapping_file
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MAPPING_FILE));

    resolve_with(stock_code, force_run, &mapping_file, config, Arc::new(HttpTransportFactory)).await
}

/// `resolve` with an explicit configuration and transport.
pub async fn resolve_with(
    stock_code: &str,
    force_run: bool,
    mapping_file: &Path,
    config: FetcherConfig,
    factory: Arc<dyn TransportFactory>,
) -> Option<OrganizationId> {
    let code = match StockCode::parse(stock_code) {
        Ok(code) => code,
        Err(e) => {
            tracing::warn!("{}", e);
            return None;
        }
    };

    let mut cache = IdentifierCache::new(MappingStore::load(mapping_file), StrategySet::default());
    if !force_run {
        if let Some(org_id) = cache.cached(&code) {
            return Some(org_id.clone());
        }
    }

    let mut sessions = SessionManager::new(factory, config.session);
    let retry = RetryController::new(config.retry, CancellationToken::new());
    let result = cache.resolve(&code, force_run, &mut sessions, &retry).await;
    sessions.release().await;

    match result {
        Ok(org_id) => {
            cache.flush().await;
            Some(org_id)
        }
        Err(e) => {
            tracing::error!("Could not resolve orgId for {}: {}", code, e);
            None
        }
    }
}
