// tests/resolution_cache.rs
mod support;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;
use cninfo_fetcher::extractors::{OrgIdStrategy, StrategySet};
use cninfo_fetcher::resolver::IdentifierCache;
use cninfo_fetcher::retry::RetryController;
use cninfo_fetcher::session::{Session, SessionManager};
use cninfo_fetcher::stock::{OrganizationId, StockCode};
use cninfo_fetcher::storage::MappingStore;
use cninfo_fetcher::utils::FetchError;
use support::{mapping_path, quiet_config, FakePortal, Script, SearchPage, ORG_ID};

struct Counting {
    calls: Arc<AtomicUsize>,
    answer: Option<&'static str>,
}

#[async_trait]
impl OrgIdStrategy for Counting {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn attempt(&self, _code: &StockCode, _session: &mut Session) -> Result<OrganizationId, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.answer {
            Some(id) => OrganizationId::parse(id).map_err(|e| e.to_string()),
            None => Err("nothing here".to_string()),
        }
    }
}

fn counting_set(answers: &[Option<&'static str>]) -> (StrategySet, Vec<Arc<AtomicUsize>>) {
    let counters: Vec<Arc<AtomicUsize>> = answers.iter().map(|_| Arc::new(AtomicUsize::new(0))).collect();
    let strategies = answers
        .iter()
        .zip(&counters)
        .map(|(answer, calls)| {
            Box::new(Counting { calls: calls.clone(), answer: *answer }) as Box<dyn OrgIdStrategy>
        })
        .collect();
    (StrategySet::new(strategies), counters)
}

fn code() -> StockCode {
    StockCode::parse("300010").unwrap()
}

fn harness(portal: &Arc<FakePortal>) -> (SessionManager, RetryController) {
    let config = quiet_config();
    (
        SessionManager::with_seed(portal.clone(), config.session, 42),
        RetryController::new(config.retry, CancellationToken::new()),
    )
}

#[tokio::test]
async fn cached_entry_skips_every_strategy() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = MappingStore::load(mapping_path(dir.path()));
    store.put(code(), OrganizationId::parse(ORG_ID).unwrap(), Some(1));
    store.flush().unwrap();

    let portal = FakePortal::new(Script::default());
    let (mut sessions, retry) = harness(&portal);
    let (strategies, counters) = counting_set(&[Some("1"), Some("2")]);
    let mut cache = IdentifierCache::new(MappingStore::load(mapping_path(dir.path())), strategies);

    let org_id = assert_ok!(cache.resolve(&code(), false, &mut sessions, &retry).await);
    assert_eq!(org_id.as_str(), ORG_ID);
    assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 0));
    assert_eq!(portal.sessions_opened(), 0);
    assert_eq!(portal.network_calls(), 0);
}

#[tokio::test]
async fn only_third_strategy_succeeds_and_is_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let portal = FakePortal::new(Script::default());
    let (mut sessions, retry) = harness(&portal);
    let (strategies, counters) = counting_set(&[None, None, Some(ORG_ID), Some("1")]);
    let mut cache = IdentifierCache::new(MappingStore::load(mapping_path(dir.path())), strategies);

    let org_id = assert_ok!(cache.resolve(&code(), false, &mut sessions, &retry).await);
    assert_eq!(org_id.as_str(), ORG_ID);
    let calls: Vec<usize> = counters.iter().map(|c| c.load(Ordering::SeqCst)).collect();
    assert_eq!(calls, vec![1, 1, 1, 0]);

    assert!(cache.flush().await);
    let reloaded = MappingStore::load(mapping_path(dir.path()));
    let entry = reloaded.entry(&code()).unwrap();
    assert_eq!(entry.org_id.as_str(), ORG_ID);
    assert_eq!(entry.strategy, Some(3));
}

#[tokio::test]
async fn default_strategies_follow_priority_order() {
    let cases = [
        (SearchPage::Redirect, "[]", 1),
        (SearchPage::DomAttribute, "[]", 2),
        (SearchPage::ScriptOnly, "[]", 3),
        (
            SearchPage::Empty,
            r#"[{"code":"300010","orgId":"9900008267","zwjc":"豆神教育","category":"A股"}]"#,
            4,
        ),
    ];

    for (page, top_search, expected) in cases {
        let dir = tempfile::tempdir().unwrap();
        let portal = FakePortal::new(Script {
            search: page,
            top_search: top_search.to_string(),
            ..Script::default()
        });
        let (mut sessions, retry) = harness(&portal);
        let mut cache = IdentifierCache::new(MappingStore::load(mapping_path(dir.path())), StrategySet::default());

        let org_id = assert_ok!(cache.resolve(&code(), false, &mut sessions, &retry).await);
        assert_eq!(org_id.as_str(), ORG_ID, "{:?}", page);
        assert_eq!(cache.store().entry(&code()).unwrap().strategy, Some(expected), "{:?}", page);
        assert_eq!(portal.navigations(), 1);
    }
}

#[tokio::test]
async fn exhausted_resolution_is_retried_then_surfaced() {
    let dir = tempfile::tempdir().unwrap();
    let portal = FakePortal::new(Script {
        search: SearchPage::Empty,
        ..Script::default()
    });
    let (mut sessions, retry) = harness(&portal);
    let debug_dir = dir.path().join("debug");
    let mut cache = IdentifierCache::new(MappingStore::load(mapping_path(dir.path())), StrategySet::default())
        .with_debug_dir(&debug_dir);

    let err = assert_err!(cache.resolve(&code(), false, &mut sessions, &retry).await);
    match err.last_cause() {
        FetchError::ResolutionExhausted { stock_code, reasons } => {
            assert_eq!(stock_code, "300010");
            assert_eq!(reasons.len(), 4);
        }
        other => panic!("unexpected cause {:?}", other),
    }
    assert!(matches!(err, FetchError::RetryExhausted { attempts: 3, .. }));
    assert_eq!(portal.sessions_opened(), 3);
    assert!(cache.store().is_empty());
    assert!(debug_dir.join("300010_search.html").is_file());
}

#[tokio::test]
async fn forced_run_bypasses_cached_entry() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = MappingStore::load(mapping_path(dir.path()));
    store.put(code(), OrganizationId::parse("1").unwrap(), None);

    let portal = FakePortal::new(Script::default());
    let (mut sessions, retry) = harness(&portal);
    let mut cache = IdentifierCache::new(store, StrategySet::default());

    let org_id = assert_ok!(cache.resolve(&code(), true, &mut sessions, &retry).await);
    assert_eq!(org_id.as_str(), ORG_ID);
    assert_eq!(portal.navigations(), 1);
    assert_eq!(cache.store().entry(&code()).unwrap().strategy, Some(1));
}

#[tokio::test]
async fn programmatic_resolve_never_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mapping = mapping_path(dir.path());

    let portal = FakePortal::new(Script::default());
    assert_eq!(
        cninfo_fetcher::resolve_with("30010", false, &mapping, quiet_config(), portal.clone()).await,
        None
    );
    assert_eq!(portal.sessions_opened(), 0);

    let resolved = cninfo_fetcher::resolve_with("300010", false, &mapping, quiet_config(), portal.clone()).await;
    assert_eq!(resolved.as_ref().map(|id| id.as_str()), Some(ORG_ID));
    assert_eq!(
        MappingStore::load(&mapping).get(&code()).map(|id| id.as_str()),
        Some(ORG_ID)
    );

    let empty = FakePortal::new(Script {
        search: SearchPage::Blocked,
        ..Script::default()
    });
    let other = dir.path().join("other.json");
    assert_eq!(
        cninfo_fetcher::resolve_with("300010", false, &other, quiet_config(), empty.clone()).await,
        None
    );
    assert_eq!(empty.sessions_opened(), 3);
}

#[tokio::test]
async fn unwritable_mapping_keeps_result_in_memory() {
    let dir = tempfile::tempdir().unwrap();
    let mapping = support::unwritable_mapping_path(dir.path());
    let portal = FakePortal::new(Script::default());
    let (mut sessions, retry) = harness(&portal);
    let mut cache = IdentifierCache::new(MappingStore::load(&mapping), StrategySet::default());

    let org_id = assert_ok!(cache.resolve(&code(), false, &mut sessions, &retry).await);
    assert_eq!(org_id.as_str(), ORG_ID);
    assert!(!cache.flush().await);
    assert_eq!(cache.cached(&code()).map(|id| id.as_str()), Some(ORG_ID));
    assert!(!mapping.exists());

    // Served from memory, no second lookup
    let again = assert_ok!(cache.resolve(&code(), false, &mut sessions, &retry).await);
    assert_eq!(again.as_str(), ORG_ID);
    assert_eq!(portal.navigations(), 1);
}

#[tokio::test]
async fn programmatic_resolve_survives_unwritable_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let mapping = support::unwritable_mapping_path(dir.path());
    let portal = FakePortal::new(Script::default());

    let resolved = cninfo_fetcher::resolve_with("300010", false, &mapping, quiet_config(), portal.clone()).await;
    assert_eq!(resolved.as_ref().map(|id| id.as_str()), Some(ORG_ID));
    assert!(!mapping.exists());
}

#[tokio::test]
async fn flush_waits_for_foreign_lock_off_the_runtime() {
    use fs2::FileExt;

    let dir = tempfile::tempdir().unwrap();
    let mapping = mapping_path(dir.path());
    let held = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(dir.path().join("stock_orgid_mapping.json.lock"))
        .unwrap();
    held.lock_exclusive().unwrap();

    let mut cache = IdentifierCache::new(MappingStore::load(&mapping), StrategySet::default());
    cache.store_mut().put(code(), OrganizationId::parse(ORG_ID).unwrap(), Some(2));

    let flush = cache.flush();
    tokio::pin!(flush);
    // The timer only fires if the runtime thread is not stuck on the lock
    tokio::select! {
        _ = &mut flush => panic!("flush finished while another holder had the lock"),
        _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
    }
    held.unlock().unwrap();

    assert!(flush.await);
    let entry = MappingStore::load(&mapping).entry(&code()).cloned().unwrap();
    assert_eq!(entry.strategy, Some(2));
}
