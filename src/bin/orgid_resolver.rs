// src/bin/orgid_resolver.rs
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use cninfo_fetcher::cninfo::HttpTransportFactory;
use cninfo_fetcher::config::{FetcherConfig, DEFAULT_CODES_FILE, DEFAULT_MAPPING_FILE};
use cninfo_fetcher::extractors::StrategySet;
use cninfo_fetcher::resolver::IdentifierCache;
use cninfo_fetcher::retry::RetryController;
use cninfo_fetcher::session::SessionManager;
use cninfo_fetcher::stock::StockCode;
use cninfo_fetcher::storage::MappingStore;
use cninfo_fetcher::universe;
use cninfo_fetcher::utils::{self, AppError, FetchError};

/// Builds the stock code to cninfo orgId mapping file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Mapping file to read and update
    #[arg(long, default_value = DEFAULT_MAPPING_FILE)]
    output: PathBuf,

    /// First index into the code list (inclusive)
    #[arg(long, default_value_t = 0)]
    start: usize,

    /// Last index into the code list (exclusive)
    #[arg(long, default_value_t = 1000)]
    end: usize,

    /// Codes per batch
    #[arg(long, default_value_t = 10)]
    batch_size: usize,

    /// Save the mapping after this many processed codes
    #[arg(long, default_value_t = 10)]
    save_interval: usize,

    /// Run without behavior simulation
    #[arg(long)]
    headless: bool,

    /// Verbose logging and annotated dumps of pages where resolution failed
    #[arg(long)]
    debug: bool,

    /// Resolve a single code (forced), then exit
    #[arg(long)]
    test: bool,

    /// Code used by --test
    #[arg(long)]
    stock_code: Option<String>,

    /// A-share code list (code,name)
    #[arg(long, default_value = DEFAULT_CODES_FILE)]
    codes_file: PathBuf,

    /// JSON file overriding session and retry settings
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct BatchStats {
    resolved: usize,
    cached: usize,
    failed: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = utils::logging::setup_logging("orgid_resolver", &PathBuf::from("."), args.debug);
    tracing::info!("Starting processing for args: {:?}", args);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Settings file (or defaults) with command-line overrides applied.
fn load_config(args: &Args) -> Result<FetcherConfig, AppError> {
    let mut config = match &args.config {
        Some(path) => FetcherConfig::from_file(path)?,
        None => FetcherConfig::default(),
    };
    config.session.headless |= args.headless;
    config.validate()?;
    Ok(config)
}

async fn run(args: Args) -> Result<(), AppError> {
    let config = load_config(&args)?;

    if !args.test && args.start >= args.end {
        return Err(AppError::Config(format!(
            "--start ({}) must be less than --end ({})",
            args.start, args.end
        )));
    }
    let test_code = if args.test {
        Some(StockCode::parse(args.stock_code.as_deref().unwrap_or("300010").trim())?)
    } else {
        None
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping after the current code");
            ctrl_c.cancel();
        }
    });

    let mut cache = IdentifierCache::new(MappingStore::load(&args.output), StrategySet::default());
    if args.debug {
        cache = cache.with_debug_dir("debug");
    }
    let mut sessions = SessionManager::new(Arc::new(HttpTransportFactory), config.session);
    let retry = RetryController::new(config.retry, cancel);

    match test_code {
        Some(code) => {
            match cache.resolve(&code, true, &mut sessions, &retry).await {
                Ok(org_id) => println!("{} -> {}", code, org_id),
                Err(e) => {
                    tracing::error!("Test resolution of {} failed: {}", code, e);
                    println!("{} -> not found", code);
                }
            }
        }
        None => {
            let stats = crawl(&args, &mut cache, &mut sessions, &retry).await;
            println!(
                "Done: {} resolved, {} already mapped, {} failed; {} entries in {}",
                stats.resolved,
                stats.cached,
                stats.failed,
                cache.store().len(),
                args.output.display()
            );
        }
    }

    cache.flush().await;
    sessions.release().await;
    Ok(())
}

async fn crawl(
    args: &Args,
    cache: &mut IdentifierCache,
    sessions: &mut SessionManager,
    retry: &RetryController,
) -> BatchStats {
    let companies = universe::load_universe(&args.codes_file).await;
    let end = args.end.min(companies.len());
    let mut stats = BatchStats::default();
    if args.start >= end {
        tracing::warn!("Index range {}..{} is empty for {} codes", args.start, args.end, companies.len());
        return stats;
    }

    let selected = &companies[args.start..end];
    let batch_size = args.batch_size.max(1);
    let save_interval = args.save_interval.max(1);
    tracing::info!("Preparing to resolve {} codes in batches of {}", selected.len(), batch_size);

    let mut processed = 0;
    for (index, batch) in selected.chunks(batch_size).enumerate() {
        let first = index * batch_size;
        tracing::info!("Processing codes {}-{} of {}", first + 1, first + batch.len(), selected.len());

        for company in batch {
            if retry.cancel_token().is_cancelled() {
                return stats;
            }
            if cache.cached(&company.code).is_some() {
                tracing::info!("Skipping {}, already mapped", company.code);
                stats.cached += 1;
                continue;
            }

            match cache.resolve(&company.code, false, sessions, retry).await {
                Ok(_) => {
                    if let Some(name) = &company.name {
                        cache.store_mut().set_name(&company.code, name.clone());
                    }
                    stats.resolved += 1;
                }
                Err(FetchError::Cancelled) => return stats,
                Err(e) => {
                    tracing::error!("Could not resolve {}: {}", company.code, e);
                    stats.failed += 1;
                }
            }

            processed += 1;
            if processed % save_interval == 0 {
                cache.flush().await;
            }
        }
    }
    stats
}
