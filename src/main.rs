// src/main.rs
use chrono::{Duration, NaiveDate, Utc};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use cninfo_fetcher::cninfo::HttpTransportFactory;
use cninfo_fetcher::config::{FetcherConfig, DEFAULT_MAPPING_FILE, DEFAULT_SAVE_DIR};
use cninfo_fetcher::extractors::StrategySet;
use cninfo_fetcher::orchestrator::{DocumentStatus, DownloadRequest, Orchestrator};
use cninfo_fetcher::resolver::IdentifierCache;
use cninfo_fetcher::retry::RetryController;
use cninfo_fetcher::session::SessionManager;
use cninfo_fetcher::storage::{MappingStore, StorageManager};
use cninfo_fetcher::utils::{self, AppError, FetchError};

/// Downloads investor-relations activity records for one stock from cninfo
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Six-digit stock code, e.g. 300010
    #[arg(long)]
    stock_code: String,

    /// Organization id; skips resolution when given
    #[arg(long)]
    org_id: Option<String>,

    /// Download root; files land in <save-dir>/<stock-code>/
    #[arg(long, default_value = DEFAULT_SAVE_DIR)]
    save_dir: PathBuf,

    /// Stock code to orgId mapping file
    #[arg(long, default_value = DEFAULT_MAPPING_FILE)]
    mapping_file: PathBuf,

    /// First publish date, yyyy-MM-dd (default: one year before end date)
    #[arg(long, value_parser = parse_date)]
    start_date: Option<NaiveDate>,

    /// Last publish date, yyyy-MM-dd (default: today)
    #[arg(long, value_parser = parse_date)]
    end_date: Option<NaiveDate>,

    /// Maximum number of listing pages to query
    #[arg(long, default_value_t = 10)]
    max_pages: u32,

    /// Verbose logging and debug page dumps
    #[arg(short, long)]
    debug: bool,

    /// JSON file overriding session and retry settings
    #[arg(long)]
    config: Option<PathBuf>,
}

fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("expected yyyy-MM-dd: {}", e))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let _log_guard = utils::logging::setup_logging("cninfo_downloader", &PathBuf::from("."), args.debug);
    tracing::info!("Starting processing for args: {:?}", args);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            if let AppError::Fetch(fetch @ FetchError::RetryExhausted { .. }) = &e {
                eprintln!("Last underlying error: {}", fetch.last_cause());
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let config = match &args.config {
        Some(path) => FetcherConfig::from_file(path)?,
        None => FetcherConfig::default(),
    };
    config.validate()?;

    let end_date = args.end_date.unwrap_or_else(|| Utc::now().date_naive());
    let start_date = args.start_date.unwrap_or(end_date - Duration::days(365));
    let request = DownloadRequest {
        stock_code: args.stock_code.trim().to_string(),
        org_id: args.org_id.clone(),
        start_date,
        end_date,
        max_pages: args.max_pages,
    };

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping at the next boundary");
            ctrl_c.cancel();
        }
    });

    let mut cache = IdentifierCache::new(MappingStore::load(&args.mapping_file), StrategySet::default());
    if args.debug {
        cache = cache.with_debug_dir("debug");
    }
    let mut orchestrator = Orchestrator::new(
        cache,
        SessionManager::new(Arc::new(HttpTransportFactory), config.session),
        RetryController::new(config.retry, cancel),
        StorageManager::new(&args.save_dir)?,
    );

    let outcome = download(&mut orchestrator, &request).await;
    orchestrator.shutdown().await;
    outcome
}

async fn download(orchestrator: &mut Orchestrator, request: &DownloadRequest) -> Result<(), AppError> {
    let mut documents = orchestrator.run(request).await?;

    while let Some(item) = documents.next().await {
        match item {
            Ok(outcome) => match outcome.status {
                DocumentStatus::Fetched(path) => println!("Downloaded {}", path.display()),
                DocumentStatus::Skipped(path) => println!("Already present {}", path.display()),
            },
            // Listing failures and cancellation end the sequence
            Err(e) if documents.is_finished() => return Err(e.into()),
            Err(e) => eprintln!("Skipped a document: {}", e),
        }
    }

    let summary = documents.summary();
    if summary.documents() == 0 && summary.failed == 0 {
        println!("No data found for {} in {}", request.stock_code, documents.task().date_range_param());
    } else {
        println!(
            "Done: {} downloaded, {} already present, {} failed",
            summary.fetched, summary.skipped, summary.failed
        );
    }
    Ok(())
}
