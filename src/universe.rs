// src/universe.rs
//! The list of A-share codes the batch resolver walks.
//!
//! Read from a two-column `code,name` CSV. When the file is missing it is
//! rebuilt from the Eastmoney quote list; when that fails too the board
//! ranges are generated.

use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use crate::stock::StockCode;
use crate::utils::error::{FetchError, StorageError};

const EASTMONEY_LIST_URL: &str = "http://44.push2.eastmoney.com/api/qt/clist/get";

/// Shenzhen main board, ChiNext, Shanghai main board, STAR market.
const GENERATED_RANGES: &[(u32, u32)] = &[
    (1, 3999),
    (300001, 301999),
    (600000, 605999),
    (688001, 688999),
];

#[derive(Debug, Clone, PartialEq)]
pub struct ListedCompany {
    pub code: StockCode,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ClistResponse {
    data: Option<ClistData>,
}

#[derive(Debug, Deserialize)]
struct ClistData {
    #[serde(default)]
    diff: Vec<ClistRow>,
}

#[derive(Debug, Deserialize)]
struct ClistRow {
    f12: String,
    #[serde(default)]
    f14: Option<String>,
}

/// Parses `code,name` rows. The header, a UTF-8 BOM and rows without a
/// valid six-digit code are skipped.
pub fn parse_codes_csv(text: &str) -> Vec<ListedCompany> {
    text.trim_start_matches('\u{feff}')
        .lines()
        .filter_map(|line| {
            let mut cells = line.split(',').map(|c| c.trim().trim_matches('"'));
            let code = StockCode::parse(cells.next()?).ok()?;
            let name = cells.next().filter(|n| !n.is_empty()).map(str::to_string);
            Some(ListedCompany { code, name })
        })
        .collect()
}

pub fn load_codes_csv(path: &Path) -> Result<Vec<ListedCompany>, StorageError> {
    let text = fs::read_to_string(path)?;
    Ok(parse_codes_csv(&text))
}

pub fn write_codes_csv(path: &Path, companies: &[ListedCompany]) -> Result<(), StorageError> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new().prefix(".codes-").tempfile_in(dir)?;
    writeln!(tmp, "code,name")?;
    for company in companies {
        let name = company.name.as_deref().unwrap_or("").replace(',', " ");
        writeln!(tmp, "{},{}", company.code, name)?;
    }
    tmp.persist(path).map_err(|e| StorageError::IoError(e.error))?;
    Ok(())
}

/// Downloads the current A-share list from Eastmoney.
pub async fn fetch_codes() -> Result<Vec<ListedCompany>, FetchError> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .map_err(|e| FetchError::Transport(e.into()))?;
    let params = [
        ("pn", "1"),
        ("pz", "5000"),
        ("po", "1"),
        ("np", "1"),
        ("ut", "b2884a393a59ad64002292a3e90d46a5"),
        ("fltt", "2"),
        ("invt", "2"),
        ("fid", "f3"),
        ("fs", "m:0+t:6,m:0+t:13,m:0+t:80,m:1+t:2,m:1+t:23"),
        ("fields", "f12,f14"),
    ];

    let response = client
        .get(EASTMONEY_LIST_URL)
        .query(&params)
        .send()
        .await
        .map_err(|e| FetchError::Transport(e.into()))?;
    let body: ClistResponse = response
        .json()
        .await
        .map_err(|e| FetchError::Parse(e.to_string()))?;

    let rows = body
        .data
        .ok_or_else(|| FetchError::NoData("quote list response has no data".to_string()))?
        .diff;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            Some(ListedCompany {
                code: StockCode::parse(row.f12.trim()).ok()?,
                name: row.f14.filter(|n| !n.is_empty() && n != "-"),
            })
        })
        .collect())
}

pub fn generated_codes() -> Vec<ListedCompany> {
    GENERATED_RANGES
        .iter()
        .flat_map(|&(low, high)| low..=high)
        .filter_map(|n| StockCode::parse(&format!("{:06}", n)).ok())
        .map(|code| ListedCompany { code, name: None })
        .collect()
}

/// Loads the universe from `csv_path`, fetching and saving it first if the
/// file does not exist, and generating it if neither yields any codes.
pub async fn load_universe(csv_path: &Path) -> Vec<ListedCompany> {
    if !csv_path.exists() {
        match fetch_codes().await {
            Ok(companies) if !companies.is_empty() => {
                match write_codes_csv(csv_path, &companies) {
                    Ok(()) => tracing::info!("Saved {} A-share codes to {}", companies.len(), csv_path.display()),
                    Err(e) => tracing::warn!("Could not save code list to {}: {}", csv_path.display(), e),
                }
            }
            Ok(_) => tracing::warn!("Quote list returned no codes"),
            Err(e) => tracing::error!("Failed to download A-share code list: {}", e),
        }
    }

    match load_codes_csv(csv_path) {
        Ok(companies) if !companies.is_empty() => companies,
        Ok(_) => {
            tracing::warn!("No codes in {}, falling back to generated ranges", csv_path.display());
            generated_codes()
        }
        Err(e) => {
            tracing::warn!("Could not read {}: {}; falling back to generated ranges", csv_path.display(), e);
            generated_codes()
        }
    }
}
