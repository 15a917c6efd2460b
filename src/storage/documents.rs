// src/storage/documents.rs
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use crate::cninfo::models::DocumentRecord;
use crate::stock::StockCode;
use crate::utils::error::StorageError;

/// Places downloaded documents under `<base_dir>/<StockCode>/`.
#[derive(Debug, Clone)]
pub struct StorageManager {
    base_dir: PathBuf,
}

impl StorageManager {
    /// Creates a new StorageManager with the specified base directory
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Result<Self, StorageError> {
        let base_path = base_dir.as_ref().to_path_buf();

        if !base_path.exists() {
            fs::create_dir_all(&base_path).map_err(StorageError::IoError)?;
        }

        Ok(Self { base_dir: base_path })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn stock_dir(&self, code: &StockCode) -> PathBuf {
        self.base_dir.join(code.as_str())
    }

    pub fn ensure_stock_dir(&self, code: &StockCode) -> Result<PathBuf, StorageError> {
        let dir = self.stock_dir(code);
        fs::create_dir_all(&dir).map_err(StorageError::IoError)?;
        Ok(dir)
    }
}

pub fn document_path(dir: &Path, record: &DocumentRecord) -> PathBuf {
    dir.join(&record.local_filename)
}

/// Whether a previous run already placed this document.
pub fn is_present(dir: &Path, record: &DocumentRecord) -> bool {
    fs::metadata(document_path(dir, record))
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

/// Writes the document through a temp file in the same directory and renames
/// it into place, so an interrupted write never leaves a partial file under
/// the final name.
pub fn save_document(dir: &Path, record: &DocumentRecord, content: &[u8]) -> Result<PathBuf, StorageError> {
    fs::create_dir_all(dir).map_err(StorageError::IoError)?;
    let target = document_path(dir, record);

    let mut tmp = tempfile::Builder::new()
        .prefix(".part-")
        .tempfile_in(dir)
        .map_err(StorageError::IoError)?;
    tmp.write_all(content).map_err(StorageError::IoError)?;
    tmp.as_file().sync_all().map_err(StorageError::IoError)?;
    tmp.persist(&target).map_err(|e| StorageError::IoError(e.error))?;

    tracing::info!("Saved {} ({} bytes)", target.display(), content.len());
    Ok(target)
}
