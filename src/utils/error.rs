// src/utils/error.rs
use thiserror::Error;

// Failures of the underlying transport. All of these are transient from the
// point of view of the retry controller except `NotFound`.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Network request failed: {0}")]
    Network(#[from] reqwest::Error), // Automatically convert reqwest errors

    #[error("Operation exceeded its {0:?} deadline")]
    Timeout(std::time::Duration),

    #[error("Request blocked by the portal ({0})")]
    Blocked(String), // 403 / 429 / challenge page instead of content

    #[error("HTTP error: {0}")]
    Http(reqwest::StatusCode),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Empty response from {0}")]
    EmptyResponse(String),

    #[error("Transport session is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Could not lock {0}: {1}")]
    Locked(String, std::io::Error),
}

// Error taxonomy of resolution and download operations
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("All extraction strategies failed for {stock_code}: {}", reasons.join("; "))]
    ResolutionExhausted {
        stock_code: String,
        reasons: Vec<String>,
    },

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("No data: {0}")]
    NoData(String),

    #[error("Gave up after {attempts} attempts, last error: {last}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        last: Box<FetchError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to parse portal response: {0}")]
    Parse(String),
}

impl FetchError {
    /// Whether another attempt on a fresh session may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(TransportError::NotFound(_)) => false,
            FetchError::Transport(_) => true,
            FetchError::ResolutionExhausted { .. } => true,
            // Garbled JSON usually means a challenge page was served
            FetchError::Parse(_) => true,
            FetchError::MalformedInput(_)
            | FetchError::NoData(_)
            | FetchError::RetryExhausted { .. }
            | FetchError::Cancelled
            | FetchError::Storage(_) => false,
        }
    }

    /// The innermost error behind a `RetryExhausted` chain.
    pub fn last_cause(&self) -> &FetchError {
        match self {
            FetchError::RetryExhausted { last, .. } => last.last_cause(),
            other => other,
        }
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error), // Automatically convert IO errors

    #[error("{0}")]
    Fetch(#[from] FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}
