// src/utils/mod.rs
pub mod error;
pub mod logging;
pub mod html_debug;

pub use error::{AppError, FetchError, StorageError, TransportError}; // Re-export error types for convenience
