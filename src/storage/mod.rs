// src/storage/mod.rs
pub mod documents;
pub mod mapping;

pub use documents::StorageManager;
pub use mapping::{MappingEntry, MappingStore};
