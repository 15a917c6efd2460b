// src/extractors/mod.rs
pub mod orgid;

// Re-export key extraction types for convenience
pub use orgid::{
    DomPattern,
    OrgIdStrategy,
    PageSourceRegex,
    Resolved,
    SearchRedirectUrl,
    StrategySet,
    TopSearchApi,
};
