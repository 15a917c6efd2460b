// src/stock.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use crate::utils::error::FetchError;

/// A six-digit A-share code, e.g. `300010`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StockCode(String);

impl StockCode {
    /// Validates a code before anything touches the network. Surrounding
    /// whitespace is rejected; callers trim at the input boundary.
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        if raw.len() == 6 && raw.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(raw.to_string()))
        } else {
            Err(FetchError::MalformedInput(format!(
                "stock code must be exactly 6 ASCII digits, got {:?}",
                raw
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Listing column on the portal: Shanghai codes start with 5, 6 or 9.
    pub fn exchange_column(&self) -> &'static str {
        match self.0.as_bytes()[0] {
            b'5' | b'6' | b'9' => "sse",
            _ => "szse",
        }
    }
}

impl fmt::Display for StockCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for StockCode {
    type Error = FetchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<StockCode> for String {
    fn from(code: StockCode) -> Self {
        code.0
    }
}

/// Opaque numeric identifier the portal assigns to an organization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(String);

impl OrganizationId {
    pub fn parse(raw: &str) -> Result<Self, FetchError> {
        let id = raw.trim();
        if !id.is_empty() && id.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(id.to_string()))
        } else {
            Err(FetchError::MalformedInput(format!("organization id must be numeric, got {:?}", raw)))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
