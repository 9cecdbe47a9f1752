use thiserror::Error;

use crate::identity::NormalizedKey;
use crate::loader::CollectionName;

/// A single collection failed to fetch or decode. Never affects sibling collections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("no source configured")]
    NotConfigured,
}

impl From<reqwest::Error> for LoadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            LoadError::Malformed(err.to_string())
        } else {
            LoadError::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LoadError {
    fn from(err: serde_json::Error) -> Self {
        LoadError::Malformed(err.to_string())
    }
}

impl From<csv::Error> for LoadError {
    fn from(err: csv::Error) -> Self {
        LoadError::Malformed(err.to_string())
    }
}

impl From<std::io::Error> for LoadError {
    fn from(err: std::io::Error) -> Self {
        LoadError::Io(err.to_string())
    }
}

/// A section of the dashboard cannot be computed because a collection it needs failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{collection} is unavailable: {cause}")]
pub struct Unavailable {
    pub collection: CollectionName,
    pub cause: LoadError,
}

/// Why a record could not be joined. The record is kept and flagged, never dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JoinWarning {
    #[error("record has no identity")]
    MissingIdentity,

    #[error("no match for {0}")]
    NoMatch(NormalizedKey),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("negative count: present={present}, total={total}")]
    NegativeCount { present: i64, total: i64 },

    #[error("present count {present} exceeds total {total}")]
    PresentExceedsTotal { present: i64, total: i64 },
}
