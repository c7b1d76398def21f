use std::sync::PoisonError;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CrmockError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Property values were not valid: {value:?} is not a valid {expected} for property {property:?}")]
    PropertyValue {
        property: String,
        value: String,
        expected: &'static str,
    },
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Config error: {0}")]
    Config(String),
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Data corruption: {message}")]
    DataCorruption { message: String },
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

/// The error kinds callers of the core are expected to distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    Validation,
    Conflict,
    Internal,
}

impl CrmockError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }
    pub fn validation(what: impl Into<String>) -> Self {
        Self::Validation(what.into())
    }
    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) | Self::PropertyValue { .. } => ErrorKind::Validation,
            Self::Conflict(_) => ErrorKind::Conflict,
            _ => ErrorKind::Internal,
        }
    }
    /// Recoverable errors are reported against a single item; anything else
    /// fails the whole request.
    pub fn is_recoverable(&self) -> bool {
        self.kind() != ErrorKind::Internal
    }
}

pub type Result<T> = std::result::Result<T, CrmockError>;

// Helper conversions
impl From<rusqlite::Error> for CrmockError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Persistence(e.to_string())
    }
}
impl From<serde_json::Error> for CrmockError {
    fn from(e: serde_json::Error) -> Self {
        Self::DataCorruption {
            message: e.to_string(),
        }
    }
}
impl From<config::ConfigError> for CrmockError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
impl<T> From<PoisonError<T>> for CrmockError {
    fn from(e: PoisonError<T>) -> Self {
        Self::Lock(e.to_string())
    }
}
