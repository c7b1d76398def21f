//! Batch envelopes. Items succeed or fail on their own; only errors that are
//! not recoverable abort the whole batch.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::error::{CrmockError, ErrorKind, Result};

pub const MAX_RECORD_BATCH: usize = 100;
pub const MAX_ASSOCIATION_CREATE: usize = 2000;
pub const MAX_ASSOCIATION_READ: usize = 1000;
pub const MAX_ASSOCIATION_ARCHIVE: usize = 2000;

/// Checked before storage is touched.
pub fn check_batch_size(len: usize, max: usize, operation: &str) -> Result<()> {
    if len > max {
        return Err(CrmockError::validation(format!(
            "{operation} accepts at most {max} inputs, got {len}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Complete,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchError {
    /// Position of the failing input.
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse<T> {
    pub status: BatchStatus,
    pub results: Vec<T>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<BatchError>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl<T> BatchResponse<T> {
    pub fn num_errors(&self) -> usize {
        self.errors.len()
    }
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

pub(crate) struct BatchCollector<T> {
    operation: &'static str,
    started_at: DateTime<Utc>,
    results: Vec<T>,
    errors: Vec<BatchError>,
}

impl<T> BatchCollector<T> {
    pub(crate) fn new(operation: &'static str, started_at: DateTime<Utc>) -> Self {
        Self {
            operation,
            started_at,
            results: Vec::new(),
            errors: Vec::new(),
        }
    }
    /// Files the outcome of one item. Unrecoverable errors are handed back so
    /// the caller can abort the batch.
    pub(crate) fn record(&mut self, index: usize, id: Option<String>, outcome: Result<T>) -> Result<()> {
        match outcome {
            Ok(result) => {
                self.results.push(result);
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                warn!(operation = self.operation, index, id = ?id, error = %e, "batch item failed");
                self.errors.push(BatchError {
                    index,
                    id,
                    kind: e.kind(),
                    message: e.to_string(),
                });
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
    pub(crate) fn finish(self, completed_at: DateTime<Utc>) -> BatchResponse<T> {
        BatchResponse {
            status: BatchStatus::Complete,
            results: self.results,
            errors: self.errors,
            started_at: self.started_at,
            completed_at,
        }
    }
}
