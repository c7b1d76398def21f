//! Opaque cursors and the page envelope shared by listing, association reads
//! and search. A cursor is a number rendered as text: the last id seen for
//! id-ordered listings, or an offset for everything else.

use serde::Serialize;

use crate::error::{CrmockError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NextPage {
    pub after: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Paging {
    pub next: NextPage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub results: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paging: Option<Paging>,
}

impl<T> Page<T> {
    pub fn new(results: Vec<T>, next: Option<String>) -> Self {
        Self {
            results,
            paging: next.map(|after| Paging {
                next: NextPage { after },
            }),
        }
    }
    pub fn next_cursor(&self) -> Option<&str> {
        self.paging.as_ref().map(|p| p.next.after.as_str())
    }
    pub fn len(&self) -> usize {
        self.results.len()
    }
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

fn invalid(cursor: &str) -> CrmockError {
    CrmockError::validation(format!("'{cursor}' is not a valid paging cursor"))
}

/// Last id seen; no cursor starts before the first id.
pub fn decode_after_id(after: Option<&str>) -> Result<i64> {
    match after {
        None => Ok(0),
        Some(cursor) => match cursor.trim().parse::<i64>() {
            Ok(id) if id >= 0 => Ok(id),
            _ => Err(invalid(cursor)),
        },
    }
}

pub fn decode_offset(after: Option<&str>) -> Result<usize> {
    match after {
        None => Ok(0),
        Some(cursor) => cursor.trim().parse::<usize>().map_err(|_| invalid(cursor)),
    }
}

pub fn encode(position: impl ToString) -> String {
    position.to_string()
}

/// Applies the default and rejects anything outside `1..=max`.
pub fn check_limit(limit: Option<usize>, default: usize, max: usize) -> Result<usize> {
    match limit.unwrap_or(default) {
        0 => Err(CrmockError::validation("limit must be at least 1")),
        n if n > max => Err(CrmockError::validation(format!(
            "limit {n} exceeds the maximum of {max}"
        ))),
        n => Ok(n),
    }
}
