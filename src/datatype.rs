// used for timestamps in the database
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

// used when parsing a declared type name
use std::fmt;
use std::str::FromStr;

use crate::error::{CrmockError, Result};

/// The declared value type of a property. Values are always stored as text,
/// the type only decides what text is accepted and how it compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyType {
    Bool,
    Enumeration,
    Date,
    Datetime,
    String,
    Number,
}

/// How the search compiler compares values of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Numeric,
    Temporal,
    Text,
}

impl PropertyType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Enumeration => "enumeration",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::String => "string",
            Self::Number => "number",
        }
    }
    pub fn comparison(&self) -> Comparison {
        match self {
            Self::Number => Comparison::Numeric,
            Self::Date | Self::Datetime => Comparison::Temporal,
            _ => Comparison::Text,
        }
    }
    /// Checks a scalar value against the type and returns the text that gets
    /// stored. Enumeration options are checked by the property catalog.
    pub fn normalize(&self, value: &str) -> Option<String> {
        match self {
            Self::String | Self::Enumeration => Some(value.to_string()),
            Self::Number => {
                let trimmed = value.trim();
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|n| n.is_finite())
                    .map(|_| trimmed.to_string())
            }
            Self::Bool => match value.trim().to_ascii_lowercase().as_str() {
                "true" => Some("true".to_string()),
                "false" => Some("false".to_string()),
                _ => None,
            },
            Self::Date => parse_date(value).map(|d| d.format("%Y-%m-%d").to_string()),
            Self::Datetime => parse_datetime(value).map(|t| format_timestamp(&t)),
        }
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PropertyType {
    type Err = CrmockError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "bool" => Ok(Self::Bool),
            "enumeration" => Ok(Self::Enumeration),
            "date" => Ok(Self::Date),
            "datetime" => Ok(Self::Datetime),
            "string" => Ok(Self::String),
            "number" => Ok(Self::Number),
            other => Err(CrmockError::validation(format!(
                "unknown property type '{other}'"
            ))),
        }
    }
}

fn parse_epoch_millis(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit() || b == b'-') {
        return None;
    }
    trimmed
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

/// Accepts RFC 3339, a bare `YYYY-MM-DD` (midnight UTC) or epoch milliseconds.
pub fn parse_datetime(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if let Some(t) = parse_epoch_millis(trimmed) {
        return Some(t);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|t| t.and_utc())
}

/// Accepts `YYYY-MM-DD` or epoch milliseconds.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if let Some(t) = parse_epoch_millis(trimmed) {
        return Some(t.date_naive());
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()
}

/// The one text form timestamps take in the database and in system properties.
pub fn format_timestamp(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| CrmockError::DataCorruption {
            message: format!("unreadable timestamp '{text}': {e}"),
        })
}
