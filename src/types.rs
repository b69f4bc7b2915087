use std::fmt;
use std::str::FromStr;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::PgCompatError;

/// Values that can be read from a row or bound as query parameters.
///
/// Both backends speak the same wire types, so one enum serves either of them:
/// ```rust
/// use pg_compat_middleware::prelude::*;
///
/// let params = vec![
///     RowValues::Int(1),
///     RowValues::Text("alice".into()),
///     RowValues::Bool(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value
    Bool(bool),
    /// Timestamp value
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// JSON value
    JSON(JsonValue),
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<&bool> {
        if let RowValues::Bool(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let RowValues::Timestamp(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let RowValues::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }
}

/// The backend a [`crate::ConnectConfig`] selects.
///
/// `libpq` is accepted as an alias of `postgres` and normalized during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Driver {
    /// `deadpool-postgres` pool backend
    Deadpool,
    /// Standard backend: `bb8`-managed `tokio_postgres` clients
    Postgres,
    /// Alias of [`Driver::Postgres`]
    Libpq,
}

impl Driver {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Driver::Deadpool => "deadpool",
            Driver::Postgres => "postgres",
            Driver::Libpq => "libpq",
        }
    }

    /// Collapse aliases onto the backend they stand for.
    #[must_use]
    pub fn canonical(self) -> Self {
        match self {
            Driver::Libpq => Driver::Postgres,
            other => other,
        }
    }
}

impl FromStr for Driver {
    type Err = PgCompatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "deadpool" => Ok(Driver::Deadpool),
            "postgres" => Ok(Driver::Postgres),
            "libpq" => Ok(Driver::Libpq),
            other => Err(PgCompatError::UnsupportedDriver(other.to_string())),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
