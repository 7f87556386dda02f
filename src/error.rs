use std::io;

use thiserror::Error;

/// Public error taxonomy for the engine.
///
/// Every fallible engine operation returns one of these variants so
/// callers can branch without string matching. Internal bookkeeping
/// failures (audit-log appends) are logged and never surfaced here.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The uploaded file could not be parsed in the declared format.
    #[error("unable to read '{file}' as {format}: {reason}")]
    Format {
        file: String,
        format: String,
        reason: String,
    },

    /// Column sets differ on a direct merge. `missing` columns exist in
    /// the canonical table but not the incoming one; `unexpected` is the
    /// reverse.
    #[error("column headers do not match (missing: {missing:?}, unexpected: {unexpected:?})")]
    SchemaMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    /// Unknown project, upload id, or column.
    #[error("{0} not found")]
    NotFound(String),

    /// An operation requires data the table does not have, e.g. an
    /// aggregation without a value column.
    #[error("{0}")]
    MissingData(String),

    /// Persisted storage could not be read or written.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl EngineError {
    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }

    pub fn missing_data(what: impl Into<String>) -> Self {
        EngineError::MissingData(what.into())
    }

    pub fn storage(context: impl AsRef<str>, err: impl std::fmt::Display) -> Self {
        EngineError::Storage(format!("{}: {}", context.as_ref(), err))
    }
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
