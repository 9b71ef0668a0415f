//! Core error taxonomy
//!
//! Workers never let these reach the dispatch loop: everything is recovered
//! at the worker boundary, logged, and reflected as "no result". Only
//! configuration failures at startup bubble up.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Settings failed validation at startup. Fatal.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    /// HTTP 5xx / 429 / timeouts / connection errors. The worker yields no
    /// result; retry happens via scheduler sweeps.
    #[error("transient upstream failure: {0}")]
    ExternalTransient(String),

    /// HTTP 4xx other than 429. The item is failed or the stream
    /// blacklisted.
    #[error("permanent upstream failure: {0}")]
    ExternalPermanent(String),

    /// Unique-constraint violation. A dedupe win, not a fault.
    #[error("duplicate row: {0}")]
    IntegrityDuplicate(String),

    /// Target row missing on update.
    #[error("not found: {0}")]
    NotFound(String),

    /// Chunk cache read/write failure; degrades to a miss.
    #[error("cache i/o failure: {0}")]
    CacheIo(#[from] std::io::Error),

    /// Precondition failure (scrape gate closed, item paused, parent
    /// blocked). A silent skip.
    #[error("gate closed: {0}")]
    LogicGate(String),
}

impl CoreError {
    /// Classify an HTTP status the way the retry policy cares about.
    pub fn from_status(status: reqwest::StatusCode, context: &str) -> Self {
        if status.as_u16() == 429 || status.is_server_error() {
            Self::ExternalTransient(format!("{context}: http {status}"))
        } else {
            Self::ExternalPermanent(format!("{context}: http {status}"))
        }
    }

    /// Map a sqlx error, folding unique violations into the benign
    /// duplicate kind.
    pub fn from_sqlx(err: sqlx::Error, context: &str) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            if db_err.is_unique_violation() {
                return Self::IntegrityDuplicate(format!("{context}: {db_err}"));
            }
        }
        if matches!(err, sqlx::Error::RowNotFound) {
            return Self::NotFound(context.to_string());
        }
        Self::ExternalTransient(format!("{context}: {err}"))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ExternalTransient(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        let transient = CoreError::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, "t");
        assert!(transient.is_transient());
        let transient = CoreError::from_status(reqwest::StatusCode::BAD_GATEWAY, "t");
        assert!(transient.is_transient());
        let permanent = CoreError::from_status(reqwest::StatusCode::NOT_FOUND, "t");
        assert!(!permanent.is_transient());
    }
}
