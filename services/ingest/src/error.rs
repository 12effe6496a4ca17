//! Error taxonomy for ingestion runs
//!
//! Fatal conditions are `IngestError` values. Per-row problems are not
//! errors: they travel as `RowRejection` (see `normalize`) and as the
//! `failed` counter of a write.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    /// Required settings absent or unparsable. Raised before any I/O.
    #[error("configuration error: {}", describe_config_problems(.missing, .invalid))]
    Configuration {
        missing: Vec<String>,
        invalid: Vec<String>,
    },

    #[error("source file not found: {}", .path.display())]
    SourceMissing { path: PathBuf },

    #[error("source format error in {dataset} ({}): {reason}", .path.display())]
    SourceFormat {
        dataset: String,
        path: PathBuf,
        reason: String,
    },

    #[error("store unreachable: {0}")]
    Connectivity(String),

    #[error("store error while writing {table}: {detail}")]
    Store { table: String, detail: String },
}

impl IngestError {
    /// Whether the error ends the whole run rather than one dataset.
    pub fn is_run_fatal(&self) -> bool {
        matches!(
            self,
            IngestError::Configuration { .. } | IngestError::Connectivity(_)
        )
    }
}

fn describe_config_problems(missing: &[String], invalid: &[String]) -> String {
    let mut parts = Vec::new();
    if !missing.is_empty() {
        parts.push(format!("missing required keys [{}]", missing.join(", ")));
    }
    if !invalid.is_empty() {
        parts.push(format!("invalid values [{}]", invalid.join("; ")));
    }
    parts.join(", ")
}

/// Failures reported by an `EntityStore` backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Integrity violation other than the natural-key conflict
    /// (not-null, foreign key, check).
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("query failed: {0}")]
    Query(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let integrity = db.code().map(|c| c.starts_with("23")).unwrap_or(false);
                if integrity {
                    StoreError::Constraint(db.message().to_string())
                } else {
                    StoreError::Query(db.message().to_string())
                }
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unreachable(err.to_string()),
            _ => StoreError::Query(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_lists_every_missing_key() {
        let err = IngestError::Configuration {
            missing: vec!["DB_HOST".to_string(), "DB_PASSWORD".to_string()],
            invalid: vec![],
        };
        let msg = err.to_string();
        assert!(msg.contains("DB_HOST"));
        assert!(msg.contains("DB_PASSWORD"));
        assert!(!msg.contains("invalid"));
    }

    #[test]
    fn test_configuration_error_reports_invalid_values() {
        let err = IngestError::Configuration {
            missing: vec![],
            invalid: vec!["DB_PORT='abc' is not a port number".to_string()],
        };
        assert!(err.to_string().contains("DB_PORT='abc'"));
    }

    #[test]
    fn test_run_fatal_classification() {
        assert!(IngestError::Connectivity("refused".into()).is_run_fatal());
        assert!(!IngestError::SourceMissing {
            path: PathBuf::from("x.csv")
        }
        .is_run_fatal());
    }

    #[test]
    fn test_pool_timeout_maps_to_unreachable() {
        let err: StoreError = sqlx::Error::PoolTimedOut.into();
        assert!(matches!(err, StoreError::Unreachable(_)));
    }
}
