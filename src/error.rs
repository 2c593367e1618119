//! Error taxonomy for the retrieval-and-decay engine.
//!
//! | Variant | Raised When |
//! |---------|-------------|
//! | `NotFound` | An explicit operation names a concept, episode or entity that does not exist |
//! | `StoreUnavailable` | The database file is missing, corrupt, not a database, or stays locked past the retry budget |
//! | `EmbeddingUnavailable` | The embedding provider fails or is disabled; recall recovers locally |
//! | `InvalidConfig` | A configuration value is out of range at load time |
//! | `InvalidInput` | A caller passes a malformed argument (empty query, bad enum string) |
//! | `OperationFailed` | Any other storage or serialization failure |

use rusqlite::ErrorCode;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// Unknown id. Point lookups return `Ok(None)` instead; this variant is for
    /// operations that cannot proceed without the record.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Fatal store condition, surfaced to the caller.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Provider failure or missing vector. Recall degrades to keyword matching.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// Rejected at configuration time, never at call time.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed { operation: String, cause: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Classify a rusqlite error raised while running `operation`.
    ///
    /// Corruption and "not a database" are fatal and map to `StoreUnavailable`;
    /// everything else keeps its cause for logging.
    pub(crate) fn from_sqlite(operation: &str, err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseCorrupt)
            | Some(ErrorCode::NotADatabase)
            | Some(ErrorCode::CannotOpen) => {
                Self::StoreUnavailable(format!("{operation}: {err}"))
            }
            _ => Self::OperationFailed {
                operation: operation.to_string(),
                cause: err.to_string(),
            },
        }
    }

    /// Whether the error is transient lock contention worth retrying.
    pub(crate) fn is_busy(err: &rusqlite::Error) -> bool {
        matches!(
            err.sqlite_error_code(),
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::OperationFailed {
            operation: "serialize".to_string(),
            cause: err.to_string(),
        }
    }
}
