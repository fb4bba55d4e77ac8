//! Repository error type.

use sea_orm::{DbErr, RuntimeErr};
use thiserror::Error;
use uuid::Uuid;

use cadence_core::invoice::InvoiceError;
use cadence_core::ledger::LedgerError;
use cadence_shared::AppError;

/// PostgreSQL `serialization_failure`.
pub const SERIALIZATION_FAILURE: &str = "40001";
/// PostgreSQL `deadlock_detected`.
pub const DEADLOCK_DETECTED: &str = "40P01";
/// PostgreSQL `unique_violation`.
pub const UNIQUE_VIOLATION: &str = "23505";

/// Errors returned by the repositories.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Ledger rule rejected the operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Invoice rule rejected the operation.
    #[error(transparent)]
    Invoice(#[from] InvoiceError),

    /// A version-checked update matched no row.
    #[error("Stale {table} row {id}: modified concurrently")]
    StaleVersion {
        /// Table of the row.
        table: &'static str,
        /// Primary key of the row.
        id: Uuid,
    },

    /// Retries ran out while the rows kept changing underneath.
    #[error("Concurrent modification detected after {attempts} attempts, please retry")]
    ConcurrentModification {
        /// Attempts made.
        attempts: u32,
    },

    /// A stored value cannot be mapped back to the domain.
    #[error("Corrupt {table} row {id}: {detail}")]
    CorruptRow {
        /// Table of the row.
        table: &'static str,
        /// Primary key of the row.
        id: Uuid,
        /// What could not be read.
        detail: String,
    },

    /// Billing configuration cannot be used.
    #[error("Invalid billing configuration: {0}")]
    InvalidConfig(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl RepositoryError {
    /// Builds a `CorruptRow` error.
    pub(crate) fn corrupt(table: &'static str, id: Uuid, detail: impl std::fmt::Display) -> Self {
        Self::CorruptRow {
            table,
            id,
            detail: detail.to_string(),
        }
    }

    /// Returns the error code for API responses.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Ledger(err) => err.error_code(),
            Self::Invoice(err) => err.error_code(),
            Self::StaleVersion { .. } | Self::ConcurrentModification { .. } => {
                "CONCURRENT_MODIFICATION"
            }
            Self::CorruptRow { .. } => "CORRUPT_ROW",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::Database(_) => "DATABASE_ERROR",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Ledger(err) => err.http_status_code(),
            Self::Invoice(err) => err.http_status_code(),
            Self::StaleVersion { .. } | Self::ConcurrentModification { .. } => 409,
            Self::Database(err) if is_transient(err) => 409,
            Self::CorruptRow { .. } | Self::InvalidConfig(_) | Self::Database(_) => 500,
        }
    }

    /// Returns true if running the whole operation again may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(err) => err.is_retryable(),
            Self::Invoice(err) => err.is_retryable(),
            Self::StaleVersion { .. } => true,
            Self::Database(err) => is_transient(err),
            Self::ConcurrentModification { .. } | Self::CorruptRow { .. } | Self::InvalidConfig(_) => {
                false
            }
        }
    }
}

impl From<RepositoryError> for AppError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Ledger(err) => err.into(),
            RepositoryError::Invoice(err) => err.into(),
            RepositoryError::StaleVersion { .. } | RepositoryError::ConcurrentModification { .. } => {
                Self::Conflict(err.to_string())
            }
            RepositoryError::Database(_) => Self::Database(err.to_string()),
            RepositoryError::CorruptRow { .. } | RepositoryError::InvalidConfig(_) => {
                Self::Internal(err.to_string())
            }
        }
    }
}

/// SQLSTATE reported by PostgreSQL, if the error came from the server.
#[must_use]
pub fn sqlstate(err: &DbErr) -> Option<String> {
    let runtime = match err {
        DbErr::Exec(runtime) | DbErr::Query(runtime) | DbErr::Conn(runtime) => runtime,
        _ => return None,
    };
    match runtime {
        RuntimeErr::SqlxError(sqlx::Error::Database(db)) => db.code().map(|code| code.into_owned()),
        _ => None,
    }
}

/// Serialization failures, deadlocks and unique violations clear up when
/// the transaction is run again.
#[must_use]
pub fn is_transient(err: &DbErr) -> bool {
    sqlstate(err).is_some_and(|code| {
        matches!(
            code.as_str(),
            SERIALIZATION_FAILURE | DEADLOCK_DETECTED | UNIQUE_VIOLATION
        )
    })
}
