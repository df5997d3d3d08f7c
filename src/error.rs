//! Error taxonomy for the reservation engine.
//!
//! Two layers: [`StoreError`] classifies what the durable store reported so the
//! coordinator can tell a retryable serialization failure from everything else,
//! and [`ReserveError`] is what callers of `reserve`/`finalize` see. Fairness and
//! analytics failures never appear here; they are logged and swallowed where
//! they happen.

use axum::http::StatusCode;
use thiserror::Error;

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// PostgreSQL SQLSTATE for `serialization_failure`.
const SQLSTATE_SERIALIZATION_FAILURE: &str = "40001";
/// PostgreSQL SQLSTATE for `deadlock_detected`.
const SQLSTATE_DEADLOCK_DETECTED: &str = "40P01";

/// Failures reported by a [`crate::store::ReservationStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store aborted the transaction to preserve serializability. Retryable.
    #[error("transaction aborted by a concurrent conflicting transaction")]
    Conflict,

    /// The store could not be reached (pool closed, connection refused).
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A write violated a constraint or referenced missing data.
    #[error("invalid store operation: {0}")]
    Invalid(String),

    /// Any other database failure.
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            if code == SQLSTATE_SERIALIZATION_FAILURE || code == SQLSTATE_DEADLOCK_DETECTED {
                return StoreError::Conflict;
            }
            // integrity constraint violations (unique, foreign key, check)
            if code.starts_with("23") {
                return StoreError::Invalid(db.message().to_string());
            }
        }
        let unreachable = matches!(
            err,
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
        );
        if unreachable {
            StoreError::Unavailable(err.to_string())
        } else {
            StoreError::Database(err)
        }
    }
}

/// Outcomes of `reserve`/`finalize` that are not a successful assignment.
///
/// "All problems filled" is intentionally absent: it is a legitimate business
/// outcome and is reported through `ReserveOutcome::AllFilled`.
#[derive(Debug, Error)]
pub enum ReserveError {
    /// The session already used every extension; it must finalize registration.
    #[error("reservation extension limit reached; complete registration to keep this problem")]
    ExtensionLimitReached,

    /// `finalize` was called for a session holding no live reservation.
    #[error("no active reservation for this session")]
    NoActiveReservation,

    /// Serialization conflicts persisted through every retry.
    #[error("reservation could not be committed after {attempts} attempts due to contention")]
    TransactionConflict { attempts: u32 },

    /// A transaction attempt exceeded its deadline.
    #[error("reservation timed out")]
    Timeout,

    /// The caller supplied an unusable session identifier.
    #[error("invalid session id: {0}")]
    InvalidSession(String),

    #[error(transparent)]
    Store(StoreError),
}

impl ReserveError {
    /// Stable machine-readable code surfaced to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            ReserveError::ExtensionLimitReached => "EXTENSION_LIMIT_REACHED",
            ReserveError::NoActiveReservation => "NO_ACTIVE_RESERVATION",
            ReserveError::TransactionConflict { .. } => "TRANSACTION_CONFLICT",
            ReserveError::Timeout => "TIMEOUT",
            ReserveError::InvalidSession(_) => "INVALID_SESSION",
            ReserveError::Store(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ReserveError::ExtensionLimitReached => StatusCode::TOO_MANY_REQUESTS,
            ReserveError::NoActiveReservation => StatusCode::NOT_FOUND,
            ReserveError::TransactionConflict { .. } | ReserveError::Timeout => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ReserveError::InvalidSession(_) => StatusCode::BAD_REQUEST,
            ReserveError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a client. Store internals are replaced by a generic line.
    pub fn public_message(&self) -> String {
        match self {
            ReserveError::Store(_) => "internal error while reserving a problem statement".into(),
            other => other.to_string(),
        }
    }

    /// Transient failures the client may simply retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReserveError::TransactionConflict { .. } | ReserveError::Timeout
        )
    }
}

impl From<StoreError> for ReserveError {
    fn from(err: StoreError) -> Self {
        ReserveError::Store(err)
    }
}
