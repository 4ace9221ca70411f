use rust_decimal::Decimal;
use sea_orm::error::DbErr;
use sea_orm::TransactionError;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::services::stock_ledger::Holder;

/// Error kinds raised by the inventory core.
///
/// Every error aborts its enclosing transaction; no partial ledger writes are
/// ever committed. `RetryableConflict` is the only kind a caller may retry
/// without re-validating business state.
#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Insufficient stock for material {material_id} at {holder}: available {available}, requested {requested}")]
    InsufficientStock {
        material_id: Uuid,
        holder: Holder,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Duplicate movement: idempotency key {0} already applied")]
    DuplicateMovement(String),

    #[error("Integrity: {0}")]
    Integrity(String),

    #[error("Retryable conflict: {0}")]
    RetryableConflict(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),
}

impl InventoryError {
    /// Maps a database error, classifying backend lock/serialization failures
    /// as retryable so callers can distinguish them from real faults.
    pub fn db_error(err: DbErr) -> Self {
        if crate::db::is_retryable(&err) {
            InventoryError::RetryableConflict(err.to_string())
        } else {
            InventoryError::DatabaseError(err)
        }
    }

    /// True only for errors safe to retry without re-deriving intent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, InventoryError::RetryableConflict(_))
    }
}

impl From<validator::ValidationErrors> for InventoryError {
    fn from(err: validator::ValidationErrors) -> Self {
        InventoryError::ValidationError(err.to_string())
    }
}

/// Unwraps sea-orm's transaction wrapper back into the inner error.
impl From<TransactionError<InventoryError>> for InventoryError {
    fn from(err: TransactionError<InventoryError>) -> Self {
        match err {
            TransactionError::Connection(db_err) => InventoryError::db_error(db_err),
            TransactionError::Transaction(inner) => inner,
        }
    }
}

/// Wire-friendly error classification, used by callers that need to map core
/// errors onto their own presentation without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    InsufficientStock,
    Conflict,
    DuplicateMovement,
    Integrity,
    RetryableConflict,
    Validation,
    Event,
    Database,
}

impl InventoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InventoryError::NotFound(_) => ErrorKind::NotFound,
            InventoryError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
            InventoryError::Conflict(_) => ErrorKind::Conflict,
            InventoryError::DuplicateMovement(_) => ErrorKind::DuplicateMovement,
            InventoryError::Integrity(_) => ErrorKind::Integrity,
            InventoryError::RetryableConflict(_) => ErrorKind::RetryableConflict,
            InventoryError::ValidationError(_) => ErrorKind::Validation,
            InventoryError::EventError(_) => ErrorKind::Event,
            InventoryError::DatabaseError(_) => ErrorKind::Database,
        }
    }
}
