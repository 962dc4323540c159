use sea_orm::error::DbErr;
use serde::Serialize;

/// Errors surfaced by every ledger operation.
///
/// Domain failures are detected before or during the transaction and leave the
/// ledger untouched. `DatabaseError` is surfaced unchanged so the caller can decide
/// whether to retry the whole operation.
#[derive(Debug, thiserror::Error, Serialize)]
pub enum LedgerError {
    #[error(
        "Insufficient stock for variant {variant_id} at location {location_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        location_id: i64,
        variant_id: i64,
        requested: i64,
        available: i64,
    },

    #[error("No recipe defined for variant {0}")]
    NoRecipeDefined(i64),

    #[error("Invalid location {location_id}: {reason}")]
    InvalidLocation { location_id: i64, reason: String },

    #[error("Invalid variant {variant_id}: {reason}")]
    InvalidVariant { variant_id: i64, reason: String },

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(String),

    #[error("Order {order_id} cannot be cancelled in status {status}")]
    OrderNotCancellable { order_id: i64, status: String },

    #[error("Purchase order {po_id} is closed ({status})")]
    PurchaseOrderClosed { po_id: i64, status: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Export error: {0}")]
    ExportError(String),

    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        DbErr,
    ),
}

impl From<validator::ValidationErrors> for LedgerError {
    fn from(err: validator::ValidationErrors) -> Self {
        LedgerError::ValidationError(err.to_string())
    }
}

pub trait IntoDbErr {
    fn into_db_err(self) -> DbErr;
}

impl IntoDbErr for DbErr {
    fn into_db_err(self) -> DbErr {
        self
    }
}

impl IntoDbErr for String {
    fn into_db_err(self) -> DbErr {
        DbErr::Custom(self)
    }
}

impl LedgerError {
    /// Wraps any database-flavoured error.
    pub fn db_error<E: IntoDbErr>(error: E) -> Self {
        LedgerError::DatabaseError(error.into_db_err())
    }

    pub fn invalid_location(location_id: i64, reason: impl Into<String>) -> Self {
        LedgerError::InvalidLocation {
            location_id,
            reason: reason.into(),
        }
    }

    pub fn invalid_variant(variant_id: i64, reason: impl Into<String>) -> Self {
        LedgerError::InvalidVariant {
            variant_id,
            reason: reason.into(),
        }
    }

    /// Stable machine-readable code, used for metric labels and CLI output.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::NoRecipeDefined(_) => "no_recipe_defined",
            Self::InvalidLocation { .. } => "invalid_location",
            Self::InvalidVariant { .. } => "invalid_variant",
            Self::InvalidQuantity(_) => "invalid_quantity",
            Self::OrderNotCancellable { .. } => "order_not_cancellable",
            Self::PurchaseOrderClosed { .. } => "purchase_order_closed",
            Self::NotFound(_) => "not_found",
            Self::InvalidInput(_) => "invalid_input",
            Self::Conflict(_) => "conflict",
            Self::ValidationError(_) => "validation_error",
            Self::ExportError(_) => "export_error",
            Self::Timeout { .. } => "timeout",
            Self::DatabaseError(_) => "database_error",
        }
    }

    /// True for failures caused by the request itself rather than the store.
    pub fn is_domain_error(&self) -> bool {
        !matches!(
            self,
            Self::DatabaseError(_) | Self::Timeout { .. } | Self::ExportError(_)
        )
    }
}
