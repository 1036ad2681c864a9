//! Error types for galley data store operations.

/// Errors that can occur during data store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataStoreError {
    /// The requested row was not found or is soft-deleted.
    NotFound,
    /// A named database constraint rejected the statement.
    ///
    /// Carries the constraint (or unique index) name reported by Postgres.
    Constraint(String),
    /// JSON serialization or deserialization failed.
    SerializationError(String),
    /// An internal storage system error occurred.
    Internal(String),
}

impl std::fmt::Display for DataStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "Row not found in data store"),
            Self::Constraint(name) => write!(f, "Constraint violated: {}", name),
            Self::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl From<sqlx::Error> for DataStoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => DataStoreError::NotFound,
            sqlx::Error::Database(ref db_err)
                if db_err.is_unique_violation()
                    || db_err.is_foreign_key_violation()
                    || db_err.is_check_violation() =>
            {
                DataStoreError::Constraint(db_err.constraint().unwrap_or_default().to_string())
            }
            _ => DataStoreError::Internal(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for DataStoreError {
    fn from(e: serde_json::Error) -> Self {
        DataStoreError::SerializationError(e.to_string())
    }
}

impl std::error::Error for DataStoreError {}
