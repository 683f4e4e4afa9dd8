//! Store Error Types

use thiserror::Error;

/// Storage failure, classified so engines can branch on it
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found")]
    NotFound,

    /// Lock wait exceeded, deadlock victim, serialization conflict or pool
    /// exhausted. Safe for the caller to retry.
    #[error("Store busy: {0}")]
    Busy(String),

    #[error("Duplicate key: {0}")]
    Duplicate(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),
}

// SQLSTATE codes, see PostgreSQL appendix A
const UNIQUE_VIOLATION: &str = "23505";
const CHECK_VIOLATION: &str = "23514";
const FOREIGN_KEY_VIOLATION: &str = "23503";
const NOT_NULL_VIOLATION: &str = "23502";
const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
const LOCK_NOT_AVAILABLE: &str = "55P03";
const QUERY_CANCELED: &str = "57014";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::PoolTimedOut => StoreError::Busy("connection pool timed out".to_string()),
            sqlx::Error::Database(ref db_err) => {
                let code = db_err.code().map(|c| c.into_owned());
                let detail = db_err
                    .constraint()
                    .map(str::to_string)
                    .unwrap_or_else(|| db_err.message().to_string());
                match code.as_deref() {
                    Some(UNIQUE_VIOLATION) => StoreError::Duplicate(detail),
                    Some(CHECK_VIOLATION | FOREIGN_KEY_VIOLATION | NOT_NULL_VIOLATION) => {
                        StoreError::Constraint(detail)
                    }
                    Some(
                        SERIALIZATION_FAILURE | DEADLOCK_DETECTED | LOCK_NOT_AVAILABLE
                        | QUERY_CANCELED,
                    ) => StoreError::Busy(db_err.message().to_string()),
                    _ => StoreError::Database(err),
                }
            }
            other => StoreError::Database(other),
        }
    }
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, StoreError::Busy(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = StoreError::from(sqlx::Error::RowNotFound);
        assert!(err.is_not_found());
        assert!(!err.is_busy());
    }

    #[test]
    fn test_pool_timeout_maps_to_busy() {
        assert!(StoreError::from(sqlx::Error::PoolTimedOut).is_busy());
    }

    #[test]
    fn test_other_errors_stay_database() {
        let err = StoreError::from(sqlx::Error::PoolClosed);
        assert!(matches!(err, StoreError::Database(_)));
    }
}
