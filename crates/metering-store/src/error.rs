//! Store error types.

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Storage layer errors.
///
/// Store failures are transient from the caller's point of view: the
/// webhook path reports them retryable and the chat path denies the turn
/// rather than risk double counting.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Could not reach or initialize the backing store.
    #[error("Store connection error: {0}")]
    Connection(String),

    /// A query failed at the backend.
    #[error("Store query error: {0}")]
    Query(String),

    /// A stored value could not be decoded into its domain type.
    #[error("Corrupt stored value: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Whether the caller should expect a retry to succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Query(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                Self::Connection(err.to_string())
            }
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                Self::Corrupt(err.to_string())
            }
            other => Self::Query(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryability() {
        assert!(StoreError::Connection("down".into()).is_retryable());
        assert!(StoreError::Query("deadlock".into()).is_retryable());
        assert!(!StoreError::Corrupt("bad tier".into()).is_retryable());
    }
}
