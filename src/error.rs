use thiserror::Error;

/// Errors surfaced by the counting core.
///
/// Storage failures are never turned into a made-up count: they always come
/// back to the caller as [`CounterError::StorageUnavailable`].
#[derive(Debug, Error)]
pub enum CounterError {
    /// The datastore could not be reached, timed out, or answered with
    /// something we could not read. Whether the mutation was applied is
    /// unknown to the caller.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// No row exists for this key.
    #[error("no counter for key `{0}`")]
    NotFound(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl CounterError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

impl From<redis::RedisError> for CounterError {
    fn from(err: redis::RedisError) -> Self {
        Self::StorageUnavailable(Box::new(err))
    }
}

impl From<tokio::time::error::Elapsed> for CounterError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::StorageUnavailable(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CounterError>;

#[test]
fn redis_errors_are_unavailable() {
    let err: CounterError =
        redis::RedisError::from((redis::ErrorKind::IoError, "connection refused")).into();
    assert!(err.is_unavailable());
    assert!(err.to_string().starts_with("storage unavailable"));
}

#[test]
fn not_found_names_the_key() {
    let err = CounterError::NotFound("/about".to_string());
    assert!(!err.is_unavailable());
    assert_eq!(err.to_string(), "no counter for key `/about`");
}
