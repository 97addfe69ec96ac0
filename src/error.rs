use thiserror::Error;

/// Boxed error type surfaced by user-supplied cache loaders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("loader failure: {0}")]
    LoaderFailure(#[source] BoxError),
}

impl CacheError {
    /// True when the error originated in a user-supplied loader rather
    /// than in the cache itself.
    pub fn is_loader_failure(&self) -> bool {
        matches!(self, CacheError::LoaderFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
