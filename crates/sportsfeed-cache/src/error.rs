use std::sync::Arc;

use thiserror::Error;

use crate::types::CacheName;

/// An error reported by the data source when fetching a single culture of an item.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The response could not be mapped onto the requested entity.
    #[error("mapping failed: {0}")]
    Mapping(String),
    /// The response could not be deserialized.
    #[error("deserialization failed: {0}")]
    Deserialization(String),
    /// The remote endpoint could not be reached, or answered with an error.
    #[error("communication failed: {0}")]
    Communication(String),
    /// The request was cancelled before a response arrived.
    #[error("the request was cancelled")]
    Cancelled,
    /// The data source was shut down.
    #[error("the data source has been disposed")]
    Disposed,
    /// Anything else. Propagated to callers unchanged.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FetchError {
    /// Errors that say the upstream item does not exist in a usable form.
    pub fn is_missing_data(&self) -> bool {
        matches!(self, Self::Mapping(_) | Self::Deserialization(_))
    }

    /// Errors that only mean "try again later".
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Disposed)
    }
}

/// The error type of all cache operations.
///
/// This is `Clone` so the outcome of a coalesced fetch can be handed to every waiting caller.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// The caller passed an argument the cache cannot work with.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The item could not be provided, because the data source does not know it.
    #[error("item {id} not found in cache {cache}")]
    NotFound {
        id: String,
        cache: CacheName,
        #[source]
        source: Option<Arc<FetchError>>,
    },
    /// An unclassified data source error, passed through as is.
    #[error(transparent)]
    Fetch(Arc<FetchError>),
    /// The cache was disposed and does not accept any more work.
    #[error("cache {0} has been disposed")]
    Disposed(CacheName),
    /// A coalesced fetch ended without producing a result.
    #[error("{0} fetch was interrupted")]
    Interrupted(CacheName),
}

impl CacheError {
    pub fn not_found(id: impl ToString, cache: CacheName) -> Self {
        Self::NotFound {
            id: id.to_string(),
            cache,
            source: None,
        }
    }

    /// Converts a data source error, turning the kinds accepted by `is_missing` into
    /// [`NotFound`](Self::NotFound) and passing everything else through.
    pub fn from_fetch(
        err: FetchError,
        id: impl ToString,
        cache: CacheName,
        is_missing: impl FnOnce(&FetchError) -> bool,
    ) -> Self {
        if is_missing(&err) {
            Self::NotFound {
                id: id.to_string(),
                cache,
                source: Some(Arc::new(err)),
            }
        } else {
            Self::Fetch(Arc::new(err))
        }
    }

    /// Returns the data source error this error was caused by, if any.
    pub fn fetch_error(&self) -> Option<&FetchError> {
        match self {
            Self::NotFound { source, .. } => source.as_deref(),
            Self::Fetch(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_fetch() {
        let err = CacheError::from_fetch(
            FetchError::Mapping("no such competitor".into()),
            "sr:competitor:1",
            CacheName::Profiles,
            FetchError::is_missing_data,
        );
        assert!(err.is_not_found());
        insta::assert_snapshot!(err.to_string(), @"item sr:competitor:1 not found in cache profiles");

        let err = CacheError::from_fetch(
            FetchError::Other(anyhow::anyhow!("boom")),
            "sr:competitor:1",
            CacheName::Profiles,
            FetchError::is_missing_data,
        );
        assert!(!err.is_not_found());
        assert!(matches!(err.fetch_error(), Some(FetchError::Other(_))));
        insta::assert_snapshot!(err.to_string(), @"boom");
    }

    #[test]
    fn test_recoverable() {
        assert!(FetchError::Cancelled.is_recoverable());
        assert!(FetchError::Disposed.is_recoverable());
        assert!(!FetchError::Communication("503".into()).is_recoverable());
    }
}
