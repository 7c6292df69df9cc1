use tcmirror_sources::RemoteError;
use thiserror::Error;

/// An error that happens when loading a record of the remote server.
///
/// Only [`NotFound`](Self::NotFound) and, for some records, [`Malformed`](Self::Malformed)
/// are ever turned into persisted placeholders. Everything else is handed to the caller and
/// never stored.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// The record was not found on the remote server.
    #[error("not found")]
    NotFound,
    /// The record could not be fetched due to connection loss, a 5xx server response or an
    /// unparseable response.
    ///
    /// The attached string contains the details.
    #[error("transport error: {0}")]
    Transport(String),
    /// The record was fetched, but is invalid in some way.
    #[error("malformed: {0}")]
    Malformed(String),
    /// An unexpected error in the mirror itself.
    #[error("internal error")]
    InternalError,
}

impl From<RemoteError> for CacheError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::NotFound => Self::NotFound,
            RemoteError::Transport(details) => Self::Transport(details),
            RemoteError::Malformed(details) => Self::Malformed(details),
        }
    }
}

impl From<serde_json::Error> for CacheError {
    #[track_caller]
    fn from(err: serde_json::Error) -> Self {
        Self::from_std_error(err)
    }
}

impl From<tokio::task::JoinError> for CacheError {
    #[track_caller]
    fn from(err: tokio::task::JoinError) -> Self {
        Self::from_std_error(err)
    }
}

impl CacheError {
    #[track_caller]
    pub fn from_std_error<E: std::error::Error + 'static>(e: E) -> Self {
        let dynerr: &dyn std::error::Error = &e; // tracing expects a `&dyn Error`
        tracing::error!(error = dynerr);
        Self::InternalError
    }

    /// A short name of the error kind for use in metric tags.
    pub fn metrics_tag(&self) -> &'static str {
        match self {
            Self::NotFound => "notfound",
            Self::Transport(_) => "transport",
            Self::Malformed(_) => "malformed",
            Self::InternalError => "internal",
        }
    }
}

/// An entry in a cache, containing either `Ok(T)` or an error denoting the reason why a
/// record could not be loaded.
pub type CacheEntry<T = ()> = Result<T, CacheError>;

/// Degrades expected failures of a remote load into placeholder values.
pub trait CacheEntryExt<T> {
    /// Replaces [`CacheError::NotFound`] with `stub()`.
    fn or_stub_if_missing(self, stub: impl FnOnce() -> T) -> CacheEntry<T>;

    /// Replaces [`CacheError::Malformed`] with `empty()`, logging the details.
    fn or_empty_if_malformed(self, empty: impl FnOnce() -> T) -> CacheEntry<T>;
}

impl<T> CacheEntryExt<T> for CacheEntry<T> {
    fn or_stub_if_missing(self, stub: impl FnOnce() -> T) -> CacheEntry<T> {
        match self {
            Err(CacheError::NotFound) => {
                metric!(counter("caches.stub") += 1, "reason" => "notfound");
                Ok(stub())
            }
            other => other,
        }
    }

    fn or_empty_if_malformed(self, empty: impl FnOnce() -> T) -> CacheEntry<T> {
        match self {
            Err(CacheError::Malformed(details)) => {
                tracing::warn!(%details, "Replacing malformed record with an empty one");
                metric!(counter("caches.stub") += 1, "reason" => "malformed");
                Ok(empty())
            }
            other => other,
        }
    }
}
