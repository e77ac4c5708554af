//! Crate-wide error taxonomy.
//!
//! Kinds, not type names: configuration errors are fatal and surfaced immediately;
//! transient transport errors are retried at the narrowest layer that owns the retry
//! budget (per-chunk in [`crate::transport`], per-operation in [`crate::multipart`]);
//! permanent and integrity errors bubble up with context; cache-miss is a distinguished,
//! non-error outcome; cancellation is surfaced verbatim.

use std::io;
use std::path::PathBuf;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Missing required secret, empty key, invalid compression level, too many restore
    /// candidates, or a key containing a comma. Fatal, surfaced immediately.
    #[error("configuration: {0}")]
    Configuration(String),

    /// A chunk or operation exhausted its retry budget.
    #[error("transport: {0}")]
    Transport(#[from] crate::transport::TransportError),

    /// The coordinating service or S3 rejected the request outright (a permanent 4xx, or
    /// a malformed response body).
    #[error("multipart: {0}")]
    Multipart(#[from] crate::multipart::MultipartError),

    /// The requested cache entry does not exist. Not a failure: the Restorer treats this
    /// as a normal miss outcome.
    #[error("cache entry not found")]
    CacheNotFound,

    /// External cancellation (e.g. the step was aborted). No retry.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error with an optional file for context.
    #[error("io: {error} @ {file:?}")]
    Io {
        #[source]
        error: io::Error,
        file: Option<PathBuf>,
    },

    /// The external archiver or path resolver boundary failed.
    #[error("archive: {0}")]
    Archive(String),
}

impl Error {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn io(error: io::Error) -> Self {
        Self::Io { error, file: None }
    }

    pub fn io_file(error: io::Error, file: impl Into<PathBuf>) -> Self {
        Self::Io { error, file: Some(file.into()) }
    }

    /// True if this error is the distinguished cache-miss sentinel.
    pub fn is_cache_not_found(&self) -> bool {
        matches!(self, Error::CacheNotFound)
            || matches!(self, Error::Multipart(e) if e.is_not_found())
    }
}

/// Policy predicate deciding whether an error shape should be retried. Kept as a
/// dedicated function (per the design notes: retryability is policy, not a property of
/// the error) so new error shapes do not require touching call sites.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}
