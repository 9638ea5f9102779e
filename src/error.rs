//! Error types for the cluster state cache.

use thiserror::Error;

/// Main error type for cache operations.
///
/// Accessors distinguish "nothing cached" from "the wrong kind of thing
/// is cached" so callers can react without pattern-matching on strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    /// No entry exists for the requested path or scope.
    #[error("no cached entry for the requested path")]
    KeyNotFound,

    /// A status record is cached where data was requested.
    #[error("a status is cached for this path instead of data")]
    StatusReceived,

    /// Data is cached where a status was requested, or the argument
    /// does not name a valid scope for the operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Typed decode attempted against a cached entry that belongs to a
    /// different cluster or event.
    #[error("schema mismatch: cached entry is not a {expected}")]
    SchemaMismatch { expected: &'static str },

    /// Malformed serialized input encountered while buffering or
    /// reconstructing a value.
    #[error("malformed element data: {0}")]
    Malformed(String),

    /// An allocation bound was exceeded while buffering element data.
    #[error("out of memory while buffering element data")]
    NoMemory,

    /// The destination buffer cannot hold the next encoded element.
    /// Not fatal: filter encoding rolls back to the last checkpoint and
    /// returns a valid partial result.
    #[error("destination buffer too small")]
    BufferTooSmall,

    /// Unexpected end of input while reading serialized elements.
    #[error("unexpected end of element data")]
    UnexpectedEnd,
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
