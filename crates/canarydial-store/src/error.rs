//! Error types for record store lookups.

use thiserror::Error;

/// Result type alias for record store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by a record store lookup.
///
/// A lookup that succeeds but matches no record is not an error; it is
/// `Ok(None)` at the trait level.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store unavailable: {0}")]
    Unavailable(String),

    #[error("lookup rejected: {0}")]
    Lookup(String),
}
