// src/error.rs

use thiserror::Error;

/// Result alias for fallible active-object operations.
pub type ActiveObjectResult<T> = Result<T, ActiveObjectError>;

/// Resource-level errors surfaced by the active object core.
///
/// Programming errors (sending a type with no declared handler) are compile errors by
/// construction and have no runtime variant here. Stale-callback invocation and
/// unknown-key `timer_stop` are silent no-ops, not errors.
#[derive(Debug, Error)]
pub enum ActiveObjectError {
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("active object has stopped; message was dropped")]
    Closed,
}
