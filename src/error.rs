use thiserror::Error;

/// Errors surfaced by the annotation sync engine.
///
/// Replay misses (an event whose item does not exist in the target case) are
/// deliberately not represented here; they are tolerated per event and
/// reported in aggregate via [`crate::replay::ReplayReport`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// Underlying SQLite failure on the store file.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// The store file is exclusively held by another live instance.
    #[error("store file is locked by another instance")]
    StoreLocked,

    /// The store file was written by an incompatible schema version.
    #[error("incompatible store schema version {found} (expected {expected})")]
    Schema { found: i64, expected: i64 },

    /// Failure reading the host history log or applying a mutation through
    /// the case collaborator.
    #[error("host API error: {0}")]
    HostApi(String),

    /// A programming-error condition: backward cursor move, duplicate
    /// snapshot baseline, corrupt stored payload.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Operation attempted after `close()`.
    #[error("operation attempted on a closed repository")]
    Closed,

    /// The cancel token was tripped; committed pages remain intact.
    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Wraps a host-side failure message.
    pub fn host<S: Into<String>>(message: S) -> Self {
        SyncError::HostApi(message.into())
    }
}
