use thiserror::Error;

/// Domain failures of the license registry. Each variant maps to a distinct
/// transport status; `Storage` carries the underlying store error and is the
/// only variant whose detail is logged rather than echoed to the caller.
#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("invalid key")]
    NotFound,

    #[error("expired")]
    Expired,

    /// The seat is held by a different client. Discloses the holder so the
    /// caller can show who owns the seat.
    #[error("already active on another client")]
    Conflict { active_client: String },

    #[error("not active for this client")]
    Forbidden,

    #[error("{0}")]
    InvalidInput(&'static str),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
