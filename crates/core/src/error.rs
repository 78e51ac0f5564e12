use thiserror::Error;

/// Errors surfaced to holders of a [`SessionHandle`](crate::session::SessionHandle).
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session task has exited; no further commands can be delivered.
    #[error("voice session has stopped")]
    Stopped,
}
