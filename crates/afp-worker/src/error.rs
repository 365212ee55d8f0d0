use thiserror::Error;

/// External-facing error taxonomy reported to the host dispatcher.
///
/// Each variant carries a human-readable subject (a path or server name)
/// so the dispatcher can present the failure without further lookups.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkerError {
    #[error("Does not exist: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Login incorrect on {0}")]
    AuthFailed(String),

    #[error("Could not connect to {server}: {reason}")]
    ConnectFailed { server: String, reason: String },

    #[error("Timeout talking to {0}")]
    ServerTimeout(String),

    #[error("AFP daemon did not respond")]
    DaemonUnresponsive,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Operation cancelled by user")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, WorkerError>;

impl WorkerError {
    /// True for failures that originate from the connection path rather
    /// than from the requested file operation itself.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            WorkerError::ConnectFailed { .. }
                | WorkerError::ServerTimeout(_)
                | WorkerError::DaemonUnresponsive
                | WorkerError::AuthFailed(_)
        )
    }
}
