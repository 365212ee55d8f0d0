//! Single translation point from underlying result codes to the
//! external error taxonomy, plus the recoverable/fatal partition used
//! by the session state machine.

use crate::client::AfpCode;
use crate::error::WorkerError;

/// Map an underlying result code onto the external taxonomy.
///
/// `subject` is the path or server name the failing call was about.
pub fn classify(code: AfpCode, subject: &str) -> WorkerError {
    match code {
        AfpCode::Ok => WorkerError::Internal(format!("classify called on success for {subject}")),
        AfpCode::NotFound => WorkerError::NotFound(subject.to_string()),
        AfpCode::AccessDenied => WorkerError::AccessDenied(subject.to_string()),
        AfpCode::Exists => WorkerError::AlreadyExists(subject.to_string()),
        AfpCode::AuthFailed => WorkerError::AuthFailed(subject.to_string()),
        AfpCode::NoServer => WorkerError::ConnectFailed {
            server: subject.to_string(),
            reason: "could not get address of server".to_string(),
        },
        AfpCode::HostUnreachable => WorkerError::ConnectFailed {
            server: subject.to_string(),
            reason: "no route to host".to_string(),
        },
        AfpCode::ConnRefused => WorkerError::ConnectFailed {
            server: subject.to_string(),
            reason: "connection refused".to_string(),
        },
        AfpCode::NetUnreachable => WorkerError::ConnectFailed {
            server: subject.to_string(),
            reason: "server unreachable".to_string(),
        },
        AfpCode::TimedOut => WorkerError::ServerTimeout(subject.to_string()),
        AfpCode::NotConnected => WorkerError::ConnectFailed {
            server: subject.to_string(),
            reason: "no server session".to_string(),
        },
        AfpCode::NotAttached => WorkerError::ConnectFailed {
            server: subject.to_string(),
            reason: "volume not attached".to_string(),
        },
        AfpCode::DaemonError | AfpCode::DaemonUnreachable => WorkerError::DaemonUnresponsive,
        AfpCode::Unsupported => WorkerError::Unsupported(subject.to_string()),
        AfpCode::Misc => WorkerError::Internal(subject.to_string()),
    }
}

/// Codes that mean the cached session or attachment is presumed stale.
///
/// The state machine reacts to these with exactly one silent
/// re-establish-and-retry cycle; everything else surfaces immediately.
pub fn is_recoverable(code: AfpCode) -> bool {
    matches!(
        code,
        AfpCode::NotConnected
            | AfpCode::NotAttached
            | AfpCode::DaemonError
            | AfpCode::NoServer
            | AfpCode::TimedOut
    )
}
