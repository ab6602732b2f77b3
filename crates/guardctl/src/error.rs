//! Error types for the command client.

use std::io;
use std::path::PathBuf;

use guard_protocol::{PropertyError, ProtocolVersion};
use thiserror::Error;

// ============================================================================
// Client Error Type
// ============================================================================

/// Errors talking to the daemon.
///
/// Connection errors suggest checking that `guardd` is running.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Nothing at the socket path.
    #[error("no saverguard daemon is running (no socket at {})", path.display())]
    NotRunning { path: PathBuf },

    #[error("Failed to connect to daemon: {0}")]
    Connection(#[source] io::Error),

    #[error("Protocol version mismatch (client: {client}, daemon: {daemon})")]
    VersionMismatch {
        client: ProtocolVersion,
        daemon: ProtocolVersion,
    },

    /// The daemon refused the handshake.
    #[error("Daemon rejected connection: {0}")]
    Rejected(String),

    /// The daemon answered with an error message.
    #[error("Daemon error: {message}")]
    Daemon {
        message: String,
        code: Option<String>,
    },

    /// A reply arrived that does not answer the request.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A root property did not decode.
    #[error(transparent)]
    Property(#[from] PropertyError),

    #[error("Daemon did not answer in time")]
    Timeout,

    #[error("Daemon closed the connection")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse message: {0}")]
    ParseError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_running_names_socket() {
        let error = ClientError::NotRunning {
            path: PathBuf::from("/run/user/1000/saverguard.sock"),
        };
        let display = error.to_string();
        assert!(display.contains("no saverguard daemon"));
        assert!(display.contains("/run/user/1000/saverguard.sock"));
    }

    #[test]
    fn test_version_mismatch_display() {
        let error = ClientError::VersionMismatch {
            client: ProtocolVersion::new(1, 0),
            daemon: ProtocolVersion::new(2, 0),
        };
        let display = error.to_string();
        assert!(display.contains("client: 1.0"));
        assert!(display.contains("daemon: 2.0"));
    }

    #[test]
    fn test_io_error_from_conversion() {
        let io_error = io::Error::new(io::ErrorKind::BrokenPipe, "gone");
        let error: ClientError = io_error.into();
        assert!(matches!(error, ClientError::Io(_)));
    }
}
