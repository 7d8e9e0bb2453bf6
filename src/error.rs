//! Error types for the relay
//!
//! Defines server-level errors, registry invariant errors and outbound send
//! errors. Uses thiserror for ergonomic error definitions.

use std::net::SocketAddr;

use thiserror::Error;
use tokio_util::codec::LinesCodecError;

use crate::types::ConnectionId;

/// Server-level errors
///
/// Transport errors and protocol violations are absorbed by the connection
/// handler and only surface here when logged. Registry, bind and config errors
/// are fatal for their scope.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket read/write failure
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Frame decode/encode failure (includes invalid UTF-8)
    #[error("Codec error: {0}")]
    Codec(#[from] LinesCodecError),

    /// Peer broke the protocol (e.g. closed before sending a name)
    #[error("Protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// Registry invariant broken (generation bug)
    #[error("Registry invariant broken: {0}")]
    Registry(#[from] RegistryError),

    /// Could not bind or listen on the configured address
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Registry invariant errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// A connection with this id is already registered
    #[error("Duplicate connection id {0}")]
    DuplicateId(ConnectionId),
}

/// Outbound send errors
///
/// Occurs when a line cannot be queued for a connection's writer task.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// The writer task has exited (socket write failed or connection closed)
    #[error("Channel closed")]
    ChannelClosed,

    /// The peer did not drain its queue within the send timeout
    #[error("Send timed out")]
    TimedOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_wraps_into_server_error() {
        let err: ServerError = RegistryError::DuplicateId(ConnectionId(7)).into();
        assert_eq!(
            err.to_string(),
            "Registry invariant broken: Duplicate connection id #7"
        );
    }

    #[test]
    fn test_bind_error_message() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:1".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.to_string(), "Failed to listen on 127.0.0.1:1: in use");
    }
}
