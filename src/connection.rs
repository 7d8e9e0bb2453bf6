//! Connection record
//!
//! Represents a joined client: its id, display name, the handle to its
//! outbound queue and its eviction signal. Cloning is cheap; clones share the
//! same queue and signal.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;

use crate::error::SendError;
use crate::message::ServerLine;
use crate::types::ConnectionId;

/// Joined client information
///
/// The socket itself is owned by the connection's handler and writer task.
/// Everyone else reaches the peer only through `sender`, which feeds a single
/// writer, so concurrent senders never interleave bytes within a line.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ConnectionId,
    /// Name chosen at handshake, immutable afterwards
    display_name: Arc<str>,
    /// Remote address
    pub peer_addr: SocketAddr,
    /// Server → Client line queue
    sender: mpsc::Sender<ServerLine>,
    /// Fired when the fan-out gives up on this connection
    evicted: CancellationToken,
}

impl Connection {
    /// Create a connection record for a completed handshake
    pub fn new(
        id: ConnectionId,
        display_name: impl Into<Arc<str>>,
        peer_addr: SocketAddr,
        sender: mpsc::Sender<ServerLine>,
    ) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            peer_addr,
            sender,
            evicted: CancellationToken::new(),
        }
    }

    /// Get the display name for this connection
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Whether the connection can still receive lines
    ///
    /// False once evicted or once the writer task has exited.
    pub fn is_open(&self) -> bool {
        !self.evicted.is_cancelled() && !self.sender.is_closed()
    }

    /// Evict this connection; its handler tears the session down
    pub fn close(&self) {
        self.evicted.cancel();
    }

    /// Resolves once [`close`](Self::close) has been called on any clone
    pub async fn closed(&self) {
        self.evicted.cancelled().await;
    }

    /// Queue a line for this connection, waiting at most `timeout`
    pub async fn send(&self, line: ServerLine, timeout: Duration) -> Result<(), SendError> {
        self.sender
            .send_timeout(line, timeout)
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => SendError::TimedOut,
                SendTimeoutError::Closed(_) => SendError::ChannelClosed,
            })
    }
}
