//! Line-oriented TCP broadcast relay
//!
//! Clients connect over plain TCP, send a display name as their first line and
//! then every further line is relayed to all other joined clients as
//! `"{name}: {text}"`. Joins and departures are announced as `"SERVER: ..."`
//! notices; `EXIT` ends a session with a `DONE` acknowledgement.
//!
//! # Architecture
//! - `Server` accepts sockets and spawns one task per connection
//! - Each connection's `handler` runs the handshake and relay loop
//! - The `Registry` is the only shared state, guarded by a single mutex that is
//!   never held across a send
//! - The `Broadcaster` fans lines out over a registry snapshot and evicts peers
//!   whose queue is closed or stalled
//! - Each peer has one writer task, so concurrent senders never interleave
//!
//! # Example
//! ```ignore
//! use line_relay::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), line_relay::ServerError> {
//!     let server = Server::bind(ServerConfig::default()).await?;
//!     server.run().await
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod listener;
pub mod message;
pub mod registry;
pub mod types;

// Re-export main types for convenience
pub use broadcast::{Broadcaster, DeliveryReport, Message};
pub use config::ServerConfig;
pub use connection::Connection;
pub use error::{RegistryError, SendError, ServerError};
pub use handler::{handle_connection, serve, SessionState};
pub use listener::Server;
pub use message::{ClientFrame, ServerLine};
pub use registry::Registry;
pub use types::ConnectionId;
