//! Listener and dispatcher
//!
//! Binds the listening socket and spawns one handler task per accepted
//! connection. Accepting never waits on any client's progress.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info};

use crate::broadcast::Broadcaster;
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::handler::handle_connection;
use crate::registry::Registry;

/// A bound relay server
pub struct Server {
    listener: TcpListener,
    broadcaster: Broadcaster,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Bind and listen on `config.bind_addr`
    ///
    /// Fails with [`ServerError::Bind`] if the address cannot be bound or
    /// listened on. Must be called from within a tokio runtime.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = config.bind_addr;
        let listener = listen(addr, config.backlog)
            .map_err(|source| ServerError::Bind { addr, source })?;

        let registry = Arc::new(Registry::new());
        let broadcaster = Broadcaster::new(registry, config.send_timeout);

        info!(
            "Relay listening on {}",
            listener.local_addr().unwrap_or(addr)
        );

        Ok(Self {
            listener,
            broadcaster,
            config: Arc::new(config),
        })
    }

    /// Address actually bound (useful when binding port 0)
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared registry of joined connections
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.broadcaster.registry())
    }

    /// Accept connections until a handler reports a registry defect
    ///
    /// Accept failures and per-connection errors are logged and the loop
    /// continues. A broken registry invariant means connection ids are not
    /// unique; it stops the server and is returned so the process exits.
    pub async fn run(self) -> Result<(), ServerError> {
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer_addr)) => {
                        debug!("New connection from {}", peer_addr);
                        let broadcaster = self.broadcaster.clone();
                        let config = Arc::clone(&self.config);

                        handlers.spawn(async move {
                            handle_connection(stream, peer_addr, broadcaster, config)
                                .await
                                .map_err(|e| (peer_addr, e))
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
                Some(finished) = handlers.join_next() => {
                    check_handler(finished)?;
                }
            }
        }
    }
}

/// Log a finished handler; a registry defect is passed up as fatal
fn check_handler(
    finished: Result<Result<(), (SocketAddr, ServerError)>, JoinError>,
) -> Result<(), ServerError> {
    match finished {
        Ok(Ok(())) => Ok(()),
        Ok(Err((peer_addr, ServerError::Registry(e)))) => {
            error!(
                "Registry invariant broken by connection from {}: {} (connection id generation is not unique), shutting down",
                peer_addr, e
            );
            Err(ServerError::Registry(e))
        }
        Ok(Err((peer_addr, e))) => {
            error!("Connection handler error for {}: {}", peer_addr, e);
            Ok(())
        }
        Err(e) => {
            error!("Connection handler task failed: {}", e);
            Ok(())
        }
    }
}

fn listen(addr: SocketAddr, backlog: u32) -> io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(backlog)
}
