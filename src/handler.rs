//! TCP connection handler
//!
//! Runs one client session: name handshake, line relay, `EXIT` handling and
//! teardown. The write half belongs to a dedicated writer task fed by the
//! connection's outbound queue; the read half stays with the handler.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcast::{Broadcaster, Message};
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::error::ServerError;
use crate::message::{ClientFrame, ServerLine};
use crate::types::ConnectionId;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the first frame (display name)
    AwaitingName,
    /// Joined; relaying lines
    Active,
    /// Tearing down (unregister, leave notice, close)
    Closing,
    /// Done
    Closed,
}

impl SessionState {
    /// Whether `self -> next` is a legal step
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (AwaitingName, Active) | (AwaitingName, Closed) | (Active, Closing) | (Closing, Closed)
        )
    }
}

/// Why an active session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    /// Client sent `EXIT`
    Exit,
    /// Client closed its side
    Eof,
    /// Reading or decoding a frame failed
    ReadFailed,
    /// The writer task stopped (socket write failed)
    WriteFailed,
    /// A fan-out gave up on this connection
    Evicted,
}

enum Event {
    Frame(Option<Result<String, LinesCodecError>>),
    WriterStopped,
    Evicted,
}

struct Session {
    id: ConnectionId,
    state: SessionState,
}

impl Session {
    fn advance(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("Session {}: {:?} -> {:?}", self.id, self.state, next);
        self.state = next;
    }
}

/// Handle a newly accepted TCP connection
///
/// Transport failures and clients that leave before naming themselves are
/// normal endings and return `Ok`. Only a registry invariant violation is
/// returned as an error.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    broadcaster: Broadcaster,
    config: Arc<ServerConfig>,
) -> Result<(), ServerError> {
    let (read_half, write_half) = stream.into_split();
    serve(read_half, write_half, peer_addr, broadcaster, config).await
}

/// Run a session over any pair of byte stream halves
///
/// Same contract as [`handle_connection`].
pub async fn serve<R, W>(
    reader: R,
    writer: W,
    peer_addr: SocketAddr,
    broadcaster: Broadcaster,
    config: Arc<ServerConfig>,
) -> Result<(), ServerError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let id = ConnectionId::next();
    let mut session = Session {
        id,
        state: SessionState::AwaitingName,
    };
    debug!("Connection {} accepted from {}", id, peer_addr);

    let mut frames = FramedRead::new(reader, LinesCodec::new());

    // Create queue for server -> client lines
    let (line_tx, line_rx) = mpsc::channel::<ServerLine>(config.outbound_capacity);
    let stop_writer = CancellationToken::new();
    let mut writer = tokio::spawn(write_lines(
        id,
        FramedWrite::new(writer, LinesCodec::new()),
        line_rx,
        stop_writer.clone(),
    ));

    let name = match read_name(&mut frames, peer_addr).await {
        Ok(name) => name,
        Err(e) => {
            debug!("Connection {} from {} dropped before joining: {}", id, peer_addr, e);
            session.advance(SessionState::Closed);
            drop(line_tx);
            if let Err(e) = writer.await {
                debug!("Writer for {} failed: {}", id, e);
            }
            return Ok(());
        }
    };

    let connection = Connection::new(id, name.as_str(), peer_addr, line_tx);
    broadcaster.registry().add(connection.clone())?;
    session.advance(SessionState::Active);
    info!("{} joined from {} ({})", name, peer_addr, id);

    broadcaster
        .deliver(&Message::new(id, ServerLine::joined(&name)))
        .await;

    let reason = loop {
        let event = tokio::select! {
            biased;
            _ = connection.closed() => Event::Evicted,
            _ = &mut writer => Event::WriterStopped,
            frame = frames.next() => Event::Frame(frame),
        };

        match event {
            Event::Frame(Some(Ok(line))) => match ClientFrame::parse(line) {
                ClientFrame::Exit => {
                    if let Err(e) = connection.send(ServerLine::Done, config.send_timeout).await {
                        debug!("Could not acknowledge EXIT for {}: {}", id, e);
                    }
                    break CloseReason::Exit;
                }
                ClientFrame::Chat(text) => {
                    info!("{}: {}", name, text);
                    broadcaster
                        .deliver(&Message::chat(id, &name, text))
                        .await;
                }
            },
            Event::Frame(Some(Err(e))) => {
                debug!("Read from {} failed: {}", id, e);
                break CloseReason::ReadFailed;
            }
            Event::Frame(None) => break CloseReason::Eof,
            Event::WriterStopped => break CloseReason::WriteFailed,
            Event::Evicted => break CloseReason::Evicted,
        }
    };

    // Teardown: every way out of the loop above lands here exactly once
    session.advance(SessionState::Closing);
    broadcaster.registry().remove(id);
    broadcaster
        .deliver(&Message::new(id, ServerLine::left(&name)))
        .await;

    drop(connection);
    match reason {
        CloseReason::WriteFailed => {}
        CloseReason::Evicted => {
            // Peer is not draining; flushing would only stall
            stop_writer.cancel();
            if let Err(e) = writer.await {
                debug!("Writer for {} failed: {}", id, e);
            }
        }
        _ => {
            // Writer exits once every queue handle is gone; fan-outs still
            // holding a snapshot release theirs within one send timeout
            if tokio::time::timeout(config.send_timeout, &mut writer)
                .await
                .is_err()
            {
                warn!("Writer for {} did not drain in time, stopping it", id);
                stop_writer.cancel();
                if let Err(e) = writer.await {
                    debug!("Writer for {} failed: {}", id, e);
                }
            }
        }
    }
    drop(frames);

    session.advance(SessionState::Closed);
    info!("{} @ {} left ({:?})", name, peer_addr, reason);

    Ok(())
}

/// Read the handshake frame
///
/// The name is trimmed; an empty name is replaced by the peer address.
async fn read_name<R>(
    frames: &mut FramedRead<R, LinesCodec>,
    peer_addr: SocketAddr,
) -> Result<String, ServerError>
where
    R: AsyncRead + Unpin,
{
    match frames.next().await {
        Some(Ok(line)) => {
            let name = line.trim();
            if name.is_empty() {
                Ok(peer_addr.to_string())
            } else {
                Ok(name.to_string())
            }
        }
        Some(Err(e)) => Err(e.into()),
        None => Err(ServerError::ProtocolViolation("closed before sending a name")),
    }
}

/// Drain the outbound queue onto the socket
///
/// Ends when every sender is dropped, a write fails or `stop` fires. Returns
/// the number of lines that were never written.
async fn write_lines<W>(
    id: ConnectionId,
    mut sink: FramedWrite<W, LinesCodec>,
    mut rx: mpsc::Receiver<ServerLine>,
    stop: CancellationToken,
) -> usize
where
    W: AsyncWrite + Unpin,
{
    let mut unsent = 0;
    let mut write_failed = false;

    loop {
        let line = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
        };

        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                unsent += 1;
                break;
            }
            result = sink.send(line.to_string()) => {
                if let Err(e) = result {
                    debug!("Write to {} failed: {}", id, e);
                    write_failed = true;
                    break;
                }
            }
        }
    }

    rx.close();
    while rx.try_recv().is_ok() {
        unsent += 1;
    }

    if stop.is_cancelled() {
        if unsent > 0 {
            warn!("Writer for {} stopped with {} line(s) unsent", id, unsent);
        }
    } else if !write_failed {
        if let Err(e) = SinkExt::<String>::close(&mut sink).await {
            debug!("Closing writer for {} failed: {}", id, e);
        }
    }

    debug!("Writer for {} ended", id);
    unsent
}
