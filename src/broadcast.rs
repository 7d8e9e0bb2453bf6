//! Broadcast engine
//!
//! Fans one line out to every joined connection except the sender. Sends run
//! outside the registry lock against a snapshot; targets that fail are evicted
//! and removed from the registry once the pass is done.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::message::ServerLine;
use crate::registry::Registry;
use crate::types::ConnectionId;

/// A line to fan out, and who must not receive it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Connection excluded from delivery
    pub exclude: ConnectionId,
    /// Rendered outbound line
    pub line: ServerLine,
}

impl Message {
    /// User chat line from `sender_name`
    pub fn chat(exclude: ConnectionId, sender_name: &str, text: impl Into<String>) -> Self {
        Self {
            exclude,
            line: ServerLine::Chat {
                from: sender_name.to_string(),
                text: text.into(),
            },
        }
    }

    /// Any outbound line, e.g. a join/leave notice
    pub fn new(exclude: ConnectionId, line: ServerLine) -> Self {
        Self { exclude, line }
    }
}

/// Outcome of one fan-out pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Targets in the snapshot
    pub attempted: usize,
    /// Targets the line was queued for
    pub delivered: usize,
    /// Targets that failed, were evicted and removed from the registry
    pub dropped: Vec<ConnectionId>,
}

/// Fan-out over a shared [`Registry`]
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<Registry>,
    send_timeout: Duration,
}

impl Broadcaster {
    /// Create a broadcaster bounding each send by `send_timeout`
    pub fn new(registry: Arc<Registry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    /// The registry this broadcaster delivers to
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Deliver `message` to every member except `message.exclude`
    ///
    /// Each snapshot member is attempted exactly once. A failed target never
    /// aborts the pass; it is evicted (its handler closes the session) and
    /// removed from the registry before this returns. Targets already closed
    /// count as failed without a send. Connections joining after the snapshot
    /// do not receive the message.
    pub async fn deliver(&self, message: &Message) -> DeliveryReport {
        let targets = self.registry.snapshot_except(message.exclude);
        let mut report = DeliveryReport {
            attempted: targets.len(),
            ..DeliveryReport::default()
        };

        for target in &targets {
            if !target.is_open() {
                debug!("Skipping closed connection {}", target.id);
                report.dropped.push(target.id);
                continue;
            }
            match target.send(message.line.clone(), self.send_timeout).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(
                        "Dropping {} ('{}') from fan-out: {}",
                        target.id,
                        target.display_name(),
                        e
                    );
                    report.dropped.push(target.id);
                }
            }
        }

        for target in targets.iter().filter(|t| report.dropped.contains(&t.id)) {
            target.close();
            self.registry.remove(target.id);
        }

        debug!(
            "Fan-out from {}: {}/{} delivered",
            message.exclude, report.delivered, report.attempted
        );
        report
    }
}
