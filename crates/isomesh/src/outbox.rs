//! Ordered outbound frames.
//!
//! Every frame a registry sends, whichever task produced it, is queued here and
//! written by a single task. Frames to one peer therefore leave in the order they
//! were queued.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::error::Result;
use crate::network;
use crate::network::Network;
use crate::pending::PendingCalls;
use crate::types::NodeId;
use crate::wire;
use crate::wire::Frame;

pub(crate) enum Outgoing {
    Unicast {
        to: NodeId,
        frame: Frame,
        /// A pending request to fail if the frame cannot be delivered.
        correlation: Option<u64>,
    },
    Broadcast(Frame),
    /// Acknowledged once everything queued before it has been written.
    Flush(oneshot::Sender<()>),
}

/// Sending half of the queue.
#[derive(Clone)]
pub(crate) struct Outbox {
    node: NodeId,
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl Outbox {
    /// Creates the queue. Frames accumulate until `spawn_writer` drains them.
    pub fn channel(node: NodeId) -> (Self, mpsc::UnboundedReceiver<Outgoing>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { node, tx }, rx)
    }

    pub fn unicast(&self, to: &NodeId, frame: Frame) -> Result<()> {
        self.push(Outgoing::Unicast { to: to.clone(), frame, correlation: None })
    }

    /// Queues a request frame; a delivery failure settles `correlation`.
    pub fn request(&self, to: &NodeId, frame: Frame, correlation: u64) -> Result<()> {
        self.push(Outgoing::Unicast {
            to: to.clone(),
            frame,
            correlation: Some(correlation),
        })
    }

    pub fn broadcast(&self, frame: Frame) -> Result<()> {
        self.push(Outgoing::Broadcast(frame))
    }

    /// Waits until every frame queued so far has been handed to the network.
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.push(Outgoing::Flush(tx))?;
        rx.await.map_err(|_| Error::NodeUnavailable(self.node.clone()))
    }

    fn push(&self, outgoing: Outgoing) -> Result<()> {
        self.tx
            .send(outgoing)
            .map_err(|_| Error::NodeUnavailable(self.node.clone()))
    }
}

/// Spawns the task that writes queued frames to the network.
pub(crate) fn spawn_writer(
    network: Arc<dyn Network>,
    pending: Arc<PendingCalls>,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(outgoing) = rx.recv().await {
            match outgoing {
                Outgoing::Unicast { to, frame, correlation } => {
                    let kind = frame.kind();
                    let result = match wire::encode(&frame) {
                        Ok(bytes) => network.send(&to, &bytes).await.map_err(|e| match e {
                            network::Error::PeerUnreachable(node) => Error::NodeUnavailable(node),
                            e => Error::Network(e),
                        }),
                        Err(e) => Err(Error::Codec(e.to_string())),
                    };

                    if let Err(e) = result {
                        tracing::warn!("failed to send {} to {}: {}", kind, to, e);
                        if let Some(correlation) = correlation {
                            pending.fail(correlation, e);
                        }
                    } else {
                        tracing::trace!("sent {} to {}", kind, to);
                    }
                }
                Outgoing::Broadcast(frame) => {
                    let kind = frame.kind();
                    match wire::encode(&frame) {
                        Ok(bytes) => {
                            if let Err(e) = network.broadcast(&bytes).await {
                                tracing::warn!("failed to broadcast {}: {}", kind, e);
                            } else {
                                tracing::trace!("broadcast {}", kind);
                            }
                        }
                        Err(e) => tracing::warn!("failed to encode {}: {}", kind, e),
                    }
                }
                Outgoing::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
    })
}
