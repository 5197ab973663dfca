//! # Network Abstraction
//!
//! The seam between the service layer and the mesh fabric underneath it.
//!
//! ## Philosophy
//!
//! - **Byte-Oriented**: The Network knows nothing about frames, services or contracts.
//!   It moves opaque buffers between nodes.
//! - **Fire and Forget**: Sends are one-way. Request/response correlation is built on
//!   top of this by the registry, not defined here.
//! - **Topology as Events**: Peers appearing and disappearing are reported on the same
//!   stream as inbound messages, so a consumer sees them in delivery order.

use std::fmt;

use tokio::sync::mpsc;

use crate::types::NodeId;

/// Errors that occur at the network layer.
#[derive(Debug, Clone)]
pub enum Error {
    /// The peer is not connected (never was, or has since left).
    PeerUnreachable(NodeId),
    /// The local node has been shut down.
    Closed,
    /// The event stream was already handed to another consumer.
    EventsTaken,
    /// Generic I/O error or internal network failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerUnreachable(node) => write!(f, "Peer unreachable: {}", node),
            Self::Closed => write!(f, "Network closed"),
            Self::EventsTaken => write!(f, "Network events already taken"),
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Something that happened on the network, from the local node's point of view.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A peer became reachable.
    PeerJoined(NodeId),
    /// A peer is no longer reachable.
    PeerLeft(NodeId),
    /// A peer sent us a payload.
    Message { from: NodeId, payload: Vec<u8> },
}

/// A node's connection to the mesh.
///
/// This trait is designed to be object-safe (`Arc<dyn Network>`).
///
/// # invariants
/// - Payloads sent from one node to another are delivered in send order.
/// - A `PeerLeft` is reported for every peer that was reported by `PeerJoined`.
/// - Implementations must not interpret payload content.
#[async_trait::async_trait]
pub trait Network: Send + Sync + 'static {
    /// The identity of this node.
    fn local_node(&self) -> &NodeId;

    /// The peers currently reachable from this node.
    fn peers(&self) -> Vec<NodeId>;

    /// Takes the event stream. There is exactly one consumer per node; subsequent
    /// calls fail with `EventsTaken`.
    fn events(&self) -> Result<mpsc::UnboundedReceiver<NetworkEvent>>;

    /// Sends a payload to one peer.
    async fn send(&self, to: &NodeId, payload: &[u8]) -> Result<()>;

    /// Sends a payload to every connected peer.
    ///
    /// A peer that fails to accept the payload does not stop delivery to the others.
    async fn broadcast(&self, payload: &[u8]) -> Result<()> {
        for peer in self.peers() {
            if let Err(e) = self.send(&peer, payload).await {
                tracing::warn!(%peer, error = %e, "broadcast to peer failed");
            }
        }
        Ok(())
    }
}
