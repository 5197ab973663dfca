//! In-process network for tests and single-process deployments.
//!
//! Every node created from the same `MemoryHub` is connected to every other node.
//! Each node owns one unbounded channel; a message sent to it lands on the
//! receiver's channel, so delivery between a pair of nodes is FIFO.

use std::sync::Arc;
use std::sync::Mutex;

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::network;
use crate::network::Network;
use crate::network::NetworkEvent;
use crate::types::NodeId;

/// A fully connected set of in-process nodes.
#[derive(Clone, Default)]
pub struct MemoryHub {
    nodes: Arc<DashMap<NodeId, mpsc::UnboundedSender<NetworkEvent>>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a node and connects it to every node already on the hub.
    ///
    /// Both sides observe a `PeerJoined` for the other.
    pub fn node(&self, id: impl Into<NodeId>) -> Arc<MemoryNode> {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();

        let existing: Vec<(NodeId, mpsc::UnboundedSender<NetworkEvent>)> = self
            .nodes
            .iter()
            .filter(|entry| entry.key() != &id)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (peer, peer_tx) in existing {
            let _ = peer_tx.send(NetworkEvent::PeerJoined(id.clone()));
            let _ = tx.send(NetworkEvent::PeerJoined(peer));
        }

        self.nodes.insert(id.clone(), tx);

        Arc::new(MemoryNode {
            id,
            hub: self.clone(),
            events: Mutex::new(Some(rx)),
        })
    }

    /// Cuts a node off from the hub.
    ///
    /// Remaining nodes observe a `PeerLeft` for it, and it observes a `PeerLeft`
    /// for each of them. Returns false if the node was not connected.
    pub fn disconnect(&self, id: &NodeId) -> bool {
        let Some((_, gone_tx)) = self.nodes.remove(id) else {
            return false;
        };

        let remaining: Vec<(NodeId, mpsc::UnboundedSender<NetworkEvent>)> = self
            .nodes
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (peer, peer_tx) in remaining {
            let _ = peer_tx.send(NetworkEvent::PeerLeft(id.clone()));
            let _ = gone_tx.send(NetworkEvent::PeerLeft(peer));
        }

        true
    }

    /// Returns true if the node is currently connected.
    pub fn is_connected(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }
}

/// One node's view of a `MemoryHub`.
pub struct MemoryNode {
    id: NodeId,
    hub: MemoryHub,
    events: Mutex<Option<mpsc::UnboundedReceiver<NetworkEvent>>>,
}

impl MemoryNode {
    /// The hub this node is attached to.
    pub fn hub(&self) -> &MemoryHub {
        &self.hub
    }

    /// Disconnects this node from its hub.
    pub fn disconnect(&self) -> bool {
        self.hub.disconnect(&self.id)
    }
}

#[async_trait::async_trait]
impl Network for MemoryNode {
    fn local_node(&self) -> &NodeId {
        &self.id
    }

    fn peers(&self) -> Vec<NodeId> {
        if !self.hub.is_connected(&self.id) {
            return Vec::new();
        }
        self.hub
            .nodes
            .iter()
            .filter(|entry| entry.key() != &self.id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    fn events(&self) -> network::Result<mpsc::UnboundedReceiver<NetworkEvent>> {
        let mut guard = self
            .events
            .lock()
            .map_err(|_| network::Error::Io("event stream lock poisoned".into()))?;
        guard.take().ok_or(network::Error::EventsTaken)
    }

    async fn send(&self, to: &NodeId, payload: &[u8]) -> network::Result<()> {
        if !self.hub.is_connected(&self.id) {
            return Err(network::Error::Closed);
        }

        let tx = self
            .hub
            .nodes
            .get(to)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| network::Error::PeerUnreachable(to.clone()))?;

        tx.send(NetworkEvent::Message {
            from: self.id.clone(),
            payload: payload.to_vec(),
        })
        .map_err(|_| network::Error::PeerUnreachable(to.clone()))
    }
}
