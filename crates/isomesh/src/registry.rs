//! # Service Registry
//!
//! One `Services` per node, bound to one network. It tracks local registrations
//! and remote advertisements under their service ids, selects one provider per id,
//! and drives the wire protocol: advertising and withdrawing services as topology
//! changes, serving inbound calls and subscriptions, and routing responses and
//! events back to remote reflects.
//!
//! ## Philosophy
//!
//! - **Live Handles**: Every id owns a `watch` channel holding its selected provider.
//!   Handles are receivers, so they observe registrations and withdrawals as they
//!   happen.
//! - **Local First**: A local registration always wins. Otherwise the first remote
//!   advertiser is selected, and the next one in arrival order takes over when it
//!   goes away.
//! - **One Writer**: Inbound traffic is handled by a single pump task. Outbound frames
//!   all go through one outbox, so per-peer order is the order frames were produced.
//!   Call requests are served on their own tasks.
//!
//! ## Lifecycle
//!
//! `Created -> Joined -> Left`. Registrations made before `join()` are advertised on
//! join; `Left` is terminal.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::contract::ServiceContract;
use crate::descriptor::Shape;
use crate::error::Error;
use crate::error::Result;
use crate::handle::Selected;
use crate::handle::ServiceHandle;
use crate::local::LocalReflect;
use crate::network::Network;
use crate::network::NetworkEvent;
use crate::outbox;
use crate::outbox::Outbox;
use crate::outbox::Outgoing;
use crate::pending::PendingCalls;
use crate::reflect::Listener;
use crate::reflect::Location;
use crate::reflect::Reflect;
use crate::remote::RemoteReflect;
use crate::types::NodeId;
use crate::types::ServiceId;
use crate::types::Value;
use crate::wire;
use crate::wire::Frame;
use crate::wire::Outcome;

/// Registry lifecycle state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Created,
    Joined,
    Left,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Joined,
            _ => Self::Left,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Joined => 1,
            Self::Left => 2,
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Joined => write!(f, "joined"),
            Self::Left => write!(f, "left"),
        }
    }
}

/// A change of the selected provider for one id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Availability {
    pub id: ServiceId,
    /// `None` when the id no longer has a provider.
    pub provider: Option<Location>,
}

/// Everything known about one service id.
struct Entry {
    local: Option<Arc<LocalReflect>>,
    /// Remote advertisers in arrival order.
    remotes: Vec<Arc<RemoteReflect>>,
    current: watch::Sender<Selected>,
}

impl Entry {
    fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            local: None,
            remotes: Vec::new(),
            current,
        }
    }

    fn select(&self) -> Selected {
        if let Some(local) = &self.local {
            let reflect: Arc<dyn Reflect> = local.clone();
            return Some(reflect);
        }
        self.remotes.first().map(|remote| {
            let reflect: Arc<dyn Reflect> = remote.clone();
            reflect
        })
    }

    fn remote_of(&self, owner: &NodeId) -> Option<Arc<RemoteReflect>> {
        self.remotes.iter().find(|r| r.owner() == owner).cloned()
    }

    fn take_remote_of(&mut self, owner: &NodeId) -> Option<Arc<RemoteReflect>> {
        let pos = self.remotes.iter().position(|r| r.owner() == owner)?;
        Some(self.remotes.remove(pos))
    }
}

fn same_provider(a: &Selected, b: &Selected) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ()),
        _ => false,
    }
}

/// A forwarding subscription a peer holds on one of our local services.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct Forward {
    peer: NodeId,
    service: ServiceId,
    event: String,
}

/// Join/leave bookkeeping, guarded so the transitions never interleave.
struct Lifecycle {
    outbox_rx: Option<mpsc::UnboundedReceiver<Outgoing>>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    node: NodeId,
    network: Arc<dyn Network>,
    config: Config,
    state: AtomicU8,
    entries: DashMap<ServiceId, Entry>,
    pending: Arc<PendingCalls>,
    outbox: Outbox,
    forwarders: DashMap<Forward, Listener>,
    changes: broadcast::Sender<Availability>,
    lifecycle: tokio::sync::Mutex<Lifecycle>,
}

/// The per-node service registry.
///
/// Cloning shares the registry.
#[derive(Clone)]
pub struct Services {
    inner: Arc<Inner>,
}

impl Services {
    pub fn new(network: Arc<dyn Network>) -> Self {
        Self::build(network, Config::default())
    }

    /// A registry with explicit settings. Fails with `InvalidConfiguration` for a
    /// zero timeout or capacity.
    pub fn with_config(network: Arc<dyn Network>, config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(network, config))
    }

    fn build(network: Arc<dyn Network>, config: Config) -> Self {
        let node = network.local_node().clone();
        let (outbox, outbox_rx) = Outbox::channel(node.clone());
        let (changes, _) = broadcast::channel(config.changes_capacity);

        Self {
            inner: Arc::new(Inner {
                node,
                network,
                config,
                state: AtomicU8::new(State::Created.as_u8()),
                entries: DashMap::new(),
                pending: Arc::new(PendingCalls::new()),
                outbox,
                forwarders: DashMap::new(),
                changes,
                lifecycle: tokio::sync::Mutex::new(Lifecycle {
                    outbox_rx: Some(outbox_rx),
                    tasks: Vec::new(),
                }),
            }),
        }
    }

    /// The node this registry speaks for.
    pub fn node(&self) -> &NodeId {
        &self.inner.node
    }

    pub fn state(&self) -> State {
        self.inner.state()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Registers a local implementation under its id.
    ///
    /// The service is available locally at once and advertised to peers once joined.
    pub fn register(&self, reflect: impl Into<Arc<LocalReflect>>) -> Result<()> {
        if self.state() == State::Left {
            return Err(Error::AlreadyLeft);
        }

        let reflect = reflect.into();
        let id = reflect.id().clone();
        let shape = reflect.contract().shape();

        {
            let mut entry = self.inner.entries.entry(id.clone()).or_insert_with(Entry::new);
            if entry.local.is_some() {
                return Err(Error::DuplicateService(id));
            }
            entry.local = Some(reflect);
            self.inner.publish(&id, &entry);
        }

        tracing::info!(node = %self.inner.node, service = %id, "registered service");
        if self.state() == State::Joined {
            self.inner.outbox.broadcast(Frame::ServiceAvailable { id, shape })?;
        }
        Ok(())
    }

    /// Removes a local registration and withdraws its advertisement.
    pub fn unregister(&self, id: impl Into<ServiceId>) -> Result<()> {
        let id = id.into();

        let local = {
            let mut entry = self
                .inner
                .entries
                .get_mut(&id)
                .ok_or_else(|| Error::ServiceNotFound(id.clone()))?;
            let local = entry.local.take().ok_or_else(|| Error::ServiceNotFound(id.clone()))?;
            self.inner.publish(&id, &entry);
            local
        };

        local.clear_listeners();
        self.inner.forwarders.retain(|forward, _| forward.service != id);

        tracing::info!(node = %self.inner.node, service = %id, "unregistered service");
        if self.state() == State::Joined {
            self.inner.outbox.broadcast(Frame::ServiceUnavailable { id })?;
        }
        Ok(())
    }

    /// A live handle for `id`, valid whether or not the service is known yet.
    pub fn get(&self, id: impl Into<ServiceId>) -> ServiceHandle {
        let id = id.into();
        let rx = self
            .inner
            .entries
            .entry(id.clone())
            .or_insert_with(Entry::new)
            .current
            .subscribe();
        ServiceHandle::new(id, rx)
    }

    /// Ids that currently have a selected provider.
    pub fn services(&self) -> Vec<ServiceId> {
        let mut ids: Vec<ServiceId> = self
            .inner
            .entries
            .iter()
            .filter(|entry| entry.current.borrow().is_some())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Ids registered on this node.
    pub fn local_services(&self) -> Vec<ServiceId> {
        let mut ids: Vec<ServiceId> = self
            .inner
            .entries
            .iter()
            .filter(|entry| entry.local.is_some())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// Every provider of `id` in selection order.
    pub fn providers(&self, id: impl Into<ServiceId>) -> Vec<Location> {
        let id = id.into();
        let Some(entry) = self.inner.entries.get(&id) else {
            return Vec::new();
        };

        let mut providers = Vec::new();
        if entry.local.is_some() {
            providers.push(Location::Local);
        }
        providers.extend(entry.remotes.iter().map(|r| Location::Remote(r.owner().clone())));
        providers
    }

    /// Requests sent to peers that are still awaiting a response.
    pub fn pending_requests(&self) -> usize {
        self.inner.pending.len()
    }

    /// A stream of provider changes, one item per change of an id's selected provider.
    pub fn changes(&self) -> broadcast::Receiver<Availability> {
        self.inner.changes.subscribe()
    }

    /// Attaches to the network and starts the protocol.
    ///
    /// Advertises every local service and asks peers to advertise theirs.
    pub async fn join(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        match self.state() {
            State::Created => {}
            State::Joined => return Err(Error::AlreadyJoined),
            State::Left => return Err(Error::AlreadyLeft),
        }

        let events = self.inner.network.events()?;
        let outbox_rx = lifecycle.outbox_rx.take().ok_or(Error::AlreadyJoined)?;

        let writer = outbox::spawn_writer(self.inner.network.clone(), self.inner.pending.clone(), outbox_rx);
        lifecycle.tasks.push(writer);
        self.inner.set_state(State::Joined);

        for (id, shape) in self.inner.local_shapes() {
            self.inner.outbox.broadcast(Frame::ServiceAvailable { id, shape })?;
        }
        self.inner.outbox.broadcast(Frame::Solicit)?;

        let pump = tokio::spawn(pump(Arc::downgrade(&self.inner), events));
        lifecycle.tasks.push(pump);

        self.inner.outbox.flush().await?;
        tracing::info!(node = %self.inner.node, peers = self.inner.network.peers().len(), "joined network");
        Ok(())
    }

    /// Withdraws every local service and detaches from the network.
    ///
    /// Pending requests fail with `NodeUnavailable` and every handle becomes
    /// unavailable.
    pub async fn leave(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        match self.state() {
            State::Joined => {}
            State::Created => return Err(Error::NotJoined),
            State::Left => return Err(Error::AlreadyLeft),
        }

        self.inner.set_state(State::Left);

        for (id, _) in self.inner.local_shapes() {
            if let Err(e) = self.inner.outbox.broadcast(Frame::ServiceUnavailable { id: id.clone() }) {
                tracing::warn!(node = %self.inner.node, service = %id, error = %e, "withdrawal not queued");
            }
        }
        match tokio::time::timeout(self.inner.config.call_timeout, self.inner.outbox.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(node = %self.inner.node, error = %e, "outbox closed before withdrawals"),
            Err(_) => tracing::warn!(node = %self.inner.node, "timed out flushing withdrawals"),
        }

        for task in lifecycle.tasks.drain(..) {
            task.abort();
        }

        let failed = self.inner.pending.fail_all(Error::NodeUnavailable(self.inner.node.clone()));
        self.inner.forwarders.clear();
        for mut entry in self.inner.entries.iter_mut() {
            if let Some(local) = entry.local.take() {
                local.clear_listeners();
            }
            for remote in entry.remotes.drain(..) {
                remote.invalidate();
            }
            let id = entry.key().clone();
            self.inner.publish(&id, &entry);
        }

        tracing::info!(node = %self.inner.node, failed, "left network");
        Ok(())
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("node", &self.inner.node)
            .field("state", &self.state())
            .field("services", &self.services())
            .finish()
    }
}

impl Inner {
    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: State) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Re-selects the provider of `id` and notifies handles if it changed.
    fn publish(&self, id: &ServiceId, entry: &Entry) {
        let next = entry.select();
        let changed = !same_provider(&entry.current.borrow(), &next);
        if !changed {
            return;
        }

        let provider = next.as_ref().map(|reflect| reflect.location());
        entry.current.send_replace(next);
        tracing::debug!(node = %self.node, service = %id, provider = ?provider, "provider changed");
        // no receivers is fine
        let _ = self.changes.send(Availability {
            id: id.clone(),
            provider,
        });
    }

    fn local_shapes(&self) -> Vec<(ServiceId, Shape)> {
        self.entries
            .iter()
            .filter_map(|entry| {
                let local = entry.local.as_ref()?;
                Some((entry.key().clone(), local.contract().shape()))
            })
            .collect()
    }

    fn advertise_to(&self, peer: &NodeId) {
        for (id, shape) in self.local_shapes() {
            if let Err(e) = self.outbox.unicast(peer, Frame::ServiceAvailable { id, shape }) {
                tracing::debug!(node = %self.node, %peer, error = %e, "advertisement not queued");
                return;
            }
        }
    }

    fn on_peer_joined(&self, peer: &NodeId) {
        tracing::debug!(node = %self.node, %peer, "peer joined");
        self.advertise_to(peer);
    }

    fn on_peer_left(&self, peer: &NodeId) {
        for mut entry in self.entries.iter_mut() {
            if let Some(remote) = entry.take_remote_of(peer) {
                remote.invalidate();
                let id = entry.key().clone();
                self.publish(&id, &entry);
            }
        }
        let gone: Vec<Forward> = self
            .forwarders
            .iter()
            .filter(|item| &item.key().peer == peer)
            .map(|item| item.key().clone())
            .collect();
        for forward in gone {
            let Some((forward, listener)) = self.forwarders.remove(&forward) else {
                continue;
            };
            if let Some(local) = self.local(&forward.service) {
                local.detach(&forward.event, &listener);
            }
        }
        let failed = self.pending.fail_peer(peer);
        tracing::info!(node = %self.node, %peer, failed, "peer left");
    }

    fn on_service_available(&self, from: &NodeId, id: ServiceId, shape: Shape) {
        let contract = match ServiceContract::from_shape(shape) {
            Ok(contract) => contract,
            Err(e) => {
                tracing::warn!(node = %self.node, peer = %from, service = %id, error = %e, "ignoring advertisement");
                return;
            }
        };

        let mut entry = self.entries.entry(id.clone()).or_insert_with(Entry::new);
        let remote = || {
            Arc::new(RemoteReflect::new(
                id.clone(),
                from.clone(),
                contract.clone(),
                self.outbox.clone(),
                self.pending.clone(),
                &self.config,
            ))
        };

        match entry.remotes.iter().position(|r| r.owner() == from) {
            Some(pos) if entry.remotes[pos].contract().shape() == contract.shape() => return,
            Some(pos) => {
                let old = std::mem::replace(&mut entry.remotes[pos], remote());
                old.invalidate();
            }
            None => entry.remotes.push(remote()),
        }

        tracing::debug!(node = %self.node, peer = %from, service = %id, "service advertised");
        self.publish(&id, &entry);
    }

    fn on_service_unavailable(&self, from: &NodeId, id: ServiceId) {
        let Some(mut entry) = self.entries.get_mut(&id) else {
            return;
        };
        if let Some(remote) = entry.take_remote_of(from) {
            remote.invalidate();
            tracing::debug!(node = %self.node, peer = %from, service = %id, "service withdrawn");
            self.publish(&id, &entry);
        }
    }

    fn local(&self, id: &ServiceId) -> Option<Arc<LocalReflect>> {
        self.entries.get(id).and_then(|entry| entry.local.clone())
    }

    fn on_call_request(self: &Arc<Self>, from: NodeId, service: ServiceId, method: String, args: Vec<Value>, correlation: u64) {
        let local = self.local(&service);
        let inner = Arc::downgrade(self);

        tokio::spawn(async move {
            let outcome = match local {
                Some(local) => local.serve(&method, args).await,
                None => Outcome::from_result(Err(Error::ServiceNotFound(service.clone()))),
            };

            let Some(inner) = inner.upgrade() else { return };
            if inner.state() != State::Joined {
                return;
            }
            if let Outcome::Err(failure) = &outcome {
                tracing::debug!(node = %inner.node, peer = %from, %service, %method, error = %failure.message, "call failed");
            }

            let frame = Frame::CallResponse { correlation, outcome };
            if let Err(e) = inner.outbox.unicast(&from, frame) {
                tracing::debug!(node = %inner.node, peer = %from, error = %e, "response not queued");
            }
        });
    }

    async fn on_event_subscribe(&self, from: NodeId, service: ServiceId, event: String, correlation: u64) {
        let result = match self.local(&service) {
            None => Err(Error::ServiceNotFound(service.clone())),
            Some(local) => {
                let forward = Forward {
                    peer: from.clone(),
                    service: service.clone(),
                    event: event.clone(),
                };
                if self.forwarders.contains_key(&forward) {
                    Ok(Value::Null)
                } else {
                    let listener = forwarder(self.outbox.clone(), forward.clone());
                    match local.subscribe(&event, listener.clone()).await {
                        Ok(()) => {
                            self.forwarders.insert(forward, listener);
                            Ok(Value::Null)
                        }
                        Err(e) => Err(e),
                    }
                }
            }
        };

        tracing::debug!(node = %self.node, peer = %from, %service, %event, ok = result.is_ok(), "subscription requested");
        let frame = Frame::EventSubscribed {
            correlation,
            outcome: Outcome::from_result(result),
        };
        if let Err(e) = self.outbox.unicast(&from, frame) {
            tracing::debug!(node = %self.node, peer = %from, error = %e, "acknowledgement not queued");
        }
    }

    async fn on_event_unsubscribe(&self, from: NodeId, service: ServiceId, event: String) {
        let forward = Forward {
            peer: from,
            service,
            event,
        };
        let Some((forward, listener)) = self.forwarders.remove(&forward) else {
            return;
        };
        if let Some(local) = self.local(&forward.service) {
            let _ = local.unsubscribe(&forward.event, &listener).await;
        }
        tracing::debug!(node = %self.node, peer = %forward.peer, service = %forward.service, event = %forward.event, "subscription dropped");
    }

    fn on_event_fired(&self, from: &NodeId, service: &ServiceId, event: &str, payload: &[Value]) {
        // the entry lock must be released before listeners run
        let remote = self.entries.get(service).and_then(|entry| entry.remote_of(from));
        match remote {
            Some(remote) => {
                remote.deliver(event, payload);
            }
            None => tracing::trace!(node = %self.node, peer = %from, %service, event, "event for unknown remote"),
        }
    }

    async fn on_frame(self: &Arc<Self>, from: NodeId, frame: Frame) {
        tracing::trace!(node = %self.node, peer = %from, kind = frame.kind(), "frame");
        match frame {
            Frame::ServiceAvailable { id, shape } => self.on_service_available(&from, id, shape),
            Frame::ServiceUnavailable { id } => self.on_service_unavailable(&from, id),
            Frame::CallRequest { service, method, args, correlation } => {
                self.on_call_request(from, service, method, args, correlation)
            }
            Frame::CallResponse { correlation, outcome } | Frame::EventSubscribed { correlation, outcome } => {
                if !self.pending.settle(&from, correlation, outcome) {
                    tracing::warn!(node = %self.node, peer = %from, correlation, "late or unknown response");
                }
            }
            Frame::EventSubscribe { service, event, correlation } => {
                self.on_event_subscribe(from, service, event, correlation).await
            }
            Frame::EventUnsubscribe { service, event } => self.on_event_unsubscribe(from, service, event).await,
            Frame::EventFired { service, event, payload } => self.on_event_fired(&from, &service, &event, &payload),
            Frame::Solicit => self.advertise_to(&from),
        }
    }
}

/// A listener relaying a local event to a subscribed peer.
fn forwarder(outbox: Outbox, forward: Forward) -> Listener {
    Listener::new(move |payload: &[Value]| {
        let frame = Frame::EventFired {
            service: forward.service.clone(),
            event: forward.event.clone(),
            payload: payload.to_vec(),
        };
        if let Err(e) = outbox.unicast(&forward.peer, frame) {
            tracing::trace!(peer = %forward.peer, error = %e, "event not forwarded");
        }
    })
}

/// Consumes network events until the registry is dropped or leaves.
async fn pump(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<NetworkEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else { break };
        match event {
            NetworkEvent::PeerJoined(peer) => inner.on_peer_joined(&peer),
            NetworkEvent::PeerLeft(peer) => inner.on_peer_left(&peer),
            NetworkEvent::Message { from, payload } => match wire::decode(&payload) {
                Ok(frame) => inner.on_frame(from, frame).await,
                Err(e) => tracing::warn!(node = %inner.node, peer = %from, error = %e, "ignoring frame"),
            },
        }
    }
    tracing::debug!("registry pump stopped");
}
