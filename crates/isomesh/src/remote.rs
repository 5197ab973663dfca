//! # Remote Reflect
//!
//! A reflect for a service hosted on another node. Calls become `call-request`
//! frames correlated through the registry's pending table; subscriptions are
//! reference counted per event so only the first listener costs a round trip.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;

use crate::config::Config;
use crate::contract::ServiceContract;
use crate::error::Error;
use crate::error::Result;
use crate::outbox::Outbox;
use crate::pending::PendingCalls;
use crate::reflect;
use crate::reflect::Listener;
use crate::reflect::Listeners;
use crate::reflect::Location;
use crate::reflect::Reflect;
use crate::types::NodeId;
use crate::types::ServiceId;
use crate::types::Value;
use crate::wire::Frame;

/// A service advertised by `owner`.
///
/// Once invalidated (the owner withdrew the service or disconnected) every call and
/// subscription fails with `NodeUnavailable`.
pub struct RemoteReflect {
    id: ServiceId,
    owner: NodeId,
    contract: ServiceContract,
    outbox: Outbox,
    pending: Arc<PendingCalls>,
    call_timeout: Duration,
    subscribe_timeout: Duration,
    listeners: Listeners,
    /// One lock per event, so the 0 to 1 and 1 to 0 transitions of an event never
    /// interleave while other events proceed.
    control: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    invalidated: AtomicBool,
}

impl RemoteReflect {
    pub(crate) fn new(
        id: ServiceId,
        owner: NodeId,
        contract: ServiceContract,
        outbox: Outbox,
        pending: Arc<PendingCalls>,
        config: &Config,
    ) -> Self {
        Self {
            id,
            owner,
            contract,
            outbox,
            pending,
            call_timeout: config.call_timeout,
            subscribe_timeout: config.subscribe_timeout,
            listeners: Listeners::new(),
            control: DashMap::new(),
            invalidated: AtomicBool::new(false),
        }
    }

    /// The node hosting the implementation.
    pub fn owner(&self) -> &NodeId {
        &self.owner
    }

    pub fn is_valid(&self) -> bool {
        !self.invalidated.load(Ordering::SeqCst)
    }

    /// Delivers an `event-fired` payload to local listeners.
    pub(crate) fn deliver(&self, event: &str, payload: &[Value]) -> usize {
        if !self.is_valid() {
            return 0;
        }
        self.listeners.notify(event, payload)
    }

    /// Marks this reflect dead, drops its listeners and rejects its in-flight requests.
    pub(crate) fn invalidate(&self) {
        if self.invalidated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.listeners.clear();
        let failed = self.pending.fail_service(&self.owner, &self.id);
        tracing::debug!("invalidated remote {} on {} ({} requests failed)", self.id, self.owner, failed);
    }

    fn control_of(&self, event: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.control.entry(event.to_string()).or_default().clone()
    }

    fn ensure_valid(&self) -> Result<()> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(Error::NodeUnavailable(self.owner.clone()))
        }
    }

    async fn request_subscription(&self, event: &str) -> Result<()> {
        let reply = self.pending.prepare(&self.owner, &self.id, event);
        let correlation = reply.correlation;

        self.ensure_valid()?;

        let frame = Frame::EventSubscribe {
            service: self.id.clone(),
            event: event.to_string(),
            correlation,
        };
        self.outbox.request(&self.owner, frame, correlation)?;

        let failed = |reason: String| Error::SubscriptionFailed {
            service: self.id.clone(),
            event: event.to_string(),
            reason,
        };
        let timeout_error = failed(format!("not acknowledged within {:?}", self.subscribe_timeout));

        match reply.wait(self.subscribe_timeout, timeout_error).await {
            Ok(_) => Ok(()),
            Err(e @ Error::SubscriptionFailed { .. }) => {
                // the owner may still honour the late request
                self.send_unsubscribe(event);
                Err(e)
            }
            Err(e @ Error::NodeUnavailable(_)) => Err(e),
            Err(e) => Err(failed(e.to_string())),
        }
    }

    fn send_unsubscribe(&self, event: &str) {
        if !self.is_valid() {
            return;
        }
        let frame = Frame::EventUnsubscribe {
            service: self.id.clone(),
            event: event.to_string(),
        };
        if let Err(e) = self.outbox.unicast(&self.owner, frame) {
            tracing::debug!("unsubscribe of {}.{} not sent: {}", self.id, event, e);
        }
    }
}

#[async_trait::async_trait]
impl Reflect for RemoteReflect {
    fn id(&self) -> &ServiceId {
        &self.id
    }

    fn contract(&self) -> &ServiceContract {
        &self.contract
    }

    fn location(&self) -> Location {
        Location::Remote(self.owner.clone())
    }

    async fn apply(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let descriptor = reflect::require_method(&self.id, &self.contract, method)?;
        if args.len() != descriptor.arity() {
            return Err(Error::BadArgumentCount {
                method: method.to_string(),
                expected: descriptor.arity(),
                found: args.len(),
            });
        }

        let reply = self.pending.prepare(&self.owner, &self.id, method);
        let correlation = reply.correlation;

        // checked after registering so a concurrent invalidation cannot miss this call
        self.ensure_valid()?;

        let frame = Frame::CallRequest {
            service: self.id.clone(),
            method: method.to_string(),
            args,
            correlation,
        };
        self.outbox.request(&self.owner, frame, correlation)?;
        tracing::debug!("call {}.{} on {} (#{})", self.id, method, self.owner, correlation);

        let timeout_error = Error::CallTimeout {
            service: self.id.clone(),
            method: method.to_string(),
        };
        reply.wait(self.call_timeout, timeout_error).await
    }

    async fn subscribe(&self, event: &str, listener: Listener) -> Result<()> {
        reflect::require_event(&self.id, &self.contract, event)?;
        self.ensure_valid()?;

        let control = self.control_of(event);
        let _control = control.lock().await;
        if self.listeners.add(event, listener.clone()) > 1 {
            return Ok(());
        }

        match self.request_subscription(event).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.listeners.remove(event, &listener);
                Err(e)
            }
        }
    }

    async fn unsubscribe(&self, event: &str, listener: &Listener) -> Result<bool> {
        reflect::require_event(&self.id, &self.contract, event)?;

        let control = self.control_of(event);
        let _control = control.lock().await;
        match self.listeners.remove(event, listener) {
            None => Ok(false),
            Some(0) => {
                self.send_unsubscribe(event);
                Ok(true)
            }
            Some(_) => Ok(true),
        }
    }
}

impl std::fmt::Debug for RemoteReflect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteReflect")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("contract", &self.contract.name())
            .field("valid", &self.is_valid())
            .finish()
    }
}
