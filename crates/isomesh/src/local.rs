//! # Local Reflect
//!
//! A reflect bound to an in-process implementation. Calls run the handler directly;
//! subscriptions attach to an emitter the implementation fires through.

use std::collections::HashMap;
use std::sync::Arc;

use crate::args::IntoArgs;
use crate::contract::Event;
use crate::contract::Handler;
use crate::contract::ServiceContract;
use crate::error::Error;
use crate::error::Result;
use crate::reflect;
use crate::reflect::Listener;
use crate::reflect::Listeners;
use crate::reflect::Location;
use crate::reflect::Reflect;
use crate::types::ServiceId;
use crate::types::Value;
use crate::wire::Failure;
use crate::wire::FailureKind;
use crate::wire::Outcome;

/// A service implemented in this process.
///
/// Built by `ServiceContract::implement`, which guarantees a handler exists for
/// every declared method.
pub struct LocalReflect {
    id: ServiceId,
    contract: ServiceContract,
    handlers: HashMap<String, Handler>,
    listeners: Arc<Listeners>,
}

impl LocalReflect {
    pub(crate) fn new(id: ServiceId, contract: ServiceContract, handlers: HashMap<String, Handler>) -> Self {
        Self {
            id,
            contract,
            handlers,
            listeners: Arc::new(Listeners::new()),
        }
    }

    /// Returns an emitter the implementation uses to fire this service's events.
    pub fn emitter(&self) -> Emitter {
        Emitter {
            id: self.id.clone(),
            contract: self.contract.clone(),
            listeners: self.listeners.clone(),
        }
    }

    /// Number of listeners currently attached to `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.listeners.count(event)
    }

    /// Removes one listener without going through the async `Reflect` surface.
    pub(crate) fn detach(&self, event: &str, listener: &Listener) -> bool {
        self.listeners.remove(event, listener).is_some()
    }

    /// Runs a call on behalf of a peer.
    ///
    /// Only lookup and arity failures keep their kind. Whatever the handler
    /// returns, even an error of ours from a nested call, is an invocation failure.
    pub(crate) async fn serve(&self, method: &str, args: Vec<Value>) -> Outcome {
        let handler = match self.dispatch(method, args.len()) {
            Ok(handler) => handler,
            Err(e) => return Outcome::Err(Failure::from_error(&e)),
        };
        match handler(args).await {
            Ok(value) => Outcome::Ok { value },
            Err(e) => Outcome::Err(Failure::new(FailureKind::Invocation, e.to_string())),
        }
    }

    fn dispatch(&self, method: &str, found: usize) -> Result<&Handler> {
        let descriptor = reflect::require_method(&self.id, &self.contract, method)?;
        if found != descriptor.arity() {
            return Err(Error::BadArgumentCount {
                method: method.to_string(),
                expected: descriptor.arity(),
                found,
            });
        }

        self.handlers.get(method).ok_or_else(|| Error::UnknownMethod {
            service: self.id.clone(),
            method: method.to_string(),
        })
    }

    pub(crate) fn clear_listeners(&self) {
        self.listeners.clear();
    }
}

#[async_trait::async_trait]
impl Reflect for LocalReflect {
    fn id(&self) -> &ServiceId {
        &self.id
    }

    fn contract(&self) -> &ServiceContract {
        &self.contract
    }

    fn location(&self) -> Location {
        Location::Local
    }

    async fn apply(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        let handler = self.dispatch(method, args.len())?;
        handler(args).await.map_err(into_error)
    }

    async fn subscribe(&self, event: &str, listener: Listener) -> Result<()> {
        reflect::require_event(&self.id, &self.contract, event)?;
        self.listeners.add(event, listener);
        Ok(())
    }

    async fn unsubscribe(&self, event: &str, listener: &Listener) -> Result<bool> {
        reflect::require_event(&self.id, &self.contract, event)?;
        Ok(self.listeners.remove(event, listener).is_some())
    }
}

impl std::fmt::Debug for LocalReflect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalReflect")
            .field("id", &self.id)
            .field("contract", &self.contract.name())
            .finish()
    }
}

/// A handler error surfaces as-is when it already is one of ours, e.g. when the
/// handler itself called another service.
fn into_error(e: anyhow::Error) -> Error {
    match e.downcast::<Error>() {
        Ok(e) => e,
        Err(e) => Error::Implementation(Arc::new(e)),
    }
}

/// Fires the events of one local service.
#[derive(Clone)]
pub struct Emitter {
    id: ServiceId,
    contract: ServiceContract,
    listeners: Arc<Listeners>,
}

impl Emitter {
    /// Delivers `payload` to every listener of `event`. Returns how many were reached.
    pub fn emit(&self, event: &str, payload: Vec<Value>) -> Result<usize> {
        reflect::require_event(&self.id, &self.contract, event)?;
        tracing::trace!("emit {}.{} to {} listeners", self.id, event, self.listeners.count(event));
        Ok(self.listeners.notify(event, &payload))
    }

    /// Typed form of `emit`.
    pub fn fire<P: IntoArgs>(&self, event: &Event<P>, payload: P) -> Result<usize> {
        self.emit(event.name(), payload.into_args()?)
    }
}
