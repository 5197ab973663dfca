//! # Service Reflect
//!
//! The contract-agnostic face of a service: invoke a method by name with positional
//! arguments, subscribe to an event by name. Callers hold a `dyn Reflect` and never
//! learn whether the implementation lives in this process or on another node.

use std::sync::Arc;

use dashmap::DashMap;

use crate::contract::ServiceContract;
use crate::descriptor::EventDescriptor;
use crate::descriptor::MethodDescriptor;
use crate::error::Error;
use crate::error::Result;
use crate::types::NodeId;
use crate::types::ServiceId;
use crate::types::Value;

/// Where a reflect's implementation runs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Location {
    Local,
    Remote(NodeId),
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote(node) => write!(f, "remote({})", node),
        }
    }
}

/// Generic invocation and subscription against one service.
///
/// This trait is designed to be object-safe (`Arc<dyn Reflect>`).
///
/// # invariants
/// - The descriptor maps are fixed at construction.
/// - `apply` fails with `UnknownMethod` for undeclared methods without side effects.
/// - `subscribe`/`unsubscribe` fail with `UnknownEvent` for undeclared events.
#[async_trait::async_trait]
pub trait Reflect: Send + Sync + 'static {
    fn id(&self) -> &ServiceId;

    fn contract(&self) -> &ServiceContract;

    fn location(&self) -> Location;

    /// Invokes `method` with positional `args`.
    async fn apply(&self, method: &str, args: Vec<Value>) -> Result<Value>;

    /// Attaches `listener` to `event`.
    async fn subscribe(&self, event: &str, listener: Listener) -> Result<()>;

    /// Detaches `listener` from `event`. Returns whether it was attached.
    async fn unsubscribe(&self, event: &str, listener: &Listener) -> Result<bool>;

    fn get_method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.contract().method(name)
    }

    fn has_method(&self, name: &str) -> bool {
        self.contract().has_method(name)
    }

    fn methods(&self) -> &[MethodDescriptor] {
        self.contract().methods()
    }

    fn get_event(&self, name: &str) -> Option<&EventDescriptor> {
        self.contract().event(name)
    }

    fn has_event(&self, name: &str) -> bool {
        self.contract().has_event(name)
    }

    fn events(&self) -> &[EventDescriptor] {
        self.contract().events()
    }
}

/// Looks up a method or fails with `UnknownMethod`.
pub(crate) fn require_method<'a>(
    id: &ServiceId,
    contract: &'a ServiceContract,
    method: &str,
) -> Result<&'a MethodDescriptor> {
    contract.method(method).ok_or_else(|| Error::UnknownMethod {
        service: id.clone(),
        method: method.to_string(),
    })
}

/// Looks up an event or fails with `UnknownEvent`.
pub(crate) fn require_event<'a>(
    id: &ServiceId,
    contract: &'a ServiceContract,
    event: &str,
) -> Result<&'a EventDescriptor> {
    contract.event(event).ok_or_else(|| Error::UnknownEvent {
        service: id.clone(),
        event: event.to_string(),
    })
}

/// A callback attached to an event.
///
/// Listeners are compared by identity: a clone is the same listener, two listeners
/// built from equal closures are not.
#[derive(Clone)]
pub struct Listener {
    callback: Arc<dyn Fn(&[Value]) + Send + Sync>,
}

impl Listener {
    pub fn new(f: impl Fn(&[Value]) + Send + Sync + 'static) -> Self {
        Self { callback: Arc::new(f) }
    }

    pub fn notify(&self, payload: &[Value]) {
        (self.callback)(payload)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.callback) as *const ()
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Listener {}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Listener({:p})", self.addr())
    }
}

/// Event name to ordered listeners.
#[derive(Default)]
pub(crate) struct Listeners {
    table: DashMap<String, Vec<Listener>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener and returns how many are now attached to the event.
    pub fn add(&self, event: &str, listener: Listener) -> usize {
        let mut entry = self.table.entry(event.to_string()).or_default();
        entry.push(listener);
        entry.len()
    }

    /// Removes one registration of a listener.
    ///
    /// Returns `None` if it was not attached, otherwise how many remain.
    pub fn remove(&self, event: &str, listener: &Listener) -> Option<usize> {
        let remaining = {
            let mut entry = self.table.get_mut(event)?;
            let pos = entry.iter().position(|l| l == listener)?;
            entry.remove(pos);
            entry.len()
        };
        if remaining == 0 {
            self.table.remove_if(event, |_, listeners| listeners.is_empty());
        }
        Some(remaining)
    }

    pub fn count(&self, event: &str) -> usize {
        self.table.get(event).map(|entry| entry.len()).unwrap_or(0)
    }

    /// Calls every listener of the event with `payload`. Returns how many were called.
    ///
    /// Listeners run after the table lock is released, so they may subscribe or
    /// unsubscribe freely.
    pub fn notify(&self, event: &str, payload: &[Value]) -> usize {
        let listeners: Vec<Listener> = match self.table.get(event) {
            Some(entry) => entry.clone(),
            None => return 0,
        };
        for listener in &listeners {
            listener.notify(payload);
        }
        listeners.len()
    }

    pub fn clear(&self) {
        self.table.clear();
    }
}
