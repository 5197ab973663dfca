//! Live service handles.
//!
//! `Services::get` hands out a `ServiceHandle` whether or not the service exists
//! yet. The handle follows the registry's selected provider for its id, so it can
//! become available, switch provider, or go away without being fetched again.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::args::IntoArgs;
use crate::contract::Contract;
use crate::contract::ServiceContract;
use crate::error::Error;
use crate::error::Result;
use crate::proxy::Proxy;
use crate::reflect::Listener;
use crate::reflect::Location;
use crate::reflect::Reflect;
use crate::types::ServiceId;
use crate::types::Value;

pub(crate) type Selected = Option<Arc<dyn Reflect>>;

#[derive(Clone)]
pub struct ServiceHandle {
    id: ServiceId,
    rx: watch::Receiver<Selected>,
}

impl ServiceHandle {
    pub(crate) fn new(id: ServiceId, rx: watch::Receiver<Selected>) -> Self {
        Self { id, rx }
    }

    pub fn id(&self) -> &ServiceId {
        &self.id
    }

    /// True while some provider is selected for this id.
    pub fn available(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Where the selected provider runs.
    pub fn location(&self) -> Option<Location> {
        self.rx.borrow().as_ref().map(|reflect| reflect.location())
    }

    /// The selected provider, or `ServiceNotFound`.
    pub fn reflect(&self) -> Result<Arc<dyn Reflect>> {
        self.rx
            .borrow()
            .clone()
            .ok_or_else(|| Error::ServiceNotFound(self.id.clone()))
    }

    pub async fn apply(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.reflect()?.apply(method, args).await
    }

    /// Calls a method by name with positional arguments, e.g. `call("hello", ("world",))`.
    pub async fn call(&self, method: &str, args: impl IntoArgs) -> Result<Value> {
        let args = args.into_args()?;
        self.reflect()?.apply(method, args).await
    }

    /// A typed view over the currently selected provider.
    ///
    /// The proxy is bound to that provider; it does not follow later changes.
    pub fn proxy(&self, contract: &ServiceContract) -> Result<Proxy> {
        Proxy::new(self.reflect()?, contract)
    }

    /// A user-defined typed view, see `Contract`.
    pub fn bind<C: Contract>(&self) -> Result<C> {
        let contract = C::describe()?;
        Ok(C::from_proxy(self.proxy(&contract)?))
    }

    /// Subscribes on the currently selected provider.
    pub async fn subscribe(&self, event: &str, listener: Listener) -> Result<()> {
        self.reflect()?.subscribe(event, listener).await
    }

    pub async fn unsubscribe(&self, event: &str, listener: &Listener) -> Result<bool> {
        self.reflect()?.unsubscribe(event, listener).await
    }

    /// Waits up to `timeout` for a provider. Returns whether one is selected.
    pub async fn wait_available(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |selected| selected.is_some()).await
    }

    /// Waits up to `timeout` for the service to go away. Returns whether it did.
    pub async fn wait_unavailable(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |selected| selected.is_none()).await
    }

    async fn wait_until(&self, timeout: Duration, done: impl FnMut(&Selected) -> bool) -> bool {
        let mut rx = self.rx.clone();
        matches!(tokio::time::timeout(timeout, rx.wait_for(done)).await, Ok(Ok(_)))
    }
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("id", &self.id)
            .field("location", &self.location())
            .finish()
    }
}
