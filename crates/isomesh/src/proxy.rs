//! # Typed Service Proxy
//!
//! A view over any reflect that has been checked against a contract. Typed method
//! keys marshal Rust arguments into positional values and decode the result back,
//! so the same proxy works whether the service is local or remote.
//!
//! ## Invariants
//!
//! - A proxy exists only for a reflect advertising every method and event of its
//!   contract (by name).
//! - Invocation is `reflect.apply(name, args)`; the proxy holds no other state.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::args;
use crate::args::FromArgs;
use crate::args::IntoArgs;
use crate::contract::Event;
use crate::contract::Method;
use crate::contract::ServiceContract;
use crate::error::Result;
use crate::reflect::Listener;
use crate::reflect::Reflect;
use crate::types::ServiceId;
use crate::types::Value;

#[derive(Clone)]
pub struct Proxy {
    reflect: Arc<dyn Reflect>,
    contract: ServiceContract,
}

impl Proxy {
    /// Wraps `reflect`, failing with `ContractMismatch` if it does not advertise
    /// everything `contract` declares.
    pub fn new(reflect: Arc<dyn Reflect>, contract: &ServiceContract) -> Result<Self> {
        contract.check(reflect.as_ref())?;
        Ok(Self {
            reflect,
            contract: contract.clone(),
        })
    }

    pub fn id(&self) -> &ServiceId {
        self.reflect.id()
    }

    pub fn contract(&self) -> &ServiceContract {
        &self.contract
    }

    pub fn reflect(&self) -> &Arc<dyn Reflect> {
        &self.reflect
    }

    /// Calls the method a typed key names.
    pub async fn invoke<A, R>(&self, method: &Method<A, R>, args: A) -> Result<R>
    where
        A: IntoArgs,
        R: DeserializeOwned,
    {
        let value = self.reflect.apply(method.name(), args.into_args()?).await?;
        args::from_value(value)
    }

    /// Calls a method by name with positional arguments.
    pub async fn call(&self, method: &str, args: impl IntoArgs) -> Result<Value> {
        self.reflect.apply(method, args.into_args()?).await
    }

    /// Subscribes `f` to the event a typed key names.
    ///
    /// Payloads that do not decode into `P` are logged and skipped. The returned
    /// listener is the handle to unsubscribe with.
    pub async fn subscribe<P, F>(&self, event: &Event<P>, f: F) -> Result<Listener>
    where
        P: FromArgs + 'static,
        F: Fn(P) + Send + Sync + 'static,
    {
        let service = self.id().clone();
        let name = event.name();
        let listener = Listener::new(move |payload: &[Value]| match P::from_args(payload.to_vec()) {
            Ok(payload) => f(payload),
            Err(e) => tracing::warn!("dropping {}.{} payload: {}", service, name, e),
        });

        self.reflect.subscribe(name, listener.clone()).await?;
        Ok(listener)
    }

    pub async fn unsubscribe<P>(&self, event: &Event<P>, listener: &Listener) -> Result<bool> {
        self.reflect.unsubscribe(event.name(), listener).await
    }
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("id", self.reflect.id())
            .field("contract", &self.contract.name())
            .field("location", &self.reflect.location())
            .finish()
    }
}
