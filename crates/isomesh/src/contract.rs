//! # Service Contracts
//!
//! A contract is the shared, static description of a service: the methods it
//! answers and the events it fires. Providers bind an implementation against it,
//! callers wrap a reflect in a typed proxy checked against it.
//!
//! ## Philosophy
//!
//! - **Describe Once**: A contract is built with a fluent describer and then frozen.
//!   Cloning a contract shares it.
//! - **Names Are the Boundary**: Compatibility between a contract and a reflect is
//!   decided by method and event names. Types are carried for inspection only.
//! - **Typed Keys**: `Method<A, R>` and `Event<P>` are zero-sized keys that remember
//!   the Rust types of a descriptor, so proxies and handlers stay typed while the
//!   wire stays dynamic.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;

use crate::args;
use crate::args::FromArgs;
use crate::args::ParamTypes;
use crate::descriptor::EventDescriptor;
use crate::descriptor::MethodDescriptor;
use crate::descriptor::Shape;
use crate::error::Error;
use crate::error::Result;
use crate::local::LocalReflect;
use crate::proxy::Proxy;
use crate::reflect::Reflect;
use crate::types::ServiceId;
use crate::types::Type;
use crate::types::Typed;
use crate::types::Value;

/// A frozen, shareable service description.
#[derive(Clone)]
pub struct ServiceContract {
    inner: Arc<ContractInner>,
}

struct ContractInner {
    name: String,
    methods: Vec<MethodDescriptor>,
    method_index: HashMap<String, usize>,
    events: Vec<EventDescriptor>,
    event_index: HashMap<String, usize>,
}

impl ServiceContract {
    /// Starts describing a contract with the given identity.
    pub fn builder(name: impl Into<String>) -> ContractBuilder {
        ContractBuilder {
            name: name.into(),
            methods: Vec::new(),
            method_index: HashMap::new(),
            events: Vec::new(),
            event_index: HashMap::new(),
        }
    }

    /// Rebuilds a contract from its wire form.
    ///
    /// Fails with `DuplicateDescriptor` if the shape names a method or event twice.
    pub fn from_shape(shape: Shape) -> Result<Self> {
        let mut builder = Self::builder(shape.name);
        for m in shape.methods {
            builder = builder.describe_method(m.name, m.params, m.returns)?;
        }
        for e in shape.events {
            builder = builder.describe_event(e.name, e.payload)?;
        }
        Ok(builder.build())
    }

    /// The wire form of this contract.
    pub fn shape(&self) -> Shape {
        Shape {
            name: self.inner.name.clone(),
            methods: self.inner.methods.clone(),
            events: self.inner.events.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.inner.method_index.get(name).map(|&i| &self.inner.methods[i])
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.inner.method_index.contains_key(name)
    }

    /// All methods, in declaration order.
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.inner.methods
    }

    pub fn event(&self, name: &str) -> Option<&EventDescriptor> {
        self.inner.event_index.get(name).map(|&i| &self.inner.events[i])
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.inner.event_index.contains_key(name)
    }

    /// All events, in declaration order.
    pub fn events(&self) -> &[EventDescriptor] {
        &self.inner.events
    }

    /// Binds an implementation to this contract, producing a local reflect.
    ///
    /// Every declared method must have a handler, and every handler must belong to a
    /// declared method; otherwise fails with `InvalidImplementation`.
    pub fn implement(&self, id: impl Into<ServiceId>, implementation: Implementation) -> Result<LocalReflect> {
        for method in self.methods() {
            if !implementation.handlers.contains_key(&method.name) {
                return Err(Error::InvalidImplementation {
                    contract: self.name().to_string(),
                    method: method.name.clone(),
                    reason: "is not implemented",
                });
            }
        }

        if let Some(extra) = implementation.handlers.keys().find(|name| !self.has_method(name)) {
            return Err(Error::InvalidImplementation {
                contract: self.name().to_string(),
                method: extra.clone(),
                reason: "is not declared",
            });
        }

        Ok(LocalReflect::new(id.into(), self.clone(), implementation.handlers))
    }

    /// Verifies that a reflect advertises every method and event of this contract.
    ///
    /// Only names are compared; parameter and result types are the caller's concern.
    pub fn check(&self, reflect: &dyn Reflect) -> Result<()> {
        let mismatch = |missing: String| Error::ContractMismatch {
            contract: self.name().to_string(),
            service: reflect.id().clone(),
            missing,
        };

        for method in self.methods() {
            if !reflect.has_method(&method.name) {
                return Err(mismatch(format!("method '{}'", method.name)));
            }
        }

        for event in self.events() {
            if !reflect.has_event(&event.name) {
                return Err(mismatch(format!("event '{}'", event.name)));
            }
        }

        Ok(())
    }
}

impl std::fmt::Debug for ServiceContract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContract")
            .field("name", &self.inner.name)
            .field("methods", &self.inner.methods)
            .field("events", &self.inner.events)
            .finish()
    }
}

/// Fluent describer for a `ServiceContract`.
pub struct ContractBuilder {
    name: String,
    methods: Vec<MethodDescriptor>,
    method_index: HashMap<String, usize>,
    events: Vec<EventDescriptor>,
    event_index: HashMap<String, usize>,
}

impl ContractBuilder {
    /// Appends a method descriptor.
    pub fn describe_method(
        mut self,
        name: impl Into<String>,
        params: impl IntoIterator<Item = Type>,
        returns: Type,
    ) -> Result<Self> {
        let name = name.into();
        if self.method_index.contains_key(&name) {
            return Err(Error::DuplicateDescriptor(name));
        }
        self.method_index.insert(name.clone(), self.methods.len());
        self.methods.push(MethodDescriptor::new(name, params.into_iter().collect(), returns));
        Ok(self)
    }

    /// Appends an event descriptor.
    pub fn describe_event(mut self, name: impl Into<String>, payload: impl IntoIterator<Item = Type>) -> Result<Self> {
        let name = name.into();
        if self.event_index.contains_key(&name) {
            return Err(Error::DuplicateDescriptor(name));
        }
        self.event_index.insert(name.clone(), self.events.len());
        self.events.push(EventDescriptor::new(name, payload.into_iter().collect()));
        Ok(self)
    }

    /// Appends the descriptor a typed method key stands for.
    pub fn method<A: ParamTypes, R: Typed>(self, method: &Method<A, R>) -> Result<Self> {
        self.describe_method(method.name(), A::param_types(), R::ty())
    }

    /// Appends the descriptor a typed event key stands for.
    pub fn event<P: ParamTypes>(self, event: &Event<P>) -> Result<Self> {
        self.describe_event(event.name(), P::param_types())
    }

    pub fn build(self) -> ServiceContract {
        ServiceContract {
            inner: Arc::new(ContractInner {
                name: self.name,
                methods: self.methods,
                method_index: self.method_index,
                events: self.events,
                event_index: self.event_index,
            }),
        }
    }
}

/// A typed key naming a method that takes `A` and returns `R`.
pub struct Method<A, R> {
    name: &'static str,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R> Method<A, R> {
    pub const fn new(name: &'static str) -> Self {
        Self { name, _marker: PhantomData }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<A, R> Clone for Method<A, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A, R> Copy for Method<A, R> {}

/// A typed key naming an event with payload `P`.
pub struct Event<P> {
    name: &'static str,
    _marker: PhantomData<fn(P)>,
}

impl<P> Event<P> {
    pub const fn new(name: &'static str) -> Self {
        Self { name, _marker: PhantomData }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<P> Clone for Event<P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P> Copy for Event<P> {}

/// A strongly-typed view of a service.
///
/// Implementors describe their contract and wrap a checked `Proxy`; the typed
/// methods on the implementor forward to `Proxy::invoke`.
pub trait Contract: Sized {
    fn describe() -> Result<ServiceContract>;
    fn from_proxy(proxy: Proxy) -> Self;
}

pub(crate) type Handler = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, anyhow::Result<Value>> + Send + Sync>;

/// The object a contract binds: one async handler per method name.
#[derive(Default)]
pub struct Implementation {
    handlers: HashMap<String, Handler>,
}

impl Implementation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler working on raw positional values.
    pub fn handler<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |args| f(args).boxed());
        self.handlers.insert(name.into(), handler);
        self
    }

    /// Adds a handler for a typed method key.
    ///
    /// Arguments are decoded into `A` before the handler runs and its result is
    /// encoded from `R`; conversion failures surface as the handler's error.
    pub fn method<A, R, F, Fut>(self, method: &Method<A, R>, f: F) -> Self
    where
        A: FromArgs + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        let f = Arc::new(f);
        self.handler(method.name(), move |args| {
            let f = f.clone();
            async move {
                let args = A::from_args(args)?;
                let value = f(args).await?;
                Ok::<Value, anyhow::Error>(args::to_value(value)?)
            }
        })
    }
}
