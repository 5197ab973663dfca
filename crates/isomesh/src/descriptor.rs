//! # Method and Event Descriptors
//!
//! Pure data describing one method or one event of a service. Descriptors are
//! captured into a contract once and never mutated afterwards; a contract's
//! descriptors also form the `Shape` that advertisements carry across the wire.

use serde::Deserialize;
use serde::Serialize;

use crate::types::Type;

/// The signature of a single method.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodDescriptor {
    pub name: String,
    pub params: Vec<Type>,
    pub returns: Type,
}

impl MethodDescriptor {
    pub fn new(name: impl Into<String>, params: Vec<Type>, returns: Type) -> Self {
        Self { name: name.into(), params, returns }
    }

    /// Number of positional arguments.
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// The payload signature of a single event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDescriptor {
    pub name: String,
    pub payload: Vec<Type>,
}

impl EventDescriptor {
    pub fn new(name: impl Into<String>, payload: Vec<Type>) -> Self {
        Self { name: name.into(), payload }
    }
}

/// The wire form of a contract: its name and descriptors in declaration order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub name: String,
    #[serde(default)]
    pub methods: Vec<MethodDescriptor>,
    #[serde(default)]
    pub events: Vec<EventDescriptor>,
}
