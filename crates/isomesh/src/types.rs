//! # Identifiers and Value Types
//!
//! Strong types for the names that travel across the mesh, and the small type
//! vocabulary descriptors use to describe parameters, results and event payloads.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// The dynamic value carried by arguments, results and event payloads.
pub type Value = serde_json::Value;

/// Strong type for service identifiers.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ServiceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServiceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&ServiceId> for ServiceId {
    fn from(id: &ServiceId) -> Self {
        id.clone()
    }
}

/// Strong type for node identifiers.
#[derive(Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The shape of a value as seen by a descriptor.
///
/// Descriptors are compared by name only when a proxy is built; the types are
/// informational and travel with advertisements so remote nodes can inspect them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Type {
    Unit,
    Bool,
    Int,
    Float,
    String,
    List(Box<Type>),
    Option(Box<Type>),
    /// String-keyed map.
    Map(Box<Type>),
    /// Any value, no shape is promised.
    Any,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Unit => write!(f, "unit"),
            Type::Bool => write!(f, "bool"),
            Type::Int => write!(f, "int"),
            Type::Float => write!(f, "float"),
            Type::String => write!(f, "string"),
            Type::List(t) => write!(f, "list<{}>", t),
            Type::Option(t) => write!(f, "option<{}>", t),
            Type::Map(t) => write!(f, "map<{}>", t),
            Type::Any => write!(f, "any"),
        }
    }
}

/// A Rust type that knows which descriptor `Type` it corresponds to.
pub trait Typed {
    fn ty() -> Type;
}

macro_rules! typed {
    ($variant:ident => $($rust:ty),+ $(,)?) => {
        $(
            impl Typed for $rust {
                fn ty() -> Type { Type::$variant }
            }
        )+
    };
}

typed!(Unit => ());
typed!(Bool => bool);
typed!(Int => i8, i16, i32, i64, u8, u16, u32, u64, isize, usize);
typed!(Float => f32, f64);
typed!(String => String, str, char);
typed!(Any => Value);

impl<T: Typed + ?Sized> Typed for &T {
    fn ty() -> Type {
        T::ty()
    }
}

impl<T: Typed> Typed for Vec<T> {
    fn ty() -> Type {
        Type::List(Box::new(T::ty()))
    }
}

impl<T: Typed> Typed for [T] {
    fn ty() -> Type {
        Type::List(Box::new(T::ty()))
    }
}

impl<T: Typed> Typed for Option<T> {
    fn ty() -> Type {
        Type::Option(Box::new(T::ty()))
    }
}

impl<T: Typed> Typed for HashMap<String, T> {
    fn ty() -> Type {
        Type::Map(Box::new(T::ty()))
    }
}

impl<T: Typed> Typed for BTreeMap<String, T> {
    fn ty() -> Type {
        Type::Map(Box::new(T::ty()))
    }
}
