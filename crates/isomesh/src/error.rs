//! # Error Definitions
//!
//! The ledger of every failure a caller of the service layer can observe, from
//! local misuse (duplicate names, missing handlers) to failures of a remote call.

use std::sync::Arc;

use crate::network;
use crate::types::NodeId;
use crate::types::ServiceId;

#[derive(Debug, Clone)]
pub enum Error {
    /// A local implementation is already registered under this id.
    DuplicateService(ServiceId),
    /// A method or event with this name was already described on the contract.
    DuplicateDescriptor(String),
    /// The implementation does not provide a declared method, or provides an undeclared one.
    InvalidImplementation { contract: String, method: String, reason: &'static str },
    /// The method is not part of the service's contract.
    UnknownMethod { service: ServiceId, method: String },
    /// The event is not part of the service's contract.
    UnknownEvent { service: ServiceId, event: String },
    /// The reflect does not advertise something the contract declares.
    ContractMismatch { contract: String, service: ServiceId, missing: String },
    /// Positional arguments did not match the method's parameter count.
    BadArgumentCount { method: String, expected: usize, found: usize },
    /// No provider is currently known for the service.
    ServiceNotFound(ServiceId),
    /// The remote implementation failed; carries the remote error's message.
    RemoteInvocation { message: String },
    /// The local implementation failed. Displays exactly as the handler's error.
    Implementation(Arc<anyhow::Error>),
    /// No response arrived within the configured bound.
    CallTimeout { service: ServiceId, method: String },
    /// The owning node disconnected, withdrew the service, or this node left.
    NodeUnavailable(NodeId),
    /// The owning node did not acknowledge a subscription.
    SubscriptionFailed { service: ServiceId, event: String, reason: String },
    /// `join()` was called on a registry that already joined.
    AlreadyJoined,
    /// The registry has left the network; this state is terminal.
    AlreadyLeft,
    /// `leave()` was called on a registry that never joined.
    NotJoined,
    /// Arguments or results could not be converted to or from their Rust types.
    Codec(String),
    /// The network refused an outbound message.
    Network(network::Error),
    /// A configuration value is out of range.
    InvalidConfiguration { key: &'static str, value: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateService(id) => write!(f, "service '{}' is already registered", id),
            Self::DuplicateDescriptor(name) => write!(f, "'{}' is already described", name),
            Self::InvalidImplementation { contract, method, reason } => {
                write!(f, "invalid implementation of '{}': method '{}' {}", contract, method, reason)
            }
            Self::UnknownMethod { service, method } => {
                write!(f, "service '{}' has no method '{}'", service, method)
            }
            Self::UnknownEvent { service, event } => {
                write!(f, "service '{}' has no event '{}'", service, event)
            }
            Self::ContractMismatch { contract, service, missing } => {
                write!(f, "service '{}' does not satisfy contract '{}': missing {}", service, contract, missing)
            }
            Self::BadArgumentCount { method, expected, found } => {
                write!(f, "method '{}' expects {} arguments, got {}", method, expected, found)
            }
            Self::ServiceNotFound(id) => write!(f, "service '{}' not found", id),
            Self::RemoteInvocation { message } => write!(f, "{}", message),
            Self::Implementation(e) => write!(f, "{}", e),
            Self::CallTimeout { service, method } => {
                write!(f, "call to '{}.{}' timed out", service, method)
            }
            Self::NodeUnavailable(node) => write!(f, "node '{}' is unavailable", node),
            Self::SubscriptionFailed { service, event, reason } => {
                write!(f, "subscription to '{}.{}' failed: {}", service, event, reason)
            }
            Self::AlreadyJoined => write!(f, "registry already joined the network"),
            Self::AlreadyLeft => write!(f, "registry already left the network"),
            Self::NotJoined => write!(f, "registry has not joined the network"),
            Self::Codec(msg) => write!(f, "codec error: {}", msg),
            Self::Network(e) => write!(f, "network error: {}", e),
            Self::InvalidConfiguration { key, value } => {
                write!(f, "invalid configuration: {} = {}", key, value)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Implementation(e) => Some(&***e),
            Self::Network(e) => Some(e),
            _ => None,
        }
    }
}

impl From<network::Error> for Error {
    fn from(e: network::Error) -> Self {
        Self::Network(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Codec(e.to_string())
    }
}

impl From<anyhow::Error> for Error {
    fn from(e: anyhow::Error) -> Self {
        Self::Implementation(Arc::new(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
