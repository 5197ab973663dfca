//! # Wire Frames
//!
//! The messages registries exchange. Each frame is one JSON object tagged by its
//! `"type"`; the network carries the encoded bytes and never looks inside.

use serde::Deserialize;
use serde::Serialize;

use crate::descriptor::Shape;
use crate::error;
use crate::types::ServiceId;
use crate::types::Value;

#[derive(Debug, Clone)]
pub enum Error {
    /// The bytes are not a frame.
    Malformed(String),
    /// The frame could not be serialized.
    Encode(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(msg) => write!(f, "malformed frame: {}", msg),
            Self::Encode(msg) => write!(f, "frame encoding failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// One protocol message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Frame {
    /// The sender hosts `id` with the given contract shape.
    ServiceAvailable { id: ServiceId, shape: Shape },
    /// The sender no longer hosts `id`.
    ServiceUnavailable { id: ServiceId },
    CallRequest {
        service: ServiceId,
        method: String,
        args: Vec<Value>,
        correlation: u64,
    },
    CallResponse { correlation: u64, outcome: Outcome },
    /// Asks the receiver to forward `event` to the sender; answered with `EventSubscribed`.
    EventSubscribe {
        service: ServiceId,
        event: String,
        correlation: u64,
    },
    EventSubscribed { correlation: u64, outcome: Outcome },
    /// Stops forwarding. Never acknowledged.
    EventUnsubscribe { service: ServiceId, event: String },
    EventFired {
        service: ServiceId,
        event: String,
        payload: Vec<Value>,
    },
    /// Asks the receiver to re-send its advertisements.
    Solicit,
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServiceAvailable { .. } => "service-available",
            Self::ServiceUnavailable { .. } => "service-unavailable",
            Self::CallRequest { .. } => "call-request",
            Self::CallResponse { .. } => "call-response",
            Self::EventSubscribe { .. } => "event-subscribe",
            Self::EventSubscribed { .. } => "event-subscribed",
            Self::EventUnsubscribe { .. } => "event-unsubscribe",
            Self::EventFired { .. } => "event-fired",
            Self::Solicit => "solicit",
        }
    }
}

/// The settled result of a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Outcome {
    Ok { value: Value },
    Err(Failure),
}

impl Outcome {
    /// Builds the outcome a callee sends back for a local result.
    pub fn from_result(result: error::Result<Value>) -> Self {
        match result {
            Ok(value) => Self::Ok { value },
            Err(e) => Self::Err(Failure::from_error(&e)),
        }
    }
}

/// Why the callee could not produce a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    /// The implementation itself failed.
    Invocation,
    ServiceNotFound,
    UnknownMethod,
    UnknownEvent,
    BadArgumentCount,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub found: Option<usize>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            expected: None,
            found: None,
        }
    }

    /// Classifies a callee-side error.
    pub fn from_error(e: &error::Error) -> Self {
        use error::Error as E;
        match e {
            E::ServiceNotFound(_) => Self::new(FailureKind::ServiceNotFound, e.to_string()),
            E::UnknownMethod { .. } => Self::new(FailureKind::UnknownMethod, e.to_string()),
            E::UnknownEvent { .. } => Self::new(FailureKind::UnknownEvent, e.to_string()),
            E::BadArgumentCount { expected, found, .. } => Self {
                expected: Some(*expected),
                found: Some(*found),
                ..Self::new(FailureKind::BadArgumentCount, e.to_string())
            },
            // handler errors travel as their own message
            _ => Self::new(FailureKind::Invocation, e.to_string()),
        }
    }

    /// Rebuilds the caller-side error for a failure of `service`'s `member`.
    pub fn into_error(self, service: &ServiceId, member: &str) -> error::Error {
        use error::Error as E;
        match self.kind {
            FailureKind::Invocation => E::RemoteInvocation { message: self.message },
            FailureKind::ServiceNotFound => E::ServiceNotFound(service.clone()),
            FailureKind::UnknownMethod => E::UnknownMethod {
                service: service.clone(),
                method: member.to_string(),
            },
            FailureKind::UnknownEvent => E::UnknownEvent {
                service: service.clone(),
                event: member.to_string(),
            },
            FailureKind::BadArgumentCount => match (self.expected, self.found) {
                (Some(expected), Some(found)) => E::BadArgumentCount {
                    method: member.to_string(),
                    expected,
                    found,
                },
                _ => E::RemoteInvocation { message: self.message },
            },
        }
    }
}

pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
    serde_json::to_vec(frame).map_err(|e| Error::Encode(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<Frame> {
    serde_json::from_slice(bytes).map_err(|e| Error::Malformed(e.to_string()))
}
