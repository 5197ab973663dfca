//! # Pending Replies
//!
//! Correlates outbound requests with their responses. Every request registers a
//! oneshot under a fresh correlation id; the pump resolves it when the matching
//! response arrives, or a topology change fails it. A caller that stops waiting
//! takes its entry with it.

use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::error::Error;
use crate::error::Result;
use crate::types::NodeId;
use crate::types::ServiceId;
use crate::types::Value;
use crate::wire::Outcome;

/// An in-flight request waiting on a peer.
struct PendingCall {
    peer: NodeId,
    service: ServiceId,
    /// The method or event the request is about.
    member: String,
    tx: oneshot::Sender<Result<Value>>,
}

/// The receiving half of a registered request.
///
/// Dropping it unregisters the request, so an abandoned call does not linger in
/// the table until its peer leaves.
pub(crate) struct PendingReply {
    pub correlation: u64,
    peer: NodeId,
    rx: oneshot::Receiver<Result<Value>>,
    table: Weak<PendingCalls>,
}

impl PendingReply {
    /// Awaits a registered request for at most `timeout`.
    ///
    /// On timeout `timeout_error` is returned. The entry is gone once this returns
    /// or is dropped.
    pub async fn wait(mut self, timeout: Duration, timeout_error: Error) -> Result<Value> {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::NodeUnavailable(self.peer.clone())),
            Err(_) => Err(timeout_error),
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            table.calls.remove(&self.correlation);
        }
    }
}

/// Correlation id table shared by every remote reflect of one registry.
///
/// Ids come from a monotonic counter starting at 1 and are never reused for the
/// lifetime of the registry.
pub(crate) struct PendingCalls {
    seq: AtomicU64,
    calls: DashMap<u64, PendingCall>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(1),
            calls: DashMap::new(),
        }
    }

    /// Registers a request addressed to `peer` about `service`'s `member`.
    pub fn prepare(self: &Arc<Self>, peer: &NodeId, service: &ServiceId, member: &str) -> PendingReply {
        let correlation = self.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        self.calls.insert(correlation, PendingCall {
            peer: peer.clone(),
            service: service.clone(),
            member: member.to_string(),
            tx,
        });

        PendingReply {
            correlation,
            peer: peer.clone(),
            rx,
            table: Arc::downgrade(self),
        }
    }

    /// Settles the request `correlation` with a response from `from`.
    ///
    /// Returns false for unknown, already settled, or misaddressed responses.
    pub fn settle(&self, from: &NodeId, correlation: u64, outcome: Outcome) -> bool {
        match self.calls.remove_if(&correlation, |_, call| &call.peer == from) {
            Some((_, call)) => {
                let result = match outcome {
                    Outcome::Ok { value } => Ok(value),
                    Outcome::Err(failure) => Err(failure.into_error(&call.service, &call.member)),
                };
                // ignore a caller that stopped waiting
                let _ = call.tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Settles a request regardless of who it was addressed to.
    pub fn fail(&self, correlation: u64, error: Error) -> bool {
        match self.calls.remove(&correlation) {
            Some((_, call)) => {
                let _ = call.tx.send(Err(error));
                true
            }
            None => false,
        }
    }

    /// Rejects every request addressed to `peer`.
    pub fn fail_peer(&self, peer: &NodeId) -> usize {
        self.fail_where(|call| &call.peer == peer, Error::NodeUnavailable(peer.clone()))
    }

    /// Rejects every request addressed to `peer` for `service`.
    pub fn fail_service(&self, peer: &NodeId, service: &ServiceId) -> usize {
        self.fail_where(
            |call| &call.peer == peer && &call.service == service,
            Error::NodeUnavailable(peer.clone()),
        )
    }

    /// Rejects every request with `error`.
    pub fn fail_all(&self, error: Error) -> usize {
        self.fail_where(|_| true, error)
    }

    fn fail_where(&self, matches: impl Fn(&PendingCall) -> bool, error: Error) -> usize {
        let keys: Vec<u64> = self
            .calls
            .iter()
            .filter(|entry| matches(entry.value()))
            .map(|entry| *entry.key())
            .collect();

        let mut failed = 0;
        for key in keys {
            if let Some((_, call)) = self.calls.remove(&key) {
                let _ = call.tx.send(Err(error.clone()));
                failed += 1;
            }
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}
