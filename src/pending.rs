//! Pending-request table for the client
//!
//! Every outbound request parks a type-erased resumer here, keyed by its
//! id. When the matching response frame arrives the resumer re-decodes the
//! raw result into the static type the caller asked for and completes the
//! caller's oneshot. Disconnect drains the table, completing every waiter
//! with a synthetic internal error.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::Value;

use crate::error::JsonRpcError;
use crate::protocol::RequestId;

/// Completes one waiter with the raw outcome of its request.
pub(crate) type Resumer = Box<dyn FnOnce(Result<Value, JsonRpcError>) + Send>;

/// Table of in-flight requests plus the session-unique id generator.
pub(crate) struct PendingRequests {
    entries: Mutex<HashMap<RequestId, Resumer>>,
    next_id: AtomicI64,
}

impl PendingRequests {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Allocate a fresh id, unique within this session.
    pub(crate) fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Park a resumer for an outbound request.
    pub(crate) fn park(&self, id: RequestId, resumer: Resumer) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(id, resumer);
    }

    /// Remove an entry without completing it (used when the transport send
    /// fails synchronously and the caller is failed directly).
    pub(crate) fn discard(&self, id: &RequestId) -> bool {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(id).is_some()
    }

    /// Complete the waiter for `id` with the given outcome.
    ///
    /// Returns `false` if no waiter is parked under that id.
    pub(crate) fn complete(&self, id: &RequestId, outcome: Result<Value, JsonRpcError>) -> bool {
        let resumer = {
            let mut entries = self.entries.lock().unwrap();
            entries.remove(id)
        };
        match resumer {
            Some(resumer) => {
                resumer(outcome);
                true
            }
            None => false,
        }
    }

    /// Complete every remaining waiter with the same error.
    pub(crate) fn drain(&self, error: JsonRpcError) {
        let drained: Vec<Resumer> = {
            let mut entries = self.entries.lock().unwrap();
            entries.drain().map(|(_, resumer)| resumer).collect()
        };
        for resumer in drained {
            resumer(Err(error.clone()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
