//! Request correlation and timeout engine.
//!
//! One `PendingRequests` per provider. It hands out request ids, keeps the
//! in-flight map, and guarantees that every registered request settles
//! exactly once: by a matching response, by its deadline, or by provider
//! teardown. An entry leaves the map the moment it settles.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use super::errors::McpError;
use super::types::JsonRpcResponse;

type Outcome = Result<serde_json::Value, McpError>;

/// An in-flight request awaiting its response.
struct PendingRequest {
    method: String,
    deadline: Instant,
    tx: oneshot::Sender<Outcome>,
}

/// Handle returned by [`PendingRequests::register`]; consumed by
/// [`PendingRequests::complete`].
pub struct Ticket {
    pub id: u64,
    method: String,
    timeout: Duration,
    rx: oneshot::Receiver<Outcome>,
}

/// Diagnostic view of one in-flight request.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct InFlight {
    pub id: u64,
    pub method: String,
    pub overdue: bool,
}

/// Per-provider id counter and pending-request map.
pub struct PendingRequests {
    provider: String,
    next_id: AtomicU64,
    entries: Mutex<HashMap<u64, PendingRequest>>,
}

impl PendingRequests {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u64, PendingRequest>> {
        // Nothing panics while holding the lock; recover rather than poison the provider.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate the next id and register a pending entry with its deadline.
    pub fn register(&self, method: &str, timeout: Duration) -> Ticket {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock().insert(
            id,
            PendingRequest {
                method: method.to_string(),
                deadline: Instant::now() + timeout,
                tx,
            },
        );
        Ticket {
            id,
            method: method.to_string(),
            timeout,
            rx,
        }
    }

    /// Route a response to its pending entry.
    ///
    /// Returns `false` when no entry matches (already settled, never issued,
    /// or an unsolicited message); the response is dropped.
    pub fn settle(&self, response: JsonRpcResponse) -> bool {
        let outcome = match response.error {
            Some(err) => Err(McpError::ServerError {
                code: err.code,
                message: err.message,
                data: err.data,
            }),
            None => Ok(response.result.unwrap_or(serde_json::Value::Null)),
        };
        self.resolve(response.id, outcome)
    }

    /// Settle a pending entry as a failure.
    pub fn fail(&self, id: u64, error: McpError) -> bool {
        self.resolve(id, Err(error))
    }

    fn resolve(&self, id: u64, outcome: Outcome) -> bool {
        let mut entries = self.lock();
        match entries.remove(&id) {
            Some(entry) => {
                // The receiver may already be gone if the caller was dropped.
                let _ = entry.tx.send(outcome);
                true
            }
            None => {
                tracing::debug!(provider = %self.provider, id, "dropping response with no pending request");
                false
            }
        }
    }

    /// Remove an entry without settling it. Returns whether it was present.
    fn evict(&self, id: u64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Reject every pending entry and clear the map. Returns how many were rejected.
    pub fn reject_all<F>(&self, make_error: F) -> usize
    where
        F: Fn() -> McpError,
    {
        let drained: Vec<(u64, PendingRequest)> = self.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            tracing::debug!(provider = %self.provider, id, method = %entry.method, "rejecting pending request");
            let _ = entry.tx.send(Err(make_error()));
        }
        count
    }

    /// Number of requests currently in flight.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Snapshot of in-flight requests, ordered by id.
    pub fn in_flight(&self) -> Vec<InFlight> {
        let now = Instant::now();
        let mut list: Vec<InFlight> = self
            .lock()
            .iter()
            .map(|(id, entry)| InFlight {
                id: *id,
                method: entry.method.clone(),
                overdue: entry.deadline <= now,
            })
            .collect();
        list.sort_by_key(|f| f.id);
        list
    }

    /// Drive a registered request to its single outcome.
    ///
    /// `send` puts the request on the wire (and, for request/response
    /// transports, may settle it directly). The ticket's deadline covers both
    /// the send and the wait for the matching response.
    pub async fn complete<F>(&self, ticket: Ticket, send: F) -> Outcome
    where
        F: Future<Output = Result<(), McpError>>,
    {
        let Ticket {
            id,
            method,
            timeout,
            mut rx,
        } = ticket;
        // Evicts the entry if the caller drops this future mid-flight.
        let _guard = EvictOnDrop { pending: self, id };

        let sleep = tokio::time::sleep(timeout);
        tokio::pin!(sleep);

        let sent = tokio::select! {
            sent = send => sent,
            _ = &mut sleep => return self.expire(id, &method, timeout, rx),
        };
        if let Err(e) = sent {
            if self.evict(id) {
                return Err(e);
            }
            // The transport settled the entry before failing; report that outcome.
            return rx.try_recv().unwrap_or(Err(e));
        }

        tokio::select! {
            outcome = &mut rx => outcome.unwrap_or_else(|_| {
                Err(McpError::ProviderShutdown {
                    name: self.provider.clone(),
                })
            }),
            _ = &mut sleep => self.expire(id, &method, timeout, rx),
        }
    }

    fn expire(
        &self,
        id: u64,
        method: &str,
        timeout: Duration,
        mut rx: oneshot::Receiver<Outcome>,
    ) -> Outcome {
        let timeout_err = || McpError::Timeout {
            provider: self.provider.clone(),
            method: method.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        };
        if self.evict(id) {
            tracing::warn!(provider = %self.provider, id, method, "request timed out");
            return Err(timeout_err());
        }
        // Settled in the same instant the deadline fired; the outcome is already in the channel.
        rx.try_recv().unwrap_or_else(|_| Err(timeout_err()))
    }
}

struct EvictOnDrop<'a> {
    pending: &'a PendingRequests,
    id: u64,
}

impl Drop for EvictOnDrop<'_> {
    fn drop(&mut self) {
        self.pending.evict(self.id);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
