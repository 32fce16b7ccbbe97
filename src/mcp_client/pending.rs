//! In-flight request tracking for one connection.
//!
//! Each outbound request registers a [`PendingSlot`] holding the receiving end
//! of a oneshot channel. The read loop resolves entries by id; the slot removes
//! its own entry when dropped, so a timed-out or cancelled caller never leaks
//! an entry. Once the connection closes, every remaining entry is failed with
//! `TransportClosed` and further registrations are refused.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;

use super::errors::McpError;
use super::types::{JsonRpcResponse, RequestId};

/// What a waiting caller eventually receives.
pub type Reply = Result<JsonRpcResponse, McpError>;

struct PendingEntry {
    created_at: Instant,
    method: String,
    resolver: oneshot::Sender<Reply>,
}

struct TableState {
    entries: HashMap<RequestId, PendingEntry>,
    /// Set once; the reason the connection closed.
    closed: Option<String>,
}

/// Outcome of delivering a response to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// A waiting caller received the response.
    Delivered,
    /// No entry with that id: a late reply after timeout, or a duplicate.
    Unknown,
    /// The entry existed but its caller had already gone away.
    CallerGone,
}

/// Map of request id → single-assignment reply slot.
pub struct PendingTable {
    server: String,
    next_id: AtomicI64,
    state: Mutex<TableState>,
}

impl PendingTable {
    pub fn new(server: &str) -> Self {
        Self {
            server: server.to_string(),
            next_id: AtomicI64::new(1),
            state: Mutex::new(TableState {
                entries: HashMap::new(),
                closed: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        // A panic while holding the lock cannot leave the map half-updated.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate the next id on this connection.
    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a new in-flight request.
    ///
    /// Fails with `TransportClosed` once the connection has closed, so a caller
    /// racing the end of the stream never waits for a reply that cannot come.
    pub fn register(self: &Arc<Self>, method: &str) -> Result<PendingSlot, McpError> {
        let mut state = self.lock();
        if let Some(reason) = &state.closed {
            return Err(McpError::TransportClosed {
                server: self.server.clone(),
                reason: reason.clone(),
            });
        }

        let mut id = self.next_id();
        while state.entries.contains_key(&id) {
            id = self.next_id();
        }

        let (tx, rx) = oneshot::channel();
        state.entries.insert(
            id.clone(),
            PendingEntry {
                created_at: Instant::now(),
                method: method.to_string(),
                resolver: tx,
            },
        );

        Ok(PendingSlot {
            id,
            rx,
            table: Arc::clone(self),
        })
    }

    /// Hand a response to the caller waiting on its id.
    pub fn resolve(&self, response: JsonRpcResponse) -> Resolution {
        let entry = self.lock().entries.remove(&response.id);
        match entry {
            None => Resolution::Unknown,
            Some(entry) => match entry.resolver.send(Ok(response)) {
                Ok(()) => Resolution::Delivered,
                Err(_) => Resolution::CallerGone,
            },
        }
    }

    /// Drop an entry without resolving it. Returns whether it was present.
    pub fn cancel(&self, id: &RequestId) -> bool {
        self.lock().entries.remove(id).is_some()
    }

    /// Mark the connection closed and fail every outstanding entry.
    ///
    /// Returns how many entries were failed. Only the first call has any
    /// effect; later calls return 0.
    pub fn close(&self, reason: &str) -> usize {
        let drained: Vec<(RequestId, PendingEntry)> = {
            let mut state = self.lock();
            if state.closed.is_some() {
                return 0;
            }
            state.closed = Some(reason.to_string());
            state.entries.drain().collect()
        };

        let count = drained.len();
        for (id, entry) in drained {
            tracing::debug!(
                server = %self.server,
                id = %id,
                method = %entry.method,
                age_ms = entry.created_at.elapsed().as_millis() as u64,
                "failing pending request: transport closed"
            );
            let _ = entry.resolver.send(Err(McpError::TransportClosed {
                server: self.server.clone(),
                reason: reason.to_string(),
            }));
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    /// Number of requests currently awaiting a reply.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The longest-waiting request: `(id, method, age)`.
    pub fn oldest(&self) -> Option<(RequestId, String, Duration)> {
        let state = self.lock();
        state
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.created_at)
            .map(|(id, entry)| (id.clone(), entry.method.clone(), entry.created_at.elapsed()))
    }
}

/// The caller's handle on one in-flight request.
pub struct PendingSlot {
    id: RequestId,
    rx: oneshot::Receiver<Reply>,
    table: Arc<PendingTable>,
}

impl PendingSlot {
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Wait for the reply (or for the connection to close).
    pub async fn wait(&mut self) -> Reply {
        match (&mut self.rx).await {
            Ok(reply) => reply,
            Err(_) => Err(McpError::TransportClosed {
                server: self.table.server.clone(),
                reason: "pending entry dropped without a reply".into(),
            }),
        }
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.table.cancel(&self.id);
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Arc<PendingTable> {
        Arc::new(PendingTable::new("test"))
    }

    #[test]
    fn test_ids_are_monotonic_and_unique() {
        let table = table();
        let a = table.register("a").unwrap();
        let b = table.register("b").unwrap();
        assert_eq!(a.id(), &RequestId::Number(1));
        assert_eq!(b.id(), &RequestId::Number(2));
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_delivers_exactly_once() {
        let table = table();
        let mut slot = table.register("tools/list").unwrap();
        let id = slot.id().clone();

        let resp = JsonRpcResponse::success(id.clone(), serde_json::json!({"tools": []}));
        assert_eq!(table.resolve(resp.clone()), Resolution::Delivered);
        assert_eq!(table.resolve(resp), Resolution::Unknown);

        let reply = slot.wait().await.unwrap();
        assert_eq!(reply.id, id);
        assert!(table.is_empty());
    }

    #[test]
    fn test_dropping_slot_removes_entry() {
        let table = table();
        let slot = table.register("slow").unwrap();
        let id = slot.id().clone();
        assert_eq!(table.len(), 1);

        drop(slot);
        assert!(table.is_empty());
        let late = JsonRpcResponse::success(id, serde_json::json!(1));
        assert_eq!(table.resolve(late), Resolution::Unknown);
    }

    #[tokio::test]
    async fn test_close_fails_all_pending_once() {
        let table = table();
        let mut a = table.register("a").unwrap();
        let mut b = table.register("b").unwrap();

        assert_eq!(table.close("stdout closed"), 2);
        assert_eq!(table.close("again"), 0);

        for slot in [&mut a, &mut b] {
            match slot.wait().await {
                Err(McpError::TransportClosed { reason, .. }) => {
                    assert_eq!(reason, "stdout closed")
                }
                other => panic!("expected TransportClosed, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_register_after_close_fails_fast() {
        let table = table();
        table.close("process exited");
        assert!(table.is_closed());
        let err = table.register("late").err().unwrap();
        assert!(matches!(err, McpError::TransportClosed { .. }));
    }

    #[test]
    fn test_oldest_is_first_registered() {
        let table = table();
        let _a = table.register("first").unwrap();
        std::thread::sleep(Duration::from_millis(2));
        let _b = table.register("second").unwrap();
        let (id, method, _) = table.oldest().unwrap();
        assert_eq!(id, RequestId::Number(1));
        assert_eq!(method, "first");
    }

    #[tokio::test]
    async fn test_concurrent_register_and_resolve() {
        let table = table();
        let mut handles = Vec::new();
        for i in 0..32 {
            let table = Arc::clone(&table);
            handles.push(tokio::spawn(async move {
                let mut slot = table.register("echo").unwrap();
                let id = slot.id().clone();
                let resolver = Arc::clone(&table);
                let reply_id = id.clone();
                tokio::spawn(async move {
                    resolver.resolve(JsonRpcResponse::success(reply_id, serde_json::json!(i)));
                });
                let reply = slot.wait().await.unwrap();
                assert_eq!(reply.id, id);
                reply
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(table.is_empty());
    }
}
