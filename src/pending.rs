//! The client-side Pending-Query Table: owns the correlation-id namespace
//! and the set of in-flight queries awaiting a response over the tunnel.
//! A lock-guarded map keyed directly by correlation id, each entry carrying
//! a channel the caller blocks on until its response arrives or it expires.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

/// Deadline a pending query is allowed to wait for its response.
pub const QUERY_DEADLINE: Duration = Duration::from_secs(1);

struct Slot {
    source: SocketAddr,
    tx: oneshot::Sender<Vec<u8>>,
}

/// Outcome of waiting on a registered query.
#[derive(Debug)]
pub enum Outcome {
    /// The response payload arrived before the deadline.
    Response(Vec<u8>),
    /// No response arrived within [`QUERY_DEADLINE`].
    TimedOut,
    /// The table was torn down (session cancelled) before a response arrived.
    Cancelled,
}

/// A freshly registered query: the id written to the wire and a receiver
/// the caller awaits (with its own deadline) for the matching response.
pub struct Registration {
    pub id: u32,
    rx: oneshot::Receiver<Vec<u8>>,
}

impl Registration {
    /// Wait for the response, timing the slot out after [`QUERY_DEADLINE`].
    ///
    /// On timeout the slot is removed from the table so a late frame with
    /// this id is silently discarded rather than delivered to a waiter that
    /// already gave up.
    pub async fn wait(self, table: &PendingTable) -> Outcome {
        match tokio::time::timeout(QUERY_DEADLINE, self.rx).await {
            Ok(Ok(payload)) => Outcome::Response(payload),
            Ok(Err(_)) => Outcome::Cancelled,
            Err(_) => {
                table.expire(self.id);
                Outcome::TimedOut
            }
        }
    }
}

/// Arena of in-flight queries, keyed by correlation id.
pub struct PendingTable {
    next_id: AtomicU32,
    slots: Mutex<HashMap<u32, Slot>>,
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(0),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fresh id, unique among currently pending queries, and
    /// store a slot for `source`. The id is written to the wire by the
    /// caller immediately after this returns.
    pub fn register(&self, source: SocketAddr) -> Registration {
        let (tx, rx) = oneshot::channel();
        let mut slots = self.slots.lock().expect("pending table lock poisoned");
        let id = loop {
            let candidate = self.next_id.fetch_add(1, Ordering::Relaxed);
            if !slots.contains_key(&candidate) {
                break candidate;
            }
        };
        slots.insert(id, Slot { source, tx });
        Registration { id, rx }
    }

    /// Fulfill the slot for `id` if it is still present. A payload for an
    /// id that has already expired or been cancelled is silently dropped.
    pub fn complete(&self, id: u32, payload: Vec<u8>) {
        let slot = self.slots.lock().expect("pending table lock poisoned").remove(&id);
        if let Some(slot) = slot {
            // Drop errors here: the waiter may have raced past its own
            // deadline and stopped polling the receiver.
            let _ = slot.tx.send(payload);
        }
    }

    /// Remove the slot for `id` without delivering a value. A no-op if the
    /// slot already completed or was removed by a concurrent caller.
    pub fn expire(&self, id: u32) {
        self.slots.lock().expect("pending table lock poisoned").remove(&id);
    }

    /// Return the UDP source address recorded for `id`, if still pending.
    /// Lets a caller confirm a reply only ever goes back to its own source.
    pub fn source_of(&self, id: u32) -> Option<SocketAddr> {
        self.slots
            .lock()
            .expect("pending table lock poisoned")
            .get(&id)
            .map(|slot| slot.source)
    }

    /// Fulfill every outstanding slot with a cancellation outcome by simply
    /// dropping their senders; used on transport teardown.
    pub fn cancel_all(&self) {
        self.slots.lock().expect("pending table lock poisoned").clear();
    }

    /// Number of currently pending queries; exposed for tests and metrics.
    pub fn len(&self) -> usize {
        self.slots.lock().expect("pending table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:9999".parse().unwrap()
    }

    #[tokio::test]
    async fn completes_before_deadline() {
        let table = PendingTable::new();
        let reg = table.register(addr());
        let id = reg.id;
        table.complete(id, b"reply".to_vec());
        match reg.wait(&table).await {
            Outcome::Response(payload) => assert_eq!(payload, b"reply"),
            _ => panic!("expected a response"),
        }
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn late_completion_after_timeout_is_dropped() {
        let table = PendingTable::new();
        let reg = table.register(addr());
        let id = reg.id;
        match reg.wait(&table).await {
            Outcome::TimedOut => {}
            _ => panic!("expected a timeout"),
        }
        // A late frame bearing the same id is a silent no-op.
        table.complete(id, b"too late".to_vec());
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_wakes_every_waiter() {
        let table = PendingTable::new();
        let a = table.register(addr());
        let b = table.register(addr());
        table.cancel_all();
        assert!(matches!(a.wait(&table).await, Outcome::Cancelled));
        assert!(matches!(b.wait(&table).await, Outcome::Cancelled));
    }

    #[test]
    fn concurrently_registered_ids_are_unique() {
        let table = PendingTable::new();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..1000 {
            let reg = table.register(addr());
            assert!(ids.insert(reg.id), "duplicate id handed out while pending");
        }
    }
}
