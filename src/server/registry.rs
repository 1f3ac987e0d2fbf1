//! Server-side Session Registry: at most one live session per auth token.
//!
//! Generalizes the client's id-keyed arena in `pending.rs` to a
//! token-keyed one. Registering a new session for a token already in use
//! displaces the old entry: the old session's [`ShutdownHandle`] is
//! cancelled, which wakes its `shutdown.cancelled()` branch and ends its
//! read/write loop. Holding only a clone of the old outbound sender isn't
//! enough to observe this, since the displaced session's own task keeps
//! its matching sender alive for the lifetime of its loop, so explicit
//! cancellation is the actual teardown signal. The generation counter
//! exists only so a session that was already displaced, finishing its own
//! teardown later, can't remove the newer session's entry out from under it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc::UnboundedSender;

use crate::shutdown::ShutdownHandle;

struct Entry {
    generation: u64,
    outbound: UnboundedSender<(u32, Vec<u8>)>,
    shutdown: ShutdownHandle,
}

/// Registry of live sessions keyed by auth token.
pub struct SessionRegistry {
    next_generation: AtomicU64,
    sessions: Mutex<HashMap<String, Entry>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            next_generation: AtomicU64::new(0),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new session for `token`, displacing whatever session was
    /// previously registered under it: the displaced entry's handle is
    /// cancelled so its own loop notices and tears itself down. Returns the
    /// generation the caller must present to [`dispose`](Self::dispose)
    /// when it tears down.
    pub fn register(&self, token: String, outbound: UnboundedSender<(u32, Vec<u8>)>, shutdown: ShutdownHandle) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let displaced = {
            let mut sessions = self.sessions.lock().expect("session registry lock poisoned");
            sessions.insert(token, Entry { generation, outbound, shutdown })
        };
        if let Some(displaced) = displaced {
            displaced.shutdown.cancel();
        }
        generation
    }

    /// Remove the session for `token`, but only if it is still the one
    /// tagged with `generation`. A session that was displaced before it
    /// finished tearing down is a no-op here, leaving its successor's
    /// entry untouched.
    pub fn dispose(&self, token: &str, generation: u64) {
        let mut sessions = self.sessions.lock().expect("session registry lock poisoned");
        if let Some(entry) = sessions.get(token) {
            if entry.generation == generation {
                sessions.remove(token);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().expect("session registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
