//! The cursor store: a time-to-live map from opaque token to spilled
//! cursor, with a periodic expiry sweep.
//!
//! Uses the same `Arc<RwLock<...>>` storage shape an in-memory backend
//! would, generalized with `tokio::sync::RwLock` (async-friendly, since
//! `retrieve`/`store` are awaited from request-handling tasks) and a
//! `tokio::time::interval` sweeper for the entries this store's data does
//! have that never-expiring in-memory data wouldn't: a time-to-live.

use crate::cursor::Cursor;
use crate::{Error, Result};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug)]
struct Entry {
    cursor: Cursor,
    expires_at: Instant,
}

/// Thread-safe, TTL-bounded storage for cursors too large to return inline.
///
/// Readers (`retrieve`) and writers (`store`, `delete`, the sweep) share one
/// `RwLock`; this is the only shared mutable state in the process.
#[derive(Clone, Debug)]
pub struct CursorStore {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    ttl: Duration,
}

/// A handle to the background sweep task, dropped (and the task aborted) at
/// shutdown.
#[derive(Debug)]
pub struct Sweeper(JoinHandle<()>);

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl CursorStore {
    /// Creates an empty store with the given per-entry time-to-live.
    pub fn new(ttl: Duration) -> CursorStore {
        CursorStore {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    /// Stores a cursor, returning a fresh 128-bit random hex token.
    pub async fn store(&self, cursor: Cursor) -> String {
        let token = random_token();
        let expires_at = Instant::now() + self.ttl;
        let mut entries = self.entries.write().await;
        entries.insert(token.clone(), Entry { cursor, expires_at });
        token
    }

    /// Retrieves a cursor by token. Distinguishes absence from expiry only
    /// in the error message; both map to [`Error::InvalidCursor`], since
    /// decoding failure and expiry are both surfaced the same way to the
    /// caller.
    pub async fn retrieve(&self, token: &str) -> Result<Cursor> {
        let entries = self.entries.read().await;
        match entries.get(token) {
            None => Err(Error::InvalidCursor(format!(
                "cursor token {token} not found"
            ))),
            Some(entry) if entry.expires_at <= Instant::now() => Err(Error::InvalidCursor(
                format!("cursor token {token} expired"),
            )),
            Some(entry) => Ok(entry.cursor.clone()),
        }
    }

    /// Removes a token, if present.
    pub async fn delete(&self, token: &str) {
        let mut entries = self.entries.write().await;
        let _ = entries.remove(token);
    }

    /// The number of entries currently stored, expired or not. Exposed for
    /// tests and diagnostics.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    async fn sweep(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Spawns the background sweeper, running at `interval` until the
    /// returned [`Sweeper`] is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) -> Sweeper {
        let store = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                store.sweep().await;
            }
        });
        Sweeper(handle)
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
