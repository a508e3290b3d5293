//! Per-key request coalescing.
//!
//! The first caller for a key runs the work; callers arriving while it is in
//! flight wait for and share its result. If the leading caller is dropped
//! before finishing, waiting callers run the work themselves.

use std::future::Future;
use std::hash::Hash;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::broadcast;

pub struct SingleFlight<K, V>
where
    K: Eq + Hash,
{
    inflight: DashMap<K, broadcast::Sender<V>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            inflight: DashMap::new(),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    pub async fn run<F, Fut>(&self, key: K, work: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let waiter = match self.inflight.entry(key.clone()) {
            Entry::Occupied(entry) => Some(entry.get().subscribe()),
            Entry::Vacant(entry) => {
                let (sender, _) = broadcast::channel(1);
                entry.insert(sender);
                None
            }
        };

        if let Some(mut receiver) = waiter {
            return match receiver.recv().await {
                Ok(shared) => shared,
                Err(_) => {
                    tracing::debug!("In-flight leader dropped, running work directly");
                    work().await
                }
            };
        }

        let mut guard = LeaderGuard {
            inflight: &self.inflight,
            key: Some(key),
        };
        let result = work().await;

        if let Some(key) = guard.key.take() {
            if let Some((_, sender)) = self.inflight.remove(&key) {
                // No receivers is fine.
                let _ = sender.send(result.clone());
            }
        }
        result
    }
}

/// Removes the leader's entry if its future is dropped mid-flight, which
/// closes the channel and releases the waiters.
struct LeaderGuard<'a, K, V>
where
    K: Eq + Hash,
{
    inflight: &'a DashMap<K, broadcast::Sender<V>>,
    key: Option<K>,
}

impl<K, V> Drop for LeaderGuard<'_, K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.inflight.remove(&key);
        }
    }
}
