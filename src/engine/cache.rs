//! Expensive-Call Cache
//!
//! Keyed, single-flight memoization. The first caller for a key runs the
//! fetch; every concurrent or later caller for that key waits on the same
//! cell and receives a clone of the stored outcome, success or failure.
//! Entries live as long as the cache. Nothing is evicted.

use crate::error::Cancelled;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

type Cell<V, E> = Arc<OnceCell<Result<V, E>>>;

/// Lookup statistics, for logging at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoStats {
    pub lookups: u64,
    pub fetches: u64,
}

impl MemoStats {
    pub fn hits(&self) -> u64 {
        self.lookups.saturating_sub(self.fetches)
    }
}

/// Single-flight memoizer over `K -> Result<V, E>`
pub struct Memo<K, V, E> {
    cells: Mutex<HashMap<K, Cell<V, E>>>,
    lookups: AtomicU64,
    fetches: AtomicU64,
}

impl<K, V, E> Default for Memo<K, V, E> {
    fn default() -> Self {
        Self {
            cells: Mutex::new(HashMap::new()),
            lookups: AtomicU64::new(0),
            fetches: AtomicU64::new(0),
        }
    }
}

impl<K, V, E> Memo<K, V, E> {
    /// Number of keys seen (resolved or in flight)
    pub fn len(&self) -> usize {
        self.cells.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MemoStats {
        MemoStats {
            lookups: self.lookups.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
        }
    }
}

impl<K, V, E> std::fmt::Debug for Memo<K, V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memo")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl<K, V, E> Memo<K, V, E>
where
    K: Eq + Hash,
    V: Clone,
    E: Clone + From<Cancelled>,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the memoized outcome for `key`, running `fetch` only if no
    /// outcome exists and no other caller is already running it.
    ///
    /// If `cancel` fires while waiting, this caller gets `E::from(Cancelled)`.
    /// When the cancelled caller was the one running `fetch`, the fetch is
    /// dropped and the key stays unresolved; another waiter takes over.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: K,
        cancel: &CancellationToken,
        fetch: F,
    ) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let cell = {
            let mut cells = self.cells.lock().unwrap_or_else(|p| p.into_inner());
            cells.entry(key).or_default().clone()
        };

        if let Some(outcome) = cell.get() {
            return outcome.clone();
        }

        let init = cell.get_or_init(|| {
            self.fetches.fetch_add(1, Ordering::Relaxed);
            fetch()
        });

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(E::from(Cancelled)),
            outcome = init => outcome.clone(),
        }
    }
}
