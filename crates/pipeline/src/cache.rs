use epic_protocol::{ClusteringResult, RepoRef};
use lru::LruCache;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;

type Slot = Arc<OnceCell<Arc<ClusteringResult>>>;

/// Per-repository clustering results with single-flight computation.
///
/// Concurrent `get_or_compute` calls for one repository share a single
/// computation; a failed computation leaves nothing behind, so the next caller
/// retries. The least recently used repository is evicted past `capacity`.
pub struct ResultCache {
    slots: Mutex<LruCache<String, Slot>>,
}

impl ResultCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            slots: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn slot(&self, key: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .get_or_insert(key.to_string(), || Arc::new(OnceCell::new()))
            .clone()
    }

    pub async fn get_or_compute<F, Fut, E>(
        &self,
        repo: &RepoRef,
        compute: F,
    ) -> Result<Arc<ClusteringResult>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ClusteringResult, E>>,
    {
        let key = repo.key();
        let slot = self.slot(&key);
        let outcome = slot
            .get_or_try_init(|| async { compute().await.map(Arc::new) })
            .await
            .cloned();

        if outcome.is_err() {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            let stale = slots
                .peek(&key)
                .is_some_and(|current| Arc::ptr_eq(current, &slot) && !current.initialized());
            if stale {
                slots.pop(&key);
            }
        } else {
            log::debug!("Cached clustering result for {key}");
        }
        outcome
    }

    /// Completed result for `repo`, if any.
    pub fn get(&self, repo: &RepoRef) -> Option<Arc<ClusteringResult>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(&repo.key()).and_then(|slot| slot.get().cloned())
    }

    /// Drops the entry for `repo`. Returns whether one existed.
    pub fn invalidate(&self, repo: &RepoRef) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.pop(&repo.key()).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
