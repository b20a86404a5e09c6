//! # Visit counting
//!
//! [`CounterService::record_visit`] turns one observed visit into exactly one
//! increment of the page row, without any lock on the caller side.
//!
//! ## Flow
//!
//! 1. Atomic increment. If the row exists we are done, this is the usual case
//!    and costs one storage round trip.
//! 2. Row missing: atomic create with count 1. If we created it, this visit
//!    was the first one.
//! 3. Create lost against a concurrent visit: the row now exists but this
//!    visit has not been counted yet, so increment once more.
//!
//! Storage errors go straight back to the caller. A visit that failed may or
//! may not have been applied, retrying is the caller's decision.
use crate::error::{CounterError, Result};
use crate::key::PageKey;
use crate::store::{CounterStore, PageCounter};
use std::sync::Arc;
use tracing::{debug, warn};

/// Stateless visit counter over some [`CounterStore`]. Clones share the store.
pub struct CounterService<S> {
    store: Arc<S>,
}

impl<S> Clone for CounterService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: CounterStore> CounterService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Count one visit to `key` and return the count including it.
    pub async fn record_visit(&self, key: &str) -> Result<u64> {
        let key = PageKey::parse(key)?;
        self.count_visit(&key).await.inspect_err(|err| {
            warn!("fail to record visit to {key}: {err}");
        })
    }

    async fn count_visit(&self, key: &PageKey) -> Result<u64> {
        let inc = self.store.increment(key).await?;
        if inc.existed {
            debug!("{key}: counted, now {}", inc.count);
            return Ok(inc.count);
        }

        let creation = self.store.create_if_absent(key, 1).await?;
        if creation.created {
            debug!("{key}: first visit");
            return Ok(creation.count);
        }

        // Someone else created the row between our increment and create.
        let retry = self.store.increment(key).await?;
        if !retry.existed {
            // Rows are never deleted by us, only something outside can cause this.
            return Err(CounterError::StorageUnavailable(
                format!("row for {key} vanished while counting a visit").into(),
            ));
        }
        debug!("{key}: lost creation race, counted on retry, now {}", retry.count);
        Ok(retry.count)
    }

    /// Stored count for `key`.
    pub async fn get_count(&self, key: &str) -> Result<u64> {
        self.get_counter(key).await.map(|row| row.count)
    }

    /// Full stored row for `key`, including when it was last counted.
    pub async fn get_counter(&self, key: &str) -> Result<PageCounter> {
        let key = PageKey::parse(key)?;
        self.store
            .get(&key)
            .await?
            .ok_or_else(|| CounterError::NotFound(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCounterStore;
    use crate::store::{Creation, Increment};
    use rand::seq::SliceRandom;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    /// Store wrapper that can hold every caller's first increment at a barrier,
    /// fail on demand, and remember each create outcome.
    struct Instrumented {
        inner: MemoryCounterStore,
        gate: Option<Barrier>,
        first_increments: AtomicUsize,
        gate_width: usize,
        offline: AtomicBool,
        creations: std::sync::Mutex<Vec<bool>>,
    }

    impl Instrumented {
        fn new() -> Self {
            Self {
                inner: MemoryCounterStore::new(),
                gate: None,
                first_increments: AtomicUsize::new(0),
                gate_width: 0,
                offline: AtomicBool::new(false),
                creations: std::sync::Mutex::new(Vec::new()),
            }
        }

        /// The first `width` increments wait for each other after reading.
        fn gated(width: usize) -> Self {
            Self {
                gate: Some(Barrier::new(width)),
                gate_width: width,
                ..Self::new()
            }
        }

        fn check_online(&self) -> Result<()> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(CounterError::StorageUnavailable("connection refused".into()));
            }
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl CounterStore for Instrumented {
        async fn increment(&self, key: &PageKey) -> Result<Increment> {
            self.check_online()?;
            let inc = self.inner.increment(key).await?;
            if let Some(gate) = &self.gate {
                if self.first_increments.fetch_add(1, Ordering::SeqCst) < self.gate_width {
                    gate.wait().await;
                }
            }
            Ok(inc)
        }

        async fn create_if_absent(&self, key: &PageKey, initial: u64) -> Result<Creation> {
            self.check_online()?;
            let creation = self.inner.create_if_absent(key, initial).await?;
            self.creations.lock().unwrap().push(creation.created);
            Ok(creation)
        }

        async fn get(&self, key: &PageKey) -> Result<Option<PageCounter>> {
            self.check_online()?;
            self.inner.get(key).await
        }
    }

    #[tokio::test]
    async fn first_visit_returns_one() {
        let service = CounterService::new(MemoryCounterStore::new());
        assert_eq!(service.record_visit("new-key").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn sequential_visits_then_read() {
        let service = CounterService::new(MemoryCounterStore::new());

        assert_eq!(service.record_visit("/about").await.unwrap(), 1);
        assert_eq!(service.record_visit("/about").await.unwrap(), 2);
        assert_eq!(service.get_count("/about").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn spellings_share_a_counter() {
        let service = CounterService::new(MemoryCounterStore::new());

        service.record_visit("/blog/").await.unwrap();
        service.record_visit("blog?utm=feed").await.unwrap();
        assert_eq!(service.get_count("//blog").await.unwrap(), 2);
        assert_eq!(service.store().len().await, 1);
    }

    #[tokio::test]
    async fn unknown_key_is_not_found() {
        let service = CounterService::new(MemoryCounterStore::new());
        assert!(matches!(
            service.get_count("/missing").await,
            Err(CounterError::NotFound(key)) if key == "/missing"
        ));
    }

    #[tokio::test]
    async fn invalid_key_touches_nothing() {
        let service = CounterService::new(MemoryCounterStore::new());
        assert!(matches!(
            service.record_visit("  ").await,
            Err(CounterError::InvalidKey(_))
        ));
        assert!(service.store().is_empty().await);
    }

    #[tokio::test]
    async fn repeated_reads_agree() {
        let service = CounterService::new(MemoryCounterStore::new());
        for _ in 0..3 {
            service.record_visit("/docs").await.unwrap();
        }

        let first = service.get_counter("/docs").await.unwrap();
        for _ in 0..5 {
            assert_eq!(service.get_counter("/docs").await.unwrap(), first);
        }
        assert_eq!(first.count, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_first_visits_create_once() {
        let service = CounterService::new(Instrumented::gated(2));

        let a = tokio::spawn({
            let service = service.clone();
            async move { service.record_visit("/home").await }
        });
        let b = tokio::spawn({
            let service = service.clone();
            async move { service.record_visit("/home").await }
        });

        let mut counts = vec![a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
        counts.sort();
        assert_eq!(counts, vec![1, 2]);
        assert_eq!(service.get_count("/home").await.unwrap(), 2);

        // Both saw the row missing, exactly one of them created it.
        let creations = service.store().creations.lock().unwrap().clone();
        assert_eq!(creations.len(), 2);
        assert_eq!(creations.iter().filter(|created| **created).count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_visits_lose_nothing() {
        const VISITS: usize = 200;
        let service = CounterService::new(MemoryCounterStore::new());

        let tasks: Vec<_> = (0..VISITS)
            .map(|_| {
                let service = service.clone();
                tokio::spawn(async move { service.record_visit("/brand-new").await.unwrap() })
            })
            .collect();

        let mut returned = Vec::with_capacity(VISITS);
        for task in tasks {
            returned.push(task.await.unwrap());
        }

        // Every visit observed a distinct count.
        returned.sort_unstable();
        assert_eq!(returned, (1..=VISITS as u64).collect::<Vec<_>>());
        assert_eq!(service.get_count("/brand-new").await.unwrap(), VISITS as u64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn one_row_per_key() {
        let keys = ["/", "/home", "/about", "/blog", "/blog/post-1", "/contact"];
        let mut visits: Vec<&str> = keys
            .iter()
            .flat_map(|key| std::iter::repeat(*key).take(25))
            .collect();
        visits.shuffle(&mut rand::thread_rng());

        let service = CounterService::new(MemoryCounterStore::new());
        let tasks: Vec<_> = visits
            .into_iter()
            .map(|key| {
                let service = service.clone();
                tokio::spawn(async move { service.record_visit(key).await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(service.store().len().await, keys.len());
        for key in keys {
            assert_eq!(service.get_count(key).await.unwrap(), 25);
        }
    }

    #[tokio::test]
    async fn outage_leaves_count_intact() {
        let service = CounterService::new(Instrumented::new());
        service.record_visit("/x").await.unwrap();
        service.record_visit("/x").await.unwrap();

        service.store().offline.store(true, Ordering::SeqCst);
        let err = service.record_visit("/x").await.unwrap_err();
        assert!(err.is_unavailable());

        service.store().offline.store(false, Ordering::SeqCst);
        assert_eq!(service.get_count("/x").await.unwrap(), 2);
        assert_eq!(service.record_visit("/x").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn outage_on_first_visit_creates_nothing() {
        let service = CounterService::new(Instrumented::new());
        service.store().offline.store(true, Ordering::SeqCst);
        assert!(service.record_visit("/fresh").await.unwrap_err().is_unavailable());

        service.store().offline.store(false, Ordering::SeqCst);
        assert!(matches!(
            service.get_count("/fresh").await,
            Err(CounterError::NotFound(_))
        ));
        assert_eq!(service.record_visit("/fresh").await.unwrap(), 1);
    }
}
