use crate::error::Result;
use crate::key::PageKey;
use crate::store::{CounterStore, Creation, Increment, PageCounter};
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// Counter storage kept in process memory. Nothing survives a restart, so
/// this is meant for tests and single-process setups.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    rows: Mutex<HashMap<String, PageCounter>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait::async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &PageKey) -> Result<Increment> {
        let mut rows = self.rows.lock().await;
        let Some(row) = rows.get_mut(key.as_str()) else {
            return Ok(Increment {
                count: 0,
                existed: false,
            });
        };

        row.count += 1;
        row.last_updated = Utc::now();
        Ok(Increment {
            count: row.count,
            existed: true,
        })
    }

    async fn create_if_absent(&self, key: &PageKey, initial: u64) -> Result<Creation> {
        let mut rows = self.rows.lock().await;
        if let Some(row) = rows.get(key.as_str()) {
            return Ok(Creation {
                count: row.count,
                created: false,
            });
        }

        rows.insert(
            key.to_string(),
            PageCounter {
                key: key.to_string(),
                count: initial,
                last_updated: Utc::now(),
            },
        );
        Ok(Creation {
            count: initial,
            created: true,
        })
    }

    async fn get(&self, key: &PageKey) -> Result<Option<PageCounter>> {
        Ok(self.rows.lock().await.get(key.as_str()).cloned())
    }
}

#[tokio::test]
async fn test_increment_never_creates() {
    let store = MemoryCounterStore::new();
    let key = PageKey::parse("/ghost").unwrap();

    let inc = store.increment(&key).await.unwrap();
    assert!(!inc.existed);
    assert!(store.get(&key).await.unwrap().is_none());
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_create_never_overwrites() {
    let store = MemoryCounterStore::new();
    let key = PageKey::parse("/home").unwrap();

    let first = store.create_if_absent(&key, 1).await.unwrap();
    assert_eq!(first, Creation { count: 1, created: true });

    store.increment(&key).await.unwrap();
    let second = store.create_if_absent(&key, 1).await.unwrap();
    assert_eq!(second, Creation { count: 2, created: false });

    let row = store.get(&key).await.unwrap().unwrap();
    assert_eq!(row.count, 2);
    assert_eq!(row.key, "/home");
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_increment_bumps_timestamp() {
    let store = MemoryCounterStore::new();
    let key = PageKey::parse("/clock").unwrap();

    store.create_if_absent(&key, 1).await.unwrap();
    let created = store.get(&key).await.unwrap().unwrap().last_updated;

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let inc = store.increment(&key).await.unwrap();
    assert_eq!(inc, Increment { count: 2, existed: true });

    let updated = store.get(&key).await.unwrap().unwrap().last_updated;
    assert!(updated > created);
}
