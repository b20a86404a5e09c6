//! # Redis
//!
//! Networked counter storage.
//!
//! ## Layout
//!
//! - One hash per page: `<prefix>:<key>`
//! - Field `count`: 64-bit visit count
//! - Field `updated_at`: unix milliseconds of the last successful write
//!
//! ## Atomicity
//!
//! Redis runs a Lua script as a single unit, nothing interleaves between its
//! commands. Both mutations are therefore one script each:
//!
//! - increment: `EXISTS` then `HINCRBY`, no row is created on a miss
//! - create: `HSETNX` then `HGET`, an existing count is never overwritten
use crate::config::Config;
use crate::error::Result;
use crate::key::PageKey;
use crate::store::{CounterStore, Creation, Increment, PageCounter};
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use redis::{aio::ConnectionManager, RedisResult, Script};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

const COUNT_FIELD: &str = "count";
const UPDATED_FIELD: &str = "updated_at";

lazy_static! {
    // KEYS[1] = row, ARGV[1] = now (ms). Returns {count, existed}.
    static ref INCREMENT: Script = Script::new(
        r#"
        if redis.call('EXISTS', KEYS[1]) == 0 then
            return {0, 0}
        end
        local count = redis.call('HINCRBY', KEYS[1], 'count', 1)
        redis.call('HSET', KEYS[1], 'updated_at', ARGV[1])
        return {count, 1}
        "#
    );

    // KEYS[1] = row, ARGV[1] = initial count, ARGV[2] = now (ms). Returns {count, created}.
    static ref CREATE_IF_ABSENT: Script = Script::new(
        r#"
        if redis.call('HSETNX', KEYS[1], 'count', ARGV[1]) == 1 then
            redis.call('HSET', KEYS[1], 'updated_at', ARGV[2])
            return {tonumber(ARGV[1]), 1}
        end
        return {tonumber(redis.call('HGET', KEYS[1], 'count')), 0}
        "#
    );
}

/// Counter storage backed by a Redis server.
///
/// [`ConnectionManager`] is a cheap handle that reconnects on its own, every
/// call works on a clone of it so no lock is held between callers.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    prefix: String,
    timeout: Duration,
}

impl RedisCounterStore {
    pub async fn connect(addr: &str, prefix: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(addr)?;
        let conn = tokio::time::timeout(timeout, client.get_connection_manager()).await??;

        Ok(Self {
            conn,
            prefix: prefix.into(),
            timeout,
        })
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::connect(
            &config.redis_addr,
            config.key_prefix.as_str(),
            config.response_timeout(),
        )
        .await
    }

    /// Round trip to the server, fails when it is unreachable.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = self
            .bounded(redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }

    fn row_key(&self, key: &PageKey) -> String {
        format!("{}:{}", self.prefix, key)
    }

    async fn bounded<T>(&self, request: impl Future<Output = RedisResult<T>>) -> Result<T> {
        Ok(tokio::time::timeout(self.timeout, request).await??)
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[async_trait::async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(&self, key: &PageKey) -> Result<Increment> {
        let mut conn = self.conn.clone();
        let row = self.row_key(key);
        let (count, existed): (u64, bool) = self
            .bounded(INCREMENT.key(&row).arg(now_millis()).invoke_async(&mut conn))
            .await?;

        debug!("HINCRBY {row}: existed={existed} count={count}");
        Ok(Increment { count, existed })
    }

    async fn create_if_absent(&self, key: &PageKey, initial: u64) -> Result<Creation> {
        let mut conn = self.conn.clone();
        let row = self.row_key(key);
        let (count, created): (u64, bool) = self
            .bounded(
                CREATE_IF_ABSENT
                    .key(&row)
                    .arg(initial)
                    .arg(now_millis())
                    .invoke_async(&mut conn),
            )
            .await?;

        debug!("HSETNX {row}: created={created} count={count}");
        Ok(Creation { count, created })
    }

    async fn get(&self, key: &PageKey) -> Result<Option<PageCounter>> {
        let mut conn = self.conn.clone();
        let (count, updated_at): (Option<u64>, Option<i64>) = self
            .bounded(
                redis::cmd("HMGET")
                    .arg(self.row_key(key))
                    .arg(COUNT_FIELD)
                    .arg(UPDATED_FIELD)
                    .query_async(&mut conn),
            )
            .await?;

        Ok(count.map(|count| PageCounter {
            key: key.to_string(),
            count,
            last_updated: updated_at
                .and_then(DateTime::<Utc>::from_timestamp_millis)
                .unwrap_or_default(),
        }))
    }
}

/// Connect to the server named by `PAGEVIEW_TEST_REDIS` under a throwaway prefix.
#[cfg(test)]
async fn test_store() -> Option<RedisCounterStore> {
    let addr = std::env::var("PAGEVIEW_TEST_REDIS").ok()?;
    let prefix = format!("pageview-test-{}", rand::random::<u32>());
    Some(
        RedisCounterStore::connect(&addr, prefix, Duration::from_secs(2))
            .await
            .expect("fail to connect to test redis"),
    )
}

#[tokio::test]
async fn test_redis_create_then_increment() {
    let Some(store) = test_store().await else {
        return;
    };
    let key = PageKey::parse("/about").unwrap();

    assert!(!store.increment(&key).await.unwrap().existed);
    assert!(store.get(&key).await.unwrap().is_none());

    let created = store.create_if_absent(&key, 1).await.unwrap();
    assert_eq!(created, Creation { count: 1, created: true });

    let inc = store.increment(&key).await.unwrap();
    assert_eq!(inc, Increment { count: 2, existed: true });

    let again = store.create_if_absent(&key, 1).await.unwrap();
    assert_eq!(again, Creation { count: 2, created: false });

    let row = store.get(&key).await.unwrap().unwrap();
    assert_eq!(row.count, 2);
    assert!(row.last_updated.timestamp() > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redis_concurrent_increments() {
    let Some(store) = test_store().await else {
        return;
    };
    let key = PageKey::parse("/hot").unwrap();
    store.create_if_absent(&key, 0).await.unwrap();

    let tasks: Vec<_> = (0..64)
        .map(|_| {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move { store.increment(&key).await.unwrap() })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(store.get(&key).await.unwrap().unwrap().count, 64);
}

#[tokio::test]
async fn test_unreachable_server_is_unavailable() {
    // Nothing listens on port 1.
    let result =
        RedisCounterStore::connect("redis://127.0.0.1:1", "pageview", Duration::from_millis(200))
            .await;
    assert!(matches!(result, Err(e) if e.is_unavailable()));
}
