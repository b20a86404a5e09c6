use std::ops::Deref;
use std::sync::Arc;

use crate::config::Config;
use crate::redis::RedisCounterStore;
use crate::service::CounterService;

/// Shared runtime state handed to every request handler.
pub struct AppData(Arc<RuntimeData>);

impl From<RuntimeData> for AppData {
    fn from(data: RuntimeData) -> Self {
        Self(Arc::new(data))
    }
}

impl Clone for AppData {
    fn clone(&self) -> Self {
        AppData(Arc::clone(&self.0))
    }
}

impl Deref for AppData {
    type Target = Arc<RuntimeData>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(typed_builder::TypedBuilder)]
pub struct RuntimeData {
    pub counter: CounterService<RedisCounterStore>,
    pub config: Config,
}

impl AppData {
    /// Connect to the configured Redis and make sure it answers.
    pub async fn connect(config: Config) -> anyhow::Result<Self> {
        use anyhow::Context;

        let store = RedisCounterStore::from_config(&config)
            .await
            .with_context(|| format!("fail to connect to redis at {}", config.redis_addr))?;
        store
            .ping()
            .await
            .with_context(|| format!("redis at {} is not answering", config.redis_addr))?;

        let data = RuntimeData::builder()
            .counter(CounterService::new(store))
            .config(config)
            .build();

        Ok(data.into())
    }
}
