//! Shared handles for one process: configuration, store, cache, feed source.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::cache::{Cache, MemoryCache, RedisCache};
use crate::config::Config;
use crate::fetch::{FeedSource, HttpFeedSource};
use crate::store::Store;

/// Everything a job needs, built once at startup and passed explicitly.
pub struct Context {
    pub config: Config,
    pub store: Store,
    pub cache: Arc<dyn Cache>,
    pub feed: Arc<dyn FeedSource>,
}

impl Context {
    /// Connect the store and cache described by `config`.
    ///
    /// Without `REDIS_URL` the cache is in-process, which is fine for a
    /// single-process deployment but shares no state across processes.
    pub async fn initialize(config: Config) -> Result<Self> {
        let store = Store::connect(&config.database_url).await?;

        let cache: Arc<dyn Cache> = match &config.redis_url {
            Some(url) => Arc::new(RedisCache::connect(url).await?),
            None => {
                info!("no REDIS_URL configured, using in-process cache");
                Arc::new(MemoryCache::new())
            }
        };

        let feed: Arc<dyn FeedSource> = Arc::new(HttpFeedSource::new()?);

        Ok(Self {
            config,
            store,
            cache,
            feed,
        })
    }
}
