use idlink_domain::ports::BoxFuture;
use idlink_domain::ports::cache::{AgentInfoCache, CacheError, agent_info_cache_key};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

/// Agent info cache entries live in Redis under `<prefix>:<authentication id>`.
#[derive(Clone)]
pub struct RedisAgentInfoCache {
    manager: ConnectionManager,
    prefix: String,
}

impl RedisAgentInfoCache {
    pub async fn connect(redis_url: &str, prefix: impl Into<String>) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(redis_url).map_err(|err| CacheError::Unavailable(err.to_string()))?;
        let manager = ConnectionManager::new(client)
            .await
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
        })
    }
}

impl AgentInfoCache for RedisAgentInfoCache {
    fn invalidate(&self, authentication_id: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        let key = agent_info_cache_key(&self.prefix, authentication_id);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let removed: i64 = conn
                .del(&key)
                .await
                .map_err(|err| CacheError::Operation(err.to_string()))?;
            tracing::debug!(key = %key, removed, "invalidated agent info cache entry");
            Ok(removed > 0)
        })
    }
}
