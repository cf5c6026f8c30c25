use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("agent info cache unavailable: {0}")]
    Unavailable(String),
    #[error("agent info cache operation failed: {0}")]
    Operation(String),
}

pub fn agent_info_cache_key(prefix: &str, authentication_id: &str) -> String {
    format!("{prefix}:{authentication_id}")
}

pub trait AgentInfoCache: Send + Sync {
    /// Drops any cached agent info for the authentication id. Returns whether an entry existed.
    fn invalidate(&self, authentication_id: &str) -> BoxFuture<'_, Result<bool, CacheError>>;
}
