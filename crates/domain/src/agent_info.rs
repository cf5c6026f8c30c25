use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::identity::{ExternalIdentity, normalize_email};
use crate::ports::BoxFuture;
use crate::ports::cache::{AgentInfoCache, CacheError, agent_info_cache_key};

/// Registration input derived from an external identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub email: String,
    pub email_verified: bool,
    pub first_name: String,
    pub last_name: String,
    pub avatar_url: String,
    pub authentication_id: String,
}

impl AgentInfo {
    /// Marks the email as verified. Only for identities the provider already authenticated.
    pub fn verified(mut self) -> Self {
        self.email_verified = true;
        self
    }
}

/// Builds agent info from an identity. A `fallback_email` known locally wins over
/// whatever the identity reports, with a warning when the two disagree.
pub fn build_agent_info(identity: &ExternalIdentity, fallback_email: Option<&str>) -> AgentInfo {
    let identity_email = identity.email();
    let fallback_email = fallback_email
        .map(normalize_email)
        .filter(|email| !email.is_empty());

    let email = match (identity_email, fallback_email) {
        (Some(found), Some(expected)) => {
            if found != expected {
                tracing::warn!(
                    identity_id = %identity.id,
                    identity_email = %found,
                    expected_email = %expected,
                    "identity email differs from local email, using local email"
                );
            }
            expected
        }
        (Some(found), None) => found,
        (None, Some(expected)) => expected,
        (None, None) => String::new(),
    };

    AgentInfo {
        email,
        email_verified: identity.has_verified_email(),
        first_name: identity.first_name().unwrap_or_default(),
        last_name: identity.last_name().unwrap_or_default(),
        avatar_url: identity.picture().unwrap_or_default(),
        authentication_id: identity.id.clone(),
    }
}

/// Process-local cache stand-in. Holds no entries of its own; records every
/// key it was asked to drop so callers can observe invalidation.
#[derive(Clone, Debug)]
pub struct InMemoryAgentInfoCache {
    prefix: String,
    invalidated: Arc<RwLock<Vec<String>>>,
}

impl InMemoryAgentInfoCache {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            invalidated: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Keys passed to `invalidate`, in call order.
    pub async fn invalidated_keys(&self) -> Vec<String> {
        self.invalidated.read().await.clone()
    }
}

impl AgentInfoCache for InMemoryAgentInfoCache {
    fn invalidate(&self, authentication_id: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        let key = agent_info_cache_key(&self.prefix, authentication_id);
        let invalidated = self.invalidated.clone();
        Box::pin(async move {
            invalidated.write().await.push(key);
            Ok(false)
        })
    }
}
