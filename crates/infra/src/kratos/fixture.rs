use std::path::Path;
use std::sync::Arc;

use idlink_domain::identity::{ExternalIdentity, normalize_email};
use idlink_domain::ports::BoxFuture;
use idlink_domain::ports::identity_provider::{IdentityProvider, IdentityProviderError};

/// Identity provider backed by a static list, loaded from a JSON array of identities.
#[derive(Debug, Clone, Default)]
pub struct FixtureIdentityProvider {
    identities: Arc<Vec<ExternalIdentity>>,
}

impl FixtureIdentityProvider {
    pub fn new(identities: Vec<ExternalIdentity>) -> Self {
        Self {
            identities: Arc::new(identities),
        }
    }

    pub fn from_json(payload: &str) -> Result<Self, IdentityProviderError> {
        let identities: Vec<ExternalIdentity> = serde_json::from_str(payload)
            .map_err(|err| IdentityProviderError::Configuration(format!("invalid fixture: {err}")))?;
        Ok(Self::new(identities))
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, IdentityProviderError> {
        let path = path.as_ref();
        let payload = tokio::fs::read_to_string(path).await.map_err(|err| {
            IdentityProviderError::Configuration(format!(
                "failed to read identity fixture {}: {err}",
                path.display()
            ))
        })?;
        let provider = Self::from_json(&payload)?;
        tracing::info!(
            path = %path.display(),
            identities = provider.len(),
            "loaded identity fixture"
        );
        Ok(provider)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

impl IdentityProvider for FixtureIdentityProvider {
    fn name(&self) -> &'static str {
        "fixture"
    }

    fn find_by_email(
        &self,
        email: &str,
    ) -> BoxFuture<'_, Result<Vec<ExternalIdentity>, IdentityProviderError>> {
        let email = normalize_email(email);
        let identities = self.identities.clone();
        Box::pin(async move {
            if email.is_empty() {
                return Ok(Vec::new());
            }
            Ok(identities
                .iter()
                .filter(|identity| identity.email().as_deref() == Some(email.as_str()))
                .cloned()
                .collect())
        })
    }

    fn get_identity_by_id(
        &self,
        identity_id: &str,
    ) -> BoxFuture<'_, Result<Option<ExternalIdentity>, IdentityProviderError>> {
        let identity_id = identity_id.trim().to_string();
        let identities = self.identities.clone();
        Box::pin(async move {
            Ok(identities
                .iter()
                .find(|identity| identity.id == identity_id)
                .cloned())
        })
    }
}
