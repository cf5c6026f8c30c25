use std::time::Duration;

use idlink_domain::identity::{ExternalIdentity, normalize_email};
use idlink_domain::ports::BoxFuture;
use idlink_domain::ports::identity_provider::{IdentityProvider, IdentityProviderError};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tokio::time::sleep;
use url::Url;

use crate::config::AppConfig;

const CREDENTIALS_IDENTIFIER_QUERY_KEY: &str = "credentials_identifier";

/// Client for the Kratos admin identity API.
#[derive(Debug, Clone)]
pub struct KratosIdentityClient {
    http: reqwest::Client,
    admin_url: Url,
    admin_token: Option<String>,
    retry_max_attempts: u32,
    retry_backoff_base: Duration,
    retry_backoff_max: Duration,
}

impl KratosIdentityClient {
    pub fn from_config(config: &AppConfig) -> Result<Self, IdentityProviderError> {
        let http = reqwest::Client::builder()
            .timeout(config.kratos_timeout())
            .build()
            .map_err(|err| IdentityProviderError::Configuration(err.to_string()))?;
        let admin_url = Url::parse(config.kratos_admin_url.trim()).map_err(|err| {
            IdentityProviderError::Configuration(format!(
                "invalid kratos admin url '{}': {err}",
                config.kratos_admin_url
            ))
        })?;
        if admin_url.cannot_be_a_base() {
            return Err(IdentityProviderError::Configuration(format!(
                "kratos admin url '{admin_url}' cannot be a base"
            )));
        }
        let admin_token = config
            .kratos_admin_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(ToString::to_string);

        Ok(Self {
            http,
            admin_url,
            admin_token,
            retry_max_attempts: config.kratos_retry_max_attempts.max(1),
            retry_backoff_base: Duration::from_millis(config.kratos_retry_backoff_base_ms),
            retry_backoff_max: Duration::from_millis(config.kratos_retry_backoff_max_ms),
        })
    }

    fn identities_url(&self, identity_id: Option<&str>) -> Result<Url, IdentityProviderError> {
        let mut url = self.admin_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                IdentityProviderError::Configuration("kratos admin url cannot be a base".into())
            })?;
            segments.pop_if_empty().extend(["admin", "identities"]);
            if let Some(identity_id) = identity_id {
                segments.push(identity_id);
            }
        }
        Ok(url)
    }

    /// GETs JSON from the admin API. `Ok(None)` on 404.
    async fn get_json<T>(
        &self,
        url: Url,
        query_params: &[(&str, &str)],
    ) -> Result<Option<T>, IdentityProviderError>
    where
        T: DeserializeOwned,
    {
        let attempts = self.retry_max_attempts.max(1);

        for attempt in 0..attempts {
            let mut request = self
                .http
                .get(url.clone())
                .header("accept", "application/json");
            if !query_params.is_empty() {
                request = request.query(query_params);
            }
            if let Some(token) = &self.admin_token {
                request = request.bearer_auth(token);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    if attempt + 1 < attempts {
                        self.pause(attempt).await;
                        continue;
                    }
                    let reason = if err.is_timeout() {
                        format!("request to {} timed out", url.path())
                    } else {
                        err.to_string()
                    };
                    return Err(IdentityProviderError::Unavailable(reason));
                }
            };

            let status = response.status();
            if status.is_success() {
                let body = response
                    .json::<T>()
                    .await
                    .map_err(|err| IdentityProviderError::InvalidResponse(err.to_string()))?;
                return Ok(Some(body));
            }
            if status == StatusCode::NOT_FOUND {
                return Ok(None);
            }

            let message = response.text().await.unwrap_or_default();
            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if retryable && attempt + 1 < attempts {
                tracing::debug!(status = status.as_u16(), attempt, "retrying kratos request");
                self.pause(attempt).await;
                continue;
            }
            let detail = format!("status {}: {}", status.as_u16(), message);
            return Err(if retryable {
                IdentityProviderError::Unavailable(detail)
            } else {
                IdentityProviderError::Rejected(detail)
            });
        }

        Err(IdentityProviderError::Unavailable(
            "retry loop exited unexpectedly".to_string(),
        ))
    }

    async fn pause(&self, attempt: u32) {
        sleep(backoff_for_attempt(
            self.retry_backoff_base,
            self.retry_backoff_max,
            attempt,
        ))
        .await;
    }
}

impl IdentityProvider for KratosIdentityClient {
    fn name(&self) -> &'static str {
        "kratos"
    }

    fn find_by_email(
        &self,
        email: &str,
    ) -> BoxFuture<'_, Result<Vec<ExternalIdentity>, IdentityProviderError>> {
        let email = normalize_email(email);
        Box::pin(async move {
            if email.is_empty() {
                return Ok(Vec::new());
            }
            let url = self.identities_url(None)?;
            let identities = self
                .get_json::<Vec<ExternalIdentity>>(
                    url,
                    &[(CREDENTIALS_IDENTIFIER_QUERY_KEY, email.as_str())],
                )
                .await?;
            Ok(identities.unwrap_or_default())
        })
    }

    fn get_identity_by_id(
        &self,
        identity_id: &str,
    ) -> BoxFuture<'_, Result<Option<ExternalIdentity>, IdentityProviderError>> {
        let identity_id = identity_id.trim().to_string();
        Box::pin(async move {
            if identity_id.is_empty() {
                return Ok(None);
            }
            let url = self.identities_url(Some(&identity_id))?;
            self.get_json::<ExternalIdentity>(url, &[]).await
        })
    }
}

fn backoff_for_attempt(base: Duration, max: Duration, attempt: u32) -> Duration {
    if base.is_zero() {
        return Duration::from_millis(1);
    }
    let multiplier = 1u64 << attempt.min(8);
    let base_ms = base.as_millis() as u64;
    let max_ms = max.as_millis() as u64;
    let delay_ms = base_ms.saturating_mul(multiplier).max(1);
    if max_ms == 0 {
        Duration::from_millis(delay_ms)
    } else {
        Duration::from_millis(delay_ms.min(max_ms))
    }
}
