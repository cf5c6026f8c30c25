use std::sync::Arc;

use anyhow::Context;
use idlink_domain::agent_info::InMemoryAgentInfoCache;
use idlink_domain::audit::InMemoryAuditLog;
use idlink_domain::backfill::{BackfillConfig, BackfillService};
use idlink_domain::ports::audit::AuditLog;
use idlink_domain::ports::cache::AgentInfoCache;
use idlink_domain::ports::identity_provider::IdentityProvider;
use idlink_domain::ports::metrics::IdentityMetrics;
use idlink_domain::ports::readiness::ReadinessProbe;
use idlink_domain::ports::users::UserRepository;
use idlink_domain::registration::{RegistrationConfig, UserRegistrationService};
use idlink_domain::resolution::IdentityResolutionService;
use idlink_domain::users::InMemoryUserRepository;

use crate::cache::RedisAgentInfoCache;
use crate::config::AppConfig;
use crate::db::{DbConfig, SurrealReadiness, connect};
use crate::kratos::{FixtureIdentityProvider, KratosIdentityClient};
use crate::resolution_metrics::MetricsIdentityRecorder;
use crate::repositories::{SurrealAuditLog, SurrealUserRepository};

/// The adapters behind every identity service.
#[derive(Clone)]
pub struct ServicePorts {
    pub users: Arc<dyn UserRepository>,
    pub audit: Arc<dyn AuditLog>,
    pub provider: Arc<dyn IdentityProvider>,
    pub cache: Arc<dyn AgentInfoCache>,
    pub metrics: Arc<dyn IdentityMetrics>,
    pub readiness: Vec<Arc<dyn ReadinessProbe>>,
}

impl ServicePorts {
    /// Process-local stores around the given provider.
    pub fn in_memory(provider: Arc<dyn IdentityProvider>, cache_prefix: &str) -> Self {
        Self {
            users: Arc::new(InMemoryUserRepository::new()),
            audit: Arc::new(InMemoryAuditLog::new()),
            provider,
            cache: Arc::new(InMemoryAgentInfoCache::new(cache_prefix)),
            metrics: Arc::new(MetricsIdentityRecorder),
            readiness: Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct IdentityServices {
    pub resolution: IdentityResolutionService,
    pub backfill: BackfillService,
    pub audit: Arc<dyn AuditLog>,
    pub provider_name: &'static str,
    pub readiness: Vec<Arc<dyn ReadinessProbe>>,
}

impl IdentityServices {
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let provider = build_provider(config).await?;
        let mut ports = ServicePorts::in_memory(provider, &config.agent_info_cache_prefix);

        if config.uses_surreal() {
            let db_config = DbConfig::from_app_config(config);
            let client = connect(&db_config)
                .await
                .context("connect surrealdb for identity stores")?;
            ports.users = Arc::new(SurrealUserRepository::with_client(client.clone()));
            ports.audit = Arc::new(SurrealAuditLog::with_client(client));
            ports.readiness.push(Arc::new(SurrealReadiness::new(db_config)));
        } else {
            tracing::warn!("using in-memory user and audit stores");
        }

        if config.uses_redis_cache() {
            let cache =
                RedisAgentInfoCache::connect(&config.redis_url, config.agent_info_cache_prefix.clone())
                    .await
                    .context("connect redis agent info cache")?;
            ports.cache = Arc::new(cache);
        }

        Ok(Self::assemble(config, ports))
    }

    pub fn assemble(config: &AppConfig, ports: ServicePorts) -> Self {
        let registration = Arc::new(UserRegistrationService::new(
            ports.users.clone(),
            RegistrationConfig {
                require_verified_email: config.registration_require_verified_email,
            },
        ));
        let resolution = IdentityResolutionService::new(
            ports.users.clone(),
            ports.provider.clone(),
            registration.clone(),
            ports.metrics.clone(),
        );
        let backfill = BackfillService::new(
            ports.users.clone(),
            ports.provider.clone(),
            registration,
            ports.audit.clone(),
            ports.cache.clone(),
            BackfillConfig {
                batch_size: config.backfill_batch_size.max(1),
            },
        );
        tracing::info!(
            provider = ports.provider.name(),
            data_backend = %config.data_backend,
            cache_backend = %config.cache_backend,
            "identity services assembled"
        );
        Self {
            resolution,
            backfill,
            audit: ports.audit,
            provider_name: ports.provider.name(),
            readiness: ports.readiness,
        }
    }
}

async fn build_provider(config: &AppConfig) -> anyhow::Result<Arc<dyn IdentityProvider>> {
    match config.identity_provider.trim().to_ascii_lowercase().as_str() {
        "kratos" => Ok(Arc::new(
            KratosIdentityClient::from_config(config).context("build kratos client")?,
        )),
        "fixture" => {
            let path = config
                .kratos_fixture_path
                .as_deref()
                .context("kratos_fixture_path is required for the fixture identity provider")?;
            Ok(Arc::new(FixtureIdentityProvider::load(path).await?))
        }
        other => anyhow::bail!("unknown identity provider '{other}'"),
    }
}
