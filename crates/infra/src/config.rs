use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_env: String,
    pub port: u16,
    pub log_level: String,
    pub data_backend: String,
    pub surreal_endpoint: String,
    pub surreal_ns: String,
    pub surreal_db: String,
    pub surreal_user: String,
    pub surreal_pass: String,
    pub cache_backend: String,
    pub redis_url: String,
    pub agent_info_cache_prefix: String,
    pub identity_provider: String,
    pub kratos_admin_url: String,
    pub kratos_admin_token: Option<String>,
    pub kratos_timeout_ms: u64,
    pub kratos_retry_max_attempts: u32,
    pub kratos_retry_backoff_base_ms: u64,
    pub kratos_retry_backoff_max_ms: u64,
    pub kratos_fixture_path: Option<String>,
    pub registration_require_verified_email: bool,
    pub backfill_batch_size: usize,
    pub backfill_interval_ms: u64,
    pub jwt_secret: String,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        dotenvy::dotenv().ok();
        let cfg = config::Config::builder()
            .set_default("app_env", "development")?
            .set_default("port", 3000)?
            .set_default("log_level", "info")?
            .set_default("data_backend", "memory")?
            .set_default("surreal_endpoint", "ws://127.0.0.1:8000")?
            .set_default("surreal_ns", "idlink")?
            .set_default("surreal_db", "identity")?
            .set_default("surreal_user", "root")?
            .set_default("surreal_pass", "root")?
            .set_default("cache_backend", "memory")?
            .set_default("redis_url", "redis://127.0.0.1:6379")?
            .set_default("agent_info_cache_prefix", "@agentInfo:authId")?
            .set_default("identity_provider", "kratos")?
            .set_default("kratos_admin_url", "http://127.0.0.1:4434")?
            .set_default("kratos_timeout_ms", 3000)?
            .set_default("kratos_retry_max_attempts", 2)?
            .set_default("kratos_retry_backoff_base_ms", 100)?
            .set_default("kratos_retry_backoff_max_ms", 1000)?
            .set_default("registration_require_verified_email", true)?
            .set_default("backfill_batch_size", 100)?
            .set_default("backfill_interval_ms", 0)?
            .set_default("jwt_secret", "dev-secret")?
            .add_source(config::Environment::default().separator("__"))
            .build()?;
        cfg.try_deserialize()
    }

    pub fn is_production(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("production")
    }

    pub fn uses_surreal(&self) -> bool {
        self.data_backend.eq_ignore_ascii_case("surreal")
    }

    pub fn uses_redis_cache(&self) -> bool {
        self.cache_backend.eq_ignore_ascii_case("redis")
    }

    pub fn kratos_timeout(&self) -> Duration {
        Duration::from_millis(self.kratos_timeout_ms.max(1))
    }

    /// `None` disables the periodic worker loop.
    pub fn backfill_interval(&self) -> Option<Duration> {
        (self.backfill_interval_ms > 0).then(|| Duration::from_millis(self.backfill_interval_ms))
    }
}
