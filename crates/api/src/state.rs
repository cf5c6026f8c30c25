use idlink_infra::config::AppConfig;
use idlink_infra::services::{IdentityServices, ServicePorts};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub services: IdentityServices,
}

impl AppState {
    pub async fn new(config: AppConfig) -> anyhow::Result<Self> {
        let services = IdentityServices::from_config(&config).await?;
        Ok(Self { config, services })
    }

    pub fn with_ports(config: AppConfig, ports: ServicePorts) -> Self {
        let services = IdentityServices::assemble(&config, ports);
        Self { config, services }
    }
}
