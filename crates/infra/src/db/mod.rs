use std::sync::Arc;
use std::time::Duration;

use idlink_domain::ports::BoxFuture;
use idlink_domain::ports::readiness::{ReadinessError, ReadinessProbe};
use surrealdb::Surreal;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use tokio::net::TcpStream;
use tokio::time::timeout;
use url::Url;

use crate::config::AppConfig;

const SCHEMA: &str = "
    DEFINE TABLE IF NOT EXISTS identity_user SCHEMALESS;
    DEFINE INDEX IF NOT EXISTS identity_user_user_id ON TABLE identity_user FIELDS user_id UNIQUE;
    DEFINE INDEX IF NOT EXISTS identity_user_row_id ON TABLE identity_user FIELDS row_id UNIQUE;
    DEFINE INDEX IF NOT EXISTS identity_user_authentication_id ON TABLE identity_user FIELDS authentication_id UNIQUE;
    DEFINE INDEX IF NOT EXISTS identity_user_email ON TABLE identity_user FIELDS email UNIQUE;
    DEFINE TABLE IF NOT EXISTS identity_backfill_audit SCHEMALESS;
    DEFINE INDEX IF NOT EXISTS identity_backfill_audit_user_id ON TABLE identity_backfill_audit FIELDS user_id;
";

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl DbConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            endpoint: config.surreal_endpoint.clone(),
            namespace: config.surreal_ns.clone(),
            database: config.surreal_db.clone(),
            username: config.surreal_user.clone(),
            password: config.surreal_pass.clone(),
        }
    }
}

/// Opens a root session on the configured namespace and applies the identity schema.
pub async fn connect(db_config: &DbConfig) -> anyhow::Result<Arc<Surreal<Client>>> {
    let db = Surreal::<Client>::init();
    db.connect::<Ws>(&db_config.endpoint).await?;
    db.signin(Root {
        username: db_config.username.clone(),
        password: db_config.password.clone(),
    })
    .await?;
    db.use_ns(&db_config.namespace)
        .use_db(&db_config.database)
        .await?;
    db.query(SCHEMA).await?.check()?;
    tracing::info!(
        endpoint = %db_config.endpoint,
        namespace = %db_config.namespace,
        database = %db_config.database,
        "connected to surrealdb"
    );
    Ok(Arc::new(db))
}

const COMPONENT: &str = "surrealdb";
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Readiness check that only opens a TCP connection to the endpoint.
#[derive(Debug, Clone)]
pub struct SurrealReadiness {
    config: DbConfig,
}

impl SurrealReadiness {
    pub fn new(config: DbConfig) -> Self {
        Self { config }
    }
}

impl ReadinessProbe for SurrealReadiness {
    fn component(&self) -> &'static str {
        COMPONENT
    }

    fn probe(&self) -> BoxFuture<'_, Result<(), ReadinessError>> {
        let endpoint = self.config.endpoint.clone();

        Box::pin(async move {
            let address = parse_socket_address(&endpoint)?;
            let connect = timeout(PROBE_TIMEOUT, TcpStream::connect(&address))
                .await
                .map_err(|_| ReadinessError::Unreachable {
                    component: COMPONENT,
                    detail: format!("connect to {address} timed out"),
                })?;
            connect.map_err(|err| ReadinessError::Unreachable {
                component: COMPONENT,
                detail: format!("connect to {address} failed: {err}"),
            })?;
            Ok(())
        })
    }
}

fn parse_socket_address(endpoint: &str) -> Result<String, ReadinessError> {
    let normalized = if endpoint.contains("://") {
        endpoint.to_string()
    } else {
        format!("ws://{endpoint}")
    };
    let parsed = Url::parse(&normalized).map_err(|err| ReadinessError::Misconfigured {
        component: COMPONENT,
        detail: format!("invalid endpoint '{endpoint}': {err}"),
    })?;

    let host = parsed.host_str().ok_or_else(|| ReadinessError::Misconfigured {
        component: COMPONENT,
        detail: format!("missing host in endpoint '{endpoint}'"),
    })?;
    let port = parsed
        .port_or_known_default()
        .unwrap_or(match parsed.scheme() {
            "wss" | "https" => 443,
            _ => 8000,
        });
    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_without_scheme_uses_surreal_default_port() {
        assert_eq!(parse_socket_address("db.internal").unwrap(), "db.internal:8000");
        assert_eq!(parse_socket_address("wss://db.example.com").unwrap(), "db.example.com:443");
        assert_eq!(parse_socket_address("ws://127.0.0.1:9000").unwrap(), "127.0.0.1:9000");
    }

    fn readiness_for(endpoint: String) -> SurrealReadiness {
        SurrealReadiness::new(DbConfig {
            endpoint,
            namespace: "idlink".into(),
            database: "identity".into(),
            username: "root".into(),
            password: "root".into(),
        })
    }

    #[tokio::test]
    async fn probe_succeeds_when_endpoint_accepts_connections() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = readiness_for(format!("ws://{addr}"));
        assert_eq!(probe.component(), "surrealdb");
        probe.probe().await.unwrap();
    }

    #[tokio::test]
    async fn probe_reports_closed_endpoint_as_unreachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = readiness_for(format!("ws://{addr}")).probe().await.unwrap_err();
        assert!(matches!(err, ReadinessError::Unreachable { .. }));
    }

    #[test]
    fn malformed_endpoint_is_a_configuration_error() {
        assert!(matches!(
            parse_socket_address("ws://"),
            Err(ReadinessError::Misconfigured { .. })
        ));
    }
}
