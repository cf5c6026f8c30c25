use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, State};
use axum::{
    Json, Router,
    http::{HeaderValue, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use idlink_domain::audit::AuditEntry;
use idlink_domain::backfill::BackfillOutcome;
use idlink_domain::resolution::{IdentityResolutionResult, ResolveContext};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{ApiError, CorrelatedError};
use crate::middleware::CorrelationId;
use crate::{middleware as app_middleware, observability, state::AppState, validation};

const AUDIT_ID_HEADER: &str = "x-audit-id";

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/v1/admin/identity-backfill", post(run_identity_backfill))
        .route(
            "/v1/admin/identity-backfill/audit/:user_id",
            get(list_backfill_audit),
        )
        .route_layer(middleware::from_fn(
            app_middleware::require_admin_middleware,
        ));

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/v1/identity/resolve", post(resolve_identity))
        .merge(admin)
        .layer(middleware::from_fn(app_middleware::metrics_layer))
        .layer(app_middleware::timeout_layer())
        .layer(app_middleware::trace_layer())
        .layer(app_middleware::set_request_id_layer())
        .layer(app_middleware::propagate_request_id_layer())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            app_middleware::auth_middleware,
        ))
        .layer(middleware::from_fn(
            app_middleware::correlation_id_middleware,
        ))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    environment: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        environment: state.config.app_env.clone(),
    })
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    identity_provider: &'static str,
    components: Vec<&'static str>,
}

async fn ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, ApiError> {
    let mut components = Vec::with_capacity(state.services.readiness.len());
    for probe in &state.services.readiness {
        probe.probe().await.map_err(|err| {
            tracing::warn!(component = probe.component(), error = %err, "readiness probe failed");
            ApiError::ServiceUnavailable(format!("{} not ready", probe.component()))
        })?;
        components.push(probe.component());
    }
    Ok(Json(ReadyResponse {
        status: "ready",
        identity_provider: state.services.provider_name,
        components,
    }))
}

async fn metrics() -> Response {
    match observability::render_metrics() {
        Some(body) => (
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )],
            body,
        )
            .into_response(),
        None => ApiError::ServiceUnavailable("metrics recorder not installed".into())
            .into_response(),
    }
}

#[derive(Debug, Deserialize, Validate)]
struct ResolveIdentityRequest {
    #[validate(length(min = 1, max = 256))]
    identity_id: String,
}

async fn resolve_identity(
    State(state): State<AppState>,
    Extension(correlation_id): Extension<CorrelationId>,
    payload: Result<Json<ResolveIdentityRequest>, JsonRejection>,
) -> Result<Response, CorrelatedError> {
    let CorrelationId(correlation_id) = correlation_id;
    let Json(payload) = payload.map_err(|rejection| {
        ApiError::BadRequest {
            code: "invalid_request",
            message: rejection.body_text(),
        }
        .with_correlation(correlation_id.clone())
    })?;
    validation::validate(&payload).map_err(|err| err.with_correlation(correlation_id.clone()))?;

    let identity_id = payload.identity_id.trim();
    if identity_id.is_empty() {
        return Err(ApiError::Validation("identity_id is required".into())
            .with_correlation(correlation_id));
    }
    let result: IdentityResolutionResult = state
        .services
        .resolution
        .resolve_identity(
            identity_id,
            ResolveContext::with_correlation_id(correlation_id.clone()),
        )
        .await
        .map_err(|err| ApiError::from(&err).with_correlation(correlation_id))?;

    let status = if result.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    let mut response = (status, Json(&result)).into_response();
    if let Ok(value) = HeaderValue::from_str(&result.audit_id) {
        response.headers_mut().insert(AUDIT_ID_HEADER, value);
    }
    Ok(response)
}

async fn run_identity_backfill(
    State(state): State<AppState>,
) -> Result<Json<BackfillOutcome>, ApiError> {
    let outcome = state.services.backfill.run().await?;
    observability::register_backfill_run(&outcome);
    Ok(Json(outcome))
}

#[derive(Serialize)]
struct AuditListResponse {
    user_id: String,
    entries: Vec<AuditEntry>,
}

async fn list_backfill_audit(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<AuditListResponse>, ApiError> {
    let user_id = user_id.trim().to_string();
    if user_id.is_empty() {
        return Err(ApiError::Validation("user_id is required".into()));
    }
    let entries = state
        .services
        .audit
        .list_by_user(&user_id)
        .await
        .map_err(|err| {
            tracing::error!(error = %err, user_id = %user_id, "audit lookup failed");
            ApiError::Internal
        })?;
    Ok(Json(AuditListResponse { user_id, entries }))
}
