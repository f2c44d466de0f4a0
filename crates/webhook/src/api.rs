//! HTTP API: admission review endpoints, health checks and Prometheus metrics

use crate::hook::MutatingHook;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use override_lib::{
    health::{ComponentStatus, HealthRegistry},
    review::AdmissionReview,
};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing::{info, warn};

pub const OVERRIDE_PATH: &str = "/apis/admission.autoscaling.openshift.io/v1/clusterresourceoverrides";
pub const SVT_RELABEL_PATH: &str = "/apis/admission.node.openshift.io/v1/podsvtoverrides";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub override_hook: Arc<MutatingHook>,
    /// Present only when the relabel is enabled
    pub relabel_hook: Option<Arc<MutatingHook>>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        override_hook: Arc<MutatingHook>,
        relabel_hook: Option<Arc<MutatingHook>>,
    ) -> Self {
        Self {
            health_registry,
            override_hook,
            relabel_hook,
        }
    }
}

fn review(hook: &MutatingHook, review: AdmissionReview) -> Response {
    let Some(request) = review.request.clone() else {
        warn!(hook = %hook.name(), "admission review without request");
        return (StatusCode::BAD_REQUEST, "admission review carries no request").into_response();
    };

    let response = hook.admit(&request);
    Json(review.into_response_review(response)).into_response()
}

async fn review_override(State(state): State<Arc<AppState>>, Json(body): Json<AdmissionReview>) -> Response {
    review(&state.override_hook, body)
}

async fn review_relabel(State(state): State<Arc<AppState>>, Json(body): Json<AdmissionReview>) -> Response {
    match state.relabel_hook.as_deref() {
        Some(hook) => review(hook, body),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// 200 unless a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Pending => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(err) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route(OVERRIDE_PATH, post(review_override))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics));

    if state.relabel_hook.is_some() {
        router = router.route(SVT_RELABEL_PATH, post(review_relabel));
    }

    router.with_state(state)
}

pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting admission server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
