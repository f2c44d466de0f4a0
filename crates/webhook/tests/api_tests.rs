//! Integration tests for the webhook HTTP endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use override_lib::{
    admission::{ClusterResourceOverrideAdmission, PodSvtRelabelAdmission, OVERRIDE_WEBHOOK, SVT_ENABLED_LABEL, SVT_WEBHOOK},
    health::{components, HealthRegistry},
    policy::{ApplicabilityPolicy, LabelOptIn, ENABLED_LABEL},
    review::AdmissionResponse,
    Config, InMemoryStore,
};
use resource_override_webhook::{
    api::{create_router, AppState, OVERRIDE_PATH, SVT_RELABEL_PATH},
    hook::MutatingHook,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower::ServiceExt;

/// Patch operations carried (base64) in a response
fn decode_patch(response: &Value) -> Vec<Value> {
    let response: AdmissionResponse = serde_json::from_value(response.clone()).unwrap();
    serde_json::from_slice(&response.patch.unwrap()).unwrap()
}

fn namespace(name: &str, label: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(label.to_string(), "true".to_string())])),
            ..Default::default()
        },
        ..Default::default()
    }
}

fn override_config() -> Config {
    Config {
        force_selinux_relabel: true,
        limit_cpu_to_memory_percent: 200,
        cpu_request_to_limit_percent: 25,
        memory_request_to_limit_percent: 50,
    }
}

struct TestApp {
    router: Router,
    health_registry: HealthRegistry,
    override_hook: Arc<MutatingHook>,
    relabel_hook: Arc<MutatingHook>,
    store: InMemoryStore,
}

fn setup_test_app() -> TestApp {
    let store = InMemoryStore::new();
    store.insert_namespace(namespace("team-a", ENABLED_LABEL));
    store.insert_namespace(namespace("storage", SVT_ENABLED_LABEL));

    let health_registry = HealthRegistry::new();
    let override_hook = Arc::new(MutatingHook::new(OVERRIDE_WEBHOOK));
    let relabel_hook = Arc::new(MutatingHook::new(SVT_WEBHOOK));
    let state = Arc::new(AppState::new(
        health_registry.clone(),
        override_hook.clone(),
        Some(relabel_hook.clone()),
    ));

    TestApp {
        router: create_router(state),
        health_registry,
        override_hook,
        relabel_hook,
        store,
    }
}

fn initialize(app: &TestApp) {
    app.override_hook
        .initialize(Arc::new(ClusterResourceOverrideAdmission::new(
            override_config(),
            Arc::new(app.store.clone()),
            Arc::new(app.store.clone()),
            Arc::new(LabelOptIn::new(ENABLED_LABEL)),
            ApplicabilityPolicy::CREATE_ONLY,
        )))
        .unwrap();
    app.relabel_hook
        .initialize(Arc::new(PodSvtRelabelAdmission::new(Arc::new(app.store.clone()))))
        .unwrap();
}

fn review(namespace: &str, operation: &str, pod: Value) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "7f0b2f5e-1a2b-4c3d-9e8f-001122334455",
            "kind": {"group": "", "version": "v1", "kind": "Pod"},
            "resource": {"group": "", "version": "v1", "resource": "pods"},
            "namespace": namespace,
            "operation": operation,
            "object": pod
        }
    })
}

fn pod() -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {"name": "web"},
        "spec": {
            "containers": [{
                "name": "app",
                "image": "nginx",
                "resources": {"limits": {"memory": "1Gi"}}
            }],
            "volumes": [{"name": "data", "persistentVolumeClaim": {"claimName": "data"}}]
        }
    })
}

async fn post(router: Router, path: &str, body: &Value) -> (StatusCode, Value) {
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

async fn get(router: Router, path: &str) -> (StatusCode, Vec<u8>) {
    let response = router
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn test_review_before_initialization_is_internal_error() {
    let app = setup_test_app();

    let (status, body) = post(app.router, OVERRIDE_PATH, &review("team-a", "CREATE", pod())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["response"]["allowed"], false);
    assert_eq!(body["response"]["status"]["code"], 500);
    assert_eq!(body["response"]["status"]["reason"], "InternalError");
}

#[tokio::test]
async fn test_override_review_returns_patch() {
    let app = setup_test_app();
    initialize(&app);

    let (status, body) = post(app.router, OVERRIDE_PATH, &review("team-a", "CREATE", pod())).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["apiVersion"], "admission.k8s.io/v1");
    assert_eq!(body["kind"], "AdmissionReview");
    assert_eq!(body["response"]["uid"], "7f0b2f5e-1a2b-4c3d-9e8f-001122334455");
    assert_eq!(body["response"]["allowed"], true);
    assert_eq!(body["response"]["patchType"], "JSONPatch");

    let operations = decode_patch(&body["response"]);
    let mut document = pod();
    let patch: json_patch::Patch = serde_json::from_value(Value::Array(operations)).unwrap();
    json_patch::patch(&mut document, &patch).unwrap();

    let resources = &document["spec"]["containers"][0]["resources"];
    assert_eq!(resources["requests"]["memory"], "512Mi");
    assert_eq!(resources["limits"]["cpu"], "2");
    assert_eq!(resources["requests"]["cpu"], "500m");
}

#[tokio::test]
async fn test_override_review_for_unlabelled_namespace_is_allowed() {
    let app = setup_test_app();
    initialize(&app);
    app.store.insert_namespace(Namespace {
        metadata: ObjectMeta {
            name: Some("team-b".to_string()),
            ..Default::default()
        },
        ..Default::default()
    });

    let (_, body) = post(app.router, OVERRIDE_PATH, &review("team-b", "CREATE", pod())).await;

    assert_eq!(body["response"]["allowed"], true);
    assert!(body["response"].get("patch").is_none());
}

#[tokio::test]
async fn test_override_review_for_unknown_namespace_is_forbidden() {
    let app = setup_test_app();
    initialize(&app);

    let (_, body) = post(app.router, OVERRIDE_PATH, &review("ghost", "CREATE", pod())).await;

    let response: AdmissionResponse = serde_json::from_value(body["response"].clone()).unwrap();
    assert!(!response.allowed);
    assert_eq!(response.status.unwrap().code, 403);
}

#[tokio::test]
async fn test_relabel_review_returns_patch() {
    let app = setup_test_app();
    initialize(&app);

    let (status, body) = post(app.router, SVT_RELABEL_PATH, &review("storage", "UPDATE", pod())).await;

    assert_eq!(status, StatusCode::OK);
    let operations = decode_patch(&body["response"]);
    assert_eq!(operations.len(), 1);
    assert_eq!(operations[0]["path"], "/spec/securityContext");
    assert_eq!(operations[0]["value"]["seLinuxOptions"]["type"], "spc_t");
}

#[tokio::test]
async fn test_relabel_route_absent_when_disabled() {
    let state = Arc::new(AppState::new(
        HealthRegistry::new(),
        Arc::new(MutatingHook::new(OVERRIDE_WEBHOOK)),
        None,
    ));

    let (status, _) = post(create_router(state), SVT_RELABEL_PATH, &review("storage", "CREATE", pod())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_review_without_request_is_bad_request() {
    let app = setup_test_app();

    let body = json!({"apiVersion": "admission.k8s.io/v1", "kind": "AdmissionReview"});
    let (status, _) = post(app.router, OVERRIDE_PATH, &body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_readyz_follows_cache_sync() {
    let app = setup_test_app();
    app.health_registry
        .register_pending(components::NAMESPACE_CACHE, "initial list in progress")
        .await;

    let (status, body) = get(app.router.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let readiness: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(readiness["ready"], false);

    app.health_registry
        .set_healthy(components::NAMESPACE_CACHE)
        .await;

    let (status, _) = get(app.router.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = get(app.router, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    let health: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(health["status"], "healthy");
}

#[tokio::test]
async fn test_healthz_unhealthy_component() {
    let app = setup_test_app();
    app.health_registry
        .set_unhealthy(components::LIMIT_RANGE_CACHE, "watch failed")
        .await;

    let (status, _) = get(app.router, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_metrics_exposes_admission_counters() {
    let app = setup_test_app();
    initialize(&app);

    post(app.router.clone(), OVERRIDE_PATH, &review("team-a", "CREATE", pod())).await;

    let (status, body) = get(app.router, "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8(body).unwrap();
    assert!(text.contains("resource_override_admission_requests_total"));
    assert!(text.contains("resource_override_admission_latency_seconds"));
}
