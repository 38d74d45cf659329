use std::sync::{Arc, Mutex};

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    response::IntoResponse,
    Router,
};
use serde_json::json;
use shared::protocol::Filter;
use tokio::net::TcpListener;

use super::*;

#[derive(Debug, Clone)]
struct CapturedRequest {
    method: String,
    path: String,
    query: Option<String>,
    authorization: Option<String>,
    content_type: Option<String>,
    body: Bytes,
}

type Responder = Arc<dyn Fn(&CapturedRequest) -> (StatusCode, String) + Send + Sync>;

#[derive(Clone)]
struct BackendState {
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    responder: Responder,
}

async fn capture(
    State(state): State<BackendState>,
    method: axum::http::Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    let request = CapturedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        authorization: header("authorization"),
        content_type: header("content-type"),
        body,
    };
    let (status, body) = (state.responder)(&request);
    state.captured.lock().expect("captured lock").push(request);
    (status, body)
}

async fn spawn_backend(
    responder: impl Fn(&CapturedRequest) -> (StatusCode, String) + Send + Sync + 'static,
) -> (String, Arc<Mutex<Vec<CapturedRequest>>>) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let captured = Arc::new(Mutex::new(Vec::new()));
    let state = BackendState {
        captured: captured.clone(),
        responder: Arc::new(responder),
    };
    let app = Router::new().fallback(capture).with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/api/"), captured)
}

fn gateway_for(base_url: &str) -> ForwardingGateway {
    ForwardingGateway::new(GatewayConfig {
        base_url: base_url.to_string(),
        ..GatewayConfig::default()
    })
    .expect("gateway")
}

fn ok_json(body: serde_json::Value) -> (StatusCode, String) {
    (StatusCode::OK, body.to_string())
}

#[test]
fn key_resolves_to_instance_address() {
    let gateway = gateway_for("http://backend.test/api/");
    let target = gateway
        .resolve(&ResourceRequest::new(Method::Get, "history").with_key("7"))
        .expect("resolve");
    assert_eq!(
        target.addressing,
        Addressing::Instance { key: "7".into() }
    );
    assert_eq!(
        target.url.as_str(),
        "http://backend.test/api/patients/kasallik-tarixi/7/"
    );
}

#[test]
fn filter_resolves_to_collection_with_query() {
    let gateway = gateway_for("http://backend.test/api/");
    let target = gateway
        .resolve(
            &ResourceRequest::new(Method::Get, "history")
                .with_filter(Filter::new("patient_id", "42")),
        )
        .expect("resolve");
    assert_eq!(
        target.url.as_str(),
        "http://backend.test/api/patients/kasallik-tarixi/?patient_id=42"
    );
}

#[test]
fn key_takes_priority_over_filter() {
    let request = ResourceRequest::new(Method::Get, "history")
        .with_key("7")
        .with_filter(Filter::new("patient_id", "42"));
    assert_eq!(
        resolve_addressing(&request).expect("resolve"),
        Addressing::Instance { key: "7".into() }
    );
}

#[test]
fn post_always_targets_bare_collection() {
    let gateway = gateway_for("http://backend.test/api");
    let target = gateway
        .resolve(&ResourceRequest::new(Method::Post, "history").with_key("7"))
        .expect("resolve");
    assert_eq!(target.addressing, Addressing::Collection);
    assert_eq!(
        target.url.as_str(),
        "http://backend.test/api/patients/kasallik-tarixi/"
    );
}

#[test]
fn modifying_methods_require_a_key() {
    for method in [Method::Put, Method::Patch, Method::Delete] {
        let request =
            ResourceRequest::new(method, "history").with_filter(Filter::new("patient_id", "42"));
        let err = resolve_addressing(&request).expect_err("missing key");
        assert!(matches!(err, GatewayError::MissingKey { .. }));
        assert_eq!(err.status(), 400);
    }
    let blank = ResourceRequest::new(Method::Put, "history").with_key("");
    assert!(resolve_addressing(&blank).is_err());
}

#[test]
fn keys_are_escaped_as_one_path_segment() {
    let gateway = gateway_for("http://backend.test/api/");
    let target = gateway
        .resolve(&ResourceRequest::new(Method::Get, "patients").with_key("a/b"))
        .expect("resolve");
    assert_eq!(
        target.url.as_str(),
        "http://backend.test/api/patients/patientlar/a%2Fb/"
    );
}

#[test]
fn duplicate_resources_are_rejected() {
    let err = ForwardingGateway::new(GatewayConfig {
        resources: vec![
            ResourceConfig::new("history", "a"),
            ResourceConfig::new("history", "b"),
        ],
        ..GatewayConfig::default()
    })
    .err()
    .expect("duplicate");
    assert!(matches!(err, GatewayConfigError::DuplicateResource(name) if name == "history"));
}

#[test]
fn error_message_extraction_is_lenient() {
    assert_eq!(
        extract_error_message(br#"{"message":"not found"}"#).as_deref(),
        Some("not found")
    );
    assert_eq!(
        extract_error_message(br#"{"detail":"Authentication credentials were not provided."}"#)
            .as_deref(),
        Some("Authentication credentials were not provided.")
    );
    assert_eq!(extract_error_message(br#"{"patient_id":["required"]}"#), None);
    assert_eq!(extract_error_message(b"<html>502</html>"), None);
}

#[tokio::test]
async fn get_with_filter_forwards_auth_and_returns_body() {
    let (base_url, captured) =
        spawn_backend(|_| ok_json(json!([{ "id": 1, "patient_id": 42 }]))).await;
    let gateway = gateway_for(&base_url);

    let response = gateway
        .forward(
            ResourceRequest::new(Method::Get, "history")
                .with_filter(Filter::new("patient_id", "42")),
            Some("Bearer token-123"),
        )
        .await
        .expect("forward");

    assert_eq!(response.status, 200);
    assert_eq!(response.body, json!([{ "id": 1, "patient_id": 42 }]));

    let captured = captured.lock().expect("captured lock");
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].method, "GET");
    assert_eq!(captured[0].path, "/api/patients/kasallik-tarixi/");
    assert_eq!(captured[0].query.as_deref(), Some("patient_id=42"));
    assert_eq!(captured[0].authorization.as_deref(), Some("Bearer token-123"));
    assert_eq!(captured[0].content_type.as_deref(), Some("application/json"));
}

#[tokio::test]
async fn missing_authorization_is_forwarded_as_empty() {
    let (base_url, captured) = spawn_backend(|_| ok_json(json!([]))).await;
    let gateway = gateway_for(&base_url);

    gateway
        .forward(ResourceRequest::new(Method::Get, "patients"), None)
        .await
        .expect("forward");

    let captured = captured.lock().expect("captured lock");
    assert_eq!(captured[0].authorization.as_deref(), Some(""));
    assert_eq!(captured[0].path, "/api/patients/patientlar/");
}

#[tokio::test]
async fn post_creates_with_201_and_passes_body_through() {
    let (base_url, captured) =
        spawn_backend(|_| ok_json(json!({ "id": 9, "diagnosis": "flu" }))).await;
    let gateway = gateway_for(&base_url);
    let payload = json!({ "patient_id": 42, "diagnosis": "flu" });

    let response = gateway
        .forward(
            ResourceRequest::new(Method::Post, "history").with_body(payload.clone()),
            Some("Bearer t"),
        )
        .await
        .expect("forward");

    assert_eq!(response.status, 201);
    assert_eq!(response.body["id"], 9);
    let captured = captured.lock().expect("captured lock");
    assert_eq!(captured[0].method, "POST");
    assert_eq!(captured[0].path, "/api/patients/kasallik-tarixi/");
    let sent: serde_json::Value = serde_json::from_slice(&captured[0].body).expect("json body");
    assert_eq!(sent, payload);
}

#[tokio::test]
async fn patch_with_key_targets_instance() {
    let (base_url, captured) = spawn_backend(|_| ok_json(json!({ "id": 7 }))).await;
    let gateway = gateway_for(&base_url);

    let response = gateway
        .forward(
            ResourceRequest::new(Method::Patch, "history")
                .with_key("7")
                .with_body(json!({ "notes": "updated" })),
            Some("Bearer t"),
        )
        .await
        .expect("forward");

    assert_eq!(response.status, 200);
    let captured = captured.lock().expect("captured lock");
    assert_eq!(captured[0].method, "PATCH");
    assert_eq!(captured[0].path, "/api/patients/kasallik-tarixi/7/");
}

#[tokio::test]
async fn put_without_key_makes_no_outbound_call() {
    let (base_url, captured) = spawn_backend(|_| ok_json(json!({}))).await;
    let gateway = gateway_for(&base_url);

    for method in [Method::Put, Method::Patch] {
        let err = gateway
            .forward(
                ResourceRequest::new(method, "history").with_body(json!({ "notes": "x" })),
                Some("Bearer t"),
            )
            .await
            .expect_err("missing key");
        assert_eq!(err.status(), 400);
    }
    assert!(captured.lock().expect("captured lock").is_empty());
}

#[tokio::test]
async fn unknown_resource_makes_no_outbound_call() {
    let (base_url, captured) = spawn_backend(|_| ok_json(json!({}))).await;
    let gateway = gateway_for(&base_url);

    let err = gateway
        .forward(ResourceRequest::new(Method::Get, "invoices"), None)
        .await
        .expect_err("unknown resource");
    assert_eq!(err.status(), 404);
    assert!(captured.lock().expect("captured lock").is_empty());
}

#[tokio::test]
async fn backend_error_status_and_message_pass_through() {
    let (base_url, _captured) = spawn_backend(|_| {
        (
            StatusCode::NOT_FOUND,
            json!({ "message": "not found" }).to_string(),
        )
    })
    .await;
    let gateway = gateway_for(&base_url);

    let err = gateway
        .forward(ResourceRequest::new(Method::Get, "history").with_key("404"), None)
        .await
        .expect_err("backend error");

    assert_eq!(err.status(), 404);
    assert_eq!(err.to_string(), "not found");
}

#[tokio::test]
async fn backend_error_without_message_uses_fallback() {
    let (base_url, _captured) = spawn_backend(|request| {
        if request.method == "PUT" {
            (StatusCode::BAD_REQUEST, "not json at all".to_string())
        } else {
            (StatusCode::FORBIDDEN, json!({ "code": 17 }).to_string())
        }
    })
    .await;
    let gateway = gateway_for(&base_url);

    let put_err = gateway
        .forward(
            ResourceRequest::new(Method::Put, "history")
                .with_key("7")
                .with_body(json!({})),
            None,
        )
        .await
        .expect_err("backend error");
    assert_eq!(put_err.status(), 400);
    assert_eq!(put_err.to_string(), "Failed to update medical history");

    let get_err = gateway
        .forward(ResourceRequest::new(Method::Get, "history"), None)
        .await
        .expect_err("backend error");
    assert_eq!(get_err.status(), 403);
    assert_eq!(get_err.to_string(), "Failed to fetch medical history");
}

#[tokio::test]
async fn non_json_success_body_is_internal_error() {
    let (base_url, _captured) =
        spawn_backend(|_| (StatusCode::OK, "<html>ok</html>".to_string())).await;
    let gateway = gateway_for(&base_url);

    let err = gateway
        .forward(ResourceRequest::new(Method::Get, "patients"), None)
        .await
        .expect_err("internal error");
    assert_eq!(err.status(), 500);
    assert_eq!(err.to_string(), shared::error::INTERNAL_ERROR_MESSAGE);
}

#[tokio::test]
async fn unreachable_backend_is_internal_error_for_every_call_type() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    let gateway = gateway_for(&format!("http://{addr}/api/"));

    let requests = [
        ResourceRequest::new(Method::Get, "history"),
        ResourceRequest::new(Method::Get, "history").with_key("7"),
        ResourceRequest::new(Method::Get, "history").with_filter(Filter::new("patient_id", "42")),
        ResourceRequest::new(Method::Post, "history").with_body(json!({})),
        ResourceRequest::new(Method::Put, "history")
            .with_key("7")
            .with_body(json!({})),
        ResourceRequest::new(Method::Patch, "history")
            .with_key("7")
            .with_body(json!({})),
    ];
    for request in requests {
        let err = gateway
            .forward(request, Some("Bearer t"))
            .await
            .expect_err("transport failure");
        assert_eq!(err.status(), 500);
        assert_eq!(err.to_string(), "Internal server error");
    }
}
