use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use server_api::{ForwardingGateway, GatewayResult};
use shared::{
    error::{ApiError, GatewayError},
    protocol::{Filter, Method, ResourceRequest},
};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::load_settings;

const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

type ResourceQuery = Query<HashMap<String, String>>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = load_settings();
    let gateway = ForwardingGateway::new(settings.gateway_config())?;
    info!(
        backend = %gateway.base_url(),
        resources = settings.resources.len(),
        "gateway configured"
    );

    let app = build_router(Arc::new(AppState { gateway }));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/api/:resource",
            get(http_get)
                .post(http_post)
                .put(http_put)
                .patch(http_patch)
                .delete(http_delete),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn http_get(
    State(state): State<Arc<AppState>>,
    Path(resource): Path<String>,
    Query(query): ResourceQuery,
    headers: HeaderMap,
) -> Response {
    relay(&state, Method::Get, resource, &query, &headers, None).await
}

async fn http_post(
    State(state): State<Arc<AppState>>,
    Path(resource): Path<String>,
    Query(query): ResourceQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    relay(&state, Method::Post, resource, &query, &headers, Some(body)).await
}

async fn http_put(
    State(state): State<Arc<AppState>>,
    Path(resource): Path<String>,
    Query(query): ResourceQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    relay(&state, Method::Put, resource, &query, &headers, Some(body)).await
}

async fn http_patch(
    State(state): State<Arc<AppState>>,
    Path(resource): Path<String>,
    Query(query): ResourceQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    relay(&state, Method::Patch, resource, &query, &headers, Some(body)).await
}

async fn http_delete(
    State(state): State<Arc<AppState>>,
    Path(resource): Path<String>,
    Query(query): ResourceQuery,
    headers: HeaderMap,
) -> Response {
    relay(&state, Method::Delete, resource, &query, &headers, None).await
}

async fn relay(
    state: &AppState,
    method: Method,
    resource: String,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: Option<Bytes>,
) -> Response {
    let request = match resource_request(&state.gateway, method, resource, query, body) {
        Ok(request) => request,
        Err(error) => return error_response(&error),
    };
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    into_response(state.gateway.forward(request, authorization).await)
}

/// Maps route parameters onto a `ResourceRequest`. `pk` is accepted as an
/// alias of `key`; the filter is the resource's configured filter
/// parameter.
fn resource_request(
    gateway: &ForwardingGateway,
    method: Method,
    resource: String,
    query: &HashMap<String, String>,
    body: Option<Bytes>,
) -> Result<ResourceRequest, GatewayError> {
    let Some(config) = gateway.resource(&resource) else {
        return Err(GatewayError::UnknownResource { resource });
    };

    let non_empty = |name: &str| query.get(name).filter(|value| !value.is_empty()).cloned();
    let filter = config
        .filter_param
        .as_deref()
        .and_then(|param| non_empty(param).map(|value| Filter::new(param, value)));

    let mut request = ResourceRequest::new(method, resource);
    request.key = non_empty("key").or_else(|| non_empty("pk"));
    request.filter = filter;
    request.body = match body {
        Some(raw) if !raw.is_empty() => Some(serde_json::from_slice(&raw).map_err(|error| {
            debug!(%error, "rejecting request body that is not JSON");
            GatewayError::InvalidBody
        })?),
        _ => None,
    };
    Ok(request)
}

fn into_response(result: GatewayResult) -> Response {
    match result {
        Ok(response) => (
            StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK),
            Json(response.body),
        )
            .into_response(),
        Err(error) => error_response(&error),
    }
}

fn error_response(error: &GatewayError) -> Response {
    (
        StatusCode::from_u16(error.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(ApiError::from(error)),
    )
        .into_response()
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
