//! Local offline proxy in front of the back-office app.
//!
//! Every request is offered to the worker first. Requests the worker does
//! not intercept (form posts, logouts, foreign hosts) go straight to the
//! origin and are never cached. A few control routes under `/__shellcache/`
//! expose status and the sync/push stubs.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::{to_bytes, Body};
use axum::extract::{Path, Request as HttpRequest, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use url::Url;

use shellcache_core::net::{Fetcher, Request, RequestMode, Response};
use shellcache_core::worker::{
    CacheWorker, ClientAction, FetchOutcome, Notification, ResponseSource, SyncOutcome, WorkerStatus,
};

/// Largest request body forwarded to the origin.
/// Matches the origin's upload limit for bill images.
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Response header telling the page where the response came from.
pub const SOURCE_HEADER: &str = "x-shellcache-source";

struct AppState<F: Fetcher> {
    worker: Arc<CacheWorker<F>>,
}

impl<F: Fetcher> Clone for AppState<F> {
    fn clone(&self) -> Self {
        Self {
            worker: self.worker.clone(),
        }
    }
}

#[derive(Serialize)]
struct SyncResponse {
    tag: String,
    outcome: SyncOutcome,
}

pub fn router<F: Fetcher + 'static>(worker: Arc<CacheWorker<F>>) -> Router {
    Router::new()
        .route("/__shellcache/status", get(status::<F>))
        .route("/__shellcache/sync/{tag}", post(sync::<F>))
        .route("/__shellcache/push", post(push::<F>))
        .route("/__shellcache/notification-click", post(notification_click::<F>))
        .fallback(proxy::<F>)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { worker })
}

/// Serve until Ctrl+C.
///
/// # Errors
///
/// Returns an error if the server cannot bind to the port.
pub async fn run_server<F: Fetcher + 'static>(worker: Arc<CacheWorker<F>>, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, origin = %worker.settings().origin, "Offline proxy listening");

    axum::serve(listener, router(worker))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Proxy server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C, running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutting down offline proxy");
}

// ===== Control routes =====

async fn status<F: Fetcher + 'static>(State(state): State<AppState<F>>) -> Json<WorkerStatus> {
    Json(state.worker.status().await)
}

async fn sync<F: Fetcher + 'static>(
    State(state): State<AppState<F>>,
    Path(tag): Path<String>,
) -> Json<SyncResponse> {
    let outcome = state.worker.sync(&tag).await;
    Json(SyncResponse { tag, outcome })
}

async fn push<F: Fetcher + 'static>(State(state): State<AppState<F>>, body: String) -> Json<Notification> {
    Json(state.worker.push(Some(&body)).await)
}

async fn notification_click<F: Fetcher + 'static>(
    State(state): State<AppState<F>>,
    Json(notification): Json<Notification>,
) -> Json<ClientAction> {
    Json(state.worker.notification_click(&notification).await)
}

// ===== Proxy =====

async fn proxy<F: Fetcher + 'static>(State(state): State<AppState<F>>, request: HttpRequest) -> HttpResponse {
    let request = match to_worker_request(&state.worker.settings().origin, request).await {
        Ok(request) => request,
        Err(response) => return response,
    };
    if request.is_navigation() {
        state.worker.clients().register(request.url.as_str()).await;
    }

    match state.worker.handle_fetch(&request).await {
        FetchOutcome::Respond { response, source } => {
            debug!(url = %request.url, ?source, status = response.status, "Served by worker");
            into_http(response, source_label(source))
        }
        FetchOutcome::Passthrough(reason) => match state.worker.fetcher().fetch(&request).await {
            Ok(response) => into_http(response, "passthrough"),
            Err(e) => {
                warn!(url = %request.url, ?reason, error = %e, "Passthrough request failed");
                (StatusCode::BAD_GATEWAY, format!("Origin unreachable: {}", e)).into_response()
            }
        },
    }
}

fn source_label(source: ResponseSource) -> &'static str {
    match source {
        ResponseSource::Cache => "cache",
        ResponseSource::Network => "network",
        ResponseSource::Fallback => "fallback",
    }
}

/// A page load, as the browser reports it. Without fetch metadata, a GET
/// that accepts HTML is treated as one.
fn is_navigation(method: &Method, headers: &HeaderMap) -> bool {
    if method != Method::GET {
        return false;
    }
    match headers.get("sec-fetch-mode") {
        Some(mode) => mode.as_bytes() == b"navigate",
        None => headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(|accept| accept.contains("text/html"))
            .unwrap_or(false),
    }
}

/// Map an incoming request onto the origin. Only path and query are taken
/// from the request, so it cannot redirect the proxy to another host.
async fn to_worker_request(origin: &Url, request: HttpRequest) -> Result<Request, HttpResponse> {
    let (parts, body) = request.into_parts();

    let mut url = origin.clone();
    url.set_path(parts.uri.path());
    url.set_query(parts.uri.query());

    let body = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| (StatusCode::PAYLOAD_TOO_LARGE, format!("Request body rejected: {}", e)).into_response())?;

    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    let mode = if is_navigation(&parts.method, &parts.headers) {
        RequestMode::Navigate
    } else {
        RequestMode::Subresource
    };

    Ok(Request {
        method: parts.method,
        url,
        mode,
        headers,
        body: body.to_vec(),
    })
}

fn into_http(response: Response, source: &'static str) -> HttpResponse {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = axum::http::Response::builder().status(status);
    for (name, value) in &response.headers {
        match (HeaderName::try_from(name.as_str()), HeaderValue::from_str(value)) {
            (Ok(name), Ok(value)) => builder = builder.header(name, value),
            _ => debug!(header = %name, "Dropping invalid response header"),
        }
    }
    builder
        .header(SOURCE_HEADER, source)
        .body(Body::from(response.body))
        .unwrap_or_else(|e| {
            warn!(error = %e, "Failed to build response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        })
}
