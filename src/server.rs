/// HTTP transport: routing, TLS listener and drain-on-shutdown
use crate::{
    context::AppContext,
    error::{ResponderError, ResponderResult},
    metrics,
};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use axum_server::{tls_rustls::RustlsConfig, Handle};
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

pub const OCSP_RESPONSE_CONTENT_TYPE: &str = "application/ocsp-response";

/// Build the main application router
pub fn build_router(ctx: AppContext) -> Router {
    let body_limit = ctx.config.service.max_request_bytes;

    Router::new()
        // RFC 6960 Appendix A.1: POST carries the DER request as the body
        .route("/", post(ocsp_post))
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        // GET requests carry the request in the path, which may contain '/'
        .fallback(ocsp_get_or_not_found)
        .with_state(ctx)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

fn ocsp_reply(bytes: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, OCSP_RESPONSE_CONTENT_TYPE)],
        bytes,
    )
        .into_response()
}

async fn ocsp_post(State(ctx): State<AppContext>, body: Bytes) -> Response {
    ocsp_reply(ctx.responder.respond(&body, "POST").await)
}

async fn ocsp_get_or_not_found(
    State(ctx): State<AppContext>,
    method: Method,
    uri: Uri,
) -> Result<Response, ResponderError> {
    if method != Method::GET {
        return Ok(not_found().into_response());
    }

    let encoded = uri.path().trim_start_matches('/');
    if encoded.is_empty() {
        return Ok(not_found().into_response());
    }

    let started = Instant::now();
    let der = match decode_get_path(encoded) {
        Ok(der) => der,
        Err(e) => {
            metrics::record_ocsp_response(
                e.ocsp_status().as_str(),
                "GET",
                started.elapsed().as_secs_f64(),
            );
            return Err(e);
        }
    };
    Ok(ocsp_reply(ctx.responder.respond(&der, "GET").await))
}

/// URL-decode then base64-decode the path segment of a GET request
pub fn decode_get_path(encoded: &str) -> ResponderResult<Vec<u8>> {
    let unescaped = urlencoding::decode(encoded)
        .map_err(|e| ResponderError::MalformedRequest(format!("bad URL encoding: {}", e)))?;
    STANDARD
        .decode(unescaped.as_bytes())
        .map_err(|e| ResponderError::MalformedRequest(format!("bad base64: {}", e)))
}

/// Health check handler
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness: the revocation store answers
async fn readiness_check(State(ctx): State<AppContext>) -> (StatusCode, Json<serde_json::Value>) {
    match ctx.store.ping().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Err(e) => {
            warn!(error = %e, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "error": e.to_string()
                })),
            )
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_metrics(),
    )
}

/// 404 handler
fn not_found() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "NotFound",
            "message": "Endpoint not found"
        })),
    )
}

/// Observable listener state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Starting,
    Listening(SocketAddr),
    Draining,
}

/// HTTP(S) listener for OCSP requests
pub struct OcspServer {
    ctx: AppContext,
    state: watch::Sender<TransportState>,
}

impl OcspServer {
    pub fn new(ctx: AppContext) -> Self {
        let (state, _) = watch::channel(TransportState::Stopped);
        Self { ctx, state }
    }

    pub fn state(&self) -> TransportState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TransportState> {
        self.state.subscribe()
    }

    /// Serve until `shutdown` fires, then drain in-flight requests.
    ///
    /// Returns early with an error if the listener cannot be bound.
    pub async fn run(&self, shutdown: CancellationToken) -> ResponderResult<()> {
        self.state.send_replace(TransportState::Starting);

        let result = self.serve(shutdown).await;
        self.state.send_replace(TransportState::Stopped);

        match &result {
            Ok(()) => info!("OCSP listener stopped"),
            Err(e) => error!(error = %e, "OCSP listener failed"),
        }
        result
    }

    async fn serve(&self, shutdown: CancellationToken) -> ResponderResult<()> {
        let config = &self.ctx.config;
        let addr = config.listen_addr()?;
        let handle = Handle::new();
        let app = build_router(self.ctx.clone());

        let mut server = if config.service.tls_enabled {
            let tls = RustlsConfig::from_pem_file(
                &config.identity.ocsp_cert,
                &config.identity.ocsp_key,
            )
            .await
            .map_err(|e| ResponderError::Identity(format!("TLS setup failed: {}", e)))?;

            tokio::spawn(
                axum_server::bind_rustls(addr, tls)
                    .handle(handle.clone())
                    .serve(app.into_make_service()),
            )
        } else {
            tokio::spawn(
                axum_server::bind(addr)
                    .handle(handle.clone())
                    .serve(app.into_make_service()),
            )
        };

        let bound = tokio::select! {
            bound = handle.listening() => bound,
            _ = shutdown.cancelled() => None,
        };

        let local_addr = match bound {
            Some(local_addr) => local_addr,
            None => {
                handle.shutdown();
                return join_server(server).await.and_then(|()| {
                    if shutdown.is_cancelled() {
                        Ok(())
                    } else {
                        Err(ResponderError::Config(format!("Could not bind {}", addr)))
                    }
                });
            }
        };

        self.state.send_replace(TransportState::Listening(local_addr));
        info!(
            address = %local_addr,
            tls = config.service.tls_enabled,
            "OCSP responder listening"
        );

        tokio::select! {
            _ = shutdown.cancelled() => {}
            result = &mut server => {
                // Listener ended without being asked to
                return flatten_join(result);
            }
        }

        self.state.send_replace(TransportState::Draining);
        let drain = config.drain_timeout();
        info!(
            in_flight = handle.connection_count(),
            drain_secs = drain.as_secs(),
            "Draining OCSP listener"
        );
        handle.graceful_shutdown(Some(drain));

        join_server(server).await
    }
}

async fn join_server(server: tokio::task::JoinHandle<std::io::Result<()>>) -> ResponderResult<()> {
    flatten_join(server.await)
}

fn flatten_join(
    result: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> ResponderResult<()> {
    result
        .map_err(|e| ResponderError::Internal(format!("Listener task failed: {}", e)))?
        .map_err(ResponderError::Io)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_get_path() {
        let der = vec![0x30, 0x03, 0x0a, 0x01, 0x01, 0xfb, 0xff];
        let encoded = STANDARD.encode(&der);
        assert!(encoded.contains('+') || encoded.contains('/'));

        let escaped = urlencoding::encode(&encoded);
        assert_eq!(decode_get_path(&escaped).unwrap(), der);
        assert_eq!(decode_get_path(&encoded).unwrap(), der);
    }

    #[test]
    fn test_decode_get_path_rejects_garbage() {
        assert!(matches!(
            decode_get_path("!!!not-base64"),
            Err(ResponderError::MalformedRequest(_))
        ));
    }
}
