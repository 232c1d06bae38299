//! HTTP front end: hyper/tokio connection loop, request
//! dispatch into `zarr_projection::Projection`, and the `ServiceError` →
//! status code mapping.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response as HyperResponse, StatusCode};
use hyper_util::rt::tokio::TokioIo;
use tokio::net::TcpListener;
use tracing::Instrument;
use zarr_cache::PixelBufferCache;
use zarr_config::Config;
use zarr_model::{MetadataSource, ServiceError};
use zarr_projection::{Projection, Response};

pub struct AppState {
    pub config: Arc<Config>,
    pub projection: Arc<Projection>,
}

impl AppState {
    pub fn new(config: Arc<Config>, cache: Arc<PixelBufferCache>, metadata: Arc<dyn MetadataSource>) -> AppState {
        let projection = Arc::new(Projection::new(Arc::clone(&config), cache, metadata));
        AppState { config, projection }
    }
}

type Body = Full<Bytes>;

/// Binds `state.config.net_port` and serves connections until the process is
/// terminated: one task per connection, `http1::Builder` + `service_fn`,
/// each connection watched for graceful shutdown.
pub async fn run(state: Arc<AppState>) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.net_port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    serve(listener, state).await
}

/// Serves connections off an already-bound listener. Split out from `run` so
/// integration tests can bind an ephemeral port instead of the configured one.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> std::io::Result<()> {
    let graceful = hyper_util::server::graceful::GracefulShutdown::new();

    loop {
        let (stream, peer) = listener.accept().await?;
        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        let conn = http1::Builder::new().serve_connection(
            io,
            service_fn(move |req| handle(Arc::clone(&state), req)),
        );
        let conn = graceful.watch(conn);
        tokio::task::spawn(async move {
            if let Err(err) = conn.await {
                tracing::warn!(%peer, error = %err, "connection error");
            }
        });
    }
}

async fn handle(state: Arc<AppState>, req: Request<hyper::body::Incoming>) -> Result<HyperResponse<Body>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let span = tracing::info_span!("request", %method, %path);

    async move {
        if method != hyper::Method::GET {
            return Ok(error_response(StatusCode::NOT_FOUND, "method not allowed"));
        }

        let state = Arc::clone(&state);
        let path_for_task = path.clone();
        let outcome = tokio::task::spawn_blocking(move || state.projection.handle(&path_for_task))
            .await
            .unwrap_or_else(|join_err| Err(ServiceError::upstream(join_err.to_string())));

        Ok(match outcome {
            Ok(response) => success_response(response),
            Err(err) => {
                let (status, detail) = map_error(&err);
                if status.is_server_error() {
                    tracing::error!(error = %err, "request failed");
                } else {
                    tracing::warn!(error = %err, "request rejected");
                }
                error_response(status, &detail)
            },
        })
    }
    .instrument(span)
    .await
}

fn success_response(response: Response) -> HyperResponse<Body> {
    let (content_type, body) = match response {
        Response::Json(value) => (
            "application/json; charset=utf-8",
            serde_json::to_vec(&value).expect("serde_json::Value always serialises"),
        ),
        Response::Html(html) => ("text/html; charset=utf-8", html.into_bytes()),
        Response::Binary(bytes) => ("application/octet-stream", bytes),
    };
    HyperResponse::builder()
        .status(StatusCode::OK)
        .header("content-type", content_type)
        .header("content-length", body.len())
        .body(Full::new(Bytes::from(body)))
        .expect("response with validated header values always builds")
}

fn error_response(status: StatusCode, detail: &str) -> HyperResponse<Body> {
    HyperResponse::builder()
        .status(status)
        .header("content-type", "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from(detail.to_owned())))
        .expect("response with validated header values always builds")
}

/// Maps a `ServiceError` to its HTTP status and a short diagnostic, per
/// error taxonomy below.
fn map_error(err: &ServiceError) -> (StatusCode, String) {
    match err {
        ServiceError::BadRequest(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        ServiceError::Upstream(_) | ServiceError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}
