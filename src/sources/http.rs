//! HTTP ingestion source
//!
//! One endpoint turns requests into events:
//!
//! - `GET  <path>?<query>`: the raw query string is the body
//! - `POST <path>`: the request body is the body
//!
//! Each event carries `Timestamp` (unix seconds), `Referrer`,
//! `UserAgent` and `RemoteAddr` headers. The response is `200` once every
//! bound channel accepted the event and `503` if any of them refused it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{ConnectInfo, DefaultBodyLimit, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    routing::get,
    Router,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;

use super::{bind_listener, bound_address, fan_out_blocking, Source, DEFAULT_BIND_ADDRESS};
use crate::channel::Channel;
use crate::types::{ComponentResult, ComponentSettings, Event};
use crate::utils::unix_timestamp;

const DEFAULT_PATH: &str = "/";
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    pub address: String,
    pub port: u16,
    /// Route the handler is mounted on, always starting with `/`
    pub path: String,
    pub max_body_bytes: usize,
    pub request_timeout: Duration,
}

impl HttpSourceConfig {
    pub fn new(port: u16) -> Self {
        Self {
            address: DEFAULT_BIND_ADDRESS.to_string(),
            port,
            path: DEFAULT_PATH.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Settings: `port` required; `path`, `address`, `max_body_bytes`,
    /// `request_timeout_ms` optional.
    pub fn from_settings(settings: &ComponentSettings) -> ComponentResult<Self> {
        Ok(Self::new(settings.require_parsed("port")?)
            .with_path(settings.get_or("path", DEFAULT_PATH))
            .with_address(settings.get_or("address", DEFAULT_BIND_ADDRESS))
            .with_max_body_bytes(settings.parse_or("max_body_bytes", DEFAULT_MAX_BODY_BYTES)?)
            .with_request_timeout(
                settings.millis_or("request_timeout_ms", DEFAULT_REQUEST_TIMEOUT)?,
            ))
    }

    #[must_use]
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        self
    }

    #[must_use]
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    #[must_use]
    pub fn with_max_body_bytes(mut self, max: usize) -> Self {
        self.max_body_bytes = max;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Handler state shared by every request
#[derive(Clone)]
struct IngestState {
    name: Arc<str>,
    channels: Arc<[Arc<dyn Channel>]>,
}

pub struct HttpSource {
    name: String,
    config: HttpSourceConfig,
    channels: Vec<Arc<dyn Channel>>,
    local_addr: Option<SocketAddr>,
}

impl HttpSource {
    pub fn new(name: impl Into<String>, config: HttpSourceConfig) -> Self {
        Self {
            name: name.into(),
            config,
            channels: Vec::new(),
            local_addr: None,
        }
    }

    pub fn from_settings(settings: &ComponentSettings) -> ComponentResult<Self> {
        Ok(Self::new(settings.name(), HttpSourceConfig::from_settings(settings)?))
    }

    /// Router with the ingestion route and its limits
    pub fn router(&self) -> Router {
        create_router(
            &self.config,
            IngestState {
                name: Arc::from(self.name.as_str()),
                channels: Arc::from(self.channels.clone()),
            },
        )
    }
}

impl Source for HttpSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_channel(&mut self, channel: Arc<dyn Channel>) {
        self.channels.push(channel);
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn start(&mut self, shutdown: CancellationToken) -> ComponentResult<JoinHandle<()>> {
        let listener = bind_listener(&self.name, &self.config.address, self.config.port)?;
        self.local_addr = bound_address(&listener);

        tracing::info!(
            source = %self.name,
            address = ?self.local_addr,
            path = %self.config.path,
            "http source listening"
        );

        let name = self.name.clone();
        let app = self.router();
        Ok(tokio::spawn(async move {
            let served = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;

            match served {
                Ok(()) => tracing::info!(source = %name, "http source stopped"),
                Err(e) => tracing::error!(source = %name, error = %e, "http server failed"),
            }
        }))
    }
}

fn create_router(config: &HttpSourceConfig, state: IngestState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route(&config.path, get(ingest).post(ingest))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .layer(TimeoutLayer::new(config.request_timeout))
        .layer(cors)
        .with_state(state)
}

async fn ingest(
    State(state): State<IngestState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    let payload = if method == Method::GET {
        uri.query().unwrap_or_default().as_bytes().to_vec()
    } else {
        body.to_vec()
    };

    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let remote = connect_info
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();

    let event = Event::new(payload)
        .with_header("Timestamp", unix_timestamp().to_string())
        .with_header("Referrer", header_value(header::REFERER))
        .with_header("UserAgent", header_value(header::USER_AGENT))
        .with_header("RemoteAddr", remote);

    if fan_out_blocking(state.name, state.channels, vec![event]).await > 0 {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    use super::*;
    use crate::channel::contract::RejectingChannel;
    use crate::channel::MemoryChannel;

    fn source_with(channel: Arc<dyn Channel>) -> HttpSource {
        let mut source = HttpSource::new("web", HttpSourceConfig::new(0).with_path("track"));
        source.set_channel(channel);
        source
    }

    #[tokio::test]
    async fn test_post_body_becomes_event() {
        let channel = Arc::new(MemoryChannel::new("mem"));
        let app = source_with(channel.clone()).router();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/track")
                    .header("User-Agent", "curl/8.0")
                    .header("Referer", "https://example.org/")
                    .body(Body::from("clicked=1"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let events = channel.get_all().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].body, b"clicked=1");
        assert_eq!(events[0].header("UserAgent"), Some("curl/8.0"));
        assert_eq!(events[0].header("Referrer"), Some("https://example.org/"));
        assert!(events[0].header("Timestamp").unwrap().parse::<i64>().is_ok());
        assert_eq!(events[0].header("RemoteAddr"), Some(""));
    }

    #[tokio::test]
    async fn test_get_uses_raw_query() {
        let channel = Arc::new(MemoryChannel::new("mem"));
        let app = source_with(channel.clone()).router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/track?page=%2Fhome&id=7")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(channel.get_all().unwrap()[0].body, b"page=%2Fhome&id=7");
    }

    #[tokio::test]
    async fn test_other_methods_are_rejected() {
        let channel = Arc::new(MemoryChannel::new("mem"));
        let app = source_with(channel.clone()).router();

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/track")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(channel.is_empty());
    }

    #[tokio::test]
    async fn test_rejecting_channel_yields_503() {
        let app = source_with(Arc::new(RejectingChannel)).router();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/track")
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_oversized_body_is_refused() {
        let channel = Arc::new(MemoryChannel::new("mem"));
        let mut source = HttpSource::new(
            "web",
            HttpSourceConfig::new(0).with_max_body_bytes(8),
        );
        source.set_channel(channel.clone());

        let response = source
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .body(Body::from("far more than eight bytes"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(channel.is_empty());
    }

    #[test]
    fn test_config_from_settings() {
        let settings = ComponentSettings::new()
            .with("port", "8080")
            .with("path", "collect");
        let config = HttpSourceConfig::from_settings(&settings).unwrap();
        assert_eq!(config.path, "/collect");
        assert_eq!(config.max_body_bytes, DEFAULT_MAX_BODY_BYTES);
        assert_eq!(config.request_timeout, DEFAULT_REQUEST_TIMEOUT);
    }
}
