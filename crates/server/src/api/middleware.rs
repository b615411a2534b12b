//! HTTP middleware: CORS, tracing, metrics, and per-client rate limiting.

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, State},
    http::{header, request::Parts, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tower_http::{
    classify::{ServerErrorsAsFailures, SharedClassifier},
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, warn, Level};
use transmute_core::{CorsConfig, ErrorKind};

use super::batch::{INCLUDED_COUNT_HEADER, SKIPPED_COUNT_HEADER};
use super::error::ErrorResponse;
use crate::metrics::{
    normalize_path, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION,
    RATE_LIMITED_TOTAL,
};
use crate::state::AppState;

/// Paths never rate limited.
const EXEMPT_PATHS: &[&str] = &["/api/v1/health", "/metrics"];

/// Forget idle clients once this many are tracked.
const MAX_TRACKED_CLIENTS: usize = 10_000;

/// CORS for browser clients. An empty origin list (or `*`) allows any origin.
pub fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::ACCEPT, header::CONTENT_TYPE, header::RANGE])
        .expose_headers([
            header::CONTENT_DISPOSITION,
            header::RETRY_AFTER,
            INCLUDED_COUNT_HEADER,
            SKIPPED_COUNT_HEADER,
        ])
        .max_age(Duration::from_secs(3600));

    if config.allowed_origins.is_empty() || config.allowed_origins.iter().any(|o| o == "*") {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    warn!("Ignoring invalid CORS origin: {}", origin);
                    None
                }
            })
            .collect();
        cors.allow_origin(origins)
    }
}

/// Request tracing at INFO with microsecond latency.
pub fn tracing_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(tower_http::LatencyUnit::Micros),
        )
}

/// Metrics middleware that tracks HTTP request duration and counts.
///
/// This middleware records:
/// - Request duration (histogram)
/// - Request count (counter)
/// - Requests in flight (gauge)
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = normalize_path(request.uri().path());

    HTTP_REQUESTS_IN_FLIGHT.inc();

    let response = next.run(request).await;

    HTTP_REQUESTS_IN_FLIGHT.dec();

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &path, &status])
        .observe(duration);
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    response
}

/// Per-client sliding-window request limiter.
///
/// Each client may make `max_requests` requests in any `window`. The limiter is
/// owned by the server state, so separate servers (and tests) never share counts.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    clients: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Records a request from `client` at `now`.
    ///
    /// Returns the time until the client may retry when the window is full.
    pub fn check(&self, client: IpAddr, now: Instant) -> Result<(), Duration> {
        let mut clients = match self.clients.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if clients.len() >= MAX_TRACKED_CLIENTS && !clients.contains_key(&client) {
            let window = self.window;
            clients.retain(|_, hits| {
                hits.back()
                    .is_some_and(|last| now.saturating_duration_since(*last) < window)
            });
        }

        let hits = clients.entry(client).or_default();
        while let Some(oldest) = hits.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                hits.pop_front();
            } else {
                break;
            }
        }

        if hits.len() >= self.max_requests as usize {
            let retry_after = hits
                .front()
                .map(|oldest| self.window.saturating_sub(now.saturating_duration_since(*oldest)))
                .unwrap_or(self.window);
            return Err(retry_after);
        }

        hits.push_back(now);
        Ok(())
    }
}

/// Rejects clients over the configured request rate with 429.
///
/// Health and metrics endpoints are exempt. Requests without a known peer
/// address are not limited.
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(limiter) = state.rate_limiter() else {
        return next.run(request).await;
    };
    if EXEMPT_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }
    let Some(client) = peer_ip(&request) else {
        return next.run(request).await;
    };

    match limiter.check(client, Instant::now()) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            RATE_LIMITED_TOTAL.inc();
            debug!("Rate limit exceeded for {}", client);
            let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            let mut response = (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorResponse {
                    error: format!(
                        "Rate limit exceeded. Maximum {} requests per window.",
                        limiter.max_requests()
                    ),
                    kind: ErrorKind::RateLimited,
                }),
            )
                .into_response();
            match HeaderValue::from_str(&secs.to_string()) {
                Ok(value) => {
                    response.headers_mut().insert(header::RETRY_AFTER, value);
                }
                Err(e) => warn!("Invalid Retry-After value: {}", e),
            }
            response
        }
    }
}

fn peer_ip(request: &Request<Body>) -> Option<IpAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Extractor for the client address, recorded as a job's originator.
///
/// `None` when the server runs without connection info (in-process tests).
#[derive(Debug, Clone)]
pub struct ClientIp(pub Option<IpAddr>);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        let ip = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        std::future::ready(Ok(ClientIp(ip)))
    }
}

impl ClientIp {
    pub fn originator(&self) -> Option<String> {
        self.0.map(|ip| ip.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Router};
    use std::net::Ipv4Addr;
    use tower::ServiceExt;
    use transmute_core::{
        testing::MockConverter, Category, Config, ConversionConfig, ConversionService,
        ConverterDispatch, FileStorage, SqliteJobStore,
    };

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_cors_layer_with_specific_origins() {
        let config = CorsConfig {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "https://example.com".to_string(),
            ],
        };
        let _layer = cors_layer(&config);
    }

    #[test]
    fn test_limiter_allows_up_to_max() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let now = Instant::now();
        assert!(limiter.check(ip(1), now).is_ok());
        assert!(limiter.check(ip(1), now).is_ok());
        assert!(limiter.check(ip(1), now).is_ok());
        assert!(limiter.check(ip(1), now).is_err());
        // Other clients have their own window.
        assert!(limiter.check(ip(2), now).is_ok());
    }

    #[test]
    fn test_limiter_window_slides() {
        let limiter = RateLimiter::new(2, Duration::from_secs(60));
        let start = Instant::now();
        limiter.check(ip(1), start).unwrap();
        limiter.check(ip(1), start + Duration::from_secs(30)).unwrap();

        let retry = limiter
            .check(ip(1), start + Duration::from_secs(40))
            .unwrap_err();
        assert_eq!(retry, Duration::from_secs(20));

        // The first hit has left the window.
        assert!(limiter.check(ip(1), start + Duration::from_secs(60)).is_ok());
        assert!(limiter.check(ip(1), start + Duration::from_secs(61)).is_err());
    }

    async fn ok_handler() -> &'static str {
        "OK"
    }

    fn create_test_state(max_requests: u32) -> Arc<AppState> {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut dispatch = ConverterDispatch::new();
        dispatch.register_category(Category::Image, Arc::new(MockConverter::new("image")));
        let service = ConversionService::new(
            Arc::new(SqliteJobStore::in_memory().unwrap()),
            Arc::new(dispatch),
            FileStorage::new(temp_dir.path().join("in"), temp_dir.path().join("out")),
            ConversionConfig::default(),
        );

        // Leak the temp_dir to keep the directories around
        std::mem::forget(temp_dir);

        Arc::new(
            AppState::new(Config::default(), service, None).with_rate_limiter(Some(
                RateLimiter::new(max_requests, Duration::from_secs(60)),
            )),
        )
    }

    fn request(path: &str, client: IpAddr) -> Request<Body> {
        let mut request = Request::builder().uri(path).body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::new(client, 40000)));
        request
    }

    fn app(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/api/v1/health", get(ok_handler))
            .route("/api/v1/formats", get(ok_handler))
            .layer(middleware::from_fn_with_state(
                state.clone(),
                rate_limit_middleware,
            ))
            .with_state(state)
    }

    #[tokio::test]
    async fn test_rate_limit_returns_429_with_retry_after() {
        let app = app(create_test_state(2));

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request("/api/v1/formats", ip(1)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .clone()
            .oneshot(request("/api/v1/formats", ip(1)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let retry_after = response.headers().get(header::RETRY_AFTER).unwrap();
        let secs: u64 = retry_after.to_str().unwrap().parse().unwrap();
        assert!(secs >= 1 && secs <= 60);

        // A different client is unaffected.
        let response = app
            .clone()
            .oneshot(request("/api/v1/formats", ip(2)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_is_exempt() {
        let app = app(create_test_state(1));
        for _ in 0..5 {
            let response = app
                .clone()
                .oneshot(request("/api/v1/health", ip(1)))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn test_client_ip_extractor() {
        async fn ip_handler(client: ClientIp) -> String {
            client.originator().unwrap_or_else(|| "unknown".to_string())
        }

        let app = Router::new().route("/ip", get(ip_handler));

        let response = app.clone().oneshot(request("/ip", ip(9))).await.unwrap();
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&body[..], b"10.0.0.9");

        let bare = Request::builder().uri("/ip").body(Body::empty()).unwrap();
        let response = app.oneshot(bare).await.unwrap();
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        assert_eq!(&body[..], b"unknown");
    }
}
