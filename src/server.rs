//! HTTP Front-End
//!
//! Thin hyper server over a [`TieredResolver`] and a [`CacheClearer`].
//!
//! | Method | Path              | Action                                   |
//! |--------|-------------------|------------------------------------------|
//! | GET    | `/image?key=<k>`  | Resolve `k`, return the payload          |
//! | DELETE | `/cache`          | Purge every tier, return a JSON report   |
//! | GET    | `/stats`          | Resolver metrics as JSON                 |
//! | GET    | `/metrics`        | Prometheus text exposition               |
//! | GET    | `/healthz`        | Liveness                                 |

use std::convert::Infallible;
use std::future::Future;
use std::sync::Arc;

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheClearer, SourceTier, TieredResolver};
use crate::error::{Error, FetchError, Result};

/// Prometheus view of the resolver metrics
pub struct PrometheusExporter {
    registry: Registry,
    hits: IntCounterVec,
    misses: IntCounterVec,
    tier_errors: IntCounterVec,
    backfills: IntCounterVec,
    backfill_failures: IntCounter,
    origin_fetches: IntCounter,
    flight_joins: IntCounter,
    bytes_served: IntCounter,
    latency_us: IntGaugeVec,
    fast_bytes: IntGauge,
    fast_entries: IntGauge,
    in_flight: IntGauge,
}

impl PrometheusExporter {
    /// Register every metric in a private registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("tierfetch".to_string()), None)?;

        let hits = IntCounterVec::new(
            Opts::new("tier_hits_total", "Lookups answered by each tier"),
            &["tier"],
        )?;
        let misses = IntCounterVec::new(
            Opts::new("tier_misses_total", "Lookups each tier could not answer"),
            &["tier"],
        )?;
        let tier_errors = IntCounterVec::new(
            Opts::new("tier_errors_total", "Tier faults degraded to misses"),
            &["tier"],
        )?;
        let backfills = IntCounterVec::new(
            Opts::new("backfills_total", "Payloads copied into a faster tier"),
            &["tier"],
        )?;
        let backfill_failures =
            IntCounter::new("backfill_failures_total", "Back-fill writes that failed")?;
        let origin_fetches = IntCounter::new("origin_fetches_total", "Origin downloads started")?;
        let flight_joins = IntCounter::new(
            "flight_joins_total",
            "Callers that joined a running origin download",
        )?;
        let bytes_served = IntCounter::new("bytes_served_total", "Payload bytes returned")?;
        let latency_us = IntGaugeVec::new(
            Opts::new("tier_latency_microseconds", "Moving average lookup latency"),
            &["tier"],
        )?;
        let fast_bytes = IntGauge::new("fast_tier_bytes", "Bytes held by the fast tier")?;
        let fast_entries = IntGauge::new("fast_tier_entries", "Entries held by the fast tier")?;
        let in_flight = IntGauge::new("origin_in_flight", "Origin downloads currently running")?;

        registry.register(Box::new(hits.clone()))?;
        registry.register(Box::new(misses.clone()))?;
        registry.register(Box::new(tier_errors.clone()))?;
        registry.register(Box::new(backfills.clone()))?;
        registry.register(Box::new(backfill_failures.clone()))?;
        registry.register(Box::new(origin_fetches.clone()))?;
        registry.register(Box::new(flight_joins.clone()))?;
        registry.register(Box::new(bytes_served.clone()))?;
        registry.register(Box::new(latency_us.clone()))?;
        registry.register(Box::new(fast_bytes.clone()))?;
        registry.register(Box::new(fast_entries.clone()))?;
        registry.register(Box::new(in_flight.clone()))?;

        Ok(Self {
            registry,
            hits,
            misses,
            tier_errors,
            backfills,
            backfill_failures,
            origin_fetches,
            flight_joins,
            bytes_served,
            latency_us,
            fast_bytes,
            fast_entries,
            in_flight,
        })
    }

    /// Copy the resolver's current counters into the registry and encode it
    pub fn render(&self, resolver: &TieredResolver) -> Result<(String, Vec<u8>)> {
        let metrics = resolver.metrics();
        let snapshot = metrics.snapshot();

        for tier in [SourceTier::Fast, SourceTier::Persistent] {
            let label = [tier.as_str()];
            advance(&self.hits.with_label_values(&label), metrics.hits(tier));
            advance(&self.misses.with_label_values(&label), metrics.misses(tier));
            advance(&self.tier_errors.with_label_values(&label), metrics.tier_errors(tier));
        }
        for tier in SourceTier::ALL {
            self.latency_us
                .with_label_values(&[tier.as_str()])
                .set(metrics.latency(tier).as_micros() as i64);
        }
        advance(&self.hits.with_label_values(&["origin"]), snapshot.origin_successes);
        advance(&self.misses.with_label_values(&["origin"]), snapshot.origin_failures);
        advance(&self.backfills.with_label_values(&["fast"]), snapshot.backfills_fast);
        advance(
            &self.backfills.with_label_values(&["persistent"]),
            snapshot.backfills_persistent,
        );
        advance(&self.backfill_failures, snapshot.backfill_failures);
        advance(&self.origin_fetches, snapshot.origin_fetches);
        advance(&self.flight_joins, snapshot.flight_joins);
        advance(&self.bytes_served, snapshot.bytes_served);

        let fast = resolver.fast().stats();
        self.fast_bytes.set(fast.size as i64);
        self.fast_entries.set(fast.entries as i64);
        self.in_flight.set(resolver.in_flight() as i64);

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

/// Move a monotonic counter up to `value`
fn advance(counter: &IntCounter, value: u64) {
    let current = counter.get();
    if value > current {
        counter.inc_by(value - current);
    }
}

/// Shared state behind every connection
pub struct AppState {
    pub resolver: TieredResolver,
    pub clearer: CacheClearer,
    pub exporter: PrometheusExporter,
}

impl AppState {
    pub fn new(resolver: TieredResolver, clearer: CacheClearer) -> Result<Self> {
        Ok(Self {
            resolver,
            clearer,
            exporter: PrometheusExporter::new()?,
        })
    }
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn text(status: StatusCode, body: impl Into<String>) -> Response<Full<Bytes>> {
    respond(status, "text/plain; charset=utf-8", body.into())
}

fn json<T: serde::Serialize>(status: StatusCode, value: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(value) {
        Ok(body) => respond(status, "application/json", body),
        Err(e) => text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// First value of query parameter `name`, form-decoded
pub fn query_param(uri: &Uri, name: &str) -> Option<String> {
    url::form_urlencoded::parse(uri.query()?.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

/// HTTP status reported for a failed resolution
pub fn status_for(err: &FetchError) -> StatusCode {
    match err {
        FetchError::InvalidAddress { .. } => StatusCode::BAD_REQUEST,
        FetchError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// Dispatch one request
pub async fn route(state: &AppState, method: &Method, uri: &Uri) -> Response<Full<Bytes>> {
    match (method, uri.path()) {
        (&Method::GET, "/image") => {
            let Some(key) = query_param(uri, "key").filter(|k| !k.is_empty()) else {
                return text(StatusCode::BAD_REQUEST, "missing query parameter: key");
            };
            match state.resolver.resolve(&key).await {
                Ok(image) => {
                    let mut response =
                        respond(StatusCode::OK, image.format().mime_type(), image.payload().clone());
                    let headers = response.headers_mut();
                    headers.insert(
                        "x-source-tier",
                        HeaderValue::from_static(image.source().as_str()),
                    );
                    headers.insert(
                        "x-resolve-latency-ms",
                        HeaderValue::from(image.latency().as_millis() as u64),
                    );
                    response
                }
                Err(e) => {
                    debug!(key = %key, error = %e, "Resolution failed");
                    text(status_for(&e), e.to_string())
                }
            }
        }
        (&Method::DELETE, "/cache") => {
            let report = state.clearer.clear_all().await;
            let status = if report.is_clean() {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            json(status, &report)
        }
        (&Method::GET, "/stats") => json(StatusCode::OK, &state.resolver.metrics_snapshot()),
        (&Method::GET, "/metrics") => match state.exporter.render(&state.resolver) {
            Ok((content_type, body)) => {
                let mut response = respond(StatusCode::OK, "text/plain", body);
                if let Ok(value) = HeaderValue::from_str(&content_type) {
                    response.headers_mut().insert(CONTENT_TYPE, value);
                }
                response
            }
            Err(e) => {
                error!(error = %e, "Failed to render metrics");
                text(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        },
        (&Method::GET, "/healthz") | (&Method::GET, "/livez") => text(StatusCode::OK, "ok"),
        (_, "/image" | "/cache" | "/stats" | "/metrics" | "/healthz" | "/livez") => {
            text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
        }
        _ => text(StatusCode::NOT_FOUND, "not found"),
    }
}

/// Bind `addr` and serve until `shutdown` resolves
pub async fn run_server<F>(addr: &str, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let addr: std::net::SocketAddr = addr
        .parse()
        .map_err(|e| Error::Config(format!("Invalid server address '{}': {}", addr, e)))?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind server: {}", e)))?;

    info!("Image server listening on {}", addr);
    serve(listener, state, shutdown).await
}

/// Serve connections from `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "Server accept error");
                    continue;
                }
            },
            _ = &mut shutdown => {
                info!("Image server shutting down");
                return Ok(());
            }
        };

        let io = TokioIo::new(stream);
        let state = Arc::clone(&state);

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let state = Arc::clone(&state);
                async move {
                    let response = route(&state, req.method(), req.uri()).await;
                    Ok::<_, Infallible>(response)
                }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(peer = %peer, "Server connection error: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{FastTier, InMemoryTier, LookupKey};
    use crate::domain::ports::{OriginFetcher, Tier};
    use async_trait::async_trait;
    use http_body_util::BodyExt;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\nbody";

    struct StaticOrigin;

    #[async_trait]
    impl OriginFetcher for StaticOrigin {
        async fn fetch(&self, key: &LookupKey) -> std::result::Result<bytes::Bytes, FetchError> {
            if key.as_str().contains("missing") {
                Err(FetchError::Status {
                    key: key.to_string(),
                    status: 404,
                })
            } else {
                Ok(bytes::Bytes::from_static(PNG))
            }
        }
    }

    fn state() -> AppState {
        let fast = Arc::new(FastTier::with_capacity(1 << 20));
        let persistent: Arc<dyn Tier> = Arc::new(InMemoryTier::default());
        let resolver = TieredResolver::new(fast.clone(), persistent.clone(), Arc::new(StaticOrigin));
        let clearer = CacheClearer::new(persistent, fast);
        AppState::new(resolver, clearer).unwrap()
    }

    async fn body(response: Response<Full<Bytes>>) -> Bytes {
        response.into_body().collect().await.unwrap().to_bytes()
    }

    #[test]
    fn test_query_param() {
        let uri: Uri = "/image?x=1&key=https%3A%2F%2Fa.test%2Fb+c.png".parse().unwrap();
        assert_eq!(query_param(&uri, "key").as_deref(), Some("https://a.test/b c.png"));
        assert_eq!(query_param(&uri, "x").as_deref(), Some("1"));
        assert_eq!(query_param(&uri, "nope"), None);

        let repeated: Uri = "/image?key=first&key=second&flag".parse().unwrap();
        assert_eq!(query_param(&repeated, "key").as_deref(), Some("first"));
        assert_eq!(query_param(&repeated, "flag").as_deref(), Some(""));

        let no_query: Uri = "/image".parse().unwrap();
        assert_eq!(query_param(&no_query, "key"), None);
    }

    #[tokio::test]
    async fn test_image_route() {
        let state = state();
        let uri: Uri = "/image?key=https%3A%2F%2Fa.test%2Fcat.png".parse().unwrap();

        let response = route(&state, &Method::GET, &uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "image/png");
        assert_eq!(response.headers()["x-source-tier"], "origin");
        assert_eq!(body(response).await.as_ref(), PNG);

        let again = route(&state, &Method::GET, &uri).await;
        assert_eq!(again.headers()["x-source-tier"], "fast");
    }

    #[tokio::test]
    async fn test_image_route_errors() {
        let state = state();

        let missing_param = route(&state, &Method::GET, &"/image".parse().unwrap()).await;
        assert_eq!(missing_param.status(), StatusCode::BAD_REQUEST);

        let upstream = route(
            &state,
            &Method::GET,
            &"/image?key=https%3A%2F%2Fa.test%2Fmissing.png".parse().unwrap(),
        )
        .await;
        assert_eq!(upstream.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_clear_route() {
        let state = state();
        state.resolver.resolve("https://a.test/cat.png").await.unwrap();
        state.resolver.wait_for_backfills().await;

        let response = route(&state, &Method::DELETE, &"/cache".parse().unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let report: serde_json::Value = serde_json::from_slice(&body(response).await).unwrap();
        assert_eq!(report["persistent_removed"], 1);
        assert_eq!(report["fast_removed"], 1);
    }

    #[tokio::test]
    async fn test_metrics_route() {
        let state = state();
        state.resolver.resolve("https://a.test/cat.png").await.unwrap();

        let response = route(&state, &Method::GET, &"/metrics".parse().unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let text = String::from_utf8(body(response).await.to_vec()).unwrap();
        assert!(text.contains("tierfetch_origin_fetches_total 1"));
        assert!(text.contains("tierfetch_tier_misses_total{tier=\"fast\"} 1"));

        // Rendering twice must not double count
        let response = route(&state, &Method::GET, &"/metrics".parse().unwrap()).await;
        let text = String::from_utf8(body(response).await.to_vec()).unwrap();
        assert!(text.contains("tierfetch_origin_fetches_total 1"));
    }

    #[tokio::test]
    async fn test_misc_routes() {
        let state = state();
        let ok = route(&state, &Method::GET, &"/healthz".parse().unwrap()).await;
        assert_eq!(ok.status(), StatusCode::OK);

        let wrong_method = route(&state, &Method::POST, &"/cache".parse().unwrap()).await;
        assert_eq!(wrong_method.status(), StatusCode::METHOD_NOT_ALLOWED);

        let unknown = route(&state, &Method::GET, &"/nope".parse().unwrap()).await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_serve_until_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(serve(listener, Arc::new(state()), async move {
            let _ = rx.await;
        }));

        let response = reqwest::get(format!("http://{}/healthz", addr)).await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().await.unwrap(), "ok");

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
