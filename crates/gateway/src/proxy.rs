//! Request forwarding to discovered instances.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderName, header};
use axum::response::Response;
use discovery::{LoadBalancer, ServiceRegistry};

use crate::error::ProxyError;

/// Prefix stripped from inbound paths before forwarding.
pub const API_PREFIX: &str = "/api";

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Maps the first path segment after `/api` to a logical service name.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: HashMap<String, String>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new([
            ("orders", "order-service"),
            ("inventory", "inventory-service"),
            ("payments", "payment-service"),
            ("users", "user-service"),
            ("jars", "jar-service"),
        ])
    }
}

impl RouteTable {
    pub fn new<'a>(routes: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            routes: routes
                .into_iter()
                .map(|(segment, service)| (segment.to_string(), service.to_string()))
                .collect(),
        }
    }

    /// Unknown segments are taken as the service name itself.
    pub fn service_for<'a>(&'a self, segment: &'a str) -> &'a str {
        self.routes.get(segment).map_or(segment, String::as_str)
    }
}

/// Shared proxy state.
pub struct ProxyState<R> {
    pub balancer: Arc<LoadBalancer<R>>,
    pub routes: RouteTable,
    client: reqwest::Client,
}

impl<R: ServiceRegistry + 'static> ProxyState<R> {
    pub fn new(
        balancer: Arc<LoadBalancer<R>>,
        routes: RouteTable,
        upstream_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(upstream_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            balancer,
            routes,
            client,
        })
    }

    /// Forwards `req` to an instance of the service named by its path.
    ///
    /// The `/api` prefix is stripped; method, query string, end-to-end headers and
    /// body are kept. The upstream status, headers and body are relayed as-is.
    /// Never retries.
    pub async fn forward(&self, req: Request) -> Result<Response, ProxyError> {
        let (parts, body) = req.into_parts();
        let upstream_path = parts
            .uri
            .path()
            .strip_prefix(API_PREFIX)
            .filter(|p| p.starts_with('/'))
            .ok_or_else(|| ProxyError::BadRequest(format!("not an API path: {}", parts.uri)))?;
        let segment = upstream_path
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default();
        if segment.is_empty() {
            return Err(ProxyError::BadRequest("missing service segment".to_string()));
        }
        let service = self.routes.service_for(segment).to_string();

        let base_url = self.balancer.resolve_url(&service).await?;
        let mut url = format!("{base_url}{upstream_path}");
        if let Some(query) = parts.uri.query() {
            url.push('?');
            url.push_str(query);
        }

        let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| ProxyError::BadRequest(format!("failed to read body: {e}")))?;

        tracing::debug!(service = %service, method = %parts.method, url = %url, "forwarding request");
        let started = Instant::now();

        let upstream = self
            .client
            .request(parts.method.clone(), &url)
            .headers(end_to_end_headers(&parts.headers, true))
            .body(body)
            .send()
            .await
            .map_err(|e| {
                metrics::counter!("gateway_upstream_errors_total", "service" => service.clone())
                    .increment(1);
                ProxyError::BadGateway(format!("{service}: {e}"))
            })?;

        let status = upstream.status();
        let headers = end_to_end_headers(upstream.headers(), false);
        let bytes = upstream
            .bytes()
            .await
            .map_err(|e| ProxyError::BadGateway(format!("{service}: {e}")))?;

        metrics::histogram!("gateway_upstream_duration_seconds", "service" => service.clone())
            .record(started.elapsed().as_secs_f64());
        metrics::counter!(
            "gateway_requests_total",
            "service" => service.clone(),
            "status" => status.as_u16().to_string()
        )
        .increment(1);

        let mut response = Response::new(Body::from(bytes));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection" | "keep-alive" | "transfer-encoding" | "te" | "trailer" | "upgrade"
    ) || name.as_str().starts_with("proxy-")
}

/// Copies headers minus hop-by-hop ones. Inbound copies also drop `host` and
/// `content-length`, which the client recomputes.
fn end_to_end_headers(headers: &HeaderMap, inbound: bool) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if is_hop_by_hop(name) {
            continue;
        }
        if inbound && (name == header::HOST || name == header::CONTENT_LENGTH) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}
