//! HTTP forwarding and reconfiguration for the load-balancer router

use super::endpoints::EndpointSet;
use crate::health::{components, HealthRegistry};
use crate::observability::{BalancerMetrics, StructuredLogger};
use axum::{
    body::{to_bytes, Body},
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Query parameter that carries a new endpoint list
pub const ENDPOINTS_PARAM: &str = "endpoints";

/// Largest request body buffered before forwarding
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Headers that describe the client connection, not the request
const HOP_BY_HOP: &[&str] = &[
    "host",
    "content-length",
    "connection",
    "keep-alive",
    "proxy-connection",
    "transfer-encoding",
    "upgrade",
    "te",
    "trailer",
];

pub struct RouterState {
    endpoints: Arc<EndpointSet>,
    client: reqwest::Client,
    health: Option<HealthRegistry>,
    metrics: BalancerMetrics,
    logger: StructuredLogger,
}

impl RouterState {
    pub fn new(endpoints: Arc<EndpointSet>, upstream_timeout: Option<Duration>) -> Self {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = upstream_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().unwrap_or_else(|e| {
            warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        });

        Self {
            endpoints,
            client,
            health: None,
            metrics: BalancerMetrics::new(),
            logger: StructuredLogger::new("lb-router"),
        }
    }

    /// Report the endpoint component healthy once a valid set arrives
    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn endpoints(&self) -> &Arc<EndpointSet> {
        &self.endpoints
    }

    fn publish_outstanding(&self) {
        for (address, outstanding) in self.endpoints.snapshot() {
            self.metrics.set_endpoint_outstanding(&address, outstanding);
        }
    }
}

/// Every path and method goes through [`handle`]
pub fn create_router(state: Arc<RouterState>) -> Router {
    Router::new().fallback(handle).with_state(state)
}

/// Comma separated `endpoints` value, if the query carries one
pub fn endpoints_param(query: Option<&str>) -> Option<Vec<String>> {
    let query = query?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == ENDPOINTS_PARAM)
        .map(|(_, value)| value.split(',').map(|s| s.trim().to_string()).collect())
}

async fn handle(State(state): State<Arc<RouterState>>, req: Request) -> Response {
    if let Some(addresses) = endpoints_param(req.uri().query()) {
        return reconfigure(&state, &addresses).await;
    }
    forward(&state, req).await
}

async fn reconfigure(state: &RouterState, addresses: &[String]) -> Response {
    match state.endpoints.replace(addresses) {
        Ok(removed) => {
            for address in &removed {
                state.metrics.remove_endpoint(address);
            }
            let current: Vec<String> = state
                .endpoints
                .snapshot()
                .into_iter()
                .map(|(address, _)| address)
                .collect();
            state.logger.log_endpoints_replaced(&current);
            state.publish_outstanding();
            if let Some(health) = &state.health {
                health.set_healthy(components::ENDPOINTS).await;
            }
            (
                StatusCode::OK,
                format!("Endpoints updated: {}", current.join(",")),
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "Rejected endpoint update");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

async fn forward(state: &RouterState, req: Request) -> Response {
    let (parts, body) = req.into_parts();

    let body = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "Failed to buffer request body");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let Some(guard) = state.endpoints.select() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "No endpoint available").into_response();
    };
    state.publish_outstanding();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = format!("http://{}{}", guard.address(), path_and_query);
    debug!(method = %parts.method, url = %url, "Forwarding request");

    let upstream = state
        .client
        .request(parts.method, &url)
        .headers(strip_hop_by_hop(&parts.headers))
        .body(body)
        .send()
        .await;

    let response = match upstream {
        Ok(upstream) => relay(upstream).await,
        Err(e) => {
            warn!(endpoint = %guard.address(), error = %e, "Upstream request failed");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    };

    drop(guard);
    state.publish_outstanding();
    response
}

async fn relay(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let headers = strip_hop_by_hop(upstream.headers());

    match upstream.bytes().await {
        Ok(bytes) => {
            let mut response = Response::new(Body::from(bytes));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            response
        }
        Err(e) => {
            warn!(error = %e, "Failed to read upstream body");
            (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
        }
    }
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let mut out = headers.clone();
    for name in HOP_BY_HOP {
        out.remove(*name);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;

    #[test]
    fn test_endpoints_param() {
        assert_eq!(
            endpoints_param(Some("endpoints=10.0.0.1,10.0.0.2%3A8080")),
            Some(vec!["10.0.0.1".to_string(), "10.0.0.2:8080".to_string()])
        );
        assert_eq!(endpoints_param(Some("endpoints=")), Some(vec![String::new()]));
        assert_eq!(endpoints_param(Some("loopCount=1&base=8")), None);
        assert_eq!(endpoints_param(None), None);
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, "lb:3000".parse().unwrap());
        headers.insert(header::CONTENT_LENGTH, "4".parse().unwrap());
        headers.insert(header::CONNECTION, "keep-alive".parse().unwrap());
        headers.insert("x-request-id", "abc".parse().unwrap());

        let stripped = strip_hop_by_hop(&headers);
        assert!(stripped.get(header::HOST).is_none());
        assert!(stripped.get(header::CONTENT_LENGTH).is_none());
        assert!(stripped.get(header::CONNECTION).is_none());
        assert_eq!(stripped.get("x-request-id").unwrap(), "abc");
    }
}
