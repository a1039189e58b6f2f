//! HTTP middleware for the gateway server.

use axum::{
    extract::Request,
    http::{HeaderValue, StatusCode},
    response::Response,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tower::{Layer, Service};
use tracing::{debug, warn};
use uuid::Uuid;

/// Stamps every request and response with an `x-request-id` header.
#[derive(Clone)]
pub struct RequestIdLayer;

impl RequestIdLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdMiddleware { inner }
    }
}

#[derive(Clone)]
pub struct RequestIdMiddleware<S> {
    inner: S,
}

impl<S> Service<Request> for RequestIdMiddleware<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request) -> Self::Future {
        let request_id = Uuid::new_v4().to_string();

        if let Ok(header_value) = HeaderValue::from_str(&request_id) {
            request.headers_mut().insert("x-request-id", header_value);
        } else {
            warn!("failed to create header value for request ID: {}", request_id);
        }

        let future = self.inner.call(request);
        let request_id_clone = request_id.clone();

        Box::pin(async move {
            let mut response = future.await?;

            if let Ok(header_value) = HeaderValue::from_str(&request_id_clone) {
                response.headers_mut().insert("x-request-id", header_value);
            } else {
                warn!("failed to create response header value for request ID: {}", request_id_clone);
            }

            Ok(response)
        })
    }
}

#[derive(Debug, Clone)]
struct ClientRateLimit {
    requests: Vec<u64>,
    blocked_until: Option<u64>,
}

impl ClientRateLimit {
    fn new() -> Self {
        Self {
            requests: Vec::new(),
            blocked_until: None,
        }
    }

    fn is_blocked(&self) -> bool {
        match self.blocked_until {
            Some(blocked_until) => blocked_until > now_secs(),
            None => false,
        }
    }

    fn add_request(&mut self, timestamp: u64) {
        self.requests.push(timestamp);
    }

    fn cleanup_old_requests(&mut self, window_seconds: u64) {
        let cutoff = now_secs().saturating_sub(window_seconds);
        self.requests.retain(|&ts| ts > cutoff);
    }

    fn block_client(&mut self, block_duration_seconds: u64) {
        self.blocked_until = Some(now_secs() + block_duration_seconds);
    }
}

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// Sliding-window rate limiter keyed by bearer token, then forwarded-for,
/// then real-ip, then connection address.
#[derive(Clone)]
pub struct RateLimitLayer {
    requests_per_window: u32,
    window_seconds: u64,
    clients: Arc<RwLock<HashMap<String, ClientRateLimit>>>,
}

impl RateLimitLayer {
    pub fn new(requests_per_window: u32, window_seconds: u64) -> Self {
        let clients = Arc::new(RwLock::new(HashMap::new()));

        let clients_cleanup = clients.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                let mut clients = clients_cleanup.write().await;
                let now = now_secs();
                clients.retain(|_, client| {
                    let Some(&last_request) = client.requests.iter().max() else {
                        return false;
                    };
                    now - last_request < 3600
                });
                debug!("rate limiter cleanup: {} active clients", clients.len());
            }
        });

        Self {
            requests_per_window,
            window_seconds,
            clients,
        }
    }

    async fn check_rate_limit(&self, client_id: &str) -> bool {
        let mut clients = self.clients.write().await;
        let client = clients.entry(client_id.to_string()).or_insert_with(ClientRateLimit::new);

        if client.is_blocked() {
            return false;
        }

        client.cleanup_old_requests(self.window_seconds);

        if client.requests.len() >= self.requests_per_window as usize {
            client.block_client(self.window_seconds * 2);
            warn!("rate limit exceeded for client {}, blocking for {}s", client_id, self.window_seconds * 2);
            return false;
        }

        client.add_request(now_secs());
        true
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitMiddleware {
            inner,
            layer: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitMiddleware<S> {
    inner: S,
    layer: RateLimitLayer,
}

impl<S> Service<Request> for RateLimitMiddleware<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request) -> Self::Future {
        let client_id = extract_client_id(&request);
        let layer = self.layer.clone();
        let future = self.inner.call(request);

        Box::pin(async move {
            if !layer.check_rate_limit(&client_id).await {
                let mut response = Response::new(axum::body::Body::from("rate limit exceeded"));
                *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
                response
                    .headers_mut()
                    .insert("Retry-After", HeaderValue::from_str(&layer.window_seconds.to_string()).unwrap_or_default());
                return Ok(response);
            }

            future.await
        })
    }
}

fn extract_client_id(request: &Request) -> String {
    if let Some(auth_header) = request.headers().get("authorization") {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return token.to_string();
            }
        }
    }

    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(ip) = forwarded_str.split(',').next() {
                return ip.trim().to_string();
            }
        }
    }

    if let Some(real_ip) = request.headers().get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    if let Some(connect_info) = request.extensions().get::<axum::extract::ConnectInfo<std::net::SocketAddr>>() {
        return connect_info.0.ip().to_string();
    }

    "unknown".to_string()
}
