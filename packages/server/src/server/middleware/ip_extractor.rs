use axum::{
    extract::{ConnectInfo, Request},
    middleware::Next,
    response::Response,
};
use std::net::{IpAddr, SocketAddr};

/// Extension key for storing extracted IP address
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientIp(pub IpAddr);

impl std::fmt::Display for ClientIp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Middleware to extract client IP address from request
///
/// Priority:
/// 1. X-Forwarded-For header (for requests through proxies)
/// 2. X-Real-IP header (for Nginx)
/// 3. ConnectInfo socket address (direct connection), when the server was
///    started with connect info
pub async fn extract_client_ip(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut request: Request,
    next: Next,
) -> Response {
    // Try X-Forwarded-For header first (comma-separated list, take first)
    let ip = if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        forwarded
            .to_str()
            .ok()
            .and_then(|s| s.split(',').next())
            .and_then(|s| s.trim().parse::<IpAddr>().ok())
    } else if let Some(real_ip) = request.headers().get("x-real-ip") {
        // Try X-Real-IP header
        real_ip.to_str().ok().and_then(|s| s.parse::<IpAddr>().ok())
    } else {
        // Fall back to socket address
        connect_info.map(|ConnectInfo(addr)| addr.ip())
    };

    // Store in request extensions
    if let Some(ip) = ip {
        request.extensions_mut().insert(ClientIp(ip));
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, extract::Extension, http::Request as HttpRequest, middleware, routing::get, Router};
    use tower::ServiceExt;

    async fn echo(ip: Option<Extension<ClientIp>>) -> String {
        ip.map(|Extension(ip)| ip.to_string()).unwrap_or_default()
    }

    async fn client_ip(headers: &[(&str, &str)]) -> String {
        let app = Router::new()
            .route("/", get(echo))
            .layer(middleware::from_fn(extract_client_ip));

        let mut request = HttpRequest::builder().uri("/");
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = app.oneshot(request.body(Body::empty()).unwrap()).await.unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_forwarded_for_wins() {
        let ip = client_ip(&[
            ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ])
        .await;
        assert_eq!(ip, "203.0.113.7");
    }

    #[tokio::test]
    async fn test_real_ip_fallback() {
        assert_eq!(client_ip(&[("x-real-ip", "198.51.100.2")]).await, "198.51.100.2");
    }

    #[tokio::test]
    async fn test_no_source_leaves_ip_unset() {
        assert_eq!(client_ip(&[]).await, "");
    }
}
