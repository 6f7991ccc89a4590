//! HTTP surface of the gateway.
//!
//! Object routes run behind the interceptor pipeline (admission, then rate
//! limiting). Health, the cleanup trigger and the debug listing bypass it.

mod handlers;
mod pipeline;
mod server;
mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;

pub use handlers::{UploadResponse, OBJECT_TTL_HEADER};
pub use pipeline::{
    AdmissionInterceptor, Interceptor, Pipeline, RateLimitInterceptor, RequestContext, Verdict,
};
pub use server::HttpServer;
pub use state::AppState;

/// Build the application router.
pub fn router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    let object_routes = Router::new()
        .route(
            "/",
            get(handlers::get_object).post(handlers::put_object),
        )
        .route(
            "/{*key}",
            get(handlers::get_object).post(handlers::put_object),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            pipeline::run_pipeline,
        ));

    let mut app = Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/_scheduled/cleanup", post(handlers::scheduled_cleanup));

    if server.debug_routes {
        app = app.route("/debug/list", get(handlers::debug_list));
    }

    app.merge(object_routes)
        .layer(DefaultBodyLimit::max(server.max_upload_bytes))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(server.request_timeout_secs),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::janitor::Janitor;
    use crate::objects::{
        ExpiryIndex, MemoryExpiryIndex, MemoryObjectStore, ObjectStore, ObjectStoreError,
    };
    use crate::ratelimit::{Fingerprint, RateLimiter, Tier, WindowSpec};
    use crate::store::MemoryCounterStore;
    use axum::body::Body;
    use axum::http::{header, Request};
    use axum::response::Response;
    use bytes::Bytes;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const BROWSER: &str = "Mozilla/5.0 (X11; Linux x86_64)";
    const CLIENT_IP: &str = "198.51.100.7";

    struct Harness {
        app: Router,
        objects: Arc<MemoryObjectStore>,
        expiries: Arc<MemoryExpiryIndex>,
        counters: Arc<MemoryCounterStore>,
    }

    struct BrokenExpiries;

    #[async_trait::async_trait]
    impl ExpiryIndex for BrokenExpiries {
        async fn expiry_for(
            &self,
            _key: &str,
        ) -> std::result::Result<Option<chrono::DateTime<chrono::Utc>>, ObjectStoreError> {
            Err(ObjectStoreError::Io("metadata table offline".into()))
        }

        async fn set_expiry(
            &self,
            _key: &str,
            _expires_at: chrono::DateTime<chrono::Utc>,
        ) -> std::result::Result<(), ObjectStoreError> {
            Err(ObjectStoreError::Io("metadata table offline".into()))
        }

        async fn remove(&self, _keys: &[String]) -> std::result::Result<(), ObjectStoreError> {
            Err(ObjectStoreError::Io("metadata table offline".into()))
        }
    }

    fn build_app(
        config: &GatewayConfig,
        objects: Arc<MemoryObjectStore>,
        expiries: Arc<dyn ExpiryIndex>,
        counters: Arc<MemoryCounterStore>,
    ) -> Router {
        let limiter = Arc::new(RateLimiter::new(counters.clone(), &config.rate_limiting));
        let janitor = Arc::new(Janitor::new(
            objects.clone(),
            expiries.clone(),
            counters,
            &config.janitor,
        ));
        let state = Arc::new(AppState::new(config, limiter, objects, expiries, janitor));
        router(state, &config.server)
    }

    fn harness(config: GatewayConfig) -> Harness {
        let objects = Arc::new(MemoryObjectStore::new());
        let expiries = Arc::new(MemoryExpiryIndex::new());
        let counters = Arc::new(MemoryCounterStore::new());

        Harness {
            app: build_app(&config, objects.clone(), expiries.clone(), counters.clone()),
            objects,
            expiries,
            counters,
        }
    }

    fn sustained_key() -> String {
        WindowSpec::new(Tier::Sustained, 100, std::time::Duration::from_secs(65))
            .key(&Fingerprint::new(CLIENT_IP, BROWSER))
    }

    fn request(method: &str, uri: &str) -> axum::http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::USER_AGENT, BROWSER)
            .header("cf-connecting-ip", CLIENT_IP)
    }

    async fn send(app: &Router, request: Request<Body>) -> Response {
        app.clone().oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_bypasses_pipeline() {
        let h = harness(GatewayConfig::default());
        let response = send(
            &h.app,
            Request::builder()
                .uri("/health")
                .header(header::USER_AGENT, "curl/8.4.0")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("ratelimit-limit").is_none());
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert!(body["timestamp"].is_string());
        assert!(h.counters.is_empty());
    }

    #[tokio::test]
    async fn test_upload_then_fetch() {
        let h = harness(GatewayConfig::default());

        let response = send(
            &h.app,
            request("POST", "/a.png")
                .body(Body::from(&b"\x89PNG\r\n"[..]))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["key"], "a.png");
        assert_eq!(body["contentType"], "image/png");

        let response = send(&h.app, request("GET", "/a.png").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "image/png");
        assert_eq!(headers[header::CONTENT_LENGTH], "6");
        assert_eq!(headers[header::CACHE_CONTROL], "public, max-age=86400");
        assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert!(headers.contains_key(header::ETAG));
        assert!(headers.contains_key(header::LAST_MODIFIED));
        assert_eq!(headers["ratelimit-limit"], "100");
        assert_eq!(headers["ratelimit-remaining"], "98");

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes, Bytes::from_static(b"\x89PNG\r\n"));
    }

    #[tokio::test]
    async fn test_percent_encoded_key_with_route_prefix() {
        let mut config = GatewayConfig::default();
        config.storage.route_prefix = "images/".to_string();
        let h = harness(config);

        h.objects
            .put("my photo.jpg", Bytes::from_static(b"jpeg"), "image/jpeg")
            .await
            .unwrap();

        let response = send(
            &h.app,
            request("GET", "/images/my%20photo.jpg")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");

        let response = send(&h.app, request("GET", "/images/").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_key_and_missing_object() {
        let h = harness(GatewayConfig::default());

        let response = send(&h.app, request("GET", "/").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());

        let response = send(&h.app, request("GET", "/nope.png").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"], "Object not found");
    }

    #[tokio::test]
    async fn test_automated_client_forbidden_without_charge() {
        let h = harness(GatewayConfig::default());

        let response = send(
            &h.app,
            Request::builder()
                .uri("/a.png")
                .header(header::USER_AGENT, "python-requests/2.31")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["error"], "Forbidden");
        assert!(h.counters.is_empty());
    }

    #[tokio::test]
    async fn test_burst_limit_returns_429_with_headers() {
        let mut config = GatewayConfig::default();
        config.rate_limiting.burst_limit = 2;
        let h = harness(config);

        for _ in 0..2 {
            let response =
                send(&h.app, request("GET", "/missing.png").body(Body::empty()).unwrap()).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
        }

        let response =
            send(&h.app, request("GET", "/missing.png").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let headers = response.headers();
        assert_eq!(headers["ratelimit-limit"], "2");
        assert_eq!(headers["ratelimit-remaining"], "0");
        assert!(headers.contains_key(header::RETRY_AFTER));
    }

    #[tokio::test]
    async fn test_empty_upload_is_refunded() {
        let h = harness(GatewayConfig::default());

        let response = send(&h.app, request("POST", "/a.png").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let state = h.counters.get(&sustained_key()).unwrap();
        assert_eq!(state.count, 0);
        assert!(h.objects.is_empty());
    }

    #[tokio::test]
    async fn test_upload_ttl_recorded() {
        let h = harness(GatewayConfig::default());

        let response = send(
            &h.app,
            request("POST", "/keep.webp")
                .header(OBJECT_TTL_HEADER, "7200")
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .body(Body::from("RIFF"))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["contentType"], "image/webp");

        let expiry = h.expiries.expiry_for("keep.webp").await.unwrap().unwrap();
        assert!(expiry > chrono::Utc::now() + chrono::Duration::minutes(119));
    }

    #[tokio::test]
    async fn test_out_of_range_ttl_is_rejected_and_refunded() {
        let h = harness(GatewayConfig::default());

        let response = send(
            &h.app,
            request("POST", "/big.png")
                .header(OBJECT_TTL_HEADER, "99999999999999")
                .body(Body::from("png"))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["error"].is_string());

        assert!(h.objects.is_empty());
        assert!(h.expiries.expiry_for("big.png").await.unwrap().is_none());
        assert_eq!(h.counters.get(&sustained_key()).unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_failed_expiry_write_stores_nothing() {
        let config = GatewayConfig::default();
        let objects = Arc::new(MemoryObjectStore::new());
        let app = build_app(
            &config,
            objects.clone(),
            Arc::new(BrokenExpiries),
            Arc::new(MemoryCounterStore::new()),
        );

        let response = send(
            &app,
            request("POST", "/keep.png")
                .header(OBJECT_TTL_HEADER, "3600")
                .body(Body::from("png"))
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["error"], "Internal server error");
        assert!(objects.is_empty());

        // uploads without a TTL never touch the expiry table
        let response = send(
            &app,
            request("POST", "/plain.png").body(Body::from("png")).unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(objects.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_refused_without_configured_token() {
        let h = harness(GatewayConfig::default());
        h.objects.put_at(
            "stale.png",
            Bytes::from_static(b"x"),
            "image/png",
            chrono::Utc::now() - chrono::Duration::minutes(40),
        );

        for authorization in [None, Some("Bearer "), Some("Bearer anything")] {
            let mut builder = Request::builder()
                .method("POST")
                .uri("/_scheduled/cleanup")
                .header(header::USER_AGENT, "python-requests/2.31");
            if let Some(value) = authorization {
                builder = builder.header(header::AUTHORIZATION, value);
            }

            let response = send(&h.app, builder.body(Body::empty()).unwrap()).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        assert_eq!(h.objects.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_requires_token() {
        let mut config = GatewayConfig::default();
        config.janitor.trigger_token = Some("s3cret".to_string());
        let h = harness(config);

        let response = send(
            &h.app,
            Request::builder()
                .method("POST")
                .uri("/_scheduled/cleanup")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = send(
            &h.app,
            Request::builder()
                .method("POST")
                .uri("/_scheduled/cleanup")
                .header(header::AUTHORIZATION, "Bearer s3cret")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["objects"]["status"], "ok");
        assert_eq!(body["counters"]["status"], "ok");
    }

    #[tokio::test]
    async fn test_debug_listing_only_when_enabled() {
        let h = harness(GatewayConfig::default());
        let response = send(&h.app, request("GET", "/debug/list").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let mut config = GatewayConfig::default();
        config.server.debug_routes = true;
        let h = harness(config);
        for key in ["img/1.png", "img/2.png", "doc.txt"] {
            h.objects
                .put(key, Bytes::from_static(b"x"), "image/png")
                .await
                .unwrap();
        }

        let response = send(
            &h.app,
            request("GET", "/debug/list?prefix=img/")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["truncated"], false);
        assert_eq!(body["objects"][0]["key"], "img/1.png");
    }
}
