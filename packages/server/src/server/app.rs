//! Application setup and server configuration.

use axum::{
    extract::Extension,
    http::{
        header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH, LAST_MODIFIED},
        Method,
    },
    middleware,
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::context::AppContext;
use crate::server::middleware::extract_client_ip;
use crate::server::routes::{
    get_progress_handler, health_handler, list_progress_handler, list_sessions_handler,
    register_session_handler, session_info_handler, session_stream_handler, start_crawl_handler,
    unregister_session_handler, update_session_handler, validate_session_handler, X_POLL_INTERVAL,
};

/// Build the Axum application router
pub fn build_app(ctx: AppContext) -> Router {
    // Pollers read the caching headers cross-origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([CONTENT_TYPE, IF_NONE_MATCH])
        .expose_headers([ETAG, LAST_MODIFIED, X_POLL_INTERVAL]);

    Router::new()
        .route("/health", get(health_handler))
        // Crawl intake and progress
        .route("/api/crawl", post(start_crawl_handler))
        .route("/api/progress", get(list_progress_handler))
        .route("/api/progress/:progress_id", get(get_progress_handler))
        // Sessions
        .route(
            "/api/sessions",
            get(list_sessions_handler).post(register_session_handler),
        )
        .route("/api/sessions/info", get(session_info_handler))
        .route("/api/sessions/stream", get(session_stream_handler))
        .route(
            "/api/sessions/:session_id",
            patch(update_session_handler).delete(unregister_session_handler),
        )
        .route(
            "/api/sessions/:session_id/validate",
            post(validate_session_handler),
        )
        // Middleware layers (applied in reverse order - last added runs first)
        .layer(middleware::from_fn(extract_client_ip))
        .layer(Extension(ctx))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use crawler::CrawlSnapshot;
    use serde_json::{json, Value};
    use sqlx::postgres::PgPoolOptions;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use uuid::Uuid;

    use crate::kernel::jobs::testing::MemoryJobStore;
    use crate::kernel::jobs::{JobStatus, JobStore};
    use crate::kernel::sessions::{FileSessionStore, SessionManager, DEFAULT_SESSION_TIMEOUT};

    struct TestApp {
        app: Router,
        ctx: AppContext,
        jobs: Arc<MemoryJobStore>,
        _dir: TempDir,
    }

    impl TestApp {
        fn new() -> Self {
            let pool = PgPoolOptions::new()
                .connect_lazy("postgres://postgres@localhost/unused")
                .unwrap();
            let dir = tempfile::tempdir().unwrap();
            let sessions = SessionManager::new(
                Arc::new(FileSessionStore::new(dir.path().join("sessions.json"))),
                DEFAULT_SESSION_TIMEOUT,
            )
            .unwrap();
            let jobs = Arc::new(MemoryJobStore::new());
            let ctx = AppContext::new(pool, jobs.clone(), sessions);

            Self {
                app: build_app(ctx.clone()),
                ctx,
                jobs,
                _dir: dir,
            }
        }

        async fn send(&self, request: Request<Body>) -> Response {
            self.app.clone().oneshot(request).await.unwrap()
        }

        async fn get(&self, uri: &str) -> Response {
            self.send(Request::get(uri).body(Body::empty()).unwrap()).await
        }

        async fn json(&self, method: &str, uri: &str, body: Value) -> Response {
            self.send(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header(CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
        }

        async fn enqueue(&self, url: &str) -> String {
            let response = self.json("POST", "/api/crawl", json!({ "url": url })).await;
            assert_eq!(response.status(), StatusCode::ACCEPTED);
            body_json(response).await["progressId"]
                .as_str()
                .unwrap()
                .to_string()
        }
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn header<'a>(response: &'a Response, name: &str) -> &'a str {
        response.headers().get(name).unwrap().to_str().unwrap()
    }

    // ========================================================================
    // Crawl intake
    // ========================================================================

    #[tokio::test]
    async fn test_start_crawl_queues_job() {
        let t = TestApp::new();
        let response = t
            .json(
                "POST",
                "/api/crawl",
                json!({ "url": "https://docs.example.com", "max_depth": 3, "priority": 5 }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = body_json(response).await;
        assert_eq!(body["status"], "pending");
        let id: Uuid = body["progressId"].as_str().unwrap().parse().unwrap();

        let job = t.jobs.get(id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.priority, 5);
        assert_eq!(job.request().unwrap().max_depth, 3);
    }

    #[tokio::test]
    async fn test_start_crawl_rejects_bad_request() {
        let t = TestApp::new();
        let response = t
            .json("POST", "/api/crawl", json!({ "url": "https://a.example", "max_depth": 0 }))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["status"], "invalid");

        let response = t
            .json("POST", "/api/crawl", json!({ "url": "https://a.example", "depth": 2 }))
            .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(t.jobs.count(JobStatus::Pending), 0);
    }

    // ========================================================================
    // Progress
    // ========================================================================

    #[tokio::test]
    async fn test_progress_headers_and_body() {
        let t = TestApp::new();
        let id = t.enqueue("https://a.example").await;

        let response = t.get(&format!("/api/progress/{}", id)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(header(&response, "etag").starts_with('"'));
        assert_eq!(header(&response, "x-poll-interval"), "1000");
        assert_eq!(header(&response, "cache-control"), "no-cache, must-revalidate");
        assert!(header(&response, "last-modified").ends_with("GMT"));

        let body = body_json(response).await;
        assert_eq!(body["progressId"], id);
        assert_eq!(body["type"], "crawl");
        assert_eq!(body["status"], "pending");
        assert_eq!(body["log"], "Waiting for worker...");
        assert!(body.get("timestamp").is_some());
    }

    #[tokio::test]
    async fn test_matching_etag_not_modified() {
        let t = TestApp::new();
        let id = t.enqueue("https://a.example").await;
        let uri = format!("/api/progress/{}", id);

        let first = t.get(&uri).await;
        let etag = header(&first, "etag").to_string();

        let response = t
            .send(
                Request::get(&uri)
                    .header("if-none-match", &etag)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(header(&response, "etag"), etag);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_completion_changes_etag_and_stops_polling() {
        let t = TestApp::new();
        let id = t.enqueue("https://a.example").await;
        let uri = format!("/api/progress/{}", id);
        let before = header(&t.get(&uri).await, "etag").to_string();

        let job_id: Uuid = id.parse().unwrap();
        t.jobs.try_claim(job_id, "worker-1").await.unwrap();
        t.jobs.complete(job_id).await.unwrap();

        let response = t
            .send(
                Request::get(&uri)
                    .header("if-none-match", &before)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_ne!(header(&response, "etag"), before);
        assert_eq!(header(&response, "x-poll-interval"), "0");

        let body = body_json(response).await;
        assert_eq!(body["status"], "completed");
        assert_eq!(body["progress"], 100);
    }

    #[tokio::test]
    async fn test_crawl_state_change_invalidates_etag() {
        let t = TestApp::new();
        let id = t.enqueue("https://a.example").await;
        let uri = format!("/api/progress/{}", id);
        let job_id: Uuid = id.parse().unwrap();
        let pages = |prefix: &str, n: usize| -> Vec<String> {
            (0..n).map(|i| format!("https://a.example/{prefix}{i}")).collect()
        };
        let conditional = |etag: &str| {
            Request::get(&uri)
                .header("if-none-match", etag)
                .body(Body::empty())
                .unwrap()
        };

        t.jobs.try_claim(job_id, "worker-1").await.unwrap();
        t.jobs
            .save_state(job_id, &CrawlSnapshot::new(pages("v", 1), pages("f", 3)))
            .await
            .unwrap();
        let first = t.get(&uri).await;
        let old_etag = header(&first, "etag").to_string();
        assert_eq!(body_json(first).await["progress"], 25);

        t.jobs
            .save_state(job_id, &CrawlSnapshot::new(pages("v", 3), pages("f", 1)))
            .await
            .unwrap();

        let response = t.send(conditional(&old_etag)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let new_etag = header(&response, "etag").to_string();
        assert_ne!(new_etag, old_etag);
        let body = body_json(response).await;
        assert_eq!(body["progress"], 75);
        assert_eq!(body["log"], "Processed 3/4 pages...");

        let response = t.send(conditional(&new_etag)).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(header(&response, "etag"), new_etag);
    }

    #[tokio::test]
    async fn test_unknown_progress_not_found() {
        let t = TestApp::new();
        let response = t.get(&format!("/api/progress/{}", Uuid::new_v4())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = body_json(response).await;
        assert_eq!(body["status"], "not_found");
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_progress_store_outage_is_500() {
        let t = TestApp::new();
        t.jobs.set_unavailable(true);

        let response = t.get(&format!("/api/progress/{}", Uuid::new_v4())).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await["status"], "failed");
    }

    #[tokio::test]
    async fn test_list_progress() {
        let t = TestApp::new();
        t.enqueue("https://a.example").await;
        t.enqueue("https://b.example").await;

        let body = body_json(t.get("/api/progress").await).await;
        assert_eq!(body["count"], 2);
        assert_eq!(body["operations"].as_array().unwrap().len(), 2);
        assert_eq!(body["operations"][0]["operation_type"], "crawl");
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    #[tokio::test]
    async fn test_session_lifecycle() {
        let t = TestApp::new();
        let response = t
            .send(
                Request::post("/api/sessions")
                    .header("x-forwarded-for", "203.0.113.9")
                    .header("user-agent", "curl/8.5.0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let id = body_json(response).await["session_id"]
            .as_str()
            .unwrap()
            .to_string();

        let listing = body_json(t.get("/api/sessions").await).await;
        assert_eq!(listing["success"], true);
        assert_eq!(listing["count"], 1);
        assert_eq!(listing["sessions"][0]["client_ip"], "203.0.113.9");
        assert_eq!(listing["sessions"][0]["user_agent"], "curl/8.5.0");
        assert_eq!(listing["sessions"][0]["transport"], "interactive");
        assert!(listing["sessions"][0].get("uptime_seconds").is_some());

        let response = t
            .json(
                "PATCH",
                &format!("/api/sessions/{}", id),
                json!({ "client_name": "cli", "client_version": "0.3.1" }),
            )
            .await;
        assert_eq!(body_json(response).await["updated"], true);

        let response = t
            .send(
                Request::post(format!("/api/sessions/{}/validate", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(body_json(response).await["valid"], true);

        let info = body_json(t.get("/api/sessions/info").await).await;
        assert_eq!(info["active_sessions"], 1);
        assert_eq!(info["session_timeout"], 3600);

        let delete = || {
            Request::delete(format!("/api/sessions/{}", id))
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(t.send(delete()).await.status(), StatusCode::OK);
        assert_eq!(t.send(delete()).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_register_streaming_transport_alias() {
        let t = TestApp::new();
        let response = t.json("POST", "/api/sessions", json!({ "transport": "sse" })).await;
        assert_eq!(body_json(response).await["transport"], "streaming");
    }

    #[tokio::test]
    async fn test_stream_session_lives_with_connection() {
        let t = TestApp::new();
        let response = t.get("/api/sessions/stream").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "content-type"), "text/event-stream");

        let sessions = t.ctx.sessions.list_all().await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].transport, crate::kernel::sessions::Transport::Streaming);

        drop(response);
        for _ in 0..50 {
            if t.ctx.sessions.active_count().await.unwrap() == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("stream session was not unregistered");
    }
}
