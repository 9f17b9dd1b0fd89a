// crates/server/src/lib.rs
//! Async report server library.
//!
//! The Job Manager HTTP facade over an `async_report_jobs::Registry`: clients
//! submit report jobs, poll their state, cancel them, and collect the
//! rendered output once it is ready.

pub mod config;
pub mod disposition;
pub mod error;
pub mod metrics;
pub mod render;
pub mod routes;
pub mod session;
pub mod state;

pub use config::{ManagerConfig, ServerConfig};
pub use error::*;
pub use metrics::init_metrics;
pub use render::SampleRenderer;
pub use routes::api_routes;
pub use session::{CallerSession, HeaderSessionResolver, SessionResolver};
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, jobs) and `/metrics`
/// - CORS (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_report_jobs::testing::ScriptedRenderer;
    use async_report_jobs::{Registry, RegistryConfig};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    fn test_app() -> Router {
        let registry = Registry::new(
            Arc::new(ScriptedRenderer::new("text/csv", vec![])),
            RegistryConfig::default(),
        );
        create_app(AppState::new(Arc::new(registry), ManagerConfig::default()))
    }

    /// Helper to make a GET request to the app.
    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body_str = String::from_utf8(body.to_vec()).unwrap();

        (status, body_str)
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, body) = get(test_app(), "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert!(json["version"].is_string());
        assert!(json["uptime_secs"].is_number());
        assert_eq!(json["jobs"], 0);
    }

    #[tokio::test]
    async fn test_unknown_route_returns_404() {
        let (status, _) = get(test_app(), "/api/nonexistent").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cors_headers_present() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .header("Origin", "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response
            .headers()
            .contains_key("access-control-allow-origin"));
    }
}
