// Warm-instance HTTP host
//
// Keeps one supervisor alive across requests so only the first invocation
// pays for the engine's cold start.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{extract::State, routing::get, routing::post, Json, Router};
use coldstart_core::{InvocationResponse, ServiceState};
use coldstart_supervisor::Supervisor;
use serde::Serialize;
use tower_http::trace::TraceLayer;

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Supervisor,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    engine: ServiceState,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        engine: state.supervisor.state(),
    })
}

async fn invoke(State(state): State<AppState>, body: String) -> Json<InvocationResponse> {
    let event = super::event_from_text(&body);
    Json(state.supervisor.invoke(event).await)
}

pub fn build_router(supervisor: Supervisor) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/invoke", post(invoke))
        .with_state(AppState { supervisor })
        .layer(TraceLayer::new_for_http())
}

pub async fn run(supervisor: Supervisor, listen: SocketAddr, eager: bool) -> Result<()> {
    if eager {
        let warm = supervisor.clone();
        tokio::spawn(async move {
            if let Err(e) = warm.ensure_ready().await {
                tracing::warn!(error = %e, "Eager engine start failed; the next invocation will retry");
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", listen);

    axum::serve(listener, build_router(supervisor.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    supervisor.shutdown().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received shutdown signal"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use coldstart_core::SupervisorConfig;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    /// Supervisor whose workflow artifact is missing, so bring-up fails fast
    fn failing_supervisor(dir: &std::path::Path) -> Supervisor {
        let mut config = SupervisorConfig::default();
        config.engine.data_dir = dir.join("engine");
        config.workflow_path = dir.join("missing.json");
        Supervisor::new(config).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_engine_state() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(failing_supervisor(dir.path()));

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["engine"], "not_started");
    }

    #[tokio::test]
    async fn test_invoke_failure_is_wrapped_response() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = failing_supervisor(dir.path());
        let app = build_router(supervisor.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/invoke")
                    .body(Body::from("plain text, not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let envelope = body_json(response).await;
        assert_eq!(envelope["statusCode"], 200);
        let inner: serde_json::Value =
            serde_json::from_str(envelope["body"].as_str().unwrap()).unwrap();
        assert_eq!(inner["success"], false);
        assert_eq!(inner["error_type"], "workflow_error");
        assert_eq!(supervisor.state(), ServiceState::Failed);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let app = build_router(failing_supervisor(dir.path()));

        let response = app
            .oneshot(Request::builder().uri("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 404);
    }
}
