use crate::config::Config;
use crate::inventory::{self, Inventory};
use anyhow::{Context, Result};
use axum::{
    http::StatusCode, middleware, response::IntoResponse, routing::get, Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;

pub mod auth;
pub mod routes_playback;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub inventory: Arc<dyn Inventory>,
}

impl AppContext {
    /// Context with the inventory selected by the configuration.
    pub fn new(config: Config) -> Self {
        let config = Arc::new(config);
        let inventory = inventory::from_config(config.clone());
        Self { config, inventory }
    }

    pub fn with_inventory(config: Config, inventory: Arc<dyn Inventory>) -> Self {
        Self {
            config: Arc::new(config),
            inventory,
        }
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let playback = routes_playback::playback_routes();

    // Apply auth middleware to playback routes only if enabled
    let playback = if ctx.config.server.auth.enabled {
        playback.layer(middleware::from_fn_with_state(
            ctx.clone(),
            auth::playback_auth_middleware,
        ))
    } else {
        playback
    };

    Router::new()
        .route("/health", get(health_check))
        .merge(playback)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Start the HTTP server
pub async fn start_server(config: Config) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    serve(listener, AppContext::new(config)).await
}

/// Serve on an already bound listener until a shutdown signal arrives.
pub async fn serve(listener: TcpListener, ctx: AppContext) -> Result<()> {
    let app = create_router(ctx);

    tracing::info!("Starting server on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_health() {
        let app = create_router(AppContext::new(Config::default()));
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_auth_gates_playback_only() {
        let mut config = Config::default();
        config.server.auth.enabled = true;
        config.server.auth.api_key = Some("k".to_string());
        let app = create_router(AppContext::new(config));

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/get?path=cam1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/get?path=cam1")
                    .header("authorization", "Bearer k")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        // Authenticated, then rejected for the missing start.
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rejection_body_is_json() {
        let app = create_router(AppContext::new(Config::default()));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/get?path=cam1&start=2024-08-08T17:00:00Z&duration=10&format=avi")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["code"], "invalid_format");
        assert_eq!(json["error"], "invalid format: avi");
    }
}
