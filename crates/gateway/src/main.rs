//! ScholarLink API Gateway
//!
//! Thin HTTP surface over the pipeline. Handles:
//! - Run triggers (ingestion, recommendations) answered with 202 + ticket
//! - On-demand paper indexing
//! - User interest changes
//! - Observability (logging, metrics, request ids)

mod handlers;
mod middleware;
mod telemetry;

use anyhow::Context;
use axum::{
    middleware::from_fn,
    middleware::from_fn_with_state,
    routing::{get, post, put},
    Router,
};
use middleware::rate_limit::{create_trigger_limiter, limit_triggers, TriggerLimiter};
use scholarlink_common::{config::AppConfig, db::DbPool};
use scholarlink_pipeline::{Collaborators, Pipeline};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<Pipeline>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // An explicit file replaces the layered config/ lookup
    let config = match std::env::var("APP_CONFIG_FILE") {
        Ok(path) => AppConfig::from_file(&path),
        Err(_) => AppConfig::load(),
    }
    .context("failed to load configuration")?;

    telemetry::init_tracing(&config.observability);
    info!(
        service = %config.observability.service_name,
        "Starting ScholarLink API Gateway v{}",
        scholarlink_common::VERSION
    );

    telemetry::init_metrics(&config.observability)?;

    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;

    let collaborators = Collaborators::from_config(&config)?;
    let pipeline = Arc::new(Pipeline::new(db, &config, collaborators));

    let config = Arc::new(config);
    let state = AppState {
        config: config.clone(),
        pipeline: pipeline.clone(),
    };

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server host/port")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    drain_pipeline(pipeline, &config).await;

    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let limiter: TriggerLimiter = create_trigger_limiter(state.config.server.trigger_rate_per_minute);

    // Everything here starts work in the pipeline
    let trigger_routes = Router::new()
        .route("/runs/ingestion", post(handlers::runs::trigger_ingestion))
        .route("/runs/recommendations", post(handlers::runs::trigger_recommendations))
        .route("/users/{id}/interest", put(handlers::users::update_interest))
        .route_layer(from_fn_with_state(limiter, limit_triggers));

    let api_routes = Router::new()
        // Health endpoints
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))

        // Paper index endpoints
        .route(
            "/papers/{id}/index",
            get(handlers::index::get_index_status).post(handlers::index::index_paper),
        )
        .merge(trigger_routes)
        .route_layer(from_fn(middleware::request_metrics::track_requests));

    Router::new()
        .nest("/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Wait for in-flight runs once the listener is closed
async fn drain_pipeline(pipeline: Arc<Pipeline>, config: &AppConfig) {
    let Ok(pipeline) = Arc::try_unwrap(pipeline) else {
        warn!("Pipeline still shared at shutdown, skipping run drain");
        return;
    };

    if tokio::time::timeout(config.shutdown_timeout(), pipeline.shutdown())
        .await
        .is_err()
    {
        warn!(
            timeout_secs = config.server.shutdown_timeout_secs,
            "Runs still in flight after shutdown timeout"
        );
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use scholarlink_common::db::models::RecommendationFrequency;
    use scholarlink_common::Repository;
    use serde_json::Value;
    use tower::ServiceExt;

    async fn app() -> (Router, DbPool) {
        let mut config = AppConfig::default();
        config.embedding.provider = "mock".to_string();
        config.embedding.dimension = 8;
        config.generation.provider = "mock".to_string();
        config.paper_source.base_url = "http://127.0.0.1:9/api/query".to_string();
        config.pipeline.item_delay_ms = 0;
        config.pipeline.generation_delay_ms = 0;
        config.server.trigger_rate_per_minute = 0;

        let db = DbPool::in_memory().await.unwrap();
        let collaborators = Collaborators::from_config(&config).unwrap();
        let pipeline = Pipeline::new(db.clone(), &config, collaborators);

        let state = AppState {
            config: Arc::new(config),
            pipeline: Arc::new(pipeline),
        };
        (create_router(state), db)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_and_ready() {
        let (app, _db) = app().await;

        let response = app
            .clone()
            .oneshot(Request::get("/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/v1/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ready");
    }

    #[tokio::test]
    async fn test_index_paper_round() {
        let (app, db) = app().await;
        let paper = Repository::new(db)
            .create_paper(scholarlink_common::db::NewPaper {
                title: "Sparse Attention".to_string(),
                author: "A. Author".to_string(),
                abstract_text: "We study sparse attention.".to_string(),
                pdf_url: None,
            })
            .await
            .unwrap();
        let uri = format!("/v1/papers/{}/index", paper.id);

        let response = app
            .clone()
            .oneshot(Request::get(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["indexed"], false);

        let response = app
            .clone()
            .oneshot(Request::post(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "indexed");
        assert_eq!(body["dimension"], 8);

        let response = app
            .oneshot(Request::post(uri.as_str()).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["status"], "already_indexed");
    }

    #[tokio::test]
    async fn test_index_missing_paper_is_not_found() {
        let (app, _db) = app().await;

        let response = app
            .oneshot(Request::post("/v1/papers/404/index").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["error"]["code"], "PAPER_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_run_trigger_is_accepted() {
        let (app, _db) = app().await;

        let response = tokio_test::assert_ok!(
            app.oneshot(Request::post("/v1/runs/recommendations").body(Body::empty()).unwrap())
                .await
        );
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let body = json_body(response).await;
        assert_eq!(body["status"], "accepted");
        assert_eq!(body["kind"], "recommendations");
        assert!(body["run_id"].is_string());
    }

    #[tokio::test]
    async fn test_update_interest() {
        let (app, db) = app().await;
        let user = Repository::new(db)
            .create_user("grace", "compilers", RecommendationFrequency::Daily)
            .await
            .unwrap();

        let request = |id: i32, interest: &str| {
            Request::put(format!("/v1/users/{}/interest", id))
                .header("content-type", "application/json")
                .body(Body::from(serde_json::json!({ "interest": interest }).to_string()))
                .unwrap()
        };

        let response = app.clone().oneshot(request(user.id, "type systems")).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(json_body(response).await["kind"], "refresh_interest");

        let response = app.clone().oneshot(request(user.id, "   ")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app.oneshot(request(9999, "anything")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
