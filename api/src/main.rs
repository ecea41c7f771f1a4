use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use signstream_common::config::Config;
use signstream_common::record::PredictionRecord;
use signstream_pipeline::{camera, HttpPredictor, Pipeline, PipelineError};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

struct AppState {
    pipeline: Pipeline,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct Predictions {
    latest: Option<PredictionRecord>,
    history: Vec<PredictionRecord>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorBody { error: message })).into_response()
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /status
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.pipeline.status())
}

/// POST /session/start — 409 if a session is running, 503 if the camera
/// cannot be opened
async fn start_session(State(state): State<Arc<AppState>>) -> Response {
    match state.pipeline.start().await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e @ PipelineError::AlreadyCapturing) => {
            error_response(StatusCode::CONFLICT, e.to_string())
        }
        Err(e @ PipelineError::CameraUnavailable(_)) => {
            warn!(error = %e, "session start refused");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e) => {
            error!(error = %e, "session start failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// POST /session/stop — idempotent
async fn stop_session(State(state): State<Arc<AppState>>) -> StatusCode {
    state.pipeline.stop();
    StatusCode::NO_CONTENT
}

/// GET /predictions
async fn list_predictions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(Predictions {
        latest: state.pipeline.latest(),
        history: state.pipeline.history(),
    })
}

/// DELETE /predictions
async fn clear_predictions(State(state): State<Arc<AppState>>) -> StatusCode {
    state.pipeline.clear_history();
    StatusCode::NO_CONTENT
}

fn router(pipeline: Pipeline) -> Router {
    let state = Arc::new(AppState { pipeline });
    Router::new()
        .route("/status", get(status))
        .route("/session/start", post(start_session))
        .route("/session/stop", post(stop_session))
        .route(
            "/predictions",
            get(list_predictions).delete(clear_predictions),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let pipeline = match build_pipeline(&config) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to set up pipeline");
            std::process::exit(1);
        }
    };

    let app = router(pipeline.clone());

    let addr = config.api.bind.clone();
    info!(addr, camera_mode = config.camera.mode, "signstream API server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
            }
        })
        .await;

    pipeline.stop();
    match served {
        Ok(()) => info!("signstream API server stopped"),
        Err(e) => {
            error!(error = %e, "server error");
            std::process::exit(1);
        }
    }
}

fn build_pipeline(config: &Config) -> Result<Pipeline, Box<dyn std::error::Error>> {
    let camera = camera::from_config(&config.camera, config.capture.frame_interval())?;
    let predictor = Arc::new(HttpPredictor::new(&config.predictor)?);
    Ok(Pipeline::new(config.capture.clone(), camera, predictor)?)
}
