use crate::config::QueueConfig;
use crate::response::{ApiResponse, error_response};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use shale_core::{EnqueueResponse, JobStore, Result};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub struct QueueState {
    pub store: JobStore,
}

pub async fn run_queue(config: QueueConfig) -> Result<()> {
    let store = JobStore::new(
        config.db_path.clone(),
        (config.visibility_timeout_secs as i64) * 1000,
    )?;

    let state = Arc::new(QueueState { store });

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/enqueue", post(enqueue_job))
        .route("/dequeue", get(dequeue_jobs))
        .route("/ack", post(ack_job))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Replication queue listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct TargetQuery {
    target: String,
}

#[derive(Debug, Deserialize)]
struct AckQuery {
    target: String,
    job_id: i64,
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "Hello from the shale replication queue" }))
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn enqueue_job(
    State(state): State<Arc<QueueState>>,
    Query(query): Query<TargetQuery>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    match state.store.enqueue_job(&query.target, &body) {
        Ok(job_id) => (StatusCode::CREATED, Json(EnqueueResponse { job_id })).into_response(),
        Err(error) => error_response(&error),
    }
}

async fn dequeue_jobs(
    State(state): State<Arc<QueueState>>,
    Query(query): Query<TargetQuery>,
) -> Response {
    match state.store.dequeue_jobs(&query.target) {
        Ok(jobs) => Json(jobs).into_response(),
        Err(error) => error_response(&error),
    }
}

async fn ack_job(State(state): State<Arc<QueueState>>, Query(query): Query<AckQuery>) -> Response {
    match state.store.ack_job(&query.target, query.job_id) {
        Ok(()) => {
            let body = ApiResponse {
                success: true,
                data: Some(serde_json::json!({ "job_id": query.job_id })),
                error: None,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(error) => error_response(&error),
    }
}
