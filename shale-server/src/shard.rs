use crate::config::{ReplicationMode, ShardRole, ShardServerConfig};
use crate::response::{ApiResponse, bad_request, error_response};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use shale_core::{
    BlobStore, ChunkDelete, ChunkDownload, ChunkUpload, HttpQueueClient, HttpShardClient,
    PropagationMode, Replication, ReplicationPoller, Result, ShaleError, ShardNode,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

pub struct ShardState {
    pub shard_id: usize,
    pub shard: Arc<ShardNode>,
}

pub async fn run_shard(config: ShardServerConfig) -> Result<()> {
    let timeout = Duration::from_secs(config.rpc_timeout_secs);
    let store = BlobStore::new(config.data_dir.clone())?;

    let replication = match (config.role, config.replication) {
        (ShardRole::Primary, ReplicationMode::Direct) => Some(Replication {
            backup: Arc::new(HttpShardClient::new(require_backup(&config)?, timeout)?),
            mode: PropagationMode::Direct,
        }),
        (ShardRole::Primary, ReplicationMode::Queue) => Some(Replication {
            backup: Arc::new(HttpShardClient::new(require_backup(&config)?, timeout)?),
            mode: PropagationMode::Queue {
                queue: Arc::new(HttpQueueClient::new(require_queue(&config)?, timeout)?),
                channel: require_channel(&config)?.to_string(),
            },
        }),
        _ => None,
    };

    let shard = Arc::new(ShardNode::new(store, replication));

    // A backup in queue mode consumes its channel on a fixed schedule.
    if config.role == ShardRole::Backup && config.replication == ReplicationMode::Queue {
        let queue = Arc::new(HttpQueueClient::new(require_queue(&config)?, timeout)?);
        let poller = ReplicationPoller::new(
            shard.clone(),
            queue,
            require_channel(&config)?.to_string(),
            Duration::from_secs(config.poll_interval_secs),
        );
        tokio::spawn(async move {
            poller.run().await;
        });
    }

    let state = Arc::new(ShardState {
        shard_id: config.shard_id,
        shard,
    });

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route(
            "/chunk",
            axum::routing::post(put_chunk).delete(delete_chunks),
        )
        .route("/chunk/:chunk_key", get(get_chunk))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Shard {} listening on {}", config.shard_id, config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

fn require_backup(config: &ShardServerConfig) -> Result<&str> {
    config
        .backup_endpoint
        .as_deref()
        .ok_or_else(|| ShaleError::Config("backup_endpoint is required for replication".to_string()))
}

fn require_queue(config: &ShardServerConfig) -> Result<&str> {
    config
        .queue_endpoint
        .as_deref()
        .ok_or_else(|| ShaleError::Config("queue_endpoint is required for queue mode".to_string()))
}

fn require_channel(config: &ShardServerConfig) -> Result<&str> {
    config
        .channel
        .as_deref()
        .ok_or_else(|| ShaleError::Config("channel is required for queue mode".to_string()))
}

async fn root_handler(State(state): State<Arc<ShardState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "message": format!("Hello from shard {}", state.shard_id)
    }))
}

async fn health_handler(State(state): State<Arc<ShardState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ok", "shard_id": state.shard_id })),
    )
}

async fn put_chunk(
    State(state): State<Arc<ShardState>>,
    Json(request): Json<ChunkUpload>,
) -> Response {
    let content = match request.decode_content() {
        Ok(content) => content,
        Err(error) => return bad_request(&error.to_string()),
    };

    match state.shard.put_chunk(&request.chunk_key, content).await {
        Ok(()) => {
            let body = ApiResponse {
                success: true,
                data: Some(serde_json::json!({ "chunk_key": request.chunk_key })),
                error: None,
            };
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(error) => error_response(&error),
    }
}

async fn get_chunk(
    State(state): State<Arc<ShardState>>,
    Path(chunk_key): Path<String>,
) -> Response {
    match state.shard.get_chunk(&chunk_key).await {
        Ok(content) => Json(ChunkDownload {
            chunk_key,
            content: BASE64.encode(&content),
        })
        .into_response(),
        Err(error) => error_response(&error),
    }
}

async fn delete_chunks(
    State(state): State<Arc<ShardState>>,
    Json(request): Json<ChunkDelete>,
) -> Response {
    match state.shard.delete_chunks(&request.chunk_keys).await {
        Ok(()) => {
            let body = ApiResponse {
                success: true,
                data: Some(serde_json::json!({ "deleted": request.chunk_keys.len() })),
                error: None,
            };
            (StatusCode::OK, Json(body)).into_response()
        }
        Err(error) => error_response(&error),
    }
}
