use crate::auth::{StaticAuthenticator, identity_from_headers, unauthorized};
use crate::config::GatewayConfig;
use crate::response::{ApiResponse, bad_request, error_response};
use axum::body::Body;
use axum::extract::{Multipart, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use shale_core::{
    FileCatalog, FileRecord, Gateway, HttpShardClient, PartialUploadWarning, Result, ShaleError,
    ShardApi, ShardSet,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

pub struct GatewayState {
    pub gateway: Gateway,
    pub auth: StaticAuthenticator,
}

pub async fn run_gateway(config: GatewayConfig) -> Result<()> {
    let timeout = Duration::from_secs(config.rpc_timeout_secs);

    let mut shards: Vec<Arc<dyn ShardApi>> = Vec::with_capacity(config.shards.len());
    for endpoint in &config.shards {
        shards.push(Arc::new(HttpShardClient::new(endpoint, timeout)?));
    }
    if shards.is_empty() {
        return Err(ShaleError::Config("no shard endpoints configured".to_string()));
    }

    let catalog = Arc::new(FileCatalog::load(config.snapshot_path.clone()).await?);
    let gateway = Gateway::new(catalog, ShardSet::new(shards), config.chunk_size);

    let state = Arc::new(GatewayState {
        gateway,
        auth: StaticAuthenticator::new(&config.users),
    });

    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/users/me", get(whoami_handler))
        .route("/upload", post(upload_file))
        .route("/file", get(get_file).delete(delete_file))
        .route("/file_size", get(get_file_size))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Gateway listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct FileQuery {
    file_path: String,
}

#[derive(Debug, Serialize)]
struct UploadResponse {
    filename: Option<String>,
    record: FileRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<PartialUploadWarning>,
}

#[derive(Debug, Serialize)]
struct FileSizeResponse {
    file_path: String,
    file_size: u64,
}

async fn root_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "Hello from the shale gateway" }))
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn whoami_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Response {
    let Some(username) = identity_from_headers(&state.auth, &headers) else {
        return unauthorized();
    };
    Json(serde_json::json!({ "username": username })).into_response()
}

async fn upload_file(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let Some(owner) = identity_from_headers(&state.auth, &headers) else {
        return unauthorized();
    };

    let mut file_path: Option<String> = None;
    let mut filename: Option<String> = None;
    let mut data: Option<Bytes> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(error) => return bad_request(&format!("invalid multipart body: {}", error)),
        };

        let name = field.name().map(|name| name.to_string());
        match name.as_deref() {
            Some("file_path") => match field.text().await {
                Ok(text) => file_path = Some(text),
                Err(error) => return bad_request(&format!("invalid file_path field: {}", error)),
            },
            Some("file") => {
                filename = field.file_name().map(|name| name.to_string());
                match field.bytes().await {
                    Ok(bytes) => data = Some(bytes),
                    Err(error) => return bad_request(&format!("invalid file field: {}", error)),
                }
            }
            _ => {}
        }
    }

    let Some(file_path) = file_path else {
        return bad_request("missing file_path field");
    };
    let Some(data) = data else {
        return bad_request("missing file field");
    };

    tracing::info!("REST request to upload new file: {}", file_path);

    match state.gateway.upload(&owner, &file_path, data).await {
        Ok(outcome) => {
            let body = ApiResponse {
                success: true,
                data: Some(UploadResponse {
                    filename,
                    record: outcome.record,
                    warning: outcome.warning,
                }),
                error: None,
            };
            (StatusCode::CREATED, Json(body)).into_response()
        }
        Err(error) => error_response(&error),
    }
}

async fn get_file(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<FileQuery>,
) -> Response {
    let Some(owner) = identity_from_headers(&state.auth, &headers) else {
        return unauthorized();
    };

    tracing::info!("REST request to get file: {}", query.file_path);

    match state.gateway.download(&owner, &query.file_path).await {
        Ok(stream) => {
            let filename = query
                .file_path
                .rsplit('/')
                .next()
                .unwrap_or("download")
                .to_string();
            let disposition = format!("attachment; filename=\"{}\"", filename);
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                Body::from_stream(stream),
            )
                .into_response()
        }
        Err(error) => error_response(&error),
    }
}

async fn get_file_size(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<FileQuery>,
) -> Response {
    let Some(owner) = identity_from_headers(&state.auth, &headers) else {
        return unauthorized();
    };

    tracing::info!("REST request to get file size of {}", query.file_path);

    match state.gateway.stat(&owner, &query.file_path).await {
        Ok(size) => Json(FileSizeResponse {
            file_path: query.file_path,
            file_size: size,
        })
        .into_response(),
        Err(error) => error_response(&error),
    }
}

async fn delete_file(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Query(query): Query<FileQuery>,
) -> Response {
    let Some(owner) = identity_from_headers(&state.auth, &headers) else {
        return unauthorized();
    };

    tracing::info!("REST request to delete file: {}", query.file_path);

    match state.gateway.delete(&owner, &query.file_path).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error_response(&error),
    }
}
