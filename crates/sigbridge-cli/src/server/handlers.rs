use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use sigbridge::ModuleProvider;
use tracing::{info, warn};

use super::model::{SignRequest, SignResponse, StatusResponse, ValueResponse};
use super::{ApiError, AppState};

pub async fn sign<P>(
    State(state): State<AppState<P>>,
    request: Result<Json<SignRequest>, JsonRejection>,
) -> Result<Json<SignResponse>, ApiError>
where
    P: ModuleProvider + Send + Sync + 'static,
{
    let Json(request) = request.map_err(|e| ApiError::bad_request(e.body_text()))?;
    info!(
        "Signing for: cmd={} seq={} src={} bytes",
        request.cmd,
        request.seq,
        request.src.len() / 2
    );

    let payload = hex::decode(request.src.trim())
        .map_err(|e| ApiError::bad_request(format!("Invalid hex data: {}", e)))?;

    let signer = Arc::clone(&state.signer);
    let SignRequest { cmd, seq, .. } = request;
    let output = tokio::task::spawn_blocking(move || signer.sign(&cmd, &payload, seq))
        .await
        .map_err(|e| ApiError::internal(format!("Sign service error: {}", e)))?
        .inspect_err(|e| warn!("Sign failed: {}", e))?;

    let value = ValueResponse::from(&output);
    info!("Done: token={} extra={} sign={}", value.token, value.extra, value.sign);
    Ok(Json(SignResponse { value }))
}

pub async fn appinfo<P: ModuleProvider>(
    State(state): State<AppState<P>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let content = tokio::fs::read_to_string(state.appinfo.as_ref())
        .await
        .map_err(|e| {
            ApiError::internal(format!(
                "Failed to read {}: {}",
                state.appinfo.display(),
                e
            ))
        })?;
    let value = serde_json::from_str(&content).map_err(|e| {
        ApiError::internal(format!("Invalid JSON in {}: {}", state.appinfo.display(), e))
    })?;
    Ok(Json(value))
}

pub async fn status<P: ModuleProvider>(State(state): State<AppState<P>>) -> Json<StatusResponse> {
    Json(StatusResponse::from(state.signer.status()))
}
