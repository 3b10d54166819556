//! Sync API endpoints
//!
//! Provides endpoints for batch reconciliation and catch-up reads.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    routing::{get, post},
    Json, Router,
};

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::sync::{
    HistoryEntry, PullRequest, PullResponse, ResourceKey, ResourceRecord, ResourceType,
    SyncBatchRequest, SyncBatchResponse, SyncStatus,
};

/// Create the sync router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(sync_batch))
        .route("/pull", post(pull_changes))
        .route("/history/:actor_id", get(get_history))
        .route("/status/:actor_id", get(get_status))
        .route("/records/:resource_type/:id", get(get_record))
}

/// Reconcile a batch of client mutations
async fn sync_batch(
    State(state): State<AppState>,
    payload: std::result::Result<Json<SyncBatchRequest>, JsonRejection>,
) -> Result<Json<SyncBatchResponse>> {
    let Json(request) = payload?;
    let response = state.sync().sync(request).await?;
    Ok(Json(response))
}

/// Pull server changes since a cursor
async fn pull_changes(
    State(state): State<AppState>,
    payload: std::result::Result<Json<PullRequest>, JsonRejection>,
) -> Result<Json<PullResponse>> {
    let Json(request) = payload?;
    let response = state.sync().pull(request).await?;
    Ok(Json(response))
}

/// Recent batches for an actor, newest first
async fn get_history(
    State(state): State<AppState>,
    Path(actor_id): Path<String>,
) -> Json<Vec<HistoryEntry>> {
    Json(state.sync().history().for_actor(&actor_id))
}

/// Aggregate sync status for an actor
async fn get_status(
    State(state): State<AppState>,
    Path(actor_id): Path<String>,
) -> Json<SyncStatus> {
    Json(state.sync().history().status(&actor_id))
}

/// Current record for a key
async fn get_record(
    State(state): State<AppState>,
    Path((resource_type, id)): Path<(String, String)>,
) -> Result<Json<ResourceRecord>> {
    let parsed = ResourceType::parse(&resource_type);
    if parsed == ResourceType::Unknown {
        return Err(AppError::BadRequest(format!(
            "Unknown resource type: {}",
            resource_type
        )));
    }

    let key = ResourceKey::new(parsed, &id);
    state
        .sync()
        .store()
        .get(&key)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("No record for {}", key)))
}
