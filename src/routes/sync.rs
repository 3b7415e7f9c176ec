//! Sync API endpoints
//!
//! Endpoints:
//! - POST /api/v1/sync/batches - Create a batch
//! - GET /api/v1/sync/batches/stats - Batch counts, optionally per branch
//! - POST /api/v1/sync/batches/cleanup - Purge old completed/failed batches
//! - GET /api/v1/sync/batches/:batch_id - Get a batch
//! - POST /api/v1/sync/batches/:batch_id/process - Process a pending batch
//! - POST /api/v1/sync/batches/:batch_id/retry - Retry a failed batch
//! - POST /api/v1/sync/batches/:batch_id/conflicts/:conflict_id/resolve - Resolve a conflict
//! - GET /api/v1/sync/feed/:kind - Changes after a `since`/`afterId` cursor

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::store::{ChangeCursor, EntityKind};
use crate::sync::{
    BatchStats, ChangeFeed, ConflictResolution, NewBatch, ResolutionAck, SyncBatch, SyncResult,
};

/// Create the sync router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/batches", post(create_batch))
        .route("/batches/stats", get(batch_stats))
        .route("/batches/cleanup", post(cleanup_batches))
        .route("/batches/:batch_id", get(get_batch))
        .route("/batches/:batch_id/process", post(process_batch))
        .route("/batches/:batch_id/retry", post(retry_batch))
        .route(
            "/batches/:batch_id/conflicts/:conflict_id/resolve",
            post(resolve_conflict),
        )
        .route("/feed/:kind", get(change_feed))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsQuery {
    pub branch_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupQuery {
    /// Defaults to the configured retention
    pub retention_days: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub removed: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    pub resolution: ConflictResolution,
    #[serde(default)]
    pub resolved_payload: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedQuery {
    pub since: Option<DateTime<Utc>>,
    /// `nextAfterId` of the previous page
    pub after_id: Option<String>,
    pub branch_id: Option<String>,
    pub limit: Option<usize>,
}

impl FeedQuery {
    fn cursor(&self) -> Result<Option<ChangeCursor>> {
        match (self.since, &self.after_id) {
            (Some(updated_at), after_id) => Ok(Some(ChangeCursor {
                updated_at,
                after_id: after_id.clone(),
            })),
            (None, Some(_)) => Err(AppError::BadRequest(
                "afterId requires since".to_string(),
            )),
            (None, None) => Ok(None),
        }
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_batch(
    State(state): State<AppState>,
    Json(request): Json<NewBatch>,
) -> Result<(StatusCode, Json<SyncBatch>)> {
    let batch = state.service().create_batch(request).await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

async fn batch_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<BatchStats>> {
    let stats = state
        .service()
        .get_batch_stats(query.branch_id.as_deref())
        .await?;
    Ok(Json(stats))
}

async fn cleanup_batches(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<CleanupResponse>> {
    let removed = state
        .service()
        .cleanup_old_batches(query.retention_days)
        .await?;
    Ok(Json(CleanupResponse { removed }))
}

async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<SyncBatch>> {
    Ok(Json(state.service().get_batch(&batch_id).await?))
}

async fn process_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<SyncResult>> {
    Ok(Json(state.service().process_batch(&batch_id).await?))
}

async fn retry_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<SyncResult>> {
    Ok(Json(state.service().retry_batch(&batch_id).await?))
}

async fn resolve_conflict(
    State(state): State<AppState>,
    Path((batch_id, conflict_id)): Path<(String, String)>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ResolutionAck>> {
    let ack = state
        .service()
        .resolve_conflict(
            &batch_id,
            &conflict_id,
            request.resolution,
            request.resolved_payload,
        )
        .await?;
    Ok(Json(ack))
}

async fn change_feed(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<ChangeFeed>> {
    let kind: EntityKind = kind.parse()?;
    let cursor = query.cursor()?;

    let feed = state
        .service()
        .build_feed(kind, cursor.as_ref(), query.branch_id.as_deref(), query.limit)
        .await?;
    Ok(Json(feed))
}
