//! Offline session endpoints
//!
//! Endpoints:
//! - POST /api/v1/offline/sessions - Create a session
//! - GET /api/v1/offline/sessions/:id - Get a session
//! - DELETE /api/v1/offline/sessions/:id - End a session
//! - GET /api/v1/offline/sessions/:id/validate - Check a session is usable
//! - POST /api/v1/offline/sessions/:id/activity - Refresh activity
//! - POST /api/v1/offline/sessions/:id/suspend - Suspend a session
//! - POST /api/v1/offline/sessions/:id/resume - Resume a suspended session
//! - GET /api/v1/offline/sessions/:id/package - Build a data package
//! - POST /api/v1/offline/sessions/:id/changes - Queue offline changes
//! - GET /api/v1/offline/sessions/:id/changes - List queued changes
//! - POST /api/v1/offline/sessions/:id/submit - Turn queued changes into a batch
//! - GET /api/v1/offline/devices/:device_id/sessions - Sessions of a device

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::offline::{NewSession, OfflineDataPackage, OfflineSession, QueuedChange, SaveResult};
use crate::state::AppState;
use crate::store::EntityKind;
use crate::sync::{SyncBatch, SyncChange};

/// Create the offline router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/:id", get(get_session).delete(end_session))
        .route("/sessions/:id/validate", get(validate_session))
        .route("/sessions/:id/activity", post(update_activity))
        .route("/sessions/:id/suspend", post(suspend_session))
        .route("/sessions/:id/resume", post(resume_session))
        .route("/sessions/:id/package", get(data_package))
        .route(
            "/sessions/:id/changes",
            post(save_changes).get(queued_changes),
        )
        .route("/sessions/:id/submit", post(submit_changes))
        .route("/devices/:device_id/sessions", get(device_sessions))
}

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub session_id: String,
    pub valid: bool,
}

#[derive(Debug, Deserialize)]
pub struct PackageQuery {
    /// Comma-separated entity kinds
    pub kinds: Option<String>,
}

impl PackageQuery {
    fn kinds(&self) -> Result<Option<Vec<EntityKind>>> {
        let Some(raw) = self.kinds.as_deref() else {
            return Ok(None);
        };

        let kinds = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect::<std::result::Result<Vec<EntityKind>, _>>()?;
        Ok(Some(kinds))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveChangesRequest {
    pub changes: Vec<SyncChange>,
}

// ============================================================================
// Handlers
// ============================================================================

async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<NewSession>,
) -> Result<(StatusCode, Json<OfflineSession>)> {
    let session = state.service().create_session(request).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OfflineSession>> {
    Ok(Json(state.service().sessions().get_session(&id).await?))
}

async fn end_session(State(state): State<AppState>, Path(id): Path<String>) -> Result<StatusCode> {
    state.service().end_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn validate_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ValidateResponse>> {
    let valid = state.service().validate_session(&id).await?;
    Ok(Json(ValidateResponse {
        session_id: id,
        valid,
    }))
}

async fn update_activity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OfflineSession>> {
    Ok(Json(state.service().update_activity(&id).await?))
}

async fn suspend_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OfflineSession>> {
    Ok(Json(state.service().suspend_session(&id).await?))
}

async fn resume_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OfflineSession>> {
    Ok(Json(state.service().resume_session(&id).await?))
}

async fn data_package(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PackageQuery>,
) -> Result<Json<OfflineDataPackage>> {
    let package = state
        .service()
        .create_data_package(&id, query.kinds()?)
        .await?;
    Ok(Json(package))
}

async fn save_changes(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SaveChangesRequest>,
) -> Result<Json<SaveResult>> {
    let result = state
        .service()
        .save_offline_changes(&id, request.changes)
        .await?;
    Ok(Json(result))
}

async fn queued_changes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<QueuedChange>>> {
    Ok(Json(state.service().get_queued_changes(&id).await?))
}

async fn submit_changes(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SyncBatch>)> {
    let batch = state.service().submit_queued_changes(&id).await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

async fn device_sessions(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Vec<OfflineSession>>> {
    Ok(Json(state.service().get_device_sessions(&device_id).await?))
}
