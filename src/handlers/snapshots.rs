//! Payroll snapshot HTTP handlers.
//!
//! Snapshots are JSON files on disk, so the reads run on the blocking pool.

use std::path::PathBuf;

use crate::{
    error::AppError,
    models::snapshot::{DiffParams, SnapshotAggregate, SnapshotDiff, SnapshotSummary},
    services::snapshot_service,
    state::AppState,
};
use axum::{
    Json,
    extract::{Query, State},
};

async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Io(std::io::Error::other(e)))
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<SnapshotSummary>>, AppError> {
    let dir = PathBuf::from(&state.config.snapshot_dir);
    Ok(Json(blocking(move || snapshot_service::list(&dir)).await?))
}

pub async fn aggregate(State(state): State<AppState>) -> Result<Json<SnapshotAggregate>, AppError> {
    let dir = PathBuf::from(&state.config.snapshot_dir);
    Ok(Json(blocking(move || snapshot_service::aggregate(&dir)).await?))
}

/// Compare two snapshots.
///
/// # Endpoint
///
/// `GET /api/v1/snapshots/diff?from=<pay_run_id|file>&to=<pay_run_id|file>`
pub async fn diff(
    State(state): State<AppState>,
    Query(params): Query<DiffParams>,
) -> Result<Json<SnapshotDiff>, AppError> {
    let dir = PathBuf::from(&state.config.snapshot_dir);
    let result = blocking(move || snapshot_service::diff(&dir, &params.from, &params.to)).await??;
    Ok(Json(result))
}
