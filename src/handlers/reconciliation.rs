//! Staff account reconciliation HTTP handlers.
//!
//! - POST /api/v1/reconciliation/run - Reconcile every staff account
//! - GET /api/v1/reconciliation/summary - Totals by status
//! - POST /api/v1/reconciliation/{id} - Reconcile one account
//! - POST /api/v1/reconciliation/{id}/refresh - Reload the POS balance, then reconcile

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::staff_account::{ReconcileAllResult, ReconcileResult, ReconciliationSummary},
    services::reconciliation_service,
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

pub async fn run_all(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ReconcileAllResult>, AppError> {
    auth.require_admin()?;
    Ok(Json(reconciliation_service::reconcile_all(&state.pool).await?))
}

pub async fn summary(State(state): State<AppState>) -> Result<Json<ReconciliationSummary>, AppError> {
    Ok(Json(reconciliation_service::summary(&state.pool).await?))
}

pub async fn reconcile_one(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReconcileResult>, AppError> {
    auth.require_admin()?;
    Ok(Json(reconciliation_service::reconcile(&state.pool, id).await?))
}

pub async fn refresh(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<ReconcileResult>, AppError> {
    auth.require_admin()?;
    Ok(Json(
        reconciliation_service::refresh_balance(&state.pool, &state.vend, id).await?,
    ))
}
