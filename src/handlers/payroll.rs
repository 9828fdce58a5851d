//! Payroll sync HTTP handlers.

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::payroll::{PayrollDeductionSummary, SyncReport, SyncRequest},
    services::payroll_sync_service,
    state::AppState,
};
use axum::{Extension, Json, extract::State};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct MarkCachedResponse {
    pub updated: u64,
}

/// Pull recent pay runs from the payroll system and record staff
/// account deductions.
///
/// # Endpoint
///
/// `POST /api/v1/payroll/sync`
///
/// # Request Body
///
/// ```json
/// { "limit_weeks": 12 }
/// ```
///
/// # Response
///
/// - **Success (200 OK)**: counts of pay runs and deductions processed
/// - **Error (403)**: caller is not an admin
/// - **Error (502)**: payroll system unreachable
pub async fn sync(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    request: Option<Json<SyncRequest>>,
) -> Result<Json<SyncReport>, AppError> {
    auth.require_admin()?;
    let request = request.map(|Json(r)| r).unwrap_or_default();

    tracing::info!(staff = %auth.staff_name, limit_weeks = request.limit_weeks, "payroll sync requested");
    let report = payroll_sync_service::sync_payrolls(&state.pool, &state.xero, request.limit_weeks).await?;

    Ok(Json(report))
}

pub async fn summary(State(state): State<AppState>) -> Result<Json<Vec<PayrollDeductionSummary>>, AppError> {
    Ok(Json(payroll_sync_service::deductions_summary(&state.pool).await?))
}

pub async fn mark_cached(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<MarkCachedResponse>, AppError> {
    auth.require_admin()?;
    let updated = payroll_sync_service::mark_old_payrolls_cached(&state.pool).await?;
    Ok(Json(MarkCachedResponse { updated }))
}
