//! Payroll deduction allocation HTTP handlers.
//!
//! This module implements the allocation endpoints:
//! - GET /api/v1/deductions - Pending deductions, optionally for one customer
//! - GET /api/v1/deductions/failed - Deductions whose allocation failed
//! - GET /api/v1/deductions/summary - Pending totals per customer
//! - POST /api/v1/deductions/{id}/allocate - Allocate one deduction
//! - POST /api/v1/deductions/{id}/retry - Reset a failed deduction
//! - POST /api/v1/deductions/allocate-pending - Allocate everything pending
//! - POST /api/v1/customers/{vend_id}/allocate - Allocate all for a customer
//! - POST /api/v1/customers/{vend_id}/retry-failed - Reset a customer's failures
//! - GET /api/v1/customers/{vend_id}/allocations - Allocation log for a customer
//! - GET /api/v1/allocations/stats | recent | success-rate

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::deduction::{
        AllocateRequest, AllocationLogEntry, AllocationResult, AllocationStatusStat,
        AllocationSuccessRate, BulkAllocationResult, Deduction, DeductionFilter, LimitParams,
        PendingCustomerSummary, RetryAllResult,
    },
    services::allocation_service,
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use uuid::Uuid;

const DEFAULT_LIMIT: i64 = 50;
const DEFAULT_DAYS: i64 = 30;

/// List pending deductions.
///
/// # Endpoint
///
/// `GET /api/v1/deductions?customer=<vend_customer_id>`
pub async fn list_pending(
    State(state): State<AppState>,
    Query(filter): Query<DeductionFilter>,
) -> Result<Json<Vec<Deduction>>, AppError> {
    let deductions = allocation_service::pending_deductions(&state.pool, filter.customer.as_deref()).await?;
    Ok(Json(deductions))
}

pub async fn list_failed(State(state): State<AppState>) -> Result<Json<Vec<Deduction>>, AppError> {
    Ok(Json(allocation_service::failed_deductions(&state.pool).await?))
}

pub async fn pending_summary(
    State(state): State<AppState>,
) -> Result<Json<Vec<PendingCustomerSummary>>, AppError> {
    Ok(Json(allocation_service::pending_summary(&state.pool).await?))
}

/// Allocate one deduction against the customer's open sales.
///
/// # Endpoint
///
/// `POST /api/v1/deductions/{id}/allocate`
///
/// # Request Body
///
/// ```json
/// { "dry_run": false, "live": false }
/// ```
///
/// The body is optional; an empty body allocates for real from the
/// local sales mirror.
///
/// # Response
///
/// - **Success (200 OK)**: allocation result, including a per-sale breakdown
/// - **Error (403)**: caller is not an admin
/// - **Error (404)**: deduction not found
/// - **Error (409)**: deduction is not pending
pub async fn allocate(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    request: Option<Json<AllocateRequest>>,
) -> Result<Json<AllocationResult>, AppError> {
    auth.require_admin()?;
    let request = request.map(|Json(r)| r).unwrap_or_default();

    let result = allocation_service::allocate_deduction(
        &state.pool,
        &state.vend,
        &state.config.vend_payment_type_id,
        id,
        Some(auth.staff_id),
        &request,
    )
    .await?;

    Ok(Json(result))
}

/// Reset a failed deduction to pending.
pub async fn retry(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Deduction>, AppError> {
    auth.require_admin()?;
    let deduction = allocation_service::retry_failed(&state.pool, id, Some(auth.staff_id)).await?;
    Ok(Json(deduction))
}

pub async fn allocate_pending(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<BulkAllocationResult>, AppError> {
    auth.require_admin()?;
    let result = allocation_service::allocate_all_pending(
        &state.pool,
        &state.vend,
        &state.config.vend_payment_type_id,
        Some(auth.staff_id),
    )
    .await?;
    Ok(Json(result))
}

pub async fn allocate_customer(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(vend_id): Path<String>,
) -> Result<Json<BulkAllocationResult>, AppError> {
    auth.require_admin()?;
    let result = allocation_service::allocate_all_for_customer(
        &state.pool,
        &state.vend,
        &state.config.vend_payment_type_id,
        &vend_id,
        Some(auth.staff_id),
    )
    .await?;
    Ok(Json(result))
}

pub async fn retry_customer_failed(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(vend_id): Path<String>,
) -> Result<Json<RetryAllResult>, AppError> {
    auth.require_admin()?;
    Ok(Json(
        allocation_service::retry_all_failed_for_customer(&state.pool, &vend_id).await?,
    ))
}

pub async fn customer_allocations(
    State(state): State<AppState>,
    Path(vend_id): Path<String>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<AllocationLogEntry>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 500);
    Ok(Json(
        allocation_service::allocation_history(&state.pool, &vend_id, limit).await?,
    ))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<Vec<AllocationStatusStat>>, AppError> {
    Ok(Json(allocation_service::allocation_statistics(&state.pool).await?))
}

pub async fn recent(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<AllocationLogEntry>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 500);
    Ok(Json(allocation_service::recent_allocations(&state.pool, limit).await?))
}

/// Share of successful allocation attempts over the last `days` days.
///
/// # Endpoint
///
/// `GET /api/v1/allocations/success-rate?days=30`
pub async fn success_rate(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Result<Json<AllocationSuccessRate>, AppError> {
    let days = params.days.unwrap_or(DEFAULT_DAYS).clamp(1, 365);
    Ok(Json(allocation_service::allocation_success_rate(&state.pool, days).await?))
}
