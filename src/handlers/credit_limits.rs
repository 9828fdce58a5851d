//! Staff credit limit HTTP handlers.

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        deduction::LimitParams,
        staff_account::{
            ApplyDefaultResult, BulkCreditLimitRequest, BulkCreditLimitResult, CreditChangeType,
            CreditLimitAudit, CreditLimitView, CreditSyncResult, CreditUtilization, DefaultCreditLimit,
            SetCreditLimitRequest,
        },
    },
    services::credit_limit_service,
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct SyncOneResponse {
    pub reconciliation_id: Uuid,
    pub synced: bool,
}

pub async fn get_default(State(state): State<AppState>) -> Result<Json<DefaultCreditLimit>, AppError> {
    let limit_cents = credit_limit_service::get_default(&state.pool).await?;
    Ok(Json(DefaultCreditLimit { limit_cents }))
}

pub async fn set_default(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<DefaultCreditLimit>,
) -> Result<Json<DefaultCreditLimit>, AppError> {
    auth.require_admin()?;
    credit_limit_service::set_default(&state.pool, request.limit_cents).await?;
    Ok(Json(request))
}

/// Push the company default to every account without an override.
///
/// # Endpoint
///
/// `POST /api/v1/credit-limits/apply-default`
pub async fn apply_default(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<ApplyDefaultResult>, AppError> {
    auth.require_admin()?;
    let limit_cents = credit_limit_service::get_default(&state.pool).await?;
    let updated =
        credit_limit_service::apply_default_to_all(&state.pool, &state.vend, limit_cents, &auth.staff_name).await?;
    Ok(Json(ApplyDefaultResult { limit_cents, updated }))
}

pub async fn bulk(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<BulkCreditLimitRequest>,
) -> Result<Json<BulkCreditLimitResult>, AppError> {
    auth.require_admin()?;
    let result = credit_limit_service::bulk_set(&state.pool, &state.vend, &request.updates, &auth.staff_name).await;
    Ok(Json(result))
}

pub async fn sync_all(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<CreditSyncResult>, AppError> {
    auth.require_admin()?;
    Ok(Json(credit_limit_service::sync_all(&state.pool, &state.vend).await?))
}

pub async fn report(State(state): State<AppState>) -> Result<Json<Vec<CreditUtilization>>, AppError> {
    Ok(Json(credit_limit_service::utilization_report(&state.pool).await?))
}

pub async fn get_limit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CreditLimitView>, AppError> {
    Ok(Json(credit_limit_service::get_limit(&state.pool, id).await?))
}

/// Set one staff member's limit.
///
/// # Endpoint
///
/// `PUT /api/v1/credit-limits/{id}`
///
/// # Request Body
///
/// ```json
/// { "limit_cents": 50000, "is_override": true }
/// ```
///
/// With `is_override: false` the change is recorded as a company default
/// rather than an individual override.
pub async fn set_limit(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<SetCreditLimitRequest>,
) -> Result<Json<CreditLimitView>, AppError> {
    auth.require_admin()?;
    let change_type = if request.is_override {
        CreditChangeType::IndividualOverride
    } else {
        CreditChangeType::CompanyDefault
    };
    credit_limit_service::set_limit(
        &state.pool,
        &state.vend,
        id,
        request.limit_cents,
        change_type,
        &auth.staff_name,
    )
    .await?;
    Ok(Json(credit_limit_service::get_limit(&state.pool, id).await?))
}

pub async fn revert(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<CreditLimitView>, AppError> {
    auth.require_admin()?;
    credit_limit_service::revert_to_default(&state.pool, &state.vend, id, &auth.staff_name).await?;
    Ok(Json(credit_limit_service::get_limit(&state.pool, id).await?))
}

pub async fn sync_one(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<SyncOneResponse>, AppError> {
    auth.require_admin()?;
    let synced = credit_limit_service::sync_from_pos(&state.pool, &state.vend, id).await?;
    Ok(Json(SyncOneResponse {
        reconciliation_id: id,
        synced,
    }))
}

pub async fn history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<LimitParams>,
) -> Result<Json<Vec<CreditLimitAudit>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    Ok(Json(credit_limit_service::history(&state.pool, id, limit).await?))
}
