//! Employee mapping HTTP handlers.
//!
//! Maps payroll employees to POS customers so deductions can be
//! allocated. Reads are open to all staff; writes need an admin.

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::mapping::{
        ApproveRequest, AutoMatchReport, BulkApproveRequest, BulkApproveResult, CreateMappingRequest,
        EmployeeMapping, MappingFilter, MappingStats, MappingValidation, MatchSuggestion, RejectRequest,
        SuggestionParams, UnmappedEmployee, UpdateMappingRequest, ValidateMappingRequest,
    },
    services::employee_mapping_service,
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

const DEFAULT_SUGGESTIONS: i64 = 20;
const DEFAULT_MIN_CONFIDENCE: f64 = 0.6;

/// Create a manual mapping.
///
/// # Endpoint
///
/// `POST /api/v1/mappings`
///
/// # Response
///
/// - **Success (201 Created)**: the mapping
/// - **Error (400)**: missing ids
/// - **Error (409)**: the employee is already mapped
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateMappingRequest>,
) -> Result<(StatusCode, Json<EmployeeMapping>), AppError> {
    auth.require_admin()?;
    let mapping = employee_mapping_service::create_mapping(&state.pool, &auth.staff_name, request).await?;
    Ok((StatusCode::CREATED, Json(mapping)))
}

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<MappingFilter>,
) -> Result<Json<Vec<EmployeeMapping>>, AppError> {
    Ok(Json(employee_mapping_service::list_mappings(&state.pool, &filter).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<EmployeeMapping>, AppError> {
    Ok(Json(employee_mapping_service::get_mapping(&state.pool, id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateMappingRequest>,
) -> Result<Json<EmployeeMapping>, AppError> {
    auth.require_admin()?;
    Ok(Json(employee_mapping_service::update_mapping(&state.pool, id, request).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    auth.require_admin()?;
    employee_mapping_service::delete_mapping(&state.pool, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unmapped(State(state): State<AppState>) -> Result<Json<Vec<UnmappedEmployee>>, AppError> {
    Ok(Json(employee_mapping_service::unmapped_employees(&state.pool).await?))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<MappingStats>, AppError> {
    Ok(Json(employee_mapping_service::stats(&state.pool).await?))
}

pub async fn suggestions(
    State(state): State<AppState>,
    Query(params): Query<SuggestionParams>,
) -> Result<Json<Vec<MatchSuggestion>>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_SUGGESTIONS).clamp(1, 100);
    let min_confidence = params.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE).clamp(0.0, 1.0);
    Ok(Json(
        employee_mapping_service::suggestions(&state.pool, limit, min_confidence).await?,
    ))
}

/// Propose mappings for every unmapped employee by name similarity.
///
/// # Endpoint
///
/// `POST /api/v1/mappings/auto-match`
///
/// Matches land as `auto_matched` and wait for review.
pub async fn auto_match(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<AutoMatchReport>, AppError> {
    auth.require_admin()?;
    Ok(Json(employee_mapping_service::auto_match(&state.pool).await?))
}

pub async fn validate(
    State(state): State<AppState>,
    Json(request): Json<ValidateMappingRequest>,
) -> Result<Json<MappingValidation>, AppError> {
    let validation = employee_mapping_service::validate_manual_mapping(
        &state.pool,
        &request.xero_employee_id,
        &request.vend_customer_id,
    )
    .await?;
    Ok(Json(validation))
}

pub async fn bulk_approve(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<BulkApproveRequest>,
) -> Result<Json<BulkApproveResult>, AppError> {
    auth.require_admin()?;
    if request.mapping_ids.is_empty() {
        return Err(AppError::InvalidRequest("mapping_ids cannot be empty".to_string()));
    }
    let result =
        employee_mapping_service::bulk_approve(&state.pool, &request.mapping_ids, &auth.staff_name, request.notes)
            .await;
    Ok(Json(result))
}

pub async fn approve(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    request: Option<Json<ApproveRequest>>,
) -> Result<Json<EmployeeMapping>, AppError> {
    auth.require_admin()?;
    let request = request.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(
        employee_mapping_service::approve_auto_match(&state.pool, id, &auth.staff_name, request.notes).await?,
    ))
}

pub async fn reject(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectRequest>,
) -> Result<Json<EmployeeMapping>, AppError> {
    auth.require_admin()?;
    Ok(Json(
        employee_mapping_service::reject_auto_match(&state.pool, id, &auth.staff_name, &request.reason).await?,
    ))
}
