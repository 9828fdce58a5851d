//! Customer hub HTTP handlers.
//!
//! Profile lookups, notes, flags, tags and the communication log for
//! POS customers, as seen by front-of-house staff.

use super::LimitQuery;
use crate::{
    db::Paginated,
    error::AppError,
    middleware::auth::AuthContext,
    models::{
        customer::{
            AddNoteRequest, Communication, CommunicationLog, CustomerListFilter, CustomerNote, CustomerProfile,
            CustomerProfileView, CustomerSearchParams, CustomerSummary, FlagRequest, PurchaseHistory,
            RecordCommunicationRequest, TagRequest, UpdateCustomerRequest, VipRequest,
        },
        email::Email,
    },
    services::customer_hub_service,
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct TagsResponse {
    pub customer_id: Uuid,
    pub tags: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
}

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<CustomerListFilter>,
) -> Result<Json<Paginated<CustomerSummary>>, AppError> {
    Ok(Json(customer_hub_service::list(&state.pool, &filter).await?))
}

/// Search customers by name, email or phone.
///
/// # Endpoint
///
/// `GET /api/v1/crm/customers/search?q=<text>&limit=20`
///
/// # Response
///
/// - **Success (200 OK)**: matching customers, VIPs first
/// - **Error (400)**: empty query
pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<CustomerSearchParams>,
) -> Result<Json<Vec<CustomerSummary>>, AppError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    Ok(Json(customer_hub_service::search(&state.pool, &params.q, limit).await?))
}

/// Full customer profile.
///
/// # Endpoint
///
/// `GET /api/v1/crm/customers/{id}`
///
/// # Response
///
/// Profile plus tags, note count, purchase frequency and the latest ID
/// verification status.
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CustomerProfileView>, AppError> {
    Ok(Json(customer_hub_service::profile(&state.pool, id).await?))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateCustomerRequest>,
) -> Result<Json<CustomerProfile>, AppError> {
    Ok(Json(customer_hub_service::update(&state.pool, id, request).await?))
}

pub async fn emails(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<Email>>, AppError> {
    Ok(Json(customer_hub_service::emails(&state.pool, id, params.limit(50)).await?))
}

pub async fn purchases(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<PurchaseHistory>, AppError> {
    Ok(Json(
        customer_hub_service::purchase_history(&state.pool, id, params.limit(50)).await?,
    ))
}

pub async fn communications(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<CommunicationLog>, AppError> {
    Ok(Json(
        customer_hub_service::communications(&state.pool, id, params.limit(100)).await?,
    ))
}

pub async fn add_note(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<AddNoteRequest>,
) -> Result<(StatusCode, Json<CustomerNote>), AppError> {
    let note = customer_hub_service::add_note(&state.pool, id, auth.staff_id, &auth.staff_name, &request.note).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

pub async fn flag(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<FlagRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    customer_hub_service::flag(&state.pool, id, &request.reason).await?;
    tracing::info!(customer_id = %id, staff = %auth.staff_name, "customer flagged");
    Ok(Json(StatusResponse { success: true }))
}

pub async fn unflag(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, AppError> {
    customer_hub_service::unflag(&state.pool, id).await?;
    tracing::info!(customer_id = %id, staff = %auth.staff_name, "customer unflagged");
    Ok(Json(StatusResponse { success: true }))
}

pub async fn set_vip(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<VipRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    customer_hub_service::set_vip(&state.pool, id, request.is_vip).await?;
    Ok(Json(StatusResponse { success: true }))
}

pub async fn add_tag(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<TagRequest>,
) -> Result<Json<TagsResponse>, AppError> {
    let tags = customer_hub_service::add_tag(&state.pool, id, &request.tag).await?;
    Ok(Json(TagsResponse { customer_id: id, tags }))
}

pub async fn record_communication(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<RecordCommunicationRequest>,
) -> Result<(StatusCode, Json<Communication>), AppError> {
    let communication = customer_hub_service::record_communication(&state.pool, id, auth.staff_id, request).await?;
    Ok((StatusCode::CREATED, Json(communication)))
}
