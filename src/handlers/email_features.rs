//! Staff mailbox endpoints: reply templates, follow-up reminders,
//! email flags and the priority inbox.

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::email::{
        CreateReminderRequest, CreateTemplateRequest, DueReminder, EmailTemplate, FollowUpReminder, PriorityEmail,
        PriorityParams, TemplateFilter,
    },
    services::email_features_service,
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
pub struct FlagResponse {
    pub email_id: Uuid,
    pub is_flagged: bool,
}

/// Save a reply template for the calling staff member.
///
/// # Endpoint
///
/// `POST /api/v1/email-templates`
///
/// # Request Body
///
/// ```json
/// { "name": "Order delayed", "subject": "Your order", "body": "Kia ora ...", "category": "orders", "tags": ["delay"] }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: the stored template
/// - **Error (400)**: name or body missing
pub async fn create_template(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateTemplateRequest>,
) -> Result<(StatusCode, Json<EmailTemplate>), AppError> {
    let template = email_features_service::create_template(&state.pool, auth.staff_id, &request).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

pub async fn templates(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(filter): Query<TemplateFilter>,
) -> Result<Json<Vec<EmailTemplate>>, AppError> {
    Ok(Json(
        email_features_service::templates(&state.pool, auth.staff_id, filter.category.as_deref()).await?,
    ))
}

/// Schedule a follow-up reminder for an email.
///
/// `remind_at` must be in the future (400). Unknown email gives 404.
pub async fn add_reminder(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(email_id): Path<Uuid>,
    Json(request): Json<CreateReminderRequest>,
) -> Result<(StatusCode, Json<FollowUpReminder>), AppError> {
    let reminder = email_features_service::add_reminder(&state.pool, auth.staff_id, email_id, &request).await?;
    Ok((StatusCode::CREATED, Json(reminder)))
}

pub async fn due_reminders(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<DueReminder>>, AppError> {
    Ok(Json(email_features_service::due_reminders(&state.pool, auth.staff_id).await?))
}

pub async fn flag(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(email_id): Path<Uuid>,
) -> Result<Json<FlagResponse>, AppError> {
    email_features_service::set_flag(&state.pool, email_id, true).await?;
    tracing::info!(email_id = %email_id, staff = %auth.staff_name, "email flagged");
    Ok(Json(FlagResponse {
        email_id,
        is_flagged: true,
    }))
}

pub async fn unflag(
    State(state): State<AppState>,
    Path(email_id): Path<Uuid>,
) -> Result<Json<FlagResponse>, AppError> {
    email_features_service::set_flag(&state.pool, email_id, false).await?;
    Ok(Json(FlagResponse {
        email_id,
        is_flagged: false,
    }))
}

/// Important inbound emails assigned to the caller.
///
/// # Endpoint
///
/// `GET /api/v1/inbox/priority?days=7`
pub async fn priority_inbox(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<PriorityParams>,
) -> Result<Json<Vec<PriorityEmail>>, AppError> {
    let days = params.days.unwrap_or(email_features_service::DEFAULT_PRIORITY_DAYS);
    Ok(Json(
        email_features_service::priority_inbox(&state.pool, auth.staff_id, days).await?,
    ))
}
