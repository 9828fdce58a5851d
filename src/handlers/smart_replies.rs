//! Smart reply HTTP handlers.
//!
//! Generation needs an LLM key; without one these answer 503 and the
//! rest of the service carries on.

use super::LimitQuery;
use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::email::{
        EmailDraft, FeedbackResult, GenerateRepliesRequest, ReplyFeedbackRequest, SmartReply, SmartReplyMetrics,
        UseReplyRequest,
    },
    services::smart_reply_service,
    state::AppState,
};
use axum::{
    Json,
    Extension,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct MetricsParams {
    #[serde(default)]
    pub days: Option<i64>,
}

/// Generate reply suggestions for an email.
///
/// # Endpoint
///
/// `POST /api/v1/emails/{id}/smart-replies`
///
/// # Request Body
///
/// ```json
/// { "count": 5 }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: the stored suggestions in order
/// - **Error (400)**: count outside 1..=10
/// - **Error (404)**: email not found
/// - **Error (502)**: the model answered with something unusable
/// - **Error (503)**: smart replies are not configured
pub async fn generate(
    State(state): State<AppState>,
    Path(email_id): Path<Uuid>,
    request: Option<Json<GenerateRepliesRequest>>,
) -> Result<(StatusCode, Json<Vec<SmartReply>>), AppError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let replies = smart_reply_service::generate(&state.pool, state.llm.as_ref(), email_id, request.count).await?;
    Ok((StatusCode::CREATED, Json(replies)))
}

pub async fn list(
    State(state): State<AppState>,
    Path(email_id): Path<Uuid>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<SmartReply>>, AppError> {
    Ok(Json(
        smart_reply_service::suggestions(&state.pool, email_id, params.limit(10)).await?,
    ))
}

/// Turn a suggestion into a draft reply, optionally with edited text.
pub async fn use_suggestion(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    request: Option<Json<UseReplyRequest>>,
) -> Result<(StatusCode, Json<EmailDraft>), AppError> {
    let request = request.map(|Json(r)| r).unwrap_or_default();
    let draft =
        smart_reply_service::use_suggestion(&state.pool, id, auth.staff_id, request.customization.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(draft)))
}

pub async fn feedback(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<ReplyFeedbackRequest>,
) -> Result<Json<FeedbackResult>, AppError> {
    let result =
        smart_reply_service::feedback(&state.pool, id, auth.staff_id, request.helpful, request.notes.as_deref())
            .await?;
    Ok(Json(result))
}

pub async fn metrics(
    State(state): State<AppState>,
    Query(params): Query<MetricsParams>,
) -> Result<Json<SmartReplyMetrics>, AppError> {
    let days = params.days.unwrap_or(30).clamp(1, 365);
    Ok(Json(smart_reply_service::metrics(&state.pool, days).await?))
}
