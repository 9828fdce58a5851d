//! ID verification HTTP handlers.
//!
//! - POST /api/v1/crm/customers/{id}/id-verification - Upload and score a document
//! - GET /api/v1/crm/customers/{id}/id-verification - Latest verification
//! - POST /api/v1/id-verifications/{id}/approve - Manual approval (admin)
//! - POST /api/v1/id-verifications/{id}/reject - Manual rejection (admin)

use std::path::Path as FsPath;

use crate::{
    error::AppError,
    middleware::auth::AuthContext,
    models::id_verification::{ApproveRequest, IdVerification, RejectRequest, UploadIdRequest},
    services::id_verification_service::{self, OcrSettings},
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

/// Upload an identity document for a customer.
///
/// # Request Body
///
/// ```json
/// {
///   "image_base64": "data:image/jpeg;base64,/9j/4AAQ...",
///   "mime_type": "image/jpeg",
///   "document_type": "drivers_license",
///   "issue_date": "2020-05-01"
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: the verification with its score, status
///   and any issues found
/// - **Error (400)**: bad image, unsupported document type or an image over 5 MB
/// - **Error (404)**: customer not found
pub async fn upload(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(customer_id): Path<Uuid>,
    Json(request): Json<UploadIdRequest>,
) -> Result<(StatusCode, Json<IdVerification>), AppError> {
    let settings = OcrSettings {
        upload_dir: FsPath::new(&state.config.id_upload_dir),
        tesseract_bin: &state.config.tesseract_bin,
    };
    let verification =
        id_verification_service::upload(&state.pool, settings, customer_id, auth.staff_id, request).await?;
    Ok((StatusCode::CREATED, Json(verification)))
}

pub async fn latest(
    State(state): State<AppState>,
    Path(customer_id): Path<Uuid>,
) -> Result<Json<IdVerification>, AppError> {
    Ok(Json(id_verification_service::latest(&state.pool, customer_id).await?))
}

pub async fn approve(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    request: Option<Json<ApproveRequest>>,
) -> Result<Json<IdVerification>, AppError> {
    auth.require_admin()?;
    let request = request.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(
        id_verification_service::approve(&state.pool, id, auth.staff_id, request.notes).await?,
    ))
}

pub async fn reject(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<RejectRequest>,
) -> Result<Json<IdVerification>, AppError> {
    auth.require_admin()?;
    Ok(Json(
        id_verification_service::reject(&state.pool, id, auth.staff_id, &request.reason).await?,
    ))
}
