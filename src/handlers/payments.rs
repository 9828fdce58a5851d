//! Staff self-payment HTTP handlers.
//!
//! - POST /api/v1/payments - Pay towards the caller's own staff account
//! - GET /api/v1/payments - The caller's payment history
//! - POST /api/v1/payments/callback - Gateway result callback (public, signed)

use crate::{
    clients::gateway::SIGNATURE_HEADER,
    error::AppError,
    middleware::auth::AuthContext,
    models::payment::{CallbackResult, PaymentRequest, PaymentResponse, StaffPayment},
    services::payment_service::{self, PaymentContext},
    state::AppState,
};
use axum::{
    Extension, Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};

/// Start or complete a payment against the caller's staff account.
///
/// # Endpoint
///
/// `POST /api/v1/payments`
///
/// # Request Body
///
/// ```json
/// {
///   "reconciliation_id": "550e8400-e29b-41d4-a716-446655440000",
///   "amount_cents": 2500,
///   "method": "card"
/// }
/// ```
///
/// `method` is one of `card`, `saved_card` or `bank_transfer`.
///
/// # Response
///
/// - **Success (200 OK)**: payment record with a redirect URL for card
///   payments or a bank reference for transfers
/// - **Error (400)**: amount out of range or above the account balance
/// - **Error (429)**: too many payment attempts
/// - **Error (502)**: gateway or POS failure
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<PaymentRequest>,
) -> Result<Json<PaymentResponse>, AppError> {
    let ctx = PaymentContext {
        gateway: &state.gateway,
        vend: &state.vend,
        payment_type_id: &state.config.vend_payment_type_id,
        limiter: &state.payment_limiter,
    };
    let response = payment_service::process_payment(&state.pool, &ctx, auth.staff_id, &request).await?;
    Ok(Json(response))
}

pub async fn history(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
) -> Result<Json<Vec<StaffPayment>>, AppError> {
    Ok(Json(payment_service::payment_history(&state.pool, auth.staff_id).await?))
}

/// Gateway callback.
///
/// The raw body is verified against the HMAC in the signature header
/// before it is parsed; an invalid signature answers 401.
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CallbackResult>, AppError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    let result = payment_service::handle_callback(
        &state.pool,
        &state.vend,
        &state.config.vend_payment_type_id,
        &state.config.payment_gateway_secret,
        &body,
        signature,
    )
    .await?;

    Ok(Json(result))
}
