//! Consignment (stock transfer) HTTP handlers.
//!
//! This module implements the transfer endpoints:
//! - POST /api/v1/transfers - Create a draft transfer
//! - GET /api/v1/transfers - List transfers (filterable, paginated)
//! - GET /api/v1/transfers/stats - Counts by state
//! - GET /api/v1/transfers/{id} - Transfer with items and notes
//! - POST/PUT/DELETE /api/v1/transfers/{id}/items[/{item_id}] - Line items
//! - POST /api/v1/transfers/{id}/open | send | receiving | receive-all | cancel
//! - POST /api/v1/transfers/{id}/items/{item_id}/receive - Receive one line
//! - POST /api/v1/transfers/{id}/notes - Add a note
//! - GET /api/v1/transfers/{id}/events - Audit trail
//! - GET /api/v1/products/search - Product lookup for the item picker

use crate::{
    db::Paginated,
    error::AppError,
    middleware::auth::AuthContext,
    models::transfer::{
        AddItemRequest, CancelRequest, CreateTransferRequest, NoteRequest, ProductRow, ProductSearchParams,
        ReceiveItemRequest, SendRequest, Transfer, TransferDetail, TransferEvent, TransferFilter, TransferItem,
        TransferNote, TransferStats, UpdateItemRequest,
    },
    services::transfer_service::{self, PosSync},
    state::AppState,
};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

fn pos_sync(state: &AppState) -> PosSync<'_> {
    PosSync {
        vend: &state.vend,
        enabled: state.config.consignment_sync_enabled,
    }
}

/// Create a draft transfer.
///
/// # Endpoint
///
/// `POST /api/v1/transfers`
///
/// # Request Body
///
/// ```json
/// {
///   "type": "STOCK_TRANSFER",
///   "outlet_from": "outlet-1",
///   "outlet_to": "outlet-2",
///   "notes": "Weekly top-up"
/// }
/// ```
///
/// `PURCHASE_ORDER` transfers take a `supplier_id` instead of `outlet_from`.
///
/// # Response
///
/// - **Success (201 Created)**: the transfer in state `DRAFT` with its
///   generated reference code
/// - **Error (400)**: unknown type or missing parties
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<CreateTransferRequest>,
) -> Result<(StatusCode, Json<Transfer>), AppError> {
    let transfer = transfer_service::create(&state.pool, auth.staff_id, &auth.staff_name, request).await?;
    Ok((StatusCode::CREATED, Json(transfer)))
}

pub async fn list(
    State(state): State<AppState>,
    Query(filter): Query<TransferFilter>,
) -> Result<Json<Paginated<Transfer>>, AppError> {
    Ok(Json(transfer_service::list(&state.pool, &filter).await?))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<TransferStats>, AppError> {
    Ok(Json(transfer_service::stats(&state.pool).await?))
}

pub async fn get(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<TransferDetail>, AppError> {
    Ok(Json(transfer_service::get(&state.pool, id).await?))
}

pub async fn add_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<AddItemRequest>,
) -> Result<(StatusCode, Json<TransferItem>), AppError> {
    let item =
        transfer_service::add_item(&state.pool, id, &auth.staff_name, &request.product_id, request.quantity).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

/// Change a line's quantity. A quantity of zero or less removes the line and
/// answers 204.
pub async fn update_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateItemRequest>,
) -> Result<Response, AppError> {
    let item = transfer_service::update_item(&state.pool, id, item_id, &auth.staff_name, request.quantity).await?;
    Ok(match item {
        Some(item) => Json(item).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

pub async fn remove_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, AppError> {
    transfer_service::remove_item(&state.pool, id, item_id, &auth.staff_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn open(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transfer>, AppError> {
    Ok(Json(transfer_service::open(&state.pool, id, &auth.staff_name).await?))
}

/// Mark a transfer as sent.
///
/// # Endpoint
///
/// `POST /api/v1/transfers/{id}/send`
///
/// # Request Body
///
/// ```json
/// { "total_boxes": 3 }
/// ```
///
/// When POS sync is enabled the consignment is pushed to the POS first;
/// a POS failure leaves the transfer unchanged and answers 502.
pub async fn send(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<SendRequest>,
) -> Result<Json<Transfer>, AppError> {
    let transfer =
        transfer_service::mark_sent(&state.pool, pos_sync(&state), id, &auth.staff_name, request.total_boxes).await?;
    Ok(Json(transfer))
}

pub async fn receiving(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transfer>, AppError> {
    Ok(Json(transfer_service::mark_receiving(&state.pool, id, &auth.staff_name).await?))
}

pub async fn receive_item(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<ReceiveItemRequest>,
) -> Result<Json<TransferItem>, AppError> {
    let item =
        transfer_service::receive_item(&state.pool, id, item_id, &auth.staff_name, request.quantity_received).await?;
    Ok(Json(item))
}

pub async fn receive_all(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
) -> Result<Json<Transfer>, AppError> {
    Ok(Json(
        transfer_service::receive_all(&state.pool, pos_sync(&state), id, &auth.staff_name).await?,
    ))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Transfer>, AppError> {
    Ok(Json(
        transfer_service::cancel(&state.pool, pos_sync(&state), id, &auth.staff_name, &request.reason).await?,
    ))
}

pub async fn add_note(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(id): Path<Uuid>,
    Json(request): Json<NoteRequest>,
) -> Result<(StatusCode, Json<TransferNote>), AppError> {
    let note = transfer_service::add_note(&state.pool, id, &auth.staff_name, &request.note).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

pub async fn events(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Vec<TransferEvent>>, AppError> {
    Ok(Json(transfer_service::events(&state.pool, id).await?))
}

pub async fn search_products(
    State(state): State<AppState>,
    Query(params): Query<ProductSearchParams>,
) -> Result<Json<Vec<ProductRow>>, AppError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    Ok(Json(transfer_service::search_products(&state.pool, &params.q, limit).await?))
}
