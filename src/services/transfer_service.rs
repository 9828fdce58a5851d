//! Consignment (stock transfer) service.
//!
//! Every state change runs in a transaction holding the transfer row lock
//! and writes a `transfer_events` row. Pushing to the POS happens after
//! commit and never undoes a local transition.

use chrono::{NaiveDate, Utc};
use serde_json::json;
use uuid::Uuid;

use crate::clients::vend::{ConsignmentPayload, VendClient};
use crate::db::{DbPool, Paginated, contains_pattern};
use crate::error::AppError;
use crate::models::transfer::{
    CreateTransferRequest, ProductRow, Transfer, TransferDetail, TransferEvent, TransferFilter, TransferItem,
    TransferNote, TransferState, TransferStateCount, TransferStats, TransferType,
};

/// POS consignment push settings.
#[derive(Clone, Copy)]
pub struct PosSync<'a> {
    pub vend: &'a VendClient,
    pub enabled: bool,
}

type Tx<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

/// `PREFIX-YYYYMMDD-NNN`
pub fn reference_code(prefix: &str, date: NaiveDate, sequence: i64) -> String {
    format!("{}-{}-{:03}", prefix, date.format("%Y%m%d"), sequence)
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Outlet and supplier requirements per transfer type.
pub fn validate_parties(kind: TransferType, request: &CreateTransferRequest) -> Result<(), AppError> {
    let from = present(&request.outlet_from);
    let to = present(&request.outlet_to);

    match kind {
        TransferType::StockTransfer | TransferType::OutletReturn => match (from, to) {
            (Some(f), Some(t)) if f != t => Ok(()),
            (Some(_), Some(_)) => Err(AppError::InvalidRequest(
                "Source and destination outlets must be different".to_string(),
            )),
            _ => Err(AppError::InvalidRequest(
                "Source and destination outlets are required".to_string(),
            )),
        },
        TransferType::PurchaseOrder => {
            if present(&request.supplier_id).is_none() {
                return Err(AppError::InvalidRequest("Supplier is required for purchase orders".to_string()));
            }
            if to.is_none() {
                return Err(AppError::InvalidRequest("Destination outlet is required".to_string()));
            }
            Ok(())
        }
        TransferType::SupplierReturn | TransferType::Adjustment => {
            if from.is_none() && to.is_none() {
                return Err(AppError::InvalidRequest("An outlet is required".to_string()));
            }
            Ok(())
        }
    }
}

pub fn ensure_transition(current: TransferState, next: TransferState) -> Result<(), AppError> {
    if current.can_transition_to(next) {
        Ok(())
    } else {
        Err(AppError::InvalidState(format!(
            "Cannot move transfer from {} to {}",
            current.as_str(),
            next.as_str()
        )))
    }
}

fn ensure_items_editable(state: TransferState) -> Result<(), AppError> {
    if state.items_editable() {
        Ok(())
    } else {
        Err(AppError::InvalidState(format!(
            "Items cannot be changed while the transfer is {}",
            state.as_str()
        )))
    }
}

async fn lock_transfer(tx: &mut Tx<'_>, id: Uuid) -> Result<Transfer, AppError> {
    sqlx::query_as::<_, Transfer>("SELECT * FROM transfers WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Transfer not found".to_string()))
}

async fn record_event(
    tx: &mut Tx<'_>,
    transfer_id: Uuid,
    action: &str,
    actor: &str,
    data: serde_json::Value,
) -> Result<(), AppError> {
    sqlx::query("INSERT INTO transfer_events (transfer_id, action, actor, data) VALUES ($1, $2, $3, $4)")
        .bind(transfer_id)
        .bind(action)
        .bind(actor)
        .bind(data)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn set_state(tx: &mut Tx<'_>, id: Uuid, next: TransferState) -> Result<Transfer, AppError> {
    let transfer = sqlx::query_as::<_, Transfer>(
        r#"
        UPDATE transfers SET
            state = $2,
            sent_at = CASE WHEN $2 = 'SENT' THEN NOW() ELSE sent_at END,
            received_at = CASE WHEN $2 = 'RECEIVED' THEN NOW() ELSE received_at END,
            cancelled_at = CASE WHEN $2 = 'CANCELLED' THEN NOW() ELSE cancelled_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(next.as_str())
    .fetch_one(&mut **tx)
    .await?;
    Ok(transfer)
}

pub async fn create(
    pool: &DbPool,
    created_by: Uuid,
    actor: &str,
    request: CreateTransferRequest,
) -> Result<Transfer, AppError> {
    let kind = TransferType::parse(&request.transfer_type)?;
    validate_parties(kind, &request)?;

    let today = Utc::now().date_naive();
    let day_prefix = format!("{}-{}-", kind.prefix(), today.format("%Y%m%d"));

    let mut tx = pool.begin().await?;

    // Serializes reference allocation per prefix and day
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(&day_prefix)
        .execute(&mut *tx)
        .await?;

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM transfers WHERE reference LIKE $1")
        .bind(format!("{}%", day_prefix))
        .fetch_one(&mut *tx)
        .await?;

    let reference = reference_code(kind.prefix(), today, existing + 1);

    let transfer = sqlx::query_as::<_, Transfer>(
        r#"
        INSERT INTO transfers (reference, transfer_type, state, outlet_from, outlet_to, supplier_id, notes, created_by)
        VALUES ($1, $2, 'DRAFT', $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(&reference)
    .bind(kind.as_str())
    .bind(present(&request.outlet_from))
    .bind(present(&request.outlet_to))
    .bind(present(&request.supplier_id))
    .bind(present(&request.notes))
    .bind(created_by)
    .fetch_one(&mut *tx)
    .await?;

    record_event(&mut tx, transfer.id, "created", actor, json!({ "reference": reference, "type": kind.as_str() }))
        .await?;

    tx.commit().await?;

    tracing::info!(transfer_id = %transfer.id, reference = %transfer.reference, "Transfer created");
    Ok(transfer)
}

pub async fn get(pool: &DbPool, id: Uuid) -> Result<TransferDetail, AppError> {
    let transfer = sqlx::query_as::<_, Transfer>("SELECT * FROM transfers WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Transfer not found".to_string()))?;

    let items = sqlx::query_as::<_, TransferItem>(
        "SELECT * FROM transfer_items WHERE transfer_id = $1 AND deleted_at IS NULL ORDER BY created_at",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let notes = sqlx::query_as::<_, TransferNote>(
        "SELECT * FROM transfer_notes WHERE transfer_id = $1 ORDER BY created_at DESC",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(TransferDetail { transfer, items, notes })
}

/// Add a product line, merging into an existing line for the same product.
pub async fn add_item(
    pool: &DbPool,
    transfer_id: Uuid,
    actor: &str,
    product_id: &str,
    quantity: i32,
) -> Result<TransferItem, AppError> {
    if quantity <= 0 {
        return Err(AppError::InvalidRequest("Quantity must be greater than zero".to_string()));
    }
    let product_id = product_id.trim();
    if product_id.is_empty() {
        return Err(AppError::InvalidRequest("Product is required".to_string()));
    }

    let mut tx = pool.begin().await?;
    let transfer = lock_transfer(&mut tx, transfer_id).await?;
    ensure_items_editable(transfer.state()?)?;

    let merged = sqlx::query_as::<_, TransferItem>(
        r#"
        UPDATE transfer_items SET quantity = quantity + $3, updated_at = NOW()
        WHERE transfer_id = $1 AND product_id = $2 AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(transfer_id)
    .bind(product_id)
    .bind(quantity)
    .fetch_optional(&mut *tx)
    .await?;

    let item = match merged {
        Some(item) => item,
        None => {
            let product = sqlx::query_as::<_, ProductRow>(
                "SELECT id, name, sku, handle, supply_price_cents FROM vend_products WHERE id = $1 AND deleted_at IS NULL",
            )
            .bind(product_id)
            .fetch_optional(&mut *tx)
            .await?;

            sqlx::query_as::<_, TransferItem>(
                r#"
                INSERT INTO transfer_items (transfer_id, product_id, product_name, sku, quantity)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING *
                "#,
            )
            .bind(transfer_id)
            .bind(product_id)
            .bind(product.as_ref().map(|p| p.name.clone()))
            .bind(product.and_then(|p| p.sku))
            .bind(quantity)
            .fetch_one(&mut *tx)
            .await?
        }
    };

    record_event(
        &mut tx,
        transfer_id,
        "item_added",
        actor,
        json!({ "product_id": product_id, "quantity": quantity, "line_quantity": item.quantity }),
    )
    .await?;

    tx.commit().await?;
    Ok(item)
}

/// Change a line's quantity. A quantity of zero or less removes the line.
pub async fn update_item(
    pool: &DbPool,
    transfer_id: Uuid,
    item_id: Uuid,
    actor: &str,
    quantity: i32,
) -> Result<Option<TransferItem>, AppError> {
    if quantity <= 0 {
        remove_item(pool, transfer_id, item_id, actor).await?;
        return Ok(None);
    }

    let mut tx = pool.begin().await?;
    let transfer = lock_transfer(&mut tx, transfer_id).await?;
    ensure_items_editable(transfer.state()?)?;

    let item = sqlx::query_as::<_, TransferItem>(
        r#"
        UPDATE transfer_items SET quantity = $3, updated_at = NOW()
        WHERE id = $1 AND transfer_id = $2 AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(item_id)
    .bind(transfer_id)
    .bind(quantity)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Item not found".to_string()))?;

    record_event(&mut tx, transfer_id, "item_updated", actor, json!({ "item_id": item_id, "quantity": quantity }))
        .await?;

    tx.commit().await?;
    Ok(Some(item))
}

pub async fn remove_item(pool: &DbPool, transfer_id: Uuid, item_id: Uuid, actor: &str) -> Result<(), AppError> {
    let mut tx = pool.begin().await?;
    let transfer = lock_transfer(&mut tx, transfer_id).await?;
    ensure_items_editable(transfer.state()?)?;

    let result = sqlx::query(
        r#"
        UPDATE transfer_items SET deleted_at = NOW(), updated_at = NOW()
        WHERE id = $1 AND transfer_id = $2 AND deleted_at IS NULL
        "#,
    )
    .bind(item_id)
    .bind(transfer_id)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Item not found".to_string()));
    }

    record_event(&mut tx, transfer_id, "item_removed", actor, json!({ "item_id": item_id })).await?;
    tx.commit().await?;
    Ok(())
}

pub async fn open(pool: &DbPool, id: Uuid, actor: &str) -> Result<Transfer, AppError> {
    let mut tx = pool.begin().await?;
    let transfer = lock_transfer(&mut tx, id).await?;
    ensure_transition(transfer.state()?, TransferState::Open)?;

    let transfer = set_state(&mut tx, id, TransferState::Open).await?;
    record_event(&mut tx, id, "opened", actor, json!({})).await?;
    tx.commit().await?;
    Ok(transfer)
}

pub async fn mark_sent(
    pool: &DbPool,
    sync: PosSync<'_>,
    id: Uuid,
    actor: &str,
    total_boxes: i32,
) -> Result<Transfer, AppError> {
    if total_boxes < 1 {
        return Err(AppError::InvalidRequest("At least one box is required".to_string()));
    }

    let mut tx = pool.begin().await?;
    let transfer = lock_transfer(&mut tx, id).await?;
    ensure_transition(transfer.state()?, TransferState::Sent)?;

    let item_count: i64 =
        sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM transfer_items WHERE transfer_id = $1 AND deleted_at IS NULL")
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;
    if item_count == 0 {
        return Err(AppError::InvalidState("Cannot send a transfer with no items".to_string()));
    }

    sqlx::query("UPDATE transfers SET total_boxes = $2 WHERE id = $1")
        .bind(id)
        .bind(total_boxes)
        .execute(&mut *tx)
        .await?;

    let transfer = set_state(&mut tx, id, TransferState::Sent).await?;
    record_event(&mut tx, id, "sent", actor, json!({ "total_boxes": total_boxes, "items": item_count })).await?;
    tx.commit().await?;

    push_to_pos(pool, sync, &transfer).await;
    Ok(transfer)
}

pub async fn mark_receiving(pool: &DbPool, id: Uuid, actor: &str) -> Result<Transfer, AppError> {
    let mut tx = pool.begin().await?;
    let transfer = lock_transfer(&mut tx, id).await?;
    ensure_transition(transfer.state()?, TransferState::Receiving)?;

    let transfer = set_state(&mut tx, id, TransferState::Receiving).await?;
    record_event(&mut tx, id, "receiving_started", actor, json!({})).await?;
    tx.commit().await?;
    Ok(transfer)
}

/// Record the received quantity of one line.
///
/// Receiving against a `SENT` transfer moves it to `RECEIVING` first.
pub async fn receive_item(
    pool: &DbPool,
    transfer_id: Uuid,
    item_id: Uuid,
    actor: &str,
    quantity_received: i32,
) -> Result<TransferItem, AppError> {
    if quantity_received < 0 {
        return Err(AppError::InvalidRequest("Received quantity cannot be negative".to_string()));
    }

    let mut tx = pool.begin().await?;
    let transfer = lock_transfer(&mut tx, transfer_id).await?;

    match transfer.state()? {
        TransferState::Receiving => {}
        TransferState::Sent => {
            set_state(&mut tx, transfer_id, TransferState::Receiving).await?;
            record_event(&mut tx, transfer_id, "receiving_started", actor, json!({})).await?;
        }
        other => {
            return Err(AppError::InvalidState(format!(
                "Items cannot be received while the transfer is {}",
                other.as_str()
            )));
        }
    }

    let item = sqlx::query_as::<_, TransferItem>(
        r#"
        UPDATE transfer_items SET quantity_received = $3, updated_at = NOW()
        WHERE id = $1 AND transfer_id = $2 AND deleted_at IS NULL
        RETURNING *
        "#,
    )
    .bind(item_id)
    .bind(transfer_id)
    .bind(quantity_received)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Item not found".to_string()))?;

    record_event(
        &mut tx,
        transfer_id,
        "item_received",
        actor,
        json!({ "item_id": item_id, "quantity_received": quantity_received, "quantity": item.quantity }),
    )
    .await?;

    tx.commit().await?;
    Ok(item)
}

/// Mark every line fully received and close the transfer.
pub async fn receive_all(pool: &DbPool, sync: PosSync<'_>, id: Uuid, actor: &str) -> Result<Transfer, AppError> {
    let mut tx = pool.begin().await?;
    let transfer = lock_transfer(&mut tx, id).await?;
    ensure_transition(transfer.state()?, TransferState::Received)?;

    let lines = sqlx::query(
        r#"
        UPDATE transfer_items SET quantity_received = quantity, updated_at = NOW()
        WHERE transfer_id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let transfer = set_state(&mut tx, id, TransferState::Received).await?;
    record_event(&mut tx, id, "received", actor, json!({ "lines": lines })).await?;
    tx.commit().await?;

    push_to_pos(pool, sync, &transfer).await;
    Ok(transfer)
}

pub async fn cancel(pool: &DbPool, sync: PosSync<'_>, id: Uuid, actor: &str, reason: &str) -> Result<Transfer, AppError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::InvalidRequest("A cancellation reason is required".to_string()));
    }

    let mut tx = pool.begin().await?;
    let transfer = lock_transfer(&mut tx, id).await?;
    ensure_transition(transfer.state()?, TransferState::Cancelled)?;

    sqlx::query("UPDATE transfers SET cancel_reason = $2 WHERE id = $1")
        .bind(id)
        .bind(reason)
        .execute(&mut *tx)
        .await?;

    let transfer = set_state(&mut tx, id, TransferState::Cancelled).await?;
    record_event(&mut tx, id, "cancelled", actor, json!({ "reason": reason })).await?;
    tx.commit().await?;

    push_to_pos(pool, sync, &transfer).await;
    Ok(transfer)
}

pub async fn add_note(pool: &DbPool, id: Uuid, actor: &str, note: &str) -> Result<TransferNote, AppError> {
    let note = note.trim();
    if note.is_empty() {
        return Err(AppError::InvalidRequest("Note cannot be empty".to_string()));
    }

    let mut tx = pool.begin().await?;
    lock_transfer(&mut tx, id).await?;

    let saved = sqlx::query_as::<_, TransferNote>(
        "INSERT INTO transfer_notes (transfer_id, note, created_by) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(id)
    .bind(note)
    .bind(actor)
    .fetch_one(&mut *tx)
    .await?;

    record_event(&mut tx, id, "note_added", actor, json!({ "note_id": saved.id })).await?;
    tx.commit().await?;
    Ok(saved)
}

pub async fn events(pool: &DbPool, id: Uuid) -> Result<Vec<TransferEvent>, AppError> {
    let events = sqlx::query_as::<_, TransferEvent>(
        "SELECT * FROM transfer_events WHERE transfer_id = $1 ORDER BY created_at, id",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;
    Ok(events)
}

pub async fn list(pool: &DbPool, filter: &TransferFilter) -> Result<Paginated<Transfer>, AppError> {
    let params = filter.page_params();
    let kind = filter
        .transfer_type
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .map(TransferType::parse)
        .transpose()?
        .map(|t| t.as_str());
    let state = filter
        .state
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(TransferState::parse)
        .transpose()?
        .map(|s| s.as_str());
    let outlet = present(&filter.outlet);
    let pattern = present(&filter.q).map(contains_pattern);

    const WHERE: &str = r#"
        WHERE ($1::TEXT IS NULL OR transfer_type = $1)
          AND ($2::TEXT IS NULL OR state = $2)
          AND ($3::TEXT IS NULL OR outlet_from = $3 OR outlet_to = $3)
          AND ($4::TEXT IS NULL OR reference ILIKE $4 OR notes ILIKE $4)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*)::BIGINT FROM transfers {}", WHERE))
        .bind(kind)
        .bind(state)
        .bind(outlet)
        .bind(&pattern)
        .fetch_one(pool)
        .await?;

    let items = sqlx::query_as::<_, Transfer>(&format!(
        "SELECT * FROM transfers {} ORDER BY created_at DESC LIMIT $5 OFFSET $6",
        WHERE
    ))
    .bind(kind)
    .bind(state)
    .bind(outlet)
    .bind(&pattern)
    .bind(params.per_page())
    .bind(params.offset())
    .fetch_all(pool)
    .await?;

    Ok(Paginated::new(items, params, total))
}

pub async fn stats(pool: &DbPool) -> Result<TransferStats, AppError> {
    let by_state = sqlx::query_as::<_, TransferStateCount>(
        "SELECT state, COUNT(*)::BIGINT AS count FROM transfers GROUP BY state ORDER BY state",
    )
    .fetch_all(pool)
    .await?;

    Ok(TransferStats {
        total: by_state.iter().map(|s| s.count).sum(),
        by_state,
    })
}

pub async fn search_products(pool: &DbPool, q: &str, limit: i64) -> Result<Vec<ProductRow>, AppError> {
    let q = q.trim();
    if q.len() < 2 {
        return Err(AppError::InvalidRequest("Search query must be at least 2 characters".to_string()));
    }

    let products = sqlx::query_as::<_, ProductRow>(
        r#"
        SELECT id, name, sku, handle, supply_price_cents FROM vend_products
        WHERE deleted_at IS NULL AND (name ILIKE $1 OR sku ILIKE $1 OR handle ILIKE $1)
        ORDER BY name
        LIMIT $2
        "#,
    )
    .bind(contains_pattern(q))
    .bind(limit.clamp(1, 100))
    .fetch_all(pool)
    .await?;
    Ok(products)
}

fn consignment_payload(transfer: &Transfer, kind: TransferType, state: TransferState) -> ConsignmentPayload {
    ConsignmentPayload {
        name: transfer.reference.clone(),
        consignment_type: kind.pos_type().to_string(),
        status: state.as_str().to_string(),
        outlet_id: transfer.outlet_to.clone(),
        source_outlet_id: transfer.outlet_from.clone(),
        supplier_id: transfer.supplier_id.clone(),
    }
}

/// Mirror a transfer's state to the POS. Failures are logged only.
async fn push_to_pos(pool: &DbPool, sync: PosSync<'_>, transfer: &Transfer) {
    if !sync.enabled {
        return;
    }

    let (Ok(kind), Ok(state)) = (transfer.kind(), transfer.state()) else {
        return;
    };
    let payload = consignment_payload(transfer, kind, state);

    match sync
        .vend
        .upsert_consignment(transfer.vend_consignment_id.as_deref(), &payload)
        .await
    {
        Ok(consignment_id) => {
            if transfer.vend_consignment_id.is_none() {
                if let Err(e) = sqlx::query("UPDATE transfers SET vend_consignment_id = $2 WHERE id = $1")
                    .bind(transfer.id)
                    .bind(&consignment_id)
                    .execute(pool)
                    .await
                {
                    tracing::warn!(transfer_id = %transfer.id, error = %e, "Failed to store POS consignment id");
                }
            }
            tracing::info!(transfer_id = %transfer.id, consignment_id = %consignment_id, state = state.as_str(), "Transfer pushed to POS");
        }
        Err(e) => {
            tracing::warn!(transfer_id = %transfer.id, error = %e, "POS consignment sync failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(kind: &str, from: Option<&str>, to: Option<&str>, supplier: Option<&str>) -> CreateTransferRequest {
        CreateTransferRequest {
            transfer_type: kind.to_string(),
            outlet_from: from.map(String::from),
            outlet_to: to.map(String::from),
            supplier_id: supplier.map(String::from),
            notes: None,
        }
    }

    #[test]
    fn test_reference_code_format() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 16).unwrap();
        assert_eq!(reference_code("ST", date, 1), "ST-20250316-001");
        assert_eq!(reference_code("ADJ", date, 42), "ADJ-20250316-042");
        assert_eq!(reference_code("PO", date, 1234), "PO-20250316-1234");
    }

    #[test]
    fn test_stock_transfer_needs_two_distinct_outlets() {
        let kind = TransferType::StockTransfer;
        assert!(validate_parties(kind, &request("STOCK_TRANSFER", Some("o1"), Some("o2"), None)).is_ok());
        assert!(validate_parties(kind, &request("STOCK_TRANSFER", Some("o1"), Some("o1"), None)).is_err());
        assert!(validate_parties(kind, &request("STOCK_TRANSFER", Some("o1"), Some("  "), None)).is_err());
    }

    #[test]
    fn test_purchase_order_needs_supplier_and_destination() {
        let kind = TransferType::PurchaseOrder;
        assert!(validate_parties(kind, &request("PURCHASE_ORDER", None, Some("o2"), Some("s1"))).is_ok());
        assert!(validate_parties(kind, &request("PURCHASE_ORDER", None, Some("o2"), None)).is_err());
        assert!(validate_parties(kind, &request("PURCHASE_ORDER", Some("o1"), None, Some("s1"))).is_err());
    }

    #[test]
    fn test_invalid_transition_is_unprocessable() {
        let err = ensure_transition(TransferState::Draft, TransferState::Received).unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
        assert_eq!(err.to_string(), "Cannot move transfer from DRAFT to RECEIVED");
        assert!(ensure_transition(TransferState::Sent, TransferState::Received).is_ok());
    }

    #[test]
    fn test_items_locked_after_send() {
        assert!(ensure_items_editable(TransferState::Open).is_ok());
        assert!(ensure_items_editable(TransferState::Sent).is_err());
    }
}
