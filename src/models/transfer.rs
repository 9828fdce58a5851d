//! Consignment (stock transfer) models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::PageParams;
use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferType {
    StockTransfer,
    PurchaseOrder,
    SupplierReturn,
    OutletReturn,
    Adjustment,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StockTransfer => "STOCK_TRANSFER",
            Self::PurchaseOrder => "PURCHASE_ORDER",
            Self::SupplierReturn => "SUPPLIER_RETURN",
            Self::OutletReturn => "OUTLET_RETURN",
            Self::Adjustment => "ADJUSTMENT",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "STOCK_TRANSFER" => Ok(Self::StockTransfer),
            "PURCHASE_ORDER" => Ok(Self::PurchaseOrder),
            "SUPPLIER_RETURN" => Ok(Self::SupplierReturn),
            "OUTLET_RETURN" => Ok(Self::OutletReturn),
            "ADJUSTMENT" => Ok(Self::Adjustment),
            other => Err(AppError::InvalidRequest(format!("Unknown transfer type: {}", other))),
        }
    }

    /// Reference prefix, e.g. `ST` in `ST-20250316-001`.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::StockTransfer => "ST",
            Self::PurchaseOrder => "PO",
            Self::SupplierReturn => "SR",
            Self::OutletReturn => "OR",
            Self::Adjustment => "ADJ",
        }
    }

    /// Consignment type the POS uses for this kind of transfer.
    pub fn pos_type(&self) -> &'static str {
        match self {
            Self::StockTransfer | Self::OutletReturn => "OUTLET",
            Self::PurchaseOrder => "SUPPLIER",
            Self::SupplierReturn => "RETURN",
            Self::Adjustment => "STOCKTAKE",
        }
    }
}

/// Lifecycle of a transfer.
///
/// ```text
/// DRAFT → OPEN → SENT → RECEIVING → RECEIVED
///               SENT ─────────────→ RECEIVED
/// any non-terminal state → CANCELLED
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferState {
    Draft,
    Open,
    Sent,
    Receiving,
    Received,
    Cancelled,
}

impl TransferState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "DRAFT",
            Self::Open => "OPEN",
            Self::Sent => "SENT",
            Self::Receiving => "RECEIVING",
            Self::Received => "RECEIVED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "DRAFT" => Ok(Self::Draft),
            "OPEN" => Ok(Self::Open),
            "SENT" => Ok(Self::Sent),
            "RECEIVING" => Ok(Self::Receiving),
            "RECEIVED" => Ok(Self::Received),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(AppError::InvalidRequest(format!("Unknown transfer state: {}", other))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Received | Self::Cancelled)
    }

    pub fn can_transition_to(&self, next: TransferState) -> bool {
        use TransferState::*;
        if self.is_terminal() {
            return false;
        }
        next == Cancelled
            || matches!(
                (self, next),
                (Draft, Open) | (Open, Sent) | (Sent, Receiving) | (Sent, Received) | (Receiving, Received)
            )
    }

    /// Items may only be added, changed or removed before sending.
    pub fn items_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::Open)
    }
}

/// Row of `transfers`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Transfer {
    pub id: Uuid,

    /// `PREFIX-YYYYMMDD-NNN`
    pub reference: String,

    pub transfer_type: String,
    pub state: String,
    pub outlet_from: Option<String>,
    pub outlet_to: Option<String>,
    pub supplier_id: Option<String>,
    pub notes: Option<String>,
    pub total_boxes: Option<i32>,

    /// POS consignment id, once pushed
    pub vend_consignment_id: Option<String>,

    pub created_by: Option<Uuid>,
    pub sent_at: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    pub fn state(&self) -> Result<TransferState, AppError> {
        TransferState::parse(&self.state)
    }

    pub fn kind(&self) -> Result<TransferType, AppError> {
        TransferType::parse(&self.transfer_type)
    }
}

/// Row of `transfer_items`. Removed lines keep their row with `deleted_at` set.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TransferItem {
    pub id: Uuid,
    pub transfer_id: Uuid,
    pub product_id: String,
    pub product_name: Option<String>,
    pub sku: Option<String>,
    pub quantity: i32,
    pub quantity_received: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TransferNote {
    pub id: Uuid,
    pub transfer_id: Uuid,
    pub note: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct TransferEvent {
    pub id: Uuid,
    pub transfer_id: Uuid,
    pub action: String,
    pub actor: Option<String>,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A transfer with its live item lines and notes.
#[derive(Debug, Serialize)]
pub struct TransferDetail {
    #[serde(flatten)]
    pub transfer: Transfer,
    pub items: Vec<TransferItem>,
    pub notes: Vec<TransferNote>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTransferRequest {
    #[serde(rename = "type")]
    pub transfer_type: String,

    #[serde(default)]
    pub outlet_from: Option<String>,

    #[serde(default)]
    pub outlet_to: Option<String>,

    #[serde(default)]
    pub supplier_id: Option<String>,

    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub product_id: String,
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct SendRequest {
    #[serde(default = "default_boxes")]
    pub total_boxes: i32,
}

fn default_boxes() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct ReceiveItemRequest {
    pub quantity_received: i32,
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct NoteRequest {
    pub note: String,
}

/// Query string of `GET /api/v1/transfers`.
#[derive(Debug, Default, Deserialize)]
pub struct TransferFilter {
    #[serde(default, rename = "type")]
    pub transfer_type: Option<String>,

    #[serde(default)]
    pub state: Option<String>,

    /// Matches either end of the transfer
    #[serde(default)]
    pub outlet: Option<String>,

    #[serde(default)]
    pub q: Option<String>,

    #[serde(default)]
    pub page: Option<i64>,

    #[serde(default)]
    pub per_page: Option<i64>,
}

impl TransferFilter {
    pub fn page_params(&self) -> PageParams {
        let defaults = PageParams::default();
        PageParams {
            page: self.page.unwrap_or(defaults.page),
            per_page: self.per_page.unwrap_or(defaults.per_page),
        }
    }
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct TransferStateCount {
    pub state: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct TransferStats {
    pub total: i64,
    pub by_state: Vec<TransferStateCount>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct ProductRow {
    pub id: String,
    pub name: String,
    pub sku: Option<String>,
    pub handle: Option<String>,
    pub supply_price_cents: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ProductSearchParams {
    #[serde(default)]
    pub q: String,

    #[serde(default)]
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_transitions() {
        use TransferState::*;
        assert!(Draft.can_transition_to(Open));
        assert!(Open.can_transition_to(Sent));
        assert!(Sent.can_transition_to(Received));
        assert!(Sent.can_transition_to(Receiving));
        assert!(Receiving.can_transition_to(Cancelled));

        assert!(!Draft.can_transition_to(Sent));
        assert!(!Open.can_transition_to(Receiving));
        assert!(!Received.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Open));
        assert!(!Receiving.can_transition_to(Sent));
    }

    #[test]
    fn test_every_non_terminal_state_can_cancel() {
        use TransferState::*;
        for state in [Draft, Open, Sent, Receiving] {
            assert!(!state.is_terminal());
            assert!(state.can_transition_to(Cancelled), "{:?}", state);
        }
        assert!(Received.is_terminal() && Cancelled.is_terminal());
        assert!(!Cancelled.can_transition_to(Cancelled));
        assert!(!Received.can_transition_to(Received));
    }

    #[test]
    fn test_type_parse_and_prefix() {
        assert_eq!(TransferType::parse("stock_transfer").unwrap(), TransferType::StockTransfer);
        assert_eq!(TransferType::parse("ADJUSTMENT").unwrap().prefix(), "ADJ");
        assert_eq!(TransferType::PurchaseOrder.prefix(), "PO");
        assert!(TransferType::parse("GIFT").is_err());
    }

    #[test]
    fn test_filter_page_params_default() {
        let filter = TransferFilter {
            per_page: Some(500),
            ..Default::default()
        };
        let params = filter.page_params();
        assert_eq!(params.page(), 1);
        assert_eq!(params.per_page(), 100);
    }
}
