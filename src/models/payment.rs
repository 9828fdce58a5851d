//! Staff self-payment models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Row of `staff_payment_transactions`.
///
/// # Status Flow
///
/// `pending` → `processing` (hosted card session open) → `completed` | `failed`.
/// Bank transfers stay `pending` until reconciled manually; saved cards
/// go straight to `completed` or `failed`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct StaffPayment {
    pub id: Uuid,

    /// `txn_` + 24 hex characters
    pub transaction_id: String,

    /// `PAY_` + 12 uppercase hex characters, quoted to the staff member
    pub request_id: String,

    pub staff_id: Uuid,
    pub reconciliation_id: Uuid,
    pub amount_cents: i64,
    pub method: String,
    pub status: String,
    pub gateway_reference: Option<String>,
    pub gateway_response: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    NewCard,
    BankTransfer,
    SavedCard(Uuid),
}

impl PaymentMethod {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim() {
            "new_card" => Ok(Self::NewCard),
            "bank_transfer" => Ok(Self::BankTransfer),
            other => other
                .strip_prefix("saved_card:")
                .and_then(|id| Uuid::parse_str(id).ok())
                .map(Self::SavedCard)
                .ok_or_else(|| AppError::InvalidRequest("Invalid payment method".to_string())),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Self::NewCard => "new_card".to_string(),
            Self::BankTransfer => "bank_transfer".to_string(),
            Self::SavedCard(id) => format!("saved_card:{}", id),
        }
    }
}

/// Row of `staff_saved_cards`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SavedCard {
    pub id: Uuid,
    pub staff_id: Uuid,
    pub token: String,
    pub last4: String,
    pub is_active: bool,
}

/// Body of `POST /api/v1/payments`.
#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub reconciliation_id: Uuid,
    pub amount_cents: i64,
    pub method: String,
}

#[derive(Debug, Default, Serialize)]
pub struct PaymentResponse {
    pub transaction_id: String,
    pub request_id: String,
    pub status: String,
    pub amount_cents: i64,
    pub requires_completion: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,

    /// Reference to quote on a bank transfer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_reference: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance_cents: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vend_sync: Option<bool>,
}

/// Gateway notification for a hosted card session.
#[derive(Debug, Deserialize)]
pub struct GatewayCallback {
    /// Our `txn_` id, sent to the gateway as the session reference
    pub reference: String,
    pub status: String,

    #[serde(default)]
    pub payment_id: Option<String>,

    #[serde(default)]
    pub message: Option<String>,
}

impl GatewayCallback {
    pub fn is_success(&self) -> bool {
        matches!(self.status.to_ascii_lowercase().as_str(), "approved" | "succeeded" | "completed")
    }
}

#[derive(Debug, Serialize)]
pub struct CallbackResult {
    pub transaction_id: String,
    pub status: String,

    /// `false` when the payment had already been settled
    pub changed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_methods() {
        assert_eq!(PaymentMethod::parse("new_card").unwrap(), PaymentMethod::NewCard);
        assert_eq!(PaymentMethod::parse(" bank_transfer ").unwrap(), PaymentMethod::BankTransfer);

        let id = Uuid::new_v4();
        let method = PaymentMethod::parse(&format!("saved_card:{}", id)).unwrap();
        assert_eq!(method, PaymentMethod::SavedCard(id));
        assert_eq!(method.label(), format!("saved_card:{}", id));
    }

    #[test]
    fn test_parse_rejects_unknown_methods() {
        assert!(PaymentMethod::parse("cash").is_err());
        assert!(PaymentMethod::parse("saved_card:").is_err());
        assert!(PaymentMethod::parse("saved_card:12").is_err());
    }

    #[test]
    fn test_callback_success_statuses() {
        let cb: GatewayCallback = serde_json::from_str(r#"{"reference":"txn_1","status":"APPROVED"}"#).unwrap();
        assert!(cb.is_success());

        let cb: GatewayCallback = serde_json::from_str(r#"{"reference":"txn_1","status":"declined"}"#).unwrap();
        assert!(!cb.is_success());
    }
}
