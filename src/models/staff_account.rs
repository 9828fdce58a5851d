//! Staff account models: the per-staff reconciliation row, credit limits
//! and their audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Row of `staff_account_reconciliation`.
///
/// `vend_balance_cents` is the POS account balance: negative means the
/// staff member owes the store. A `credit_limit_cents` of 0 means the
/// company default applies.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct StaffAccount {
    pub id: Uuid,
    pub staff_id: Uuid,
    pub employee_name: String,
    pub vend_customer_id: Option<String>,
    pub credit_account_id: Option<String>,
    pub vend_balance_cents: i64,
    pub credit_limit_cents: i64,
    pub total_payments_ytd_cents: i64,
    pub last_payment_amount_cents: Option<i64>,
    pub last_payment_at: Option<DateTime<Utc>>,
    pub total_allocated_cents: i64,
    pub outstanding_cents: i64,

    /// `pending`, `clear`, `owes` or `credit`
    pub status: String,

    pub archived: bool,
    pub vend_last_synced_at: Option<DateTime<Utc>>,
    pub last_reconciled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StaffAccount {
    /// Amount the staff member owes the store, never negative.
    pub fn owed_cents(&self) -> i64 {
        (-self.vend_balance_cents).max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconciliationStatus {
    Clear,
    Owes,
    Credit,
}

impl ReconciliationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::Owes => "owes",
            Self::Credit => "credit",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReconcileResult {
    pub reconciliation_id: Uuid,
    pub employee_name: String,
    pub owed_cents: i64,
    pub pending_deductions_cents: i64,
    pub total_allocated_cents: i64,
    pub outstanding_cents: i64,
    pub status: ReconciliationStatus,
}

#[derive(Debug, Default, Serialize)]
pub struct ReconcileAllResult {
    pub reconciled: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct ReconciliationSummary {
    pub total_accounts: i64,
    pub clear_count: i64,
    pub owes_count: i64,
    pub credit_count: i64,
    pub pending_count: i64,
    pub total_owed_cents: i64,
    pub total_outstanding_cents: i64,
}

/// Why a credit limit changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditChangeType {
    IndividualOverride,
    CompanyDefault,
    LightspeedSync,
}

impl CreditChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IndividualOverride => "individual_override",
            Self::CompanyDefault => "company_default",
            Self::LightspeedSync => "lightspeed_sync",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreditLimitView {
    pub reconciliation_id: Uuid,
    pub credit_limit_cents: i64,

    /// Stored limit, or the company default when none is stored
    pub effective_limit_cents: i64,

    pub credit_account_id: Option<String>,
    pub is_override: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DefaultCreditLimit {
    pub limit_cents: i64,
}

/// Body of `PUT /api/v1/credit-limits/{id}`.
#[derive(Debug, Deserialize)]
pub struct SetCreditLimitRequest {
    pub limit_cents: i64,

    #[serde(default = "default_override")]
    pub is_override: bool,
}

fn default_override() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct BulkCreditLimitUpdate {
    pub id: Uuid,
    pub limit_cents: i64,
}

#[derive(Debug, Deserialize)]
pub struct BulkCreditLimitRequest {
    pub updates: Vec<BulkCreditLimitUpdate>,
}

#[derive(Debug, Default, Serialize)]
pub struct BulkCreditLimitResult {
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct CreditSyncResult {
    pub synced: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
pub struct ApplyDefaultResult {
    pub limit_cents: i64,
    pub updated: usize,
}

/// Row of `staff_account_audit_log`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CreditLimitAudit {
    pub id: Uuid,
    pub reconciliation_id: Uuid,
    pub old_value_cents: Option<i64>,
    pub new_value_cents: i64,
    pub change_type: String,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CreditRisk {
    Unlimited,
    High,
    Medium,
    Low,
}

#[derive(Debug, Serialize)]
pub struct CreditUtilization {
    pub reconciliation_id: Uuid,
    pub employee_name: String,
    pub credit_limit_cents: i64,
    pub effective_limit_cents: i64,
    pub owed_cents: i64,
    pub utilization_percent: f64,
    pub risk_level: CreditRisk,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_credit_limit_defaults_to_override() {
        let req: SetCreditLimitRequest = serde_json::from_str(r#"{"limit_cents": 25000}"#).unwrap();
        assert!(req.is_override);
        assert_eq!(req.limit_cents, 25000);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(ReconciliationStatus::Owes).unwrap(), "owes");
        assert_eq!(ReconciliationStatus::Credit.as_str(), "credit");
        assert_eq!(CreditChangeType::LightspeedSync.as_str(), "lightspeed_sync");
    }
}
