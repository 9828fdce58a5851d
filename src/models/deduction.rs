//! Payroll deduction and allocation models.
//!
//! A deduction is a staff-account line withheld from an employee's pay.
//! Allocation turns it into one or more POS payments against the
//! employee's open on-account sales.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Deduction record from `xero_payroll_deductions`.
///
/// # Status
///
/// - `pending`: not yet applied to the POS
/// - `allocated`: applied; `vend_payment_id` holds the comma-joined POS payment ids
/// - `failed`: last attempt failed; `allocation_error` says why
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Deduction {
    pub id: Uuid,
    pub payroll_id: Uuid,
    pub xero_employee_id: String,
    pub employee_name: String,
    pub deduction_type_id: String,
    pub deduction_name: String,

    /// Amount withheld, in cents
    pub amount_cents: i64,

    /// POS customer the deduction pays into; NULL until the employee is mapped
    pub vend_customer_id: Option<String>,

    pub status: String,
    pub allocated_amount_cents: i64,
    pub vend_payment_id: Option<String>,
    pub allocated_at: Option<DateTime<Utc>>,
    pub allocation_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeductionStatus {
    Pending,
    Allocated,
    Failed,
}

impl DeductionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeductionStatus::Pending => "pending",
            DeductionStatus::Allocated => "allocated",
            DeductionStatus::Failed => "failed",
        }
    }
}

/// An open on-account sale with money still owing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpenSale {
    pub id: String,
    pub sale_date: Option<DateTime<Utc>>,

    /// Amount still owed on the sale, in cents
    pub due_cents: i64,
}

/// Row shape of the local `vend_sales` mirror used to find open sales.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VendSaleRow {
    pub id: String,
    pub sale_date: Option<DateTime<Utc>>,
    pub total_to_pay_cents: Option<i64>,
    pub total_price_cents: i64,
    pub total_paid_cents: i64,
}

impl From<VendSaleRow> for OpenSale {
    fn from(row: VendSaleRow) -> Self {
        let due_cents = (row.total_to_pay_cents.unwrap_or(row.total_price_cents) - row.total_paid_cents).max(0);
        OpenSale {
            id: row.id,
            sale_date: row.sale_date,
            due_cents,
        }
    }
}

/// One payment to record against one sale.
#[derive(Debug, Clone, Serialize)]
pub struct SalePayment {
    pub register_sale_id: String,
    pub amount_cents: i64,
    pub payment_type_id: String,
    pub payment_date: DateTime<Utc>,
    pub label: String,
}

/// A payment the greedy loop made (or would make in a dry run).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedPayment {
    pub sale_id: String,
    pub amount_cents: i64,

    /// POS payment id; `None` in a dry run
    pub payment_id: Option<String>,

    pub due_before_cents: i64,
}

/// Result of spreading one amount over a customer's open sales.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AllocationOutcome {
    pub applied_cents: i64,
    pub remaining_cents: i64,
    pub payments: Vec<AppliedPayment>,

    /// Per-sale failures that did not stop the loop
    pub sale_errors: Vec<String>,

    /// Set when nothing could be applied
    pub error: Option<String>,
}

impl AllocationOutcome {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }

    /// POS payment ids joined the way they are stored on the deduction.
    pub fn payment_ids(&self) -> String {
        self.payments
            .iter()
            .filter_map(|p| p.payment_id.as_deref())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Body of `POST /api/v1/deductions/{id}/allocate`.
#[derive(Debug, Default, Deserialize)]
pub struct AllocateRequest {
    /// Plan only; nothing is written to the POS or the database
    #[serde(default)]
    pub dry_run: bool,

    /// Read open sales from the live POS search instead of the local mirror
    #[serde(default)]
    pub live: bool,
}

/// Response for a single deduction allocation.
#[derive(Debug, Serialize)]
pub struct AllocationResult {
    pub deduction_id: Uuid,
    pub success: bool,
    pub dry_run: bool,
    pub status: String,
    pub applied_cents: i64,
    pub remaining_cents: i64,
    pub payments: Vec<AppliedPayment>,
    pub error: Option<String>,
}

/// Response for bulk allocation runs.
#[derive(Debug, Default, Serialize)]
pub struct BulkAllocationResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Row of `payment_allocation_log`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AllocationLogEntry {
    pub id: Uuid,
    pub deduction_id: Uuid,
    pub vend_customer_id: Option<String>,
    pub employee_name: String,
    pub action: String,
    pub amount_cents: i64,
    pub vend_payment_id: Option<String>,
    pub success: bool,
    pub error_message: Option<String>,
    pub performed_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// Pending deductions grouped by POS customer.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct PendingCustomerSummary {
    pub vend_customer_id: Option<String>,
    pub employee_name: String,
    pub deduction_count: i64,
    pub total_cents: i64,
    pub oldest_period_start: Option<NaiveDate>,
}

/// Count, total and average per deduction status.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct AllocationStatusStat {
    pub status: String,
    pub count: i64,
    pub total_cents: i64,
    pub average_cents: f64,
}

#[derive(Debug, Serialize)]
pub struct AllocationSuccessRate {
    pub days: i64,
    pub attempts: i64,
    pub successful: i64,
    pub success_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct RetryAllResult {
    pub reset_count: u64,
}

#[derive(Debug, Deserialize)]
pub struct DeductionFilter {
    #[serde(default)]
    pub customer: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    #[serde(default)]
    pub limit: Option<i64>,

    #[serde(default)]
    pub days: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sale_row_due_uses_to_pay_when_present() {
        let row = VendSaleRow {
            id: "s1".into(),
            sale_date: None,
            total_to_pay_cents: Some(5000),
            total_price_cents: 9000,
            total_paid_cents: 1000,
        };
        assert_eq!(OpenSale::from(row).due_cents, 4000);

        let row = VendSaleRow {
            id: "s2".into(),
            sale_date: None,
            total_to_pay_cents: None,
            total_price_cents: 9000,
            total_paid_cents: 9500,
        };
        assert_eq!(OpenSale::from(row).due_cents, 0);
    }

    #[test]
    fn test_payment_ids_skip_dry_run_entries() {
        let outcome = AllocationOutcome {
            payments: vec![
                AppliedPayment {
                    sale_id: "a".into(),
                    amount_cents: 100,
                    payment_id: Some("p1".into()),
                    due_before_cents: 100,
                },
                AppliedPayment {
                    sale_id: "b".into(),
                    amount_cents: 50,
                    payment_id: None,
                    due_before_cents: 80,
                },
                AppliedPayment {
                    sale_id: "c".into(),
                    amount_cents: 10,
                    payment_id: Some("p3".into()),
                    due_before_cents: 10,
                },
            ],
            ..Default::default()
        };
        assert_eq!(outcome.payment_ids(), "p1,p3");
    }
}
