//! Payment allocation service.
//!
//! Applies payroll deductions to the POS as payments against the
//! employee's open on-account sales.
//!
//! # Allocation rule
//!
//! Open sales are taken newest first. Each sale receives
//! `min(due, remaining)` until the deduction is used up. A sale whose
//! payment fails is skipped and the next one is tried, so the total
//! applied never exceeds the deduction and no sale is paid past its due.
//!
//! # Double-charge protection
//!
//! The deduction row is locked (`FOR UPDATE`) for the whole allocation and
//! its status is checked under the lock, so two concurrent requests for the
//! same deduction serialize and the second sees `allocated`.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use crate::clients::ClientError;
use crate::clients::vend::VendClient;
use crate::db::DbPool;
use crate::error::AppError;
use crate::models::deduction::{
    AllocateRequest, AllocationLogEntry, AllocationOutcome, AllocationResult, AllocationStatusStat,
    AllocationSuccessRate, AppliedPayment, BulkAllocationResult, Deduction, DeductionStatus, OpenSale,
    PendingCustomerSummary, RetryAllResult, SalePayment, VendSaleRow,
};

pub const NO_OPEN_SALES: &str = "No open On-Account sales to allocate against";
pub const NOTHING_APPLIED: &str = "Failed to apply any payments";

/// Smallest due amount (in cents) worth allocating against.
const MIN_DUE_CENTS: i64 = 1;

/// Anything that can record a payment against a POS sale.
#[async_trait]
pub trait SalePaymentSink: Send + Sync {
    /// Record the payment and return the POS payment id.
    async fn record_payment(&self, payment: &SalePayment) -> Result<String, ClientError>;
}

/// Spread `amount_cents` across `sales` in order.
///
/// With no sink the loop only plans: every eligible sale is assumed to
/// accept its share and no payment ids are produced.
pub async fn apply_to_open_sales(
    sink: Option<&dyn SalePaymentSink>,
    sales: &[OpenSale],
    amount_cents: i64,
    payment_type_id: &str,
    note: &str,
) -> AllocationOutcome {
    let mut outcome = AllocationOutcome {
        remaining_cents: amount_cents.max(0),
        ..Default::default()
    };

    if amount_cents <= 0 {
        return outcome;
    }

    if sales.is_empty() {
        outcome.error = Some(NO_OPEN_SALES.to_string());
        return outcome;
    }

    for sale in sales {
        if outcome.remaining_cents <= 0 {
            break;
        }
        if sale.id.trim().is_empty() || sale.due_cents <= 0 {
            continue;
        }

        let amount = sale.due_cents.min(outcome.remaining_cents);

        let payment_id = match sink {
            None => None,
            Some(sink) => {
                let payment = SalePayment {
                    register_sale_id: sale.id.clone(),
                    amount_cents: amount,
                    payment_type_id: payment_type_id.to_string(),
                    payment_date: Utc::now(),
                    label: note.to_string(),
                };
                match sink.record_payment(&payment).await {
                    Ok(id) => Some(id),
                    Err(e) => {
                        tracing::warn!(sale_id = %sale.id, amount_cents = amount, error = %e, "Sale payment failed");
                        outcome.sale_errors.push(format!("Sale {}: {}", sale.id, e));
                        continue;
                    }
                }
            }
        };

        outcome.applied_cents += amount;
        outcome.remaining_cents -= amount;
        outcome.payments.push(AppliedPayment {
            sale_id: sale.id.clone(),
            amount_cents: amount,
            payment_id,
            due_before_cents: sale.due_cents,
        });
    }

    if outcome.applied_cents == 0 {
        outcome.error = Some(NOTHING_APPLIED.to_string());
    }

    outcome
}

/// Label written on every POS payment made for a deduction.
pub fn allocation_note(period_start: Option<NaiveDate>, period_end: Option<NaiveDate>) -> String {
    let fmt = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "unknown".to_string());
    format!("Payroll deduction: {} to {}", fmt(period_start), fmt(period_end))
}

/// Order sales newest first; undated sales go last.
fn sort_newest_first(sales: &mut [OpenSale]) {
    sales.sort_by(|a, b| match (a.sale_date, b.sale_date) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

/// Fetch a customer's open on-account sales with money owing, newest first.
///
/// Reads the local `vend_sales` mirror unless `live` is set.
pub async fn fetch_open_sales(
    pool: &DbPool,
    vend: &VendClient,
    customer_id: &str,
    live: bool,
) -> Result<Vec<OpenSale>, AppError> {
    let mut sales: Vec<OpenSale> = if live {
        vend.search_open_sales(customer_id)
            .await?
            .into_iter()
            .map(OpenSale::from)
            .collect()
    } else {
        sqlx::query_as::<_, VendSaleRow>(
            r#"
            SELECT id, sale_date, total_to_pay_cents, total_price_cents, total_paid_cents
            FROM vend_sales
            WHERE customer_id = $1
              AND status IN ('OPEN', 'LAYBY', 'ONACCOUNT', 'ON_ACCOUNT')
              AND deleted_at IS NULL
            ORDER BY sale_date DESC NULLS LAST, created_at DESC
            LIMIT 100
            "#,
        )
        .bind(customer_id)
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(OpenSale::from)
        .collect()
    };

    sales.retain(|s| s.due_cents > MIN_DUE_CENTS);
    sort_newest_first(&mut sales);
    Ok(sales)
}

/// Apply an arbitrary amount to a customer's open sales.
///
/// Used for staff self-payments. Fetch failures become an outcome error
/// rather than an `Err` so callers can treat the POS as best-effort.
pub async fn apply_payment_to_customer(
    pool: &DbPool,
    vend: &VendClient,
    payment_type_id: &str,
    customer_id: &str,
    amount_cents: i64,
    note: &str,
) -> AllocationOutcome {
    match fetch_open_sales(pool, vend, customer_id, false).await {
        Ok(sales) => apply_to_open_sales(Some(vend), &sales, amount_cents, payment_type_id, note).await,
        Err(e) => AllocationOutcome {
            remaining_cents: amount_cents,
            error: Some(format!("Vend API error: {}", e)),
            ..Default::default()
        },
    }
}

/// Resolve the POS customer for a deduction, falling back to the employee mapping table.
async fn resolve_customer(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    deduction: &Deduction,
) -> Result<Option<String>, AppError> {
    if let Some(customer) = deduction.vend_customer_id.as_ref().filter(|c| !c.trim().is_empty()) {
        return Ok(Some(customer.clone()));
    }

    let mapped: Option<String> = sqlx::query_scalar(
        "SELECT vend_customer_id FROM employee_mappings WHERE xero_employee_id = $1 AND status = 'mapped'",
    )
    .bind(&deduction.xero_employee_id)
    .fetch_optional(&mut **tx)
    .await?;

    if let Some(ref customer) = mapped {
        sqlx::query("UPDATE xero_payroll_deductions SET vend_customer_id = $1, updated_at = NOW() WHERE id = $2")
            .bind(customer)
            .bind(deduction.id)
            .execute(&mut **tx)
            .await?;
    }

    Ok(mapped)
}

/// Allocate a single deduction to the POS.
///
/// # Errors
///
/// - `NotFound`: no such deduction
/// - `InvalidRequest`: employee not mapped, or amount not positive
/// - `Conflict`: deduction already allocated
///
/// A POS failure is not an error: the deduction is marked `failed` and the
/// result carries the reason.
pub async fn allocate_deduction(
    pool: &DbPool,
    vend: &VendClient,
    payment_type_id: &str,
    deduction_id: Uuid,
    performed_by: Option<Uuid>,
    request: &AllocateRequest,
) -> Result<AllocationResult, AppError> {
    let mut tx = pool.begin().await?;

    let deduction = sqlx::query_as::<_, Deduction>("SELECT * FROM xero_payroll_deductions WHERE id = $1 FOR UPDATE")
        .bind(deduction_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Deduction not found".to_string()))?;

    let customer_id = resolve_customer(&mut tx, &deduction)
        .await?
        .ok_or_else(|| AppError::InvalidRequest("No Vend customer mapped for this employee".to_string()))?;

    if deduction.status == DeductionStatus::Allocated.as_str() {
        return Err(AppError::Conflict("Deduction already allocated".to_string()));
    }

    if deduction.amount_cents <= 0 {
        return Err(AppError::InvalidRequest("Deduction amount must be positive".to_string()));
    }

    let (period_start, period_end): (Option<NaiveDate>, Option<NaiveDate>) =
        sqlx::query_as("SELECT period_start, period_end FROM xero_payrolls WHERE id = $1")
            .bind(deduction.payroll_id)
            .fetch_optional(&mut *tx)
            .await?
            .unwrap_or((None, None));
    let note = allocation_note(period_start, period_end);

    let sales = fetch_open_sales(pool, vend, &customer_id, request.live).await;

    if request.dry_run {
        tx.rollback().await?;
        let outcome = match sales {
            Ok(sales) => apply_to_open_sales(None, &sales, deduction.amount_cents, payment_type_id, &note).await,
            Err(e) => return Err(e),
        };
        return Ok(AllocationResult {
            deduction_id,
            success: outcome.success(),
            dry_run: true,
            status: deduction.status,
            applied_cents: outcome.applied_cents,
            remaining_cents: outcome.remaining_cents,
            payments: outcome.payments,
            error: outcome.error,
        });
    }

    let outcome = match sales {
        Ok(sales) => {
            apply_to_open_sales(Some(vend), &sales, deduction.amount_cents, payment_type_id, &note).await
        }
        Err(e) => AllocationOutcome {
            remaining_cents: deduction.amount_cents,
            error: Some(format!("Vend API error: {}", e)),
            ..Default::default()
        },
    };

    let status = if outcome.success() {
        let payment_ids = outcome.payment_ids();
        sqlx::query(
            r#"
            UPDATE xero_payroll_deductions
            SET status = 'allocated',
                allocated_amount_cents = $1,
                vend_payment_id = $2,
                allocated_at = NOW(),
                allocation_error = NULL,
                updated_at = NOW()
            WHERE id = $3
            "#,
        )
        .bind(outcome.applied_cents)
        .bind(&payment_ids)
        .bind(deduction_id)
        .execute(&mut *tx)
        .await?;
        DeductionStatus::Allocated
    } else {
        sqlx::query(
            r#"
            UPDATE xero_payroll_deductions
            SET status = 'failed',
                allocation_error = $1,
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(&outcome.error)
        .bind(deduction_id)
        .execute(&mut *tx)
        .await?;
        DeductionStatus::Failed
    };

    insert_log(
        &mut tx,
        &deduction,
        Some(&customer_id),
        "allocate",
        outcome.applied_cents,
        Some(outcome.payment_ids()).filter(|ids| !ids.is_empty()),
        outcome.success(),
        outcome.error.clone(),
        performed_by,
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        deduction_id = %deduction_id,
        customer_id = %customer_id,
        applied_cents = outcome.applied_cents,
        remaining_cents = outcome.remaining_cents,
        status = status.as_str(),
        "Deduction allocation finished"
    );

    Ok(AllocationResult {
        deduction_id,
        success: outcome.success(),
        dry_run: false,
        status: status.as_str().to_string(),
        applied_cents: outcome.applied_cents,
        remaining_cents: outcome.remaining_cents,
        payments: outcome.payments,
        error: outcome.error,
    })
}

#[allow(clippy::too_many_arguments)]
async fn insert_log(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    deduction: &Deduction,
    customer_id: Option<&str>,
    action: &str,
    amount_cents: i64,
    payment_ids: Option<String>,
    success: bool,
    error_message: Option<String>,
    performed_by: Option<Uuid>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO payment_allocation_log (
            deduction_id, vend_customer_id, employee_name, action, amount_cents,
            vend_payment_id, success, error_message, performed_by
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(deduction.id)
    .bind(customer_id)
    .bind(&deduction.employee_name)
    .bind(action)
    .bind(amount_cents)
    .bind(payment_ids)
    .bind(success)
    .bind(error_message)
    .bind(performed_by)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Allocate each deduction id in order and tally the outcomes.
async fn allocate_many(
    pool: &DbPool,
    vend: &VendClient,
    payment_type_id: &str,
    ids: Vec<Uuid>,
    performed_by: Option<Uuid>,
) -> BulkAllocationResult {
    let mut result = BulkAllocationResult {
        total: ids.len(),
        ..Default::default()
    };

    let request = AllocateRequest::default();
    for id in ids {
        match allocate_deduction(pool, vend, payment_type_id, id, performed_by, &request).await {
            Ok(r) if r.success => result.successful += 1,
            Ok(r) => {
                result.failed += 1;
                result.errors.push(format!(
                    "Deduction #{}: {}",
                    id,
                    r.error.unwrap_or_else(|| "Unknown error".to_string())
                ));
            }
            Err(e) => {
                result.failed += 1;
                result.errors.push(format!("Deduction #{}: {}", id, e));
            }
        }
    }

    result
}

/// Allocate every pending deduction for one POS customer.
pub async fn allocate_all_for_customer(
    pool: &DbPool,
    vend: &VendClient,
    payment_type_id: &str,
    customer_id: &str,
    performed_by: Option<Uuid>,
) -> Result<BulkAllocationResult, AppError> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM xero_payroll_deductions
        WHERE vend_customer_id = $1 AND status = 'pending' AND amount_cents > 0
        ORDER BY created_at, id
        "#,
    )
    .bind(customer_id)
    .fetch_all(pool)
    .await?;

    Ok(allocate_many(pool, vend, payment_type_id, ids, performed_by).await)
}

/// Allocate every pending, mapped deduction.
pub async fn allocate_all_pending(
    pool: &DbPool,
    vend: &VendClient,
    payment_type_id: &str,
    performed_by: Option<Uuid>,
) -> Result<BulkAllocationResult, AppError> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM xero_payroll_deductions
        WHERE status = 'pending' AND vend_customer_id IS NOT NULL AND amount_cents > 0
        ORDER BY created_at, id
        "#,
    )
    .fetch_all(pool)
    .await?;

    let result = allocate_many(pool, vend, payment_type_id, ids, performed_by).await;
    tracing::info!(
        total = result.total,
        successful = result.successful,
        failed = result.failed,
        "Bulk allocation finished"
    );
    Ok(result)
}

/// Put a failed deduction back into the pending queue.
pub async fn retry_failed(pool: &DbPool, deduction_id: Uuid, performed_by: Option<Uuid>) -> Result<Deduction, AppError> {
    let mut tx = pool.begin().await?;

    let deduction = sqlx::query_as::<_, Deduction>(
        r#"
        UPDATE xero_payroll_deductions
        SET status = 'pending', allocation_error = NULL, updated_at = NOW()
        WHERE id = $1 AND status = 'failed'
        RETURNING *
        "#,
    )
    .bind(deduction_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Deduction not found or not in failed status".to_string()))?;

    insert_log(
        &mut tx,
        &deduction,
        deduction.vend_customer_id.as_deref(),
        "reset",
        deduction.amount_cents,
        None,
        true,
        None,
        performed_by,
    )
    .await?;

    tx.commit().await?;
    Ok(deduction)
}

/// Reset every failed deduction of one customer to pending.
pub async fn retry_all_failed_for_customer(pool: &DbPool, customer_id: &str) -> Result<RetryAllResult, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE xero_payroll_deductions
        SET status = 'pending', allocation_error = NULL, updated_at = NOW()
        WHERE vend_customer_id = $1 AND status = 'failed'
        "#,
    )
    .bind(customer_id)
    .execute(pool)
    .await?;

    Ok(RetryAllResult {
        reset_count: result.rows_affected(),
    })
}

pub async fn pending_deductions(pool: &DbPool, customer_id: Option<&str>) -> Result<Vec<Deduction>, AppError> {
    let deductions = sqlx::query_as::<_, Deduction>(
        r#"
        SELECT * FROM xero_payroll_deductions
        WHERE status = 'pending' AND ($1::TEXT IS NULL OR vend_customer_id = $1)
        ORDER BY created_at, id
        "#,
    )
    .bind(customer_id)
    .fetch_all(pool)
    .await?;
    Ok(deductions)
}

pub async fn failed_deductions(pool: &DbPool) -> Result<Vec<Deduction>, AppError> {
    let deductions = sqlx::query_as::<_, Deduction>(
        "SELECT * FROM xero_payroll_deductions WHERE status = 'failed' ORDER BY updated_at DESC",
    )
    .fetch_all(pool)
    .await?;
    Ok(deductions)
}

/// Pending deductions grouped by customer, largest total first.
pub async fn pending_summary(pool: &DbPool) -> Result<Vec<PendingCustomerSummary>, AppError> {
    let rows = sqlx::query_as::<_, PendingCustomerSummary>(
        r#"
        SELECT d.vend_customer_id,
               MAX(d.employee_name) AS employee_name,
               COUNT(*)::BIGINT AS deduction_count,
               COALESCE(SUM(d.amount_cents), 0)::BIGINT AS total_cents,
               MIN(p.period_start) AS oldest_period_start
        FROM xero_payroll_deductions d
        LEFT JOIN xero_payrolls p ON p.id = d.payroll_id
        WHERE d.status = 'pending'
        GROUP BY d.vend_customer_id
        ORDER BY total_cents DESC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn allocation_statistics(pool: &DbPool) -> Result<Vec<AllocationStatusStat>, AppError> {
    let rows = sqlx::query_as::<_, AllocationStatusStat>(
        r#"
        SELECT status,
               COUNT(*)::BIGINT AS count,
               COALESCE(SUM(amount_cents), 0)::BIGINT AS total_cents,
               COALESCE(AVG(amount_cents), 0)::FLOAT8 AS average_cents
        FROM xero_payroll_deductions
        GROUP BY status
        ORDER BY status
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn recent_allocations(pool: &DbPool, limit: i64) -> Result<Vec<AllocationLogEntry>, AppError> {
    let rows = sqlx::query_as::<_, AllocationLogEntry>(
        "SELECT * FROM payment_allocation_log ORDER BY created_at DESC LIMIT $1",
    )
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Share of allocation attempts in the last `days` days that succeeded.
pub async fn allocation_success_rate(pool: &DbPool, days: i64) -> Result<AllocationSuccessRate, AppError> {
    let days = days.clamp(1, 3650);
    let (attempts, successful): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*)::BIGINT,
               COUNT(*) FILTER (WHERE success)::BIGINT
        FROM payment_allocation_log
        WHERE action = 'allocate'
          AND created_at >= NOW() - make_interval(days => $1::INT)
        "#,
    )
    .bind(days)
    .fetch_one(pool)
    .await?;

    Ok(AllocationSuccessRate {
        days,
        attempts,
        successful,
        success_rate: success_rate(attempts, successful),
    })
}

fn success_rate(attempts: i64, successful: i64) -> f64 {
    if attempts == 0 {
        return 0.0;
    }
    (successful as f64 / attempts as f64 * 10000.0).round() / 100.0
}

pub async fn allocation_history(pool: &DbPool, customer_id: &str, limit: i64) -> Result<Vec<AllocationLogEntry>, AppError> {
    let rows = sqlx::query_as::<_, AllocationLogEntry>(
        r#"
        SELECT * FROM payment_allocation_log
        WHERE vend_customer_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(customer_id)
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records payments and fails the listed sale ids.
    struct FakeSink {
        failing: HashSet<String>,
        recorded: Mutex<Vec<SalePayment>>,
    }

    impl FakeSink {
        fn new(failing: &[&str]) -> Self {
            Self {
                failing: failing.iter().map(|s| s.to_string()).collect(),
                recorded: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SalePaymentSink for FakeSink {
        async fn record_payment(&self, payment: &SalePayment) -> Result<String, ClientError> {
            if self.failing.contains(&payment.register_sale_id) {
                return Err(ClientError::Status {
                    status: 500,
                    body: "rejected".to_string(),
                });
            }
            let mut recorded = self.recorded.lock().unwrap();
            recorded.push(payment.clone());
            Ok(format!("pay-{}", recorded.len()))
        }
    }

    fn sale(id: &str, due_cents: i64) -> OpenSale {
        OpenSale {
            id: id.to_string(),
            sale_date: None,
            due_cents,
        }
    }

    #[tokio::test]
    async fn test_spreads_newest_first_until_used_up() {
        let sink = FakeSink::new(&[]);
        let sales = vec![sale("new", 3000), sale("mid", 5000), sale("old", 9000)];

        let outcome = apply_to_open_sales(Some(&sink), &sales, 6000, "3", "note").await;

        assert!(outcome.success());
        assert_eq!(outcome.applied_cents, 6000);
        assert_eq!(outcome.remaining_cents, 0);
        let amounts: Vec<_> = outcome
            .payments
            .iter()
            .map(|p| (p.sale_id.as_str(), p.amount_cents))
            .collect();
        assert_eq!(amounts, vec![("new", 3000), ("mid", 3000)]);
        assert_eq!(outcome.payment_ids(), "pay-1,pay-2");

        let recorded = sink.recorded.lock().unwrap();
        assert!(recorded.iter().all(|p| p.label == "note" && p.payment_type_id == "3"));
    }

    #[tokio::test]
    async fn test_leaves_remainder_when_sales_owe_less() {
        let sink = FakeSink::new(&[]);
        let sales = vec![sale("a", 1500), sale("b", 1000)];

        let outcome = apply_to_open_sales(Some(&sink), &sales, 5000, "3", "note").await;

        assert!(outcome.success());
        assert_eq!(outcome.applied_cents, 2500);
        assert_eq!(outcome.remaining_cents, 2500);
    }

    #[tokio::test]
    async fn test_failed_sale_is_skipped_and_next_tried() {
        let sink = FakeSink::new(&["a"]);
        let sales = vec![sale("a", 4000), sale("b", 4000)];

        let outcome = apply_to_open_sales(Some(&sink), &sales, 3000, "3", "note").await;

        assert!(outcome.success());
        assert_eq!(outcome.payments.len(), 1);
        assert_eq!(outcome.payments[0].sale_id, "b");
        assert_eq!(outcome.applied_cents, 3000);
        assert_eq!(outcome.sale_errors.len(), 1);
        assert!(outcome.sale_errors[0].starts_with("Sale a:"));
    }

    #[tokio::test]
    async fn test_all_failures_report_nothing_applied() {
        let sink = FakeSink::new(&["a", "b"]);
        let sales = vec![sale("a", 4000), sale("b", 4000)];

        let outcome = apply_to_open_sales(Some(&sink), &sales, 3000, "3", "note").await;

        assert!(!outcome.success());
        assert_eq!(outcome.error.as_deref(), Some(NOTHING_APPLIED));
        assert_eq!(outcome.remaining_cents, 3000);
    }

    #[tokio::test]
    async fn test_no_sales_and_non_positive_amounts() {
        let sink = FakeSink::new(&[]);

        let outcome = apply_to_open_sales(Some(&sink), &[], 1000, "3", "note").await;
        assert_eq!(outcome.error.as_deref(), Some(NO_OPEN_SALES));

        let outcome = apply_to_open_sales(Some(&sink), &[sale("a", 100)], 0, "3", "note").await;
        assert!(outcome.success());
        assert_eq!(outcome.applied_cents, 0);
        assert!(sink.recorded.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_skips_blank_ids_and_settled_sales() {
        let sink = FakeSink::new(&[]);
        let sales = vec![sale("", 1000), sale("paid", 0), sale("owing", 700)];

        let outcome = apply_to_open_sales(Some(&sink), &sales, 1000, "3", "note").await;

        assert_eq!(outcome.payments.len(), 1);
        assert_eq!(outcome.payments[0].sale_id, "owing");
        assert_eq!(outcome.applied_cents, 700);
    }

    #[tokio::test]
    async fn test_dry_run_plans_without_payment_ids() {
        let sales = vec![sale("a", 1200), sale("b", 800)];

        let outcome = apply_to_open_sales(None, &sales, 1500, "3", "note").await;

        assert!(outcome.success());
        assert_eq!(outcome.applied_cents, 1500);
        assert!(outcome.payments.iter().all(|p| p.payment_id.is_none()));
        assert_eq!(outcome.payment_ids(), "");
    }

    #[test]
    fn test_allocation_note() {
        let start = NaiveDate::from_ymd_opt(2025, 3, 1);
        let end = NaiveDate::from_ymd_opt(2025, 3, 14);
        assert_eq!(
            allocation_note(start, end),
            "Payroll deduction: 2025-03-01 to 2025-03-14"
        );
        assert_eq!(
            allocation_note(None, end),
            "Payroll deduction: unknown to 2025-03-14"
        );
    }

    #[test]
    fn test_sort_newest_first_puts_undated_last() {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let mut sales = vec![
            OpenSale {
                id: "undated".into(),
                sale_date: None,
                due_cents: 1,
            },
            OpenSale {
                id: "old".into(),
                sale_date: Some(base),
                due_cents: 1,
            },
            OpenSale {
                id: "new".into(),
                sale_date: Some(base + Duration::days(3)),
                due_cents: 1,
            },
        ];

        sort_newest_first(&mut sales);

        let ids: Vec<_> = sales.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old", "undated"]);
    }

    #[test]
    fn test_success_rate_rounding() {
        assert_eq!(success_rate(0, 0), 0.0);
        assert_eq!(success_rate(3, 2), 66.67);
        assert_eq!(success_rate(4, 4), 100.0);
    }
}
