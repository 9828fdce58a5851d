//! Staff account reconciliation.
//!
//! Compares what a staff member owes on the POS with the payroll
//! deductions still waiting to be applied, and records the difference.

use uuid::Uuid;

use crate::clients::vend::VendClient;
use crate::db::DbPool;
use crate::error::AppError;
use crate::models::staff_account::{
    ReconcileAllResult, ReconcileResult, ReconciliationStatus, ReconciliationSummary, StaffAccount,
};

/// Outstanding amount and status for an account.
///
/// Owed is `max(0, -balance)`; pending deductions will pay part of it off.
pub fn outstanding(vend_balance_cents: i64, pending_cents: i64) -> (i64, ReconciliationStatus) {
    let owed = (-vend_balance_cents).max(0);
    let outstanding = owed - pending_cents;

    let status = match outstanding {
        0 => ReconciliationStatus::Clear,
        o if o > 0 => ReconciliationStatus::Owes,
        _ => ReconciliationStatus::Credit,
    };
    (outstanding, status)
}

async fn fetch_account(pool: &DbPool, id: Uuid) -> Result<StaffAccount, AppError> {
    sqlx::query_as::<_, StaffAccount>("SELECT * FROM staff_account_reconciliation WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Staff account not found".to_string()))
}

pub async fn reconcile(pool: &DbPool, id: Uuid) -> Result<ReconcileResult, AppError> {
    let account = fetch_account(pool, id).await?;

    let (pending_cents, allocated_cents): (i64, i64) = match account.vend_customer_id.as_deref() {
        Some(customer) if !customer.is_empty() => {
            sqlx::query_as(
                r#"
                SELECT COALESCE(SUM(amount_cents) FILTER (WHERE status = 'pending'), 0)::BIGINT,
                       COALESCE(SUM(allocated_amount_cents) FILTER (WHERE status = 'allocated'), 0)::BIGINT
                FROM xero_payroll_deductions
                WHERE vend_customer_id = $1
                "#,
            )
            .bind(customer)
            .fetch_one(pool)
            .await?
        }
        _ => (0, 0),
    };

    let (outstanding_cents, status) = outstanding(account.vend_balance_cents, pending_cents);

    sqlx::query(
        r#"
        UPDATE staff_account_reconciliation
        SET total_allocated_cents = $1, outstanding_cents = $2, status = $3,
            last_reconciled_at = NOW(), updated_at = NOW()
        WHERE id = $4
        "#,
    )
    .bind(allocated_cents)
    .bind(outstanding_cents)
    .bind(status.as_str())
    .bind(id)
    .execute(pool)
    .await?;

    Ok(ReconcileResult {
        reconciliation_id: account.id,
        owed_cents: account.owed_cents(),
        employee_name: account.employee_name,
        pending_deductions_cents: pending_cents,
        total_allocated_cents: allocated_cents,
        outstanding_cents,
        status,
    })
}

pub async fn reconcile_all(pool: &DbPool) -> Result<ReconcileAllResult, AppError> {
    let ids: Vec<Uuid> =
        sqlx::query_scalar("SELECT id FROM staff_account_reconciliation WHERE NOT archived ORDER BY employee_name")
            .fetch_all(pool)
            .await?;

    let mut result = ReconcileAllResult::default();
    for id in ids {
        match reconcile(pool, id).await {
            Ok(_) => result.reconciled += 1,
            Err(e) => {
                result.failed += 1;
                result.errors.push(format!("Account {}: {}", id, e));
            }
        }
    }

    tracing::info!(reconciled = result.reconciled, failed = result.failed, "Reconciliation run finished");
    Ok(result)
}

/// Pull the latest balance from the POS, then reconcile.
pub async fn refresh_balance(pool: &DbPool, vend: &VendClient, id: Uuid) -> Result<ReconcileResult, AppError> {
    let account = fetch_account(pool, id).await?;
    let customer_id = account
        .vend_customer_id
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::InvalidRequest("Staff account has no POS customer".to_string()))?;

    let customer = vend.get_customer(customer_id).await?;

    sqlx::query(
        r#"
        UPDATE staff_account_reconciliation
        SET vend_balance_cents = $1, vend_last_synced_at = NOW(), updated_at = NOW()
        WHERE id = $2
        "#,
    )
    .bind(customer.balance_cents())
    .bind(id)
    .execute(pool)
    .await?;

    reconcile(pool, id).await
}

pub async fn summary(pool: &DbPool) -> Result<ReconciliationSummary, AppError> {
    let summary = sqlx::query_as::<_, ReconciliationSummary>(
        r#"
        SELECT COUNT(*)::BIGINT AS total_accounts,
               COUNT(*) FILTER (WHERE status = 'clear')::BIGINT AS clear_count,
               COUNT(*) FILTER (WHERE status = 'owes')::BIGINT AS owes_count,
               COUNT(*) FILTER (WHERE status = 'credit')::BIGINT AS credit_count,
               COUNT(*) FILTER (WHERE status = 'pending')::BIGINT AS pending_count,
               COALESCE(SUM(GREATEST(-vend_balance_cents, 0)), 0)::BIGINT AS total_owed_cents,
               COALESCE(SUM(outstanding_cents) FILTER (WHERE outstanding_cents > 0), 0)::BIGINT AS total_outstanding_cents
        FROM staff_account_reconciliation
        WHERE NOT archived
        "#,
    )
    .fetch_one(pool)
    .await?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outstanding_owes_when_pending_short() {
        assert_eq!(outstanding(-15_000, 5_000), (10_000, ReconciliationStatus::Owes));
    }

    #[test]
    fn test_outstanding_clear_and_credit() {
        assert_eq!(outstanding(-5_000, 5_000), (0, ReconciliationStatus::Clear));
        assert_eq!(outstanding(-5_000, 8_000), (-3_000, ReconciliationStatus::Credit));
    }

    #[test]
    fn test_positive_balance_owes_nothing() {
        assert_eq!(outstanding(2_500, 0), (0, ReconciliationStatus::Clear));
        assert_eq!(outstanding(2_500, 1_000), (-1_000, ReconciliationStatus::Credit));
    }
}
