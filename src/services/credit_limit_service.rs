//! Staff credit limits.
//!
//! Limits live on the reconciliation row and are mirrored to the POS
//! customer's credit account when one exists. A stored limit of 0 means
//! the company default from `system_config` applies.

use uuid::Uuid;

use crate::clients::{dollars_to_cents, vend::VendClient};
use crate::db::DbPool;
use crate::error::AppError;
use crate::models::staff_account::{
    BulkCreditLimitResult, BulkCreditLimitUpdate, CreditChangeType, CreditLimitAudit, CreditLimitView, CreditRisk,
    CreditSyncResult, CreditUtilization, StaffAccount,
};

const DEFAULT_LIMIT_KEY: &str = "staff_default_credit_limit";

/// $500.00
pub const FALLBACK_DEFAULT_LIMIT_CENTS: i64 = 50_000;

pub fn effective_limit(stored_cents: i64, default_cents: i64) -> i64 {
    if stored_cents > 0 { stored_cents } else { default_cents }
}

/// Percentage of the limit in use and the resulting risk band.
pub fn utilization(owed_cents: i64, effective_limit_cents: i64) -> (f64, CreditRisk) {
    if effective_limit_cents <= 0 {
        return (0.0, CreditRisk::Unlimited);
    }

    let raw = owed_cents as f64 / effective_limit_cents as f64 * 100.0;
    let percent = (raw * 100.0).round() / 100.0;
    let risk = if percent > 90.0 {
        CreditRisk::High
    } else if percent > 70.0 {
        CreditRisk::Medium
    } else {
        CreditRisk::Low
    };
    (percent, risk)
}

fn validate_limit(limit_cents: i64) -> Result<(), AppError> {
    if limit_cents < 0 {
        return Err(AppError::InvalidRequest("Credit limit cannot be negative".to_string()));
    }
    Ok(())
}

async fn fetch_account(pool: &DbPool, id: Uuid) -> Result<StaffAccount, AppError> {
    sqlx::query_as::<_, StaffAccount>("SELECT * FROM staff_account_reconciliation WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Staff member not found".to_string()))
}

pub async fn get_default(pool: &DbPool) -> Result<i64, AppError> {
    let stored: Option<String> = sqlx::query_scalar("SELECT value FROM system_config WHERE key = $1")
        .bind(DEFAULT_LIMIT_KEY)
        .fetch_optional(pool)
        .await?;

    Ok(stored
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(FALLBACK_DEFAULT_LIMIT_CENTS))
}

pub async fn set_default(pool: &DbPool, limit_cents: i64) -> Result<(), AppError> {
    validate_limit(limit_cents)?;

    sqlx::query(
        r#"
        INSERT INTO system_config (key, value, updated_at)
        VALUES ($1, $2, NOW())
        ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = NOW()
        "#,
    )
    .bind(DEFAULT_LIMIT_KEY)
    .bind(limit_cents.to_string())
    .execute(pool)
    .await?;

    tracing::info!(limit_cents, "Default staff credit limit updated");
    Ok(())
}

/// Give every non-archived account without its own limit the default.
pub async fn apply_default_to_all(
    pool: &DbPool,
    vend: &VendClient,
    limit_cents: i64,
    changed_by: &str,
) -> Result<usize, AppError> {
    validate_limit(limit_cents)?;

    let ids: Vec<Uuid> =
        sqlx::query_scalar("SELECT id FROM staff_account_reconciliation WHERE credit_limit_cents = 0 AND NOT archived")
            .fetch_all(pool)
            .await?;

    let mut updated = 0;
    for id in ids {
        match set_limit(pool, vend, id, limit_cents, CreditChangeType::CompanyDefault, changed_by).await {
            Ok(()) => updated += 1,
            Err(e) => tracing::warn!(reconciliation_id = %id, error = %e, "Failed to apply default credit limit"),
        }
    }
    Ok(updated)
}

pub async fn get_limit(pool: &DbPool, id: Uuid) -> Result<CreditLimitView, AppError> {
    let account = fetch_account(pool, id).await?;
    let default_cents = get_default(pool).await?;

    Ok(CreditLimitView {
        reconciliation_id: account.id,
        credit_limit_cents: account.credit_limit_cents,
        effective_limit_cents: effective_limit(account.credit_limit_cents, default_cents),
        credit_account_id: account.credit_account_id,
        is_override: account.credit_limit_cents > 0,
    })
}

/// Set a staff member's limit locally and on the POS.
///
/// A POS failure is logged; the local limit still changes and the next
/// sync reconciles the two.
pub async fn set_limit(
    pool: &DbPool,
    vend: &VendClient,
    id: Uuid,
    limit_cents: i64,
    change_type: CreditChangeType,
    changed_by: &str,
) -> Result<(), AppError> {
    validate_limit(limit_cents)?;
    let account = fetch_account(pool, id).await?;

    if let Some(credit_account_id) = account.credit_account_id.as_deref().filter(|c| !c.is_empty()) {
        if let Err(e) = vend.update_credit_limit(credit_account_id, limit_cents).await {
            tracing::warn!(
                reconciliation_id = %id,
                employee = %account.employee_name,
                error = %e,
                "Failed to update POS credit limit"
            );
        }
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE staff_account_reconciliation
        SET credit_limit_cents = $1, vend_last_synced_at = NOW(), updated_at = NOW()
        WHERE id = $2
        "#,
    )
    .bind(limit_cents)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    record_change(&mut tx, id, account.credit_limit_cents, limit_cents, change_type, changed_by).await?;

    tx.commit().await?;
    Ok(())
}

async fn record_change(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    old_cents: i64,
    new_cents: i64,
    change_type: CreditChangeType,
    changed_by: &str,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        INSERT INTO staff_account_audit_log
            (reconciliation_id, action_type, old_value_cents, new_value_cents, change_type, changed_by)
        VALUES ($1, 'credit_limit_change', $2, $3, $4, $5)
        "#,
    )
    .bind(id)
    .bind(old_cents)
    .bind(new_cents)
    .bind(change_type.as_str())
    .bind(changed_by)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn revert_to_default(pool: &DbPool, vend: &VendClient, id: Uuid, changed_by: &str) -> Result<(), AppError> {
    let default_cents = get_default(pool).await?;
    set_limit(pool, vend, id, default_cents, CreditChangeType::CompanyDefault, changed_by).await
}

pub async fn bulk_set(
    pool: &DbPool,
    vend: &VendClient,
    updates: &[BulkCreditLimitUpdate],
    changed_by: &str,
) -> BulkCreditLimitResult {
    let mut result = BulkCreditLimitResult::default();

    for update in updates {
        match set_limit(
            pool,
            vend,
            update.id,
            update.limit_cents,
            CreditChangeType::IndividualOverride,
            changed_by,
        )
        .await
        {
            Ok(()) => result.success += 1,
            Err(e) => {
                result.failed += 1;
                result.errors.push(format!("ID {}: {}", update.id, e));
            }
        }
    }

    result
}

/// Pull the POS credit account limit into the local row.
///
/// Returns `false` when the account has no POS customer or the customer
/// has no credit account.
pub async fn sync_from_pos(pool: &DbPool, vend: &VendClient, id: Uuid) -> Result<bool, AppError> {
    let account = fetch_account(pool, id).await?;
    let Some(customer_id) = account.vend_customer_id.as_deref().filter(|c| !c.is_empty()) else {
        return Ok(false);
    };

    let customer = vend.get_customer(customer_id).await?;
    let Some(credit) = customer.credit_account else {
        return Ok(false);
    };
    let limit_cents = credit.credit_limit.map(dollars_to_cents).unwrap_or(0);

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        UPDATE staff_account_reconciliation
        SET credit_limit_cents = $1, credit_account_id = $2, vend_last_synced_at = NOW(), updated_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(limit_cents)
    .bind(&credit.credit_account_id)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if limit_cents != account.credit_limit_cents {
        record_change(
            &mut tx,
            id,
            account.credit_limit_cents,
            limit_cents,
            CreditChangeType::LightspeedSync,
            "system",
        )
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}

pub async fn sync_all(pool: &DbPool, vend: &VendClient) -> Result<CreditSyncResult, AppError> {
    let ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM staff_account_reconciliation WHERE NOT archived")
        .fetch_all(pool)
        .await?;

    let mut result = CreditSyncResult::default();
    for id in ids {
        match sync_from_pos(pool, vend, id).await {
            Ok(true) => result.synced += 1,
            Ok(false) => result.failed += 1,
            Err(e) => {
                tracing::warn!(reconciliation_id = %id, error = %e, "Credit limit sync failed");
                result.failed += 1;
            }
        }
    }

    tracing::info!(synced = result.synced, failed = result.failed, "Credit limit sync finished");
    Ok(result)
}

pub async fn history(pool: &DbPool, id: Uuid, limit: i64) -> Result<Vec<CreditLimitAudit>, AppError> {
    let rows = sqlx::query_as::<_, CreditLimitAudit>(
        r#"
        SELECT id, reconciliation_id, old_value_cents, new_value_cents, change_type, changed_by, changed_at
        FROM staff_account_audit_log
        WHERE reconciliation_id = $1 AND action_type = 'credit_limit_change'
        ORDER BY changed_at DESC
        LIMIT $2
        "#,
    )
    .bind(id)
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Limit usage for every active staff account, heaviest users first.
pub async fn utilization_report(pool: &DbPool) -> Result<Vec<CreditUtilization>, AppError> {
    let default_cents = get_default(pool).await?;
    let accounts = sqlx::query_as::<_, StaffAccount>(
        "SELECT * FROM staff_account_reconciliation WHERE NOT archived ORDER BY employee_name",
    )
    .fetch_all(pool)
    .await?;

    let mut report: Vec<CreditUtilization> = accounts
        .into_iter()
        .map(|account| {
            let effective = effective_limit(account.credit_limit_cents, default_cents);
            let owed = account.owed_cents();
            let (utilization_percent, risk_level) = utilization(owed, effective);
            CreditUtilization {
                reconciliation_id: account.id,
                employee_name: account.employee_name,
                credit_limit_cents: account.credit_limit_cents,
                effective_limit_cents: effective,
                owed_cents: owed,
                utilization_percent,
                risk_level,
            }
        })
        .collect();

    report.sort_by(|a, b| {
        b.utilization_percent
            .partial_cmp(&a.utilization_percent)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_limit_falls_back_to_default() {
        assert_eq!(effective_limit(0, 50_000), 50_000);
        assert_eq!(effective_limit(20_000, 50_000), 20_000);
    }

    #[test]
    fn test_utilization_bands() {
        assert_eq!(utilization(10_000, 0), (0.0, CreditRisk::Unlimited));
        assert_eq!(utilization(46_000, 50_000), (92.0, CreditRisk::High));
        assert_eq!(utilization(45_000, 50_000), (90.0, CreditRisk::Medium));
        assert_eq!(utilization(35_000, 50_000), (70.0, CreditRisk::Low));
        assert_eq!(utilization(1, 3), (33.33, CreditRisk::Low));
    }

    #[test]
    fn test_negative_limit_rejected() {
        assert!(matches!(validate_limit(-1), Err(AppError::InvalidRequest(_))));
        assert!(validate_limit(0).is_ok());
    }
}
