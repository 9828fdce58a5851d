//! Payroll sync service.
//!
//! Pulls pay runs and their payslips from the payroll API, stores each pay
//! run, and records the staff-account deductions found on the payslips as
//! `pending` deductions ready for allocation.
//!
//! # Rate limiting
//!
//! Every page fetch is retried up to three times on HTTP 429, sleeping
//! `max(Retry-After, 2^retry)` seconds (Retry-After defaults to 2).
//!
//! # Bounds
//!
//! Paging stops on an empty or short page (page size 100). The whole sync
//! stops after five minutes and reports a partial result.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::clients::{ClientError, dollars_to_cents};
use crate::db::DbPool;
use crate::error::AppError;
use crate::models::payroll::{
    PayRun, PaySlip, PayrollDeductionSummary, SyncReport, XeroDeductionType, XeroEmployee,
};

/// Page size used by the payroll API.
pub const PAGE_SIZE: usize = 100;

const MAX_RATE_LIMIT_RETRIES: u32 = 3;
const DEFAULT_RETRY_AFTER_SECS: u64 = 2;
const SYNC_TIMEOUT: Duration = Duration::from_secs(300);
const CACHE_AFTER_DAYS: i64 = 7;
/// Ten years of pay runs.
pub const MAX_LIMIT_WEEKS: i64 = 520;

pub const SYNC_TIMEOUT_MESSAGE: &str = "Sync timeout reached after 5 minutes - partial sync completed";
const UNKNOWN_EMPLOYEE: &str = "Unknown Employee";
const UNKNOWN_DEDUCTION: &str = "Unknown Deduction";

/// Deduction names that identify a staff-account deduction.
const STAFF_ACCOUNT_KEYWORDS: [&str; 6] = [
    "staff account",
    "staff purchase",
    "staff debt",
    "employee purchase",
    "staff balance",
    "account payment",
];

/// Read access to the payroll system.
#[async_trait]
pub trait PayrollSource: Send + Sync {
    async fn pay_runs(&self, page: u32) -> Result<Vec<PayRun>, ClientError>;
    async fn pay_slips(&self, pay_run_id: &str, page: u32) -> Result<Vec<PaySlip>, ClientError>;
    async fn employee(&self, employee_id: &str) -> Result<XeroEmployee, ClientError>;
    async fn deduction_type(&self, deduction_type_id: &str) -> Result<XeroDeductionType, ClientError>;
}

/// Case-insensitive keyword match on the deduction name.
pub fn is_staff_account_deduction(name: &str) -> bool {
    let name = name.to_lowercase();
    STAFF_ACCOUNT_KEYWORDS.iter().any(|k| name.contains(k))
}

/// How long to wait before retry number `retry` (0-based) of a rate-limited call.
pub fn backoff_delay(retry_after: Option<u64>, retry: u32) -> Duration {
    let header = retry_after.unwrap_or(DEFAULT_RETRY_AFTER_SECS);
    let exponential = 2u64.saturating_pow(retry);
    Duration::from_secs(header.max(exponential))
}

/// Run `call`, retrying on rate limiting.
pub async fn with_rate_limit_retry<T, F, Fut>(operation: &str, mut call: F) -> Result<T, ClientError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut retries = 0;
    loop {
        match call().await {
            Err(ClientError::RateLimited { retry_after }) if retries < MAX_RATE_LIMIT_RETRIES => {
                let delay = backoff_delay(retry_after, retries);
                tracing::warn!(operation, retry = retries + 1, delay_secs = delay.as_secs(), "Rate limited, backing off");
                tokio::time::sleep(delay).await;
                retries += 1;
            }
            other => return other,
        }
    }
}

/// Fetch every payslip of a pay run, page by page.
pub async fn fetch_all_pay_slips(source: &dyn PayrollSource, pay_run_id: &str) -> Result<Vec<PaySlip>, ClientError> {
    let mut all = Vec::new();
    let mut page = 1;

    loop {
        let batch = with_rate_limit_retry("getPaySlips", || source.pay_slips(pay_run_id, page)).await?;
        let count = batch.len();
        all.extend(batch);

        if count < PAGE_SIZE {
            break;
        }
        page += 1;
    }

    Ok(all)
}

/// Gross earnings and total deductions across payslips, in cents.
///
/// Payslip totals are used when positive; otherwise the lines are summed.
pub fn payslip_totals(slips: &[PaySlip]) -> (i64, i64) {
    let mut gross = 0i64;
    let mut deductions = 0i64;

    for slip in slips {
        let slip_gross = slip.total_earnings.or(slip.gross_earnings).unwrap_or(0.0);
        if slip_gross > 0.0 {
            gross += dollars_to_cents(slip_gross);
        } else {
            gross += slip.earnings_lines.iter().map(|l| dollars_to_cents(l.value())).sum::<i64>();
        }

        let slip_deductions = slip.total_deductions.unwrap_or(0.0);
        if slip_deductions > 0.0 {
            deductions += dollars_to_cents(slip_deductions);
        } else {
            deductions += slip
                .deduction_lines
                .iter()
                .map(|l| dollars_to_cents(l.amount.unwrap_or(0.0)))
                .sum::<i64>();
        }
    }

    (gross, deductions)
}

/// A staff-account deduction found on a payslip, with names resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffDeductionLine {
    pub xero_employee_id: String,
    pub employee_name: String,
    pub deduction_type_id: String,
    pub deduction_name: String,
    pub amount_cents: i64,
}

/// Name lookups shared across pay runs within one sync.
#[derive(Debug, Default)]
pub struct NameCache {
    employees: HashMap<String, String>,
    deduction_types: HashMap<String, Option<String>>,
}

impl NameCache {
    async fn employee_name(&mut self, source: &dyn PayrollSource, employee_id: &str) -> String {
        if let Some(name) = self.employees.get(employee_id) {
            return name.clone();
        }

        let name = match with_rate_limit_retry("getEmployee", || source.employee(employee_id)).await {
            Ok(employee) if !employee.full_name().is_empty() => employee.full_name(),
            Ok(_) => UNKNOWN_EMPLOYEE.to_string(),
            Err(e) => {
                tracing::debug!(employee_id, error = %e, "Employee lookup failed");
                UNKNOWN_EMPLOYEE.to_string()
            }
        };
        self.employees.insert(employee_id.to_string(), name.clone());
        name
    }

    async fn deduction_name(&mut self, source: &dyn PayrollSource, deduction_type_id: &str) -> Option<String> {
        if let Some(name) = self.deduction_types.get(deduction_type_id) {
            return name.clone();
        }

        let name = match with_rate_limit_retry("getDeduction", || source.deduction_type(deduction_type_id)).await {
            Ok(deduction) => deduction.deduction_name.filter(|n| !n.trim().is_empty()),
            Err(e) => {
                tracing::debug!(deduction_type_id, error = %e, "Deduction type lookup failed");
                None
            }
        };
        self.deduction_types.insert(deduction_type_id.to_string(), name.clone());
        name
    }
}

/// Pick the staff-account deductions out of a pay run's payslips.
///
/// Lines with the same employee and deduction type are summed so each
/// pair appears once.
pub async fn extract_staff_deductions(
    source: &dyn PayrollSource,
    slips: &[PaySlip],
    names: &mut NameCache,
) -> Vec<StaffDeductionLine> {
    let mut lines: Vec<StaffDeductionLine> = Vec::new();

    for slip in slips {
        let Some(employee_id) = slip.employee_id.as_deref().filter(|id| !id.is_empty()) else {
            continue;
        };

        let mut employee_name: Option<String> = None;

        for line in &slip.deduction_lines {
            let amount_cents = dollars_to_cents(line.amount.unwrap_or(0.0));
            if amount_cents <= 0 {
                continue;
            }
            let type_id = line.deduction_type_id.clone().unwrap_or_default();

            let resolved = if type_id.is_empty() {
                None
            } else {
                names.deduction_name(source, &type_id).await
            };
            let deduction_name = resolved
                .or_else(|| line.display_name.clone().filter(|n| !n.trim().is_empty()))
                .unwrap_or_else(|| UNKNOWN_DEDUCTION.to_string());

            if !is_staff_account_deduction(&deduction_name) {
                continue;
            }

            if employee_name.is_none() {
                employee_name = Some(match slip.employee_name() {
                    Some(name) => name,
                    None => names.employee_name(source, employee_id).await,
                });
            }

            if let Some(existing) = lines
                .iter_mut()
                .find(|l| l.xero_employee_id == employee_id && l.deduction_type_id == type_id)
            {
                existing.amount_cents += amount_cents;
                continue;
            }

            lines.push(StaffDeductionLine {
                xero_employee_id: employee_id.to_string(),
                employee_name: employee_name.clone().unwrap_or_else(|| UNKNOWN_EMPLOYEE.to_string()),
                deduction_type_id: type_id,
                deduction_name,
                amount_cents,
            });
        }
    }

    lines
}

/// Oldest payment date a sync with `limit_weeks` will look at.
pub fn sync_cutoff(today: NaiveDate, limit_weeks: i64) -> Result<NaiveDate, AppError> {
    if !(1..=MAX_LIMIT_WEEKS).contains(&limit_weeks) {
        return Err(AppError::InvalidRequest(format!(
            "limit_weeks must be between 1 and {}",
            MAX_LIMIT_WEEKS
        )));
    }
    ChronoDuration::try_weeks(limit_weeks)
        .and_then(|window| today.checked_sub_signed(window))
        .ok_or_else(|| AppError::InvalidRequest("limit_weeks is out of range".to_string()))
}

/// Sync pay runs from the last `limit_weeks` weeks.
///
/// A failure inside one pay run is recorded in the report and the sync
/// moves on. A failure fetching a page of pay runs aborts the sync.
pub async fn sync_payrolls(pool: &DbPool, source: &dyn PayrollSource, limit_weeks: i64) -> Result<SyncReport, AppError> {
    let started = Instant::now();
    let today = Utc::now().date_naive();
    let cutoff = sync_cutoff(today, limit_weeks)?;

    tracing::info!(limit_weeks, cutoff = %cutoff, "Payroll sync started");

    let mut report = SyncReport::default();
    let mut names = NameCache::default();
    let mut page = 1u32;

    'pages: loop {
        if started.elapsed() > SYNC_TIMEOUT {
            report.timed_out = true;
            report.errors.push(SYNC_TIMEOUT_MESSAGE.to_string());
            break;
        }

        let runs = with_rate_limit_retry("getPayRuns", || source.pay_runs(page))
            .await
            .map_err(|e| {
                tracing::error!(page, error = %e, "Failed to fetch pay runs");
                AppError::from(e)
            })?;

        let count = runs.len();
        report.total_payruns_found += count;
        tracing::info!(page, count, total = report.total_payruns_found, "Fetched pay runs page");

        for run in &runs {
            if started.elapsed() > SYNC_TIMEOUT {
                report.timed_out = true;
                report.errors.push(SYNC_TIMEOUT_MESSAGE.to_string());
                break 'pages;
            }

            report.total_processed += 1;

            let Some(pay_run_id) = run.pay_run_id.as_deref().filter(|id| !id.is_empty()) else {
                report.errors.push("Pay run without an ID skipped".to_string());
                continue;
            };
            let Some(payment_date) = run.payment_date() else {
                report.errors.push(format!("Pay run {} has no payment date", pay_run_id));
                continue;
            };
            if payment_date < cutoff {
                continue;
            }

            let should_cache = (today - payment_date).num_days() >= CACHE_AFTER_DAYS;

            match sync_pay_run(pool, source, run, pay_run_id, payment_date, should_cache, &mut names).await {
                Ok(upserted) => {
                    report.synced += 1;
                    report.deductions_upserted += upserted;
                    if should_cache {
                        report.cached += 1;
                    }
                }
                Err(e) => {
                    tracing::error!(pay_run_id, error = %e, "Pay run sync failed");
                    report.errors.push(format!("Pay run {}: {}", pay_run_id, e));
                }
            }
        }

        if count < PAGE_SIZE {
            break;
        }
        page += 1;
    }

    tracing::info!(
        synced = report.synced,
        cached = report.cached,
        errors = report.errors.len(),
        found = report.total_payruns_found,
        "Payroll sync complete"
    );

    Ok(report)
}

/// Store one pay run and its staff-account deductions in a single transaction.
async fn sync_pay_run(
    pool: &DbPool,
    source: &dyn PayrollSource,
    run: &PayRun,
    pay_run_id: &str,
    payment_date: NaiveDate,
    is_cached: bool,
    names: &mut NameCache,
) -> Result<usize, AppError> {
    let slips = fetch_all_pay_slips(source, pay_run_id).await?;
    let staff_lines = extract_staff_deductions(source, &slips, names).await;

    let (gross_cents, deductions_cents) = payslip_totals(&slips);
    let mut employees: Vec<&str> = slips.iter().filter_map(|s| s.employee_id.as_deref()).collect();
    employees.sort_unstable();
    employees.dedup();

    let raw = serde_json::to_value(run).unwrap_or(serde_json::Value::Null);

    let mut tx = pool.begin().await?;

    let payroll_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO xero_payrolls (
            xero_payroll_id, period_start, period_end, payment_date, status,
            total_gross_cents, total_deductions_cents, employee_count, raw_data, is_cached
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (xero_payroll_id) DO UPDATE SET
            period_start = EXCLUDED.period_start,
            period_end = EXCLUDED.period_end,
            payment_date = EXCLUDED.payment_date,
            status = EXCLUDED.status,
            total_gross_cents = EXCLUDED.total_gross_cents,
            total_deductions_cents = EXCLUDED.total_deductions_cents,
            employee_count = EXCLUDED.employee_count,
            raw_data = EXCLUDED.raw_data,
            is_cached = EXCLUDED.is_cached,
            updated_at = NOW()
        RETURNING id
        "#,
    )
    .bind(pay_run_id)
    .bind(run.period_start())
    .bind(run.period_end())
    .bind(payment_date)
    .bind(run.status())
    .bind(gross_cents)
    .bind(deductions_cents)
    .bind(employees.len() as i32)
    .bind(raw)
    .bind(is_cached)
    .fetch_one(&mut *tx)
    .await?;

    let mut customers: HashMap<String, Option<String>> = HashMap::new();

    for line in &staff_lines {
        let customer = match customers.get(&line.xero_employee_id) {
            Some(c) => c.clone(),
            None => {
                let c = mapped_customer(&mut tx, &line.xero_employee_id).await?;
                customers.insert(line.xero_employee_id.clone(), c.clone());
                c
            }
        };

        sqlx::query(
            r#"
            INSERT INTO xero_payroll_deductions (
                payroll_id, xero_employee_id, employee_name, deduction_type_id,
                deduction_name, amount_cents, vend_customer_id, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending')
            ON CONFLICT (payroll_id, xero_employee_id, deduction_type_id) DO UPDATE SET
                employee_name = EXCLUDED.employee_name,
                deduction_name = EXCLUDED.deduction_name,
                amount_cents = CASE
                    WHEN xero_payroll_deductions.status = 'allocated' THEN xero_payroll_deductions.amount_cents
                    ELSE EXCLUDED.amount_cents
                END,
                vend_customer_id = COALESCE(xero_payroll_deductions.vend_customer_id, EXCLUDED.vend_customer_id),
                updated_at = NOW()
            "#,
        )
        .bind(payroll_id)
        .bind(&line.xero_employee_id)
        .bind(&line.employee_name)
        .bind(&line.deduction_type_id)
        .bind(&line.deduction_name)
        .bind(line.amount_cents)
        .bind(customer)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::debug!(pay_run_id, slips = slips.len(), deductions = staff_lines.len(), "Pay run stored");
    Ok(staff_lines.len())
}

/// POS customer for an employee: approved mapping first, then any earlier deduction.
async fn mapped_customer(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    xero_employee_id: &str,
) -> Result<Option<String>, AppError> {
    let mapped: Option<String> = sqlx::query_scalar(
        "SELECT vend_customer_id FROM employee_mappings WHERE xero_employee_id = $1 AND status = 'mapped'",
    )
    .bind(xero_employee_id)
    .fetch_optional(&mut **tx)
    .await?;

    if mapped.is_some() {
        return Ok(mapped);
    }

    let previous: Option<String> = sqlx::query_scalar(
        r#"
        SELECT vend_customer_id FROM xero_payroll_deductions
        WHERE xero_employee_id = $1 AND vend_customer_id IS NOT NULL
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(xero_employee_id)
    .fetch_optional(&mut **tx)
    .await?;

    Ok(previous)
}

/// Deduction totals per stored payroll, newest first.
pub async fn deductions_summary(pool: &DbPool) -> Result<Vec<PayrollDeductionSummary>, AppError> {
    let rows = sqlx::query_as::<_, PayrollDeductionSummary>(
        r#"
        SELECT p.id AS payroll_id,
               p.xero_payroll_id,
               p.payment_date,
               COUNT(d.id)::BIGINT AS deduction_count,
               COALESCE(SUM(d.amount_cents), 0)::BIGINT AS total_cents,
               COUNT(d.id) FILTER (WHERE d.status = 'pending')::BIGINT AS pending_count,
               COUNT(d.id) FILTER (WHERE d.status = 'allocated')::BIGINT AS allocated_count,
               COUNT(d.id) FILTER (WHERE d.status = 'failed')::BIGINT AS failed_count
        FROM xero_payrolls p
        LEFT JOIN xero_payroll_deductions d ON d.payroll_id = p.id
        GROUP BY p.id
        ORDER BY p.payment_date DESC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Flag payrolls paid more than a week ago as cached.
pub async fn mark_old_payrolls_cached(pool: &DbPool) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE xero_payrolls
        SET is_cached = TRUE, updated_at = NOW()
        WHERE is_cached = FALSE AND payment_date < CURRENT_DATE - INTERVAL '7 days'
        "#,
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::payroll::{DeductionLine, EarningsLine};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeSource {
        slip_pages: Vec<Vec<PaySlip>>,
        rate_limits_left: AtomicU32,
        slip_calls: AtomicUsize,
        deduction_calls: AtomicUsize,
        employee_calls: AtomicUsize,
        deduction_names: HashMap<String, String>,
        employees: HashMap<String, String>,
        pages_requested: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl PayrollSource for FakeSource {
        async fn pay_runs(&self, _page: u32) -> Result<Vec<PayRun>, ClientError> {
            Ok(Vec::new())
        }

        async fn pay_slips(&self, _pay_run_id: &str, page: u32) -> Result<Vec<PaySlip>, ClientError> {
            self.slip_calls.fetch_add(1, Ordering::SeqCst);
            if self.rate_limits_left.load(Ordering::SeqCst) > 0 {
                self.rate_limits_left.fetch_sub(1, Ordering::SeqCst);
                return Err(ClientError::RateLimited { retry_after: None });
            }
            self.pages_requested.lock().unwrap().push(page);
            Ok(self
                .slip_pages
                .get(page as usize - 1)
                .cloned()
                .unwrap_or_default())
        }

        async fn employee(&self, employee_id: &str) -> Result<XeroEmployee, ClientError> {
            self.employee_calls.fetch_add(1, Ordering::SeqCst);
            match self.employees.get(employee_id) {
                Some(name) => Ok(XeroEmployee {
                    first_name: Some(name.clone()),
                    ..Default::default()
                }),
                None => Err(ClientError::Status {
                    status: 404,
                    body: String::new(),
                }),
            }
        }

        async fn deduction_type(&self, deduction_type_id: &str) -> Result<XeroDeductionType, ClientError> {
            self.deduction_calls.fetch_add(1, Ordering::SeqCst);
            Ok(XeroDeductionType {
                deduction_id: Some(deduction_type_id.to_string()),
                deduction_name: self.deduction_names.get(deduction_type_id).cloned(),
            })
        }
    }

    fn slip(employee: &str, name: Option<&str>, lines: &[(&str, f64)]) -> PaySlip {
        PaySlip {
            employee_id: Some(employee.to_string()),
            first_name: name.map(|n| n.to_string()),
            deduction_lines: lines
                .iter()
                .map(|(type_id, amount)| DeductionLine {
                    deduction_type_id: Some(type_id.to_string()),
                    display_name: None,
                    amount: Some(*amount),
                })
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_sync_cutoff_bounds() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        assert_eq!(sync_cutoff(today, 2).unwrap(), NaiveDate::from_ymd_opt(2026, 10, 2).unwrap());
        assert!(sync_cutoff(today, MAX_LIMIT_WEEKS).is_ok());
        assert!(matches!(sync_cutoff(today, 0), Err(AppError::InvalidRequest(_))));
        assert!(matches!(sync_cutoff(today, -3), Err(AppError::InvalidRequest(_))));
        assert!(matches!(sync_cutoff(today, 99_999_999_999), Err(AppError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_sync_rejects_huge_week_count_before_fetching() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let source = FakeSource::default();

        let result = sync_payrolls(&pool, &source, 99_999_999_999).await;

        assert!(matches!(result, Err(AppError::InvalidRequest(_))));
        assert_eq!(source.slip_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_staff_account_keywords() {
        assert!(is_staff_account_deduction("Staff Account Repayment"));
        assert!(is_staff_account_deduction("EMPLOYEE PURCHASE"));
        assert!(is_staff_account_deduction("Weekly account payment"));
        assert!(!is_staff_account_deduction("KiwiSaver"));
        assert!(!is_staff_account_deduction("Child Support"));
    }

    #[test]
    fn test_backoff_delay_uses_larger_of_header_and_exponent() {
        assert_eq!(backoff_delay(None, 0), Duration::from_secs(2));
        assert_eq!(backoff_delay(None, 2), Duration::from_secs(4));
        assert_eq!(backoff_delay(Some(10), 1), Duration::from_secs(10));
        assert_eq!(backoff_delay(Some(1), 3), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_after_rate_limits() {
        let source = FakeSource {
            rate_limits_left: AtomicU32::new(2),
            slip_pages: vec![vec![PaySlip::default()]],
            ..Default::default()
        };

        let started = Instant::now();
        let slips = fetch_all_pay_slips(&source, "pr-1").await.unwrap();

        assert_eq!(slips.len(), 1);
        assert_eq!(source.slip_calls.load(Ordering::SeqCst), 3);
        // 2s then max(2, 2)s
        assert!(started.elapsed() >= Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_three_attempts() {
        let source = FakeSource {
            rate_limits_left: AtomicU32::new(10),
            ..Default::default()
        };

        let err = fetch_all_pay_slips(&source, "pr-1").await.unwrap_err();

        assert!(matches!(err, ClientError::RateLimited { .. }));
        assert_eq!(source.slip_calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_payslips_paged_until_short_page() {
        let source = FakeSource {
            slip_pages: vec![vec![PaySlip::default(); PAGE_SIZE], vec![PaySlip::default(); 20]],
            ..Default::default()
        };

        let slips = fetch_all_pay_slips(&source, "pr-1").await.unwrap();

        assert_eq!(slips.len(), PAGE_SIZE + 20);
        assert_eq!(*source.pages_requested.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_extract_keeps_only_staff_account_lines() {
        let source = FakeSource {
            deduction_names: HashMap::from([
                ("d-staff".to_string(), "Staff Account".to_string()),
                ("d-kiwi".to_string(), "KiwiSaver".to_string()),
            ]),
            ..Default::default()
        };
        let slips = vec![
            slip("e-1", Some("Ana"), &[("d-staff", 40.0), ("d-kiwi", 30.0)]),
            slip("e-2", Some("Ben"), &[("d-staff", 0.0)]),
        ];

        let mut names = NameCache::default();
        let lines = extract_staff_deductions(&source, &slips, &mut names).await;

        assert_eq!(
            lines,
            vec![StaffDeductionLine {
                xero_employee_id: "e-1".into(),
                employee_name: "Ana".into(),
                deduction_type_id: "d-staff".into(),
                deduction_name: "Staff Account".into(),
                amount_cents: 4000,
            }]
        );
    }

    #[tokio::test]
    async fn test_extract_caches_names_and_sums_duplicates() {
        let source = FakeSource {
            deduction_names: HashMap::from([("d-staff".to_string(), "Staff Purchase".to_string())]),
            employees: HashMap::from([("e-1".to_string(), "Cara".to_string())]),
            ..Default::default()
        };
        let slips = vec![
            slip("e-1", None, &[("d-staff", 10.0), ("d-staff", 5.5)]),
            slip("e-9", None, &[("d-staff", 20.0)]),
        ];

        let mut names = NameCache::default();
        let lines = extract_staff_deductions(&source, &slips, &mut names).await;

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].employee_name, "Cara");
        assert_eq!(lines[0].amount_cents, 1550);
        assert_eq!(lines[1].employee_name, UNKNOWN_EMPLOYEE);
        assert_eq!(source.deduction_calls.load(Ordering::SeqCst), 1);
        assert_eq!(source.employee_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_extract_falls_back_to_display_name() {
        let source = FakeSource::default();
        let mut slip = slip("e-1", Some("Ana"), &[]);
        slip.deduction_lines.push(DeductionLine {
            deduction_type_id: Some("d-x".into()),
            display_name: Some("Staff Debt".into()),
            amount: Some(12.0),
        });

        let mut names = NameCache::default();
        let lines = extract_staff_deductions(&source, &[slip], &mut names).await;

        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].deduction_name, "Staff Debt");
    }

    #[test]
    fn test_payslip_totals_fall_back_to_lines() {
        let with_totals = PaySlip {
            total_earnings: Some(1000.0),
            total_deductions: Some(150.25),
            ..Default::default()
        };
        let from_lines = PaySlip {
            earnings_lines: vec![EarningsLine {
                amount: Some(300.0),
                ..Default::default()
            }],
            deduction_lines: vec![DeductionLine {
                amount: Some(20.0),
                ..Default::default()
            }],
            ..Default::default()
        };

        assert_eq!(payslip_totals(&[with_totals, from_lines]), (130000, 17025));
    }
}
