//! Employee mapping service.
//!
//! Maintains which POS customer each payroll employee's deductions are
//! paid into, including name-based auto-matching and its review workflow.

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::db::{DbPool, contains_pattern};
use crate::error::AppError;
use crate::models::mapping::{
    AutoMatchReport, BulkApproveResult, CreateMappingRequest, EmployeeMapping, MappingFilter, MappingStats,
    MappingValidation, MatchCandidate, MatchRisk, MatchSuggestion, UnmappedEmployee, UpdateMappingRequest,
    VendCustomerRow,
};

const EXACT_NAME_CONFIDENCE: f64 = 0.95;
const FUZZY_NAME_CONFIDENCE: f64 = 0.80;
const HIGH_VALUE_BLOCKED_CENTS: i64 = 100_000;
const FUZZY_CANDIDATE_LIMIT: i64 = 50;

/// POS customer lookups used by auto-matching.
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// Customer whose normalized full name equals `normalized_name`.
    async fn by_full_name(&self, normalized_name: &str) -> Result<Option<VendCustomerRow>, AppError>;

    /// Customers whose first or last name contains the given fragments.
    async fn name_candidates(&self, first: &str, last: &str, limit: i64) -> Result<Vec<VendCustomerRow>, AppError>;
}

#[async_trait]
impl CustomerDirectory for DbPool {
    async fn by_full_name(&self, normalized_name: &str) -> Result<Option<VendCustomerRow>, AppError> {
        let customer = sqlx::query_as::<_, VendCustomerRow>(
            r#"
            SELECT id, first_name, last_name, email FROM vend_customers
            WHERE deleted_at IS NULL
              AND LOWER(REGEXP_REPLACE(TRIM(CONCAT_WS(' ', TRIM(first_name), TRIM(last_name))), '\s+', ' ', 'g')) = $1
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(normalized_name)
        .fetch_optional(self)
        .await?;
        Ok(customer)
    }

    async fn name_candidates(&self, first: &str, last: &str, limit: i64) -> Result<Vec<VendCustomerRow>, AppError> {
        let candidates = sqlx::query_as::<_, VendCustomerRow>(
            r#"
            SELECT id, first_name, last_name, email FROM vend_customers
            WHERE deleted_at IS NULL AND (first_name ILIKE $1 OR last_name ILIKE $2)
            ORDER BY last_name, first_name, id
            LIMIT $3
            "#,
        )
        .bind(contains_pattern(first))
        .bind(contains_pattern(last))
        .bind(limit)
        .fetch_all(self)
        .await?;
        Ok(candidates)
    }
}

/// Classic edit distance over characters.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            current[j + 1] = (previous[j + 1] + 1).min(current[j] + 1).min(previous[j] + cost);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// `1 - distance / max_len` on trimmed, lowercased names. Empty names score 0.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();

    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let max_len = a.chars().count().max(b.chars().count());
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

pub fn confidence_level(confidence: f64) -> &'static str {
    if confidence >= 0.9 {
        "Very High"
    } else if confidence >= 0.8 {
        "High"
    } else if confidence >= 0.7 {
        "Medium"
    } else {
        "Low"
    }
}

/// Risks worth showing a reviewer before approving an auto-match.
pub fn match_risks(
    confidence: f64,
    blocked_amount_cents: i64,
    employee_email: Option<&str>,
    customer_email: Option<&str>,
) -> Vec<MatchRisk> {
    let mut risks = Vec::new();

    if confidence < 0.8 {
        risks.push(MatchRisk {
            risk_type: "low_confidence",
            level: "warning",
            message: "Confidence score below 80% - verify match accuracy",
        });
    }

    if blocked_amount_cents > HIGH_VALUE_BLOCKED_CENTS {
        risks.push(MatchRisk {
            risk_type: "high_value",
            level: "info",
            message: "High blocked amount - significant financial impact",
        });
    }

    if let (Some(e), Some(c)) = (
        employee_email.filter(|e| !e.is_empty()),
        customer_email.filter(|c| !c.is_empty()),
    ) {
        if !e.eq_ignore_ascii_case(c) {
            risks.push(MatchRisk {
                risk_type: "email_mismatch",
                level: "warning",
                message: "Employee and customer emails do not match",
            });
        }
    }

    risks
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Best POS customer for an employee name.
///
/// An exact full-name match wins outright. Otherwise a candidate whose
/// name contains both the employee's first and last name is a fuzzy
/// match; the most similar fuzzy candidate is chosen.
pub fn best_match<'a>(employee_name: &str, candidates: &'a [VendCustomerRow]) -> Option<(&'a VendCustomerRow, f64, &'static str)> {
    let wanted = normalize_name(employee_name);
    if wanted.is_empty() {
        return None;
    }

    if let Some(exact) = candidates.iter().find(|c| normalize_name(&c.full_name()) == wanted) {
        return Some((exact, EXACT_NAME_CONFIDENCE, "exact_name"));
    }

    let parts: Vec<&str> = wanted.split(' ').collect();
    if parts.len() < 2 {
        return None;
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);

    candidates
        .iter()
        .filter(|c| {
            let name = normalize_name(&c.full_name());
            name.contains(first) && name.contains(last)
        })
        .max_by(|a, b| {
            name_similarity(&a.full_name(), &wanted)
                .partial_cmp(&name_similarity(&b.full_name(), &wanted))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|c| (c, FUZZY_NAME_CONFIDENCE, "fuzzy_name"))
}

/// Find the customer to propose for an employee.
///
/// Runs an exact full-name lookup first so a crowd of partial-name
/// customers can never hide the exact one; fuzzy candidates are only
/// fetched when that finds nothing.
pub async fn find_customer(
    directory: &dyn CustomerDirectory,
    employee_name: &str,
) -> Result<Option<(VendCustomerRow, f64, &'static str)>, AppError> {
    let normalized = normalize_name(employee_name);
    if normalized.is_empty() {
        return Ok(None);
    }

    if let Some(exact) = directory.by_full_name(&normalized).await? {
        return Ok(Some((exact, EXACT_NAME_CONFIDENCE, "exact_name")));
    }

    let parts: Vec<&str> = normalized.split(' ').collect();
    if parts.len() < 2 {
        return Ok(None);
    }
    let (first, last) = (parts[0], parts[parts.len() - 1]);

    let candidates = directory.name_candidates(first, last, FUZZY_CANDIDATE_LIMIT).await?;
    Ok(best_match(employee_name, &candidates).map(|(c, confidence, kind)| (c.clone(), confidence, kind)))
}

/// Email and name checks for a proposed manual mapping.
pub fn assess_match(
    employee_name: &str,
    employee_email: Option<&str>,
    customer: &VendCustomerRow,
    validation: &mut MappingValidation,
) {
    match (
        employee_email.filter(|e| !e.is_empty()),
        customer.email.as_deref().filter(|e| !e.is_empty()),
    ) {
        (Some(e), Some(c)) if e.eq_ignore_ascii_case(c) => validation
            .suggestions
            .push("Email addresses match - excellent indicator".to_string()),
        (Some(_), Some(_)) => validation.warnings.push("Email addresses do not match".to_string()),
        (_, None) => validation
            .warnings
            .push("Customer has no email address on file".to_string()),
        (None, Some(_)) => {}
    }

    let similarity = name_similarity(employee_name, &customer.full_name());
    if similarity > 0.8 {
        validation
            .suggestions
            .push("Names are very similar - good match indicator".to_string());
    } else if similarity < 0.5 {
        validation
            .warnings
            .push("Names are quite different - verify this is correct".to_string());
    }
    validation.name_similarity = Some((similarity * 100.0).round() / 100.0);
}

fn required(value: &Option<String>, field: &str) -> Result<String, AppError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::InvalidRequest(format!("Missing required field: {}", field)))
}

/// Point unallocated deductions of an employee at their newly mapped customer.
async fn backfill_deductions(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    xero_employee_id: &str,
    vend_customer_id: &str,
) -> Result<u64, AppError> {
    let result = sqlx::query(
        r#"
        UPDATE xero_payroll_deductions
        SET vend_customer_id = $1, updated_at = NOW()
        WHERE xero_employee_id = $2
          AND vend_customer_id IS NULL
          AND status IN ('pending', 'failed')
        "#,
    )
    .bind(vend_customer_id)
    .bind(xero_employee_id)
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

async fn log_action(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    mapping_id: Uuid,
    action: &str,
    actor: &str,
    details: serde_json::Value,
) -> Result<(), AppError> {
    sqlx::query("INSERT INTO employee_mapping_log (mapping_id, action, actor, details) VALUES ($1, $2, $3, $4)")
        .bind(mapping_id)
        .bind(action)
        .bind(actor)
        .bind(details)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Create an approved manual mapping.
pub async fn create_mapping(pool: &DbPool, actor: &str, request: CreateMappingRequest) -> Result<EmployeeMapping, AppError> {
    let xero_employee_id = required(&request.xero_employee_id, "xero_employee_id")?;
    let employee_name = required(&request.employee_name, "employee_name")?;
    let vend_customer_id = required(&request.vend_customer_id, "vend_customer_id")?;

    let mut tx = pool.begin().await?;

    let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM employee_mappings WHERE xero_employee_id = $1")
        .bind(&xero_employee_id)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_some() {
        return Err(AppError::Conflict("Employee already mapped".to_string()));
    }

    let mapping = sqlx::query_as::<_, EmployeeMapping>(
        r#"
        INSERT INTO employee_mappings (
            xero_employee_id, employee_name, employee_email, vend_customer_id,
            vend_customer_name, vend_customer_email, match_type, confidence, status,
            store_id, reviewed_by, reviewed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, 'manual', 1.0, 'mapped', $7, $8, NOW())
        RETURNING *
        "#,
    )
    .bind(&xero_employee_id)
    .bind(&employee_name)
    .bind(&request.employee_email)
    .bind(&vend_customer_id)
    .bind(&request.vend_customer_name)
    .bind(&request.vend_customer_email)
    .bind(&request.store_id)
    .bind(actor)
    .fetch_one(&mut *tx)
    .await?;

    let backfilled = backfill_deductions(&mut tx, &xero_employee_id, &vend_customer_id).await?;
    log_action(
        &mut tx,
        mapping.id,
        "created",
        actor,
        serde_json::json!({ "vend_customer_id": vend_customer_id, "backfilled": backfilled }),
    )
    .await?;

    tx.commit().await?;

    tracing::info!(mapping_id = %mapping.id, xero_employee_id = %xero_employee_id, backfilled, "Employee mapping created");
    Ok(mapping)
}

pub async fn get_mapping(pool: &DbPool, id: Uuid) -> Result<EmployeeMapping, AppError> {
    sqlx::query_as::<_, EmployeeMapping>("SELECT * FROM employee_mappings WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Mapping not found".to_string()))
}

pub async fn list_mappings(pool: &DbPool, filter: &MappingFilter) -> Result<Vec<EmployeeMapping>, AppError> {
    let pattern = filter
        .q
        .as_deref()
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(contains_pattern);

    let mappings = sqlx::query_as::<_, EmployeeMapping>(
        r#"
        SELECT * FROM employee_mappings
        WHERE ($1::TEXT IS NULL OR status = $1)
          AND ($2::TEXT IS NULL OR store_id = $2)
          AND ($3::TEXT IS NULL OR employee_name ILIKE $3 OR vend_customer_name ILIKE $3)
        ORDER BY employee_name
        "#,
    )
    .bind(&filter.status)
    .bind(&filter.store_id)
    .bind(pattern)
    .fetch_all(pool)
    .await?;
    Ok(mappings)
}

pub async fn update_mapping(pool: &DbPool, id: Uuid, request: UpdateMappingRequest) -> Result<EmployeeMapping, AppError> {
    if request.is_empty() {
        return Err(AppError::InvalidRequest("No valid fields to update".to_string()));
    }

    sqlx::query_as::<_, EmployeeMapping>(
        r#"
        UPDATE employee_mappings SET
            employee_name = COALESCE($2, employee_name),
            employee_email = COALESCE($3, employee_email),
            vend_customer_id = COALESCE($4, vend_customer_id),
            vend_customer_name = COALESCE($5, vend_customer_name),
            vend_customer_email = COALESCE($6, vend_customer_email),
            store_id = COALESCE($7, store_id),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(request.employee_name)
    .bind(request.employee_email)
    .bind(request.vend_customer_id)
    .bind(request.vend_customer_name)
    .bind(request.vend_customer_email)
    .bind(request.store_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Mapping not found".to_string()))
}

pub async fn delete_mapping(pool: &DbPool, id: Uuid) -> Result<(), AppError> {
    let result = sqlx::query("DELETE FROM employee_mappings WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Mapping not found".to_string()));
    }
    Ok(())
}

/// Employees with pending deductions and no mapping row of any status.
pub async fn unmapped_employees(pool: &DbPool) -> Result<Vec<UnmappedEmployee>, AppError> {
    let rows = sqlx::query_as::<_, UnmappedEmployee>(
        r#"
        SELECT d.xero_employee_id,
               MAX(d.employee_name) AS employee_name,
               COUNT(d.id)::BIGINT AS pending_deductions,
               COALESCE(SUM(d.amount_cents), 0)::BIGINT AS total_cents,
               MAX(d.created_at) AS latest_deduction_at
        FROM xero_payroll_deductions d
        LEFT JOIN employee_mappings m ON m.xero_employee_id = d.xero_employee_id
        WHERE m.id IS NULL AND d.status = 'pending'
        GROUP BY d.xero_employee_id
        ORDER BY total_cents DESC
        "#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Propose customers for every unmapped employee and store them for review.
pub async fn auto_match(pool: &DbPool) -> Result<AutoMatchReport, AppError> {
    let employees = unmapped_employees(pool).await?;
    let mut report = AutoMatchReport::default();

    for employee in employees {
        let Some((customer, confidence, match_type)) = find_customer(pool, &employee.employee_name).await? else {
            report.unmatched += 1;
            continue;
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO employee_mappings (
                xero_employee_id, employee_name, vend_customer_id, vend_customer_name,
                vend_customer_email, match_type, confidence, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 'auto_matched')
            ON CONFLICT (xero_employee_id) DO NOTHING
            "#,
        )
        .bind(&employee.xero_employee_id)
        .bind(&employee.employee_name)
        .bind(&customer.id)
        .bind(customer.full_name())
        .bind(&customer.email)
        .bind(match_type)
        .bind(confidence)
        .execute(pool)
        .await?;

        if inserted.rows_affected() == 0 {
            continue;
        }

        report.matched += 1;
        report.matches.push(MatchCandidate {
            xero_employee_id: employee.xero_employee_id,
            employee_name: employee.employee_name,
            vend_customer_id: customer.id.clone(),
            vend_customer_name: customer.full_name(),
            confidence,
            match_type: match_type.to_string(),
        });
    }

    tracing::info!(matched = report.matched, unmatched = report.unmatched, "Auto-match finished");
    Ok(report)
}

/// Auto-matches awaiting review, most confident first.
pub async fn suggestions(pool: &DbPool, limit: i64, min_confidence: f64) -> Result<Vec<MatchSuggestion>, AppError> {
    let mappings = sqlx::query_as::<_, EmployeeMapping>(
        r#"
        SELECT * FROM employee_mappings
        WHERE status = 'auto_matched' AND confidence >= $1
        ORDER BY confidence DESC, created_at
        LIMIT $2
        "#,
    )
    .bind(min_confidence)
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await?;

    let employee_ids: Vec<String> = mappings.iter().map(|m| m.xero_employee_id.clone()).collect();
    let blocked: HashMap<String, i64> = sqlx::query_as::<_, (String, i64)>(
        r#"
        SELECT xero_employee_id, COALESCE(SUM(amount_cents), 0)::BIGINT
        FROM xero_payroll_deductions
        WHERE status = 'pending' AND vend_customer_id IS NULL AND xero_employee_id = ANY($1)
        GROUP BY xero_employee_id
        "#,
    )
    .bind(&employee_ids)
    .fetch_all(pool)
    .await?
    .into_iter()
    .collect();

    Ok(mappings
        .into_iter()
        .map(|mapping| {
            let blocked_amount_cents = blocked.get(&mapping.xero_employee_id).copied().unwrap_or(0);
            let risks = match_risks(
                mapping.confidence,
                blocked_amount_cents,
                mapping.employee_email.as_deref(),
                mapping.vend_customer_email.as_deref(),
            );
            MatchSuggestion {
                confidence_level: confidence_level(mapping.confidence),
                blocked_amount_cents,
                risks,
                mapping,
            }
        })
        .collect())
}

/// Accept an auto-match; its customer starts receiving the employee's deductions.
pub async fn approve_auto_match(
    pool: &DbPool,
    id: Uuid,
    approved_by: &str,
    notes: Option<String>,
) -> Result<EmployeeMapping, AppError> {
    let mut tx = pool.begin().await?;

    let mapping = sqlx::query_as::<_, EmployeeMapping>(
        r#"
        UPDATE employee_mappings
        SET status = 'mapped', reviewed_by = $2, reviewed_at = NOW(), review_notes = $3, updated_at = NOW()
        WHERE id = $1 AND status = 'auto_matched'
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(approved_by)
    .bind(&notes)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Auto-match suggestion not found or already processed".to_string()))?;

    let backfilled = backfill_deductions(&mut tx, &mapping.xero_employee_id, &mapping.vend_customer_id).await?;
    log_action(
        &mut tx,
        mapping.id,
        "auto_match_approved",
        approved_by,
        serde_json::json!({
            "vend_customer_id": mapping.vend_customer_id,
            "confidence": mapping.confidence,
            "notes": notes,
            "backfilled": backfilled,
        }),
    )
    .await?;

    tx.commit().await?;
    Ok(mapping)
}

pub async fn reject_auto_match(pool: &DbPool, id: Uuid, rejected_by: &str, reason: &str) -> Result<EmployeeMapping, AppError> {
    if reason.trim().is_empty() {
        return Err(AppError::InvalidRequest("A rejection reason is required".to_string()));
    }

    let mut tx = pool.begin().await?;

    let mapping = sqlx::query_as::<_, EmployeeMapping>(
        r#"
        UPDATE employee_mappings
        SET status = 'auto_match_rejected', reviewed_by = $2, reviewed_at = NOW(), review_notes = $3, updated_at = NOW()
        WHERE id = $1 AND status = 'auto_matched'
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(rejected_by)
    .bind(reason.trim())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Auto-match suggestion not found or already processed".to_string()))?;

    log_action(
        &mut tx,
        mapping.id,
        "auto_match_rejected",
        rejected_by,
        serde_json::json!({ "reason": reason.trim() }),
    )
    .await?;

    tx.commit().await?;
    Ok(mapping)
}

pub async fn bulk_approve(pool: &DbPool, ids: &[Uuid], approved_by: &str, notes: Option<String>) -> BulkApproveResult {
    let mut result = BulkApproveResult::default();

    for id in ids {
        match approve_auto_match(pool, *id, approved_by, notes.clone()).await {
            Ok(_) => result.approved += 1,
            Err(e) => {
                result.failed += 1;
                result.errors.push(format!("Mapping {}: {}", id, e));
            }
        }
    }

    result
}

/// Check a proposed manual mapping without writing anything.
pub async fn validate_manual_mapping(
    pool: &DbPool,
    xero_employee_id: &str,
    vend_customer_id: &str,
) -> Result<MappingValidation, AppError> {
    let mut validation = MappingValidation {
        valid: true,
        ..Default::default()
    };

    let existing = sqlx::query_as::<_, EmployeeMapping>("SELECT * FROM employee_mappings WHERE xero_employee_id = $1")
        .bind(xero_employee_id)
        .fetch_optional(pool)
        .await?;

    let employee_name = match &existing {
        Some(m) => Some(m.employee_name.clone()),
        None => {
            sqlx::query_scalar::<_, String>(
                "SELECT employee_name FROM xero_payroll_deductions WHERE xero_employee_id = $1 LIMIT 1",
            )
            .bind(xero_employee_id)
            .fetch_optional(pool)
            .await?
        }
    };

    let Some(employee_name) = employee_name else {
        validation.valid = false;
        validation.errors.push("Employee not found in system".to_string());
        return Ok(validation);
    };

    if existing.as_ref().is_some_and(|m| m.status == "mapped") {
        validation.valid = false;
        validation
            .errors
            .push("Employee already has an active mapping".to_string());
    }

    let customer = sqlx::query_as::<_, VendCustomerRow>(
        "SELECT id, first_name, last_name, email FROM vend_customers WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(vend_customer_id)
    .fetch_optional(pool)
    .await?;

    let Some(customer) = customer else {
        validation.valid = false;
        validation.errors.push("Customer not found".to_string());
        return Ok(validation);
    };

    let mapped_to: Option<String> = sqlx::query_scalar(
        r#"
        SELECT employee_name FROM employee_mappings
        WHERE vend_customer_id = $1 AND status = 'mapped' AND xero_employee_id <> $2
        LIMIT 1
        "#,
    )
    .bind(vend_customer_id)
    .bind(xero_employee_id)
    .fetch_optional(pool)
    .await?;

    if let Some(other) = mapped_to {
        validation.valid = false;
        validation.errors.push(format!("Customer already mapped to: {}", other));
    }

    let employee_email = existing.as_ref().and_then(|m| m.employee_email.clone());
    assess_match(&employee_name, employee_email.as_deref(), &customer, &mut validation);

    Ok(validation)
}

pub async fn stats(pool: &DbPool) -> Result<MappingStats, AppError> {
    let (total_mappings, mapped_count, avg_confidence): (i64, i64, f64) = sqlx::query_as(
        r#"
        SELECT COUNT(*)::BIGINT,
               COUNT(*) FILTER (WHERE status = 'mapped')::BIGINT,
               COALESCE(AVG(confidence) FILTER (WHERE status = 'mapped'), 0)::FLOAT8
        FROM employee_mappings
        "#,
    )
    .fetch_one(pool)
    .await?;

    let (unmapped_with_pending, blocked_amount_cents): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(DISTINCT d.xero_employee_id)::BIGINT,
               COALESCE(SUM(d.amount_cents), 0)::BIGINT
        FROM xero_payroll_deductions d
        LEFT JOIN employee_mappings m ON m.xero_employee_id = d.xero_employee_id AND m.status = 'mapped'
        WHERE d.status = 'pending' AND m.id IS NULL
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok(MappingStats {
        total_mappings,
        mapped_count,
        unmapped_count: total_mappings - mapped_count,
        unmapped_with_pending,
        avg_confidence: (avg_confidence * 100.0).round() / 100.0,
        blocked_amount_cents,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customer(id: &str, first: &str, last: &str, email: Option<&str>) -> VendCustomerRow {
        VendCustomerRow {
            id: id.to_string(),
            first_name: Some(first.to_string()),
            last_name: Some(last.to_string()),
            email: email.map(|e| e.to_string()),
        }
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
        assert_eq!(levenshtein("māori", "maori"), 1);
    }

    #[test]
    fn test_name_similarity() {
        assert_eq!(name_similarity("  Ana Ngata ", "ana ngata"), 1.0);
        assert_eq!(name_similarity("", "Ana"), 0.0);
        let close = name_similarity("Jon Smith", "John Smith");
        assert!(close > 0.8 && close < 1.0);
        assert!(name_similarity("Ana Ngata", "Zed Brown") < 0.5);
    }

    #[test]
    fn test_confidence_levels() {
        assert_eq!(confidence_level(0.95), "Very High");
        assert_eq!(confidence_level(0.8), "High");
        assert_eq!(confidence_level(0.75), "Medium");
        assert_eq!(confidence_level(0.6), "Low");
    }

    #[test]
    fn test_match_risks() {
        let risks = match_risks(0.7, 150_000, Some("a@x.nz"), Some("b@x.nz"));
        let kinds: Vec<_> = risks.iter().map(|r| r.risk_type).collect();
        assert_eq!(kinds, vec!["low_confidence", "high_value", "email_mismatch"]);

        assert!(match_risks(0.95, 100_000, Some("A@X.nz"), Some("a@x.NZ")).is_empty());
        assert!(match_risks(0.95, 0, None, Some("a@x.nz")).is_empty());
    }

    #[test]
    fn test_best_match_prefers_exact() {
        let candidates = vec![
            customer("c1", "Ana", "Ngata-Smith", None),
            customer("c2", "ana", "ngata", None),
        ];

        let (found, confidence, kind) = best_match("Ana  Ngata", &candidates).unwrap();
        assert_eq!(found.id, "c2");
        assert_eq!(confidence, 0.95);
        assert_eq!(kind, "exact_name");
    }

    #[test]
    fn test_best_match_fuzzy_needs_first_and_last() {
        let candidates = vec![
            customer("c1", "Ana", "Brown", None),
            customer("c2", "Anahera", "Ngata", None),
        ];

        let (found, confidence, kind) = best_match("Ana Ngata", &candidates).unwrap();
        assert_eq!(found.id, "c2");
        assert_eq!(confidence, 0.80);
        assert_eq!(kind, "fuzzy_name");

        assert!(best_match("Ana", &candidates).is_none());
        assert!(best_match("Zed Ngata", &candidates).is_none());
    }

    #[derive(Default)]
    struct FakeDirectory {
        customers: Vec<VendCustomerRow>,
        candidate_calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl CustomerDirectory for FakeDirectory {
        async fn by_full_name(&self, normalized_name: &str) -> Result<Option<VendCustomerRow>, AppError> {
            Ok(self
                .customers
                .iter()
                .find(|c| normalize_name(&c.full_name()) == normalized_name)
                .cloned())
        }

        async fn name_candidates(&self, first: &str, last: &str, limit: i64) -> Result<Vec<VendCustomerRow>, AppError> {
            self.candidate_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(self
                .customers
                .iter()
                .filter(|c| {
                    let f = c.first_name.as_deref().unwrap_or("").to_lowercase();
                    let l = c.last_name.as_deref().unwrap_or("").to_lowercase();
                    f.contains(first) || l.contains(last)
                })
                .take(limit as usize)
                .cloned()
                .collect())
        }
    }

    #[tokio::test]
    async fn test_find_customer_exact_match_survives_many_decoys() {
        let mut customers: Vec<VendCustomerRow> = (0..60)
            .map(|i| customer(&format!("decoy-{}", i), &format!("Jo{}", i), "Smithson", None))
            .collect();
        customers.push(customer("exact", "John", "Smith", Some("john@store.nz")));
        let directory = FakeDirectory {
            customers,
            ..Default::default()
        };

        let (found, confidence, kind) = find_customer(&directory, "John  Smith").await.unwrap().unwrap();

        assert_eq!(found.id, "exact");
        assert_eq!(confidence, 0.95);
        assert_eq!(kind, "exact_name");
        assert_eq!(directory.candidate_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_find_customer_falls_back_to_fuzzy() {
        let directory = FakeDirectory {
            customers: vec![
                customer("c1", "Ana", "Brown", None),
                customer("c2", "Anahera", "Ngata", None),
            ],
            ..Default::default()
        };

        let (found, _, kind) = find_customer(&directory, "Ana Ngata").await.unwrap().unwrap();
        assert_eq!(found.id, "c2");
        assert_eq!(kind, "fuzzy_name");

        assert!(find_customer(&directory, "Ana").await.unwrap().is_none());
        assert!(find_customer(&directory, "   ").await.unwrap().is_none());
    }

    #[test]
    fn test_assess_match_collects_notes() {
        let mut validation = MappingValidation {
            valid: true,
            ..Default::default()
        };
        let c = customer("c1", "Ana", "Ngata", Some("ana@store.nz"));

        assess_match("Ana Ngata", Some("ANA@store.nz"), &c, &mut validation);

        assert!(validation.valid);
        assert_eq!(validation.suggestions.len(), 2);
        assert!(validation.warnings.is_empty());
        assert_eq!(validation.name_similarity, Some(1.0));

        let mut validation = MappingValidation::default();
        let c = customer("c2", "Zed", "Brown", None);
        assess_match("Ana Ngata", Some("ana@store.nz"), &c, &mut validation);
        assert_eq!(
            validation.warnings,
            vec![
                "Customer has no email address on file".to_string(),
                "Names are quite different - verify this is correct".to_string()
            ]
        );
    }

    #[test]
    fn test_required_field_message() {
        let err = required(&Some("  ".to_string()), "employee_name").unwrap_err();
        assert_eq!(err.to_string(), "Missing required field: employee_name");
        assert_eq!(required(&Some(" x ".to_string()), "f").unwrap(), "x");
    }
}
