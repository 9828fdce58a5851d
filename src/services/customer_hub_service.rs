//! Customer hub: the staff-facing customer record with notes, tags,
//! flags, communications and purchase history.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::db::{DbPool, Paginated, contains_pattern};
use crate::error::AppError;
use crate::models::customer::{
    Communication, CommunicationLog, CustomerListFilter, CustomerNote, CustomerProfile, CustomerProfileView,
    CustomerSummary, IdStatus, Purchase, PurchaseHistory, RecordCommunicationRequest, UpdateCustomerRequest,
};
use crate::models::email::Email;

static TAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{2,20}$").expect("tag pattern is valid"));

const SUMMARY_COLUMNS: &str =
    "id, full_name, email, phone, is_vip, is_flagged, id_verified, purchase_count, total_spent_cents, created_at";

/// Classify how often a customer buys from their sale dates.
pub fn purchase_frequency(dates: &[DateTime<Utc>]) -> &'static str {
    match dates.len() {
        0 => return "never",
        1 => return "one-time",
        _ => {}
    }

    let (Some(first), Some(last)) = (dates.iter().min(), dates.iter().max()) else {
        return "never";
    };

    let days = (*last - *first).num_days();
    if days == 0 {
        return "multiple-same-day";
    }

    let average_gap = days as f64 / (dates.len() - 1) as f64;
    if average_gap < 30.0 {
        "very-frequent"
    } else if average_gap < 90.0 {
        "frequent"
    } else if average_gap < 180.0 {
        "regular"
    } else {
        "occasional"
    }
}

pub fn normalize_tag(tag: &str) -> Result<String, AppError> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(AppError::InvalidRequest("Tag cannot be empty".to_string()));
    }
    if !TAG_PATTERN.is_match(tag) {
        return Err(AppError::InvalidRequest("Invalid tag format".to_string()));
    }
    Ok(tag.to_string())
}

fn required_text<'a>(value: &'a str, message: &str) -> Result<&'a str, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::InvalidRequest(message.to_string()));
    }
    Ok(value)
}

async fn fetch_profile(pool: &DbPool, id: Uuid) -> Result<CustomerProfile, AppError> {
    sqlx::query_as::<_, CustomerProfile>("SELECT * FROM customer_hub_profile WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Customer not found".to_string()))
}

async fn ensure_exists(pool: &DbPool, id: Uuid) -> Result<(), AppError> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM customer_hub_profile WHERE id = $1)")
        .bind(id)
        .fetch_one(pool)
        .await?;
    if !exists {
        return Err(AppError::NotFound("Customer not found".to_string()));
    }
    Ok(())
}

pub async fn search(pool: &DbPool, q: &str, limit: i64) -> Result<Vec<CustomerSummary>, AppError> {
    let q = required_text(q, "Please provide a search query")?;

    let rows = sqlx::query_as::<_, CustomerSummary>(&format!(
        r#"
        SELECT {} FROM customer_hub_profile
        WHERE full_name ILIKE $1 OR email ILIKE $1 OR phone ILIKE $1
        ORDER BY is_vip DESC, full_name
        LIMIT $2
        "#,
        SUMMARY_COLUMNS
    ))
    .bind(contains_pattern(q))
    .bind(limit.clamp(1, 100))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

async fn sale_dates(pool: &DbPool, vend_customer_id: Option<&str>) -> Result<Vec<DateTime<Utc>>, AppError> {
    let Some(customer) = vend_customer_id else {
        return Ok(Vec::new());
    };
    let dates = sqlx::query_scalar::<_, DateTime<Utc>>(
        "SELECT sale_date FROM vend_sales WHERE customer_id = $1 AND sale_date IS NOT NULL AND deleted_at IS NULL",
    )
    .bind(customer)
    .fetch_all(pool)
    .await?;
    Ok(dates)
}

pub async fn profile(pool: &DbPool, id: Uuid) -> Result<CustomerProfileView, AppError> {
    let profile = fetch_profile(pool, id).await?;

    let tags: Vec<String> = sqlx::query_scalar("SELECT tag FROM customer_hub_tags WHERE customer_id = $1 ORDER BY tag")
        .bind(id)
        .fetch_all(pool)
        .await?;

    let notes_count: i64 = sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM customer_hub_notes WHERE customer_id = $1")
        .bind(id)
        .fetch_one(pool)
        .await?;

    let id_verification = id_status(pool, id).await?;
    let dates = sale_dates(pool, profile.vend_customer_id.as_deref()).await?;

    Ok(CustomerProfileView {
        purchase_frequency: purchase_frequency(&dates),
        profile,
        tags,
        notes_count,
        id_verification,
    })
}

pub async fn id_status(pool: &DbPool, id: Uuid) -> Result<Option<IdStatus>, AppError> {
    let status = sqlx::query_as::<_, IdStatus>(
        r#"
        SELECT id AS verification_id, trace_id, status, score, created_at
        FROM id_verifications
        WHERE customer_id = $1
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(status)
}

pub async fn update(pool: &DbPool, id: Uuid, request: UpdateCustomerRequest) -> Result<CustomerProfile, AppError> {
    if request.is_empty() {
        return Err(AppError::InvalidRequest("No valid fields to update".to_string()));
    }

    sqlx::query_as::<_, CustomerProfile>(
        r#"
        UPDATE customer_hub_profile SET
            full_name = COALESCE($2, full_name),
            email = COALESCE($3, email),
            phone = COALESCE($4, phone),
            date_of_birth = COALESCE($5, date_of_birth),
            address = COALESCE($6, address),
            suburb = COALESCE($7, suburb),
            postcode = COALESCE($8, postcode),
            preferred_contact = COALESCE($9, preferred_contact),
            communication_preference = COALESCE($10, communication_preference),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(request.full_name)
    .bind(request.email)
    .bind(request.phone)
    .bind(request.date_of_birth)
    .bind(request.address)
    .bind(request.suburb)
    .bind(request.postcode)
    .bind(request.preferred_contact)
    .bind(request.communication_preference)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("Customer not found".to_string()))
}

pub async fn emails(pool: &DbPool, id: Uuid, limit: i64) -> Result<Vec<Email>, AppError> {
    ensure_exists(pool, id).await?;

    let emails = sqlx::query_as::<_, Email>(
        "SELECT * FROM emails WHERE customer_id = $1 ORDER BY created_at DESC LIMIT $2",
    )
    .bind(id)
    .bind(limit.clamp(1, 200))
    .fetch_all(pool)
    .await?;
    Ok(emails)
}

pub async fn purchase_history(pool: &DbPool, id: Uuid, limit: i64) -> Result<PurchaseHistory, AppError> {
    let profile = fetch_profile(pool, id).await?;

    let purchases = match profile.vend_customer_id.as_deref() {
        Some(customer) => {
            sqlx::query_as::<_, Purchase>(
                r#"
                SELECT id, sale_date, status, total_price_cents, total_paid_cents
                FROM vend_sales
                WHERE customer_id = $1 AND deleted_at IS NULL
                ORDER BY sale_date DESC NULLS LAST
                LIMIT $2
                "#,
            )
            .bind(customer)
            .bind(limit.clamp(1, 500))
            .fetch_all(pool)
            .await?
        }
        None => Vec::new(),
    };

    let total_spent_cents: i64 = purchases.iter().map(|p| p.total_price_cents).sum();
    let average_order_cents = if purchases.is_empty() {
        0
    } else {
        total_spent_cents / purchases.len() as i64
    };
    let dates: Vec<DateTime<Utc>> = purchases.iter().filter_map(|p| p.sale_date).collect();

    Ok(PurchaseHistory {
        count: purchases.len(),
        frequency: purchase_frequency(&dates),
        purchases,
        total_spent_cents,
        average_order_cents,
    })
}

pub async fn communications(pool: &DbPool, id: Uuid, limit: i64) -> Result<CommunicationLog, AppError> {
    ensure_exists(pool, id).await?;

    let communications = sqlx::query_as::<_, Communication>(
        "SELECT * FROM customer_hub_communications WHERE customer_id = $1 ORDER BY created_at DESC LIMIT $2",
    )
    .bind(id)
    .bind(limit.clamp(1, 500))
    .fetch_all(pool)
    .await?;

    let mut by_type: BTreeMap<String, Vec<Communication>> = BTreeMap::new();
    for c in &communications {
        by_type.entry(c.communication_type.clone()).or_default().push(c.clone());
    }

    Ok(CommunicationLog {
        count: communications.len(),
        communications,
        by_type,
    })
}

pub async fn add_note(
    pool: &DbPool,
    id: Uuid,
    staff_id: Uuid,
    staff_name: &str,
    note: &str,
) -> Result<CustomerNote, AppError> {
    let note = required_text(note, "Note cannot be empty")?;
    ensure_exists(pool, id).await?;

    let saved = sqlx::query_as::<_, CustomerNote>(
        "INSERT INTO customer_hub_notes (customer_id, note, staff_id, staff_name) VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(id)
    .bind(note)
    .bind(staff_id)
    .bind(staff_name)
    .fetch_one(pool)
    .await?;
    Ok(saved)
}

async fn update_flags(pool: &DbPool, id: Uuid, sql: &str, value: Option<&str>) -> Result<(), AppError> {
    let result = sqlx::query(sql).bind(id).bind(value).execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Customer not found".to_string()));
    }
    Ok(())
}

pub async fn flag(pool: &DbPool, id: Uuid, reason: &str) -> Result<(), AppError> {
    let reason = required_text(reason, "Reason is required")?;
    update_flags(
        pool,
        id,
        "UPDATE customer_hub_profile SET is_flagged = TRUE, flag_reason = $2, updated_at = NOW() WHERE id = $1",
        Some(reason),
    )
    .await
}

pub async fn unflag(pool: &DbPool, id: Uuid) -> Result<(), AppError> {
    update_flags(
        pool,
        id,
        "UPDATE customer_hub_profile SET is_flagged = FALSE, flag_reason = $2, updated_at = NOW() WHERE id = $1",
        None,
    )
    .await
}

pub async fn set_vip(pool: &DbPool, id: Uuid, is_vip: bool) -> Result<(), AppError> {
    let result = sqlx::query("UPDATE customer_hub_profile SET is_vip = $2, updated_at = NOW() WHERE id = $1")
        .bind(id)
        .bind(is_vip)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Customer not found".to_string()));
    }
    Ok(())
}

/// Attach a tag. Adding an existing tag is a no-op.
pub async fn add_tag(pool: &DbPool, id: Uuid, tag: &str) -> Result<Vec<String>, AppError> {
    let tag = normalize_tag(tag)?;
    ensure_exists(pool, id).await?;

    sqlx::query("INSERT INTO customer_hub_tags (customer_id, tag) VALUES ($1, $2) ON CONFLICT (customer_id, tag) DO NOTHING")
        .bind(id)
        .bind(&tag)
        .execute(pool)
        .await?;

    let tags = sqlx::query_scalar("SELECT tag FROM customer_hub_tags WHERE customer_id = $1 ORDER BY tag")
        .bind(id)
        .fetch_all(pool)
        .await?;
    Ok(tags)
}

pub async fn record_communication(
    pool: &DbPool,
    id: Uuid,
    staff_id: Uuid,
    request: RecordCommunicationRequest,
) -> Result<Communication, AppError> {
    let (Some(kind), Some(direction)) = (
        request.communication_type.as_deref().map(str::trim).filter(|t| !t.is_empty()),
        request.direction.as_deref().map(str::trim).filter(|d| !d.is_empty()),
    ) else {
        return Err(AppError::InvalidRequest(
            "Missing required fields: communication_type, direction".to_string(),
        ));
    };

    if !matches!(direction, "inbound" | "outbound") {
        return Err(AppError::InvalidRequest("Direction must be inbound or outbound".to_string()));
    }

    ensure_exists(pool, id).await?;

    let saved = sqlx::query_as::<_, Communication>(
        r#"
        INSERT INTO customer_hub_communications
            (customer_id, communication_type, direction, subject, summary, email_id, staff_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(kind)
    .bind(direction)
    .bind(&request.subject)
    .bind(&request.summary)
    .bind(request.email_id)
    .bind(staff_id)
    .fetch_one(pool)
    .await?;
    Ok(saved)
}

pub async fn list(pool: &DbPool, filter: &CustomerListFilter) -> Result<Paginated<CustomerSummary>, AppError> {
    let params = filter.page_params();

    const WHERE: &str = r#"
        WHERE (NOT $1 OR is_vip)
          AND (NOT $2 OR is_flagged)
          AND (NOT $3 OR id_verified)
    "#;

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*)::BIGINT FROM customer_hub_profile {}", WHERE))
        .bind(filter.vip_only)
        .bind(filter.flagged_only)
        .bind(filter.id_verified)
        .fetch_one(pool)
        .await?;

    let items = sqlx::query_as::<_, CustomerSummary>(&format!(
        "SELECT {} FROM customer_hub_profile {} ORDER BY created_at DESC LIMIT $4 OFFSET $5",
        SUMMARY_COLUMNS, WHERE
    ))
    .bind(filter.vip_only)
    .bind(filter.flagged_only)
    .bind(filter.id_verified)
    .bind(params.per_page())
    .bind(params.offset())
    .fetch_all(pool)
    .await?;

    Ok(Paginated::new(items, params, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_purchase_frequency_edges() {
        assert_eq!(purchase_frequency(&[]), "never");
        assert_eq!(purchase_frequency(&[day(2025, 1, 1, 9)]), "one-time");
        assert_eq!(
            purchase_frequency(&[day(2025, 1, 1, 9), day(2025, 1, 1, 17)]),
            "multiple-same-day"
        );
    }

    #[test]
    fn test_purchase_frequency_bands() {
        // 3 purchases over 40 days: 20 day gap
        let frequent = [day(2025, 1, 1, 9), day(2025, 1, 21, 9), day(2025, 2, 10, 9)];
        assert_eq!(purchase_frequency(&frequent), "very-frequent");

        assert_eq!(purchase_frequency(&[day(2025, 1, 1, 9), day(2025, 3, 1, 9)]), "frequent");
        assert_eq!(purchase_frequency(&[day(2025, 1, 1, 9), day(2025, 5, 1, 9)]), "regular");
        assert_eq!(purchase_frequency(&[day(2024, 1, 1, 9), day(2025, 1, 1, 9)]), "occasional");
    }

    #[test]
    fn test_purchase_frequency_ignores_order() {
        let unordered = [day(2025, 3, 1, 9), day(2025, 1, 1, 9)];
        assert_eq!(purchase_frequency(&unordered), "frequent");
    }

    #[test]
    fn test_tag_validation() {
        assert_eq!(normalize_tag("  vip-2025 ").unwrap(), "vip-2025");
        assert!(normalize_tag("a").is_err());
        assert!(normalize_tag("has space").is_err());
        assert!(normalize_tag(&"x".repeat(21)).is_err());
        assert_eq!(normalize_tag("").unwrap_err().to_string(), "Tag cannot be empty");
    }
}
