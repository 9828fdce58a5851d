//! Mailbox helpers for staff: reply templates, follow-up reminders,
//! email flags and the priority inbox.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::email::{
    CreateReminderRequest, CreateTemplateRequest, DueReminder, EmailTemplate, FollowUpReminder, InboxRow,
    PriorityEmail,
};

const FLAGGED_SCORE: i32 = 100;
const URGENT_SUBJECT_SCORE: i32 = 80;
const FREQUENT_SENDER_SCORE: i32 = 75;
const RECENT_SCORE: i32 = 60;
const BASE_SCORE: i32 = 40;

/// Lowest score that makes it into the priority inbox.
pub const PRIORITY_THRESHOLD: i32 = RECENT_SCORE;

/// A sender with more emails than this to the same staff member is a regular.
const FREQUENT_SENDER_EMAILS: i64 = 5;
const URGENT_SUBJECT_WORDS: [&str; 2] = ["urgent", "important"];

pub const DEFAULT_PRIORITY_DAYS: i64 = 7;
const MAX_PRIORITY_DAYS: i64 = 90;

/// Importance of an inbound email. The first rule that applies wins.
pub fn priority_score(row: &InboxRow, now: DateTime<Utc>) -> i32 {
    if row.is_flagged {
        return FLAGGED_SCORE;
    }
    if row.sender_count > FREQUENT_SENDER_EMAILS {
        return FREQUENT_SENDER_SCORE;
    }

    let subject = row.subject.as_deref().unwrap_or("").to_lowercase();
    if URGENT_SUBJECT_WORDS.iter().any(|w| subject.contains(w)) {
        return URGENT_SUBJECT_SCORE;
    }
    if now - row.created_at < Duration::hours(24) {
        return RECENT_SCORE;
    }
    BASE_SCORE
}

/// Keep emails at or above the threshold, highest score then newest first.
pub fn rank_priority(rows: Vec<InboxRow>, now: DateTime<Utc>) -> Vec<PriorityEmail> {
    let mut ranked: Vec<PriorityEmail> = rows
        .into_iter()
        .filter_map(|row| {
            let score = priority_score(&row, now);
            (score >= PRIORITY_THRESHOLD).then(|| PriorityEmail {
                id: row.id,
                from_address: row.from_address,
                subject: row.subject,
                is_flagged: row.is_flagged,
                priority_score: score,
                received_at: row.created_at,
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.priority_score
            .cmp(&a.priority_score)
            .then(b.received_at.cmp(&a.received_at))
    });
    ranked
}

/// Trimmed, de-duplicated template tags.
pub fn clean_tags(tags: &[String]) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::new();
    for tag in tags.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
        if !cleaned.iter().any(|c| c.eq_ignore_ascii_case(tag)) {
            cleaned.push(tag.to_string());
        }
    }
    cleaned
}

pub fn validate_remind_at(remind_at: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), AppError> {
    if remind_at <= now {
        return Err(AppError::InvalidRequest("Reminder time must be in the future".to_string()));
    }
    Ok(())
}

pub async fn create_template(
    pool: &DbPool,
    staff_id: Uuid,
    request: &CreateTemplateRequest,
) -> Result<EmailTemplate, AppError> {
    let name = request.name.trim();
    if name.is_empty() {
        return Err(AppError::InvalidRequest("Template name is required".to_string()));
    }
    if request.body.trim().is_empty() {
        return Err(AppError::InvalidRequest("Template body is required".to_string()));
    }
    let category = match request.category.trim() {
        "" => "general",
        c => c,
    };

    let template = sqlx::query_as::<_, EmailTemplate>(
        r#"
        INSERT INTO email_templates (staff_id, name, subject, body, category, tags)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(staff_id)
    .bind(name)
    .bind(request.subject.trim())
    .bind(&request.body)
    .bind(category)
    .bind(clean_tags(&request.tags))
    .fetch_one(pool)
    .await?;

    tracing::info!(template_id = %template.id, name = %template.name, category = %template.category, "Email template created");
    Ok(template)
}

/// A staff member's templates, grouped by category then name.
pub async fn templates(pool: &DbPool, staff_id: Uuid, category: Option<&str>) -> Result<Vec<EmailTemplate>, AppError> {
    let category = category.map(str::trim).filter(|c| !c.is_empty());
    let rows = sqlx::query_as::<_, EmailTemplate>(
        r#"
        SELECT * FROM email_templates
        WHERE staff_id = $1 AND ($2::TEXT IS NULL OR category = $2)
        ORDER BY category, name
        "#,
    )
    .bind(staff_id)
    .bind(category)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn add_reminder(
    pool: &DbPool,
    staff_id: Uuid,
    email_id: Uuid,
    request: &CreateReminderRequest,
) -> Result<FollowUpReminder, AppError> {
    validate_remind_at(request.remind_at, Utc::now())?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM emails WHERE id = $1)")
        .bind(email_id)
        .fetch_one(pool)
        .await?;
    if !exists {
        return Err(AppError::NotFound("Email not found".to_string()));
    }

    let note = request.note.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let reminder = sqlx::query_as::<_, FollowUpReminder>(
        r#"
        INSERT INTO follow_up_reminders (email_id, staff_id, remind_at, note)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(email_id)
    .bind(staff_id)
    .bind(request.remind_at)
    .bind(note)
    .fetch_one(pool)
    .await?;
    Ok(reminder)
}

/// Pending reminders that are due, oldest first.
pub async fn due_reminders(pool: &DbPool, staff_id: Uuid) -> Result<Vec<DueReminder>, AppError> {
    let rows = sqlx::query_as::<_, DueReminder>(
        r#"
        SELECT r.id, r.email_id, r.remind_at, r.note, e.from_address, e.subject
        FROM follow_up_reminders r
        LEFT JOIN emails e ON e.id = r.email_id
        WHERE r.staff_id = $1 AND r.status = 'pending' AND r.remind_at <= NOW()
        ORDER BY r.remind_at
        "#,
    )
    .bind(staff_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn set_flag(pool: &DbPool, email_id: Uuid, flagged: bool) -> Result<(), AppError> {
    let result = sqlx::query("UPDATE emails SET is_flagged = $2 WHERE id = $1")
        .bind(email_id)
        .bind(flagged)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Email not found".to_string()));
    }
    Ok(())
}

/// Important inbound emails assigned to `staff_id` over the last `days` days.
pub async fn priority_inbox(pool: &DbPool, staff_id: Uuid, days: i64) -> Result<Vec<PriorityEmail>, AppError> {
    let now = Utc::now();
    let since = now - Duration::days(days.clamp(1, MAX_PRIORITY_DAYS));

    let rows = sqlx::query_as::<_, InboxRow>(
        r#"
        SELECT e.id, e.from_address, e.subject, e.is_flagged, e.created_at,
               (SELECT COUNT(*) FROM emails s
                WHERE s.staff_id = e.staff_id AND s.from_address = e.from_address)::BIGINT AS sender_count
        FROM emails e
        WHERE e.staff_id = $1 AND e.direction = 'inbound' AND e.created_at >= $2
        ORDER BY e.created_at DESC
        "#,
    )
    .bind(staff_id)
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rank_priority(rows, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap()
    }

    fn row(subject: &str, flagged: bool, sender_count: i64, hours_ago: i64) -> InboxRow {
        InboxRow {
            id: Uuid::new_v4(),
            from_address: "ana@example.nz".to_string(),
            subject: Some(subject.to_string()),
            is_flagged: flagged,
            sender_count,
            created_at: now() - Duration::hours(hours_ago),
        }
    }

    #[test]
    fn test_priority_score_rules_in_order() {
        assert_eq!(priority_score(&row("hello", true, 1, 100), now()), 100);
        assert_eq!(priority_score(&row("URGENT: refund", false, 6, 100), now()), 75);
        assert_eq!(priority_score(&row("Important update", false, 1, 100), now()), 80);
        assert_eq!(priority_score(&row("hello", false, 5, 3), now()), 60);
        assert_eq!(priority_score(&row("hello", false, 5, 30), now()), 40);
    }

    #[test]
    fn test_priority_score_without_subject() {
        let mut r = row("", false, 1, 48);
        r.subject = None;
        assert_eq!(priority_score(&r, now()), BASE_SCORE);
    }

    #[test]
    fn test_rank_priority_filters_and_orders() {
        let older_recent = row("hi", false, 1, 10);
        let newer_recent = row("hi", false, 1, 2);
        let flagged = row("hi", true, 1, 50);
        let quiet = row("hi", false, 1, 50);
        let quiet_id = quiet.id;

        let ranked = rank_priority(
            vec![older_recent.clone(), quiet, newer_recent.clone(), flagged.clone()],
            now(),
        );

        let ids: Vec<Uuid> = ranked.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![flagged.id, newer_recent.id, older_recent.id]);
        assert!(!ids.contains(&quiet_id));
        assert_eq!(ranked[0].priority_score, 100);
    }

    #[test]
    fn test_clean_tags() {
        let tags = vec![" returns ".to_string(), "".to_string(), "Returns".to_string(), "vip".to_string()];
        assert_eq!(clean_tags(&tags), vec!["returns".to_string(), "vip".to_string()]);
    }

    #[test]
    fn test_reminder_must_be_in_future() {
        assert!(validate_remind_at(now() + Duration::minutes(5), now()).is_ok());
        assert!(matches!(validate_remind_at(now(), now()), Err(AppError::InvalidRequest(_))));
        assert!(matches!(
            validate_remind_at(now() - Duration::days(1), now()),
            Err(AppError::InvalidRequest(_))
        ));
    }
}
