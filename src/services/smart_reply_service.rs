//! LLM-generated reply suggestions for inbound staff email.

use uuid::Uuid;

use crate::clients::llm::{ChatMessage, LlmClient};
use crate::db::DbPool;
use crate::error::AppError;
use crate::models::email::{Email, EmailDraft, FeedbackResult, GeneratedReply, SmartReply, SmartReplyMetrics};

const SYSTEM_PROMPT: &str = "You are an expert email assistant. Generate helpful, professional email replies.";
const MAX_TOKENS: u32 = 2000;
const TEMPERATURE: f32 = 0.8;
const INITIAL_RELEVANCE: i32 = 75;
const HISTORY_MESSAGES: i64 = 5;
const EXCERPT_CHARS: usize = 100;
pub const MAX_SUGGESTIONS: usize = 10;

/// How often a sender has written in and how much.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SenderProfile {
    pub total_emails: i64,
    pub avg_length: Option<f64>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CustomerContext {
    pub full_name: String,
    pub is_vip: bool,
    pub purchase_count: i32,
}

fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(EXCERPT_CHARS) {
        Some((cut, _)) => format!("{}...", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

pub fn build_prompt(
    email: &Email,
    history: &[Email],
    sender: Option<&SenderProfile>,
    customer: Option<&CustomerContext>,
    count: usize,
) -> String {
    let mut prompt = format!(
        "Generate {} different professional email reply suggestions for the following situation:\n\n",
        count
    );

    prompt.push_str("INCOMING EMAIL:\n");
    prompt.push_str(&format!("From: {}\n", email.from_address));
    prompt.push_str(&format!("Subject: {}\n", email.subject.as_deref().unwrap_or("(no subject)")));
    prompt.push_str(&format!("Message:\n{}\n\n", email.body));

    if !history.is_empty() {
        prompt.push_str("CONVERSATION HISTORY:\n");
        for message in history {
            prompt.push_str(&format!(
                "- {} ({}): {}\n",
                message.from_address,
                message.created_at.format("%Y-%m-%d %H:%M"),
                excerpt(&message.body)
            ));
        }
        prompt.push('\n');
    }

    if let Some(sender) = sender.filter(|s| s.total_emails > 0) {
        prompt.push_str(&format!(
            "SENDER PROFILE: {} previous emails, avg length: {:.0} chars\n\n",
            sender.total_emails,
            sender.avg_length.unwrap_or(0.0)
        ));
    }

    if let Some(customer) = customer {
        prompt.push_str(&format!(
            "CUSTOMER INFO: {}{}, {} purchases\n\n",
            customer.full_name,
            if customer.is_vip { " (VIP)" } else { "" },
            customer.purchase_count
        ));
    }

    prompt.push_str("REQUIREMENTS:\n");
    prompt.push_str(&format!("1. Generate {} distinct reply options\n", count));
    prompt.push_str("2. Each should be professional and appropriate\n");
    prompt.push_str("3. Vary in tone and approach\n");
    prompt.push_str("4. Keep replies concise but complete\n");
    prompt.push_str("5. Include action items where appropriate\n\n");
    prompt.push_str("FORMAT: Return as JSON array of objects with 'reply' and 'tone' fields only.\n");
    prompt
}

/// Parse the model's JSON array, unwrapping a fenced code block if present.
pub fn parse_replies(content: &str, count: usize) -> Result<Vec<GeneratedReply>, AppError> {
    let mut body = content.trim();
    if let Some(rest) = body.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        body = rest.trim_end().strip_suffix("```").unwrap_or(rest).trim();
    }

    let replies: Vec<GeneratedReply> = serde_json::from_str(body)
        .map_err(|e| AppError::Upstream(format!("LLM returned unparseable suggestions: {}", e)))?;

    Ok(replies
        .into_iter()
        .filter(|r| !r.reply.trim().is_empty())
        .take(count)
        .collect())
}

fn rate(part: i64, whole: i64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 * 100.0 / whole as f64 * 100.0).round() / 100.0
}

async fn fetch_email(pool: &DbPool, id: Uuid) -> Result<Email, AppError> {
    sqlx::query_as::<_, Email>("SELECT * FROM emails WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Email not found".to_string()))
}

pub async fn generate(
    pool: &DbPool,
    llm: Option<&LlmClient>,
    email_id: Uuid,
    count: usize,
) -> Result<Vec<SmartReply>, AppError> {
    let llm = llm.ok_or_else(|| AppError::Disabled("Smart replies are not configured".to_string()))?;
    if !(1..=MAX_SUGGESTIONS).contains(&count) {
        return Err(AppError::InvalidRequest(format!(
            "count must be between 1 and {}",
            MAX_SUGGESTIONS
        )));
    }

    let email = fetch_email(pool, email_id).await?;

    let history = match &email.thread_id {
        Some(thread) => {
            sqlx::query_as::<_, Email>(
                "SELECT * FROM emails WHERE thread_id = $1 AND id <> $2 ORDER BY created_at DESC LIMIT $3",
            )
            .bind(thread)
            .bind(email.id)
            .bind(HISTORY_MESSAGES)
            .fetch_all(pool)
            .await?
        }
        None => Vec::new(),
    };

    let sender = sqlx::query_as::<_, SenderProfile>(
        r#"
        SELECT COUNT(*)::BIGINT AS total_emails, AVG(LENGTH(body))::DOUBLE PRECISION AS avg_length
        FROM emails
        WHERE from_address = $1
        "#,
    )
    .bind(&email.from_address)
    .fetch_one(pool)
    .await?;

    let customer = match email.customer_id {
        Some(id) => {
            sqlx::query_as::<_, CustomerContext>(
                "SELECT full_name, is_vip, purchase_count FROM customer_hub_profile WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(pool)
            .await?
        }
        None => None,
    };

    let prompt = build_prompt(&email, &history, Some(&sender), customer.as_ref(), count);
    let content = llm
        .complete(
            &[ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)],
            MAX_TOKENS,
            TEMPERATURE,
        )
        .await?;
    let replies = parse_replies(&content, count)?;

    let mut tx = pool.begin().await?;
    let mut stored = Vec::with_capacity(replies.len());
    for (order, reply) in replies.iter().enumerate() {
        let row = sqlx::query_as::<_, SmartReply>(
            r#"
            INSERT INTO smart_reply_suggestions (email_id, reply_text, tone, suggestion_order, relevance_score)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, email_id, reply_text, tone, suggestion_order, relevance_score,
                      0::BIGINT AS helpful_count, 0::BIGINT AS unhelpful_count, created_at
            "#,
        )
        .bind(email.id)
        .bind(reply.reply.trim())
        .bind(&reply.tone)
        .bind(order as i32 + 1)
        .bind(INITIAL_RELEVANCE)
        .fetch_one(&mut *tx)
        .await?;
        stored.push(row);
    }
    tx.commit().await?;

    tracing::info!(email_id = %email.id, suggestions = stored.len(), "Smart replies generated");
    Ok(stored)
}

const SUGGESTION_COLUMNS: &str = r#"
    s.id, s.email_id, s.reply_text, s.tone, s.suggestion_order, s.relevance_score,
    (SELECT COUNT(*) FROM smart_reply_feedback f WHERE f.suggestion_id = s.id AND f.helpful)::BIGINT AS helpful_count,
    (SELECT COUNT(*) FROM smart_reply_feedback f WHERE f.suggestion_id = s.id AND NOT f.helpful)::BIGINT AS unhelpful_count,
    s.created_at
"#;

pub async fn suggestions(pool: &DbPool, email_id: Uuid, limit: i64) -> Result<Vec<SmartReply>, AppError> {
    let rows = sqlx::query_as::<_, SmartReply>(&format!(
        r#"
        SELECT {}
        FROM smart_reply_suggestions s
        WHERE s.email_id = $1
        ORDER BY s.created_at DESC, s.suggestion_order
        LIMIT $2
        "#,
        SUGGESTION_COLUMNS
    ))
    .bind(email_id)
    .bind(limit.clamp(1, 50))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Turn a suggestion into a draft reply to the original sender.
pub async fn use_suggestion(
    pool: &DbPool,
    suggestion_id: Uuid,
    staff_id: Uuid,
    customization: Option<&str>,
) -> Result<EmailDraft, AppError> {
    let customization = customization.map(str::trim).filter(|c| !c.is_empty());

    let mut tx = pool.begin().await?;

    let (reply_text, email_id, from_address, subject): (String, Uuid, String, Option<String>) = sqlx::query_as(
        r#"
        SELECT s.reply_text, e.id, e.from_address, e.subject
        FROM smart_reply_suggestions s
        JOIN emails e ON e.id = s.email_id
        WHERE s.id = $1
        "#,
    )
    .bind(suggestion_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Suggestion not found".to_string()))?;

    let body = customization.unwrap_or(&reply_text);
    let subject = format!("RE: {}", subject.unwrap_or_default());

    let draft = sqlx::query_as::<_, EmailDraft>(
        r#"
        INSERT INTO email_drafts (in_reply_to, to_address, subject, body, created_by, suggestion_id)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(email_id)
    .bind(&from_address)
    .bind(&subject)
    .bind(body)
    .bind(staff_id)
    .bind(suggestion_id)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO smart_reply_usage (suggestion_id, staff_id, draft_id, was_customized) VALUES ($1, $2, $3, $4)",
    )
    .bind(suggestion_id)
    .bind(staff_id)
    .bind(draft.id)
    .bind(customization.is_some())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    tracing::info!(
        suggestion_id = %suggestion_id,
        draft_id = %draft.id,
        customized = customization.is_some(),
        "Smart reply used"
    );
    Ok(draft)
}

/// Record feedback and reset relevance to the helpful percentage.
pub async fn feedback(
    pool: &DbPool,
    suggestion_id: Uuid,
    staff_id: Uuid,
    helpful: bool,
    notes: Option<&str>,
) -> Result<FeedbackResult, AppError> {
    let mut tx = pool.begin().await?;

    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM smart_reply_suggestions WHERE id = $1)")
        .bind(suggestion_id)
        .fetch_one(&mut *tx)
        .await?;
    if !exists {
        return Err(AppError::NotFound("Suggestion not found".to_string()));
    }

    sqlx::query("INSERT INTO smart_reply_feedback (suggestion_id, staff_id, helpful, notes) VALUES ($1, $2, $3, $4)")
        .bind(suggestion_id)
        .bind(staff_id)
        .bind(helpful)
        .bind(notes)
        .execute(&mut *tx)
        .await?;

    let (helpful_count, unhelpful_count): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FILTER (WHERE helpful)::BIGINT, COUNT(*) FILTER (WHERE NOT helpful)::BIGINT
        FROM smart_reply_feedback
        WHERE suggestion_id = $1
        "#,
    )
    .bind(suggestion_id)
    .fetch_one(&mut *tx)
    .await?;

    let relevance_score = rate(helpful_count, helpful_count + unhelpful_count).round() as i32;

    sqlx::query("UPDATE smart_reply_suggestions SET relevance_score = $2 WHERE id = $1")
        .bind(suggestion_id)
        .bind(relevance_score)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    Ok(FeedbackResult {
        suggestion_id,
        helpful_count,
        unhelpful_count,
        relevance_score,
    })
}

pub async fn metrics(pool: &DbPool, days: i64) -> Result<SmartReplyMetrics, AppError> {
    let (total_suggestions, used, helpful, unhelpful): (i64, i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(DISTINCT s.id)::BIGINT,
            COUNT(DISTINCT u.suggestion_id)::BIGINT,
            COUNT(DISTINCT f.id) FILTER (WHERE f.helpful)::BIGINT,
            COUNT(DISTINCT f.id) FILTER (WHERE NOT f.helpful)::BIGINT
        FROM smart_reply_suggestions s
        LEFT JOIN smart_reply_usage u ON u.suggestion_id = s.id
        LEFT JOIN smart_reply_feedback f ON f.suggestion_id = s.id
        WHERE s.created_at >= NOW() - make_interval(days => $1)
        "#,
    )
    .bind(days as i32)
    .fetch_one(pool)
    .await?;

    Ok(SmartReplyMetrics {
        days,
        total_suggestions,
        used,
        helpful,
        unhelpful,
        helpful_rate: rate(helpful, helpful + unhelpful),
        usage_rate: rate(used, total_suggestions),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn email(body: &str) -> Email {
        Email {
            id: Uuid::new_v4(),
            thread_id: Some("t-1".to_string()),
            customer_id: None,
            from_address: "jane@example.com".to_string(),
            from_name: Some("Jane".to_string()),
            to_address: Some("support@shop.nz".to_string()),
            subject: Some("Where is my order?".to_string()),
            body: body.to_string(),
            direction: "inbound".to_string(),
            status: "unread".to_string(),
            staff_id: None,
            is_flagged: false,
            created_at: Utc.with_ymd_and_hms(2025, 6, 1, 9, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_parse_plain_array() {
        let replies = parse_replies(r#"[{"reply":"Thanks","tone":"friendly"},{"reply":"Noted"}]"#, 5).unwrap();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].tone, "friendly");
        assert_eq!(replies[1].tone, "professional");
    }

    #[test]
    fn test_parse_fenced_block_and_limit() {
        let content = "```json\n[{\"reply\":\"A\"},{\"reply\":\"B\"},{\"reply\":\" \"},{\"reply\":\"C\"}]\n```";
        let replies = parse_replies(content, 2).unwrap();
        assert_eq!(replies.iter().map(|r| r.reply.as_str()).collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn test_parse_rejects_prose() {
        let err = parse_replies("Sure! Here are some replies.", 5).unwrap_err();
        assert!(matches!(err, AppError::Upstream(_)));
    }

    #[test]
    fn test_prompt_includes_context() {
        let current = email("My parcel has not arrived.");
        let earlier = email(&"Earlier message ".repeat(20));
        let sender = SenderProfile {
            total_emails: 4,
            avg_length: Some(212.4),
        };
        let customer = CustomerContext {
            full_name: "Jane Citizen".to_string(),
            is_vip: true,
            purchase_count: 12,
        };

        let prompt = build_prompt(&current, &[earlier], Some(&sender), Some(&customer), 3);
        assert!(prompt.starts_with("Generate 3 different"));
        assert!(prompt.contains("Subject: Where is my order?"));
        assert!(prompt.contains("CONVERSATION HISTORY:\n- jane@example.com (2025-06-01 09:30): Earlier"));
        assert!(prompt.contains("..."));
        assert!(prompt.contains("SENDER PROFILE: 4 previous emails, avg length: 212 chars"));
        assert!(prompt.contains("CUSTOMER INFO: Jane Citizen (VIP), 12 purchases"));
        assert!(prompt.ends_with("'reply' and 'tone' fields only.\n"));
    }

    #[test]
    fn test_rate_rounds_and_handles_zero() {
        assert_eq!(rate(1, 3), 33.33);
        assert_eq!(rate(0, 0), 0.0);
        assert_eq!(rate(2, 2), 100.0);
    }

    #[tokio::test]
    async fn test_generate_without_llm_is_disabled() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .unwrap();
        let err = generate(&pool, None, Uuid::new_v4(), 5).await.unwrap_err();
        assert!(matches!(err, AppError::Disabled(_)));
    }
}
