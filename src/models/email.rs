//! Staff mailbox and smart reply models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Row of `emails`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Email {
    pub id: Uuid,
    pub thread_id: Option<String>,
    pub customer_id: Option<Uuid>,
    pub from_address: String,
    pub from_name: Option<String>,
    pub to_address: Option<String>,
    pub subject: Option<String>,
    pub body: String,

    /// `inbound` or `outbound`
    pub direction: String,

    /// `unread`, `pending`, `urgent`, `completed`, ...
    pub status: String,

    /// Staff member the email is assigned to
    pub staff_id: Option<Uuid>,
    pub is_flagged: bool,

    pub created_at: DateTime<Utc>,
}

/// Row of `email_drafts`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct EmailDraft {
    pub id: Uuid,
    pub in_reply_to: Option<Uuid>,
    pub to_address: String,
    pub subject: String,
    pub body: String,
    pub created_by: Uuid,
    pub suggestion_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// One reply proposed by the language model.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GeneratedReply {
    pub reply: String,

    #[serde(default = "default_tone")]
    pub tone: String,
}

fn default_tone() -> String {
    "professional".to_string()
}

/// Row of `smart_reply_suggestions` with feedback counts.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct SmartReply {
    pub id: Uuid,
    pub email_id: Uuid,
    pub reply_text: String,
    pub tone: String,
    pub suggestion_order: i32,
    pub relevance_score: i32,
    pub helpful_count: i64,
    pub unhelpful_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRepliesRequest {
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    5
}

impl Default for GenerateRepliesRequest {
    fn default() -> Self {
        Self { count: default_count() }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UseReplyRequest {
    #[serde(default)]
    pub customization: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReplyFeedbackRequest {
    pub helpful: bool,

    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResult {
    pub suggestion_id: Uuid,
    pub helpful_count: i64,
    pub unhelpful_count: i64,
    pub relevance_score: i32,
}

#[derive(Debug, Serialize)]
pub struct SmartReplyMetrics {
    pub days: i64,
    pub total_suggestions: i64,
    pub used: i64,
    pub helpful: i64,
    pub unhelpful: i64,
    pub helpful_rate: f64,
    pub usage_rate: f64,
}

/// Row of `email_templates`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct EmailTemplate {
    pub id: Uuid,
    pub staff_id: Uuid,
    pub name: String,
    pub subject: String,
    pub body: String,
    pub category: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,

    #[serde(default)]
    pub subject: String,

    pub body: String,

    #[serde(default = "default_category")]
    pub category: String,

    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_category() -> String {
    "general".to_string()
}

#[derive(Debug, Default, Deserialize)]
pub struct TemplateFilter {
    pub category: Option<String>,
}

/// Row of `follow_up_reminders`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct FollowUpReminder {
    pub id: Uuid,
    pub email_id: Uuid,
    pub staff_id: Uuid,
    pub remind_at: DateTime<Utc>,
    pub note: Option<String>,

    /// `pending` until the reminder is dealt with
    pub status: String,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateReminderRequest {
    pub remind_at: DateTime<Utc>,
    pub note: Option<String>,
}

/// A reminder whose time has come, with the email it is about.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct DueReminder {
    pub id: Uuid,
    pub email_id: Uuid,
    pub remind_at: DateTime<Utc>,
    pub note: Option<String>,
    pub from_address: Option<String>,
    pub subject: Option<String>,
}

/// Inbound email with how often its sender has written to the same staff member.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InboxRow {
    pub id: Uuid,
    pub from_address: String,
    pub subject: Option<String>,
    pub is_flagged: bool,
    pub sender_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityEmail {
    pub id: Uuid,
    pub from_address: String,
    pub subject: Option<String>,
    pub is_flagged: bool,
    pub priority_score: i32,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PriorityParams {
    pub days: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_request_defaults() {
        let req: CreateTemplateRequest = serde_json::from_str(r#"{"name":"Thanks","body":"Kia ora"}"#).unwrap();
        assert_eq!(req.category, "general");
        assert!(req.subject.is_empty());
        assert!(req.tags.is_empty());
    }

    #[test]
    fn test_generated_reply_tone_defaults() {
        let reply: GeneratedReply = serde_json::from_str(r#"{"reply":"Thanks!"}"#).unwrap();
        assert_eq!(reply.tone, "professional");
    }

    #[test]
    fn test_generate_request_default_count() {
        let req: GenerateRepliesRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.count, 5);
    }
}
