//! Employee-to-customer mapping models.
//!
//! A mapping ties a payroll employee to the POS customer whose account
//! their staff deductions pay into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Row of `employee_mappings`.
///
/// # Status
///
/// - `mapped`: approved, used for allocation
/// - `auto_matched`: suggested by name matching, awaiting review
/// - `auto_match_rejected`: suggestion turned down
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct EmployeeMapping {
    pub id: Uuid,
    pub xero_employee_id: String,
    pub employee_name: String,
    pub employee_email: Option<String>,
    pub vend_customer_id: String,
    pub vend_customer_name: Option<String>,
    pub vend_customer_email: Option<String>,

    /// `manual`, `exact_name`, `fuzzy_name` or `email`
    pub match_type: String,

    /// 0.0 to 1.0
    pub confidence: f64,

    pub status: String,
    pub store_id: Option<String>,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /api/v1/mappings`.
///
/// Fields are optional at the serde level so missing ones produce a
/// "Missing required field" error instead of a generic parse failure.
#[derive(Debug, Default, Deserialize)]
pub struct CreateMappingRequest {
    pub xero_employee_id: Option<String>,
    pub employee_name: Option<String>,
    pub employee_email: Option<String>,
    pub vend_customer_id: Option<String>,
    pub vend_customer_name: Option<String>,
    pub vend_customer_email: Option<String>,
    pub store_id: Option<String>,
}

/// Body of `PUT /api/v1/mappings/{id}`. Only these fields can change.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateMappingRequest {
    pub employee_name: Option<String>,
    pub employee_email: Option<String>,
    pub vend_customer_id: Option<String>,
    pub vend_customer_name: Option<String>,
    pub vend_customer_email: Option<String>,
    pub store_id: Option<String>,
}

impl UpdateMappingRequest {
    pub fn is_empty(&self) -> bool {
        self.employee_name.is_none()
            && self.employee_email.is_none()
            && self.vend_customer_id.is_none()
            && self.vend_customer_name.is_none()
            && self.vend_customer_email.is_none()
            && self.store_id.is_none()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct MappingFilter {
    pub status: Option<String>,
    pub store_id: Option<String>,
    pub q: Option<String>,
}

/// Employee with pending deductions and no mapping.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct UnmappedEmployee {
    pub xero_employee_id: String,
    pub employee_name: String,
    pub pending_deductions: i64,
    pub total_cents: i64,
    pub latest_deduction_at: Option<DateTime<Utc>>,
}

/// Customer row from the local `vend_customers` mirror.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct VendCustomerRow {
    pub id: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

impl VendCustomerRow {
    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or("").trim(),
            self.last_name.as_deref().unwrap_or("").trim()
        )
        .trim()
        .to_string()
    }
}

/// A customer proposed for an employee by name matching.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub xero_employee_id: String,
    pub employee_name: String,
    pub vend_customer_id: String,
    pub vend_customer_name: String,
    pub confidence: f64,
    pub match_type: String,
}

#[derive(Debug, Default, Serialize)]
pub struct AutoMatchReport {
    pub matched: usize,
    pub unmatched: usize,
    pub matches: Vec<MatchCandidate>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MatchRisk {
    #[serde(rename = "type")]
    pub risk_type: &'static str,
    pub level: &'static str,
    pub message: &'static str,
}

/// Auto-match awaiting review, with risk analysis attached.
#[derive(Debug, Serialize)]
pub struct MatchSuggestion {
    #[serde(flatten)]
    pub mapping: EmployeeMapping,
    pub confidence_level: &'static str,
    pub blocked_amount_cents: i64,
    pub risks: Vec<MatchRisk>,
}

#[derive(Debug, Deserialize)]
pub struct SuggestionParams {
    #[serde(default)]
    pub limit: Option<i64>,

    #[serde(default)]
    pub min_confidence: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveRequest {
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct BulkApproveRequest {
    pub mapping_ids: Vec<Uuid>,

    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct BulkApproveResult {
    pub approved: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateMappingRequest {
    pub xero_employee_id: String,
    pub vend_customer_id: String,
}

/// Result of checking a proposed manual mapping.
#[derive(Debug, Default, Serialize)]
pub struct MappingValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
    pub name_similarity: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct MappingStats {
    pub total_mappings: i64,
    pub mapped_count: i64,
    pub unmapped_count: i64,
    pub unmapped_with_pending: i64,
    pub avg_confidence: f64,
    pub blocked_amount_cents: i64,
}
