//! Customer hub models.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::PageParams;

/// Row of `customer_hub_profile`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CustomerProfile {
    pub id: Uuid,
    pub vend_customer_id: Option<String>,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub address: Option<String>,
    pub suburb: Option<String>,
    pub postcode: Option<String>,
    pub preferred_contact: Option<String>,
    pub communication_preference: Option<String>,
    pub is_vip: bool,
    pub is_flagged: bool,
    pub flag_reason: Option<String>,
    pub id_verified: bool,
    pub id_verified_at: Option<DateTime<Utc>>,
    pub purchase_count: i32,
    pub total_spent_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Latest ID verification attached to a profile.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct IdStatus {
    pub verification_id: Uuid,
    pub trace_id: String,
    pub status: String,
    pub score: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CustomerProfileView {
    #[serde(flatten)]
    pub profile: CustomerProfile,
    pub tags: Vec<String>,
    pub notes_count: i64,
    pub id_verification: Option<IdStatus>,
    pub purchase_frequency: &'static str,
}

/// Body of `PATCH /api/v1/crm/customers/{id}`. Other fields are ignored.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateCustomerRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub address: Option<String>,
    pub suburb: Option<String>,
    pub postcode: Option<String>,
    pub preferred_contact: Option<String>,
    pub communication_preference: Option<String>,
}

impl UpdateCustomerRequest {
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.date_of_birth.is_none()
            && self.address.is_none()
            && self.suburb.is_none()
            && self.postcode.is_none()
            && self.preferred_contact.is_none()
            && self.communication_preference.is_none()
    }
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CustomerNote {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub note: String,
    pub staff_id: Option<Uuid>,
    pub staff_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Communication {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub communication_type: String,
    pub direction: String,
    pub subject: Option<String>,
    pub summary: Option<String>,
    pub email_id: Option<Uuid>,
    pub staff_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CommunicationLog {
    pub communications: Vec<Communication>,
    pub by_type: BTreeMap<String, Vec<Communication>>,
    pub count: usize,
}

#[derive(Debug, Deserialize)]
pub struct RecordCommunicationRequest {
    #[serde(default)]
    pub communication_type: Option<String>,

    #[serde(default)]
    pub direction: Option<String>,

    #[serde(default)]
    pub subject: Option<String>,

    #[serde(default)]
    pub summary: Option<String>,

    #[serde(default)]
    pub email_id: Option<Uuid>,
}

/// Sale from the local POS mirror.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Purchase {
    pub id: String,
    pub sale_date: Option<DateTime<Utc>>,
    pub status: String,
    pub total_price_cents: i64,
    pub total_paid_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct PurchaseHistory {
    pub purchases: Vec<Purchase>,
    pub count: usize,
    pub total_spent_cents: i64,
    pub average_order_cents: i64,
    pub frequency: &'static str,
}

/// Compact row for lists and search results.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct CustomerSummary {
    pub id: Uuid,
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub is_vip: bool,
    pub is_flagged: bool,
    pub id_verified: bool,
    pub purchase_count: i32,
    pub total_spent_cents: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CustomerListFilter {
    #[serde(default)]
    pub vip_only: bool,

    #[serde(default)]
    pub flagged_only: bool,

    #[serde(default)]
    pub id_verified: bool,

    #[serde(default)]
    pub page: Option<i64>,

    #[serde(default)]
    pub per_page: Option<i64>,
}

impl CustomerListFilter {
    pub fn page_params(&self) -> PageParams {
        let defaults = PageParams::default();
        PageParams {
            page: self.page.unwrap_or(defaults.page),
            per_page: self.per_page.unwrap_or(defaults.per_page),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CustomerSearchParams {
    #[serde(default)]
    pub q: String,

    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AddNoteRequest {
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Deserialize)]
pub struct FlagRequest {
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct VipRequest {
    pub is_vip: bool,
}

#[derive(Debug, Deserialize)]
pub struct TagRequest {
    #[serde(default)]
    pub tag: String,
}
