//! Customer ID document verification models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Passport,
    DriversLicense,
    NationalId,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passport => "passport",
            Self::DriversLicense => "drivers_license",
            Self::NationalId => "national_id",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim() {
            "passport" => Ok(Self::Passport),
            "drivers_license" => Ok(Self::DriversLicense),
            "national_id" => Ok(Self::NationalId),
            other => Err(AppError::InvalidRequest(format!("Unsupported document type: {}", other))),
        }
    }

    /// Years a document stays valid after issue.
    pub fn validity_years(&self) -> u32 {
        match self {
            Self::Passport | Self::DriversLicense => 10,
            Self::NationalId => 15,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Verified,
    RequiresReview,
    Rejected,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::RequiresReview => "requires_review",
            Self::Rejected => "rejected",
        }
    }
}

/// Row of `id_verifications`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct IdVerification {
    pub id: Uuid,
    pub customer_id: Uuid,

    /// `ID-` followed by 12 upper-case hex digits
    pub trace_id: String,

    pub document_type: String,
    pub mime_type: String,

    #[serde(skip_serializing)]
    pub image_path: String,

    pub image_bytes: i64,
    pub image_width: Option<i32>,
    pub image_height: Option<i32>,

    #[serde(skip_serializing)]
    pub ocr_text: Option<String>,

    pub ocr_confidence: f64,
    pub extracted_name: Option<String>,
    pub extracted_dob: Option<NaiveDate>,
    pub extracted_id_number: Option<String>,
    pub score: i32,
    pub status: String,
    pub issues: Vec<String>,
    pub issue_date: Option<NaiveDate>,
    pub expires_at: Option<NaiveDate>,
    pub submitted_by: Option<Uuid>,
    pub reviewed_by: Option<Uuid>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub review_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /api/v1/crm/customers/{id}/id-verification`.
#[derive(Debug, Deserialize)]
pub struct UploadIdRequest {
    /// Raw base64 or a `data:<mime>;base64,` URL
    pub image_base64: String,
    pub mime_type: String,
    pub document_type: String,

    /// Issue date as printed on the document, when staff enter it
    #[serde(default)]
    pub issue_date: Option<NaiveDate>,
}

/// Fields pulled out of the OCR text.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrFields {
    pub name: Option<String>,
    pub dob: Option<NaiveDate>,
    pub id_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationScore {
    pub score: i32,
    pub status: VerificationStatus,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpiryStatus {
    pub expires_at: NaiveDate,
    pub is_expired: bool,
    pub days_remaining: i64,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_types() {
        assert_eq!(DocumentType::parse("drivers_license").unwrap(), DocumentType::DriversLicense);
        assert_eq!(DocumentType::NationalId.validity_years(), 15);
        assert!(DocumentType::parse("library_card").is_err());
    }
}
