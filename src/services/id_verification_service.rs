//! Customer ID document verification.
//!
//! An uploaded document image is stored on disk, run through tesseract,
//! and scored against the customer's profile. A high enough score
//! verifies the customer straight away; anything else waits for a staff
//! member to approve or reject it.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{Months, NaiveDate, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::db::DbPool;
use crate::error::AppError;
use crate::models::id_verification::{
    DocumentType, ExpiryStatus, IdVerification, OcrFields, UploadIdRequest, VerificationScore, VerificationStatus,
};
use crate::services::employee_mapping_service::name_similarity;

pub const MAX_IMAGE_BYTES: usize = 5 * 1024 * 1024;
const VERIFIED_THRESHOLD: i32 = 70;
const MIN_DIMENSION: u32 = 200;
const MIN_QUALITY_BYTES: usize = 50 * 1024;

static DOB_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{1,2})[/-](\d{1,2})[/-](\d{4})").expect("dob pattern is valid"));
static ID_NUMBER_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z0-9]{6,15}\b").expect("id number pattern is valid"));

/// Where documents are stored and how OCR is run.
#[derive(Debug, Clone, Copy)]
pub struct OcrSettings<'a> {
    pub upload_dir: &'a Path,
    pub tesseract_bin: &'a str,
}

pub fn new_trace_id() -> String {
    let bytes: [u8; 6] = rand::random();
    format!("ID-{}", hex::encode_upper(bytes))
}

fn extension(mime_type: &str) -> Result<&'static str, AppError> {
    match mime_type {
        "image/jpeg" => Ok("jpg"),
        "image/png" => Ok("png"),
        "image/webp" => Ok("webp"),
        other => Err(AppError::InvalidRequest(format!("Unsupported image type: {}", other))),
    }
}

/// Decode a base64 payload, accepting an optional data-URL prefix.
pub fn decode_image(encoded: &str) -> Result<Vec<u8>, AppError> {
    let payload = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };

    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|_| AppError::InvalidRequest("Image is not valid base64".to_string()))?;

    if bytes.is_empty() {
        return Err(AppError::InvalidRequest("Image is empty".to_string()));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(AppError::InvalidRequest("Image exceeds 5 MB".to_string()));
    }
    Ok(bytes)
}

/// Pixel size from PNG or JPEG headers. Other formats yield `None`.
pub fn image_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    if bytes.len() >= 24 && bytes[..8] == PNG_SIGNATURE && &bytes[12..16] == b"IHDR" {
        let width = u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]);
        let height = u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]);
        return Some((width, height));
    }

    if bytes.len() < 4 || bytes[..2] != [0xFF, 0xD8] {
        return None;
    }

    let mut i = 2;
    while i + 9 < bytes.len() {
        if bytes[i] != 0xFF {
            return None;
        }
        let marker = bytes[i + 1];
        if marker == 0xFF {
            i += 1;
            continue;
        }

        // SOFn frames carry the size; C4, C8 and CC share the range but are not frames
        if (0xC0..=0xCF).contains(&marker) && !matches!(marker, 0xC4 | 0xC8 | 0xCC) {
            let height = u16::from_be_bytes([bytes[i + 5], bytes[i + 6]]);
            let width = u16::from_be_bytes([bytes[i + 7], bytes[i + 8]]);
            return Some((u32::from(width), u32::from(height)));
        }

        let len = usize::from(u16::from_be_bytes([bytes[i + 2], bytes[i + 3]]));
        i += 2 + len;
    }
    None
}

pub fn ocr_confidence(text: &str) -> f64 {
    match text.trim().chars().count() {
        n if n < 20 => 0.3,
        n if n < 50 => 0.6,
        _ => 0.85,
    }
}

pub fn parse_ocr(text: &str) -> OcrFields {
    let name = text.lines().map(str::trim).find(|l| !l.is_empty()).map(str::to_string);

    let dob = DOB_PATTERN.captures(text).and_then(|caps| {
        let day = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let year = caps[3].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    });

    let id_number = ID_NUMBER_PATTERN
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|candidate| candidate.chars().any(|c| c.is_ascii_digit()))
        .map(str::to_string);

    OcrFields { name, dob, id_number }
}

/// Everything the score looks at.
#[derive(Debug, Clone)]
pub struct ScoreInputs<'a> {
    pub ocr: &'a OcrFields,
    pub profile_name: &'a str,
    pub profile_dob: Option<NaiveDate>,
    pub dimensions: Option<(u32, u32)>,
    pub byte_len: usize,
    pub today: NaiveDate,
}

pub fn score(inputs: &ScoreInputs<'_>) -> VerificationScore {
    let mut score = 0;
    let mut issues = Vec::new();

    match inputs.ocr.name.as_deref() {
        Some(name) if name_similarity(name, inputs.profile_name) >= 0.8 => score += 25,
        Some(name) => issues.push(format!("Name mismatch (OCR: {})", name)),
        None => issues.push("Name could not be read".to_string()),
    }

    match (inputs.ocr.dob, inputs.profile_dob) {
        (Some(read), Some(expected)) if read == expected => score += 25,
        (Some(_), Some(_)) => issues.push("DOB mismatch".to_string()),
        (None, _) => issues.push("DOB could not be read".to_string()),
        (Some(_), None) => {}
    }

    let high_quality = inputs
        .dimensions
        .is_some_and(|(w, h)| w >= MIN_DIMENSION && h >= MIN_DIMENSION)
        && inputs.byte_len >= MIN_QUALITY_BYTES;
    if high_quality {
        score += 15;
    } else {
        issues.push("Image quality too low".to_string());
    }

    let ratio_ok = inputs
        .dimensions
        .filter(|(_, h)| *h > 0)
        .is_some_and(|(w, h)| (1.4..=1.8).contains(&(f64::from(w) / f64::from(h))));
    if ratio_ok {
        score += 20;
    } else {
        issues.push("Document proportions look wrong".to_string());
    }

    if let Some(dob) = inputs.ocr.dob {
        match inputs.today.years_since(dob) {
            Some(age) if age >= 18 => score += 15,
            _ => issues.push("Customer is under 18".to_string()),
        }
    }

    let status = if score >= VERIFIED_THRESHOLD {
        VerificationStatus::Verified
    } else {
        VerificationStatus::RequiresReview
    };

    VerificationScore { score, status, issues }
}

pub fn check_expiry(document_type: DocumentType, issue_date: NaiveDate, today: NaiveDate) -> Option<ExpiryStatus> {
    let expires_at = issue_date.checked_add_months(Months::new(document_type.validity_years() * 12))?;
    let is_expired = today > expires_at;
    Some(ExpiryStatus {
        expires_at,
        is_expired,
        days_remaining: if is_expired { 0 } else { (expires_at - today).num_days() },
    })
}

/// `tesseract <img> stdout`, returning the recognised text.
async fn run_ocr(tesseract_bin: &str, image: &Path) -> Result<String, String> {
    let output = tokio::process::Command::new(tesseract_bin)
        .arg(image)
        .arg("stdout")
        .args(["-c", "preserve_interword_spaces=1"])
        .output()
        .await
        .map_err(|e| e.to_string())?;

    if !output.status.success() {
        return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

async fn audit(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    verification_id: Uuid,
    action: &str,
    actor: Option<Uuid>,
    details: serde_json::Value,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO id_verification_audit (verification_id, action, actor_id, details) VALUES ($1, $2, $3, $4)",
    )
    .bind(verification_id)
    .bind(action)
    .bind(actor)
    .bind(details)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn mark_profile_verified(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    customer_id: Uuid,
) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE customer_hub_profile SET id_verified = TRUE, id_verified_at = NOW(), updated_at = NOW() WHERE id = $1",
    )
    .bind(customer_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Delete the stored image when the record for it could not be saved.
async fn remove_upload_on_error<T>(path: &Path, result: Result<T, AppError>) -> Result<T, AppError> {
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(path).await {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove orphaned ID image");
        }
    }
    result
}

pub async fn upload(
    pool: &DbPool,
    settings: OcrSettings<'_>,
    customer_id: Uuid,
    staff_id: Uuid,
    request: UploadIdRequest,
) -> Result<IdVerification, AppError> {
    let document_type = DocumentType::parse(&request.document_type)?;
    let ext = extension(request.mime_type.trim())?;
    let bytes = decode_image(&request.image_base64)?;

    let (profile_name, profile_dob): (String, Option<NaiveDate>) =
        sqlx::query_as("SELECT full_name, date_of_birth FROM customer_hub_profile WHERE id = $1")
            .bind(customer_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::NotFound("Customer not found".to_string()))?;

    let trace_id = new_trace_id();
    let path: PathBuf = settings.upload_dir.join(format!("{}_front.{}", trace_id, ext));
    tokio::fs::create_dir_all(settings.upload_dir).await?;
    tokio::fs::write(&path, &bytes).await?;

    let (ocr_text, ocr_ok) = match run_ocr(settings.tesseract_bin, &path).await {
        Ok(text) => (Some(text), true),
        Err(e) => {
            tracing::warn!(trace_id = %trace_id, error = %e, "OCR failed");
            (None, false)
        }
    };
    let fields = ocr_text.as_deref().map(parse_ocr).unwrap_or_default();
    let confidence = ocr_text.as_deref().map(ocr_confidence).unwrap_or(0.0);

    let today = Utc::now().date_naive();
    let dimensions = image_dimensions(&bytes);
    let mut result = score(&ScoreInputs {
        ocr: &fields,
        profile_name: &profile_name,
        profile_dob,
        dimensions,
        byte_len: bytes.len(),
        today,
    });

    if !ocr_ok {
        result.issues.push("OCR unavailable".to_string());
        result.status = VerificationStatus::RequiresReview;
    }

    let expiry = request
        .issue_date
        .and_then(|issued| check_expiry(document_type, issued, today));
    if expiry.as_ref().is_some_and(|e| e.is_expired) {
        result.issues.push("Document has expired".to_string());
        result.status = VerificationStatus::RequiresReview;
    }

    let stored = async {
        let mut tx = pool.begin().await?;

        let record = sqlx::query_as::<_, IdVerification>(
            r#"
            INSERT INTO id_verifications (
                customer_id, trace_id, document_type, mime_type, image_path, image_bytes,
                image_width, image_height, ocr_text, ocr_confidence,
                extracted_name, extracted_dob, extracted_id_number,
                score, status, issues, issue_date, expires_at, submitted_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            RETURNING *
            "#,
        )
        .bind(customer_id)
        .bind(&trace_id)
        .bind(document_type.as_str())
        .bind(request.mime_type.trim())
        .bind(path.to_string_lossy().into_owned())
        .bind(bytes.len() as i64)
        .bind(dimensions.map(|(w, _)| w as i32))
        .bind(dimensions.map(|(_, h)| h as i32))
        .bind(&ocr_text)
        .bind(confidence)
        .bind(&fields.name)
        .bind(fields.dob)
        .bind(&fields.id_number)
        .bind(result.score)
        .bind(result.status.as_str())
        .bind(&result.issues)
        .bind(request.issue_date)
        .bind(expiry.as_ref().map(|e| e.expires_at))
        .bind(staff_id)
        .fetch_one(&mut *tx)
        .await?;

        audit(
            &mut tx,
            record.id,
            "upload",
            Some(staff_id),
            serde_json::json!({ "trace_id": trace_id, "score": result.score, "status": result.status }),
        )
        .await?;

        if result.status == VerificationStatus::Verified {
            mark_profile_verified(&mut tx, customer_id).await?;
            audit(&mut tx, record.id, "auto_verify", None, serde_json::json!({ "score": result.score })).await?;
        }

        tx.commit().await?;
        Ok::<_, AppError>(record)
    }
    .await;
    let record = remove_upload_on_error(&path, stored).await?;

    tracing::info!(
        trace_id = %record.trace_id,
        customer_id = %customer_id,
        score = result.score,
        status = result.status.as_str(),
        "ID document processed"
    );

    Ok(record)
}

/// Latest verification for a customer.
pub async fn latest(pool: &DbPool, customer_id: Uuid) -> Result<IdVerification, AppError> {
    sqlx::query_as::<_, IdVerification>(
        "SELECT * FROM id_verifications WHERE customer_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(customer_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("No ID submission found".to_string()))
}

async fn lock_for_review(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
) -> Result<IdVerification, AppError> {
    let record = sqlx::query_as::<_, IdVerification>("SELECT * FROM id_verifications WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Verification not found".to_string()))?;

    if record.status != VerificationStatus::RequiresReview.as_str() {
        return Err(AppError::InvalidState(format!(
            "Verification is {} and not awaiting review",
            record.status
        )));
    }
    Ok(record)
}

pub async fn approve(pool: &DbPool, id: Uuid, staff_id: Uuid, notes: Option<String>) -> Result<IdVerification, AppError> {
    let mut tx = pool.begin().await?;
    let record = lock_for_review(&mut tx, id).await?;

    let updated = sqlx::query_as::<_, IdVerification>(
        r#"
        UPDATE id_verifications
        SET status = 'verified', reviewed_by = $2, reviewed_at = NOW(), review_notes = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(staff_id)
    .bind(&notes)
    .fetch_one(&mut *tx)
    .await?;

    mark_profile_verified(&mut tx, record.customer_id).await?;
    audit(&mut tx, id, "approve", Some(staff_id), serde_json::json!({ "notes": notes })).await?;
    tx.commit().await?;

    tracing::info!(trace_id = %updated.trace_id, staff_id = %staff_id, "ID verification approved");
    Ok(updated)
}

pub async fn reject(pool: &DbPool, id: Uuid, staff_id: Uuid, reason: &str) -> Result<IdVerification, AppError> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(AppError::InvalidRequest("Reason is required".to_string()));
    }

    let mut tx = pool.begin().await?;
    lock_for_review(&mut tx, id).await?;

    let updated = sqlx::query_as::<_, IdVerification>(
        r#"
        UPDATE id_verifications
        SET status = 'rejected', reviewed_by = $2, reviewed_at = NOW(), review_notes = $3, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(staff_id)
    .bind(reason)
    .fetch_one(&mut *tx)
    .await?;

    audit(&mut tx, id, "reject", Some(staff_id), serde_json::json!({ "reason": reason })).await?;
    tx.commit().await?;

    tracing::info!(trace_id = %updated.trace_id, staff_id = %staff_id, "ID verification rejected");
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_header(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 13];
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_orphaned_upload_removed_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ID-ABC_front.png");
        tokio::fs::write(&path, b"image").await.unwrap();

        let failed: Result<(), AppError> = Err(AppError::NotFound("x".to_string()));
        assert!(remove_upload_on_error(&path, failed).await.is_err());
        assert!(!path.exists());

        tokio::fs::write(&path, b"image").await.unwrap();
        assert_eq!(remove_upload_on_error(&path, Ok(7)).await.unwrap(), 7);
        assert!(path.exists());
    }

    #[test]
    fn test_trace_id_format() {
        let id = new_trace_id();
        assert_eq!(id.len(), 15);
        assert!(id.starts_with("ID-"));
        assert!(id[3..].chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));
    }

    #[test]
    fn test_decode_accepts_data_url() {
        let encoded = format!("data:image/png;base64,{}", STANDARD.encode(b"hello"));
        assert_eq!(decode_image(&encoded).unwrap(), b"hello");
        assert!(decode_image("not base64 !!").is_err());
    }

    #[test]
    fn test_decode_rejects_oversized() {
        let encoded = STANDARD.encode(vec![0u8; MAX_IMAGE_BYTES + 1]);
        assert_eq!(decode_image(&encoded).unwrap_err().to_string(), "Image exceeds 5 MB");
    }

    #[test]
    fn test_png_dimensions() {
        assert_eq!(image_dimensions(&png_header(800, 500)), Some((800, 500)));
        assert_eq!(image_dimensions(b"RIFF....WEBP"), None);
    }

    #[test]
    fn test_jpeg_dimensions() {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x04, 0x00, 0x00];
        bytes.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08, 0x01, 0xF4, 0x03, 0x20]);
        bytes.extend_from_slice(&[0u8; 8]);
        assert_eq!(image_dimensions(&bytes), Some((800, 500)));
    }

    #[test]
    fn test_parse_ocr_fields() {
        let text = "\n  JANE CITIZEN \nDOB 05/03/1990\nLicence DL1234567\nEXPIRES 2030";
        let fields = parse_ocr(text);
        assert_eq!(fields.name.as_deref(), Some("JANE CITIZEN"));
        assert_eq!(fields.dob, Some(date(1990, 3, 5)));
        assert_eq!(fields.id_number.as_deref(), Some("DL1234567"));
    }

    #[test]
    fn test_ocr_confidence_bands() {
        assert_eq!(ocr_confidence("short"), 0.3);
        assert_eq!(ocr_confidence(&"x".repeat(30)), 0.6);
        assert_eq!(ocr_confidence(&"x".repeat(60)), 0.85);
    }

    #[test]
    fn test_full_score_verifies() {
        let ocr = OcrFields {
            name: Some("Jane Citizen".to_string()),
            dob: Some(date(1990, 3, 5)),
            id_number: Some("DL1234567".to_string()),
        };
        let result = score(&ScoreInputs {
            ocr: &ocr,
            profile_name: "jane citizen",
            profile_dob: Some(date(1990, 3, 5)),
            dimensions: Some((1600, 1000)),
            byte_len: 200 * 1024,
            today: date(2025, 6, 1),
        });
        assert_eq!(result.score, 100);
        assert_eq!(result.status, VerificationStatus::Verified);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_minor_with_poor_image_needs_review() {
        let ocr = OcrFields {
            name: Some("Sam Young".to_string()),
            dob: Some(date(2010, 1, 1)),
            id_number: None,
        };
        let result = score(&ScoreInputs {
            ocr: &ocr,
            profile_name: "Sam Young",
            profile_dob: Some(date(2010, 1, 1)),
            dimensions: Some((150, 150)),
            byte_len: 10 * 1024,
            today: date(2025, 6, 1),
        });
        assert_eq!(result.score, 50);
        assert_eq!(result.status, VerificationStatus::RequiresReview);
        assert!(result.issues.contains(&"Customer is under 18".to_string()));
        assert!(result.issues.contains(&"Image quality too low".to_string()));
    }

    #[test]
    fn test_check_expiry() {
        let passport = check_expiry(DocumentType::Passport, date(2015, 6, 1), date(2025, 6, 2)).unwrap();
        assert!(passport.is_expired);
        assert_eq!(passport.days_remaining, 0);

        let national = check_expiry(DocumentType::NationalId, date(2015, 6, 1), date(2025, 6, 1)).unwrap();
        assert_eq!(national.expires_at, date(2030, 6, 1));
        assert!(!national.is_expired);
        assert!(national.days_remaining > 1800);
    }
}
