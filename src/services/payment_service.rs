//! Staff self-payments against their store account.
//!
//! A payment is recorded before the gateway is contacted, inside the same
//! transaction that locks the staff account row. Saved cards settle
//! immediately; new cards go through a hosted session completed by a
//! signed gateway callback; bank transfers wait for manual matching.

use uuid::Uuid;

use crate::clients::format_dollars;
use crate::clients::gateway::{GatewayClient, verify_signature};
use crate::clients::vend::VendClient;
use crate::db::DbPool;
use crate::error::AppError;
use crate::models::payment::{
    CallbackResult, GatewayCallback, PaymentMethod, PaymentRequest, PaymentResponse, PaymentStatus, SavedCard,
    StaffPayment,
};
use crate::models::staff_account::StaffAccount;
use crate::rate_limit::AttemptLimiter;
use crate::services::allocation_service;

pub const MIN_PAYMENT_CENTS: i64 = 1_000;
pub const MAX_PAYMENT_CENTS: i64 = 1_000_000;

/// Everything a payment needs besides the database.
pub struct PaymentContext<'a> {
    pub gateway: &'a GatewayClient,
    pub vend: &'a VendClient,
    pub payment_type_id: &'a str,
    pub limiter: &'a AttemptLimiter,
}

pub fn validate_amount(amount_cents: i64) -> Result<(), AppError> {
    if !(MIN_PAYMENT_CENTS..=MAX_PAYMENT_CENTS).contains(&amount_cents) {
        return Err(AppError::InvalidRequest(
            "Payment amount must be between $10.00 and $10,000.00".to_string(),
        ));
    }
    Ok(())
}

/// The account must owe money and the payment must not exceed what is owed.
pub fn check_balance(vend_balance_cents: i64, amount_cents: i64) -> Result<(), AppError> {
    if vend_balance_cents >= 0 {
        return Err(AppError::InvalidRequest(
            "No payment needed - account balance is not negative".to_string(),
        ));
    }

    let owed = -vend_balance_cents;
    if amount_cents > owed {
        return Err(AppError::InvalidRequest(format!(
            "Payment amount (${}) exceeds outstanding balance (${})",
            format_dollars(amount_cents),
            format_dollars(owed)
        )));
    }
    Ok(())
}

pub fn new_transaction_id() -> String {
    let bytes: [u8; 12] = rand::random();
    format!("txn_{}", hex::encode(bytes))
}

pub fn new_request_id() -> String {
    let bytes: [u8; 6] = rand::random();
    format!("PAY_{}", hex::encode_upper(bytes))
}

/// Staff may only pay into their own account.
pub fn ensure_owner(account: &StaffAccount, staff_id: Uuid) -> Result<(), AppError> {
    if account.staff_id != staff_id {
        tracing::warn!(
            staff_id = %staff_id,
            owner = %account.staff_id,
            "Payment attempted against another staff member's account"
        );
        return Err(AppError::Forbidden("Account belongs to another staff member".to_string()));
    }
    Ok(())
}

/// `previous` is the request id of a same-amount payment from the last five minutes.
pub fn reject_duplicate(previous: Option<String>) -> Result<(), AppError> {
    match previous {
        Some(previous) => Err(AppError::Conflict(format!(
            "Duplicate payment detected. A payment for this amount was already submitted. Request ID: {}",
            previous
        ))),
        None => Ok(()),
    }
}

/// Result for a callback on a payment that is no longer waiting on the gateway.
pub fn settled_callback(payment: &StaffPayment) -> Option<CallbackResult> {
    (payment.status != PaymentStatus::Processing.as_str()).then(|| CallbackResult {
        transaction_id: payment.transaction_id.clone(),
        status: payment.status.clone(),
        changed: false,
    })
}

fn payment_note(request_id: &str) -> String {
    format!("Staff account payment {}", request_id)
}

/// Take a payment from a staff member towards their account balance.
///
/// # Errors
///
/// - `InvalidRequest`: amount out of range, unknown method, nothing owed
/// - `RateLimited`: more than 3 attempts in 5 minutes
/// - `Forbidden`: the account belongs to someone else
/// - `Conflict`: same amount already submitted in the last 5 minutes
/// - `Upstream`: the gateway failed or declined
pub async fn process_payment(
    pool: &DbPool,
    ctx: &PaymentContext<'_>,
    staff_id: Uuid,
    request: &PaymentRequest,
) -> Result<PaymentResponse, AppError> {
    validate_amount(request.amount_cents)?;
    let method = PaymentMethod::parse(&request.method)?;

    ctx.limiter.try_acquire(staff_id).await.map_err(|wait| {
        AppError::RateLimited(format!(
            "Rate limit exceeded. Please wait {} seconds before trying again.",
            wait.as_secs().max(1)
        ))
    })?;

    let mut tx = pool.begin().await?;

    let account = sqlx::query_as::<_, StaffAccount>(
        "SELECT * FROM staff_account_reconciliation WHERE id = $1 AND NOT archived FOR UPDATE",
    )
    .bind(request.reconciliation_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Staff account not found".to_string()))?;

    ensure_owner(&account, staff_id)?;
    check_balance(account.vend_balance_cents, request.amount_cents)?;

    let duplicate: Option<String> = sqlx::query_scalar(
        r#"
        SELECT request_id FROM staff_payment_transactions
        WHERE staff_id = $1 AND amount_cents = $2
          AND created_at > NOW() - INTERVAL '5 minutes'
          AND status IN ('pending', 'processing', 'completed')
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(staff_id)
    .bind(request.amount_cents)
    .fetch_optional(&mut *tx)
    .await?;

    reject_duplicate(duplicate)?;

    let transaction_id = new_transaction_id();
    let request_id = new_request_id();

    let payment_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO staff_payment_transactions
            (transaction_id, request_id, staff_id, reconciliation_id, amount_cents, method, status)
        VALUES ($1, $2, $3, $4, $5, $6, 'pending')
        RETURNING id
        "#,
    )
    .bind(&transaction_id)
    .bind(&request_id)
    .bind(staff_id)
    .bind(account.id)
    .bind(request.amount_cents)
    .bind(method.label())
    .fetch_one(&mut *tx)
    .await?;

    let mut response = PaymentResponse {
        transaction_id: transaction_id.clone(),
        request_id: request_id.clone(),
        amount_cents: request.amount_cents,
        ..Default::default()
    };

    match method {
        PaymentMethod::NewCard => {
            let session = ctx.gateway.create_session(request.amount_cents, &transaction_id).await?;

            sqlx::query(
                "UPDATE staff_payment_transactions SET status = $1, gateway_reference = $2, updated_at = NOW() WHERE id = $3",
            )
            .bind(PaymentStatus::Processing.as_str())
            .bind(&session.session_token)
            .bind(payment_id)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;

            response.status = PaymentStatus::Processing.as_str().to_string();
            response.requires_completion = true;
            response.session_token = Some(session.session_token);
            response.redirect_url = session.redirect_url;
        }
        PaymentMethod::BankTransfer => {
            tx.commit().await?;

            response.status = PaymentStatus::Pending.as_str().to_string();
            response.bank_reference = Some(request_id.clone());
        }
        PaymentMethod::SavedCard(card_id) => {
            let card = sqlx::query_as::<_, SavedCard>(
                "SELECT id, staff_id, token, last4, is_active FROM staff_saved_cards WHERE id = $1 AND staff_id = $2 AND is_active",
            )
            .bind(card_id)
            .bind(staff_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound("Saved card not found or access denied".to_string()))?;

            let charge = match ctx.gateway.charge_token(&card.token, request.amount_cents, &transaction_id).await {
                Ok(charge) if charge.is_approved() => charge,
                Ok(charge) => {
                    let reason = charge.message.clone().unwrap_or_else(|| charge.status.clone());
                    mark_failed(&mut tx, payment_id, &reason, Some(&charge.raw)).await?;
                    tx.commit().await?;
                    return Err(AppError::Upstream(format!("Payment declined: {}", reason)));
                }
                Err(e) => {
                    mark_failed(&mut tx, payment_id, &e.to_string(), None).await?;
                    tx.commit().await?;
                    return Err(AppError::Upstream(format!("Payment processing failed: {}", e)));
                }
            };

            let new_balance = settle(&mut tx, payment_id, &account, request.amount_cents, &charge.id, &charge.raw).await?;
            tx.commit().await?;

            tracing::info!(
                staff_id = %staff_id,
                transaction_id = %transaction_id,
                amount_cents = request.amount_cents,
                card = %card.last4,
                "Staff payment completed"
            );

            response.status = PaymentStatus::Completed.as_str().to_string();
            response.new_balance_cents = Some(new_balance);
            response.vend_sync = Some(apply_to_pos(pool, ctx.vend, ctx.payment_type_id, &account, request.amount_cents, &request_id).await);
        }
    }

    Ok(response)
}

async fn mark_failed(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    payment_id: Uuid,
    reason: &str,
    raw: Option<&serde_json::Value>,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE staff_payment_transactions
        SET status = 'failed', error_message = $1, gateway_response = $2, updated_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(reason)
    .bind(raw)
    .bind(payment_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Mark a payment completed and credit the staff account. Returns the new balance.
async fn settle(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    payment_id: Uuid,
    account: &StaffAccount,
    amount_cents: i64,
    gateway_reference: &str,
    raw: &serde_json::Value,
) -> Result<i64, AppError> {
    sqlx::query(
        r#"
        UPDATE staff_payment_transactions
        SET status = 'completed', gateway_reference = $1, gateway_response = $2,
            completed_at = NOW(), updated_at = NOW()
        WHERE id = $3
        "#,
    )
    .bind(gateway_reference)
    .bind(raw)
    .bind(payment_id)
    .execute(&mut **tx)
    .await?;

    let new_balance: i64 = sqlx::query_scalar(
        r#"
        UPDATE staff_account_reconciliation
        SET vend_balance_cents = vend_balance_cents + $1,
            total_payments_ytd_cents = total_payments_ytd_cents + $1,
            last_payment_amount_cents = $1,
            last_payment_at = NOW(),
            updated_at = NOW()
        WHERE id = $2
        RETURNING vend_balance_cents
        "#,
    )
    .bind(amount_cents)
    .bind(account.id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(new_balance)
}

/// Apply a settled payment to the POS. Failures are logged, never returned.
async fn apply_to_pos(
    pool: &DbPool,
    vend: &VendClient,
    payment_type_id: &str,
    account: &StaffAccount,
    amount_cents: i64,
    request_id: &str,
) -> bool {
    let Some(customer_id) = account.vend_customer_id.as_deref().filter(|c| !c.is_empty()) else {
        tracing::warn!(reconciliation_id = %account.id, "Payment recorded but account has no POS customer");
        return false;
    };

    let outcome = allocation_service::apply_payment_to_customer(
        pool,
        vend,
        payment_type_id,
        customer_id,
        amount_cents,
        &payment_note(request_id),
    )
    .await;

    if !outcome.success() {
        tracing::warn!(
            request_id = %request_id,
            error = outcome.error.as_deref().unwrap_or("unknown"),
            "Payment recorded but POS application failed"
        );
    }
    outcome.success()
}

/// Settle a hosted card session from a signed gateway notification.
///
/// Only `processing` payments change; repeated callbacks are no-ops.
pub async fn handle_callback(
    pool: &DbPool,
    vend: &VendClient,
    payment_type_id: &str,
    secret: &str,
    body: &[u8],
    signature: Option<&str>,
) -> Result<CallbackResult, AppError> {
    let signature = signature.ok_or(AppError::InvalidSignature)?;
    if !verify_signature(secret, body, signature) {
        tracing::warn!("Rejected gateway callback with bad signature");
        return Err(AppError::InvalidSignature);
    }

    let callback: GatewayCallback = serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidRequest(format!("Invalid callback body: {}", e)))?;

    let mut tx = pool.begin().await?;

    let payment = sqlx::query_as::<_, StaffPayment>(
        "SELECT * FROM staff_payment_transactions WHERE transaction_id = $1 FOR UPDATE",
    )
    .bind(&callback.reference)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound("Payment not found".to_string()))?;

    if let Some(unchanged) = settled_callback(&payment) {
        return Ok(unchanged);
    }

    let raw = serde_json::from_slice::<serde_json::Value>(body).unwrap_or(serde_json::Value::Null);

    if !callback.is_success() {
        let reason = callback.message.clone().unwrap_or_else(|| callback.status.clone());
        mark_failed(&mut tx, payment.id, &reason, Some(&raw)).await?;
        tx.commit().await?;

        tracing::info!(transaction_id = %payment.transaction_id, reason = %reason, "Card session payment failed");
        return Ok(CallbackResult {
            transaction_id: payment.transaction_id,
            status: PaymentStatus::Failed.as_str().to_string(),
            changed: true,
        });
    }

    let account = sqlx::query_as::<_, StaffAccount>("SELECT * FROM staff_account_reconciliation WHERE id = $1 FOR UPDATE")
        .bind(payment.reconciliation_id)
        .fetch_one(&mut *tx)
        .await?;

    let reference = callback.payment_id.as_deref().unwrap_or(&payment.transaction_id);
    settle(&mut tx, payment.id, &account, payment.amount_cents, reference, &raw).await?;
    tx.commit().await?;

    tracing::info!(
        transaction_id = %payment.transaction_id,
        amount_cents = payment.amount_cents,
        "Card session payment completed"
    );

    apply_to_pos(pool, vend, payment_type_id, &account, payment.amount_cents, &payment.request_id).await;

    Ok(CallbackResult {
        transaction_id: payment.transaction_id,
        status: PaymentStatus::Completed.as_str().to_string(),
        changed: true,
    })
}

pub async fn payment_history(pool: &DbPool, staff_id: Uuid) -> Result<Vec<StaffPayment>, AppError> {
    let payments = sqlx::query_as::<_, StaffPayment>(
        "SELECT * FROM staff_payment_transactions WHERE staff_id = $1 ORDER BY created_at DESC LIMIT 100",
    )
    .bind(staff_id)
    .fetch_all(pool)
    .await?;
    Ok(payments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::gateway::sign_payload;
    use chrono::Utc;
    use std::time::Duration;

    const SECRET: &str = "callback-secret";

    fn unreachable_pool() -> DbPool {
        sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(250))
            .connect_lazy("postgres://localhost:1/unused")
            .unwrap()
    }

    fn account(owner: Uuid) -> StaffAccount {
        StaffAccount {
            id: Uuid::new_v4(),
            staff_id: owner,
            employee_name: "Ana Ngata".to_string(),
            vend_customer_id: Some("cust-1".to_string()),
            credit_account_id: None,
            vend_balance_cents: -5_000,
            credit_limit_cents: 0,
            total_payments_ytd_cents: 0,
            last_payment_amount_cents: None,
            last_payment_at: None,
            total_allocated_cents: 0,
            outstanding_cents: 5_000,
            status: "owes".to_string(),
            archived: false,
            vend_last_synced_at: None,
            last_reconciled_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn payment(status: PaymentStatus) -> StaffPayment {
        StaffPayment {
            id: Uuid::new_v4(),
            transaction_id: "txn_0123456789abcdef01234567".to_string(),
            request_id: "PAY_0123456789AB".to_string(),
            staff_id: Uuid::new_v4(),
            reconciliation_id: Uuid::new_v4(),
            amount_cents: 5_000,
            method: "new_card".to_string(),
            status: status.as_str().to_string(),
            gateway_reference: None,
            gateway_response: None,
            error_message: None,
            created_at: Utc::now(),
            completed_at: None,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_amount_bounds() {
        assert!(validate_amount(999).is_err());
        assert!(validate_amount(1_000).is_ok());
        assert!(validate_amount(1_000_000).is_ok());
        assert!(validate_amount(1_000_001).is_err());
    }

    #[test]
    fn test_balance_must_be_negative() {
        let err = check_balance(0, 1_000).unwrap_err();
        assert_eq!(err.to_string(), "No payment needed - account balance is not negative");
    }

    #[test]
    fn test_payment_cannot_exceed_owed() {
        let err = check_balance(-5_000, 6_000).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Payment amount ($60.00) exceeds outstanding balance ($50.00)"
        );
        assert!(check_balance(-5_000, 5_000).is_ok());
    }

    #[test]
    fn test_owner_check_is_forbidden_for_others() {
        let owner = Uuid::new_v4();
        let account = account(owner);

        assert!(ensure_owner(&account, owner).is_ok());
        assert!(matches!(
            ensure_owner(&account, Uuid::new_v4()),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn test_duplicate_payment_is_conflict() {
        assert!(reject_duplicate(None).is_ok());

        let err = reject_duplicate(Some("PAY_ABCDEF123456".to_string())).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(err.to_string().ends_with("Request ID: PAY_ABCDEF123456"));
    }

    #[test]
    fn test_settled_payments_ignore_callbacks() {
        for status in [PaymentStatus::Completed, PaymentStatus::Failed, PaymentStatus::Pending] {
            let result = settled_callback(&payment(status)).unwrap();
            assert!(!result.changed);
            assert_eq!(result.status, status.as_str());
        }
        assert!(settled_callback(&payment(PaymentStatus::Processing)).is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_checked_before_account_is_read() {
        let pool = unreachable_pool();
        let http = reqwest::Client::new();
        let gateway = GatewayClient::new(http.clone(), "http://127.0.0.1:1", SECRET).unwrap();
        let vend = VendClient::new(http, "http://127.0.0.1:1", "token").unwrap();
        let limiter = AttemptLimiter::new(3, Duration::from_secs(300));
        let ctx = PaymentContext {
            gateway: &gateway,
            vend: &vend,
            payment_type_id: "staff-account",
            limiter: &limiter,
        };
        let staff = Uuid::new_v4();
        for _ in 0..3 {
            limiter.try_acquire(staff).await.unwrap();
        }

        let request = PaymentRequest {
            reconciliation_id: Uuid::new_v4(),
            amount_cents: 5_000,
            method: "bank_transfer".to_string(),
        };
        let err = process_payment(&pool, &ctx, staff, &request).await.unwrap_err();
        assert!(matches!(err, AppError::RateLimited(_)));

        // Invalid input is rejected before it counts as an attempt
        let other = Uuid::new_v4();
        let bad = PaymentRequest {
            amount_cents: 10,
            ..request
        };
        assert!(matches!(
            process_payment(&pool, &ctx, other, &bad).await,
            Err(AppError::InvalidRequest(_))
        ));
        for _ in 0..3 {
            assert!(limiter.try_acquire(other).await.is_ok());
        }
    }

    #[tokio::test]
    async fn test_callback_signature_checked_first() {
        let pool = unreachable_pool();
        let vend = VendClient::new(reqwest::Client::new(), "http://127.0.0.1:1", "token").unwrap();
        let body = br#"{"reference":"txn_1","status":"success"}"#;

        let missing = handle_callback(&pool, &vend, "pt", SECRET, body, None).await;
        assert!(matches!(missing, Err(AppError::InvalidSignature)));

        let forged = sign_payload("other-secret", body).unwrap();
        let bad = handle_callback(&pool, &vend, "pt", SECRET, body, Some(&forged)).await;
        assert!(matches!(bad, Err(AppError::InvalidSignature)));

        // A valid signature gets as far as parsing the body
        let garbage = b"not json";
        let signed = sign_payload(SECRET, garbage).unwrap();
        let parsed = handle_callback(&pool, &vend, "pt", SECRET, garbage, Some(&signed)).await;
        assert!(matches!(parsed, Err(AppError::InvalidRequest(_))));
    }

    #[test]
    fn test_identifier_formats() {
        let txn = new_transaction_id();
        assert!(txn.starts_with("txn_"));
        assert_eq!(txn.len(), 4 + 24);
        assert!(txn[4..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        let req = new_request_id();
        assert!(req.starts_with("PAY_"));
        assert_eq!(req.len(), 4 + 12);
        assert!(req[4..].chars().all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));

        assert_ne!(new_transaction_id(), txn);
    }
}
