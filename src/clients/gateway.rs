//! Card payment gateway client and callback signature verification.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::{ClientError, check_status, endpoint, format_dollars};

type HmacSha256 = Hmac<Sha256>;

/// Signature header sent by the gateway on callbacks.
pub const SIGNATURE_HEADER: &str = "X-Gateway-Signature";

#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: url::Url,
    secret: String,
}

/// Outcome of charging a stored card token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayCharge {
    pub id: String,
    pub status: String,

    #[serde(default)]
    pub message: Option<String>,

    /// Full response body, stored with the payment record
    #[serde(skip)]
    pub raw: serde_json::Value,
}

impl GatewayCharge {
    pub fn is_approved(&self) -> bool {
        matches!(self.status.as_str(), "approved" | "succeeded" | "APPROVED")
    }
}

/// Hosted card-entry session the staff member completes in the browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySession {
    pub session_token: String,

    #[serde(default)]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct ChargeRequest<'a> {
    token: &'a str,
    amount: String,
    currency: &'a str,
    reference: &'a str,
}

#[derive(Debug, Serialize)]
struct SessionRequest<'a> {
    amount: String,
    currency: &'a str,
    reference: &'a str,
}

impl GatewayClient {
    pub fn new(http: reqwest::Client, base_url: &str, secret: impl Into<String>) -> Result<Self, ClientError> {
        Ok(Self {
            http,
            base_url: super::parse_base_url(base_url)?,
            secret: secret.into(),
        })
    }

    /// Charge a saved card token in NZD.
    pub async fn charge_token(
        &self,
        card_token: &str,
        amount_cents: i64,
        reference: &str,
    ) -> Result<GatewayCharge, ClientError> {
        let body = ChargeRequest {
            token: card_token,
            amount: format_dollars(amount_cents),
            currency: "NZD",
            reference,
        };

        let resp = self
            .http
            .post(endpoint(&self.base_url, "payments")?)
            .bearer_auth(&self.secret)
            .json(&body)
            .send()
            .await?;

        let raw: serde_json::Value = check_status(resp).await?.json().await?;
        let mut charge: GatewayCharge = serde_json::from_value(raw.clone())
            .map_err(|e| ClientError::Decode(format!("payments: {}", e)))?;
        charge.raw = raw;
        Ok(charge)
    }

    /// Open a hosted payment session for a new card.
    pub async fn create_session(&self, amount_cents: i64, reference: &str) -> Result<GatewaySession, ClientError> {
        let body = SessionRequest {
            amount: format_dollars(amount_cents),
            currency: "NZD",
            reference,
        };

        let resp = self
            .http
            .post(endpoint(&self.base_url, "sessions")?)
            .bearer_auth(&self.secret)
            .json(&body)
            .send()
            .await?;

        check_status(resp)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::Decode(format!("sessions: {}", e)))
    }
}

/// Generate the `sha256=<hex>` HMAC signature of a payload.
pub fn sign_payload(secret: &str, payload: &[u8]) -> Result<String, ClientError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ClientError::Config(format!("HMAC key: {}", e)))?;
    mac.update(payload);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

/// Verify a callback signature in constant time.
///
/// Accepts the header with or without the `sha256=` prefix.
pub fn verify_signature(secret: &str, payload: &[u8], header: &str) -> bool {
    let hex_part = header.trim().strip_prefix("sha256=").unwrap_or(header.trim());
    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[test]
    fn test_signature_round_trip() {
        let body = br#"{"transaction_id":"txn_1","status":"approved"}"#;
        let signature = sign_payload("secret", body).unwrap();

        assert!(signature.starts_with("sha256="));
        assert!(verify_signature("secret", body, &signature));
        assert!(verify_signature("secret", body, signature.trim_start_matches("sha256=")));
    }

    #[test]
    fn test_signature_rejects_tampering() {
        let body = br#"{"transaction_id":"txn_1","status":"approved"}"#;
        let signature = sign_payload("secret", body).unwrap();

        assert!(!verify_signature("other", body, &signature));
        assert!(!verify_signature("secret", b"{}", &signature));
        assert!(!verify_signature("secret", body, "sha256=not-hex"));
    }

    #[tokio::test]
    async fn test_charge_token() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/payments")
            .match_header("authorization", "Bearer secret")
            .match_body(Matcher::Json(json!({
                "token": "tok_1",
                "amount": "25.00",
                "currency": "NZD",
                "reference": "PAY_ABC"
            })))
            .with_status(200)
            .with_body(r#"{"id":"ch_1","status":"approved","auth_code":"X1"}"#)
            .create_async()
            .await;

        let client = GatewayClient::new(reqwest::Client::new(), &server.url(), "secret").unwrap();
        let charge = client.charge_token("tok_1", 2500, "PAY_ABC").await.unwrap();

        mock.assert_async().await;
        assert!(charge.is_approved());
        assert_eq!(charge.raw["auth_code"], "X1");
    }

    #[tokio::test]
    async fn test_declined_charge_is_not_approved() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/payments")
            .with_status(200)
            .with_body(r#"{"id":"ch_2","status":"declined","message":"Insufficient funds"}"#)
            .create_async()
            .await;

        let client = GatewayClient::new(reqwest::Client::new(), &server.url(), "secret").unwrap();
        let charge = client.charge_token("tok_1", 2500, "PAY_ABC").await.unwrap();

        assert!(!charge.is_approved());
        assert_eq!(charge.message.as_deref(), Some("Insufficient funds"));
    }
}
