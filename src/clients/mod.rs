//! Outbound HTTP clients for the third-party systems this service integrates with.
//!
//! - [`vend`]: POS and inventory (Vend/Lightspeed)
//! - [`xero`]: payroll (Xero Payroll NZ)
//! - [`gateway`]: card payment gateway
//! - [`llm`]: chat-completion API used for smart replies
//!
//! Clients deal in dollars only at the wire boundary; everything they hand
//! back to services is in integer cents.

use std::time::Duration;

pub mod gateway;
pub mod llm;
pub mod vend;
pub mod xero;

/// Errors raised by any outbound client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport failure (DNS, TLS, timeout) or body read failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Remote answered with a non-success status.
    #[error("Remote returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Remote answered 429. `retry_after` is the Retry-After header in seconds, when sent.
    #[error("Rate limited by remote (retry after {retry_after:?}s)")]
    RateLimited { retry_after: Option<u64> },

    /// Response parsed but did not carry the expected data.
    #[error("Unexpected response: {0}")]
    Decode(String),

    /// Client could not be constructed from configuration.
    #[error("Invalid client configuration: {0}")]
    Config(String),
}

/// Build a reqwest client with the configured timeout.
pub fn build_http_client(timeout_secs: u64) -> Result<reqwest::Client, ClientError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ClientError::Config(format!("HTTP client error: {}", e)))
}

/// Join a base URL and a relative path, tolerating a missing trailing slash on the base.
pub(crate) fn endpoint(base: &url::Url, path: &str) -> Result<url::Url, ClientError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path_with_slash = format!("{}/", base.path());
        base.set_path(&path_with_slash);
    }
    base.join(path.trim_start_matches('/'))
        .map_err(|e| ClientError::Config(format!("Invalid endpoint {}: {}", path, e)))
}

/// Parse a configured base URL.
pub(crate) fn parse_base_url(raw: &str) -> Result<url::Url, ClientError> {
    url::Url::parse(raw).map_err(|e| ClientError::Config(format!("Invalid base URL {}: {}", raw, e)))
}

/// Turn a non-success response into a [`ClientError`], reading Retry-After on 429.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = resp
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        return Err(ClientError::RateLimited { retry_after });
    }

    let body = resp.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Convert integer cents to a dollar amount for APIs that take decimals.
pub fn cents_to_dollars(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Convert a decimal dollar amount from an API to integer cents, rounding half away from zero.
pub fn dollars_to_cents(dollars: f64) -> i64 {
    (dollars * 100.0).round() as i64
}

/// Format cents as a fixed two-decimal dollar string (`"12.50"`).
pub fn format_dollars(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_money_conversion() {
        assert_eq!(dollars_to_cents(12.5), 1250);
        assert_eq!(dollars_to_cents(0.1 + 0.2), 30);
        assert_eq!(dollars_to_cents(-3.999), -400);
        assert_eq!(cents_to_dollars(1999), 19.99);
    }

    #[test]
    fn test_format_dollars() {
        assert_eq!(format_dollars(50000), "500.00");
        assert_eq!(format_dollars(5), "0.05");
        assert_eq!(format_dollars(-1234), "-12.34");
    }

    #[test]
    fn test_endpoint_join_keeps_base_path() {
        let base = parse_base_url("https://store.vendhq.com/api/2.0").unwrap();
        let url = endpoint(&base, "/customers/abc").unwrap();
        assert_eq!(url.as_str(), "https://store.vendhq.com/api/2.0/customers/abc");

        let base = parse_base_url("https://api.xero.com/payroll.xro/2.0/").unwrap();
        let url = endpoint(&base, "PayRuns").unwrap();
        assert_eq!(url.as_str(), "https://api.xero.com/payroll.xro/2.0/PayRuns");
    }
}
