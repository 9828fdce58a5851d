//! HTTP request handlers (route handlers).
//!
//! Each handler extracts its inputs, calls into `services` and maps the
//! result to a JSON response. Errors convert through `AppError`.

use serde::Deserialize;

/// Customer hub endpoints
pub mod crm;
/// Credit limit endpoints
pub mod credit_limits;
/// Deduction allocation endpoints
pub mod deductions;
/// Staff mailbox endpoints
pub mod email_features;
pub mod health;
pub mod id_verification;
/// Employee mapping endpoints
pub mod mappings;
pub mod payments;
pub mod payroll;
pub mod reconciliation;
/// Universal search endpoints
pub mod search;
pub mod smart_replies;
pub mod snapshots;
/// Consignment endpoints
pub mod transfers;

/// `?limit=` query shared by the list endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

impl LimitQuery {
    /// Requested limit, or `default`, kept within 1..=200.
    pub fn limit(&self, default: i64) -> i64 {
        self.limit.unwrap_or(default).clamp(1, 200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_query_defaults_and_clamps() {
        assert_eq!(LimitQuery::default().limit(50), 50);
        assert_eq!(LimitQuery { limit: Some(0) }.limit(50), 1);
        assert_eq!(LimitQuery { limit: Some(10_000) }.limit(50), 200);
    }
}
