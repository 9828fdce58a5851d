//! Payroll models: pay runs and payslips as the payroll API returns them,
//! plus the locally stored payroll rows and sync reports.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Parse the payroll API's date strings (`2025-03-16T00:00:00`, `2025-03-16`).
pub fn parse_payroll_date(raw: &str) -> Option<NaiveDate> {
    let date_part = raw.get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayRun {
    #[serde(default, rename = "payRunID")]
    pub pay_run_id: Option<String>,

    #[serde(default)]
    pub period_start_date: Option<String>,

    #[serde(default)]
    pub period_end_date: Option<String>,

    #[serde(default)]
    pub payment_date: Option<String>,

    #[serde(default)]
    pub pay_run_status: Option<String>,

    #[serde(default)]
    pub total_cost: Option<f64>,
}

impl PayRun {
    pub fn payment_date(&self) -> Option<NaiveDate> {
        self.payment_date.as_deref().and_then(parse_payroll_date)
    }

    pub fn period_start(&self) -> Option<NaiveDate> {
        self.period_start_date.as_deref().and_then(parse_payroll_date)
    }

    pub fn period_end(&self) -> Option<NaiveDate> {
        self.period_end_date.as_deref().and_then(parse_payroll_date)
    }

    /// Lowercased status, `draft` when absent.
    pub fn status(&self) -> String {
        self.pay_run_status
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_else(|| "draft".to_string())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaySlip {
    #[serde(default, rename = "paySlipID")]
    pub pay_slip_id: Option<String>,

    #[serde(default, rename = "employeeID")]
    pub employee_id: Option<String>,

    #[serde(default)]
    pub first_name: Option<String>,

    #[serde(default)]
    pub last_name: Option<String>,

    #[serde(default)]
    pub total_earnings: Option<f64>,

    #[serde(default)]
    pub gross_earnings: Option<f64>,

    #[serde(default)]
    pub total_deductions: Option<f64>,

    #[serde(default)]
    pub earnings_lines: Vec<EarningsLine>,

    #[serde(default)]
    pub deduction_lines: Vec<DeductionLine>,
}

impl PaySlip {
    /// Name printed on the payslip, if the API included one.
    pub fn employee_name(&self) -> Option<String> {
        let name = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or("").trim(),
            self.last_name.as_deref().unwrap_or("").trim()
        );
        let name = name.trim().to_string();
        (!name.is_empty()).then_some(name)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsLine {
    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub amount: Option<f64>,

    #[serde(default)]
    pub rate_per_unit: Option<f64>,

    #[serde(default)]
    pub number_of_units: Option<f64>,

    #[serde(default)]
    pub fixed_amount: Option<f64>,
}

impl EarningsLine {
    pub fn value(&self) -> f64 {
        self.amount
            .or_else(|| match (self.rate_per_unit, self.number_of_units) {
                (Some(rate), Some(units)) => Some(rate * units),
                (Some(rate), None) => Some(rate),
                _ => None,
            })
            .or(self.fixed_amount)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeductionLine {
    #[serde(default, rename = "deductionTypeID")]
    pub deduction_type_id: Option<String>,

    #[serde(default)]
    pub display_name: Option<String>,

    #[serde(default)]
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XeroEmployee {
    #[serde(default, rename = "employeeID")]
    pub employee_id: Option<String>,

    #[serde(default)]
    pub first_name: Option<String>,

    #[serde(default)]
    pub last_name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,
}

impl XeroEmployee {
    pub fn full_name(&self) -> String {
        format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        )
        .trim()
        .to_string()
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XeroDeductionType {
    #[serde(default, alias = "deductionID")]
    pub deduction_id: Option<String>,

    #[serde(default)]
    pub deduction_name: Option<String>,
}

/// Stored payroll row (`xero_payrolls`).
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Payroll {
    pub id: Uuid,
    pub xero_payroll_id: String,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub payment_date: NaiveDate,
    pub status: String,
    pub total_gross_cents: i64,
    pub total_deductions_cents: i64,
    pub employee_count: i32,
    pub is_cached: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /api/v1/payroll/sync`.
#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    #[serde(default = "default_limit_weeks")]
    pub limit_weeks: i64,
}

fn default_limit_weeks() -> i64 {
    12
}

impl Default for SyncRequest {
    fn default() -> Self {
        Self {
            limit_weeks: default_limit_weeks(),
        }
    }
}

/// Outcome of a payroll sync run.
#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub synced: usize,
    pub cached: usize,
    pub errors: Vec<String>,
    pub total_processed: usize,
    pub total_payruns_found: usize,
    pub deductions_upserted: usize,
    pub timed_out: bool,
}

/// Per-payroll deduction totals.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct PayrollDeductionSummary {
    pub payroll_id: Uuid,
    pub xero_payroll_id: String,
    pub payment_date: NaiveDate,
    pub deduction_count: i64,
    pub total_cents: i64,
    pub pending_count: i64,
    pub allocated_count: i64,
    pub failed_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_payroll_date_variants() {
        let expected = NaiveDate::from_ymd_opt(2025, 3, 16);
        assert_eq!(parse_payroll_date("2025-03-16T00:00:00"), expected);
        assert_eq!(parse_payroll_date("2025-03-16"), expected);
        assert_eq!(parse_payroll_date("16/03/2025"), None);
        assert_eq!(parse_payroll_date(""), None);
    }

    #[test]
    fn test_pay_run_status_lowercased_with_default() {
        let run = PayRun {
            pay_run_status: Some("Posted".into()),
            ..Default::default()
        };
        assert_eq!(run.status(), "posted");
        assert_eq!(PayRun::default().status(), "draft");
    }

    #[test]
    fn test_earnings_line_value_fallbacks() {
        let line = EarningsLine {
            rate_per_unit: Some(25.0),
            number_of_units: Some(8.0),
            ..Default::default()
        };
        assert_eq!(line.value(), 200.0);

        let fixed = EarningsLine {
            fixed_amount: Some(50.0),
            ..Default::default()
        };
        assert_eq!(fixed.value(), 50.0);
    }

    #[test]
    fn test_payslip_deserializes_from_api_shape() {
        let slip: PaySlip = serde_json::from_str(
            r#"{"paySlipID":"ps-1","employeeID":"e-1","firstName":"Ana","lastName":"Ngata",
                "totalEarnings":1200.5,"deductionLines":[{"deductionTypeID":"d-1","amount":40}]}"#,
        )
        .unwrap();

        assert_eq!(slip.employee_name().as_deref(), Some("Ana Ngata"));
        assert_eq!(slip.deduction_lines[0].deduction_type_id.as_deref(), Some("d-1"));
        assert_eq!(slip.deduction_lines[0].amount, Some(40.0));
    }
}
