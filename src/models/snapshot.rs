//! Payroll snapshot files.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// One captured pay run, stored as a JSON file in the snapshot directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PayrollSnapshot {
    pub pay_run_id: String,
    pub captured_at: DateTime<Utc>,

    #[serde(default)]
    pub period_start: Option<NaiveDate>,

    #[serde(default)]
    pub period_end: Option<NaiveDate>,

    #[serde(default)]
    pub employees: Vec<SnapshotEmployee>,
}

impl PayrollSnapshot {
    pub fn total_gross_cents(&self) -> i64 {
        self.employees.iter().map(|e| e.gross_cents).sum()
    }

    pub fn total_deductions_cents(&self) -> i64 {
        self.employees.iter().map(|e| e.deductions_cents).sum()
    }

    pub fn total_vend_balance_cents(&self) -> i64 {
        self.employees.iter().map(|e| e.vend_balance_cents).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SnapshotEmployee {
    pub xero_employee_id: String,
    pub name: String,

    #[serde(default)]
    pub gross_cents: i64,

    #[serde(default)]
    pub deductions_cents: i64,

    #[serde(default)]
    pub vend_balance_cents: i64,
}

/// Listing entry for a snapshot file.
#[derive(Debug, Serialize)]
pub struct SnapshotSummary {
    pub file: String,
    pub pay_run_id: String,
    pub captured_at: DateTime<Utc>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub employee_count: usize,
    pub total_gross_cents: i64,
    pub total_deductions_cents: i64,
}

#[derive(Debug, Default, Serialize)]
pub struct SnapshotAggregate {
    pub snapshot_count: usize,
    pub employee_count: usize,
    pub total_gross_cents: i64,
    pub total_deductions_cents: i64,
    pub total_vend_balance_cents: i64,
    pub first_captured_at: Option<DateTime<Utc>>,
    pub last_captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct EmployeeChange {
    pub xero_employee_id: String,
    pub name: String,
    pub gross_delta_cents: i64,
    pub deductions_delta_cents: i64,
    pub vend_balance_delta_cents: i64,
}

#[derive(Debug, Serialize)]
pub struct SnapshotDiff {
    pub from: String,
    pub to: String,
    pub added: Vec<SnapshotEmployee>,
    pub removed: Vec<SnapshotEmployee>,
    pub changed: Vec<EmployeeChange>,
    pub unchanged_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct DiffParams {
    pub from: String,
    pub to: String,
}
