//! Payroll snapshots on disk.
//!
//! These functions do blocking filesystem I/O; handlers run them on the
//! blocking pool.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use walkdir::WalkDir;

use crate::error::AppError;
use crate::models::snapshot::{
    EmployeeChange, PayrollSnapshot, SnapshotAggregate, SnapshotDiff, SnapshotEmployee, SnapshotSummary,
};

/// Read every `*.json` snapshot directly inside `dir`, newest first.
///
/// Unreadable or malformed files are skipped with a warning. A missing
/// directory yields no snapshots.
pub fn load_snapshots(dir: &Path) -> Vec<(String, PayrollSnapshot)> {
    if !dir.is_dir() {
        tracing::warn!(dir = %dir.display(), "Snapshot directory does not exist");
        return Vec::new();
    }

    let mut snapshots = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unreadable snapshot entry");
                continue;
            }
        };

        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }

        let parsed = std::fs::read(path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice::<PayrollSnapshot>(&bytes).map_err(|e| e.to_string()));

        match parsed {
            Ok(snapshot) => {
                let name = entry.file_name().to_string_lossy().into_owned();
                snapshots.push((name, snapshot));
            }
            Err(e) => tracing::warn!(file = %path.display(), error = %e, "Skipping invalid snapshot"),
        }
    }

    snapshots.sort_by(|a, b| b.1.captured_at.cmp(&a.1.captured_at));
    snapshots
}

pub fn list(dir: &Path) -> Vec<SnapshotSummary> {
    load_snapshots(dir)
        .into_iter()
        .map(|(file, s)| SnapshotSummary {
            employee_count: s.employees.len(),
            total_gross_cents: s.total_gross_cents(),
            total_deductions_cents: s.total_deductions_cents(),
            file,
            pay_run_id: s.pay_run_id,
            captured_at: s.captured_at,
            period_start: s.period_start,
            period_end: s.period_end,
        })
        .collect()
}

pub fn aggregate(dir: &Path) -> SnapshotAggregate {
    let snapshots = load_snapshots(dir);
    let mut aggregate = SnapshotAggregate {
        snapshot_count: snapshots.len(),
        ..Default::default()
    };

    let mut employees = HashSet::new();
    for (_, snapshot) in &snapshots {
        aggregate.total_gross_cents += snapshot.total_gross_cents();
        aggregate.total_deductions_cents += snapshot.total_deductions_cents();
        aggregate.total_vend_balance_cents += snapshot.total_vend_balance_cents();
        employees.extend(snapshot.employees.iter().map(|e| e.xero_employee_id.as_str()));
    }
    aggregate.employee_count = employees.len();

    aggregate.last_captured_at = snapshots.first().map(|(_, s)| s.captured_at);
    aggregate.first_captured_at = snapshots.last().map(|(_, s)| s.captured_at);
    aggregate
}

/// Per-employee differences between two snapshots.
pub fn compare(from: &PayrollSnapshot, to: &PayrollSnapshot) -> SnapshotDiff {
    let before: BTreeMap<&str, &SnapshotEmployee> =
        from.employees.iter().map(|e| (e.xero_employee_id.as_str(), e)).collect();
    let after: BTreeMap<&str, &SnapshotEmployee> =
        to.employees.iter().map(|e| (e.xero_employee_id.as_str(), e)).collect();

    let mut diff = SnapshotDiff {
        from: from.pay_run_id.clone(),
        to: to.pay_run_id.clone(),
        added: Vec::new(),
        removed: Vec::new(),
        changed: Vec::new(),
        unchanged_count: 0,
    };

    for (id, new) in &after {
        match before.get(id) {
            None => diff.added.push((*new).clone()),
            Some(old) if old == new => diff.unchanged_count += 1,
            Some(old) => diff.changed.push(EmployeeChange {
                xero_employee_id: new.xero_employee_id.clone(),
                name: new.name.clone(),
                gross_delta_cents: new.gross_cents - old.gross_cents,
                deductions_delta_cents: new.deductions_cents - old.deductions_cents,
                vend_balance_delta_cents: new.vend_balance_cents - old.vend_balance_cents,
            }),
        }
    }

    diff.removed = before
        .iter()
        .filter(|(id, _)| !after.contains_key(*id))
        .map(|(_, e)| (*e).clone())
        .collect();

    diff
}

/// Diff two snapshots named by pay run id or file name.
pub fn diff(dir: &Path, from: &str, to: &str) -> Result<SnapshotDiff, AppError> {
    let snapshots = load_snapshots(dir);
    let find = |key: &str| {
        snapshots
            .iter()
            .find(|(file, s)| s.pay_run_id == key || file == key || file.trim_end_matches(".json") == key)
            .map(|(_, s)| s)
            .ok_or_else(|| AppError::NotFound(format!("Snapshot not found: {}", key)))
    };

    Ok(compare(find(from)?, find(to)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn employee(id: &str, gross: i64, deductions: i64, balance: i64) -> SnapshotEmployee {
        SnapshotEmployee {
            xero_employee_id: id.to_string(),
            name: format!("Employee {}", id),
            gross_cents: gross,
            deductions_cents: deductions,
            vend_balance_cents: balance,
        }
    }

    fn write_snapshot(dir: &Path, file: &str, pay_run: &str, captured: &str, employees: Vec<SnapshotEmployee>) {
        let snapshot = PayrollSnapshot {
            pay_run_id: pay_run.to_string(),
            captured_at: captured.parse().unwrap(),
            period_start: None,
            period_end: None,
            employees,
        };
        fs::write(dir.join(file), serde_json::to_vec(&snapshot).unwrap()).unwrap();
    }

    #[test]
    fn test_list_sorted_and_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(dir.path(), "a.json", "run-1", "2025-03-01T00:00:00Z", vec![employee("e1", 100_000, 2_000, -500)]);
        write_snapshot(dir.path(), "b.json", "run-2", "2025-03-08T00:00:00Z", vec![]);
        fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        write_snapshot(&dir.path().join("nested"), "c.json", "run-3", "2025-03-15T00:00:00Z", vec![]);

        let listed = list(dir.path());
        let ids: Vec<_> = listed.iter().map(|s| s.pay_run_id.as_str()).collect();
        assert_eq!(ids, vec!["run-2", "run-1"]);
        assert_eq!(listed[1].total_gross_cents, 100_000);
        assert_eq!(listed[1].file, "a.json");
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list(&dir.path().join("missing")).is_empty());
        assert_eq!(aggregate(&dir.path().join("missing")).snapshot_count, 0);
    }

    #[test]
    fn test_aggregate_counts_distinct_employees() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(
            dir.path(),
            "a.json",
            "run-1",
            "2025-03-01T00:00:00Z",
            vec![employee("e1", 100_000, 2_000, -500), employee("e2", 50_000, 0, 0)],
        );
        write_snapshot(dir.path(), "b.json", "run-2", "2025-03-08T00:00:00Z", vec![employee("e1", 110_000, 3_000, -200)]);

        let agg = aggregate(dir.path());
        assert_eq!(agg.snapshot_count, 2);
        assert_eq!(agg.employee_count, 2);
        assert_eq!(agg.total_gross_cents, 260_000);
        assert_eq!(agg.total_deductions_cents, 5_000);
        assert_eq!(agg.total_vend_balance_cents, -700);
        assert_eq!(agg.first_captured_at.unwrap().to_rfc3339(), "2025-03-01T00:00:00+00:00");
        assert_eq!(agg.last_captured_at.unwrap().to_rfc3339(), "2025-03-08T00:00:00+00:00");
    }

    #[test]
    fn test_diff_by_pay_run_or_file() {
        let dir = tempfile::tempdir().unwrap();
        write_snapshot(
            dir.path(),
            "a.json",
            "run-1",
            "2025-03-01T00:00:00Z",
            vec![employee("e1", 100_000, 2_000, -500), employee("e2", 50_000, 0, 0), employee("e3", 1, 1, 1)],
        );
        write_snapshot(
            dir.path(),
            "b.json",
            "run-2",
            "2025-03-08T00:00:00Z",
            vec![employee("e1", 110_000, 3_000, -200), employee("e3", 1, 1, 1), employee("e4", 70_000, 0, 0)],
        );

        let d = diff(dir.path(), "run-1", "b").unwrap();
        assert_eq!(d.added.len(), 1);
        assert_eq!(d.added[0].xero_employee_id, "e4");
        assert_eq!(d.removed.len(), 1);
        assert_eq!(d.removed[0].xero_employee_id, "e2");
        assert_eq!(d.changed.len(), 1);
        assert_eq!(d.changed[0].gross_delta_cents, 10_000);
        assert_eq!(d.changed[0].deductions_delta_cents, 1_000);
        assert_eq!(d.changed[0].vend_balance_delta_cents, 300);
        assert_eq!(d.unchanged_count, 1);

        assert!(matches!(diff(dir.path(), "run-1", "run-9"), Err(AppError::NotFound(_))));
    }
}
