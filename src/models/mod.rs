//! Data models representing database entities.
//!
//! Row types map to database tables; request and response types are the
//! JSON bodies of the API.

/// Customer hub profiles, notes and communications
pub mod customer;
/// Payroll deductions and their allocation to POS sales
pub mod deduction;
pub mod email;
pub mod id_verification;
/// Payroll employee to POS customer mappings
pub mod mapping;
pub mod payment;
/// Pay runs and payslips as read from the payroll API
pub mod payroll;
pub mod search;
pub mod snapshot;
/// Staff API keys
pub mod staff;
/// Reconciliation rows and credit limits
pub mod staff_account;
/// Consignments and their line items
pub mod transfer;
