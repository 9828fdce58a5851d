//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They handle database transactions, validation, and calls to the POS,
//! payroll, gateway and LLM clients.

pub mod allocation_service;
pub mod credit_limit_service;
pub mod customer_hub_service;
pub mod email_features_service;
pub mod employee_mapping_service;
pub mod id_verification_service;
pub mod payment_service;
pub mod payroll_sync_service;
pub mod reconciliation_service;
pub mod search_service;
pub mod smart_reply_service;
pub mod snapshot_service;
pub mod transfer_service;
