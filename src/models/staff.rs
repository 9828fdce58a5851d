//! Staff API key model for authentication.
//!
//! Keys are stored as SHA-256 hashes; the plain key is only ever seen by the staff member.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// An active API key joined with the staff member it belongs to.
///
/// # Database Tables
///
/// `staff_api_keys` (key hash, active flag) joined with `staff`
/// (name, admin flag).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StaffApiKey {
    /// Key record id
    pub id: Uuid,

    /// SHA-256 of the bearer key (64 hex characters)
    pub key_hash: String,

    pub staff_id: Uuid,

    pub staff_name: String,

    /// Admins may run allocations, syncs, credit limit and mapping changes
    pub is_admin: bool,

    pub is_active: bool,

    pub created_at: DateTime<Utc>,
}
