//! Staff API key authentication middleware.
//!
//! This middleware intercepts every protected request to:
//! 1. Extract the API key from the Authorization header
//! 2. Hash it and look up the active key and its staff member
//! 3. Inject an `AuthContext` into the request
//! 4. Reject unauthorized requests with HTTP 401

use crate::{db::DbPool, error::AppError, models::staff::StaffApiKey};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// The authenticated staff member, available to handlers as
/// `Extension<AuthContext>`.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub staff_id: Uuid,
    pub staff_name: String,

    /// Admins may run allocations, payroll syncs, credit limit, mapping
    /// and ID review changes
    pub is_admin: bool,
}

impl AuthContext {
    /// Fail with 403 unless the caller is an admin.
    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin {
            Ok(())
        } else {
            Err(AppError::Forbidden("Administrator access required".to_string()))
        }
    }
}

/// SHA-256 of the plain key, hex encoded. This is what `staff_api_keys` stores.
pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// API key authentication middleware function.
///
/// # Flow
///
/// 1. Extract `Authorization: Bearer <key>` header from request
/// 2. Hash the `<key>` using SHA-256
/// 3. Query `staff_api_keys` joined with `staff` for an active match
/// 4. If found: inject `AuthContext` into request, call next handler
/// 5. If not found: return 401 Unauthorized error
pub async fn auth_middleware(
    State(pool): State<DbPool>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let api_key = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::InvalidApiKey)?;

    let key_hash = hash_api_key(api_key);

    let record = sqlx::query_as::<_, StaffApiKey>(
        r#"
        SELECT k.id, k.key_hash, k.staff_id, s.full_name AS staff_name, s.is_admin, k.is_active, k.created_at
        FROM staff_api_keys k
        JOIN staff s ON s.id = k.staff_id
        WHERE k.key_hash = $1 AND k.is_active = true AND s.is_active = true
        "#,
    )
    .bind(&key_hash)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::InvalidApiKey)?;

    request.extensions_mut().insert(AuthContext {
        staff_id: record.staff_id,
        staff_name: record.staff_name,
        is_admin: record.is_admin,
    });

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_sha256_hex() {
        assert_eq!(
            hash_api_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_require_admin() {
        let mut auth = AuthContext {
            staff_id: Uuid::new_v4(),
            staff_name: "Sam".to_string(),
            is_admin: false,
        };
        assert!(matches!(auth.require_admin(), Err(AppError::Forbidden(_))));
        auth.is_admin = true;
        assert!(auth.require_admin().is_ok());
    }
}
