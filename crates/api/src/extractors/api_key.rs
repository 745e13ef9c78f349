//! API key authentication extractors.
//!
//! Keys arrive in the `X-API-Key` header and are matched by SHA-256 hash.
//! Dispatcher keys are flagged `is_admin`; driver-app keys carry the
//! driver they act for.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use sqlx::PgPool;

use crate::app::AppState;
use crate::error::ApiError;
use persistence::repositories::ApiKeyRepository;
use shared::crypto::{sha256_hex, API_KEY_PREFIX};

/// Header carrying the API key.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Authenticated API key information.
#[derive(Debug, Clone)]
pub struct ApiKeyAuth {
    /// Database ID of the authenticated API key.
    pub api_key_id: i64,
    /// Key prefix for identification (e.g., "sd_aBcDeFgH").
    pub key_prefix: String,
    /// Whether this is a dispatcher (admin) key.
    pub is_admin: bool,
    /// Driver this key belongs to, for driver-app keys.
    pub driver_id: Option<i64>,
}

impl ApiKeyAuth {
    /// Validates an API key and returns authentication info.
    pub async fn validate(pool: &PgPool, api_key: &str) -> Result<Self, ApiError> {
        // sd_ prefix plus at least 8 characters
        if api_key.len() < API_KEY_PREFIX.len() + 8 || !api_key.starts_with(API_KEY_PREFIX) {
            return Err(ApiError::Unauthorized(
                "Invalid or missing API key".to_string(),
            ));
        }

        let key_hash = sha256_hex(api_key);

        let repo = ApiKeyRepository::new(pool.clone());
        let key = repo
            .find_by_key_hash(&key_hash)
            .await
            .map_err(|e| {
                tracing::error!("Database error during API key lookup: {}", e);
                ApiError::Internal("Authentication service unavailable".to_string())
            })?
            .ok_or_else(|| ApiError::Unauthorized("Invalid or missing API key".to_string()))?;

        if !ApiKeyRepository::is_key_valid(&key) {
            if !key.is_active {
                return Err(ApiError::Unauthorized(
                    "Invalid or missing API key".to_string(),
                ));
            } else {
                return Err(ApiError::Unauthorized("API key has expired".to_string()));
            }
        }

        // Fire and forget
        let pool_clone = pool.clone();
        let key_id = key.id;
        tokio::spawn(async move {
            let repo = ApiKeyRepository::new(pool_clone);
            if let Err(e) = repo.update_last_used(key_id).await {
                tracing::warn!("Failed to update API key last_used_at: {}", e);
            }
        });

        Ok(ApiKeyAuth {
            api_key_id: key.id,
            key_prefix: key.key_prefix,
            is_admin: key.is_admin,
            driver_id: key.driver_id,
        })
    }

    /// The driver behind this key, or 403 for keys not bound to a driver.
    pub fn require_driver(&self) -> Result<i64, ApiError> {
        self.driver_id
            .ok_or_else(|| ApiError::Forbidden("User is not a driver".to_string()))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for ApiKeyAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // Already validated by the auth middleware
        if let Some(auth) = parts.extensions.get::<ApiKeyAuth>() {
            return Ok(auth.clone());
        }

        let api_key = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("Invalid or missing API key".to_string()))?;

        Self::validate(&state.pool, api_key).await
    }
}

/// An authenticated driver-app caller.
#[derive(Debug, Clone)]
pub struct DriverAuth {
    pub driver_id: i64,
    pub api_key_id: i64,
}

#[async_trait]
impl FromRequestParts<AppState> for DriverAuth {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth = ApiKeyAuth::from_request_parts(parts, state).await?;
        Ok(DriverAuth {
            driver_id: auth.require_driver()?,
            api_key_id: auth.api_key_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(driver_id: Option<i64>, is_admin: bool) -> ApiKeyAuth {
        ApiKeyAuth {
            api_key_id: 1,
            key_prefix: "sd_aBcDeFgH".to_string(),
            is_admin,
            driver_id,
        }
    }

    #[test]
    fn test_api_key_auth_struct() {
        let auth = auth(None, false);
        assert_eq!(auth.api_key_id, 1);
        assert_eq!(auth.key_prefix, "sd_aBcDeFgH");
        assert!(!auth.is_admin);
    }

    #[test]
    fn test_driver_key_resolves_driver() {
        assert_eq!(auth(Some(42), false).require_driver().unwrap(), 42);
    }

    #[test]
    fn test_dispatcher_key_is_not_a_driver() {
        let err = auth(None, true).require_driver().unwrap_err();
        match err {
            ApiError::Forbidden(msg) => assert_eq!(msg, "User is not a driver"),
            other => panic!("Expected Forbidden, got {:?}", other),
        }
    }

    #[test]
    fn test_api_key_auth_debug() {
        let debug_str = format!("{:?}", auth(Some(3), false));
        assert!(debug_str.contains("api_key_id"));
        assert!(debug_str.contains("driver_id"));
    }
}
