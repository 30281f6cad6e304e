//! Token checks for relay connections
//!
//! When the relay runs with a secret, every socket upgrade and publish must
//! carry an HS256 JWT, either as `Authorization: Bearer <token>` or as a
//! `?token=` query parameter.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Default lifetime of issued tokens
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn new(subject: impl Into<String>, ttl_seconds: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: subject.into(),
            iat: now,
            exp: now + ttl_seconds,
        }
    }

    pub fn is_expired(&self) -> bool {
        chrono::Utc::now().timestamp() > self.exp
    }
}

/// Issues and validates relay tokens with a shared secret
pub struct TokenValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, subject: &str, ttl_seconds: i64) -> Result<String> {
        let claims = Claims::new(subject, ttl_seconds);
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| SyncError::Auth(e.to_string()))
    }

    pub fn validate(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map_err(|e| SyncError::Auth(e.to_string()))?;
        if data.claims.is_expired() {
            return Err(SyncError::Auth("token has expired".to_string()));
        }
        Ok(data.claims)
    }

    /// Accepts `Bearer <token>` or a bare token
    pub fn validate_authorization(&self, header: &str) -> Result<Claims> {
        self.validate(bearer_token(header))
    }
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator").finish_non_exhaustive()
    }
}

/// Strip an optional `Bearer ` prefix
pub fn bearer_token(header: &str) -> &str {
    header.strip_prefix("Bearer ").unwrap_or(header).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "relay-test-secret-that-is-long-enough";

    #[test]
    fn test_issue_and_validate() {
        let validator = TokenValidator::new(SECRET);
        let token = validator.issue("user-1", DEFAULT_TOKEN_TTL_SECS).unwrap();
        let claims = validator.validate(&token).unwrap();
        assert_eq!(claims.sub, "user-1");

        let claims = validator
            .validate_authorization(&format!("Bearer {}", token))
            .unwrap();
        assert_eq!(claims.sub, "user-1");
    }

    #[test]
    fn test_rejects_wrong_secret_and_garbage() {
        let issuer = TokenValidator::new("another-secret-entirely-different");
        let token = issuer.issue("user-1", 60).unwrap();
        let validator = TokenValidator::new(SECRET);
        assert!(matches!(validator.validate(&token), Err(SyncError::Auth(_))));
        assert!(validator.validate("not-a-jwt").is_err());
    }

    #[test]
    fn test_rejects_expired_token() {
        let validator = TokenValidator::new(SECRET);
        // Past the default 60 s leeway
        let token = validator.issue("user-1", -120).unwrap();
        assert!(validator.validate(&token).is_err());
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token("Bearer abc"), "abc");
        assert_eq!(bearer_token("abc"), "abc");
    }
}
