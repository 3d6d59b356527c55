//! Boundary with the external identity provider.
//!
//! The gateway never validates credentials itself beyond what the token
//! carries; issuing, refreshing, and revoking tokens belongs to the identity
//! service. Resolution must finish before a connection may enter its open
//! state.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::websocket::UserId;

/// Claims carried by an access token. Only `sub` is consumed here.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// Resolves a bearer credential to a user identity.
///
/// Failure never carries partial identity data. Injected through `AppState`
/// so tests can substitute a static resolver.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    async fn resolve(&self, credential: &str) -> Result<UserId, AppError>;
}

/// HS256 JWT resolver, sharing its secret with the token issuer.
pub struct JwtIdentityResolver {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityResolver {
    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl IdentityResolver for JwtIdentityResolver {
    async fn resolve(&self, credential: &str) -> Result<UserId, AppError> {
        let token = decode::<Claims>(credential, &self.decoding_key, &self.validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "credential rejected");
                AppError::Unauthorized
            })?;

        Ok(UserId::from(token.claims.sub))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &[u8] = b"test-secret";

    fn token(sub: &str, exp_offset_secs: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp: (chrono::Utc::now().timestamp() + exp_offset_secs) as usize,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET),
        )
        .expect("encode test token")
    }

    #[tokio::test]
    async fn test_valid_token_resolves_to_subject() {
        let resolver = JwtIdentityResolver::from_secret(SECRET);
        let user = resolver
            .resolve(&token("u1", 3600))
            .await
            .expect("valid token");
        assert_eq!(user, UserId::from("u1"));
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected() {
        let resolver = JwtIdentityResolver::from_secret(SECRET);
        assert!(resolver.resolve(&token("u1", -3600)).await.is_err());
    }

    #[tokio::test]
    async fn test_wrong_secret_is_rejected() {
        let resolver = JwtIdentityResolver::from_secret(b"other-secret");
        assert!(resolver.resolve(&token("u1", 3600)).await.is_err());
    }

    #[tokio::test]
    async fn test_garbage_credential_is_rejected() {
        let resolver = JwtIdentityResolver::from_secret(SECRET);
        assert!(resolver.resolve("not-a-jwt").await.is_err());
    }
}
