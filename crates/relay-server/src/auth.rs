//! JWT-backed credential verifier.
//!
//! Tokens are HS256-signed JWTs carrying the principal identifier in the
//! `id` claim. Every rejection maps to the same opaque
//! [`VerifyError::InvalidCredential`] so a rejected peer cannot distinguish
//! a malformed token from an expired or unsigned one.

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use relay_core::{CredentialVerifier, PrincipalId, VerifyError};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Claims carried by a Relay access token.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Principal identifier.
    pub id: String,
    /// Expiry, seconds since the Unix epoch.
    pub exp: u64,
}

/// Verifies HS256 JWTs against a shared secret.
pub struct JwtVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier for the given HMAC secret.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<PrincipalId, VerifyError> {
        match jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => Ok(PrincipalId::new(data.claims.id)),
            Err(err) => {
                debug!(error = %err, "Token rejected");
                Err(VerifyError::InvalidCredential)
            }
        }
    }
}
