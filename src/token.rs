//! Signed session tokens.
//!
//! A token is an HS512 JWT carrying only `iat` and `exp`. It proves that
//! whoever holds it knew the shared key when it was issued; there is no
//! subject. Rotating the signing secret invalidates every outstanding token.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const TOKEN_LIFETIME_DAYS: i64 = 7;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    iat: i64,
    exp: i64,
}

/// Expiry of a token or cookie issued at `issued_at`.
pub fn expiration_from(issued_at: DateTime<Utc>) -> DateTime<Utc> {
    issued_at + Duration::days(TOKEN_LIFETIME_DAYS)
}

pub fn issue(secret: &str) -> Result<String, TokenError> {
    issue_at(secret, Utc::now())
}

pub fn issue_at(secret: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
    let claims = Claims {
        iat: now.timestamp(),
        exp: expiration_from(now).timestamp(),
    };

    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS512),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok(token)
}

pub fn verify(token: &str, secret: &str) -> bool {
    verify_at(token, secret, Utc::now())
}

/// Checks the signature and that `now` is strictly before the expiry.
/// Every failure is reported as `false`.
pub fn verify_at(token: &str, secret: &str, now: DateTime<Utc>) -> bool {
    // Expiry is compared against `now` below, not the library's clock.
    let mut validation = Validation::new(Algorithm::HS512);
    validation.validate_exp = false;
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "iat"]);

    let decoded = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    );

    match decoded {
        Ok(data) => now.timestamp() < data.claims.exp,
        Err(error) => {
            tracing::debug!(%error, "rejected session token");
            false
        }
    }
}
