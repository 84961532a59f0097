//! Connection Authentication
//!
//! Validates JWTs from an external auth provider; this server never issues
//! tokens. A validated subject claim is folded into the engine's `UserId`
//! via a domain-separated hash, so whatever id scheme the provider uses,
//! the ledger sees a uniform 16-byte key. When no key material is
//! configured (development), connections may name their own UUID instead.

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::game::bet::UserId;

/// Domain separator for subject-to-UserId derivation.
const USER_ID_DOMAIN: &[u8] = b"CRASHLINE_UID_V1";

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Expected issuer claim ("iss"). If None, any issuer accepted.
    pub issuer: Option<String>,
    /// RS256 public key in PEM format (preferred for external providers).
    pub public_key_pem: Option<String>,
    /// HS256 secret (fallback for simple setups).
    pub secret: Option<String>,
    /// Skip expiry validation (testing only).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            issuer: std::env::var("AUTH_ISSUER").ok(),
            public_key_pem: std::env::var("AUTH_PUBLIC_KEY_PEM").ok(),
            secret: std::env::var("AUTH_SECRET").ok(),
            skip_expiry: std::env::var("AUTH_SKIP_EXPIRY")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        }
    }

    /// Is any key material configured?
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }
}

/// Claims this server cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject: the user id at the auth provider.
    pub sub: String,
    /// Expiry timestamp (Unix seconds).
    #[serde(default)]
    pub exp: u64,
    /// Issuer.
    #[serde(default)]
    pub iss: Option<String>,
}

/// Authentication errors.
#[derive(Debug, Clone, Error)]
pub enum AuthError {
    /// No key material configured.
    #[error("authentication not configured")]
    NotConfigured,

    /// Token expired.
    #[error("token expired")]
    Expired,

    /// Signature check failed.
    #[error("invalid signature")]
    InvalidSignature,

    /// Issuer mismatch.
    #[error("invalid issuer")]
    InvalidIssuer,

    /// Token malformed or missing a required claim.
    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Validate a token and derive the engine-side user id.
pub fn authenticate(token: &str, config: &AuthConfig) -> Result<UserId, AuthError> {
    let claims = validate_token(token, config)?;
    Ok(user_id_from_subject(&claims.sub))
}

/// Validate a JWT and extract its claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    let algorithm = if config.public_key_pem.is_some() {
        Algorithm::RS256
    } else {
        Algorithm::HS256
    };

    let mut validation = Validation::new(algorithm);
    validation.required_spec_claims = std::collections::HashSet::new();
    validation.validate_aud = false;
    if let Some(ref issuer) = config.issuer {
        validation.set_issuer(&[issuer]);
    }
    if config.skip_expiry {
        validation.validate_exp = false;
    }

    let key = if let Some(ref pem) = config.public_key_pem {
        DecodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| AuthError::Invalid(format!("invalid public key: {e}")))?
    } else if let Some(ref secret) = config.secret {
        DecodingKey::from_secret(secret.as_bytes())
    } else {
        return Err(AuthError::NotConfigured);
    };

    let claims = decode::<TokenClaims>(token, &key, &validation)
        .map_err(map_jwt_error)?
        .claims;

    if claims.sub.is_empty() {
        return Err(AuthError::Invalid("missing sub claim".into()));
    }

    Ok(claims)
}

/// Fold an arbitrary provider subject into a 16-byte `UserId`.
pub fn user_id_from_subject(subject: &str) -> UserId {
    let mut hasher = Sha256::new();
    hasher.update(USER_ID_DOMAIN);
    hasher.update(subject.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    UserId::new(bytes)
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
        other => AuthError::Invalid(format!("{other:?}")),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "test-secret-key-256-bits-long!!";

    fn make_token(claims: &TokenClaims) -> String {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn hs256_config() -> AuthConfig {
        AuthConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        }
    }

    fn fresh_claims(sub: &str) -> TokenClaims {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
        TokenClaims {
            sub: sub.into(),
            exp: now + 3_600,
            iss: Some("test-issuer".into()),
        }
    }

    #[test]
    fn test_valid_token() {
        let token = make_token(&fresh_claims("player-42"));
        let claims = validate_token(&token, &hs256_config()).unwrap();
        assert_eq!(claims.sub, "player-42");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let token = encode(
            &Header::new(Algorithm::HS256),
            &fresh_claims("player-42"),
            &EncodingKey::from_secret(b"a-different-secret"),
        )
        .unwrap();
        assert!(matches!(
            validate_token(&token, &hs256_config()),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_expired_token_rejected() {
        let mut claims = fresh_claims("player-42");
        claims.exp = 1_000;
        let token = make_token(&claims);
        assert!(matches!(
            validate_token(&token, &hs256_config()),
            Err(AuthError::Expired)
        ));
    }

    #[test]
    fn test_skip_expiry_for_tests() {
        let mut claims = fresh_claims("player-42");
        claims.exp = 1_000;
        let token = make_token(&claims);

        let config = AuthConfig {
            skip_expiry: true,
            ..hs256_config()
        };
        assert!(validate_token(&token, &config).is_ok());
    }

    #[test]
    fn test_issuer_checked_when_configured() {
        let token = make_token(&fresh_claims("player-42"));

        let config = AuthConfig {
            issuer: Some("someone-else".into()),
            ..hs256_config()
        };
        assert!(matches!(
            validate_token(&token, &config),
            Err(AuthError::InvalidIssuer)
        ));

        let config = AuthConfig {
            issuer: Some("test-issuer".into()),
            ..hs256_config()
        };
        assert!(validate_token(&token, &config).is_ok());
    }

    #[test]
    fn test_unconfigured_rejects() {
        let token = make_token(&fresh_claims("player-42"));
        assert!(matches!(
            validate_token(&token, &AuthConfig::default()),
            Err(AuthError::NotConfigured)
        ));
    }

    #[test]
    fn test_user_id_derivation_stable() {
        let a = user_id_from_subject("player-42");
        let b = user_id_from_subject("player-42");
        let c = user_id_from_subject("player-43");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_authenticate_end_to_end() {
        let token = make_token(&fresh_claims("player-42"));
        let user = authenticate(&token, &hs256_config()).unwrap();
        assert_eq!(user, user_id_from_subject("player-42"));
    }
}
