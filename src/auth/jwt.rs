//! JWT bearer tokens
//!
//! Tokens are HS256-signed by the account service and carry `{ userId, email }`.
//! This side only needs to verify them; issuance exists for dev tooling and
//! tests that share the secret.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::types::{ExamdeskError, Result};

/// Shortest secret accepted for signing
const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Input for issuing a token
#[derive(Debug, Clone)]
pub struct TokenInput {
    pub user_id: String,
    pub email: String,
}

/// Signs and verifies bearer tokens with one shared secret.
#[derive(Clone)]
pub struct JwtValidator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiry_seconds: u64,
}

impl JwtValidator {
    pub fn new(secret: &str, expiry_seconds: u64) -> Result<Self> {
        if secret.len() < MIN_SECRET_LEN {
            return Err(ExamdeskError::Config(format!(
                "JWT_SECRET must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            expiry_seconds,
        })
    }

    pub fn generate_token(&self, input: TokenInput) -> Result<String> {
        let iat = Utc::now().timestamp();
        let claims = Claims {
            user_id: input.user_id,
            email: Some(input.email),
            iat,
            exp: iat + self.expiry_seconds as i64,
        };
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    /// Decode and check a token. Expired, forged and user-less tokens are
    /// all `Unauthorized`.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default()).map_err(
            |err| {
                let reason = match err.kind() {
                    ErrorKind::ExpiredSignature => "Token expired",
                    ErrorKind::InvalidSignature => "Invalid signature",
                    _ => "Invalid token",
                };
                ExamdeskError::Unauthorized(reason.into())
            },
        )?;

        if data.claims.user_id.trim().is_empty() {
            return Err(ExamdeskError::Unauthorized("Token has no user".into()));
        }
        Ok(data.claims)
    }

    /// Resolve an `Authorization` header value to the caller's user id
    pub fn authenticate(&self, auth_header: Option<&str>) -> Result<String> {
        let token = bearer_token(auth_header)
            .ok_or_else(|| ExamdeskError::Unauthorized("Missing bearer token".into()))?;
        Ok(self.verify(token)?.user_id)
    }
}

/// Token from a `Bearer <token>` header; the scheme is case-insensitive
pub fn bearer_token(auth_header: Option<&str>) -> Option<&str> {
    let (scheme, token) = auth_header?.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
