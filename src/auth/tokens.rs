//! Access/refresh token signing and validation.
//!
//! Both token kinds share the claim shape `{iss, sub, aud: [iss], iat, exp}`
//! and differ only in TTL. The codec is stateless: issuing a refresh token
//! obliges the caller to persist its hash on the user row (see the
//! orchestrator), the codec itself holds no session state.

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transient pair handed back to the transport layer; never persisted.
#[derive(Clone, Debug, Serialize)]
pub struct AuthTokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenCodec {
    issuer: String,
    secret: SecretString,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenCodec {
    #[must_use]
    pub fn new(
        issuer: String,
        secret: SecretString,
        access_ttl_seconds: i64,
        refresh_ttl_seconds: i64,
    ) -> Self {
        Self {
            issuer,
            secret,
            access_ttl_seconds,
            refresh_ttl_seconds,
        }
    }

    /// Sign a short-lived access token for a user.
    ///
    /// # Errors
    /// Fails only on signer misconfiguration; never on user input.
    pub fn issue_access_token(&self, user_uid: Uuid) -> Result<String> {
        self.sign(user_uid, self.access_ttl_seconds)
    }

    /// Sign a long-lived refresh token for a user.
    ///
    /// # Errors
    /// Fails only on signer misconfiguration; never on user input.
    pub fn issue_refresh_token(&self, user_uid: Uuid) -> Result<String> {
        self.sign(user_uid, self.refresh_ttl_seconds)
    }

    /// Validate signature, issuer, audience, and expiry.
    /// Expired or tampered tokens yield `None`.
    #[must_use]
    pub fn verify(&self, token: &str) -> Option<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.issuer]);
        // no clock drift allowance; expiry races resolve against the signer clock
        validation.leeway = 0;
        decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.secret.expose_secret().as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .ok()
    }

    fn sign(&self, user_uid: Uuid, ttl_seconds: i64) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            iss: self.issuer.clone(),
            sub: user_uid.to_string(),
            aud: vec![self.issuer.clone()],
            iat: now,
            exp: now + ttl_seconds,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.expose_secret().as_bytes()),
        )
        .context("failed to sign auth token")
    }
}
