//! Magic-link issuance and one-time consumption.

use std::sync::Arc;

use anyhow::Result;
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{Duration, Utc};
use rand::RngCore;
use uuid::Uuid;

use super::store::{VerificationToken, VerificationTokenStore};

/// Issues short-lived verification tokens and redeems them exactly once.
///
/// Expiry is the caller's problem: `consume` hands back whatever the store
/// holds so the caller can decide whether a stale token is an error worth
/// keeping around for inspection.
pub struct MagicLinkIssuer {
    tokens: Arc<dyn VerificationTokenStore>,
    ttl_hours: i64,
    device_identifier_bytes: usize,
}

impl MagicLinkIssuer {
    #[must_use]
    pub fn new(
        tokens: Arc<dyn VerificationTokenStore>,
        ttl_hours: i64,
        device_identifier_bytes: usize,
    ) -> Self {
        Self {
            tokens,
            ttl_hours,
            device_identifier_bytes,
        }
    }

    /// Mint a fresh `(device_identifier, token)` pair for the user and persist
    /// it with the configured time to live.
    pub async fn issue(&self, user_uid: Uuid) -> Result<VerificationToken> {
        let verification_token = VerificationToken {
            device_identifier: random_device_identifier(self.device_identifier_bytes),
            token: Uuid::new_v4().to_string(),
            user_uid,
            expires_on: Utc::now() + Duration::hours(self.ttl_hours),
        };
        self.tokens.create(&verification_token).await?;
        Ok(verification_token)
    }

    /// Look up a pending token. Returns `None` when the pair is unknown or
    /// already redeemed. Does not check expiry.
    pub async fn consume(
        &self,
        device_identifier: &str,
        token: &str,
    ) -> Result<Option<VerificationToken>> {
        self.tokens.find(device_identifier, token).await
    }

    /// Delete a redeemed token. `false` means another caller won the race.
    pub async fn invalidate(&self, token: &VerificationToken) -> Result<bool> {
        self.tokens
            .delete(&token.device_identifier, &token.token)
            .await
    }
}

fn random_device_identifier(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    Base64UrlUnpadded::encode_string(&buf)
}
