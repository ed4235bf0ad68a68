//! Storage contracts consumed by the auth flows.
//!
//! The orchestrator only sees these traits; `postgres` holds the production
//! implementation and `memory` an in-process one for tests and local runs.
//! Infrastructure faults surface as `anyhow::Error`; a plain miss is always
//! `Ok(None)` or `Ok(false)`, never an error.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: Uuid,
    pub email: String,
    pub is_admin: bool,
    /// Argon2 hash of the currently valid refresh token, if any.
    pub refresh_token_hash: Option<String>,
    pub last_logged_on: Option<DateTime<Utc>>,
}

/// One-time magic-link token, keyed by `(device_identifier, token)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationToken {
    pub device_identifier: String,
    pub token: String,
    pub user_uid: Uuid,
    pub expires_on: DateTime<Utc>,
}

/// Linkage between a user and one identity assertion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderAccount {
    pub provider: String,
    pub provider_account_id: String,
    pub user_uid: Uuid,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PasswordCredential {
    pub email: String,
    pub password_hash: String,
    /// Verification token chained through the registration flow.
    pub token: String,
    pub user_uid: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<AuthUser>>;

    async fn find_by_uid(&self, uid: Uuid) -> Result<Option<AuthUser>>;

    /// Create a fresh non-admin user for an email address.
    async fn create_via_magic_link(&self, email: &str) -> Result<AuthUser>;

    /// Replace the stored refresh token hash; the previous refresh token
    /// becomes unusable. Returns the updated user, or `None` on a miss.
    async fn update_refresh_token_hash(&self, uid: Uuid, hash: &str) -> Result<Option<AuthUser>>;

    async fn update_last_logged_on(&self, uid: Uuid) -> Result<()>;

    /// Elevate the user to admin if and only if they are the sole user in
    /// the system and not yet admin. The check and the write are one atomic
    /// store operation, so concurrent callers cannot both succeed.
    async fn elevate_sole_user(&self, uid: Uuid) -> Result<bool>;

    async fn count(&self) -> Result<u64>;

    /// Case-insensitive invitation allow-list lookup.
    async fn is_email_invited(&self, email: &str) -> Result<bool>;
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert or replace the credential row for an email.
    async fn upsert(
        &self,
        email: &str,
        password_hash: &str,
        token: &str,
        user_uid: Uuid,
    ) -> Result<()>;

    async fn find_by_email(&self, email: &str) -> Result<Option<PasswordCredential>>;

    /// Returns `false` when no credential row exists for the email.
    async fn update_password(&self, email: &str, password_hash: &str) -> Result<bool>;

    /// Clear the chained verification token after it has served its purpose.
    async fn clear_token(&self, email: &str) -> Result<bool>;
}

#[async_trait]
pub trait VerificationTokenStore: Send + Sync {
    async fn create(&self, token: &VerificationToken) -> Result<()>;

    /// Exact composite-key lookup; expiry is the caller's concern.
    async fn find(&self, device_identifier: &str, token: &str)
        -> Result<Option<VerificationToken>>;

    /// Delete conditioned on existence: of two concurrent callers, at most
    /// one observes `true`.
    async fn delete(&self, device_identifier: &str, token: &str) -> Result<bool>;
}

#[async_trait]
pub trait ProviderAccountStore: Send + Sync {
    async fn find(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<ProviderAccount>>;

    /// Create the account row; a concurrent duplicate insert is a no-op,
    /// never an error.
    async fn create(&self, account: &ProviderAccount) -> Result<()>;
}
