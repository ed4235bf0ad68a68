//! Postgres implementations of the store contracts.
//!
//! Each query carries a `db.query` span. Exactly-once semantics lean on the
//! database: token deletes are conditioned on the row still existing, the
//! admin bootstrap is a single conditional UPDATE keyed on user cardinality,
//! and provider-account inserts tolerate concurrent duplicates via
//! `ON CONFLICT DO NOTHING`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::{
    AuthUser, CredentialStore, PasswordCredential, ProviderAccount, ProviderAccountStore,
    UserStore, VerificationToken, VerificationTokenStore,
};

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn row_to_user(row: &sqlx::postgres::PgRow) -> AuthUser {
    AuthUser {
        uid: row.get("uid"),
        email: row.get("email"),
        is_admin: row.get("is_admin"),
        refresh_token_hash: row.get("refresh_token_hash"),
        last_logged_on: row.get("last_logged_on"),
    }
}

fn row_to_verification_token(row: &sqlx::postgres::PgRow) -> VerificationToken {
    VerificationToken {
        device_identifier: row.get("device_identifier"),
        token: row.get("token"),
        user_uid: row.get("user_uid"),
        expires_on: row.get("expires_on"),
    }
}

fn query_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

#[async_trait]
impl UserStore for PostgresStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<AuthUser>> {
        let query = r"
            SELECT uid, email, is_admin, refresh_token_hash, last_logged_on
            FROM users
            WHERE email = $1
        ";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup user by email")?;
        Ok(row.as_ref().map(row_to_user))
    }

    async fn find_by_uid(&self, uid: Uuid) -> Result<Option<AuthUser>> {
        let query = r"
            SELECT uid, email, is_admin, refresh_token_hash, last_logged_on
            FROM users
            WHERE uid = $1
        ";
        let row = sqlx::query(query)
            .bind(uid)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup user by uid")?;
        Ok(row.as_ref().map(row_to_user))
    }

    async fn create_via_magic_link(&self, email: &str) -> Result<AuthUser> {
        let query = r"
            INSERT INTO users (email)
            VALUES ($1)
            RETURNING uid, email, is_admin, refresh_token_hash, last_logged_on
        ";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_one(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to create user")?;
        Ok(row_to_user(&row))
    }

    async fn update_refresh_token_hash(&self, uid: Uuid, hash: &str) -> Result<Option<AuthUser>> {
        let query = r"
            UPDATE users
            SET refresh_token_hash = $2
            WHERE uid = $1
            RETURNING uid, email, is_admin, refresh_token_hash, last_logged_on
        ";
        let row = sqlx::query(query)
            .bind(uid)
            .bind(hash)
            .fetch_optional(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to rotate refresh token hash")?;
        Ok(row.as_ref().map(row_to_user))
    }

    async fn update_last_logged_on(&self, uid: Uuid) -> Result<()> {
        let query = "UPDATE users SET last_logged_on = NOW() WHERE uid = $1";
        sqlx::query(query)
            .bind(uid)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update last logged on")?;
        Ok(())
    }

    async fn elevate_sole_user(&self, uid: Uuid) -> Result<bool> {
        // Check and write are one statement; concurrent callers race on the
        // row lock, not on a stale count read.
        let query = r"
            UPDATE users
            SET is_admin = TRUE
            WHERE uid = $1
              AND is_admin = FALSE
              AND (SELECT COUNT(*) FROM users) = 1
        ";
        let result = sqlx::query(query)
            .bind(uid)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to elevate user to admin")?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<u64> {
        let query = "SELECT COUNT(*) AS count FROM users";
        let row = sqlx::query(query)
            .fetch_one(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to count users")?;
        let count: i64 = row.get("count");
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn is_email_invited(&self, email: &str) -> Result<bool> {
        let query = r"
            SELECT 1 AS present
            FROM invited_users
            WHERE LOWER(invitee_email) = LOWER($1)
            LIMIT 1
        ";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to check invitation")?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl CredentialStore for PostgresStore {
    async fn upsert(
        &self,
        email: &str,
        password_hash: &str,
        token: &str,
        user_uid: Uuid,
    ) -> Result<()> {
        let query = r"
            INSERT INTO password_credentials (email, password_hash, token, user_uid)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
            SET password_hash = EXCLUDED.password_hash,
                token = EXCLUDED.token,
                updated_at = NOW()
        ";
        sqlx::query(query)
            .bind(email)
            .bind(password_hash)
            .bind(token)
            .bind(user_uid)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to upsert password credential")?;
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<PasswordCredential>> {
        let query = r"
            SELECT email, password_hash, token, user_uid, created_at, updated_at
            FROM password_credentials
            WHERE email = $1
        ";
        let row = sqlx::query(query)
            .bind(email)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup password credential")?;
        Ok(row.map(|row| PasswordCredential {
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            token: row.get("token"),
            user_uid: row.get("user_uid"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }

    async fn update_password(&self, email: &str, password_hash: &str) -> Result<bool> {
        let query = r"
            UPDATE password_credentials
            SET password_hash = $2, updated_at = NOW()
            WHERE email = $1
        ";
        let result = sqlx::query(query)
            .bind(email)
            .bind(password_hash)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to update password")?;
        Ok(result.rows_affected() > 0)
    }

    async fn clear_token(&self, email: &str) -> Result<bool> {
        let query = r"
            UPDATE password_credentials
            SET token = '', updated_at = NOW()
            WHERE email = $1
        ";
        let result = sqlx::query(query)
            .bind(email)
            .execute(&self.pool)
            .instrument(query_span("UPDATE", query))
            .await
            .context("failed to clear credential token")?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl VerificationTokenStore for PostgresStore {
    async fn create(&self, token: &VerificationToken) -> Result<()> {
        let query = r"
            INSERT INTO verification_tokens (device_identifier, token, user_uid, expires_on)
            VALUES ($1, $2, $3, $4)
        ";
        sqlx::query(query)
            .bind(&token.device_identifier)
            .bind(&token.token)
            .bind(token.user_uid)
            .bind(token.expires_on)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to create verification token")?;
        Ok(())
    }

    async fn find(
        &self,
        device_identifier: &str,
        token: &str,
    ) -> Result<Option<VerificationToken>> {
        let query = r"
            SELECT device_identifier, token, user_uid, expires_on
            FROM verification_tokens
            WHERE device_identifier = $1 AND token = $2
        ";
        let row = sqlx::query(query)
            .bind(device_identifier)
            .bind(token)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup verification token")?;
        Ok(row.as_ref().map(row_to_verification_token))
    }

    async fn delete(&self, device_identifier: &str, token: &str) -> Result<bool> {
        // rows_affected decides the winner when two consumers race.
        let query = r"
            DELETE FROM verification_tokens
            WHERE device_identifier = $1 AND token = $2
        ";
        let result = sqlx::query(query)
            .bind(device_identifier)
            .bind(token)
            .execute(&self.pool)
            .instrument(query_span("DELETE", query))
            .await
            .context("failed to delete verification token")?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl ProviderAccountStore for PostgresStore {
    async fn find(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<ProviderAccount>> {
        let query = r"
            SELECT provider, provider_account_id, user_uid
            FROM provider_accounts
            WHERE provider = $1 AND provider_account_id = $2
        ";
        let row = sqlx::query(query)
            .bind(provider)
            .bind(provider_account_id)
            .fetch_optional(&self.pool)
            .instrument(query_span("SELECT", query))
            .await
            .context("failed to lookup provider account")?;
        Ok(row.map(|row| ProviderAccount {
            provider: row.get("provider"),
            provider_account_id: row.get("provider_account_id"),
            user_uid: row.get("user_uid"),
        }))
    }

    async fn create(&self, account: &ProviderAccount) -> Result<()> {
        let query = r"
            INSERT INTO provider_accounts (provider, provider_account_id, user_uid)
            VALUES ($1, $2, $3)
            ON CONFLICT (provider, provider_account_id) DO NOTHING
        ";
        sqlx::query(query)
            .bind(&account.provider)
            .bind(&account.provider_account_id)
            .bind(account.user_uid)
            .execute(&self.pool)
            .instrument(query_span("INSERT", query))
            .await
            .context("failed to create provider account")?;
        Ok(())
    }
}
