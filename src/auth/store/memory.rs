//! In-memory store implementations.
//!
//! One `MemoryStore` backs all four store contracts behind a single lock,
//! which is what makes `elevate_sole_user` and the conditional token delete
//! atomic here the way the SQL statements make them atomic in Postgres.
//! Used by the test suite and by local runs without a database.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AuthUser, CredentialStore, PasswordCredential, ProviderAccount, ProviderAccountStore,
    UserStore, VerificationToken, VerificationTokenStore,
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, AuthUser>,
    invited: HashSet<String>,
    credentials: HashMap<String, PasswordCredential>,
    tokens: HashMap<(String, String), VerificationToken>,
    accounts: HashMap<(String, String), ProviderAccount>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an email to the invitation allow-list.
    pub async fn invite(&self, email: &str) {
        let mut inner = self.inner.lock().await;
        inner.invited.insert(email.to_lowercase());
    }

    /// Direct token insertion, for exercising expiry edge cases.
    pub async fn put_verification_token(&self, token: VerificationToken) {
        let mut inner = self.inner.lock().await;
        inner.tokens.insert(
            (token.device_identifier.clone(), token.token.clone()),
            token,
        );
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<AuthUser>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .values()
            .find(|user| user.email == email)
            .cloned())
    }

    async fn find_by_uid(&self, uid: Uuid) -> Result<Option<AuthUser>> {
        let inner = self.inner.lock().await;
        Ok(inner.users.get(&uid).cloned())
    }

    async fn create_via_magic_link(&self, email: &str) -> Result<AuthUser> {
        let user = AuthUser {
            uid: Uuid::new_v4(),
            email: email.to_string(),
            is_admin: false,
            refresh_token_hash: None,
            last_logged_on: None,
        };
        let mut inner = self.inner.lock().await;
        inner.users.insert(user.uid, user.clone());
        Ok(user)
    }

    async fn update_refresh_token_hash(&self, uid: Uuid, hash: &str) -> Result<Option<AuthUser>> {
        let mut inner = self.inner.lock().await;
        Ok(inner.users.get_mut(&uid).map(|user| {
            user.refresh_token_hash = Some(hash.to_string());
            user.clone()
        }))
    }

    async fn update_last_logged_on(&self, uid: Uuid) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(user) = inner.users.get_mut(&uid) {
            user.last_logged_on = Some(Utc::now());
        }
        Ok(())
    }

    async fn elevate_sole_user(&self, uid: Uuid) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        if inner.users.len() != 1 {
            return Ok(false);
        }
        Ok(inner
            .users
            .get_mut(&uid)
            .filter(|user| !user.is_admin)
            .map(|user| {
                user.is_admin = true;
            })
            .is_some())
    }

    async fn count(&self) -> Result<u64> {
        let inner = self.inner.lock().await;
        Ok(inner.users.len() as u64)
    }

    async fn is_email_invited(&self, email: &str) -> Result<bool> {
        let inner = self.inner.lock().await;
        Ok(inner.invited.contains(&email.to_lowercase()))
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn upsert(
        &self,
        email: &str,
        password_hash: &str,
        token: &str,
        user_uid: Uuid,
    ) -> Result<()> {
        let now = Utc::now();
        let mut inner = self.inner.lock().await;
        inner
            .credentials
            .entry(email.to_string())
            .and_modify(|credential| {
                credential.password_hash = password_hash.to_string();
                credential.token = token.to_string();
                credential.updated_at = now;
            })
            .or_insert_with(|| PasswordCredential {
                email: email.to_string(),
                password_hash: password_hash.to_string(),
                token: token.to_string(),
                user_uid,
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<PasswordCredential>> {
        let inner = self.inner.lock().await;
        Ok(inner.credentials.get(email).cloned())
    }

    async fn update_password(&self, email: &str, password_hash: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .credentials
            .get_mut(email)
            .map(|credential| {
                credential.password_hash = password_hash.to_string();
                credential.updated_at = Utc::now();
            })
            .is_some())
    }

    async fn clear_token(&self, email: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .credentials
            .get_mut(email)
            .map(|credential| {
                credential.token = String::new();
                credential.updated_at = Utc::now();
            })
            .is_some())
    }
}

#[async_trait]
impl VerificationTokenStore for MemoryStore {
    async fn create(&self, token: &VerificationToken) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.tokens.insert(
            (token.device_identifier.clone(), token.token.clone()),
            token.clone(),
        );
        Ok(())
    }

    async fn find(
        &self,
        device_identifier: &str,
        token: &str,
    ) -> Result<Option<VerificationToken>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .tokens
            .get(&(device_identifier.to_string(), token.to_string()))
            .cloned())
    }

    async fn delete(&self, device_identifier: &str, token: &str) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        Ok(inner
            .tokens
            .remove(&(device_identifier.to_string(), token.to_string()))
            .is_some())
    }
}

#[async_trait]
impl ProviderAccountStore for MemoryStore {
    async fn find(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<ProviderAccount>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .accounts
            .get(&(provider.to_string(), provider_account_id.to_string()))
            .cloned())
    }

    async fn create(&self, account: &ProviderAccount) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner
            .accounts
            .entry((
                account.provider.clone(),
                account.provider_account_id.clone(),
            ))
            .or_insert_with(|| account.clone());
        Ok(())
    }
}
