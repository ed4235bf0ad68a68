//! Links users to the external identities they sign in with.

use std::sync::Arc;

use anyhow::Result;

use super::store::{AuthUser, ProviderAccount, ProviderAccountStore};

/// Maintains the `(provider, external id)` mapping for a user.
///
/// Linking is idempotent. Repeating a link for a pair that already exists is
/// a no-op, which keeps sign-in flows safe to retry.
pub struct IdentityLinker {
    accounts: Arc<dyn ProviderAccountStore>,
}

impl IdentityLinker {
    #[must_use]
    pub fn new(accounts: Arc<dyn ProviderAccountStore>) -> Self {
        Self { accounts }
    }

    pub async fn ensure_linked(
        &self,
        user: &AuthUser,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<()> {
        if self
            .accounts
            .find(provider, provider_account_id)
            .await?
            .is_some()
        {
            return Ok(());
        }
        self.accounts
            .create(&ProviderAccount {
                provider: provider.to_string(),
                provider_account_id: provider_account_id.to_string(),
                user_uid: user.uid,
            })
            .await
    }
}
