//! The auth flows, end to end.
//!
//! `AuthService` wires the stores, the token codec, the password hasher, the
//! magic-link issuer, and the mailer together. Handlers call into it and map
//! [`AuthError`] to HTTP; nothing here knows about HTTP.

use std::sync::{Arc, OnceLock};

use anyhow::Context;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::config::{AuthConfig, Origin};
use super::error::AuthError;
use super::identity::IdentityLinker;
use super::magic::MagicLinkIssuer;
use super::mailer::Mailer;
use super::password::PasswordVerifier;
use super::store::{
    AuthUser, CredentialStore, ProviderAccountStore, UserStore, VerificationToken,
    VerificationTokenStore,
};
use super::tokens::{AuthTokenPair, TokenCodec};

/// Provider name recorded for accounts linked through a magic link.
const MAGIC_PROVIDER: &str = "magic";

/// Template sent for sign-in and invitation emails.
const INVITATION_TEMPLATE: &str = "user-invitation";

/// Response body for a sign-in request: the client keeps the device
/// identifier and pairs it with the token from the emailed link.
#[derive(Debug, Serialize)]
pub struct DeviceIdentifier {
    #[serde(rename = "deviceIdentifier")]
    pub device_identifier: String,
}

/// Outcome of the combined register-or-login flow.
#[derive(Debug)]
pub enum RegisterOrLogin {
    LoggedIn {
        tokens: AuthTokenPair,
        message: &'static str,
    },
    Registered {
        tokens: AuthTokenPair,
        message: &'static str,
    },
    NotInvited,
}

pub struct AuthService {
    config: AuthConfig,
    users: Arc<dyn UserStore>,
    credentials: Arc<dyn CredentialStore>,
    identity: IdentityLinker,
    magic: MagicLinkIssuer,
    mailer: Arc<dyn Mailer>,
    codec: TokenCodec,
    passwords: PasswordVerifier,
}

impl AuthService {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn UserStore>,
        credentials: Arc<dyn CredentialStore>,
        verification_tokens: Arc<dyn VerificationTokenStore>,
        provider_accounts: Arc<dyn ProviderAccountStore>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let codec = TokenCodec::new(
            config.app_base_url().to_string(),
            config.token_signing_secret().clone(),
            config.access_token_ttl_seconds(),
            config.refresh_token_ttl_seconds(),
        );
        let magic = MagicLinkIssuer::new(
            verification_tokens,
            config.magic_link_ttl_hours(),
            config.token_salt_complexity(),
        );
        Self {
            config,
            users,
            credentials,
            identity: IdentityLinker::new(provider_accounts),
            magic,
            mailer,
            codec,
            passwords: PasswordVerifier::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Start a passwordless sign-in: find or create the user, mint a
    /// verification token, and email the magic link.
    ///
    /// Email delivery failures are logged, never surfaced; the device
    /// identifier comes back either way so a flaky relay cannot disclose
    /// which addresses exist.
    pub async fn sign_in_magic_link(
        &self,
        email: &str,
        origin: Origin,
    ) -> Result<DeviceIdentifier, AuthError> {
        if !self.config.provider_allowed("email") {
            return Err(AuthError::AuthProviderNotSpecified);
        }
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }

        let user_count = self.users.count().await?;
        let user = self.find_or_create_user(&email).await?;
        let verification_token = self.magic.issue(user.uid).await?;
        self.deliver_magic_link(&email, origin, user_count, &verification_token)
            .await?;

        Ok(DeviceIdentifier {
            device_identifier: verification_token.device_identifier,
        })
    }

    /// Register with email and password in one step.
    ///
    /// The flow issues itself a verification token and immediately redeems
    /// it, so the caller gets a session without clicking any link. Only the
    /// first user ever, or an invited email, may register this way.
    pub async fn register_user_with_magic_link(
        &self,
        email: &str,
        password: &str,
        origin: Origin,
    ) -> Result<(AuthTokenPair, &'static str), AuthError> {
        if !self.config.provider_allowed("email") {
            return Err(AuthError::AuthProviderNotSpecified);
        }
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }

        let user_count = self.users.count().await?;
        if user_count > 0 && !self.users.is_email_invited(&email).await? {
            return Err(AuthError::Forbidden);
        }

        let user = self.find_or_create_user(&email).await?;
        let verification_token = self.magic.issue(user.uid).await?;

        let password_hash = self.passwords.hash(password)?;
        self.credentials
            .upsert(&email, &password_hash, &verification_token.token, user.uid)
            .await?;

        info!(%email, origin = ?origin, "registered email and password user");

        let tokens = self
            .finish_magic_link(
                &verification_token.device_identifier,
                &verification_token.token,
            )
            .await?;
        Ok((tokens, "success"))
    }

    /// Redeem an emailed magic link.
    pub async fn verify_magic_link_tokens(
        &self,
        device_identifier: &str,
        token: &str,
    ) -> Result<AuthTokenPair, AuthError> {
        self.finish_magic_link(device_identifier, token).await
    }

    /// Redeem a magic link gated behind the registration password. The token
    /// must be the one chained onto the credential row at registration time.
    pub async fn verify_password_tokens(
        &self,
        email: &str,
        password: &str,
        token: &str,
        device_identifier: &str,
    ) -> Result<AuthTokenPair, AuthError> {
        let email = normalize_email(email);
        let Some(credential) = self.credentials.find_by_email(&email).await? else {
            return Err(AuthError::InvalidCredentials);
        };
        if !self.passwords.compare(password, &credential.password_hash)
            || credential.token != token
        {
            return Err(AuthError::InvalidCredentials);
        }
        let tokens = self.finish_magic_link(device_identifier, token).await?;
        // The chained token is single-use, drop it once redeemed.
        self.credentials.clear_token(&email).await?;
        Ok(tokens)
    }

    /// Log in with email and password, registering on the fly when the email
    /// is unknown and either invited or the first user in the system.
    pub async fn register_or_login(
        &self,
        email: &str,
        password: &str,
        origin: Origin,
    ) -> Result<RegisterOrLogin, AuthError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }

        // Existing users always take the login path, even when they signed
        // up through a magic link and hold no credential row yet.
        if let Some(user) = self.users.find_by_email(&email).await? {
            let tokens = self.login_with_password(&email, password).await?;
            let message = if user.is_admin {
                "admin-logged-in"
            } else {
                "not-admin"
            };
            return Ok(RegisterOrLogin::LoggedIn { tokens, message });
        }

        let user_count = self.users.count().await?;
        if user_count > 0 && !self.users.is_email_invited(&email).await? {
            return Ok(RegisterOrLogin::NotInvited);
        }

        let (tokens, message) = self
            .register_user_with_magic_link(&email, password, origin)
            .await?;
        Ok(RegisterOrLogin::Registered { tokens, message })
    }

    /// Rotate the session: the presented refresh token must match the single
    /// hash stored on the user row. Success replaces that hash, so the old
    /// refresh token dies with the rotation.
    pub async fn refresh_auth_tokens(
        &self,
        presented: &str,
        user: &AuthUser,
    ) -> Result<AuthTokenPair, AuthError> {
        let Some(stored_hash) = user.refresh_token_hash.as_deref() else {
            return Err(AuthError::InvalidRefreshToken);
        };
        if !self.passwords.compare(presented, stored_hash) {
            return Err(AuthError::InvalidRefreshToken);
        }
        self.generate_auth_tokens(user.uid).await
    }

    /// Report whether the user is an admin, elevating them first when they
    /// are the only user in the system. The elevation is a single atomic
    /// store operation keyed on user cardinality.
    pub async fn verify_admin(&self, user: &AuthUser) -> Result<bool, AuthError> {
        if user.is_admin {
            return Ok(true);
        }
        let elevated = self.users.elevate_sole_user(user.uid).await?;
        if elevated {
            info!(uid = %user.uid, "sole user elevated to admin");
        }
        Ok(elevated)
    }

    /// Entry point for SSO providers after the external handshake: find or
    /// create the user by verified email, link the external identity, and
    /// open a session.
    pub async fn sso_callback(
        &self,
        provider: &str,
        provider_account_id: &str,
        email: &str,
    ) -> Result<AuthTokenPair, AuthError> {
        if !self.config.provider_allowed(provider) {
            return Err(AuthError::AuthProviderNotSpecified);
        }
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }

        let user = self.find_or_create_user(&email).await?;
        self.identity
            .ensure_linked(&user, provider, provider_account_id)
            .await?;
        let tokens = self.generate_auth_tokens(user.uid).await?;
        self.users.update_last_logged_on(user.uid).await?;
        info!(%email, %provider, "sso login");
        Ok(tokens)
    }

    /// Change the password behind an existing credential. The old password
    /// must verify against the stored hash.
    pub async fn change_password(
        &self,
        email: &str,
        new_password: &str,
        old_password: &str,
    ) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let Some(credential) = self.credentials.find_by_email(&email).await? else {
            return Err(AuthError::InvalidCredentials);
        };
        if !self
            .passwords
            .compare(old_password, &credential.password_hash)
        {
            return Err(AuthError::InvalidCredentials);
        }
        let password_hash = self.passwords.hash(new_password)?;
        if !self.credentials.update_password(&email, &password_hash).await? {
            return Err(AuthError::InvalidCredentials);
        }
        info!(%email, "password changed");
        Ok(())
    }

    /// Resolve the user behind a signed token, or `None` when the token is
    /// invalid, expired, or points at a deleted user.
    pub async fn user_from_token(&self, token: &str) -> Result<Option<AuthUser>, AuthError> {
        let Some(claims) = self.codec.verify(token) else {
            return Ok(None);
        };
        let Ok(uid) = Uuid::parse_str(&claims.sub) else {
            return Ok(None);
        };
        Ok(self.users.find_by_uid(uid).await?)
    }

    async fn find_or_create_user(&self, email: &str) -> Result<AuthUser, AuthError> {
        if let Some(user) = self.users.find_by_email(email).await? {
            return Ok(user);
        }
        let user = self.users.create_via_magic_link(email).await?;
        info!(%email, uid = %user.uid, "created user");
        Ok(user)
    }

    async fn deliver_magic_link(
        &self,
        email: &str,
        origin: Origin,
        user_count: u64,
        verification_token: &VerificationToken,
    ) -> Result<(), AuthError> {
        let magic_link = format!(
            "{}/enter?token={}",
            self.config.base_url_for(origin),
            verification_token.token
        );
        let variables = json!({
            "inviteeEmail": email,
            "magicLink": magic_link,
        });
        match self
            .mailer
            .send_email(email, INVITATION_TEMPLATE, &variables)
            .await
        {
            Ok(()) => {
                if user_count == 0 {
                    info!(%email, "magic link sent to first user");
                } else {
                    info!(%email, "magic link sent");
                }
            }
            // Delivery failures must not disclose whether the email exists.
            Err(err) => warn!(%email, error = %err, "magic link delivery failed"),
        }
        Ok(())
    }

    /// Shared tail of every magic-link flow: redeem the token exactly once,
    /// link the identity, and open a session.
    ///
    /// Expiry is checked after the identity link. An expired token is
    /// rejected but deliberately left in the store; it is only deleted when
    /// the whole redemption succeeds.
    async fn finish_magic_link(
        &self,
        device_identifier: &str,
        token: &str,
    ) -> Result<AuthTokenPair, AuthError> {
        let Some(verification_token) = self.magic.consume(device_identifier, token).await? else {
            return Err(AuthError::InvalidMagicLinkData);
        };
        let user = self
            .users
            .find_by_uid(verification_token.user_uid)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        self.identity
            .ensure_linked(&user, MAGIC_PROVIDER, &user.email)
            .await?;

        if chrono::Utc::now() > verification_token.expires_on {
            return Err(AuthError::MagicLinkExpired);
        }

        let tokens = self.generate_auth_tokens(user.uid).await?;
        if !self.magic.invalidate(&verification_token).await? {
            return Err(AuthError::VerificationTokenNotFound);
        }
        self.users.update_last_logged_on(user.uid).await?;
        Ok(tokens)
    }

    async fn login_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthTokenPair, AuthError> {
        let Some(credential) = self.credentials.find_by_email(email).await? else {
            return Err(AuthError::InvalidCredentials);
        };
        if !self.passwords.compare(password, &credential.password_hash) {
            error!(%email, "password login failed");
            return Err(AuthError::InvalidCredentials);
        }
        let tokens = self.generate_auth_tokens(credential.user_uid).await?;
        self.users.update_last_logged_on(credential.user_uid).await?;
        Ok(tokens)
    }

    /// Sign a fresh access/refresh pair and persist the argon2 hash of the
    /// refresh token on the user row, displacing the previous session.
    async fn generate_auth_tokens(&self, uid: Uuid) -> Result<AuthTokenPair, AuthError> {
        let access_token = self.codec.issue_access_token(uid)?;
        let refresh_token = self.codec.issue_refresh_token(uid)?;
        let refresh_token_hash = self
            .passwords
            .hash(&refresh_token)
            .context("failed to hash refresh token")?;
        self.users
            .update_refresh_token_hash(uid, &refresh_token_hash)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        Ok(AuthTokenPair {
            access_token,
            refresh_token,
        })
    }
}

fn email_regex() -> Option<&'static Regex> {
    static EMAIL_REGEX: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL_REGEX
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok())
        .as_ref()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    email_regex().is_some_and(|regex| regex.is_match(email))
}

#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{normalize_email, valid_email};

    #[test]
    fn email_validation() {
        assert!(valid_email("a@x.com"));
        assert!(valid_email("first.last@sub.example.org"));
        assert!(!valid_email("a@x"));
        assert!(!valid_email("no-at-sign.com"));
        assert!(!valid_email("spaces in@x.com"));
        assert!(!valid_email("a@@x.com"));
    }

    #[test]
    fn email_normalization() {
        assert_eq!(normalize_email("  A@X.Com "), "a@x.com");
    }
}
