use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use secrecy::SecretString;
use tokio::sync::Mutex;

use super::config::{AuthConfig, Origin};
use super::error::AuthError;
use super::mailer::Mailer;
use super::orchestrator::{AuthService, RegisterOrLogin};
use super::password::PasswordVerifier;
use super::store::{
    CredentialStore, MemoryStore, ProviderAccountStore, UserStore, VerificationToken,
    VerificationTokenStore,
};

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(String, String, serde_json::Value)>>,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_email(
        &self,
        address: &str,
        template: &str,
        variables: &serde_json::Value,
    ) -> Result<()> {
        self.sent
            .lock()
            .await
            .push((address.to_string(), template.to_string(), variables.clone()));
        Ok(())
    }
}

struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send_email(&self, _: &str, _: &str, _: &serde_json::Value) -> Result<()> {
        Err(anyhow!("smtp relay down"))
    }
}

fn test_config() -> AuthConfig {
    AuthConfig::new(
        "http://localhost:3000".to_string(),
        SecretString::from("test-signing-secret".to_string()),
    )
}

fn service_with(
    store: &Arc<MemoryStore>,
    mailer: Arc<dyn Mailer>,
    config: AuthConfig,
) -> AuthService {
    AuthService::new(
        config,
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        mailer,
    )
}

fn service(store: &Arc<MemoryStore>) -> AuthService {
    service_with(store, Arc::new(RecordingMailer::default()), test_config())
}

#[tokio::test]
async fn sign_in_rejects_invalid_email() {
    let store = Arc::new(MemoryStore::new());
    let service = service(&store);
    let err = service
        .sign_in_magic_link("not-an-email", Origin::App)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidEmail));
}

#[tokio::test]
async fn sign_in_rejects_disabled_email_provider() {
    let store = Arc::new(MemoryStore::new());
    let config = test_config().with_allowed_providers(vec!["google".to_string()]);
    let service = service_with(&store, Arc::new(RecordingMailer::default()), config);
    let err = service
        .sign_in_magic_link("a@x.com", Origin::App)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AuthProviderNotSpecified));
}

#[tokio::test]
async fn sign_in_emails_magic_link_and_returns_device_identifier() {
    let store = Arc::new(MemoryStore::new());
    let mailer = Arc::new(RecordingMailer::default());
    let service = service_with(&store, mailer.clone(), test_config());

    let device = service
        .sign_in_magic_link("A@X.Com", Origin::App)
        .await
        .unwrap();
    assert!(!device.device_identifier.is_empty());

    // email is normalized before anything touches the stores
    let user = UserStore::find_by_email(store.as_ref(), "a@x.com")
        .await
        .unwrap()
        .unwrap();
    assert!(!user.is_admin);

    let sent = mailer.sent.lock().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "a@x.com");
    assert_eq!(sent[0].1, "user-invitation");
    let link = sent[0].2["magicLink"].as_str().unwrap();
    assert!(link.starts_with("http://localhost:3000/enter?token="));
}

#[tokio::test]
async fn sign_in_survives_mailer_failure() {
    let store = Arc::new(MemoryStore::new());
    let service = service_with(&store, Arc::new(FailingMailer), test_config());
    let device = service
        .sign_in_magic_link("a@x.com", Origin::App)
        .await
        .unwrap();
    assert!(!device.device_identifier.is_empty());
}

#[tokio::test]
async fn magic_link_redeems_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let service = service(&store);
    let user = store.create_via_magic_link("a@x.com").await.unwrap();
    store
        .put_verification_token(VerificationToken {
            device_identifier: "dev-1".to_string(),
            token: "tok-1".to_string(),
            user_uid: user.uid,
            expires_on: Utc::now() + Duration::hours(1),
        })
        .await;

    let tokens = service
        .verify_magic_link_tokens("dev-1", "tok-1")
        .await
        .unwrap();
    assert_ne!(tokens.access_token, tokens.refresh_token);

    let err = service
        .verify_magic_link_tokens("dev-1", "tok-1")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidMagicLinkData));
}

#[tokio::test]
async fn expired_magic_link_is_rejected_but_kept() {
    let store = Arc::new(MemoryStore::new());
    let service = service(&store);
    let user = store.create_via_magic_link("a@x.com").await.unwrap();
    store
        .put_verification_token(VerificationToken {
            device_identifier: "dev-1".to_string(),
            token: "tok-1".to_string(),
            user_uid: user.uid,
            expires_on: Utc::now() - Duration::minutes(1),
        })
        .await;

    let err = service
        .verify_magic_link_tokens("dev-1", "tok-1")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::MagicLinkExpired));

    // the stale row stays for inspection; only success deletes it
    assert!(VerificationTokenStore::find(store.as_ref(), "dev-1", "tok-1")
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn first_registration_is_open_then_invitation_only() {
    let store = Arc::new(MemoryStore::new());
    let service = service(&store);

    let (tokens, message) = service
        .register_user_with_magic_link("first@x.com", "Passw0rd", Origin::App)
        .await
        .unwrap();
    assert_eq!(message, "success");
    let user = service
        .user_from_token(&tokens.access_token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.email, "first@x.com");

    let err = service
        .register_user_with_magic_link("second@x.com", "Passw0rd", Origin::App)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::Forbidden));

    store.invite("second@x.com").await;
    let (_, message) = service
        .register_user_with_magic_link("second@x.com", "Passw0rd", Origin::App)
        .await
        .unwrap();
    assert_eq!(message, "success");
}

#[tokio::test]
async fn register_or_login_covers_all_outcomes() {
    let store = Arc::new(MemoryStore::new());
    let service = service(&store);

    let outcome = service
        .register_or_login("a@x.com", "Passw0rd", Origin::App)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        RegisterOrLogin::Registered {
            message: "success",
            ..
        }
    ));

    let err = service
        .register_or_login("a@x.com", "wrong-password", Origin::App)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));

    let outcome = service
        .register_or_login("a@x.com", "Passw0rd", Origin::App)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        RegisterOrLogin::LoggedIn {
            message: "not-admin",
            ..
        }
    ));

    let outcome = service
        .register_or_login("stranger@x.com", "Passw0rd", Origin::App)
        .await
        .unwrap();
    assert!(matches!(outcome, RegisterOrLogin::NotInvited));

    // sole-user elevation flips the login message
    let user = UserStore::find_by_email(store.as_ref(), "a@x.com")
        .await
        .unwrap()
        .unwrap();
    assert!(service.verify_admin(&user).await.unwrap());
    let outcome = service
        .register_or_login("a@x.com", "Passw0rd", Origin::App)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        RegisterOrLogin::LoggedIn {
            message: "admin-logged-in",
            ..
        }
    ));
}

#[tokio::test]
async fn register_or_login_delegates_existing_users_to_password_login() {
    let store = Arc::new(MemoryStore::new());
    let service = service(&store);

    // magic-link-only users have a user row but no credential row
    store.create_via_magic_link("known@x.com").await.unwrap();
    store.create_via_magic_link("invited@x.com").await.unwrap();
    store.invite("invited@x.com").await;

    let err = service
        .register_or_login("known@x.com", "Passw0rd", Origin::App)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));

    // an invitation must not re-register an existing user either
    let err = service
        .register_or_login("invited@x.com", "Passw0rd", Origin::App)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
    assert!(CredentialStore::find_by_email(store.as_ref(), "invited@x.com")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn refresh_rotation_invalidates_previous_token() {
    let store = Arc::new(MemoryStore::new());
    let service = service(&store);

    let (first_pair, _) = service
        .register_user_with_magic_link("a@x.com", "Passw0rd", Origin::App)
        .await
        .unwrap();
    let user = service
        .user_from_token(&first_pair.access_token)
        .await
        .unwrap()
        .unwrap();

    let second_pair = service
        .refresh_auth_tokens(&first_pair.refresh_token, &user)
        .await
        .unwrap();

    let user = store.find_by_uid(user.uid).await.unwrap().unwrap();
    let err = service
        .refresh_auth_tokens(&first_pair.refresh_token, &user)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidRefreshToken));

    service
        .refresh_auth_tokens(&second_pair.refresh_token, &user)
        .await
        .unwrap();
}

#[tokio::test]
async fn refresh_without_stored_hash_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let service = service(&store);
    let user = store.create_via_magic_link("a@x.com").await.unwrap();
    let err = service
        .refresh_auth_tokens("anything", &user)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidRefreshToken));
}

#[tokio::test]
async fn verify_admin_only_elevates_the_sole_user() {
    let sole_store = Arc::new(MemoryStore::new());
    let sole_service = service(&sole_store);

    let alone = sole_store.create_via_magic_link("a@x.com").await.unwrap();
    assert!(sole_service.verify_admin(&alone).await.unwrap());
    let alone = sole_store.find_by_uid(alone.uid).await.unwrap().unwrap();
    assert!(alone.is_admin);
    // admins stay admins on repeat checks
    assert!(sole_service.verify_admin(&alone).await.unwrap());

    let crowd_store = Arc::new(MemoryStore::new());
    let crowd_service = service(&crowd_store);
    let first = crowd_store.create_via_magic_link("a@x.com").await.unwrap();
    let second = crowd_store.create_via_magic_link("b@x.com").await.unwrap();
    assert!(!crowd_service.verify_admin(&first).await.unwrap());
    assert!(!crowd_service.verify_admin(&second).await.unwrap());
    let first = crowd_store.find_by_uid(first.uid).await.unwrap().unwrap();
    assert!(!first.is_admin);
}

#[tokio::test]
async fn verify_password_tokens_checks_password_and_chained_token() {
    let store = Arc::new(MemoryStore::new());
    let service = service(&store);
    let user = store.create_via_magic_link("a@x.com").await.unwrap();
    let hash = PasswordVerifier::new().hash("Passw0rd").unwrap();
    store
        .upsert("a@x.com", &hash, "tok-1", user.uid)
        .await
        .unwrap();
    store
        .put_verification_token(VerificationToken {
            device_identifier: "dev-1".to_string(),
            token: "tok-1".to_string(),
            user_uid: user.uid,
            expires_on: Utc::now() + Duration::hours(1),
        })
        .await;

    let err = service
        .verify_password_tokens("a@x.com", "wrong", "tok-1", "dev-1")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));

    let err = service
        .verify_password_tokens("a@x.com", "Passw0rd", "tok-other", "dev-1")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));

    service
        .verify_password_tokens("a@x.com", "Passw0rd", "tok-1", "dev-1")
        .await
        .unwrap();

    // redemption consumes the chained token, so a replay is rejected even
    // with a fresh verification token for the same pair
    let credential = CredentialStore::find_by_email(store.as_ref(), "a@x.com")
        .await
        .unwrap()
        .unwrap();
    assert!(credential.token.is_empty());
    store
        .put_verification_token(VerificationToken {
            device_identifier: "dev-1".to_string(),
            token: "tok-1".to_string(),
            user_uid: user.uid,
            expires_on: Utc::now() + Duration::hours(1),
        })
        .await;
    let err = service
        .verify_password_tokens("a@x.com", "Passw0rd", "tok-1", "dev-1")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
}

#[tokio::test]
async fn sso_callback_links_identity_and_merges_by_email() {
    let store = Arc::new(MemoryStore::new());
    let service = service(&store);

    let (tokens, _) = service
        .register_user_with_magic_link("a@x.com", "Passw0rd", Origin::App)
        .await
        .unwrap();
    let registered = service
        .user_from_token(&tokens.access_token)
        .await
        .unwrap()
        .unwrap();

    let tokens = service
        .sso_callback("google", "google-uid-1", "a@x.com")
        .await
        .unwrap();
    let via_sso = service
        .user_from_token(&tokens.access_token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(via_sso.uid, registered.uid);

    let linked = ProviderAccountStore::find(store.as_ref(), "google", "google-uid-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(linked.user_uid, registered.uid);

    // repeating the callback is safe
    service
        .sso_callback("google", "google-uid-1", "a@x.com")
        .await
        .unwrap();

    let err = service
        .sso_callback("gitlab", "gitlab-uid-1", "a@x.com")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AuthProviderNotSpecified));
}

#[tokio::test]
async fn change_password_requires_the_old_one() {
    let store = Arc::new(MemoryStore::new());
    let service = service(&store);
    service
        .register_user_with_magic_link("a@x.com", "Passw0rd", Origin::App)
        .await
        .unwrap();

    let err = service
        .change_password("a@x.com", "NewPass1", "wrong-old")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));

    service
        .change_password("a@x.com", "NewPass1", "Passw0rd")
        .await
        .unwrap();

    let err = service
        .register_or_login("a@x.com", "Passw0rd", Origin::App)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredentials));
    let outcome = service
        .register_or_login("a@x.com", "NewPass1", Origin::App)
        .await
        .unwrap();
    assert!(matches!(outcome, RegisterOrLogin::LoggedIn { .. }));
}

#[tokio::test]
async fn user_from_token_rejects_garbage() {
    let store = Arc::new(MemoryStore::new());
    let service = service(&store);
    assert!(service.user_from_token("garbage").await.unwrap().is_none());
}
