//! Auth configuration value object.
//!
//! All policy knobs for the auth flows live here: base URLs per origin,
//! magic-link TTL, token TTLs, allowed providers, and the signing secret.
//! The orchestrator receives one `AuthConfig` at construction instead of
//! reading configuration mid-flow.

use secrecy::SecretString;

const DEFAULT_MAGIC_LINK_TTL_HOURS: i64 = 3;
const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_TOKEN_SALT_COMPLEXITY: usize = 16;
const DEFAULT_ALLOWED_PROVIDERS: [&str; 4] = ["email", "google", "github", "microsoft"];

/// Where a sign-in request originated; decides which base URL the magic
/// link points at. Unknown origins fall back to the app URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    App,
    Admin,
}

impl Origin {
    #[must_use]
    pub fn parse(origin: &str) -> Self {
        match origin {
            "admin" => Self::Admin,
            _ => Self::App,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    app_base_url: String,
    admin_base_url: String,
    allowed_providers: Vec<String>,
    magic_link_ttl_hours: i64,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
    token_salt_complexity: usize,
    token_signing_secret: SecretString,
}

impl AuthConfig {
    #[must_use]
    pub fn new(app_base_url: String, token_signing_secret: SecretString) -> Self {
        let admin_base_url = app_base_url.clone();
        Self {
            app_base_url,
            admin_base_url,
            allowed_providers: DEFAULT_ALLOWED_PROVIDERS
                .iter()
                .map(ToString::to_string)
                .collect(),
            magic_link_ttl_hours: DEFAULT_MAGIC_LINK_TTL_HOURS,
            access_token_ttl_seconds: DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
            refresh_token_ttl_seconds: DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
            token_salt_complexity: DEFAULT_TOKEN_SALT_COMPLEXITY,
            token_signing_secret,
        }
    }

    #[must_use]
    pub fn with_admin_base_url(mut self, url: String) -> Self {
        self.admin_base_url = url;
        self
    }

    #[must_use]
    pub fn with_allowed_providers(mut self, providers: Vec<String>) -> Self {
        self.allowed_providers = providers;
        self
    }

    #[must_use]
    pub fn with_magic_link_ttl_hours(mut self, hours: i64) -> Self {
        self.magic_link_ttl_hours = hours;
        self
    }

    #[must_use]
    pub fn with_access_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_token_salt_complexity(mut self, bytes: usize) -> Self {
        self.token_salt_complexity = bytes.max(1);
        self
    }

    #[must_use]
    pub fn app_base_url(&self) -> &str {
        &self.app_base_url
    }

    /// Base URL the magic link should point at for a given request origin.
    #[must_use]
    pub fn base_url_for(&self, origin: Origin) -> &str {
        match origin {
            Origin::Admin => &self.admin_base_url,
            Origin::App => &self.app_base_url,
        }
    }

    #[must_use]
    pub fn provider_allowed(&self, provider: &str) -> bool {
        self.allowed_providers
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(provider))
    }

    #[must_use]
    pub fn allowed_providers(&self) -> &[String] {
        &self.allowed_providers
    }

    #[must_use]
    pub fn magic_link_ttl_hours(&self) -> i64 {
        self.magic_link_ttl_hours
    }

    #[must_use]
    pub fn access_token_ttl_seconds(&self) -> i64 {
        self.access_token_ttl_seconds
    }

    #[must_use]
    pub fn refresh_token_ttl_seconds(&self) -> i64 {
        self.refresh_token_ttl_seconds
    }

    #[must_use]
    pub fn token_salt_complexity(&self) -> usize {
        self.token_salt_complexity
    }

    #[must_use]
    pub fn token_signing_secret(&self) -> &SecretString {
        &self.token_signing_secret
    }

    /// Auth cookies are only marked `Secure` when the app is served over HTTPS.
    #[must_use]
    pub fn cookie_secure(&self) -> bool {
        self.app_base_url.starts_with("https://")
    }
}

#[cfg(test)]
mod tests {
    use super::{AuthConfig, Origin};
    use secrecy::SecretString;

    fn config() -> AuthConfig {
        AuthConfig::new(
            "https://app.sesamo.dev".to_string(),
            SecretString::from("secret".to_string()),
        )
    }

    #[test]
    fn defaults_and_overrides() {
        let config = config();
        assert_eq!(config.magic_link_ttl_hours(), 3);
        assert_eq!(config.access_token_ttl_seconds(), 24 * 60 * 60);
        assert_eq!(config.refresh_token_ttl_seconds(), 7 * 24 * 60 * 60);
        assert_eq!(config.token_salt_complexity(), 16);
        assert!(config.cookie_secure());

        let config = config
            .with_magic_link_ttl_hours(1)
            .with_access_token_ttl_seconds(60)
            .with_refresh_token_ttl_seconds(120)
            .with_token_salt_complexity(0);
        assert_eq!(config.magic_link_ttl_hours(), 1);
        assert_eq!(config.access_token_ttl_seconds(), 60);
        assert_eq!(config.refresh_token_ttl_seconds(), 120);
        // salt complexity is clamped to at least one byte
        assert_eq!(config.token_salt_complexity(), 1);
    }

    #[test]
    fn admin_url_falls_back_to_app_url() {
        let config = config();
        assert_eq!(config.base_url_for(Origin::Admin), "https://app.sesamo.dev");

        let config = config.with_admin_base_url("https://admin.sesamo.dev".to_string());
        assert_eq!(
            config.base_url_for(Origin::Admin),
            "https://admin.sesamo.dev"
        );
        assert_eq!(config.base_url_for(Origin::App), "https://app.sesamo.dev");
    }

    #[test]
    fn origin_parse_defaults_to_app() {
        assert_eq!(Origin::parse("admin"), Origin::Admin);
        assert_eq!(Origin::parse("app"), Origin::App);
        assert_eq!(Origin::parse("anything-else"), Origin::App);
    }

    #[test]
    fn provider_check_is_case_insensitive() {
        let config = config().with_allowed_providers(vec!["email".to_string()]);
        assert!(config.provider_allowed("EMAIL"));
        assert!(!config.provider_allowed("google"));
    }

    #[test]
    fn http_app_url_disables_secure_cookies() {
        let config = AuthConfig::new(
            "http://localhost:3000".to_string(),
            SecretString::from("secret".to_string()),
        );
        assert!(!config.cookie_secure());
    }
}
