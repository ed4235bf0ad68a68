use crate::{api, auth::AuthConfig};
use anyhow::Result;
use secrecy::SecretString;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub jwt_secret: SecretString,
    pub base_url: String,
    pub admin_url: Option<String>,
    pub allowed_providers: Vec<String>,
    pub magic_link_ttl_hours: i64,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub token_salt_complexity: usize,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    info!(
        port = args.port,
        base_url = %args.base_url,
        providers = ?args.allowed_providers,
        "starting server"
    );

    let mut config = AuthConfig::new(args.base_url, args.jwt_secret)
        .with_allowed_providers(args.allowed_providers)
        .with_magic_link_ttl_hours(args.magic_link_ttl_hours)
        .with_access_token_ttl_seconds(args.access_token_ttl_seconds)
        .with_refresh_token_ttl_seconds(args.refresh_token_ttl_seconds)
        .with_token_salt_complexity(args.token_salt_complexity);

    if let Some(admin_url) = args.admin_url {
        config = config.with_admin_base_url(admin_url);
    }

    api::new(args.port, args.dsn, config).await
}
