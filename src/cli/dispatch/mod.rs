use crate::cli::actions::{server::Args, Action};
use anyhow::{Context, Result};
use secrecy::SecretString;

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let jwt_secret = matches
        .get_one::<String>("jwt-secret")
        .cloned()
        .context("missing required argument: --jwt-secret")?;
    let base_url = matches
        .get_one::<String>("base-url")
        .cloned()
        .unwrap_or_else(|| "http://localhost:3000".to_string());
    let admin_url = matches.get_one::<String>("admin-url").cloned();

    let allowed_providers = matches
        .get_one::<String>("allowed-providers")
        .map(|providers| {
            providers
                .split(',')
                .map(|provider| provider.trim().to_string())
                .filter(|provider| !provider.is_empty())
                .collect()
        })
        .unwrap_or_default();

    Ok(Action::Server(Args {
        port,
        dsn,
        jwt_secret: SecretString::from(jwt_secret),
        base_url,
        admin_url,
        allowed_providers,
        magic_link_ttl_hours: matches
            .get_one::<i64>("magic-link-ttl-hours")
            .copied()
            .unwrap_or(3),
        access_token_ttl_seconds: matches
            .get_one::<i64>("access-token-ttl")
            .copied()
            .unwrap_or(86_400),
        refresh_token_ttl_seconds: matches
            .get_one::<i64>("refresh-token-ttl")
            .copied()
            .unwrap_or(604_800),
        token_salt_complexity: matches
            .get_one::<usize>("token-salt-complexity")
            .copied()
            .unwrap_or(16),
    }))
}
