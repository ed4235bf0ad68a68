//! # Sesamo (Authentication & Session Tokens)
//!
//! `sesamo` issues, verifies, rotates, and revokes user credentials across
//! three entry paths: passwordless magic-link email authentication,
//! email/password authentication, and third-party SSO identity linking.
//! Every successful flow mints a pair of short-lived access and long-lived
//! refresh tokens that gate all subsequent API access.
//!
//! ## Refresh Token Rotation
//!
//! Only the Argon2 hash of the current refresh token is persisted, on the
//! user row. Each successful refresh mints a new pair and replaces the
//! stored hash, so a stolen refresh token is replayable at most once.
//!
//! ## Bootstrap Admin
//!
//! The first and only user in the system is eligible for elevation to
//! administrator. Elevation is a single conditional store operation keyed on
//! user cardinality, so two concurrent requests cannot both bootstrap.
//!
//! ## Identity Linking
//!
//! A user may hold many provider accounts (`magic`, `google`, `github`,
//! `microsoft`) all pointing at the same uid; at most one account row exists
//! per `(provider, provider_account_id)` pair.

pub mod api;
pub mod auth;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
