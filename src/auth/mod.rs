//! Authentication and session tokens.
//!
//! The flows: passwordless magic links, email-and-password registration and
//! login, refresh-token rotation with a single active session per user,
//! first-user admin bootstrap, and external identity linking. Storage sits
//! behind trait seams with Postgres and in-memory implementations.

pub mod config;
pub mod error;
pub mod identity;
pub mod magic;
pub mod mailer;
pub mod orchestrator;
pub mod password;
pub mod store;
pub mod tokens;

pub use config::{AuthConfig, Origin};
pub use error::AuthError;
pub use identity::IdentityLinker;
pub use magic::MagicLinkIssuer;
pub use mailer::{LogMailer, Mailer};
pub use orchestrator::{AuthService, DeviceIdentifier, RegisterOrLogin};
pub use password::{valid_password_change, valid_registration_password, PasswordVerifier};
pub use store::{MemoryStore, PostgresStore};
pub use tokens::{AuthTokenPair, TokenCodec, TokenClaims};

#[cfg(test)]
mod tests;
