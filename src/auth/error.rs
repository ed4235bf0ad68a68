//! Typed failure taxonomy for the auth flows.
//!
//! Every flow returns one of these instead of letting a storage miss or an
//! expiry condition escape as an unhandled fault. `Internal` is reserved for
//! fatal conditions (signer misconfiguration, storage unreachable) and maps
//! to a generic 500 at the transport boundary.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email")]
    InvalidEmail,
    #[error("Auth provider not specified")]
    AuthProviderNotSpecified,
    #[error("Not allowed to register new user")]
    Forbidden,
    #[error("Invalid magic link data")]
    InvalidMagicLinkData,
    #[error("Magic link expired")]
    MagicLinkExpired,
    #[error("User not found")]
    UserNotFound,
    #[error("Invalid refresh token")]
    InvalidRefreshToken,
    #[error("Invalid email, password or token")]
    InvalidCredentials,
    #[error("Verification token data not found")]
    VerificationTokenNotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidEmail => StatusCode::BAD_REQUEST,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::MagicLinkExpired => StatusCode::UNAUTHORIZED,
            Self::AuthProviderNotSpecified
            | Self::InvalidMagicLinkData
            | Self::UserNotFound
            | Self::InvalidRefreshToken
            | Self::InvalidCredentials
            | Self::VerificationTokenNotFound => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::AuthError;
    use anyhow::anyhow;
    use axum::http::StatusCode;

    #[test]
    fn status_codes_match_flow_contract() {
        assert_eq!(AuthError::InvalidEmail.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AuthError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AuthError::MagicLinkExpired.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::InvalidMagicLinkData.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AuthError::InvalidRefreshToken.status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AuthError::Internal(anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn messages_are_user_facing() {
        assert_eq!(
            AuthError::InvalidCredentials.to_string(),
            "Invalid email, password or token"
        );
        assert_eq!(
            AuthError::Forbidden.to_string(),
            "Not allowed to register new user"
        );
    }
}
