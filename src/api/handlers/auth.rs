//! Auth endpoints for cookie and bearer sessions.

use axum::{
    extract::{Extension, Query},
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

use crate::auth::{
    store::AuthUser, valid_password_change, valid_registration_password, AuthError, AuthService,
    AuthTokenPair, Origin, RegisterOrLogin,
};

const ACCESS_TOKEN_COOKIE: &str = "access_token";
const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

const WEAK_REGISTRATION_PASSWORD: &str =
    "Password must be 8 to 16 characters and include a lowercase letter, an uppercase letter, and a digit";
const WEAK_CHANGED_PASSWORD: &str =
    "Password must be 6 to 16 characters, contain no spaces, and differ from the old password";

#[derive(Deserialize)]
pub struct OriginQuery {
    origin: Option<String>,
}

impl OriginQuery {
    fn parse(&self) -> Origin {
        self.origin
            .as_deref()
            .map_or(Origin::App, Origin::parse)
    }
}

#[derive(Deserialize)]
pub struct EmailPayload {
    email: String,
}

#[derive(Deserialize)]
pub struct EmailPasswordPayload {
    email: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyMagicLinkPayload {
    device_identifier: String,
    token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPasswordPayload {
    email: String,
    password: String,
    token: String,
    device_identifier: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordPayload {
    old_password: String,
    new_password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoCallbackPayload {
    provider: String,
    provider_account_id: String,
    email: String,
}

/// `POST /v1/auth/signin` - email a magic link, answer with the device
/// identifier the client must present alongside the emailed token.
pub async fn sign_in(
    service: Extension<Arc<AuthService>>,
    query: Query<OriginQuery>,
    payload: Json<EmailPayload>,
) -> Response {
    match service
        .sign_in_magic_link(&payload.email, query.parse())
        .await
    {
        Ok(device) => (StatusCode::OK, Json(device)).into_response(),
        Err(err) => error_response(&err),
    }
}

/// `POST /v1/auth/register-email-password` - one-step registration; the
/// session cookies come back immediately.
pub async fn register(
    service: Extension<Arc<AuthService>>,
    query: Query<OriginQuery>,
    payload: Json<EmailPasswordPayload>,
) -> Response {
    if !valid_registration_password(&payload.password) {
        return message_response(StatusCode::BAD_REQUEST, WEAK_REGISTRATION_PASSWORD);
    }
    match service
        .register_user_with_magic_link(&payload.email, &payload.password, query.parse())
        .await
    {
        Ok((tokens, message)) => session_response(&service, &tokens, message),
        Err(err) => error_response(&err),
    }
}

/// `POST /v1/auth/verify` - redeem an emailed magic link.
pub async fn verify(
    service: Extension<Arc<AuthService>>,
    payload: Json<VerifyMagicLinkPayload>,
) -> Response {
    match service
        .verify_magic_link_tokens(&payload.device_identifier, &payload.token)
        .await
    {
        Ok(tokens) => session_response(&service, &tokens, "success"),
        Err(err) => error_response(&err),
    }
}

/// `POST /v1/auth/verify-email-password` - redeem a magic link gated behind
/// the registration password.
pub async fn verify_password(
    service: Extension<Arc<AuthService>>,
    payload: Json<VerifyPasswordPayload>,
) -> Response {
    match service
        .verify_password_tokens(
            &payload.email,
            &payload.password,
            &payload.token,
            &payload.device_identifier,
        )
        .await
    {
        Ok(tokens) => session_response(&service, &tokens, "success"),
        Err(err) => error_response(&err),
    }
}

/// `POST /v1/auth/login` - password login that registers unknown invited
/// emails on the fly.
pub async fn login(
    service: Extension<Arc<AuthService>>,
    query: Query<OriginQuery>,
    payload: Json<EmailPasswordPayload>,
) -> Response {
    match service
        .register_or_login(&payload.email, &payload.password, query.parse())
        .await
    {
        Ok(RegisterOrLogin::LoggedIn { tokens, message })
        | Ok(RegisterOrLogin::Registered { tokens, message }) => {
            session_response(&service, &tokens, message)
        }
        Ok(RegisterOrLogin::NotInvited) => {
            message_response(StatusCode::FORBIDDEN, "not-invited")
        }
        Err(err) => error_response(&err),
    }
}

/// `GET /v1/auth/refresh` - rotate the session using the refresh token
/// cookie; the previous refresh token stops working.
pub async fn refresh(service: Extension<Arc<AuthService>>, headers: HeaderMap) -> Response {
    let Some(presented) = extract_token(&headers, REFRESH_TOKEN_COOKIE) else {
        return error_response(&AuthError::InvalidRefreshToken);
    };
    let user = match authenticated_user(&service, &presented).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    match service.refresh_auth_tokens(&presented, &user).await {
        Ok(tokens) => session_response(&service, &tokens, "success"),
        Err(err) => error_response(&err),
    }
}

/// `GET /v1/auth/verify/admin` - report admin standing, elevating a sole
/// user on first check.
pub async fn verify_admin(service: Extension<Arc<AuthService>>, headers: HeaderMap) -> Response {
    let user = match access_token_user(&service, &headers).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    match service.verify_admin(&user).await {
        Ok(is_admin) => (StatusCode::OK, Json(json!({ "isAdmin": is_admin }))).into_response(),
        Err(err) => error_response(&err),
    }
}

/// `GET /v1/auth/providers` - list the enabled auth providers.
pub async fn providers(service: Extension<Arc<AuthService>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "providers": service.config().allowed_providers() })),
    )
        .into_response()
}

/// `GET /v1/auth/logout` - clear both session cookies. Always succeeds.
pub async fn logout(service: Extension<Arc<AuthService>>) -> Response {
    let secure = service.config().cookie_secure();
    let mut headers = HeaderMap::new();
    for name in [ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE] {
        match clear_cookie(name, secure) {
            Ok(cookie) => {
                headers.append(SET_COOKIE, cookie);
            }
            Err(err) => {
                error!("Failed to build clear cookie: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }
    (StatusCode::OK, headers, Json(json!({ "message": "success" }))).into_response()
}

/// `POST /v1/auth/change-password` - change the password behind the
/// caller's own credential. Requires a valid access token.
pub async fn change_password(
    service: Extension<Arc<AuthService>>,
    headers: HeaderMap,
    payload: Json<ChangePasswordPayload>,
) -> Response {
    let user = match access_token_user(&service, &headers).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    if !valid_password_change(&payload.new_password, &payload.old_password) {
        return message_response(StatusCode::BAD_REQUEST, WEAK_CHANGED_PASSWORD);
    }
    match service
        .change_password(&user.email, &payload.new_password, &payload.old_password)
        .await
    {
        Ok(()) => message_response(StatusCode::OK, "success"),
        Err(err) => error_response(&err),
    }
}

/// `POST /v1/auth/sso/callback` - open a session for an identity verified
/// by an external provider.
pub async fn sso_callback(
    service: Extension<Arc<AuthService>>,
    payload: Json<SsoCallbackPayload>,
) -> Response {
    match service
        .sso_callback(
            &payload.provider,
            &payload.provider_account_id,
            &payload.email,
        )
        .await
    {
        Ok(tokens) => session_response(&service, &tokens, "success"),
        Err(err) => error_response(&err),
    }
}

async fn access_token_user(
    service: &AuthService,
    headers: &HeaderMap,
) -> Result<AuthUser, Response> {
    let Some(token) = extract_token(headers, ACCESS_TOKEN_COOKIE) else {
        return Err(error_response(&AuthError::InvalidCredentials));
    };
    authenticated_user(service, &token).await
}

async fn authenticated_user(service: &AuthService, token: &str) -> Result<AuthUser, Response> {
    match service.user_from_token(token).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(error_response(&AuthError::InvalidCredentials)),
        Err(err) => Err(error_response(&err)),
    }
}

/// Set both auth cookies and echo the outcome message.
fn session_response(service: &AuthService, tokens: &AuthTokenPair, message: &str) -> Response {
    let config = service.config();
    let secure = config.cookie_secure();
    let cookies = [
        session_cookie(
            ACCESS_TOKEN_COOKIE,
            &tokens.access_token,
            config.access_token_ttl_seconds(),
            secure,
        ),
        session_cookie(
            REFRESH_TOKEN_COOKIE,
            &tokens.refresh_token,
            config.refresh_token_ttl_seconds(),
            secure,
        ),
    ];
    let mut headers = HeaderMap::new();
    for cookie in cookies {
        match cookie {
            Ok(value) => {
                headers.append(SET_COOKIE, value);
            }
            Err(err) => {
                error!("Failed to build session cookie: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }
    (StatusCode::OK, headers, Json(json!({ "message": message }))).into_response()
}

fn error_response(err: &AuthError) -> Response {
    let status = err.status_code();
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Auth flow failed: {err:#}");
        return message_response(status, "Internal server error");
    }
    message_response(status, &err.to_string())
}

fn message_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "message": message }))).into_response()
}

fn session_cookie(
    name: &str,
    token: &str,
    ttl_seconds: i64,
    secure: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{name}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_cookie(name: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == cookie_name {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_flags_follow_https() {
        let plain = session_cookie("access_token", "abc", 60, false).unwrap();
        assert_eq!(
            plain.to_str().unwrap(),
            "access_token=abc; Path=/; HttpOnly; SameSite=Lax; Max-Age=60"
        );
        let secure = session_cookie("access_token", "abc", 60, true).unwrap();
        assert!(secure.to_str().unwrap().ends_with("; Secure"));
    }

    #[test]
    fn clear_cookie_zeroes_max_age() {
        let cookie = clear_cookie("refresh_token", false).unwrap();
        assert_eq!(
            cookie.to_str().unwrap(),
            "refresh_token=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"
        );
    }

    #[test]
    fn token_extraction_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("access_token=from-cookie"),
        );
        assert_eq!(
            extract_token(&headers, "access_token").as_deref(),
            Some("abc")
        );
    }

    #[test]
    fn token_extraction_falls_back_to_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("other=1; refresh_token=xyz"),
        );
        assert_eq!(
            extract_token(&headers, "refresh_token").as_deref(),
            Some("xyz")
        );
        assert!(extract_token(&headers, "access_token").is_none());
    }
}
