//! HTTP surface: router, middleware stack, and server lifecycle.

use crate::api::handlers::{auth, health};
use crate::auth::{AuthConfig, AuthService, LogMailer, PostgresStore};
use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, post},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;

pub(crate) mod handlers;

/// Build the API router. Routes only; the middleware stack is layered on in
/// [`new`] so tests can exercise routes without it.
#[must_use]
pub fn router() -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/v1/auth/signin", post(auth::sign_in))
        .route("/v1/auth/register-email-password", post(auth::register))
        .route("/v1/auth/verify", post(auth::verify))
        .route("/v1/auth/verify-email-password", post(auth::verify_password))
        .route("/v1/auth/login", post(auth::login))
        .route("/v1/auth/refresh", get(auth::refresh))
        .route("/v1/auth/verify/admin", get(auth::verify_admin))
        .route("/v1/auth/providers", get(auth::providers))
        .route("/v1/auth/logout", get(auth::logout))
        .route("/v1/auth/change-password", post(auth::change_password))
        .route("/v1/auth/sso/callback", post(auth::sso_callback))
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, dsn: String, auth_config: AuthConfig) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let frontend_origin = frontend_origin(auth_config.app_base_url())?;
    let store = Arc::new(PostgresStore::new(pool));
    let service = Arc::new(AuthService::new(
        auth_config,
        store.clone(),
        store.clone(),
        store.clone(),
        store,
        Arc::new(LogMailer),
    ));

    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::exact(frontend_origin))
        .allow_credentials(true);

    let app = router().layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &Request<Body>| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(service)),
    );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn frontend_origin(app_base_url: &str) -> Result<HeaderValue> {
    let parsed =
        Url::parse(app_base_url).with_context(|| format!("Invalid app base URL: {app_base_url}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("App base URL must include a valid host: {app_base_url}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", parsed.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build frontend origin header")
}
