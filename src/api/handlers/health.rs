use axum::{
    http::HeaderMap,
    response::{IntoResponse, Json},
};
use serde_json::json;
use tracing::error;

use crate::GIT_COMMIT_HASH;

// axum handler for health
pub async fn health() -> impl IntoResponse {
    let body = Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "build": GIT_COMMIT_HASH,
    }));

    let short_hash = if GIT_COMMIT_HASH.len() > 7 {
        &GIT_COMMIT_HASH[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    match format!(
        "{}:{}:{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_hash
    )
    .parse()
    {
        Ok(value) => {
            headers.insert("X-App", value);
        }
        Err(err) => error!("Failed to build X-App header: {err}"),
    }

    (headers, body)
}

#[cfg(test)]
mod tests {
    use super::health;
    use axum::response::IntoResponse;

    #[tokio::test]
    async fn health_sets_app_header() {
        let response = health().await.into_response();
        let header = response.headers().get("X-App").unwrap().to_str().unwrap();
        assert!(header.starts_with(concat!(env!("CARGO_PKG_NAME"), ":")));
    }
}
