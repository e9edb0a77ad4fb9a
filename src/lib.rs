pub mod access;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod models;
pub mod oauth;
pub mod password;
pub mod progress;
pub mod quiz;
pub mod routes;
pub mod state;
pub mod uploads;

use axum::{extract::DefaultBodyLimit, routing::get, Router};
use http::{header, HeaderName, HeaderValue, Method};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// Largest request body accepted; leaves headroom over the biggest upload kind.
const BODY_LIMIT: usize = 110 * 1024 * 1024;

/// The full HTTP application: API, static uploads, health check and middleware.
pub fn app(state: AppState) -> Router {
    let cors = cors(&state.config.frontend_url);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(routes::router(state))
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

fn cors(frontend_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(auth::TOKEN_HEADER),
        ])
        .allow_credentials(true);

    match HeaderValue::from_str(frontend_url.trim_end_matches('/')) {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            tracing::warn!(frontend_url, error = %e, "FRONTEND_URL is not a valid origin, CORS disabled");
            layer
        }
    }
}
