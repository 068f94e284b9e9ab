pub mod analytics;
pub mod audience;
pub mod auth;
pub mod campaigns;
pub mod customers;
pub mod error;
pub mod oauth;
pub mod rate_limit;
pub mod response;
pub mod users;
pub mod validation;

use axum::{
    http::{header, request::Parts, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::CorsConfig;
use crate::AppState;
use error::ApiError;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Credential endpoints get the stricter limiter
    let credential_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ));

    // Auth routes (me/logout resolve the bearer token in the User extractor)
    let auth_routes = Router::new()
        .route("/me", get(auth::me))
        .route("/logout", post(auth::logout))
        .route("/google", get(oauth::google_login))
        .route("/google/callback", get(oauth::google_callback))
        .merge(credential_routes);

    // Protected API routes
    let protected_routes = Router::new()
        // Users
        .route("/users", get(users::list_users))
        .route(
            "/users/profile",
            get(users::get_profile).put(users::update_profile),
        )
        .route("/users/dashboard", get(users::dashboard))
        // Audience segments
        .route(
            "/audience",
            get(audience::list_segments).post(audience::create_segment),
        )
        .route("/audience/preview", post(audience::preview_rules))
        .route("/audience/popular", get(audience::popular_segments))
        .route(
            "/audience/:id",
            get(audience::get_segment)
                .put(audience::update_segment)
                .delete(audience::delete_segment),
        )
        .route("/audience/:id/preview", post(audience::preview_segment))
        // Campaigns
        .route(
            "/campaigns",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        )
        .route("/campaigns/stats/overview", get(campaigns::campaign_stats))
        .route(
            "/campaigns/:id",
            get(campaigns::get_campaign)
                .put(campaigns::update_campaign)
                .delete(campaigns::delete_campaign),
        )
        .route("/campaigns/:id/send", post(campaigns::send_campaign))
        .route("/campaigns/:id/pause", post(campaigns::pause_campaign))
        .route("/campaigns/:id/reset", post(campaigns::reset_campaign))
        // Customers (admin only, enforced by the AdminUser extractor)
        .route(
            "/customers",
            get(customers::list_customers).post(customers::create_customer),
        )
        .route("/customers/stats/overview", get(customers::customer_stats))
        .route(
            "/customers/:id",
            get(customers::get_customer)
                .put(customers::update_customer)
                .delete(customers::delete_customer),
        )
        // Analytics
        .route("/analytics/dashboard", get(analytics::dashboard))
        // Protected by auth
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    let mut api_routes = Router::new()
        .nest("/auth", auth_routes)
        .merge(protected_routes);

    if state.config.debug.enabled {
        tracing::warn!("Debug analytics endpoints are enabled and unauthenticated");
        let debug_routes = Router::new()
            .route("/analytics/debug", get(analytics::debug_overview))
            .route("/analytics/test", get(analytics::debug_counts))
            .route("/analytics/reset-demo", post(analytics::reset_demo))
            .route(
                "/analytics/simulate-delivery",
                post(analytics::simulate_delivery),
            );
        api_routes = api_routes.merge(debug_routes);
    }

    let api_routes = api_routes
        .fallback(api_not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes)
        .layer(cors_layer(&state.config.cors))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS for the configured frontend origins, optionally any localhost port
fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let allowed: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    let allow_localhost = config.allow_localhost;

    let origin = AllowOrigin::predicate(move |origin: &HeaderValue, _parts: &Parts| {
        if allowed.iter().any(|allowed| allowed == origin) {
            return true;
        }
        allow_localhost && origin.to_str().map(is_localhost_origin).unwrap_or(false)
    });

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

fn is_localhost_origin(origin: &str) -> bool {
    ["http://localhost", "http://127.0.0.1"].iter().any(|prefix| {
        origin
            .strip_prefix(prefix)
            .map(|rest| rest.is_empty() || rest.starts_with(':'))
            .unwrap_or(false)
    })
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "OK",
        "message": "CRM Backend API is running",
        "timestamp": crate::db::now(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn api_not_found() -> ApiError {
    ApiError::not_found("API endpoint not found")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_localhost_origins() {
        assert!(is_localhost_origin("http://localhost:3000"));
        assert!(is_localhost_origin("http://localhost"));
        assert!(is_localhost_origin("http://127.0.0.1:5173"));
        assert!(!is_localhost_origin("http://localhost.evil.com"));
        assert!(!is_localhost_origin("https://example.com"));
    }
}
