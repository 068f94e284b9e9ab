//! Google sign-in.
//!
//! `GET /api/auth/google` redirects to the consent screen with a one-time
//! `state` value; the callback exchanges the code, links or creates the local
//! account and sends the browser back to the frontend with a bearer token.

use axum::{
    extract::{Query, State},
    response::Redirect,
};
use dashmap::DashMap;
use rand::Rng;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::auth::issue_session;
use super::error::ApiError;
use crate::config::GoogleOAuthConfig;
use crate::db::{self, User, UserRole};
use crate::AppState;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://www.googleapis.com/oauth2/v3/userinfo";
const OAUTH_SCOPES: &str = "openid email profile";

/// How long a consent-screen round trip may take
const STATE_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Deserialize)]
pub struct GoogleCallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: String,
    name: Option<String>,
    picture: Option<String>,
}

fn google_config(state: &AppState) -> Result<&GoogleOAuthConfig, ApiError> {
    state
        .config
        .oauth
        .google
        .as_ref()
        .ok_or_else(|| ApiError::not_found("Google OAuth is not configured"))
}

fn redirect_uri(oauth: &GoogleOAuthConfig, port: u16) -> String {
    oauth
        .redirect_uri
        .clone()
        .unwrap_or_else(|| format!("http://localhost:{}/api/auth/google/callback", port))
}

fn authorization_url(oauth: &GoogleOAuthConfig, redirect_uri: &str, state: &str) -> Result<String, ApiError> {
    let url = reqwest::Url::parse_with_params(
        GOOGLE_AUTH_URL,
        &[
            ("client_id", oauth.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", OAUTH_SCOPES),
            ("state", state),
            ("prompt", "select_account"),
        ],
    )
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to build Google authorization URL");
        ApiError::internal("Server error")
    })?;
    Ok(url.to_string())
}

/// Remember a freshly issued state value, dropping expired ones
fn store_state(states: &DashMap<String, Instant>, value: &str) {
    let now = Instant::now();
    states.retain(|_, issued| now.duration_since(*issued) < STATE_TTL);
    states.insert(value.to_string(), now);
}

/// Consume a state value; each one is accepted at most once
fn take_state(states: &DashMap<String, Instant>, value: &str) -> bool {
    match states.remove(value) {
        Some((_, issued)) => issued.elapsed() < STATE_TTL,
        None => false,
    }
}

/// Start the Google consent flow
pub async fn google_login(State(state): State<Arc<AppState>>) -> Result<Redirect, ApiError> {
    let oauth = google_config(&state)?;

    // Random state for CSRF protection
    let bytes: [u8; 16] = rand::rng().random();
    let state_param = hex::encode(bytes);
    store_state(&state.oauth_states, &state_param);

    let redirect = redirect_uri(oauth, state.config.server.port);
    let url = authorization_url(oauth, &redirect, &state_param)?;
    Ok(Redirect::to(&url))
}

/// Finish the consent flow and hand the browser a token
pub async fn google_callback(
    State(state): State<Arc<AppState>>,
    Query(params): Query<GoogleCallbackQuery>,
) -> Result<Redirect, ApiError> {
    let oauth = google_config(&state)?;
    let frontend = oauth.frontend_url.trim_end_matches('/');
    let failure = Redirect::to(&format!("{}/login?error=oauth_failed", frontend));

    if let Some(error) = &params.error {
        tracing::warn!(error = %error, "Google sign-in was declined");
        return Ok(failure);
    }

    let (Some(code), Some(state_param)) = (&params.code, &params.state) else {
        tracing::warn!("Google callback without code or state");
        return Ok(failure);
    };

    if !take_state(&state.oauth_states, state_param) {
        tracing::warn!("Google callback with unknown or expired state");
        return Ok(failure);
    }

    match sign_in_with_google(&state, oauth, code).await {
        Ok(token) => Ok(Redirect::to(&format!("{}/auth/callback?token={}", frontend, token))),
        Err(e) => {
            tracing::warn!(error = %e, "Google sign-in failed");
            Ok(failure)
        }
    }
}

async fn sign_in_with_google(
    state: &AppState,
    oauth: &GoogleOAuthConfig,
    code: &str,
) -> Result<String, ApiError> {
    let redirect = redirect_uri(oauth, state.config.server.port);
    let access_token = exchange_code(&state.http, oauth, &redirect, code).await?;
    let profile = fetch_user_info(&state.http, &access_token).await?;

    let user = upsert_google_user(&state.db, &profile).await?;
    if user.role_enum() == UserRole::Customer || !user.is_active {
        return Err(ApiError::unauthorized("Account is deactivated"));
    }

    let now = db::now();
    sqlx::query("UPDATE users SET last_login = ?, updated_at = ? WHERE id = ?")
        .bind(&now)
        .bind(&now)
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    tracing::info!(user_id = %user.id, "User signed in with Google");
    issue_session(&state.db, &user.id, state.config.auth.session_ttl_hours).await
}

async fn exchange_code(
    client: &reqwest::Client,
    oauth: &GoogleOAuthConfig,
    redirect_uri: &str,
    code: &str,
) -> Result<String, ApiError> {
    let response = client
        .post(GOOGLE_TOKEN_URL)
        .header("Accept", "application/json")
        .form(&[
            ("code", code),
            ("client_id", oauth.client_id.as_str()),
            ("client_secret", oauth.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .send()
        .await
        .map_err(|e| ApiError::external(format!("Failed to exchange token: {}", e)))?;

    if !response.status().is_success() {
        return Err(ApiError::external(format!(
            "Google token endpoint returned {}",
            response.status()
        )));
    }

    let token: GoogleTokenResponse = response
        .json()
        .await
        .map_err(|e| ApiError::external(format!("Failed to parse token response: {}", e)))?;
    Ok(token.access_token)
}

async fn fetch_user_info(client: &reqwest::Client, access_token: &str) -> Result<GoogleUserInfo, ApiError> {
    let response = client
        .get(GOOGLE_USERINFO_URL)
        .header("Authorization", format!("Bearer {}", access_token))
        .send()
        .await
        .map_err(|e| ApiError::external(format!("Failed to get user info: {}", e)))?;

    if !response.status().is_success() {
        return Err(ApiError::external(format!(
            "Google userinfo endpoint returned {}",
            response.status()
        )));
    }

    response
        .json()
        .await
        .map_err(|e| ApiError::external(format!("Failed to parse user info: {}", e)))
}

/// Find the account for a Google profile: by Google id, then by email (linking
/// it), otherwise create a new passwordless account.
async fn upsert_google_user(pool: &db::DbPool, profile: &GoogleUserInfo) -> Result<User, ApiError> {
    let by_google: Option<User> = sqlx::query_as("SELECT * FROM users WHERE google_id = ?")
        .bind(&profile.sub)
        .fetch_optional(pool)
        .await?;
    if let Some(user) = by_google {
        return Ok(user);
    }

    let email = profile.email.trim().to_lowercase();
    let now = db::now();

    let by_email: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(pool)
        .await?;

    if let Some(user) = by_email {
        sqlx::query(
            "UPDATE users SET google_id = ?, avatar = COALESCE(avatar, ?), updated_at = ? WHERE id = ?",
        )
        .bind(&profile.sub)
        .bind(&profile.picture)
        .bind(&now)
        .bind(&user.id)
        .execute(pool)
        .await?;
        tracing::info!(user_id = %user.id, "Linked Google account to existing user");
        return Ok(sqlx::query_as("SELECT * FROM users WHERE id = ?")
            .bind(&user.id)
            .fetch_one(pool)
            .await?);
    }

    let id = uuid::Uuid::new_v4().to_string();
    let name = profile
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(&email);

    sqlx::query(
        "INSERT INTO users (id, name, email, role, provider, google_id, avatar, created_at, updated_at) \
         VALUES (?, ?, ?, 'user', 'google', ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(name)
    .bind(&email)
    .bind(&profile.sub)
    .bind(&profile.picture)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    tracing::info!(user_id = %id, "Created user from Google profile");
    Ok(sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_one(pool)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_oauth() -> GoogleOAuthConfig {
        GoogleOAuthConfig {
            client_id: "1234.apps.googleusercontent.com".to_string(),
            client_secret: "s3cr3t".to_string(),
            redirect_uri: None,
            frontend_url: "http://localhost:5173".to_string(),
        }
    }

    #[test]
    fn test_redirect_uri_defaults_to_server_port() {
        let oauth = test_oauth();
        assert_eq!(
            redirect_uri(&oauth, 5000),
            "http://localhost:5000/api/auth/google/callback"
        );

        let custom = GoogleOAuthConfig {
            redirect_uri: Some("https://crm.example.com/api/auth/google/callback".to_string()),
            ..test_oauth()
        };
        assert_eq!(
            redirect_uri(&custom, 5000),
            "https://crm.example.com/api/auth/google/callback"
        );
    }

    #[test]
    fn test_authorization_url_is_encoded() {
        let url = authorization_url(&test_oauth(), "http://localhost:5000/cb", "abc").unwrap();
        assert!(url.starts_with(GOOGLE_AUTH_URL));
        assert!(url.contains("client_id=1234.apps.googleusercontent.com"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A5000%2Fcb"));
        assert!(url.contains("scope=openid+email+profile"));
        assert!(url.contains("state=abc"));
    }

    #[test]
    fn test_state_is_single_use() {
        let states = DashMap::new();
        store_state(&states, "s1");
        assert!(take_state(&states, "s1"));
        assert!(!take_state(&states, "s1"));
        assert!(!take_state(&states, "never-issued"));
    }

    #[test]
    fn test_expired_state_rejected_and_purged() {
        let states = DashMap::new();
        let Some(old) = Instant::now().checked_sub(STATE_TTL + Duration::from_secs(1)) else {
            return;
        };
        states.insert("stale".to_string(), old);
        assert!(!take_state(&states, "stale"));

        states.insert("stale".to_string(), old);
        store_state(&states, "fresh");
        assert!(!states.contains_key("stale"));
        assert!(states.contains_key("fresh"));
    }

    #[tokio::test]
    async fn test_google_profile_links_existing_email() {
        let temp = TempDir::new().unwrap();
        let pool = crate::db::init(temp.path()).await.unwrap();

        let now = db::now();
        sqlx::query("INSERT INTO users (id, name, email, password_hash, role, created_at, updated_at) VALUES ('u1', 'Ada', 'ada@example.com', 'x', 'user', ?, ?)")
            .bind(&now)
            .bind(&now)
            .execute(&pool)
            .await
            .unwrap();

        let profile = GoogleUserInfo {
            sub: "g-123".to_string(),
            email: "Ada@Example.com".to_string(),
            name: Some("Ada L".to_string()),
            picture: Some("https://example.com/a.png".to_string()),
        };

        let linked = upsert_google_user(&pool, &profile).await.unwrap();
        assert_eq!(linked.id, "u1");
        assert_eq!(linked.google_id.as_deref(), Some("g-123"));
        assert_eq!(linked.provider, "local");

        // Second sign-in resolves by Google id
        let again = upsert_google_user(&pool, &profile).await.unwrap();
        assert_eq!(again.id, "u1");
    }

    #[tokio::test]
    async fn test_google_profile_creates_user() {
        let temp = TempDir::new().unwrap();
        let pool = crate::db::init(temp.path()).await.unwrap();

        let profile = GoogleUserInfo {
            sub: "g-456".to_string(),
            email: "grace@example.com".to_string(),
            name: None,
            picture: None,
        };

        let user = upsert_google_user(&pool, &profile).await.unwrap();
        assert_eq!(user.provider, "google");
        assert_eq!(user.name, "grace@example.com");
        assert!(user.password_hash.is_none());
        assert_eq!(user.role_enum(), UserRole::User);
    }
}
