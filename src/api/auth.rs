use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, State},
    http::{request::Parts, HeaderMap, Request},
    middleware::Next,
    response::Response,
    Json,
};
use axum_extra::extract::WithRejection;
use rand::Rng;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::error::{ApiError, ValidationErrorBuilder};
use super::response::ApiResponse;
use super::validation::{normalize_email, validate_email, validate_password, validate_user_name};
use crate::config::AuthConfig;
use crate::db::{self, LoginRequest, LoginResponse, RegisterRequest, User, UserResponse, UserRole};
use crate::{AppState, DbPool};

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Generate a random token
fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// Hash a token for storage
fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Create a session for `user_id` and return the bearer token
pub async fn issue_session(db: &DbPool, user_id: &str, ttl_hours: i64) -> Result<String, ApiError> {
    let token = generate_token();
    let token_hash = hash_token(&token);
    let now = chrono::Utc::now();
    let expires_at = db::timestamp(now + chrono::Duration::hours(ttl_hours));

    sqlx::query(
        "INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(&token_hash)
    .bind(&expires_at)
    .bind(db::timestamp(now))
    .execute(db)
    .await?;

    // Opportunistic sweep of this user's stale sessions
    sqlx::query("DELETE FROM sessions WHERE user_id = ? AND expires_at <= ?")
        .bind(user_id)
        .bind(db::timestamp(now))
        .execute(db)
        .await?;

    Ok(token)
}

/// Record a successful login and hand out a token
async fn complete_login(state: &AppState, user: User) -> Result<LoginResponse, ApiError> {
    let now = db::now();
    sqlx::query("UPDATE users SET last_login = ?, updated_at = ? WHERE id = ?")
        .bind(&now)
        .bind(&now)
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    let token = issue_session(&state.db, &user.id, state.config.auth.session_ttl_hours).await?;
    let mut user = user;
    user.last_login = Some(now);

    Ok(LoginResponse {
        token,
        user: UserResponse::from(user),
    })
}

/// Register a local account
pub async fn register(
    State(state): State<Arc<AppState>>,
    WithRejection(Json(request), _): WithRejection<Json<RegisterRequest>, ApiError>,
) -> Result<ApiResponse<LoginResponse>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_user_name(&request.name));
    errors.check("email", validate_email(&request.email));
    errors.check(
        "password",
        validate_password(&request.password, state.config.auth.min_password_length),
    );
    errors.finish()?;

    let email = normalize_email(&request.email);
    let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::conflict("User already exists with this email"));
    }

    let password_hash = hash_password(&request.password).map_err(|e| {
        tracing::error!(error = %e, "Failed to hash password");
        ApiError::internal("Server error during registration")
    })?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = db::now();
    sqlx::query(
        "INSERT INTO users (id, name, email, password_hash, role, provider, created_at, updated_at) \
         VALUES (?, ?, ?, ?, 'user', 'local', ?, ?)",
    )
    .bind(&id)
    .bind(request.name.trim())
    .bind(&email)
    .bind(&password_hash)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    tracing::info!(user_id = %id, "Registered new user");

    let user: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&id)
        .fetch_one(&state.db)
        .await?;

    let response = complete_login(&state, user).await?;
    Ok(ApiResponse::created("User registered successfully", response))
}

/// Login endpoint
pub async fn login(
    State(state): State<Arc<AppState>>,
    WithRejection(Json(request), _): WithRejection<Json<LoginRequest>, ApiError>,
) -> Result<ApiResponse<LoginResponse>, ApiError> {
    if request.email.trim().is_empty() || request.password.is_empty() {
        return Err(ApiError::validation_field("email", "Email and password are required"));
    }

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(normalize_email(&request.email))
        .fetch_optional(&state.db)
        .await?;

    let invalid = || ApiError::unauthorized("Invalid credentials");
    let user = user.ok_or_else(invalid)?;

    if user.role_enum() == UserRole::Customer {
        return Err(invalid());
    }

    let hash = user.password_hash.as_deref().ok_or_else(invalid)?;
    if !verify_password(&request.password, hash) {
        return Err(invalid());
    }

    if !user.is_active {
        return Err(ApiError::unauthorized("Account is deactivated"));
    }

    tracing::info!(user_id = %user.id, "User logged in");
    let response = complete_login(&state, user).await?;
    Ok(ApiResponse::ok(response).with_message("Login successful"))
}

/// Current user
pub async fn me(user: User) -> ApiResponse<serde_json::Value> {
    ApiResponse::ok(json!({ "user": UserResponse::from(user) }))
}

/// Revoke the session behind the presented token
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<ApiResponse<()>, ApiError> {
    let token = extract_token(&headers).ok_or_else(|| ApiError::unauthorized("No token provided"))?;

    sqlx::query("DELETE FROM sessions WHERE token_hash = ?")
        .bind(hash_token(&token))
        .execute(&state.db)
        .await?;

    Ok(ApiResponse::message("Logged out successfully"))
}

/// Extract the bearer token from request headers
fn extract_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Resolve a bearer token to an active operator account
pub async fn get_current_user(pool: &DbPool, token: &str) -> Result<User, ApiError> {
    let token_hash = hash_token(token);
    let session: Option<(String, String)> = sqlx::query_as(
        "SELECT user_id, token_hash FROM sessions WHERE token_hash = ? AND expires_at > ?",
    )
    .bind(&token_hash)
    .bind(db::now())
    .fetch_optional(pool)
    .await?;

    let (user_id, stored_hash) =
        session.ok_or_else(|| ApiError::unauthorized("Token is not valid"))?;

    // Constant-time confirmation of the indexed lookup
    if !bool::from(stored_hash.as_bytes().ct_eq(token_hash.as_bytes())) {
        return Err(ApiError::unauthorized("Token is not valid"));
    }

    let user: Option<User> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&user_id)
        .fetch_optional(pool)
        .await?;

    let user = user.ok_or_else(|| ApiError::unauthorized("Token is not valid"))?;
    if !user.is_active || user.role_enum() == UserRole::Customer {
        return Err(ApiError::unauthorized("Account is deactivated"));
    }

    Ok(user)
}

/// Auth middleware that validates tokens and stashes the user for extractors
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("No token, authorization denied"))?;

    let user = get_current_user(&state.db, &token).await?;
    request.extensions_mut().insert(user);

    Ok(next.run(request).await)
}

/// Extractor for getting the current authenticated user from a request
#[async_trait]
impl FromRequestParts<Arc<AppState>> for User {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<User>() {
            return Ok(user.clone());
        }

        let token = extract_token(&parts.headers)
            .ok_or_else(|| ApiError::unauthorized("No token, authorization denied"))?;
        get_current_user(&state.db, &token).await
    }
}

/// An authenticated user with the admin role
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = User::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::forbidden(format!(
                "User role {} is not authorized to access this route",
                user.role
            )));
        }
        Ok(AdminUser(user))
    }
}

/// Create the configured bootstrap admin, or promote the existing account
pub async fn ensure_admin_user(pool: &DbPool, config: &AuthConfig) -> anyhow::Result<()> {
    let (Some(email), Some(password)) = (&config.admin_email, &config.admin_password) else {
        return Ok(());
    };

    let email = normalize_email(email);
    validate_email(&email).map_err(|e| anyhow::anyhow!("auth.admin_email: {}", e))?;
    validate_password(password, config.min_password_length)
        .map_err(|e| anyhow::anyhow!("auth.admin_password: {}", e))?;

    let existing: Option<User> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(pool)
        .await?;

    match existing {
        Some(user) if user.is_admin() => {
            tracing::debug!(email = %email, "Admin user already present");
        }
        Some(user) => {
            sqlx::query("UPDATE users SET role = 'admin', updated_at = ? WHERE id = ?")
                .bind(db::now())
                .bind(&user.id)
                .execute(pool)
                .await?;
            tracing::info!(email = %email, "Promoted existing user to admin");
        }
        None => {
            let password_hash = hash_password(password)
                .map_err(|e| anyhow::anyhow!("Failed to hash admin password: {}", e))?;
            let now = db::now();
            sqlx::query(
                "INSERT INTO users (id, name, email, password_hash, role, provider, created_at, updated_at) \
                 VALUES (?, ?, ?, ?, 'admin', 'local', ?, ?)",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&config.admin_name)
            .bind(&email)
            .bind(&password_hash)
            .bind(&now)
            .bind(&now)
            .execute(pool)
            .await?;
            tracing::info!(email = %email, "Created admin user");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not-a-hash"));
    }

    #[test]
    fn test_tokens_are_random_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_ne!(hash_token(&a), a);
    }

    #[test]
    fn test_extract_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);

        headers.insert("Authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(extract_token(&headers).as_deref(), Some("abc123"));

        headers.insert("Authorization", "Basic abc123".parse().unwrap());
        assert_eq!(extract_token(&headers), None);
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let temp = TempDir::new().unwrap();
        let pool = crate::db::init(temp.path()).await.unwrap();

        let config = AuthConfig {
            admin_email: Some("Root@Example.com".to_string()),
            admin_password: Some("supersecret".to_string()),
            ..AuthConfig::default()
        };
        ensure_admin_user(&pool, &config).await.unwrap();
        // Second run is a no-op
        ensure_admin_user(&pool, &config).await.unwrap();

        let admin: User = sqlx::query_as("SELECT * FROM users WHERE email = 'root@example.com'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert!(admin.is_admin());

        let token = issue_session(&pool, &admin.id, 1).await.unwrap();
        let user = get_current_user(&pool, &token).await.unwrap();
        assert_eq!(user.id, admin.id);

        assert!(get_current_user(&pool, "bogus").await.is_err());

        sqlx::query("UPDATE users SET is_active = 0 WHERE id = ?")
            .bind(&admin.id)
            .execute(&pool)
            .await
            .unwrap();
        assert!(get_current_user(&pool, &token).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_session_rejected() {
        let temp = TempDir::new().unwrap();
        let pool = crate::db::init(temp.path()).await.unwrap();

        let now = db::now();
        sqlx::query("INSERT INTO users (id, name, email, role, created_at, updated_at) VALUES ('u1', 'U', 'u@example.com', 'user', ?, ?)")
            .bind(&now)
            .bind(&now)
            .execute(&pool)
            .await
            .unwrap();

        let token = "expired-token";
        let past = db::timestamp(chrono::Utc::now() - chrono::Duration::hours(1));
        sqlx::query("INSERT INTO sessions (id, user_id, token_hash, expires_at, created_at) VALUES ('s1', 'u1', ?, ?, ?)")
            .bind(hash_token(token))
            .bind(&past)
            .bind(&past)
            .execute(&pool)
            .await
            .unwrap();

        assert!(get_current_user(&pool, token).await.is_err());
    }
}
