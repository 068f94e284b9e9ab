//! User, customer and session models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

/// Account roles. Customers are stored alongside operators but cannot log in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
    Customer,
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Admin => write!(f, "admin"),
            Self::Customer => write!(f, "customer"),
        }
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            "customer" => Ok(Self::Customer),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    Local,
    Google,
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Google => write!(f, "google"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub role: String,
    pub provider: String,
    pub google_id: Option<String>,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub last_login: Option<String>,
    pub theme: String,
    pub notify_email: bool,
    pub notify_campaigns: bool,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub company: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
    pub total_spent: f64,
    pub orders: i64,
    pub visits: i64,
    pub created_by: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// Unknown role strings are treated as the least privileged operator role
    pub fn role_enum(&self) -> UserRole {
        self.role.parse().unwrap_or(UserRole::User)
    }

    pub fn is_admin(&self) -> bool {
        self.role_enum() == UserRole::Admin
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPreferences {
    pub email: bool,
    pub campaigns: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    pub theme: String,
    pub notifications: NotificationPreferences,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub provider: String,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub last_login: Option<String>,
    pub preferences: UserPreferences,
    pub created_at: String,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            provider: user.provider,
            avatar: user.avatar,
            is_active: user.is_active,
            last_login: user.last_login,
            preferences: UserPreferences {
                theme: user.theme,
                notifications: NotificationPreferences {
                    email: user.notify_email,
                    campaigns: user.notify_campaigns,
                },
            },
            created_at: user.created_at,
        }
    }
}

/// Customer view of a user row; credentials and operator settings are omitted
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerResponse {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub company: Option<String>,
    pub notes: Option<String>,
    pub status: String,
    pub total_spent: f64,
    pub orders: i64,
    pub visits: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<User> for CustomerResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            email: user.email,
            phone: user.phone,
            location: user.location,
            company: user.company,
            notes: user.notes,
            status: user.status.unwrap_or_else(|| "active".to_string()),
            total_spent: user.total_spent,
            orders: user.orders,
            visits: user.visits,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub token_hash: String,
    pub expires_at: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserResponse,
}

#[derive(Debug, Deserialize)]
pub struct NotificationPreferencesUpdate {
    pub email: Option<bool>,
    pub campaigns: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PreferencesUpdate {
    pub theme: Option<String>,
    pub notifications: Option<NotificationPreferencesUpdate>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub preferences: Option<PreferencesUpdate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCustomerRequest {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub company: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
    pub total_spent: Option<f64>,
    pub orders: Option<i64>,
}

/// Partial customer update; absent fields keep their stored value
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCustomerRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub company: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
    pub total_spent: Option<f64>,
    pub orders: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        for role in [UserRole::User, UserRole::Admin, UserRole::Customer] {
            assert_eq!(role.to_string().parse::<UserRole>().unwrap(), role);
        }
        assert!("owner".parse::<UserRole>().is_err());
    }

    #[test]
    fn test_customer_status_defaults_to_active() {
        let user = User {
            id: "c1".to_string(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
            password_hash: None,
            role: "customer".to_string(),
            provider: "local".to_string(),
            google_id: None,
            avatar: None,
            is_active: true,
            last_login: None,
            theme: "light".to_string(),
            notify_email: true,
            notify_campaigns: true,
            phone: None,
            location: Some("Lisbon".to_string()),
            company: None,
            notes: None,
            status: None,
            total_spent: 120.5,
            orders: 3,
            visits: 3,
            created_by: Some("admin".to_string()),
            created_at: "2026-01-01T00:00:00.000Z".to_string(),
            updated_at: "2026-01-01T00:00:00.000Z".to_string(),
        };

        assert_eq!(user.role_enum(), UserRole::Customer);
        assert!(!user.is_admin());

        let response = CustomerResponse::from(user);
        assert_eq!(response.status, "active");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["totalSpent"], 120.5);
        assert!(json.get("passwordHash").is_none());
    }
}
