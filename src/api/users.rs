use axum::{extract::State, Json};
use axum_extra::extract::WithRejection;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;

use super::auth::AdminUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::response::ApiResponse;
use super::validation::{validate_profile_name, validate_theme};
use crate::db::{self, percentage, Campaign, UpdateProfileRequest, User, UserResponse};
use crate::AppState;

const RECENT_CAMPAIGNS: i64 = 5;

pub async fn get_profile(user: User) -> ApiResponse<serde_json::Value> {
    ApiResponse::ok(json!({ "user": UserResponse::from(user) }))
}

/// Update display name and preferences; absent fields are left alone
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: User,
    WithRejection(Json(request), _): WithRejection<Json<UpdateProfileRequest>, ApiError>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(name) = &request.name {
        errors.check("name", validate_profile_name(name));
    }
    let preferences = request.preferences;
    if let Some(prefs) = &preferences {
        errors.check("preferences.theme", validate_theme(&prefs.theme));
    }
    errors.finish()?;

    let (theme, notifications) = match preferences {
        Some(p) => (p.theme, p.notifications),
        None => (None, None),
    };
    let (notify_email, notify_campaigns) = match notifications {
        Some(n) => (n.email, n.campaigns),
        None => (None, None),
    };

    sqlx::query(
        "UPDATE users SET name = ?, theme = ?, notify_email = ?, notify_campaigns = ?, updated_at = ? WHERE id = ?",
    )
    .bind(request.name.as_deref().map(str::trim).unwrap_or(&user.name))
    .bind(theme.as_deref().unwrap_or(&user.theme))
    .bind(notify_email.unwrap_or(user.notify_email))
    .bind(notify_campaigns.unwrap_or(user.notify_campaigns))
    .bind(db::now())
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    let updated: User = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&user.id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(user_id = %user.id, "Updated profile");
    Ok(ApiResponse::ok(json!({ "user": UserResponse::from(updated) }))
        .with_message("Profile updated successfully"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecentCampaign {
    id: String,
    name: String,
    status: String,
    #[serde(rename = "type")]
    campaign_type: String,
    sent: i64,
    open_rate: f64,
    created_at: String,
}

impl From<Campaign> for RecentCampaign {
    fn from(campaign: Campaign) -> Self {
        let open_rate = campaign.metrics().rates().open_rate;
        Self {
            id: campaign.id,
            name: campaign.name,
            status: campaign.status,
            campaign_type: campaign.campaign_type,
            sent: campaign.sent,
            open_rate,
            created_at: campaign.created_at,
        }
    }
}

/// Per-user summary for the landing page
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let (total, active, completed, sent, opened, clicked): (i64, i64, i64, i64, i64, i64) =
        sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN status IN ('sending', 'scheduled') THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(sent), 0), COALESCE(SUM(opened), 0), COALESCE(SUM(clicked), 0)
            FROM campaigns WHERE created_by = ?
            "#,
        )
        .bind(&user.id)
        .fetch_one(&state.db)
        .await?;

    let (segments, audience): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COALESCE(SUM(audience_size), 0) FROM audience_segments WHERE created_by = ? AND is_active = 1",
    )
    .bind(&user.id)
    .fetch_one(&state.db)
    .await?;

    let recent: Vec<Campaign> =
        sqlx::query_as("SELECT * FROM campaigns WHERE created_by = ? ORDER BY created_at DESC LIMIT ?")
            .bind(&user.id)
            .bind(RECENT_CAMPAIGNS)
            .fetch_all(&state.db)
            .await?;
    let recent: Vec<RecentCampaign> = recent.into_iter().map(RecentCampaign::from).collect();

    Ok(ApiResponse::ok(json!({
        "stats": {
            "campaigns": {
                "total": total,
                "active": active,
                "completed": completed,
            },
            "segments": {
                "total": segments,
                "totalAudience": audience,
            },
            "performance": {
                "messagesSent": sent,
                "avgOpenRate": percentage(opened, sent),
                "avgClickRate": percentage(clicked, opened),
            },
        },
        "recentCampaigns": recent,
    })))
}

/// Admin: every active operator account, newest first
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let users: Vec<User> = sqlx::query_as(
        "SELECT * FROM users WHERE is_active = 1 AND role != 'customer' ORDER BY created_at DESC",
    )
    .fetch_all(&state.db)
    .await?;

    let users: Vec<UserResponse> = users.into_iter().map(UserResponse::from).collect();
    Ok(ApiResponse::ok(json!({ "users": users })).with_count(users.len()))
}
