//! Campaign endpoints: CRUD plus the send / pause / reset lifecycle actions.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use axum_extra::extract::WithRejection;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::audience::find_owned_segment;
use super::auth::AdminUser;
use super::error::{ApiError, ValidationErrorBuilder};
use super::response::{page_params, ApiResponse, PageInfo};
use super::validation::{
    validate_campaign_description, validate_campaign_type, validate_message, validate_name,
    validate_recurring, validate_send_at, validate_subject,
};
use crate::db::{
    self, normalize_tags, percentage, serialize_json_list, Campaign, CampaignListQuery, CampaignRequest,
    CampaignResponse, CampaignStatus, CampaignType, SegmentSummary, User,
};
use crate::engine::{check_transition, CampaignAction, SendStart, TransitionError};
use crate::{AppState, DbPool};

const DEFAULT_PAGE_SIZE: i64 = 10;

/// A campaign body after validation, ready to bind
#[derive(Debug)]
struct CampaignFields {
    name: String,
    description: Option<String>,
    campaign_type: CampaignType,
    audience_segment_id: String,
    subject: Option<String>,
    message: String,
    template: Option<String>,
    send_at: Option<DateTime<Utc>>,
    timezone: String,
    is_recurring: bool,
    recurring_pattern: Option<String>,
    track_opens: bool,
    track_clicks: bool,
    allow_unsubscribe: bool,
    tags: Vec<String>,
}

impl CampaignFields {
    /// Status a draft-like campaign should hold given its send time
    fn initial_status(&self, now: DateTime<Utc>) -> CampaignStatus {
        match self.send_at {
            Some(at) if at > now => CampaignStatus::Scheduled,
            _ => CampaignStatus::Draft,
        }
    }
}

fn validate_campaign_request(request: CampaignRequest) -> Result<CampaignFields, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_name(&request.name));
    errors.check("description", validate_campaign_description(&request.description));

    let campaign_type = match validate_campaign_type(&request.campaign_type) {
        Ok(t) => t,
        Err(e) => {
            errors.add("type", e);
            CampaignType::Email
        }
    };

    if request.audience_segment.trim().is_empty() {
        errors.add("audienceSegment", "Audience segment is required");
    }

    errors.check("content.subject", validate_subject(campaign_type, &request.content.subject));
    errors.check("content.message", validate_message(&request.content.message));

    let scheduling = request.scheduling.unwrap_or_default();
    let send_at = match validate_send_at(&scheduling.send_at) {
        Ok(at) => at,
        Err(e) => {
            errors.add("scheduling.sendAt", e);
            None
        }
    };
    let is_recurring = scheduling.is_recurring.unwrap_or(false);
    errors.check(
        "scheduling.recurringPattern",
        validate_recurring(is_recurring, &scheduling.recurring_pattern),
    );

    errors.finish()?;

    let settings = request.settings.unwrap_or_default();
    let subject = request
        .content
        .subject
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    Ok(CampaignFields {
        name: request.name.trim().to_string(),
        description: request.description.map(|d| d.trim().to_string()),
        campaign_type,
        audience_segment_id: request.audience_segment.trim().to_string(),
        subject,
        message: request.content.message,
        template: request.content.template,
        send_at,
        timezone: scheduling
            .timezone
            .map(|tz| tz.trim().to_string())
            .filter(|tz| !tz.is_empty())
            .unwrap_or_else(|| "UTC".to_string()),
        is_recurring,
        recurring_pattern: scheduling.recurring_pattern,
        track_opens: settings.track_opens.unwrap_or(true),
        track_clicks: settings.track_clicks.unwrap_or(true),
        allow_unsubscribe: settings.allow_unsubscribe.unwrap_or(true),
        tags: normalize_tags(request.tags.as_deref().unwrap_or_default()),
    })
}

/// Summary of a campaign's segment, `None` when it no longer exists
async fn segment_summary(pool: &DbPool, segment_id: &str) -> Result<Option<SegmentSummary>, sqlx::Error> {
    let row: Option<(String, String, i64)> =
        sqlx::query_as("SELECT id, name, audience_size FROM audience_segments WHERE id = ?")
            .bind(segment_id)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(|(id, name, audience_size)| SegmentSummary {
        id,
        name,
        audience_size,
    }))
}

async fn campaign_response(pool: &DbPool, campaign: &Campaign) -> Result<CampaignResponse, sqlx::Error> {
    let segment = segment_summary(pool, &campaign.audience_segment_id).await?;
    Ok(campaign.to_response(segment))
}

async fn find_owned_campaign(state: &AppState, id: &str, user: &User) -> Result<Campaign, ApiError> {
    sqlx::query_as("SELECT * FROM campaigns WHERE id = ? AND created_by = ?")
        .bind(id)
        .bind(&user.id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Campaign not found"))
}

async fn load_campaign(pool: &DbPool, id: &str) -> Result<Campaign, sqlx::Error> {
    sqlx::query_as("SELECT * FROM campaigns WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
}

/// List the caller's campaigns with optional status/type filters
pub async fn list_campaigns(
    State(state): State<Arc<AppState>>,
    user: User,
    WithRejection(Query(query), _): WithRejection<Query<CampaignListQuery>, ApiError>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let (page, limit) = page_params(query.page, query.limit, DEFAULT_PAGE_SIZE);
    let offset = (page - 1) * limit;

    let status = query.status.filter(|s| !s.is_empty());
    let campaign_type = query.campaign_type.filter(|t| !t.is_empty());

    let mut filter = String::from("WHERE created_by = ?");
    if status.is_some() {
        filter.push_str(" AND status = ?");
    }
    if campaign_type.is_some() {
        filter.push_str(" AND campaign_type = ?");
    }

    let list_sql = format!("SELECT * FROM campaigns {} ORDER BY created_at DESC LIMIT ? OFFSET ?", filter);
    let mut list = sqlx::query_as::<_, Campaign>(&list_sql).bind(&user.id);
    let count_sql = format!("SELECT COUNT(*) FROM campaigns {}", filter);
    let mut count = sqlx::query_as::<_, (i64,)>(&count_sql).bind(&user.id);

    if let Some(status) = &status {
        list = list.bind(status);
        count = count.bind(status);
    }
    if let Some(campaign_type) = &campaign_type {
        list = list.bind(campaign_type);
        count = count.bind(campaign_type);
    }

    let campaigns = list.bind(limit).bind(offset).fetch_all(&state.db).await?;
    let (total,) = count.fetch_one(&state.db).await?;

    let mut responses = Vec::with_capacity(campaigns.len());
    for campaign in &campaigns {
        responses.push(campaign_response(&state.db, campaign).await?);
    }

    let info = PageInfo::new(responses.len(), total, page, limit);
    Ok(ApiResponse::ok(json!({ "campaigns": responses })).with_page(info))
}

/// Create a campaign against one of the caller's active segments
pub async fn create_campaign(
    State(state): State<Arc<AppState>>,
    user: User,
    WithRejection(Json(request), _): WithRejection<Json<CampaignRequest>, ApiError>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let fields = validate_campaign_request(request)?;

    let segment = find_owned_segment(&state.db, &fields.audience_segment_id, &user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Audience segment not found or inactive"))?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = Utc::now();
    let status = fields.initial_status(now);
    let now = db::timestamp(now);

    sqlx::query(
        r#"
        INSERT INTO campaigns (
            id, name, description, campaign_type, status, audience_segment_id,
            subject, message, template, send_at, timezone, is_recurring, recurring_pattern,
            track_opens, track_clicks, allow_unsubscribe, audience_size, tags,
            created_by, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&fields.name)
    .bind(&fields.description)
    .bind(fields.campaign_type.as_str())
    .bind(status.as_str())
    .bind(&segment.id)
    .bind(&fields.subject)
    .bind(&fields.message)
    .bind(&fields.template)
    .bind(fields.send_at.map(db::timestamp))
    .bind(&fields.timezone)
    .bind(fields.is_recurring)
    .bind(&fields.recurring_pattern)
    .bind(fields.track_opens)
    .bind(fields.track_clicks)
    .bind(fields.allow_unsubscribe)
    .bind(segment.audience_size)
    .bind(serialize_json_list(&fields.tags))
    .bind(&user.id)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    sqlx::query("UPDATE audience_segments SET usage_count = usage_count + 1 WHERE id = ?")
        .bind(&segment.id)
        .execute(&state.db)
        .await?;

    tracing::info!(
        campaign_id = %id,
        segment_id = %segment.id,
        status = %status,
        audience_size = segment.audience_size,
        "Created campaign"
    );

    let campaign = load_campaign(&state.db, &id).await?;
    Ok(ApiResponse::created(
        "Campaign created successfully",
        json!({ "campaign": campaign.to_response(Some(segment.to_summary())) }),
    ))
}

pub async fn get_campaign(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let campaign = find_owned_campaign(&state, &id, &user).await?;
    let response = campaign_response(&state.db, &campaign).await?;
    Ok(ApiResponse::ok(json!({ "campaign": response })))
}

/// Replace a campaign's definition while it is still editable
pub async fn update_campaign(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    WithRejection(Json(request), _): WithRejection<Json<CampaignRequest>, ApiError>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let campaign = find_owned_campaign(&state, &id, &user).await?;
    let current = check_transition(campaign.status_enum(), CampaignAction::Edit)?;
    let fields = validate_campaign_request(request)?;

    let mut audience_size = campaign.audience_size;
    if fields.audience_segment_id != campaign.audience_segment_id {
        let segment = find_owned_segment(&state.db, &fields.audience_segment_id, &user.id)
            .await?
            .ok_or_else(|| ApiError::not_found("Audience segment not found or inactive"))?;
        audience_size = segment.audience_size;
    }

    let now = Utc::now();
    let status = match current {
        CampaignStatus::Draft | CampaignStatus::Scheduled => fields.initial_status(now),
        other => other,
    };

    let result = sqlx::query(
        r#"
        UPDATE campaigns SET
            name = ?, description = ?, campaign_type = ?, status = ?, audience_segment_id = ?,
            subject = ?, message = ?, template = ?, send_at = ?, timezone = ?,
            is_recurring = ?, recurring_pattern = ?, track_opens = ?, track_clicks = ?,
            allow_unsubscribe = ?, audience_size = ?, tags = ?, updated_at = ?
        WHERE id = ? AND status = ?
        "#,
    )
    .bind(&fields.name)
    .bind(&fields.description)
    .bind(fields.campaign_type.as_str())
    .bind(status.as_str())
    .bind(&fields.audience_segment_id)
    .bind(&fields.subject)
    .bind(&fields.message)
    .bind(&fields.template)
    .bind(fields.send_at.map(db::timestamp))
    .bind(&fields.timezone)
    .bind(fields.is_recurring)
    .bind(&fields.recurring_pattern)
    .bind(fields.track_opens)
    .bind(fields.track_clicks)
    .bind(fields.allow_unsubscribe)
    .bind(audience_size)
    .bind(serialize_json_list(&fields.tags))
    .bind(db::timestamp(now))
    .bind(&id)
    .bind(&campaign.status)
    .execute(&state.db)
    .await?;

    // Status moved underneath us (e.g. a send started)
    if result.rows_affected() == 0 {
        return Err(TransitionError::NotEditable(CampaignStatus::Sending).into());
    }

    tracing::info!(campaign_id = %id, status = %status, "Updated campaign");

    let campaign = load_campaign(&state.db, &id).await?;
    let response = campaign_response(&state.db, &campaign).await?;
    Ok(ApiResponse::ok(json!({ "campaign": response })).with_message("Campaign updated successfully"))
}

/// Hard delete, unless the campaign is sending or completed
pub async fn delete_campaign(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<ApiResponse<()>, ApiError> {
    let campaign = find_owned_campaign(&state, &id, &user).await?;
    check_transition(campaign.status_enum(), CampaignAction::Delete)?;

    let result = sqlx::query("DELETE FROM campaigns WHERE id = ? AND status NOT IN ('sending', 'completed')")
        .bind(&id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(TransitionError::NotDeletable(CampaignStatus::Sending).into());
    }

    state.dispatcher.cancel(&id);
    tracing::info!(campaign_id = %id, "Deleted campaign");
    Ok(ApiResponse::message("Campaign deleted successfully"))
}

/// Start sending a draft or scheduled campaign
pub async fn send_campaign(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let campaign = find_owned_campaign(&state, &id, &user).await?;
    let status = campaign.status_enum();
    check_transition(status, CampaignAction::Send)?;

    if state.dispatcher.start(&id).await? == SendStart::Rejected {
        return Err(TransitionError::NotSendable(status).into());
    }

    let campaign = load_campaign(&state.db, &id).await?;
    let response = campaign_response(&state.db, &campaign).await?;
    Ok(ApiResponse::ok(json!({ "campaign": response })).with_message("Campaign sent successfully"))
}

/// Pause a campaign that is currently sending
pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let campaign = find_owned_campaign(&state, &id, &user).await?;
    let status = campaign.status_enum();
    check_transition(status, CampaignAction::Pause)?;

    let result = sqlx::query("UPDATE campaigns SET status = 'paused', updated_at = ? WHERE id = ? AND status = 'sending'")
        .bind(db::now())
        .bind(&id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(TransitionError::NotSending(status).into());
    }

    state.dispatcher.cancel(&id);
    tracing::info!(campaign_id = %id, "Paused campaign");

    let campaign = load_campaign(&state.db, &id).await?;
    let response = campaign_response(&state.db, &campaign).await?;
    Ok(ApiResponse::ok(json!({ "campaign": response })).with_message("Campaign paused successfully"))
}

/// Admin-only: return any campaign to draft with zeroed metrics
pub async fn reset_campaign(
    State(state): State<Arc<AppState>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let campaign: Campaign = sqlx::query_as("SELECT * FROM campaigns WHERE id = ?")
        .bind(&id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Campaign not found"))?;
    check_transition(campaign.status_enum(), CampaignAction::Reset)?;

    state.dispatcher.cancel(&id);

    sqlx::query(
        r#"
        UPDATE campaigns SET
            status = 'draft', sent_at = NULL, completed_at = NULL, error_message = NULL,
            sent = 0, delivered = 0, failed = 0, opened = 0, clicked = 0,
            unsubscribed = 0, bounced = 0, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(db::now())
    .bind(&id)
    .execute(&state.db)
    .await?;

    tracing::info!(campaign_id = %id, admin_id = %admin.id, previous = %campaign.status, "Reset campaign to draft");

    let campaign = load_campaign(&state.db, &id).await?;
    let response = campaign_response(&state.db, &campaign).await?;
    Ok(ApiResponse::ok(json!({ "campaign": response })).with_message("Campaign reset to draft successfully"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricTotals {
    total_sent: i64,
    total_delivered: i64,
    total_opened: i64,
    total_clicked: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Averages {
    delivery_rate: f64,
    open_rate: f64,
    click_rate: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CampaignStats {
    total: i64,
    by_status: BTreeMap<&'static str, i64>,
    by_type: BTreeMap<&'static str, i64>,
    metrics: MetricTotals,
    #[serde(skip_serializing_if = "Option::is_none")]
    averages: Option<Averages>,
}

fn tally<T: Copy>(
    rows: &[(String, i64)],
    all: impl IntoIterator<Item = T>,
    name: impl Fn(T) -> &'static str,
) -> BTreeMap<&'static str, i64> {
    all.into_iter()
        .map(|item| {
            let key = name(item);
            let count = rows.iter().find(|(k, _)| k == key).map(|(_, c)| *c).unwrap_or(0);
            (key, count)
        })
        .collect()
}

/// Counts by status and type plus summed delivery metrics for the caller
pub async fn campaign_stats(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let by_status: Vec<(String, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM campaigns WHERE created_by = ? GROUP BY status")
            .bind(&user.id)
            .fetch_all(&state.db)
            .await?;

    let by_type: Vec<(String, i64)> =
        sqlx::query_as("SELECT campaign_type, COUNT(*) FROM campaigns WHERE created_by = ? GROUP BY campaign_type")
            .bind(&user.id)
            .fetch_all(&state.db)
            .await?;

    let (total, sent, delivered, opened, clicked): (i64, i64, i64, i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*), COALESCE(SUM(sent), 0), COALESCE(SUM(delivered), 0),
               COALESCE(SUM(opened), 0), COALESCE(SUM(clicked), 0)
        FROM campaigns WHERE created_by = ?
        "#,
    )
    .bind(&user.id)
    .fetch_one(&state.db)
    .await?;

    let by_status = tally(&by_status, CampaignStatus::ALL, |s| s.as_str());
    let by_type = tally(&by_type, CampaignType::ALL, |t| t.as_str());

    let averages = (by_status.get("completed").copied().unwrap_or(0) > 0).then(|| Averages {
        delivery_rate: percentage(delivered, sent),
        open_rate: percentage(opened, delivered),
        click_rate: percentage(clicked, opened),
    });

    let stats = CampaignStats {
        total,
        by_status,
        by_type,
        metrics: MetricTotals {
            total_sent: sent,
            total_delivered: delivered,
            total_opened: opened,
            total_clicked: clicked,
        },
        averages,
    };

    Ok(ApiResponse::ok(json!({ "stats": stats })))
}
