//! Analytics dashboard and the demo/debug helpers.
//!
//! The dashboard is computed with SQL aggregates over the caller's campaigns and
//! segments. The debug routes are only mounted when `debug.enabled` is set and
//! are unauthenticated.

use axum::{extract::State, Json};
use axum_extra::extract::WithRejection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::FromRow;
use std::sync::Arc;

use super::error::ApiError;
use super::response::ApiResponse;
use crate::db::{self, round1, Campaign, User};
use crate::{AppState, DbPool};

const ACTIVITY_WINDOW_DAYS: i64 = 30;
const TOP_CAMPAIGNS: i64 = 5;

#[derive(Debug, Clone, Copy, Default, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryTotals {
    pub total_sent: i64,
    pub total_delivered: i64,
    pub total_failed: i64,
    pub total_opened: i64,
    pub total_clicked: i64,
}

impl DeliveryTotals {
    /// Chart slices with zero-count entries dropped
    fn chart(&self) -> Vec<ChartSlice> {
        let pending = (self.total_sent - self.total_delivered - self.total_failed).max(0);
        [
            ("sent", self.total_sent),
            ("delivered", self.total_delivered),
            ("failed", self.total_failed),
            ("pending", pending),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(label, count)| ChartSlice { label, count })
        .collect()
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ChartSlice {
    pub label: &'static str,
    pub count: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct PerformancePoint {
    pub date: String,
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct TypeBreakdown {
    #[serde(rename = "type")]
    pub campaign_type: String,
    pub count: i64,
    pub completed: i64,
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AudienceTrend {
    pub date: String,
    pub total_audience_size: i64,
    pub segment_count: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct ActivityPoint {
    pub date: String,
    pub sent: i64,
    pub failed: i64,
    pub pending: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopCampaign {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub campaign_type: String,
    pub status: String,
    pub total_sent: i64,
    pub total_failed: i64,
    pub total_delivered: i64,
    pub success_rate: f64,
    pub created_at: String,
}

impl From<Campaign> for TopCampaign {
    fn from(c: Campaign) -> Self {
        let success_rate = if c.sent > 0 {
            round1(c.delivered as f64 / c.sent as f64 * 100.0)
        } else {
            0.0
        };
        Self {
            id: c.id,
            name: c.name,
            campaign_type: c.campaign_type,
            status: c.status,
            total_sent: c.sent,
            total_failed: c.failed,
            total_delivered: c.delivered,
            success_rate,
            created_at: c.created_at,
        }
    }
}

/// Best delivery ratio first, larger sends breaking ties
fn rank_top_campaigns(campaigns: Vec<Campaign>, limit: usize) -> Vec<TopCampaign> {
    let mut ranked: Vec<TopCampaign> = campaigns.into_iter().map(TopCampaign::from).collect();
    ranked.sort_by(|a, b| {
        b.success_rate
            .total_cmp(&a.success_rate)
            .then(b.total_sent.cmp(&a.total_sent))
    });
    ranked.truncate(limit);
    ranked
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    pub total_campaigns: i64,
    pub total_customers: i64,
    pub total_audience_segments: i64,
    pub total_messages: i64,
    pub successful_messages: i64,
    pub overall_success_rate: f64,
}

const DELIVERY_TOTALS_SQL: &str = r#"
    SELECT COALESCE(SUM(sent), 0) AS total_sent,
           COALESCE(SUM(delivered), 0) AS total_delivered,
           COALESCE(SUM(failed), 0) AS total_failed,
           COALESCE(SUM(opened), 0) AS total_opened,
           COALESCE(SUM(clicked), 0) AS total_clicked
    FROM campaigns
"#;

async fn delivery_totals(pool: &DbPool, owner: Option<&str>) -> Result<DeliveryTotals, sqlx::Error> {
    match owner {
        Some(owner) => {
            let sql = format!("{} WHERE created_by = ?", DELIVERY_TOTALS_SQL);
            sqlx::query_as(&sql).bind(owner).fetch_one(pool).await
        }
        None => sqlx::query_as(DELIVERY_TOTALS_SQL).fetch_one(pool).await,
    }
}

async fn type_breakdown(pool: &DbPool, owner: Option<&str>) -> Result<Vec<TypeBreakdown>, sqlx::Error> {
    let filter = if owner.is_some() { "WHERE created_by = ?" } else { "" };
    let sql = format!(
        r#"
        SELECT campaign_type,
               COUNT(*) AS count,
               COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0) AS completed
        FROM campaigns {}
        GROUP BY campaign_type
        ORDER BY campaign_type
        "#,
        filter
    );
    let mut query = sqlx::query_as::<_, TypeBreakdown>(&sql);
    if let Some(owner) = owner {
        query = query.bind(owner);
    }
    query.fetch_all(pool).await
}

/// Charts, key metrics and top campaigns for the caller
pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let pool = &state.db;
    let since = db::timestamp(chrono::Utc::now() - chrono::Duration::days(ACTIVITY_WINDOW_DAYS));

    let campaign_performance: Vec<PerformancePoint> = sqlx::query_as(
        r#"
        SELECT substr(created_at, 1, 10) AS date, status, COUNT(*) AS count
        FROM campaigns
        WHERE created_by = ? AND created_at >= ?
        GROUP BY date, status
        ORDER BY date, status
        "#,
    )
    .bind(&user.id)
    .bind(&since)
    .fetch_all(pool)
    .await?;

    let totals = delivery_totals(pool, Some(user.id.as_str())).await?;
    let campaign_types = type_breakdown(pool, Some(user.id.as_str())).await?;

    let audience_trends: Vec<AudienceTrend> = sqlx::query_as(
        r#"
        SELECT substr(created_at, 1, 10) AS date,
               COALESCE(SUM(audience_size), 0) AS total_audience_size,
               COUNT(*) AS segment_count
        FROM audience_segments
        WHERE created_by = ?
        GROUP BY date
        ORDER BY date
        "#,
    )
    .bind(&user.id)
    .fetch_all(pool)
    .await?;

    let recent_activity: Vec<ActivityPoint> = sqlx::query_as(
        r#"
        SELECT substr(created_at, 1, 10) AS date,
               COALESCE(SUM(sent), 0) AS sent,
               COALESCE(SUM(failed), 0) AS failed,
               COALESCE(SUM(MAX(sent - delivered - failed, 0)), 0) AS pending
        FROM campaigns
        WHERE created_by = ? AND created_at >= ?
        GROUP BY date
        ORDER BY date
        "#,
    )
    .bind(&user.id)
    .bind(&since)
    .fetch_all(pool)
    .await?;

    let campaigns: Vec<Campaign> = sqlx::query_as("SELECT * FROM campaigns WHERE created_by = ?")
        .bind(&user.id)
        .fetch_all(pool)
        .await?;
    let total_campaigns = campaigns.len() as i64;
    let top_campaigns = rank_top_campaigns(campaigns, TOP_CAMPAIGNS as usize);

    let (total_customers,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE role = 'customer'")
        .fetch_one(pool)
        .await?;
    let (total_segments,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM audience_segments WHERE created_by = ?")
            .bind(&user.id)
            .fetch_one(pool)
            .await?;

    let overall_success_rate = if totals.total_sent > 0 {
        round1(totals.total_delivered as f64 / totals.total_sent as f64 * 100.0)
    } else {
        0.0
    };

    let metrics = DashboardMetrics {
        total_campaigns,
        total_customers,
        total_audience_segments: total_segments,
        total_messages: totals.total_sent,
        successful_messages: totals.total_delivered,
        overall_success_rate,
    };

    tracing::debug!(
        user_id = %user.id,
        campaigns = total_campaigns,
        performance_points = campaign_performance.len(),
        "Built analytics dashboard"
    );

    Ok(ApiResponse::ok(json!({
        "metrics": metrics,
        "charts": {
            "campaignPerformance": campaign_performance,
            "deliveryStats": totals.chart(),
            "campaignTypes": campaign_types,
            "audienceTrends": audience_trends,
            "recentActivity": recent_activity,
        },
        "topCampaigns": top_campaigns,
    })))
}

#[derive(Debug, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
struct CampaignDigest {
    id: String,
    name: String,
    status: String,
    #[serde(rename = "type")]
    campaign_type: String,
    sent: i64,
    delivered: i64,
    failed: i64,
    opened: i64,
    clicked: i64,
    created_by: String,
    created_at: String,
}

/// Debug: delivery aggregates across every user
pub async fn debug_overview(
    State(state): State<Arc<AppState>>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let totals = delivery_totals(&state.db, None).await?;
    let campaign_types = type_breakdown(&state.db, None).await?;
    let campaigns: Vec<CampaignDigest> = sqlx::query_as(
        r#"
        SELECT id, name, status, campaign_type, sent, delivered, failed, opened, clicked,
               created_by, created_at
        FROM campaigns ORDER BY created_at DESC
        "#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(ApiResponse::ok(json!({
        "deliveryStats": totals,
        "campaignTypes": campaign_types,
        "totalCampaigns": campaigns.len(),
        "allCampaigns": campaigns,
    })))
}

/// Debug: row counts and one sample campaign
pub async fn debug_counts(
    State(state): State<Arc<AppState>>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let (campaigns,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM campaigns")
        .fetch_one(&state.db)
        .await?;
    let (users,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(&state.db)
        .await?;
    let (segments,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM audience_segments")
        .fetch_one(&state.db)
        .await?;
    let sample: Option<Campaign> = sqlx::query_as("SELECT * FROM campaigns ORDER BY created_at LIMIT 1")
        .fetch_optional(&state.db)
        .await?;

    Ok(ApiResponse::ok(json!({
        "campaignCount": campaigns,
        "userCount": users,
        "segmentCount": segments,
        "sampleCampaign": sample.map(|c| c.to_response(None)),
    })))
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DemoMetrics {
    pub audience_size: i64,
    pub sent: i64,
    pub delivered: i64,
    pub failed: i64,
    pub opened: i64,
    pub clicked: i64,
}

impl Default for DemoMetrics {
    fn default() -> Self {
        Self {
            audience_size: 1,
            sent: 1,
            delivered: 1,
            failed: 0,
            opened: 1,
            clicked: 0,
        }
    }
}

/// Debug: mark every campaign completed with the given counters
pub async fn reset_demo(
    State(state): State<Arc<AppState>>,
    body: Option<Json<DemoMetrics>>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let metrics = body.map(|Json(m)| m).unwrap_or_default();

    state.dispatcher.cancel_all();
    let result = sqlx::query(
        r#"
        UPDATE campaigns SET
            status = 'completed', audience_size = ?, sent = ?, delivered = ?,
            failed = ?, opened = ?, clicked = ?, updated_at = ?
        "#,
    )
    .bind(metrics.audience_size)
    .bind(metrics.sent)
    .bind(metrics.delivered)
    .bind(metrics.failed)
    .bind(metrics.opened)
    .bind(metrics.clicked)
    .bind(db::now())
    .execute(&state.db)
    .await?;

    tracing::warn!(campaigns = result.rows_affected(), "Demo metrics reset");
    Ok(ApiResponse::ok(json!({ "metrics": metrics })).with_message("Demo data reset to realistic values"))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulateDeliveryRequest {
    pub campaign_id: String,
}

/// Debug: put one campaign into a pending-delivery state
pub async fn simulate_delivery(
    State(state): State<Arc<AppState>>,
    WithRejection(Json(request), _): WithRejection<Json<SimulateDeliveryRequest>, ApiError>,
) -> Result<ApiResponse<()>, ApiError> {
    state.dispatcher.cancel(&request.campaign_id);
    let result = sqlx::query(
        r#"
        UPDATE campaigns SET
            status = 'sending', sent = 150, delivered = 0, failed = 5, opened = 0, clicked = 0,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(db::now())
    .bind(&request.campaign_id)
    .execute(&state.db)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Campaign not found"));
    }

    Ok(ApiResponse::message("Demo data updated to pending status"))
}
