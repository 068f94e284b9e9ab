//! Campaign models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use super::common::{parse_json_column, round1};
use super::segment::SegmentSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Completed,
    Failed,
    Paused,
}

impl CampaignStatus {
    pub const ALL: [CampaignStatus; 6] = [
        CampaignStatus::Draft,
        CampaignStatus::Scheduled,
        CampaignStatus::Sending,
        CampaignStatus::Completed,
        CampaignStatus::Failed,
        CampaignStatus::Paused,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CampaignStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown campaign status: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignType {
    Email,
    Sms,
    Push,
    Social,
}

impl CampaignType {
    pub const ALL: [CampaignType; 4] = [
        CampaignType::Email,
        CampaignType::Sms,
        CampaignType::Push,
        CampaignType::Social,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Email => "email",
            Self::Sms => "sms",
            Self::Push => "push",
            Self::Social => "social",
        }
    }
}

impl fmt::Display for CampaignType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CampaignType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown campaign type: {}", s))
    }
}

pub const RECURRING_PATTERNS: [&str; 3] = ["daily", "weekly", "monthly"];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub campaign_type: String,
    pub status: String,
    pub audience_segment_id: String,
    pub subject: Option<String>,
    pub message: String,
    pub template: Option<String>,
    pub send_at: Option<String>,
    pub timezone: String,
    pub is_recurring: bool,
    pub recurring_pattern: Option<String>,
    pub track_opens: bool,
    pub track_clicks: bool,
    pub allow_unsubscribe: bool,
    pub audience_size: i64,
    pub sent: i64,
    pub delivered: i64,
    pub failed: i64,
    pub opened: i64,
    pub clicked: i64,
    pub unsubscribed: i64,
    pub bounced: i64,
    /// JSON array of tag strings
    pub tags: Option<String>,
    pub created_by: String,
    pub sent_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Campaign {
    /// Unknown stored values read as draft so the row stays editable
    pub fn status_enum(&self) -> CampaignStatus {
        self.status.parse().unwrap_or(CampaignStatus::Draft)
    }

    pub fn metrics(&self) -> CampaignMetrics {
        CampaignMetrics {
            audience_size: self.audience_size,
            sent: self.sent,
            delivered: self.delivered,
            failed: self.failed,
            opened: self.opened,
            clicked: self.clicked,
            unsubscribed: self.unsubscribed,
            bounced: self.bounced,
        }
    }

    pub fn get_tags(&self) -> Vec<String> {
        parse_json_column(self.tags.as_deref())
    }

    pub fn to_response(&self, segment: Option<SegmentSummary>) -> CampaignResponse {
        let metrics = self.metrics();
        let rates = metrics.rates();
        CampaignResponse {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            campaign_type: self.campaign_type.clone(),
            status: self.status.clone(),
            audience_segment_id: self.audience_segment_id.clone(),
            audience_segment: segment,
            content: CampaignContent {
                subject: self.subject.clone(),
                message: self.message.clone(),
                template: self.template.clone(),
            },
            scheduling: CampaignScheduling {
                send_at: self.send_at.clone(),
                timezone: self.timezone.clone(),
                is_recurring: self.is_recurring,
                recurring_pattern: self.recurring_pattern.clone(),
            },
            settings: CampaignSettings {
                track_opens: self.track_opens,
                track_clicks: self.track_clicks,
                allow_unsubscribe: self.allow_unsubscribe,
            },
            metrics,
            delivery_rate: rates.delivery_rate,
            open_rate: rates.open_rate,
            click_rate: rates.click_rate,
            tags: self.get_tags(),
            created_by: self.created_by.clone(),
            sent_at: self.sent_at.clone(),
            completed_at: self.completed_at.clone(),
            error_message: self.error_message.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignMetrics {
    pub audience_size: i64,
    pub sent: i64,
    pub delivered: i64,
    pub failed: i64,
    pub opened: i64,
    pub clicked: i64,
    pub unsubscribed: i64,
    pub bounced: i64,
}

impl CampaignMetrics {
    /// Zeroed counters that remember the targeted audience
    pub fn for_audience(audience_size: i64) -> Self {
        Self {
            audience_size,
            ..Self::default()
        }
    }

    pub fn rates(&self) -> DeliveryRates {
        DeliveryRates {
            delivery_rate: percentage(self.delivered, self.sent),
            open_rate: percentage(self.opened, self.delivered),
            click_rate: percentage(self.clicked, self.opened),
        }
    }
}

/// Percentages derived from the raw counters, one decimal place
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRates {
    pub delivery_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
}

/// `numerator / denominator * 100` rounded to one decimal; 0 when the denominator is 0.
/// Clamped to `[0, 100]` since counters may be rewritten out of step by demo tooling.
pub fn percentage(numerator: i64, denominator: i64) -> f64 {
    if denominator <= 0 {
        return 0.0;
    }
    let pct = numerator.max(0) as f64 / denominator as f64 * 100.0;
    round1(pct.min(100.0))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignContent {
    pub subject: Option<String>,
    pub message: String,
    pub template: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignScheduling {
    pub send_at: Option<String>,
    pub timezone: String,
    pub is_recurring: bool,
    pub recurring_pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSettings {
    pub track_opens: bool,
    pub track_clicks: bool,
    pub allow_unsubscribe: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignResponse {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub campaign_type: String,
    pub status: String,
    pub audience_segment_id: String,
    /// `None` when the referenced segment no longer exists
    pub audience_segment: Option<SegmentSummary>,
    pub content: CampaignContent,
    pub scheduling: CampaignScheduling,
    pub settings: CampaignSettings,
    pub metrics: CampaignMetrics,
    pub delivery_rate: f64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub tags: Vec<String>,
    pub created_by: String,
    pub sent_at: Option<String>,
    pub completed_at: Option<String>,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentInput {
    pub subject: Option<String>,
    pub message: String,
    pub template: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingInput {
    pub send_at: Option<String>,
    pub timezone: Option<String>,
    pub is_recurring: Option<bool>,
    pub recurring_pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsInput {
    pub track_opens: Option<bool>,
    pub track_clicks: Option<bool>,
    pub allow_unsubscribe: Option<bool>,
}

/// Body for both creating and editing a campaign
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub campaign_type: Option<String>,
    pub audience_segment: String,
    pub content: ContentInput,
    #[serde(default)]
    pub scheduling: Option<SchedulingInput>,
    #[serde(default)]
    pub settings: Option<SettingsInput>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct CampaignListQuery {
    pub status: Option<String>,
    #[serde(rename = "type")]
    pub campaign_type: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}
