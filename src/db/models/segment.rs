//! Audience segment models and DTOs.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::parse_json_column;
use crate::segments::{Rule, RuleInput};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AudienceSegment {
    pub id: String,
    pub name: String,
    pub description: String,
    /// JSON array of [`Rule`]
    pub rules: String,
    pub audience_size: i64,
    pub estimated_reach: i64,
    /// JSON array of tag strings
    pub tags: Option<String>,
    pub is_active: bool,
    pub created_by: String,
    pub usage_count: i64,
    pub last_updated: String,
    pub created_at: String,
    pub updated_at: String,
}

impl AudienceSegment {
    pub fn get_rules(&self) -> Vec<Rule> {
        parse_json_column(Some(&self.rules))
    }

    pub fn get_tags(&self) -> Vec<String> {
        parse_json_column(self.tags.as_deref())
    }

    pub fn to_response(&self) -> SegmentResponse {
        SegmentResponse {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            rules: self.get_rules(),
            audience_size: self.audience_size,
            estimated_reach: self.estimated_reach,
            tags: self.get_tags(),
            is_active: self.is_active,
            usage_count: self.usage_count,
            created_by: self.created_by.clone(),
            last_updated: self.last_updated.clone(),
            created_at: self.created_at.clone(),
            updated_at: self.updated_at.clone(),
        }
    }

    pub fn to_summary(&self) -> SegmentSummary {
        SegmentSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            audience_size: self.audience_size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub rules: Vec<Rule>,
    pub audience_size: i64,
    pub estimated_reach: i64,
    pub tags: Vec<String>,
    pub is_active: bool,
    pub usage_count: i64,
    pub created_by: String,
    pub last_updated: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Compact segment reference embedded in campaign responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentSummary {
    pub id: String,
    pub name: String,
    pub audience_size: i64,
}

/// Body for both creating and replacing a segment
#[derive(Debug, Deserialize)]
pub struct SegmentRequest {
    pub name: String,
    pub description: String,
    pub rules: Vec<RuleInput>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct PreviewRulesRequest {
    pub rules: Vec<RuleInput>,
}

#[derive(Debug, Deserialize)]
pub struct PopularSegmentsQuery {
    pub limit: Option<i64>,
}
