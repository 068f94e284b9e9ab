//! Audience segment endpoints.
//!
//! Segments are scoped to their owner; every lookup filters on `created_by`
//! so a segment belonging to someone else reads as not found.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use axum_extra::extract::WithRejection;
use serde_json::json;
use std::sync::Arc;

use super::error::{ApiError, ValidationErrorBuilder};
use super::response::ApiResponse;
use super::validation::{validate_name, validate_segment_description};
use crate::db::{
    self, normalize_tags, serialize_json_list, AudienceSegment, PopularSegmentsQuery,
    PreviewRulesRequest, SegmentRequest, User,
};
use crate::segments::{parse_rules, AudienceEstimate, Rule};
use crate::{AppState, DbPool};

const DEFAULT_POPULAR_LIMIT: i64 = 10;
const MAX_POPULAR_LIMIT: i64 = 50;

/// Validate a create/update body, returning the parsed rule list
fn validate_segment_request(request: &SegmentRequest) -> Result<Vec<Rule>, ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors.check("name", validate_name(&request.name));
    errors.check("description", validate_segment_description(&request.description));
    errors.finish()?;

    Ok(parse_rules(&request.rules)?)
}

async fn estimate(state: &AppState, rules: &[Rule]) -> Result<AudienceEstimate, ApiError> {
    let estimate = state.estimator.estimate(rules).await?;
    tracing::debug!(
        estimator = state.estimator.name(),
        audience_size = estimate.audience_size,
        "Estimated audience"
    );
    Ok(estimate)
}

/// Fetch an active segment owned by `user_id`
pub async fn find_owned_segment(
    pool: &DbPool,
    id: &str,
    user_id: &str,
) -> Result<Option<AudienceSegment>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM audience_segments WHERE id = ? AND created_by = ? AND is_active = 1")
        .bind(id)
        .bind(user_id)
        .fetch_optional(pool)
        .await
}

async fn require_owned_segment(state: &AppState, id: &str, user: &User) -> Result<AudienceSegment, ApiError> {
    find_owned_segment(&state.db, id, &user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("Audience segment not found"))
}

/// Overwrite the stored size fields of a segment
async fn store_estimate(pool: &DbPool, id: &str, estimate: AudienceEstimate) -> Result<(), sqlx::Error> {
    let now = db::now();
    sqlx::query(
        "UPDATE audience_segments SET audience_size = ?, estimated_reach = ?, last_updated = ?, updated_at = ? WHERE id = ?",
    )
    .bind(estimate.audience_size)
    .bind(estimate.estimated_reach)
    .bind(&now)
    .bind(&now)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn load_segment(pool: &DbPool, id: &str) -> Result<AudienceSegment, sqlx::Error> {
    sqlx::query_as("SELECT * FROM audience_segments WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await
}

/// List the caller's active segments, newest first
pub async fn list_segments(
    State(state): State<Arc<AppState>>,
    user: User,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let segments: Vec<AudienceSegment> = sqlx::query_as(
        "SELECT * FROM audience_segments WHERE created_by = ? AND is_active = 1 ORDER BY created_at DESC",
    )
    .bind(&user.id)
    .fetch_all(&state.db)
    .await?;

    let segments: Vec<_> = segments.iter().map(AudienceSegment::to_response).collect();
    Ok(ApiResponse::ok(json!({ "segments": segments })).with_count(segments.len()))
}

/// Create a segment and compute its audience size
pub async fn create_segment(
    State(state): State<Arc<AppState>>,
    user: User,
    WithRejection(Json(request), _): WithRejection<Json<SegmentRequest>, ApiError>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let rules = validate_segment_request(&request)?;
    let tags = normalize_tags(request.tags.as_deref().unwrap_or_default());
    let estimate = estimate(&state, &rules).await?;

    let id = uuid::Uuid::new_v4().to_string();
    let now = db::now();
    let rules_json = serde_json::to_string(&rules).map_err(anyhow::Error::from)?;

    sqlx::query(
        r#"
        INSERT INTO audience_segments (
            id, name, description, rules, audience_size, estimated_reach, tags,
            is_active, created_by, usage_count, last_updated, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, 1, ?, 0, ?, ?, ?)
        "#,
    )
    .bind(&id)
    .bind(request.name.trim())
    .bind(request.description.trim())
    .bind(&rules_json)
    .bind(estimate.audience_size)
    .bind(estimate.estimated_reach)
    .bind(serialize_json_list(&tags))
    .bind(&user.id)
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .execute(&state.db)
    .await?;

    tracing::info!(
        segment_id = %id,
        user_id = %user.id,
        rules = rules.len(),
        audience_size = estimate.audience_size,
        "Created audience segment"
    );

    let segment = load_segment(&state.db, &id).await?;
    Ok(ApiResponse::created(
        "Audience segment created successfully",
        json!({ "segment": segment.to_response() }),
    ))
}

/// Estimate the audience for rules that are not stored anywhere
pub async fn preview_rules(
    State(state): State<Arc<AppState>>,
    _user: User,
    WithRejection(Json(request), _): WithRejection<Json<PreviewRulesRequest>, ApiError>,
) -> Result<ApiResponse<AudienceEstimate>, ApiError> {
    let rules = parse_rules(&request.rules)?;
    let estimate = estimate(&state, &rules).await?;
    Ok(ApiResponse::ok(estimate))
}

/// Active segments ordered by how many campaigns used them
pub async fn popular_segments(
    State(state): State<Arc<AppState>>,
    _user: User,
    WithRejection(Query(query), _): WithRejection<Query<PopularSegmentsQuery>, ApiError>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let limit = query
        .limit
        .filter(|l| *l > 0)
        .unwrap_or(DEFAULT_POPULAR_LIMIT)
        .min(MAX_POPULAR_LIMIT);

    let segments: Vec<AudienceSegment> = sqlx::query_as(
        "SELECT * FROM audience_segments WHERE is_active = 1 ORDER BY usage_count DESC, created_at DESC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(&state.db)
    .await?;

    let segments: Vec<_> = segments.iter().map(AudienceSegment::to_response).collect();
    Ok(ApiResponse::ok(json!({ "segments": segments })).with_count(segments.len()))
}

pub async fn get_segment(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let segment = require_owned_segment(&state, &id, &user).await?;
    Ok(ApiResponse::ok(json!({ "segment": segment.to_response() })))
}

/// Replace a segment's definition and recompute its size
pub async fn update_segment(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
    WithRejection(Json(request), _): WithRejection<Json<SegmentRequest>, ApiError>,
) -> Result<ApiResponse<serde_json::Value>, ApiError> {
    let rules = validate_segment_request(&request)?;
    require_owned_segment(&state, &id, &user).await?;

    // Nothing is written unless the new rules could be sized
    let estimate = estimate(&state, &rules).await?;

    let tags = normalize_tags(request.tags.as_deref().unwrap_or_default());
    let rules_json = serde_json::to_string(&rules).map_err(anyhow::Error::from)?;
    let now = db::now();

    sqlx::query(
        r#"
        UPDATE audience_segments
        SET name = ?, description = ?, rules = ?, tags = ?,
            audience_size = ?, estimated_reach = ?, last_updated = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(request.name.trim())
    .bind(request.description.trim())
    .bind(&rules_json)
    .bind(serialize_json_list(&tags))
    .bind(estimate.audience_size)
    .bind(estimate.estimated_reach)
    .bind(&now)
    .bind(&now)
    .bind(&id)
    .execute(&state.db)
    .await?;

    tracing::info!(segment_id = %id, audience_size = estimate.audience_size, "Updated audience segment");

    let segment = load_segment(&state.db, &id).await?;
    Ok(ApiResponse::ok(json!({ "segment": segment.to_response() }))
        .with_message("Audience segment updated successfully"))
}

/// Soft delete: the row stays, it just stops appearing
pub async fn delete_segment(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<ApiResponse<()>, ApiError> {
    require_owned_segment(&state, &id, &user).await?;

    sqlx::query("UPDATE audience_segments SET is_active = 0, updated_at = ? WHERE id = ?")
        .bind(db::now())
        .bind(&id)
        .execute(&state.db)
        .await?;

    tracing::info!(segment_id = %id, "Deactivated audience segment");
    Ok(ApiResponse::message("Audience segment deleted successfully"))
}

/// Recompute and persist the size of a stored segment
pub async fn preview_segment(
    State(state): State<Arc<AppState>>,
    user: User,
    Path(id): Path<String>,
) -> Result<ApiResponse<AudienceEstimate>, ApiError> {
    let segment = require_owned_segment(&state, &id, &user).await?;
    let rules = segment.get_rules();
    if rules.is_empty() {
        return Err(ApiError::validation_field("rules", "At least one rule is required"));
    }

    let estimate = estimate(&state, &rules).await?;
    store_estimate(&state.db, &id, estimate).await?;
    Ok(ApiResponse::ok(estimate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::segments::{AudienceEstimator, RuleInput};
    use async_trait::async_trait;
    use std::marker::PhantomData;
    use tempfile::TempDir;

    struct FailingEstimator;

    #[async_trait]
    impl AudienceEstimator for FailingEstimator {
        async fn estimate(&self, _rules: &[Rule]) -> anyhow::Result<AudienceEstimate> {
            anyhow::bail!("estimator offline")
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    fn request(rules: Vec<RuleInput>) -> SegmentRequest {
        SegmentRequest {
            name: "VIP".to_string(),
            description: "High value customers".to_string(),
            rules,
            tags: None,
        }
    }

    fn rule(field: &str, operator: &str, value: &str) -> RuleInput {
        RuleInput {
            field: field.to_string(),
            operator: operator.to_string(),
            value: value.to_string(),
            logic: None,
        }
    }

    #[test]
    fn test_empty_rules_rejected() {
        let err = validate_segment_request(&request(vec![])).unwrap_err();
        assert_eq!(err.message(), "At least one rule is required");
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = validate_segment_request(&request(vec![rule("shoeSize", ">", "10")])).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_valid_request_parses_rules() {
        let rules = validate_segment_request(&request(vec![rule("totalSpent", ">", "1000")])).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(rules[0].logic.is_none());
    }

    #[tokio::test]
    async fn test_failed_estimate_leaves_segment_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let pool = db::init(temp_dir.path()).await.unwrap();
        let mut config = Config::default();
        config.server.data_dir = temp_dir.path().to_path_buf();
        let mut state = AppState::new(config, pool.clone());
        state.estimator = Arc::new(FailingEstimator);

        sqlx::query("INSERT INTO users (id, name, email, role) VALUES ('u1', 'Maria', 'maria@example.com', 'user')")
            .execute(&pool)
            .await
            .unwrap();
        let original_rules = r#"[{"field":"visits","operator":">","value":"3","logic":null}]"#;
        sqlx::query(
            "INSERT INTO audience_segments (id, name, description, rules, audience_size, estimated_reach, created_by, last_updated, created_at, updated_at) \
             VALUES ('s1', 'Regulars', 'Frequent visitors', ?, 500, 425, 'u1', 't0', 't0', 't0')",
        )
        .bind(original_rules)
        .execute(&pool)
        .await
        .unwrap();
        let user: User = sqlx::query_as("SELECT * FROM users WHERE id = 'u1'")
            .fetch_one(&pool)
            .await
            .unwrap();

        let result = update_segment(
            State(Arc::new(state)),
            user,
            Path("s1".to_string()),
            WithRejection(Json(request(vec![rule("totalSpent", ">", "1000")])), PhantomData),
        )
        .await;
        assert!(result.is_err());

        let segment = load_segment(&pool, "s1").await.unwrap();
        assert_eq!(segment.name, "Regulars");
        assert_eq!(segment.rules, original_rules);
        assert_eq!(segment.audience_size, 500);
        assert_eq!(segment.updated_at, "t0");
    }

    #[test]
    fn test_name_checked_before_rules() {
        let mut req = request(vec![]);
        req.name = "V".to_string();
        let err = validate_segment_request(&req).unwrap_err();
        assert!(err.message().contains("Name"));
    }
}
