use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;

use super::matcher::{matches, CustomerFacts};
use super::rules::Rule;
use crate::config::{EstimatorKind, SegmentsConfig};
use crate::db::{DbPool, User};

/// Share of the audience expected to actually be reachable
pub const REACH_RATIO: f64 = 0.85;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudienceEstimate {
    pub audience_size: i64,
    pub estimated_reach: i64,
}

impl AudienceEstimate {
    pub fn from_size(audience_size: i64) -> Self {
        let audience_size = audience_size.max(0);
        Self {
            audience_size,
            estimated_reach: (audience_size as f64 * REACH_RATIO).floor() as i64,
        }
    }
}

/// Produces an audience size for a validated rule list
#[async_trait]
pub trait AudienceEstimator: Send + Sync {
    async fn estimate(&self, rules: &[Rule]) -> Result<AudienceEstimate>;
    fn name(&self) -> &'static str;
}

/// Demo estimator: a uniform draw that ignores the rules
pub struct SimulatedEstimator {
    min: i64,
    span: i64,
}

impl SimulatedEstimator {
    pub fn new(min: i64, span: i64) -> Self {
        Self {
            min: min.max(0),
            span: span.max(1),
        }
    }
}

#[async_trait]
impl AudienceEstimator for SimulatedEstimator {
    async fn estimate(&self, _rules: &[Rule]) -> Result<AudienceEstimate> {
        let size = rand::rng().random_range(self.min..self.min + self.span);
        Ok(AudienceEstimate::from_size(size))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

/// Counts stored customers that satisfy the rules
pub struct CustomerRuleEstimator {
    db: DbPool,
}

impl CustomerRuleEstimator {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AudienceEstimator for CustomerRuleEstimator {
    async fn estimate(&self, rules: &[Rule]) -> Result<AudienceEstimate> {
        let customers: Vec<User> = sqlx::query_as("SELECT * FROM users WHERE role = 'customer'")
            .fetch_all(&self.db)
            .await?;

        let size = customers
            .iter()
            .filter(|customer| matches(rules, &CustomerFacts::from(*customer)))
            .count();

        tracing::debug!(
            customers = customers.len(),
            matched = size,
            "Evaluated segment rules against customers"
        );

        Ok(AudienceEstimate::from_size(size as i64))
    }

    fn name(&self) -> &'static str {
        "customers"
    }
}

pub fn build_estimator(config: &SegmentsConfig, db: DbPool) -> Arc<dyn AudienceEstimator> {
    match config.estimator {
        EstimatorKind::Simulated => Arc::new(SimulatedEstimator::new(
            config.simulated_min,
            config.simulated_span,
        )),
        EstimatorKind::Customers => Arc::new(CustomerRuleEstimator::new(db)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segments::{parse_rules, RuleInput};
    use tempfile::TempDir;

    fn vip_rules() -> Vec<Rule> {
        parse_rules(&[RuleInput {
            field: "totalSpent".to_string(),
            operator: ">".to_string(),
            value: "1000".to_string(),
            logic: None,
        }])
        .unwrap()
    }

    #[test]
    fn test_reach_is_floor_of_85_percent() {
        assert_eq!(AudienceEstimate::from_size(100).estimated_reach, 85);
        assert_eq!(AudienceEstimate::from_size(5099).estimated_reach, 4334);
        assert_eq!(AudienceEstimate::from_size(1).estimated_reach, 0);
        assert_eq!(AudienceEstimate::from_size(0).estimated_reach, 0);
    }

    #[tokio::test]
    async fn test_simulated_range() {
        let estimator = SimulatedEstimator::new(100, 5000);
        let rules = vip_rules();
        for _ in 0..200 {
            let estimate = estimator.estimate(&rules).await.unwrap();
            assert!((100..5100).contains(&estimate.audience_size));
            assert_eq!(
                estimate.estimated_reach,
                (estimate.audience_size as f64 * 0.85).floor() as i64
            );
        }
    }

    #[tokio::test]
    async fn test_customer_estimator_counts_matches() {
        let temp = TempDir::new().unwrap();
        let pool = crate::db::init(temp.path()).await.unwrap();

        for (id, spent) in [("c1", 1500.0), ("c2", 200.0), ("c3", 4000.0)] {
            sqlx::query(
                "INSERT INTO users (id, name, email, role, provider, total_spent, created_at, updated_at) \
                 VALUES (?, ?, ?, 'customer', 'local', ?, ?, ?)",
            )
            .bind(id)
            .bind(id)
            .bind(format!("{}@example.com", id))
            .bind(spent)
            .bind(crate::db::now())
            .bind(crate::db::now())
            .execute(&pool)
            .await
            .unwrap();
        }

        let estimator = build_estimator(
            &SegmentsConfig {
                estimator: EstimatorKind::Customers,
                ..SegmentsConfig::default()
            },
            pool,
        );
        assert_eq!(estimator.name(), "customers");

        let estimate = estimator.estimate(&vip_rules()).await.unwrap();
        assert_eq!(estimate.audience_size, 2);
        assert_eq!(estimate.estimated_reach, 1);
    }
}
