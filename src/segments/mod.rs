//! Audience segment rules and size estimation.

pub mod estimator;
pub mod matcher;
pub mod rules;

pub use estimator::{build_estimator, AudienceEstimate, AudienceEstimator, REACH_RATIO};
pub use matcher::{matches, CustomerFacts};
pub use rules::{parse_rules, Rule, RuleError, RuleField, RuleInput, RuleLogic, RuleOperator};
