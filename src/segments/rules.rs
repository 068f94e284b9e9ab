//! Audience rule definitions.
//!
//! A segment is an ordered list of [`Rule`]s. Each rule names a customer
//! attribute, a comparison and a free-text value, plus the connective that
//! joins it to the rules before it. Rules arrive from clients as loose strings
//! ([`RuleInput`]) and are converted with [`parse_rules`], which is the only way
//! to obtain a validated rule list.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Customer attribute a rule inspects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleField {
    TotalSpent,
    OrderCount,
    LastPurchase,
    LastLogin,
    Visits,
    Age,
    Location,
    SignupDate,
    CustomerLifetimeValue,
}

impl RuleField {
    pub const ALL: [RuleField; 9] = [
        RuleField::TotalSpent,
        RuleField::OrderCount,
        RuleField::LastPurchase,
        RuleField::LastLogin,
        RuleField::Visits,
        RuleField::Age,
        RuleField::Location,
        RuleField::SignupDate,
        RuleField::CustomerLifetimeValue,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleField::TotalSpent => "totalSpent",
            RuleField::OrderCount => "orderCount",
            RuleField::LastPurchase => "lastPurchase",
            RuleField::LastLogin => "lastLogin",
            RuleField::Visits => "visits",
            RuleField::Age => "age",
            RuleField::Location => "location",
            RuleField::SignupDate => "signupDate",
            RuleField::CustomerLifetimeValue => "customerLifetimeValue",
        }
    }
}

impl fmt::Display for RuleField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleField {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or(())
    }
}

/// Comparison applied between the customer attribute and the rule value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleOperator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = "=")]
    Equals,
    #[serde(rename = "!=")]
    NotEquals,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not_in")]
    NotIn,
}

impl RuleOperator {
    pub const ALL: [RuleOperator; 9] = [
        RuleOperator::GreaterThan,
        RuleOperator::LessThan,
        RuleOperator::GreaterThanOrEqual,
        RuleOperator::LessThanOrEqual,
        RuleOperator::Equals,
        RuleOperator::NotEquals,
        RuleOperator::Contains,
        RuleOperator::In,
        RuleOperator::NotIn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuleOperator::GreaterThan => ">",
            RuleOperator::LessThan => "<",
            RuleOperator::GreaterThanOrEqual => ">=",
            RuleOperator::LessThanOrEqual => "<=",
            RuleOperator::Equals => "=",
            RuleOperator::NotEquals => "!=",
            RuleOperator::Contains => "contains",
            RuleOperator::In => "in",
            RuleOperator::NotIn => "not_in",
        }
    }
}

impl fmt::Display for RuleOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleOperator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RuleOperator::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or(())
    }
}

/// Connective joining a rule to the result of the rules before it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RuleLogic {
    And,
    Or,
}

impl FromStr for RuleLogic {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AND" => Ok(RuleLogic::And),
            "OR" => Ok(RuleLogic::Or),
            _ => Err(()),
        }
    }
}

/// A validated audience rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub field: RuleField,
    pub operator: RuleOperator,
    pub value: String,
    /// Always `None` on the first rule of a list
    pub logic: Option<RuleLogic>,
}

/// Rule as submitted by a client, before validation
#[derive(Debug, Clone, Deserialize)]
pub struct RuleInput {
    pub field: String,
    pub operator: String,
    #[serde(deserialize_with = "rule_value")]
    pub value: String,
    #[serde(default)]
    pub logic: Option<String>,
}

/// Clients send thresholds as either `"1000"` or `1000`; both are kept as text.
fn rule_value<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        _ => Err(serde::de::Error::custom("Rule value must be a string or number")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("At least one rule is required")]
    Empty,
    #[error("Unknown rule field '{value}'")]
    UnknownField { index: usize, value: String },
    #[error("Unknown rule operator '{value}'")]
    UnknownOperator { index: usize, value: String },
    #[error("Rule value is required")]
    EmptyValue { index: usize },
    #[error("Rule logic must be AND or OR")]
    UnknownLogic { index: usize, value: String },
}

impl RuleError {
    /// Request path of the offending input, e.g. `rules[2].operator`
    pub fn path(&self) -> String {
        match self {
            RuleError::Empty => "rules".to_string(),
            RuleError::UnknownField { index, .. } => format!("rules[{}].field", index),
            RuleError::UnknownOperator { index, .. } => format!("rules[{}].operator", index),
            RuleError::EmptyValue { index } => format!("rules[{}].value", index),
            RuleError::UnknownLogic { index, .. } => format!("rules[{}].logic", index),
        }
    }
}

impl TryFrom<(usize, &RuleInput)> for Rule {
    type Error = RuleError;

    fn try_from((index, input): (usize, &RuleInput)) -> Result<Self, Self::Error> {
        let field = input
            .field
            .trim()
            .parse::<RuleField>()
            .map_err(|_| RuleError::UnknownField {
                index,
                value: input.field.clone(),
            })?;

        let operator = input
            .operator
            .trim()
            .parse::<RuleOperator>()
            .map_err(|_| RuleError::UnknownOperator {
                index,
                value: input.operator.clone(),
            })?;

        let value = input.value.trim();
        if value.is_empty() {
            return Err(RuleError::EmptyValue { index });
        }

        let logic = match input.logic.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<RuleLogic>().map_err(|_| RuleError::UnknownLogic {
                index,
                value: raw.to_string(),
            })?),
        };

        Ok(Rule {
            field,
            operator,
            value: value.to_string(),
            logic,
        })
    }
}

/// Validate a client rule list.
///
/// Fails on an empty list or the first invalid rule. The first rule's
/// connective is dropped since there is nothing before it to join with.
pub fn parse_rules(inputs: &[RuleInput]) -> Result<Vec<Rule>, RuleError> {
    if inputs.is_empty() {
        return Err(RuleError::Empty);
    }

    let mut rules = inputs
        .iter()
        .enumerate()
        .map(Rule::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(first) = rules.first_mut() {
        first.logic = None;
    }

    Ok(rules)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(field: &str, operator: &str, value: &str, logic: Option<&str>) -> RuleInput {
        RuleInput {
            field: field.to_string(),
            operator: operator.to_string(),
            value: value.to_string(),
            logic: logic.map(|l| l.to_string()),
        }
    }

    #[test]
    fn test_parse_single_rule() {
        let rules = parse_rules(&[input("totalSpent", ">", "1000", None)]).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].field, RuleField::TotalSpent);
        assert_eq!(rules[0].operator, RuleOperator::GreaterThan);
        assert_eq!(rules[0].value, "1000");
        assert_eq!(rules[0].logic, None);
    }

    #[test]
    fn test_numeric_value_accepted_as_text() {
        let rule: RuleInput = serde_json::from_value(serde_json::json!({
            "field": "totalSpent",
            "operator": ">",
            "value": 1000
        }))
        .unwrap();
        assert_eq!(rule.value, "1000");

        let rule: RuleInput = serde_json::from_value(serde_json::json!({
            "field": "totalSpent",
            "operator": "<",
            "value": 12.5
        }))
        .unwrap();
        assert_eq!(rule.value, "12.5");
        assert_eq!(parse_rules(&[rule]).unwrap()[0].value, "12.5");

        let nested = serde_json::from_value::<RuleInput>(serde_json::json!({
            "field": "totalSpent",
            "operator": ">",
            "value": [1000]
        }));
        assert!(nested.is_err());
    }

    #[test]
    fn test_empty_rules_rejected() {
        assert_eq!(parse_rules(&[]), Err(RuleError::Empty));
    }

    #[test]
    fn test_first_rule_logic_dropped() {
        let rules = parse_rules(&[
            input("visits", ">=", "3", Some("OR")),
            input("location", "contains", "berlin", Some("AND")),
        ])
        .unwrap();
        assert_eq!(rules[0].logic, None);
        assert_eq!(rules[1].logic, Some(RuleLogic::And));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = parse_rules(&[
            input("totalSpent", ">", "10", None),
            input("shoeSize", "=", "42", Some("AND")),
        ])
        .unwrap_err();
        assert_eq!(err.path(), "rules[1].field");
        assert!(err.to_string().contains("shoeSize"));
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let err = parse_rules(&[input("age", "~=", "30", None)]).unwrap_err();
        assert!(matches!(err, RuleError::UnknownOperator { index: 0, .. }));
    }

    #[test]
    fn test_blank_value_rejected() {
        let err = parse_rules(&[input("age", "=", "   ", None)]).unwrap_err();
        assert_eq!(err, RuleError::EmptyValue { index: 0 });
    }

    #[test]
    fn test_lowercase_logic_rejected() {
        let err = parse_rules(&[
            input("age", "=", "30", None),
            input("visits", ">", "1", Some("and")),
        ])
        .unwrap_err();
        assert_eq!(err.path(), "rules[1].logic");
    }

    #[test]
    fn test_every_operator_parses() {
        for op in RuleOperator::ALL {
            assert_eq!(op.as_str().parse::<RuleOperator>(), Ok(op));
        }
        for field in RuleField::ALL {
            assert_eq!(field.as_str().parse::<RuleField>(), Ok(field));
        }
    }

    #[test]
    fn test_rule_serializes_with_wire_names() {
        let rules = parse_rules(&[
            input("orderCount", "not_in", "1,2", None),
            input("signupDate", "<=", "2024-01-01", Some("OR")),
        ])
        .unwrap();
        let json = serde_json::to_value(&rules).unwrap();
        assert_eq!(json[0]["field"], "orderCount");
        assert_eq!(json[0]["operator"], "not_in");
        assert!(json[0]["logic"].is_null());
        assert_eq!(json[1]["logic"], "OR");
    }
}
