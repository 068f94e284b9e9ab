//! Evaluates rule lists against a single customer record.

use chrono::{DateTime, NaiveDate, Utc};
use std::cmp::Ordering;

use super::rules::{Rule, RuleField, RuleLogic, RuleOperator};
use crate::db::User;

/// The customer attributes rules can inspect
#[derive(Debug, Clone, Default)]
pub struct CustomerFacts {
    pub total_spent: f64,
    pub orders: i64,
    pub visits: i64,
    pub location: Option<String>,
    pub last_login: Option<String>,
    pub last_purchase: Option<String>,
    pub signup_date: Option<String>,
}

impl From<&User> for CustomerFacts {
    fn from(user: &User) -> Self {
        Self {
            total_spent: user.total_spent,
            orders: user.orders,
            visits: user.visits,
            location: user.location.clone(),
            last_login: user.last_login.clone(),
            // Purchases are not tracked separately; the last record update stands in.
            last_purchase: Some(user.updated_at.clone()),
            signup_date: Some(user.created_at.clone()),
        }
    }
}

/// Attribute value resolved for one field
enum Fact<'a> {
    Number(f64),
    Text(&'a str),
    Date(DateTime<Utc>),
    Missing,
}

impl CustomerFacts {
    fn fact(&self, field: RuleField) -> Fact<'_> {
        match field {
            RuleField::TotalSpent | RuleField::CustomerLifetimeValue => Fact::Number(self.total_spent),
            RuleField::OrderCount => Fact::Number(self.orders as f64),
            RuleField::Visits => Fact::Number(self.visits as f64),
            RuleField::Location => self.location.as_deref().map_or(Fact::Missing, Fact::Text),
            RuleField::LastLogin => date_fact(self.last_login.as_deref()),
            RuleField::LastPurchase => date_fact(self.last_purchase.as_deref()),
            RuleField::SignupDate => date_fact(self.signup_date.as_deref()),
            RuleField::Age => Fact::Missing,
        }
    }
}

fn date_fact(raw: Option<&str>) -> Fact<'_> {
    raw.and_then(parse_date).map_or(Fact::Missing, Fact::Date)
}

/// Accepts full RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC)
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn list_items(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn ordering_matches(op: RuleOperator, ord: Ordering) -> bool {
    match op {
        RuleOperator::GreaterThan => ord == Ordering::Greater,
        RuleOperator::LessThan => ord == Ordering::Less,
        RuleOperator::GreaterThanOrEqual => ord != Ordering::Less,
        RuleOperator::LessThanOrEqual => ord != Ordering::Greater,
        RuleOperator::Equals => ord == Ordering::Equal,
        RuleOperator::NotEquals => ord != Ordering::Equal,
        _ => false,
    }
}

fn match_number(actual: f64, op: RuleOperator, value: &str) -> bool {
    match op {
        RuleOperator::In | RuleOperator::NotIn => {
            let found = list_items(value)
                .filter_map(|item| item.parse::<f64>().ok())
                .any(|item| item == actual);
            (op == RuleOperator::In) == found
        }
        RuleOperator::Contains => actual.to_string().contains(value.trim()),
        _ => match value.trim().parse::<f64>() {
            Ok(expected) => actual
                .partial_cmp(&expected)
                .is_some_and(|ord| ordering_matches(op, ord)),
            Err(_) => false,
        },
    }
}

fn match_text(actual: &str, op: RuleOperator, value: &str) -> bool {
    let actual = actual.trim().to_lowercase();
    let value = value.trim().to_lowercase();
    match op {
        RuleOperator::Contains => actual.contains(&value),
        RuleOperator::In | RuleOperator::NotIn => {
            let found = list_items(&value).any(|item| item == actual);
            (op == RuleOperator::In) == found
        }
        _ => ordering_matches(op, actual.as_str().cmp(value.as_str())),
    }
}

fn match_date(actual: DateTime<Utc>, op: RuleOperator, value: &str) -> bool {
    match op {
        RuleOperator::Contains => false,
        RuleOperator::In | RuleOperator::NotIn => {
            let day = actual.date_naive();
            let found = list_items(value)
                .filter_map(parse_date)
                .any(|d| d.date_naive() == day);
            (op == RuleOperator::In) == found
        }
        _ => match parse_date(value) {
            Some(expected) => ordering_matches(op, actual.cmp(&expected)),
            None => false,
        },
    }
}

/// Evaluate one rule. A missing attribute never matches, whatever the operator.
pub fn rule_matches(rule: &Rule, facts: &CustomerFacts) -> bool {
    match facts.fact(rule.field) {
        Fact::Number(n) => match_number(n, rule.operator, &rule.value),
        Fact::Text(s) => match_text(s, rule.operator, &rule.value),
        Fact::Date(d) => match_date(d, rule.operator, &rule.value),
        Fact::Missing => false,
    }
}

/// Fold the rule list left to right with each rule's connective.
/// Rules after the first without a connective join with AND.
pub fn matches(rules: &[Rule], facts: &CustomerFacts) -> bool {
    let mut iter = rules.iter();
    let Some(first) = iter.next() else {
        return false;
    };

    iter.fold(rule_matches(first, facts), |acc, rule| {
        match rule.logic.unwrap_or(RuleLogic::And) {
            RuleLogic::And => acc && rule_matches(rule, facts),
            RuleLogic::Or => acc || rule_matches(rule, facts),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(field: RuleField, operator: RuleOperator, value: &str, logic: Option<RuleLogic>) -> Rule {
        Rule {
            field,
            operator,
            value: value.to_string(),
            logic,
        }
    }

    fn facts() -> CustomerFacts {
        CustomerFacts {
            total_spent: 1500.0,
            orders: 12,
            visits: 40,
            location: Some("Berlin, Germany".to_string()),
            last_login: Some("2026-03-10T08:30:00.000Z".to_string()),
            last_purchase: Some("2026-02-01T00:00:00.000Z".to_string()),
            signup_date: Some("2024-06-15T12:00:00.000Z".to_string()),
        }
    }

    #[test]
    fn test_numeric_comparisons() {
        let f = facts();
        assert!(rule_matches(&rule(RuleField::TotalSpent, RuleOperator::GreaterThan, "1000", None), &f));
        assert!(!rule_matches(&rule(RuleField::TotalSpent, RuleOperator::LessThan, "1000", None), &f));
        assert!(rule_matches(&rule(RuleField::OrderCount, RuleOperator::GreaterThanOrEqual, "12", None), &f));
        assert!(rule_matches(&rule(RuleField::Visits, RuleOperator::Equals, "40", None), &f));
        assert!(rule_matches(&rule(RuleField::CustomerLifetimeValue, RuleOperator::NotEquals, "1", None), &f));
    }

    #[test]
    fn test_unparseable_number_never_matches() {
        let f = facts();
        assert!(!rule_matches(&rule(RuleField::TotalSpent, RuleOperator::GreaterThan, "lots", None), &f));
        assert!(!rule_matches(&rule(RuleField::TotalSpent, RuleOperator::NotEquals, "lots", None), &f));
    }

    #[test]
    fn test_number_lists() {
        let f = facts();
        assert!(rule_matches(&rule(RuleField::OrderCount, RuleOperator::In, "3, 12, 20", None), &f));
        assert!(rule_matches(&rule(RuleField::OrderCount, RuleOperator::NotIn, "1,2", None), &f));
        assert!(!rule_matches(&rule(RuleField::OrderCount, RuleOperator::NotIn, "12", None), &f));
    }

    #[test]
    fn test_text_operators_ignore_case() {
        let f = facts();
        assert!(rule_matches(&rule(RuleField::Location, RuleOperator::Contains, "berlin", None), &f));
        assert!(rule_matches(&rule(RuleField::Location, RuleOperator::Equals, "BERLIN, GERMANY", None), &f));
        assert!(!rule_matches(&rule(RuleField::Location, RuleOperator::In, "Paris,Rome", None), &f));
    }

    #[test]
    fn test_date_comparisons() {
        let f = facts();
        assert!(rule_matches(&rule(RuleField::SignupDate, RuleOperator::LessThan, "2025-01-01", None), &f));
        assert!(rule_matches(&rule(RuleField::LastLogin, RuleOperator::GreaterThan, "2026-03-01T00:00:00Z", None), &f));
        assert!(rule_matches(&rule(RuleField::LastPurchase, RuleOperator::In, "2026-02-01", None), &f));
        assert!(!rule_matches(&rule(RuleField::LastLogin, RuleOperator::GreaterThan, "yesterday", None), &f));
    }

    #[test]
    fn test_missing_attributes_never_match() {
        let f = CustomerFacts::default();
        assert!(!rule_matches(&rule(RuleField::Location, RuleOperator::NotEquals, "x", None), &f));
        assert!(!rule_matches(&rule(RuleField::LastLogin, RuleOperator::LessThan, "2030-01-01", None), &f));
        assert!(!rule_matches(&rule(RuleField::Age, RuleOperator::GreaterThan, "0", None), &facts()));
    }

    #[test]
    fn test_fold_left_to_right() {
        let f = facts();
        // (false OR true) AND true
        let rules = vec![
            rule(RuleField::TotalSpent, RuleOperator::LessThan, "10", None),
            rule(RuleField::Visits, RuleOperator::GreaterThan, "10", Some(RuleLogic::Or)),
            rule(RuleField::Location, RuleOperator::Contains, "germany", Some(RuleLogic::And)),
        ];
        assert!(matches(&rules, &f));

        // (true AND false) OR false
        let rules = vec![
            rule(RuleField::TotalSpent, RuleOperator::GreaterThan, "10", None),
            rule(RuleField::Visits, RuleOperator::LessThan, "10", Some(RuleLogic::And)),
            rule(RuleField::Age, RuleOperator::GreaterThan, "18", Some(RuleLogic::Or)),
        ];
        assert!(!matches(&rules, &f));
    }

    #[test]
    fn test_missing_connective_means_and() {
        let f = facts();
        let rules = vec![
            rule(RuleField::TotalSpent, RuleOperator::GreaterThan, "10", None),
            rule(RuleField::Visits, RuleOperator::LessThan, "10", None),
        ];
        assert!(!matches(&rules, &f));
        assert!(!matches(&[], &f));
    }
}
