//! Input validation for API requests.
//!
//! Each validator returns `Err(message)` on failure; handlers collect them with
//! [`ValidationErrorBuilder::check`](super::error::ValidationErrorBuilder::check).

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::db::{CampaignType, RECURRING_PATTERNS};

lazy_static! {
    /// Regex for validating email addresses
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^\w+([.-]?\w+)*@\w+([.-]?\w+)*(\.\w{2,3})+$"
    ).unwrap();

    /// Loose phone format: digits with optional separators and leading +
    static ref PHONE_REGEX: Regex = Regex::new(
        r"^\+?[0-9][0-9 ()./-]{3,30}$"
    ).unwrap();
}

/// Character length bounds check on an already-trimmed value
fn check_length(label: &str, value: &str, min: usize, max: usize) -> Result<(), String> {
    let len = value.chars().count();
    if len == 0 && min > 0 {
        return Err(format!("{} is required", label));
    }
    if len < min {
        return Err(format!("{} must be at least {} characters", label, min));
    }
    if len > max {
        return Err(format!("{} cannot exceed {} characters", label, max));
    }
    Ok(())
}

/// Lowercase and trim an email for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validate an email address
pub fn validate_email(email: &str) -> Result<(), String> {
    let email = email.trim();
    if email.is_empty() {
        return Err("Email is required".to_string());
    }
    if email.len() > 254 {
        return Err("Email is too long".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Please enter a valid email".to_string());
    }
    Ok(())
}

/// Validate a person's display name
pub fn validate_user_name(name: &str) -> Result<(), String> {
    check_length("Name", name.trim(), 1, 50)
}

/// Profile renames are held to a slightly stricter minimum than sign-up
pub fn validate_profile_name(name: &str) -> Result<(), String> {
    check_length("Name", name.trim(), 2, 50)
}

/// Validate a password against the configured minimum length
pub fn validate_password(password: &str, min_length: usize) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }
    if password.chars().count() < min_length {
        return Err(format!("Password must be at least {} characters", min_length));
    }
    if password.len() > 128 {
        return Err("Password is too long (max 128 characters)".to_string());
    }
    Ok(())
}

/// Validate a segment or campaign name
pub fn validate_name(name: &str) -> Result<(), String> {
    check_length("Name", name.trim(), 2, 100)
}

/// Validate a segment description
pub fn validate_segment_description(description: &str) -> Result<(), String> {
    check_length("Description", description.trim(), 5, 500)
}

/// Validate an optional campaign description
pub fn validate_campaign_description(description: &Option<String>) -> Result<(), String> {
    match description {
        Some(d) => check_length("Description", d.trim(), 0, 500),
        None => Ok(()),
    }
}

/// Validate the campaign type, returning the parsed value (default email)
pub fn validate_campaign_type(campaign_type: &Option<String>) -> Result<CampaignType, String> {
    match campaign_type.as_deref().map(str::trim) {
        None | Some("") => Ok(CampaignType::Email),
        Some(t) => t
            .parse::<CampaignType>()
            .map_err(|_| "Type must be one of email, sms, push, social".to_string()),
    }
}

/// Validate campaign message content
pub fn validate_message(message: &str) -> Result<(), String> {
    if message.trim().is_empty() {
        return Err("Message is required".to_string());
    }
    if message.len() > 10_000 {
        return Err("Message is too long (max 10000 characters)".to_string());
    }
    Ok(())
}

/// Email campaigns need a subject
pub fn validate_subject(campaign_type: CampaignType, subject: &Option<String>) -> Result<(), String> {
    let present = subject.as_deref().is_some_and(|s| !s.trim().is_empty());
    if campaign_type == CampaignType::Email && !present {
        return Err("Subject is required for email campaigns".to_string());
    }
    if subject.as_deref().is_some_and(|s| s.len() > 200) {
        return Err("Subject is too long (max 200 characters)".to_string());
    }
    Ok(())
}

/// Parse an optional send time into UTC
pub fn validate_send_at(send_at: &Option<String>) -> Result<Option<DateTime<Utc>>, String> {
    match send_at.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| "Send time must be an RFC 3339 timestamp".to_string()),
    }
}

/// Recurring campaigns need a known pattern; a pattern is only checked when given
pub fn validate_recurring(is_recurring: bool, pattern: &Option<String>) -> Result<(), String> {
    match pattern.as_deref() {
        Some(p) if !RECURRING_PATTERNS.contains(&p) => {
            Err("Recurring pattern must be one of daily, weekly, monthly".to_string())
        }
        None if is_recurring => Err("Recurring pattern is required for recurring campaigns".to_string()),
        _ => Ok(()),
    }
}

/// Validate UI theme preference
pub fn validate_theme(theme: &Option<String>) -> Result<(), String> {
    match theme.as_deref() {
        None | Some("light") | Some("dark") => Ok(()),
        Some(_) => Err("Theme must be light or dark".to_string()),
    }
}

/// Validate an optional phone number
pub fn validate_phone(phone: &Option<String>) -> Result<(), String> {
    match phone.as_deref().map(str::trim) {
        None | Some("") => Ok(()),
        Some(p) if PHONE_REGEX.is_match(p) => Ok(()),
        Some(_) => Err("Invalid phone number format".to_string()),
    }
}

/// Normalize a customer status to `active`/`inactive`
pub fn normalize_customer_status(status: &Option<String>) -> Result<String, String> {
    match status.as_deref().map(|s| s.trim().to_lowercase()) {
        None => Ok("active".to_string()),
        Some(s) if s.is_empty() || s == "active" => Ok("active".to_string()),
        Some(s) if s == "inactive" => Ok("inactive".to_string()),
        Some(_) => Err("Status must be active or inactive".to_string()),
    }
}

/// Non-negative numeric customer fields
pub fn validate_non_negative(label: &str, value: Option<f64>) -> Result<(), String> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(format!("{} cannot be negative", label)),
        _ => Ok(()),
    }
}

/// Free-text fields with an upper bound
pub fn validate_optional_text(label: &str, value: &Option<String>, max: usize) -> Result<(), String> {
    match value {
        Some(v) => check_length(label, v.trim(), 0, max),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert!(validate_email("ada@example.com").is_ok());
        assert!(validate_email("first.last@mail.example.org").is_ok());
        assert!(validate_email("  Padded@Example.io ").is_ok());
    }

    #[test]
    fn test_invalid_emails() {
        assert!(validate_email("").is_err());
        assert!(validate_email("no-at-sign").is_err());
        assert!(validate_email("a@b").is_err());
        assert!(validate_email("a@b.toolongtld").is_err());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }

    #[test]
    fn test_name_bounds() {
        assert!(validate_name("VIP").is_ok());
        assert!(validate_name("V").is_err());
        assert!(validate_name(&"x".repeat(101)).is_err());
        assert!(validate_user_name("").is_err());
        assert!(validate_user_name(&"x".repeat(51)).is_err());
        assert!(validate_profile_name("A").is_err());
        assert!(validate_profile_name("Al").is_ok());
    }

    #[test]
    fn test_segment_description_bounds() {
        assert!(validate_segment_description("Big spenders").is_ok());
        assert!(validate_segment_description("four").is_err());
        assert!(validate_segment_description(&"x".repeat(501)).is_err());
    }

    #[test]
    fn test_password() {
        assert!(validate_password("secret1", 6).is_ok());
        assert!(validate_password("short", 6).is_err());
        assert!(validate_password("", 6).is_err());
    }

    #[test]
    fn test_campaign_type_default_and_parse() {
        assert_eq!(validate_campaign_type(&None), Ok(CampaignType::Email));
        assert_eq!(validate_campaign_type(&Some("push".into())), Ok(CampaignType::Push));
        assert!(validate_campaign_type(&Some("fax".into())).is_err());
    }

    #[test]
    fn test_subject_required_for_email() {
        assert!(validate_subject(CampaignType::Email, &None).is_err());
        assert!(validate_subject(CampaignType::Email, &Some("  ".into())).is_err());
        assert!(validate_subject(CampaignType::Email, &Some("Hi".into())).is_ok());
        assert!(validate_subject(CampaignType::Sms, &None).is_ok());
    }

    #[test]
    fn test_send_at() {
        assert_eq!(validate_send_at(&None), Ok(None));
        assert!(validate_send_at(&Some("2030-01-01T09:00:00+02:00".into()))
            .unwrap()
            .is_some());
        assert!(validate_send_at(&Some("tomorrow".into())).is_err());
    }

    #[test]
    fn test_recurring() {
        assert!(validate_recurring(false, &None).is_ok());
        assert!(validate_recurring(true, &Some("weekly".into())).is_ok());
        assert!(validate_recurring(true, &None).is_err());
        assert!(validate_recurring(false, &Some("hourly".into())).is_err());
    }

    #[test]
    fn test_customer_status() {
        assert_eq!(normalize_customer_status(&None).unwrap(), "active");
        assert_eq!(normalize_customer_status(&Some("Active".into())).unwrap(), "active");
        assert_eq!(normalize_customer_status(&Some("INACTIVE".into())).unwrap(), "inactive");
        assert!(normalize_customer_status(&Some("banned".into())).is_err());
    }

    #[test]
    fn test_phone() {
        assert!(validate_phone(&None).is_ok());
        assert!(validate_phone(&Some("+1 (555) 010-2000".into())).is_ok());
        assert!(validate_phone(&Some("call me".into())).is_err());
    }

    #[test]
    fn test_theme_and_numbers() {
        assert!(validate_theme(&Some("dark".into())).is_ok());
        assert!(validate_theme(&Some("blue".into())).is_err());
        assert!(validate_non_negative("Total spent", Some(-1.0)).is_err());
        assert!(validate_non_negative("Total spent", Some(0.0)).is_ok());
    }
}
