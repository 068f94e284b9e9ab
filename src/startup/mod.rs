//! Startup self-checks module
//!
//! Runs before the server starts accepting requests. Checks include:
//! - Database connectivity and required tables
//! - Data directory exists and is writable
//! - Optional pieces that change behavior when absent (static frontend,
//!   Google sign-in, bootstrap admin)

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db;
use crate::DbPool;

/// Result of a single startup check
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    /// Failure aborts startup
    pub critical: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl CheckResult {
    pub fn pass(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            critical: false,
            message: message.into(),
            details: None,
        }
    }

    pub fn fail(name: impl Into<String>, message: impl Into<String>, critical: bool) -> Self {
        Self {
            name: name.into(),
            passed: false,
            critical,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Aggregated startup check results
#[derive(Debug, Clone, Serialize)]
pub struct StartupCheckReport {
    pub checks: Vec<CheckResult>,
    pub all_critical_passed: bool,
    pub all_passed: bool,
    pub summary: String,
}

impl StartupCheckReport {
    pub fn new(checks: Vec<CheckResult>) -> Self {
        let all_critical_passed = checks.iter().filter(|c| c.critical).all(|c| c.passed);
        let all_passed = checks.iter().all(|c| c.passed);

        let failed_critical = checks.iter().filter(|c| c.critical && !c.passed).count();
        let failed_non_critical = checks.iter().filter(|c| !c.critical && !c.passed).count();
        let total = checks.len();
        let passed = checks.iter().filter(|c| c.passed).count();

        let summary = if all_passed {
            format!("All {} startup checks passed", total)
        } else if all_critical_passed {
            format!(
                "{}/{} checks passed ({} non-critical warnings)",
                passed, total, failed_non_critical
            )
        } else {
            format!(
                "{}/{} checks passed ({} critical failures)",
                passed, total, failed_critical
            )
        };

        Self {
            checks,
            all_critical_passed,
            all_passed,
            summary,
        }
    }
}

/// Run all startup self-checks
pub async fn run_startup_checks(config: &Config, db: &DbPool) -> StartupCheckReport {
    info!("Running startup self-checks...");

    let checks = vec![
        check_database_connectivity(db).await,
        check_database_schema(db).await,
        check_directory_writability(config),
        check_static_dir(config),
        check_google_oauth(config),
        check_admin_account(config),
    ];

    let report = StartupCheckReport::new(checks);

    for check in &report.checks {
        if check.passed {
            info!(check = %check.name, message = %check.message, "Startup check PASSED");
        } else if check.critical {
            error!(
                check = %check.name,
                message = %check.message,
                details = ?check.details,
                "Startup check FAILED (CRITICAL)"
            );
        } else {
            warn!(
                check = %check.name,
                message = %check.message,
                details = ?check.details,
                "Startup check FAILED (non-critical)"
            );
        }
    }

    info!(
        summary = %report.summary,
        all_passed = report.all_passed,
        all_critical_passed = report.all_critical_passed,
        "Startup checks completed"
    );

    report
}

async fn check_database_connectivity(db: &DbPool) -> CheckResult {
    match sqlx::query("SELECT 1").fetch_one(db).await {
        Ok(_) => CheckResult::pass("database_connectivity", "Database connection successful"),
        Err(e) => CheckResult::fail("database_connectivity", "Failed to connect to database", true)
            .with_details(e.to_string()),
    }
}

async fn check_database_schema(db: &DbPool) -> CheckResult {
    match db::missing_tables(db).await {
        Ok(missing) if missing.is_empty() => CheckResult::pass(
            "database_schema",
            format!("Database schema valid ({} tables)", db::REQUIRED_TABLES.len()),
        ),
        Ok(missing) => CheckResult::fail("database_schema", "Missing essential database tables", true)
            .with_details(format!("Missing: {}", missing.join(", "))),
        Err(e) => CheckResult::fail("database_schema", "Failed to query database schema", true)
            .with_details(e.to_string()),
    }
}

fn check_directory_writability(config: &Config) -> CheckResult {
    let data_dir = &config.server.data_dir;
    let test_file = data_dir.join(".pulse_write_test");

    match std::fs::write(&test_file, "test") {
        Ok(_) => {
            let _ = std::fs::remove_file(&test_file);
            CheckResult::pass("directory_writability", "Data directory is writable")
                .with_details(format!("Path: {}", data_dir.display()))
        }
        Err(e) => CheckResult::fail("directory_writability", "Data directory is not writable", true)
            .with_details(format!("{}: {}", data_dir.display(), e)),
    }
}

fn check_static_dir(config: &Config) -> CheckResult {
    match &config.server.static_dir {
        None => CheckResult::pass("static_dir", "No frontend configured (API only)"),
        Some(dir) if dir.join("index.html").exists() => {
            CheckResult::pass("static_dir", "Frontend build found")
                .with_details(format!("Path: {}", dir.display()))
        }
        Some(dir) => CheckResult::fail("static_dir", "Frontend build not found", false)
            .with_details(format!("{} has no index.html", dir.display())),
    }
}

fn check_google_oauth(config: &Config) -> CheckResult {
    match &config.oauth.google {
        Some(google) => CheckResult::pass("google_oauth", "Google sign-in enabled")
            .with_details(format!("Frontend: {}", google.frontend_url)),
        None => CheckResult::fail("google_oauth", "Google sign-in disabled", false)
            .with_details("Add an [oauth.google] section to enable it"),
    }
}

fn check_admin_account(config: &Config) -> CheckResult {
    match (&config.auth.admin_email, &config.auth.admin_password) {
        (Some(email), Some(_)) => CheckResult::pass("admin_account", "Bootstrap admin configured")
            .with_details(format!("Email: {}", email)),
        _ => CheckResult::fail("admin_account", "No bootstrap admin configured", false)
            .with_details("Customer management and campaign reset require an admin user"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_check_result_pass() {
        let result = CheckResult::pass("test", "Test passed");
        assert!(result.passed);
        assert!(!result.critical);
        assert_eq!(result.name, "test");
    }

    #[test]
    fn test_startup_check_report_critical_failure() {
        let checks = vec![
            CheckResult::pass("check1", "ok"),
            CheckResult::fail("check2", "fail", true),
        ];
        let report = StartupCheckReport::new(checks);
        assert!(!report.all_passed);
        assert!(!report.all_critical_passed);
        assert_eq!(report.summary, "1/2 checks passed (1 critical failures)");
    }

    #[test]
    fn test_startup_check_report_non_critical_failure() {
        let checks = vec![
            CheckResult::pass("check1", "ok"),
            CheckResult::fail("check2", "warn", false),
        ];
        let report = StartupCheckReport::new(checks);
        assert!(!report.all_passed);
        assert!(report.all_critical_passed);
    }

    #[tokio::test]
    async fn test_fresh_database_passes_critical_checks() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.server.data_dir = temp_dir.path().to_path_buf();
        let pool = db::init(temp_dir.path()).await.unwrap();

        let report = run_startup_checks(&config, &pool).await;
        assert!(report.all_critical_passed);
        // No OAuth or admin in the default config
        assert!(!report.all_passed);
    }
}
