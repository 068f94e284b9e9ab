use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Credentials values shipped in sample configs that must never reach production.
const PLACEHOLDER_CREDENTIALS: [&str; 3] = ["placeholder_client_id", "placeholder_client_secret", "changeme"];

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub campaigns: CampaignsConfig,
    #[serde(default)]
    pub segments: SegmentsConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory holding a built single-page frontend, served as fallback
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
            static_dir: None,
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Bootstrap admin account created on startup when both email and password are set
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
    #[serde(default = "default_admin_name")]
    pub admin_name: String,
    /// Lifetime of issued bearer tokens, in hours (default: 7 days)
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_email: None,
            admin_password: None,
            admin_name: default_admin_name(),
            session_ttl_hours: default_session_ttl_hours(),
            min_password_length: default_min_password_length(),
        }
    }
}

fn default_admin_name() -> String {
    "Administrator".to_string()
}

fn default_session_ttl_hours() -> i64 {
    24 * 7
}

fn default_min_password_length() -> usize {
    6
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub google: Option<GoogleOAuthConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleOAuthConfig {
    /// OAuth client ID
    pub client_id: String,
    /// OAuth client secret
    pub client_secret: String,
    /// Callback URL registered with Google (default: derived from server port)
    pub redirect_uri: Option<String>,
    /// Where the browser is sent after a successful login, with `?token=...` appended
    #[serde(default = "default_frontend_url")]
    pub frontend_url: String,
}

fn default_frontend_url() -> String {
    "http://localhost:5173".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requests allowed per window on general API endpoints
    #[serde(default = "default_api_requests")]
    pub api_requests_per_window: u32,
    /// Requests allowed per window on login/register endpoints
    #[serde(default = "default_auth_requests")]
    pub auth_requests_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Seconds between sweeps of stale limiter entries
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_requests_per_window: default_api_requests(),
            auth_requests_per_window: default_auth_requests(),
            window_seconds: default_window_seconds(),
            cleanup_interval: default_cleanup_interval(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_api_requests() -> u32 {
    100
}

fn default_auth_requests() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    15 * 60
}

fn default_cleanup_interval() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Accept any `http://localhost:*` origin (development setups)
    #[serde(default)]
    pub allow_localhost: bool,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: default_allowed_origins(),
            allow_localhost: false,
        }
    }
}

fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:5173".to_string()]
}

#[derive(Debug, Clone, Deserialize)]
pub struct CampaignsConfig {
    /// Delay between a campaign entering `sending` and its simulated completion.
    /// Zero completes the send before the request returns.
    #[serde(default = "default_send_delay_ms")]
    pub send_delay_ms: u64,
    /// Audience assumed when a campaign's segment reported no size
    #[serde(default = "default_fallback_audience_size")]
    pub fallback_audience_size: i64,
    /// How often scheduled campaigns are checked for due sends
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_seconds: u64,
}

impl Default for CampaignsConfig {
    fn default() -> Self {
        Self {
            send_delay_ms: default_send_delay_ms(),
            fallback_audience_size: default_fallback_audience_size(),
            scheduler_interval_seconds: default_scheduler_interval(),
        }
    }
}

fn default_send_delay_ms() -> u64 {
    2000
}

fn default_fallback_audience_size() -> i64 {
    crate::engine::lifecycle::DEFAULT_FALLBACK_AUDIENCE
}

fn default_scheduler_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EstimatorKind {
    /// Random draw, ignores the rules
    Simulated,
    /// Evaluate rules against stored customer records
    Customers,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SegmentsConfig {
    #[serde(default = "default_estimator")]
    pub estimator: EstimatorKind,
    /// Smallest simulated audience
    #[serde(default = "default_simulated_min")]
    pub simulated_min: i64,
    /// Width of the simulated range; draws fall in `[min, min + span)`
    #[serde(default = "default_simulated_span")]
    pub simulated_span: i64,
}

impl Default for SegmentsConfig {
    fn default() -> Self {
        Self {
            estimator: default_estimator(),
            simulated_min: default_simulated_min(),
            simulated_span: default_simulated_span(),
        }
    }
}

fn default_estimator() -> EstimatorKind {
    EstimatorKind::Simulated
}

fn default_simulated_min() -> i64 {
    100
}

fn default_simulated_span() -> i64 {
    5000
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DebugConfig {
    /// Expose the unauthenticated demo/debug analytics endpoints
    #[serde(default)]
    pub enabled: bool,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            toml::from_str(&content).with_context(|| "Failed to parse configuration file")?
        } else {
            info!("No config file found, using defaults");
            Config::default()
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if let Some(google) = &self.oauth.google {
            for (name, value) in [
                ("oauth.google.client_id", &google.client_id),
                ("oauth.google.client_secret", &google.client_secret),
            ] {
                let trimmed = value.trim();
                if trimmed.is_empty() || PLACEHOLDER_CREDENTIALS.contains(&trimmed) {
                    bail!("Google OAuth is not properly configured: {} is missing or a placeholder", name);
                }
            }
        }

        if self.auth.session_ttl_hours <= 0 {
            bail!("auth.session_ttl_hours must be positive");
        }

        if self.rate_limit.window_seconds == 0 {
            bail!("rate_limit.window_seconds must be greater than 0");
        }

        if self.segments.simulated_min < 0 || self.segments.simulated_span <= 0 {
            bail!("segments.simulated_min must be >= 0 and segments.simulated_span > 0");
        }

        if self.campaigns.fallback_audience_size < 0 {
            bail!("campaigns.fallback_audience_size must not be negative");
        }

        Ok(())
    }

    pub fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            oauth: OAuthConfig::default(),
            logging: LoggingConfig::default(),
            rate_limit: RateLimitConfig::default(),
            cors: CorsConfig::default(),
            campaigns: CampaignsConfig::default(),
            segments: SegmentsConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}
