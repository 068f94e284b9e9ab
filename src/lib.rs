pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod segments;
pub mod startup;

pub use db::DbPool;

use config::Config;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::api::rate_limit::RateLimiter;
use crate::engine::SendDispatcher;
use crate::segments::{build_estimator, AudienceEstimator};

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub rate_limiter: Arc<RateLimiter>,
    pub estimator: Arc<dyn AudienceEstimator>,
    pub dispatcher: Arc<SendDispatcher>,
    /// Outstanding Google sign-in `state` values and when they were issued
    pub oauth_states: DashMap<String, Instant>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        let estimator = build_estimator(&config.segments, db.clone());
        let dispatcher = Arc::new(SendDispatcher::new(db.clone(), &config.campaigns));
        Self {
            config,
            db,
            rate_limiter,
            estimator,
            dispatcher,
            oauth_states: DashMap::new(),
            http: reqwest::Client::new(),
        }
    }
}
