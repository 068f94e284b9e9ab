//! Deferred campaign send completion.
//!
//! A send moves the campaign to `sending` immediately and fills in the delivery
//! metrics after a delay. The delayed step runs as a cancellable task keyed by
//! campaign id: a newer send replaces an older one, and pause/reset cancel it.
//! Completion only writes rows that are still `sending`, so a pause that loses
//! the race against the timer is never overwritten.

use anyhow::Result;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::lifecycle::{send_audience, simulate_delivery};
use crate::config::CampaignsConfig;
use crate::db::{self, CampaignMetrics};
use crate::DbPool;

struct PendingSend {
    generation: u64,
    token: CancellationToken,
}

pub struct SendDispatcher {
    db: DbPool,
    delay: Duration,
    fallback_audience: i64,
    pending: Arc<DashMap<String, PendingSend>>,
    generation: AtomicU64,
}

/// Result of asking the dispatcher to start a send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStart {
    /// Completion scheduled for later
    Scheduled,
    /// Completion already ran (zero delay)
    Completed,
    /// Campaign was not in a sendable state when the update ran
    Rejected,
}

impl SendDispatcher {
    pub fn new(db: DbPool, config: &CampaignsConfig) -> Self {
        Self {
            db,
            delay: Duration::from_millis(config.send_delay_ms),
            fallback_audience: config.fallback_audience_size,
            pending: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Move a draft or scheduled campaign to `sending` and arrange its completion.
    pub async fn start(&self, campaign_id: &str) -> Result<SendStart> {
        let now = db::now();
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'sending', sent_at = ?, completed_at = NULL, error_message = NULL, updated_at = ?
            WHERE id = ? AND status IN ('draft', 'scheduled')
            "#,
        )
        .bind(&now)
        .bind(&now)
        .bind(campaign_id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(SendStart::Rejected);
        }

        tracing::info!(campaign_id = %campaign_id, delay_ms = self.delay.as_millis() as u64, "Campaign sending");

        if self.delay.is_zero() {
            self.cancel(campaign_id);
            finish_send(&self.db, campaign_id, self.fallback_audience).await;
            return Ok(SendStart::Completed);
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = CancellationToken::new();
        if let Some(previous) = self.pending.insert(
            campaign_id.to_string(),
            PendingSend {
                generation,
                token: token.clone(),
            },
        ) {
            previous.token.cancel();
        }

        let db = self.db.clone();
        let pending = self.pending.clone();
        let delay = self.delay;
        let fallback = self.fallback_audience;
        let id = campaign_id.to_string();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(campaign_id = %id, "Pending send cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    finish_send(&db, &id, fallback).await;
                }
            }
            pending.remove_if(&id, |_, p| p.generation == generation);
        });

        Ok(SendStart::Scheduled)
    }

    /// Cancel the pending completion for a campaign, if any
    pub fn cancel(&self, campaign_id: &str) -> bool {
        match self.pending.remove(campaign_id) {
            Some((_, p)) => {
                p.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of sends waiting for completion
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Cancel every pending completion, used on shutdown
    pub fn cancel_all(&self) {
        for entry in self.pending.iter() {
            entry.token.cancel();
        }
        self.pending.clear();
    }
}

/// Run the completion step, marking the campaign failed if it errors.
async fn finish_send(db: &DbPool, campaign_id: &str, fallback: i64) {
    match complete_send(db, campaign_id, fallback).await {
        Ok(true) => tracing::info!(campaign_id = %campaign_id, "Campaign send completed"),
        Ok(false) => {
            tracing::debug!(campaign_id = %campaign_id, "Campaign left sending before completion")
        }
        Err(e) => {
            tracing::error!(campaign_id = %campaign_id, error = %e, "Campaign send failed");
            if let Err(e) = mark_failed(db, campaign_id, &e.to_string()).await {
                tracing::error!(campaign_id = %campaign_id, error = %e, "Failed to mark campaign as failed");
            }
        }
    }
}

/// Populate metrics and mark completed. Returns false when the campaign is no
/// longer `sending` (paused, reset or deleted meanwhile).
pub async fn complete_send(db: &DbPool, campaign_id: &str, fallback: i64) -> Result<bool> {
    let audience: Option<(i64,)> =
        sqlx::query_as("SELECT audience_size FROM campaigns WHERE id = ? AND status = 'sending'")
            .bind(campaign_id)
            .fetch_optional(db)
            .await?;

    let Some((audience_size,)) = audience else {
        return Ok(false);
    };

    let metrics: CampaignMetrics = {
        let mut rng = rand::rng();
        simulate_delivery(send_audience(audience_size, fallback), &mut rng)
    };

    let now = db::now();
    let result = sqlx::query(
        r#"
        UPDATE campaigns
        SET status = 'completed', completed_at = ?, updated_at = ?,
            audience_size = ?, sent = ?, delivered = ?, failed = ?,
            opened = ?, clicked = ?, unsubscribed = ?, bounced = ?
        WHERE id = ? AND status = 'sending'
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(metrics.audience_size)
    .bind(metrics.sent)
    .bind(metrics.delivered)
    .bind(metrics.failed)
    .bind(metrics.opened)
    .bind(metrics.clicked)
    .bind(metrics.unsubscribed)
    .bind(metrics.bounced)
    .bind(campaign_id)
    .execute(db)
    .await?;

    Ok(result.rows_affected() > 0)
}

async fn mark_failed(db: &DbPool, campaign_id: &str, message: &str) -> Result<()> {
    sqlx::query(
        "UPDATE campaigns SET status = 'failed', error_message = ?, updated_at = ? WHERE id = ? AND status = 'sending'",
    )
    .bind(message)
    .bind(db::now())
    .bind(campaign_id)
    .execute(db)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn setup() -> (TempDir, DbPool) {
        let temp = TempDir::new().unwrap();
        let pool = crate::db::init(temp.path()).await.unwrap();
        (temp, pool)
    }

    async fn insert_campaign(pool: &DbPool, id: &str, status: &str, audience: i64) {
        let now = db::now();
        sqlx::query(
            "INSERT INTO campaigns (id, name, status, audience_segment_id, message, audience_size, created_by, created_at, updated_at) \
             VALUES (?, 'Test', ?, 'seg', 'hello', ?, 'u1', ?, ?)",
        )
        .bind(id)
        .bind(status)
        .bind(audience)
        .bind(&now)
        .bind(&now)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn status_of(pool: &DbPool, id: &str) -> (String, i64, i64, i64) {
        sqlx::query_as("SELECT status, sent, delivered, failed FROM campaigns WHERE id = ?")
            .bind(id)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    fn config(delay_ms: u64) -> CampaignsConfig {
        CampaignsConfig {
            send_delay_ms: delay_ms,
            ..CampaignsConfig::default()
        }
    }

    #[tokio::test]
    async fn test_zero_delay_completes_synchronously() {
        let (_temp, pool) = setup().await;
        insert_campaign(&pool, "c1", "draft", 2500).await;

        let dispatcher = SendDispatcher::new(pool.clone(), &config(0));
        assert_eq!(dispatcher.start("c1").await.unwrap(), SendStart::Completed);

        let (status, sent, delivered, failed) = status_of(&pool, "c1").await;
        assert_eq!(status, "completed");
        assert_eq!(sent, 2500);
        assert_eq!(delivered + failed, sent);
    }

    #[tokio::test]
    async fn test_empty_audience_uses_fallback() {
        let (_temp, pool) = setup().await;
        insert_campaign(&pool, "c1", "scheduled", 0).await;

        let dispatcher = SendDispatcher::new(pool.clone(), &config(0));
        dispatcher.start("c1").await.unwrap();

        let (_, sent, _, _) = status_of(&pool, "c1").await;
        assert_eq!(sent, 1000);
    }

    #[tokio::test]
    async fn test_completed_campaign_cannot_start() {
        let (_temp, pool) = setup().await;
        insert_campaign(&pool, "c1", "completed", 100).await;

        let dispatcher = SendDispatcher::new(pool.clone(), &config(0));
        assert_eq!(dispatcher.start("c1").await.unwrap(), SendStart::Rejected);
    }

    #[tokio::test]
    async fn test_delayed_completion() {
        let (_temp, pool) = setup().await;
        insert_campaign(&pool, "c1", "draft", 300).await;

        let dispatcher = SendDispatcher::new(pool.clone(), &config(50));
        assert_eq!(dispatcher.start("c1").await.unwrap(), SendStart::Scheduled);
        assert_eq!(status_of(&pool, "c1").await.0, "sending");
        assert_eq!(dispatcher.pending(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(status_of(&pool, "c1").await.0, "completed");
        assert_eq!(dispatcher.pending(), 0);
    }

    #[tokio::test]
    async fn test_pause_wins_over_timer() {
        let (_temp, pool) = setup().await;
        insert_campaign(&pool, "c1", "draft", 300).await;

        let dispatcher = SendDispatcher::new(pool.clone(), &config(100));
        dispatcher.start("c1").await.unwrap();

        sqlx::query("UPDATE campaigns SET status = 'paused' WHERE id = 'c1'")
            .execute(&pool)
            .await
            .unwrap();
        assert!(dispatcher.cancel("c1"));

        tokio::time::sleep(Duration::from_millis(300)).await;
        let (status, sent, _, _) = status_of(&pool, "c1").await;
        assert_eq!(status, "paused");
        assert_eq!(sent, 0);
    }

    #[tokio::test]
    async fn test_completion_error_marks_campaign_failed() {
        let (_temp, pool) = setup().await;
        insert_campaign(&pool, "c1", "draft", 300).await;

        // Refuse the completion write so the completion step errors after the
        // row is already `sending`
        sqlx::query(
            "CREATE TRIGGER reject_completion BEFORE UPDATE OF status ON campaigns \
             WHEN NEW.status = 'completed' BEGIN SELECT RAISE(ABORT, 'delivery backend unavailable'); END",
        )
        .execute(&pool)
        .await
        .unwrap();

        let dispatcher = SendDispatcher::new(pool.clone(), &config(0));
        dispatcher.start("c1").await.unwrap();

        let (status, error_message, sent): (String, Option<String>, i64) =
            sqlx::query_as("SELECT status, error_message, sent FROM campaigns WHERE id = 'c1'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "failed");
        assert!(error_message.unwrap().contains("delivery backend unavailable"));
        assert_eq!(sent, 0);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[tokio::test]
    async fn test_completion_skips_rows_no_longer_sending() {
        let (_temp, pool) = setup().await;
        insert_campaign(&pool, "c1", "draft", 300).await;

        assert!(!complete_send(&pool, "c1", 1000).await.unwrap());
        assert!(!complete_send(&pool, "missing", 1000).await.unwrap());
    }
}
