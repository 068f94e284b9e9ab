//! Background sender for scheduled campaigns.

use anyhow::Result;
use std::sync::Arc;
use tokio::time::{interval, Duration};

use super::dispatcher::{SendDispatcher, SendStart};
use crate::db;
use crate::DbPool;

/// Send every scheduled campaign whose `send_at` has passed. Returns how many started.
pub async fn send_due_campaigns(db: &DbPool, dispatcher: &SendDispatcher) -> Result<usize> {
    let due: Vec<(String,)> = sqlx::query_as(
        "SELECT id FROM campaigns WHERE status = 'scheduled' AND send_at IS NOT NULL AND send_at <= ? ORDER BY send_at",
    )
    .bind(db::now())
    .fetch_all(db)
    .await?;

    let mut started = 0;
    for (id,) in due {
        match dispatcher.start(&id).await {
            Ok(SendStart::Rejected) => {}
            Ok(_) => {
                started += 1;
                tracing::info!(campaign_id = %id, "Scheduled campaign started");
            }
            Err(e) => {
                tracing::warn!(campaign_id = %id, error = %e, "Failed to start scheduled campaign");
            }
        }
    }

    Ok(started)
}

/// Spawn the background scheduler task
pub fn spawn_scheduler_task(db: DbPool, dispatcher: Arc<SendDispatcher>, interval_secs: u64) {
    if interval_secs == 0 {
        tracing::info!("Campaign scheduler is disabled");
        return;
    }

    tracing::info!(interval_secs = interval_secs, "Starting campaign scheduler task");

    tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tick.tick().await;
            if let Err(e) = send_due_campaigns(&db, &dispatcher).await {
                tracing::error!(error = %e, "Scheduler cycle failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CampaignsConfig;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_only_due_campaigns_are_sent() {
        let temp = TempDir::new().unwrap();
        let pool = crate::db::init(temp.path()).await.unwrap();

        let past = db::timestamp(chrono::Utc::now() - chrono::Duration::minutes(5));
        let future = db::timestamp(chrono::Utc::now() + chrono::Duration::days(1));
        for (id, send_at) in [("due", &past), ("later", &future)] {
            sqlx::query(
                "INSERT INTO campaigns (id, name, status, audience_segment_id, message, send_at, audience_size, created_by, created_at, updated_at) \
                 VALUES (?, 'Test', 'scheduled', 'seg', 'hi', ?, 500, 'u1', ?, ?)",
            )
            .bind(id)
            .bind(send_at)
            .bind(db::now())
            .bind(db::now())
            .execute(&pool)
            .await
            .unwrap();
        }

        let dispatcher = SendDispatcher::new(
            pool.clone(),
            &CampaignsConfig {
                send_delay_ms: 0,
                ..CampaignsConfig::default()
            },
        );
        assert_eq!(send_due_campaigns(&pool, &dispatcher).await.unwrap(), 1);

        let statuses: Vec<(String, String)> =
            sqlx::query_as("SELECT id, status FROM campaigns ORDER BY id")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(statuses[0], ("due".to_string(), "completed".to_string()));
        assert_eq!(statuses[1], ("later".to_string(), "scheduled".to_string()));
    }
}
