use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::{AppError, Result};
use crate::scheduler::Job;
use crate::source::page::{build_client, extract_player_count, fetch_page};
use crate::source::RetryPolicy;
use crate::types::now_ns;

/// Samples the server's online player count into `player_history`.
pub struct PlayerCountJob {
    client: reqwest::Client,
    url: String,
    retry: RetryPolicy,
    pool: sqlx::SqlitePool,
    interval: Duration,
    fetch_timeout: Duration,
}

impl PlayerCountJob {
    pub fn new(
        url: String,
        retry: RetryPolicy,
        pool: sqlx::SqlitePool,
        interval: Duration,
        fetch_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: build_client(fetch_timeout)?,
            url,
            retry,
            pool,
            interval,
            fetch_timeout,
        })
    }
}

#[async_trait]
impl Job for PlayerCountJob {
    fn name(&self) -> &'static str {
        "players"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&self) -> Result<()> {
        let fetch = self
            .retry
            .run("status page", || fetch_page(&self.client, &self.url));
        let html = tokio::time::timeout(self.fetch_timeout, fetch)
            .await
            .map_err(|_| AppError::Timeout(self.fetch_timeout.as_secs()))??;

        let count = extract_player_count(&html)?;
        let sampled_at = now_ns();
        record_sample(&self.pool, sampled_at, count).await?;
        info!(job = "players", player_count = count, "Player count sampled");
        Ok(())
    }
}

pub async fn record_sample(pool: &sqlx::SqlitePool, sampled_at: i64, player_count: i64) -> Result<()> {
    sqlx::query("INSERT INTO player_history (sampled_at, player_count) VALUES (?, ?)")
        .bind(sampled_at)
        .bind(player_count)
        .execute(pool)
        .await?;
    Ok(())
}
