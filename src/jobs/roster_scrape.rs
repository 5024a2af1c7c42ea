use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::error::{AppError, Result};
use crate::scheduler::Job;
use crate::source::page::{build_client, extract_roster, fetch_page};
use crate::source::RetryPolicy;
use crate::types::{now_ns, RosterEntry};

/// Samples the guild roster page into `guild_roster`, one full roster per cycle.
pub struct RosterScrapeJob {
    client: reqwest::Client,
    url: String,
    retry: RetryPolicy,
    pool: sqlx::SqlitePool,
    interval: Duration,
    fetch_timeout: Duration,
}

impl RosterScrapeJob {
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
impl Job for RosterScrapeJob {
    fn name(&self) -> &'static str {
        "roster"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&self) -> Result<()> {
        let fetch = self
            .retry
            .run("roster page", || fetch_page(&self.client, &self.url));
        let html = tokio::time::timeout(self.fetch_timeout, fetch)
            .await
            .map_err(|_| AppError::Timeout(self.fetch_timeout.as_secs()))??;

        let entries = extract_roster(&html)?;
        let sampled_at = now_ns();
        let guilds = record_roster(&self.pool, sampled_at, &entries).await?;
        info!(
            job = "roster",
            guilds,
            members = entries.len(),
            "Guild roster sampled"
        );
        Ok(())
    }
}

/// Writes one roster sample in a single transaction and returns the number of guilds.
/// A member listed twice in the same guild is stored once.
pub async fn record_roster(
    pool: &sqlx::SqlitePool,
    sampled_at: i64,
    entries: &[RosterEntry],
) -> Result<usize> {
    let guilds: BTreeSet<&str> = entries.iter().map(|e| e.guild_name.as_str()).collect();
    let mut tx = pool.begin().await?;

    sqlx::query("INSERT INTO roster_history (sampled_at, guilds, members) VALUES (?, ?, ?)")
        .bind(sampled_at)
        .bind(guilds.len() as i64)
        .bind(entries.len() as i64)
        .execute(&mut *tx)
        .await?;

    for e in entries {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO guild_roster (sampled_at, guild_name, member_name, class, level)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(sampled_at)
        .bind(&e.guild_name)
        .bind(&e.member_name)
        .bind(&e.class)
        .bind(e.level)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(guilds.len())
}
