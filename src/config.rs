use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::source::retry::{Backoff, RetryPolicy};

pub const MARKET_URL: &str = "http://localhost:8080/market";
pub const PLAYERS_URL: &str = "http://localhost:8080/status";
pub const ROSTER_URL: &str = "http://localhost:8080/guilds";

/// How often the market ingestion job runs (seconds).
pub const MARKET_INTERVAL_SECS: u64 = 300;

/// How often the player-count sampler runs (seconds).
pub const PLAYERS_INTERVAL_SECS: u64 = 60;

/// How often the guild roster is scraped (seconds).
pub const ROSTER_INTERVAL_SECS: u64 = 3600;

/// Hard ceiling on one raw page fetch, retries included (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 30;

pub const FETCH_MAX_ATTEMPTS: u32 = 3;
pub const FETCH_RETRY_DELAY_MS: u64 = 500;

/// SQLite waits this long for the write lock before returning SQLITE_BUSY.
pub const DB_BUSY_TIMEOUT_SECS: u64 = 10;

/// CSS selectors for the marketplace, status and roster pages.
pub mod selectors {
    /// Root container. Its absence means the page is not the listing page we expect.
    pub const MARKET_ROOT: &str = "#market";
    pub const SHOP: &str = ".shop";
    pub const SHOP_NAME: &str = ".shop-name";
    pub const SELLER: &str = ".shop-seller";
    pub const MAP: &str = ".shop-map";
    pub const COORDS: &str = ".shop-coords";
    pub const OFFER: &str = ".offer";
    pub const ITEM_ID: &str = ".item-id";
    pub const ITEM_NAME: &str = ".item-name";
    pub const QUANTITY: &str = ".item-qty";
    pub const PRICE: &str = ".item-price";
    pub const REFINE: &str = ".item-refine";
    pub const ENCHANT: &str = ".item-enchant";
    pub const CARD: &str = ".item-card";
    pub const PLAYER_COUNT: &str = ".player-count";
    pub const ROSTER_ROOT: &str = "#roster";
    pub const GUILD: &str = ".guild";
    pub const GUILD_NAME: &str = ".guild-name";
    pub const MEMBER: &str = ".guild-member";
    pub const MEMBER_NAME: &str = ".member-name";
    pub const MEMBER_CLASS: &str = ".member-class";
    pub const MEMBER_LEVEL: &str = ".member-level";
}

#[derive(Debug, Clone)]
pub struct Config {
    pub market_url: String,
    pub players_url: String,
    pub roster_url: String,
    pub log_level: String,
    pub db_path: String,
    pub db_max_connections: u32,
    pub api_port: u16,
    /// MARKET_INTERVAL_SECS; must be positive.
    pub market_interval_secs: u64,
    /// PLAYERS_INTERVAL_SECS; 0 disables the sampler.
    pub players_interval_secs: u64,
    /// ROSTER_INTERVAL_SECS; 0 disables the roster scraper.
    pub roster_interval_secs: u64,
    /// FETCH_TIMEOUT_SECS; must be positive.
    pub fetch_timeout_secs: u64,
    /// FETCH_MAX_ATTEMPTS
    pub fetch_max_attempts: u32,
    /// FETCH_RETRY_DELAY_MS
    pub fetch_retry_delay_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Builds the config from any variable source. Every numeric setting either
    /// parses or fails with `AppError::Config`; nothing falls back silently.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let text = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());

        let market_interval_secs =
            parse_setting(&lookup, "MARKET_INTERVAL_SECS", MARKET_INTERVAL_SECS)?;
        let fetch_timeout_secs = parse_setting(&lookup, "FETCH_TIMEOUT_SECS", FETCH_TIMEOUT_SECS)?;
        require_positive("MARKET_INTERVAL_SECS", market_interval_secs)?;
        require_positive("FETCH_TIMEOUT_SECS", fetch_timeout_secs)?;

        Ok(Self {
            market_url: text("MARKET_URL", MARKET_URL),
            players_url: text("PLAYERS_URL", PLAYERS_URL),
            roster_url: text("ROSTER_URL", ROSTER_URL),
            log_level: text("LOG_LEVEL", "info"),
            db_path: text("DB_PATH", "market.db"),
            db_max_connections: parse_setting::<u32>(&lookup, "DB_MAX_CONNECTIONS", 5)?.max(2),
            api_port: parse_setting(&lookup, "API_PORT", 3000)?,
            market_interval_secs,
            players_interval_secs: parse_setting(
                &lookup,
                "PLAYERS_INTERVAL_SECS",
                PLAYERS_INTERVAL_SECS,
            )?,
            roster_interval_secs: parse_setting(
                &lookup,
                "ROSTER_INTERVAL_SECS",
                ROSTER_INTERVAL_SECS,
            )?,
            fetch_timeout_secs,
            fetch_max_attempts: parse_setting(&lookup, "FETCH_MAX_ATTEMPTS", FETCH_MAX_ATTEMPTS)?,
            fetch_retry_delay_ms: parse_setting(
                &lookup,
                "FETCH_RETRY_DELAY_MS",
                FETCH_RETRY_DELAY_MS,
            )?,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        if self.fetch_max_attempts <= 1 {
            return RetryPolicy::none();
        }
        RetryPolicy {
            max_attempts: self.fetch_max_attempts,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(self.fetch_retry_delay_ms),
                max: Duration::from_secs(5),
            },
        }
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn parse_setting<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
    default: T,
) -> Result<T> {
    match lookup(var) {
        Some(v) => v.trim().parse::<T>().map_err(|_| {
            AppError::Config(format!("{var} must be a non-negative integer, got {v:?}"))
        }),
        None => Ok(default),
    }
}

fn require_positive(var: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(AppError::Config(format!("{var} must be greater than 0")));
    }
    Ok(())
}
