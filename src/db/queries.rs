//! Read paths over the ledger tables: the current listings view, the event log,
//! the scrape ledger, and point-in-time reconstruction.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::warn;

use crate::db::models::{
    ListingRow, MarketEventRow, PlayerSampleRow, RosterMemberRow, RosterSampleRow,
};
use crate::error::Result;
use crate::ingest::price::{min_price, Price};
use crate::types::{EventType, Listing};

const LISTING_COLUMNS: &str = "id, canonical_name, item_id, quantity, price, store_name, \
     seller_name, map_name, map_coordinates, observed_at, available";

/// Currently available rows, split by whether their stored price still parses.
#[derive(Debug, Default)]
pub struct AvailableGroups {
    pub groups: HashMap<String, Vec<Listing>>,
    /// Rows whose price no longer parses, by name. A name listed here has available rows
    /// even when `groups` holds none for it.
    pub unreadable: HashMap<String, Vec<ListingRow>>,
}

impl AvailableGroups {
    /// Whether the name had any available row before this cycle.
    pub fn has_available(&self, canonical_name: &str) -> bool {
        self.groups.get(canonical_name).is_some_and(|g| !g.is_empty())
            || self.unreadable.contains_key(canonical_name)
    }
}

/// Every available row, grouped by canonical name.
pub async fn available_groups(conn: &mut SqliteConnection) -> Result<AvailableGroups> {
    let rows: Vec<ListingRow> = sqlx::query_as(&format!(
        "SELECT {LISTING_COLUMNS} FROM listings WHERE available = 1 ORDER BY id"
    ))
    .fetch_all(conn)
    .await?;

    let mut out = AvailableGroups::default();
    for row in rows {
        match row.parsed_price() {
            Ok(price) => {
                let l = row.with_price(price);
                out.groups.entry(l.canonical_name.clone()).or_default().push(l);
            }
            Err(e) => {
                warn!(
                    row_id = row.id,
                    canonical_name = %row.canonical_name,
                    "Stored listing has unparsable price: {e}"
                );
                out.unreadable.entry(row.canonical_name.clone()).or_default().push(row);
            }
        }
    }
    Ok(out)
}

/// Current listings view: available rows for one name, cheapest first.
pub async fn current_listings(pool: &SqlitePool, canonical_name: &str) -> Result<Vec<ListingRow>> {
    let rows: Vec<ListingRow> = sqlx::query_as(&format!(
        "SELECT {LISTING_COLUMNS} FROM listings WHERE canonical_name = ? AND available = 1 ORDER BY id"
    ))
    .bind(canonical_name)
    .fetch_all(pool)
    .await?;
    Ok(sort_by_price(rows))
}

/// The group as it stood at `ts`: the latest snapshot inserted at or before `ts`,
/// unless a REMOVED event retired it in between.
pub async fn listings_at(pool: &SqlitePool, canonical_name: &str, ts: i64) -> Result<Vec<ListingRow>> {
    let snapshot_at: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(observed_at) FROM listings WHERE canonical_name = ? AND observed_at <= ?",
    )
    .bind(canonical_name)
    .bind(ts)
    .fetch_one(pool)
    .await?;

    let Some(snapshot_at) = snapshot_at else {
        return Ok(Vec::new());
    };

    let removed_since: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM market_events
        WHERE canonical_name = ? AND event_type = ? AND timestamp > ? AND timestamp <= ?
        "#,
    )
    .bind(canonical_name)
    .bind(EventType::Removed.to_string())
    .bind(snapshot_at)
    .bind(ts)
    .fetch_one(pool)
    .await?;
    if removed_since > 0 {
        return Ok(Vec::new());
    }

    let rows: Vec<ListingRow> = sqlx::query_as(&format!(
        "SELECT {LISTING_COLUMNS} FROM listings WHERE canonical_name = ? AND observed_at = ? ORDER BY id"
    ))
    .bind(canonical_name)
    .bind(snapshot_at)
    .fetch_all(pool)
    .await?;
    Ok(sort_by_price(rows))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricePoint {
    pub scraped_at: i64,
    /// None when the item was not on the market at this cycle.
    pub min_price: Option<Price>,
    pub total_quantity: i64,
}

/// One point per committed cycle since `since`, carrying the last known snapshot forward.
pub async fn price_history(pool: &SqlitePool, canonical_name: &str, since: i64) -> Result<Vec<PricePoint>> {
    let ledger: Vec<i64> =
        sqlx::query_scalar("SELECT scraped_at FROM scrape_history WHERE scraped_at >= ? ORDER BY scraped_at")
            .bind(since)
            .fetch_all(pool)
            .await?;

    let rows: Vec<(i64, String, i64)> = sqlx::query_as(
        "SELECT observed_at, price, quantity FROM listings WHERE canonical_name = ? ORDER BY observed_at",
    )
    .bind(canonical_name)
    .fetch_all(pool)
    .await?;

    let removals: Vec<i64> = sqlx::query_scalar(
        "SELECT timestamp FROM market_events WHERE canonical_name = ? AND event_type = ? ORDER BY timestamp",
    )
    .bind(canonical_name)
    .bind(EventType::Removed.to_string())
    .fetch_all(pool)
    .await?;

    let mut snapshots: BTreeMap<i64, (Vec<&str>, i64)> = BTreeMap::new();
    for (observed_at, price, quantity) in &rows {
        let entry = snapshots.entry(*observed_at).or_default();
        entry.0.push(price.as_str());
        entry.1 += quantity;
    }

    let points = ledger
        .into_iter()
        .map(|scraped_at| {
            let live = snapshots
                .range(..=scraped_at)
                .next_back()
                .filter(|(at, _)| !removals.iter().any(|r| *r > **at && *r <= scraped_at));
            match live {
                Some((_, (prices, qty))) => PricePoint {
                    scraped_at,
                    min_price: min_price(prices.iter().copied()).0,
                    total_quantity: *qty,
                },
                None => PricePoint {
                    scraped_at,
                    min_price: None,
                    total_quantity: 0,
                },
            }
        })
        .collect();

    Ok(points)
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub canonical_name: Option<String>,
    pub event_type: Option<EventType>,
    pub limit: i64,
}

/// Event log view, newest first.
pub async fn events(pool: &SqlitePool, filter: &EventFilter) -> Result<Vec<MarketEventRow>> {
    let event_type = filter.event_type.map(|t| t.to_string());
    let rows = sqlx::query_as(
        r#"
        SELECT id, timestamp, event_type, canonical_name, item_id, detail
        FROM market_events
        WHERE (? IS NULL OR canonical_name = ?)
          AND (? IS NULL OR event_type = ?)
        ORDER BY timestamp DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(&filter.canonical_name)
    .bind(&filter.canonical_name)
    .bind(&event_type)
    .bind(&event_type)
    .bind(filter.limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Scrape ledger: most recent committed cycle.
pub async fn latest_scrape(pool: &SqlitePool) -> Result<Option<i64>> {
    let ts: Option<i64> = sqlx::query_scalar("SELECT MAX(scraped_at) FROM scrape_history")
        .fetch_one(pool)
        .await?;
    Ok(ts)
}

pub async fn latest_player_sample(pool: &SqlitePool) -> Result<Option<PlayerSampleRow>> {
    let row = sqlx::query_as(
        "SELECT sampled_at, player_count FROM player_history ORDER BY sampled_at DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

#[derive(Debug, Serialize)]
pub struct RosterSnapshot {
    #[serde(flatten)]
    pub sample: RosterSampleRow,
    pub roster: Vec<RosterMemberRow>,
}

/// The most recent roster sample with its members, grouped by guild.
pub async fn latest_roster(pool: &SqlitePool) -> Result<Option<RosterSnapshot>> {
    let sample: Option<RosterSampleRow> = sqlx::query_as(
        "SELECT sampled_at, guilds, members FROM roster_history ORDER BY sampled_at DESC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    let Some(sample) = sample else {
        return Ok(None);
    };

    let roster = sqlx::query_as(
        r#"
        SELECT guild_name, member_name, class, level
        FROM guild_roster
        WHERE sampled_at = ?
        ORDER BY guild_name, id
        "#,
    )
    .bind(sample.sampled_at)
    .fetch_all(pool)
    .await?;

    Ok(Some(RosterSnapshot { sample, roster }))
}

/// Cheapest first; unparsable prices sort last in insertion order.
fn sort_by_price(mut rows: Vec<ListingRow>) -> Vec<ListingRow> {
    rows.sort_by_key(|r| match r.parsed_price() {
        Ok(p) => (0, p.zeny()),
        Err(_) => (1, 0),
    });
    rows
}
