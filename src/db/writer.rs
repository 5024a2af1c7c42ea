use std::collections::HashSet;

use sqlx::SqliteConnection;
use tracing::debug;

use crate::db::queries;
use crate::error::Result;
use crate::ingest::diff;
use crate::ingest::low_price::{cheapest, historical_min, new_low};
use crate::types::{CycleReport, EventDetail, EventType, Listing, MarketEvent};

/// Persists one ingestion cycle's delta. Everything a cycle writes (availability flips,
/// new rows, events, the ledger entry) commits together or not at all.
pub struct CycleWriter {
    pool: sqlx::SqlitePool,
}

impl CycleWriter {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Diff `incoming` against the stored available groups and apply the changes.
    /// Dropping the transaction on any error rolls the whole cycle back.
    pub async fn commit_cycle(&self, incoming: Vec<Listing>, scraped_at: i64) -> Result<CycleReport> {
        let mut tx = self.pool.begin().await?;

        // Take the write lock first so later reads in this transaction cannot go stale.
        sqlx::query("INSERT INTO scrape_history (scraped_at) VALUES (?)")
            .bind(scraped_at)
            .execute(&mut *tx)
            .await?;

        let stored = queries::available_groups(&mut tx).await?;
        let unreadable: HashSet<&str> = stored.unreadable.keys().map(String::as_str).collect();
        let delta = diff(incoming, &stored.groups, &unreadable);

        let mut report = CycleReport {
            scraped_at,
            unchanged: delta.unchanged.len(),
            ..Default::default()
        };

        for (name, rows) in &delta.changed {
            let prior = stored.groups.get(name).map(Vec::as_slice).unwrap_or(&[]);
            let historical = historical_min(&mut tx, name).await?;

            report.retired += retire_group(&mut tx, name).await?;
            for row in rows {
                insert_listing(&mut tx, row).await?;
            }
            report.inserted += rows.len();

            if !stored.has_available(name) {
                if let Some(rep) = cheapest(rows) {
                    insert_event(&mut tx, &event(EventType::Added, scraped_at, rep)).await?;
                    report.added += 1;
                }
            }

            if let Some(low) = new_low(rows, historical) {
                insert_event(&mut tx, &event(EventType::NewLow, scraped_at, low)).await?;
                report.new_lows += 1;
            }

            debug!(
                canonical_name = %name,
                rows = rows.len(),
                prior = prior.len(),
                "Group changed"
            );
        }

        for name in &delta.removed {
            let prior = stored.groups.get(name).map(Vec::as_slice).unwrap_or(&[]);
            let raw = stored.unreadable.get(name).map(Vec::as_slice).unwrap_or(&[]);
            report.retired += retire_group(&mut tx, name).await?;

            // Describe the cheapest readable row; fall back to the oldest unreadable one.
            let detail = match (cheapest(prior), raw.first()) {
                (Some(last), _) => Some(EventDetail::from(last)),
                (None, Some(row)) => Some(EventDetail::from(row)),
                (None, None) => None,
            };
            if let Some(detail) = detail {
                let item_id = prior
                    .iter()
                    .map(|l| l.item_id)
                    .chain(raw.iter().map(|r| r.item_id))
                    .find(|id| *id > 0)
                    .unwrap_or(0);
                let removed = MarketEvent {
                    timestamp: scraped_at,
                    event_type: EventType::Removed,
                    canonical_name: name.clone(),
                    item_id,
                    detail,
                };
                insert_event(&mut tx, &removed).await?;
                report.removed += 1;
            }

            debug!(
                canonical_name = %name,
                prior = prior.len(),
                unreadable = raw.len(),
                "Group removed"
            );
        }

        if delta.is_empty() {
            debug!(unchanged = report.unchanged, "Snapshot identical to stored state");
        }

        tx.commit().await?;
        Ok(report)
    }
}

fn event(event_type: EventType, timestamp: i64, listing: &Listing) -> MarketEvent {
    MarketEvent {
        timestamp,
        event_type,
        canonical_name: listing.canonical_name.clone(),
        item_id: listing.item_id,
        detail: EventDetail::from(listing),
    }
}

/// The only mutation `listings` rows ever see.
async fn retire_group(conn: &mut SqliteConnection, canonical_name: &str) -> Result<usize> {
    let res = sqlx::query(
        "UPDATE listings SET available = 0 WHERE canonical_name = ? AND available = 1",
    )
    .bind(canonical_name)
    .execute(conn)
    .await?;
    Ok(res.rows_affected() as usize)
}

async fn insert_listing(conn: &mut SqliteConnection, l: &Listing) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO listings (
            canonical_name, item_id, quantity, price, store_name,
            seller_name, map_name, map_coordinates, observed_at, available
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
        "#,
    )
    .bind(&l.canonical_name)
    .bind(l.item_id)
    .bind(l.quantity)
    .bind(l.price.to_string())
    .bind(&l.store_name)
    .bind(&l.seller_name)
    .bind(&l.map_name)
    .bind(&l.map_coordinates)
    .bind(l.observed_at)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_event(conn: &mut SqliteConnection, e: &MarketEvent) -> Result<()> {
    let detail = serde_json::to_string(&e.detail)?;
    sqlx::query(
        r#"
        INSERT INTO market_events (timestamp, event_type, canonical_name, item_id, detail)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(e.timestamp)
    .bind(e.event_type.to_string())
    .bind(&e.canonical_name)
    .bind(e.item_id)
    .bind(detail)
    .execute(conn)
    .await?;
    Ok(())
}
