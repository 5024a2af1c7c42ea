use sqlx::SqliteConnection;
use tracing::warn;

use crate::error::Result;
use crate::ingest::price::{min_price, Price};
use crate::types::Listing;

/// All-time low for a name across every stored row, available or not.
///
/// Must run before the current cycle's rows are inserted, so the result is the low
/// prior to this cycle. Stored prices that no longer parse are skipped.
pub async fn historical_min(conn: &mut SqliteConnection, canonical_name: &str) -> Result<Option<Price>> {
    let prices: Vec<String> =
        sqlx::query_scalar("SELECT price FROM listings WHERE canonical_name = ?")
            .bind(canonical_name)
            .fetch_all(conn)
            .await?;

    let (min, skipped) = min_price(prices.iter().map(String::as_str));
    if skipped > 0 {
        warn!(
            canonical_name,
            skipped, "Skipped {skipped} stored prices that failed to parse"
        );
    }
    Ok(min)
}

/// The listing that sets a new low, if the batch strictly beats history.
/// With no history at all, the cheapest listing of the batch qualifies.
pub fn new_low(batch: &[Listing], historical: Option<Price>) -> Option<&Listing> {
    let cheapest = cheapest(batch)?;
    match historical {
        Some(low) if cheapest.price >= low => None,
        _ => Some(cheapest),
    }
}

/// First listing with the lowest price.
pub fn cheapest(batch: &[Listing]) -> Option<&Listing> {
    batch.iter().reduce(|best, l| if l.price < best.price { l } else { best })
}
