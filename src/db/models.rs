//! Row types for the tables in `migrations/`.

use serde::Serialize;

use crate::ingest::price::{Price, PriceError};
use crate::types::{EventDetail, Listing};

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct ListingRow {
    pub id: i64,
    pub canonical_name: String,
    pub item_id: i64,
    pub quantity: i64,
    pub price: String,
    pub store_name: String,
    pub seller_name: String,
    pub map_name: String,
    pub map_coordinates: String,
    pub observed_at: i64,
    pub available: bool,
}

impl ListingRow {
    pub fn parsed_price(&self) -> Result<Price, PriceError> {
        self.price.parse()
    }

    /// The row as a `Listing`, with its price already parsed by the caller.
    pub fn with_price(self, price: Price) -> Listing {
        Listing {
            canonical_name: self.canonical_name,
            item_id: self.item_id,
            quantity: self.quantity,
            price,
            store_name: self.store_name,
            seller_name: self.seller_name,
            map_name: self.map_name,
            map_coordinates: self.map_coordinates,
            observed_at: self.observed_at,
            available: self.available,
        }
    }
}

/// Keeps the stored price text as-is, parsable or not.
impl From<&ListingRow> for EventDetail {
    fn from(r: &ListingRow) -> Self {
        Self {
            price: r.price.clone(),
            quantity: r.quantity,
            store_name: r.store_name.clone(),
            seller_name: r.seller_name.clone(),
            map_name: r.map_name.clone(),
            map_coordinates: r.map_coordinates.clone(),
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MarketEventRow {
    pub id: i64,
    pub timestamp: i64,
    pub event_type: String,
    pub canonical_name: String,
    pub item_id: i64,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct PlayerSampleRow {
    pub sampled_at: i64,
    pub player_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct RosterSampleRow {
    pub sampled_at: i64,
    pub guilds: i64,
    pub members: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow, Serialize)]
pub struct RosterMemberRow {
    pub guild_name: String,
    pub member_name: String,
    pub class: String,
    pub level: Option<i64>,
}
