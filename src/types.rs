use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::ingest::price::Price;

// ---------------------------------------------------------------------------
// Raw scraped fields, as handed over by a listing source
// ---------------------------------------------------------------------------

/// Context shared by every offer in one shop block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawShop {
    pub store_name: Option<String>,
    pub seller_name: Option<String>,
    pub map_name: Option<String>,
    pub map_coordinates: Option<String>,
}

/// Field strings for one offer, untouched apart from trimming by the extractor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOffer {
    pub item_id: Option<String>,
    pub name: Option<String>,
    pub quantity: Option<String>,
    pub price: Option<String>,
    pub refine: Option<String>,
    pub enchants: Vec<String>,
    pub cards: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShopBlock {
    pub shop: RawShop,
    pub offers: Vec<RawOffer>,
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// One observed marketplace offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Listing {
    pub canonical_name: String,
    /// 0 when the item could not be identified.
    pub item_id: i64,
    pub quantity: i64,
    pub price: Price,
    pub store_name: String,
    pub seller_name: String,
    pub map_name: String,
    pub map_coordinates: String,
    /// Nanosecond UTC epoch.
    pub observed_at: i64,
    pub available: bool,
}

// ---------------------------------------------------------------------------
// Market events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Added,
    Removed,
    NewLow,
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventType::Added => "ADDED",
            EventType::Removed => "REMOVED",
            EventType::NewLow => "NEW_LOW",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADDED" => Ok(EventType::Added),
            "REMOVED" => Ok(EventType::Removed),
            "NEW_LOW" => Ok(EventType::NewLow),
            other => Err(format!("unknown event type {other:?}")),
        }
    }
}

/// Snapshot of the offer an event refers to, stored as the JSON `detail` blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDetail {
    pub price: String,
    pub quantity: i64,
    pub store_name: String,
    pub seller_name: String,
    pub map_name: String,
    pub map_coordinates: String,
}

impl From<&Listing> for EventDetail {
    fn from(l: &Listing) -> Self {
        Self {
            price: l.price.to_string(),
            quantity: l.quantity,
            store_name: l.store_name.clone(),
            seller_name: l.seller_name.clone(),
            map_name: l.map_name.clone(),
            map_coordinates: l.map_coordinates.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketEvent {
    pub timestamp: i64,
    pub event_type: EventType,
    pub canonical_name: String,
    pub item_id: i64,
    pub detail: EventDetail,
}

// ---------------------------------------------------------------------------
// Guild roster
// ---------------------------------------------------------------------------

/// One member line of the guild roster page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub guild_name: String,
    pub member_name: String,
    /// Empty when the page leaves it out.
    pub class: String,
    pub level: Option<i64>,
}

// ---------------------------------------------------------------------------
// Cycle outcome
// ---------------------------------------------------------------------------

/// What one committed ingestion cycle changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub scraped_at: i64,
    pub unchanged: usize,
    pub inserted: usize,
    pub retired: usize,
    pub added: usize,
    pub removed: usize,
    pub new_lows: usize,
}

impl CycleReport {
    pub fn events(&self) -> usize {
        self.added + self.removed + self.new_lows
    }
}

/// Nanosecond UTC epoch, the time unit for every stored timestamp.
pub fn now_ns() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}
