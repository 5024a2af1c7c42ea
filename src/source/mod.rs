//! Collaborators the ingestion pipeline consumes: where raw offers come from and how
//! item names map to numeric ids.

pub mod page;
pub mod resolver;
pub mod retry;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::ShopBlock;

/// Produces the raw offers of one marketplace snapshot. Any error aborts the cycle.
#[async_trait]
pub trait ListingSource: Send + Sync {
    async fn fetch(&self) -> Result<Vec<ShopBlock>>;
}

/// Maps a base item name (and slot count, when the name carries one) to an item id.
/// `None` means unknown; ingestion continues with id 0.
#[async_trait]
pub trait ItemResolver: Send + Sync {
    async fn resolve(&self, base_name: &str, slots: Option<u8>) -> Option<i64>;
}

pub use page::HttpListingSource;
pub use resolver::{SqliteItemResolver, UnknownItems};
pub use retry::RetryPolicy;
