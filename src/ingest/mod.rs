//! Pure ingestion stages: offer normalization, price parsing, snapshot diffing and
//! the historical low-price check.

pub mod differ;
pub mod low_price;
pub mod normalizer;
pub mod price;

pub use differ::diff;
pub use normalizer::{normalize_blocks, NormalizedOffer};
