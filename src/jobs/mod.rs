pub mod market_scrape;
pub mod player_count;
pub mod roster_scrape;

pub use market_scrape::MarketScrapeJob;
pub use player_count::PlayerCountJob;
pub use roster_scrape::RosterScrapeJob;
