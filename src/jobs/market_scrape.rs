use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use crate::db::writer::CycleWriter;
use crate::error::{AppError, Result};
use crate::ingest::{normalize_blocks, NormalizedOffer};
use crate::scheduler::Job;
use crate::source::{ItemResolver, ListingSource};
use crate::types::{now_ns, CycleReport, Listing};

/// The ingestion pipeline: fetch → normalize → resolve ids → diff and commit.
pub struct MarketScrapeJob {
    source: Arc<dyn ListingSource>,
    resolver: Arc<dyn ItemResolver>,
    writer: CycleWriter,
    interval: Duration,
    fetch_timeout: Duration,
}

impl MarketScrapeJob {
    pub fn new(
        source: Arc<dyn ListingSource>,
        resolver: Arc<dyn ItemResolver>,
        pool: sqlx::SqlitePool,
        interval: Duration,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            resolver,
            writer: CycleWriter::new(pool),
            interval,
            fetch_timeout,
        }
    }

    pub async fn run_cycle_at(&self, scraped_at: i64) -> Result<CycleReport> {
        // Fetch failures end the cycle here, before anything touches the store.
        let blocks = tokio::time::timeout(self.fetch_timeout, self.source.fetch())
            .await
            .map_err(|_| AppError::Timeout(self.fetch_timeout.as_secs()))??;

        let (offers, stats) = normalize_blocks(&blocks, scraped_at);
        let listings = self.resolve_ids(offers).await;
        let report = self.writer.commit_cycle(listings, scraped_at).await?;

        info!(
            job = "market",
            shops = blocks.len(),
            offers = stats.offers_seen,
            dropped = stats.dropped(),
            bad_price = stats.bad_price,
            bad_quantity = stats.bad_quantity,
            unchanged = report.unchanged,
            inserted = report.inserted,
            retired = report.retired,
            added = report.added,
            removed = report.removed,
            new_lows = report.new_lows,
            "Market cycle committed: {} listings, {} events",
            stats.normalized,
            report.events(),
        );
        Ok(report)
    }

    /// Fill in item ids the page did not carry. Each distinct (name, slots) pair is
    /// looked up once per cycle.
    async fn resolve_ids(&self, offers: Vec<NormalizedOffer>) -> Vec<Listing> {
        let mut cache: HashMap<(String, Option<u8>), Option<i64>> = HashMap::new();
        let mut out = Vec::with_capacity(offers.len());

        for offer in offers {
            let mut listing = offer.listing;
            if listing.item_id == 0 {
                let key = (offer.base_name, offer.slots);
                let id = match cache.get(&key) {
                    Some(id) => *id,
                    None => {
                        let id = self.resolver.resolve(&key.0, key.1).await;
                        cache.insert(key, id);
                        id
                    }
                };
                listing.item_id = id.unwrap_or(0);
            }
            out.push(listing);
        }
        out
    }
}

#[async_trait]
impl Job for MarketScrapeJob {
    fn name(&self) -> &'static str {
        "market"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run_cycle(&self) -> Result<()> {
        self.run_cycle_at(now_ns()).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::db::{self, queries};
    use crate::source::UnknownItems;
    use crate::types::{RawOffer, RawShop, ShopBlock};

    /// Replays scripted responses. `None` hangs past any timeout.
    struct Scripted {
        responses: Mutex<VecDeque<Option<Vec<ShopBlock>>>>,
    }

    impl Scripted {
        fn new(responses: Vec<Option<Vec<ShopBlock>>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
            })
        }
    }

    #[async_trait]
    impl ListingSource for Scripted {
        async fn fetch(&self) -> Result<Vec<ShopBlock>> {
            let next = self.responses.lock().unwrap().pop_front().flatten();
            match next {
                Some(blocks) => Ok(blocks),
                None => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    struct CountingResolver {
        calls: AtomicU32,
    }

    #[async_trait]
    impl ItemResolver for CountingResolver {
        async fn resolve(&self, base_name: &str, _slots: Option<u8>) -> Option<i64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (base_name == "Blade [3]").then_some(1109)
        }
    }

    fn shop(offers: Vec<RawOffer>) -> Vec<ShopBlock> {
        vec![ShopBlock {
            shop: RawShop {
                store_name: Some("Cheap Pots".to_string()),
                seller_name: Some("Alice".to_string()),
                map_name: Some("prontera".to_string()),
                map_coordinates: Some("150,180".to_string()),
            },
            offers,
        }]
    }

    fn offer(id: Option<&str>, name: &str, qty: &str, price: &str) -> RawOffer {
        RawOffer {
            item_id: id.map(str::to_string),
            name: Some(name.to_string()),
            quantity: Some(qty.to_string()),
            price: Some(price.to_string()),
            ..Default::default()
        }
    }

    fn job(source: Arc<dyn ListingSource>, resolver: Arc<dyn ItemResolver>, pool: &sqlx::SqlitePool) -> MarketScrapeJob {
        MarketScrapeJob::new(
            source,
            resolver,
            pool.clone(),
            Duration::from_secs(300),
            Duration::from_millis(50),
        )
    }

    async fn count(pool: &sqlx::SqlitePool, table: &str) -> i64 {
        sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn first_sighting_from_raw_strings() {
        let pool = db::test_pool().await;
        let source = Scripted::new(vec![Some(shop(vec![offer(
            Some("501"),
            "Red Potion",
            "5",
            "50",
        )]))]);
        let j = job(source, Arc::new(UnknownItems), &pool);

        let report = j.run_cycle_at(1_000).await.unwrap();
        assert_eq!((report.inserted, report.added, report.new_lows), (1, 1, 1));

        let rows = queries::current_listings(&pool, "Red Potion").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].item_id, 501);
        assert_eq!(rows[0].price, "50");
        assert_eq!(rows[0].observed_at, 1_000);
        assert_eq!(queries::latest_scrape(&pool).await.unwrap(), Some(1_000));
    }

    #[tokio::test]
    async fn fetch_timeout_leaves_store_untouched() {
        let pool = db::test_pool().await;
        let source = Scripted::new(vec![
            None,
            Some(shop(vec![offer(Some("501"), "Red Potion", "5", "50")])),
        ]);
        let j = job(source, Arc::new(UnknownItems), &pool);

        let err = j.run_cycle_at(1).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
        assert!(err.is_fetch_failure());
        assert_eq!(count(&pool, "listings").await, 0);
        assert_eq!(count(&pool, "market_events").await, 0);
        assert_eq!(count(&pool, "scrape_history").await, 0);

        // The next tick succeeds normally.
        let report = j.run_cycle_at(2).await.unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(count(&pool, "scrape_history").await, 1);
    }

    #[tokio::test]
    async fn resolver_fills_unknown_ids_once_per_name() {
        let pool = db::test_pool().await;
        let source = Scripted::new(vec![Some(shop(vec![
            offer(None, "+7 Blade [3]", "1", "1,500,000"),
            offer(None, "Blade [3]", "1", "900,000"),
            offer(None, "Jellopy", "10", "12"),
            offer(Some("501"), "Red Potion", "5", "50"),
        ]))]);
        let resolver = Arc::new(CountingResolver {
            calls: AtomicU32::new(0),
        });
        let j = job(source, resolver.clone(), &pool);

        j.run_cycle_at(1).await.unwrap();

        let refined = queries::current_listings(&pool, "Blade [3] +7").await.unwrap();
        assert_eq!(refined[0].item_id, 1109);
        let plain = queries::current_listings(&pool, "Blade [3]").await.unwrap();
        assert_eq!(plain[0].item_id, 1109);
        let jellopy = queries::current_listings(&pool, "Jellopy").await.unwrap();
        assert_eq!(jellopy[0].item_id, 0);
        // Both blades share one lookup; the potion already had an id.
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn identical_rerun_writes_only_the_ledger() {
        let pool = db::test_pool().await;
        let page = shop(vec![
            offer(Some("501"), "Red Potion", "5", "50"),
            offer(Some("502"), "Orange Potion", "2", "120"),
        ]);
        let source = Scripted::new(vec![Some(page.clone()), Some(page)]);
        let j = job(source, Arc::new(UnknownItems), &pool);

        j.run_cycle_at(1).await.unwrap();
        let events = count(&pool, "market_events").await;
        let report = j.run_cycle_at(2).await.unwrap();

        assert_eq!(report.unchanged, 2);
        assert_eq!(report.inserted + report.retired + report.events(), 0);
        assert_eq!(count(&pool, "listings").await, 2);
        assert_eq!(count(&pool, "market_events").await, events);
        assert_eq!(count(&pool, "scrape_history").await, 2);
    }
}
