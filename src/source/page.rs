use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::config::selectors;
use crate::error::{AppError, Result};
use crate::source::retry::RetryPolicy;
use crate::source::ListingSource;
use crate::types::{RawOffer, RawShop, RosterEntry, ShopBlock};

/// Fetches the marketplace page over HTTP and pulls shop blocks out of the DOM.
pub struct HttpListingSource {
    client: reqwest::Client,
    url: String,
    retry: RetryPolicy,
}

impl HttpListingSource {
    pub fn new(url: String, request_timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        Ok(Self {
            client: build_client(request_timeout)?,
            url,
            retry,
        })
    }
}

#[async_trait]
impl ListingSource for HttpListingSource {
    async fn fetch(&self) -> Result<Vec<ShopBlock>> {
        let html = self
            .retry
            .run("market page", || fetch_page(&self.client, &self.url))
            .await?;
        let shops = extract_shops(&html)?;
        debug!(
            url = %self.url,
            shops = shops.len(),
            bytes = html.len(),
            "Fetched market page"
        );
        Ok(shops)
    }
}

pub fn build_client(request_timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(request_timeout).build()?)
}

/// GET `url` and return the body, treating any non-2xx status as a fetch error.
pub async fn fetch_page(client: &reqwest::Client, url: &str) -> Result<String> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(AppError::Fetch(format!("{url} returned {status}")));
    }
    Ok(resp.text().await?)
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| AppError::Config(format!("invalid selector {css:?}: {e}")))
}

/// Shop blocks in document order. A page without the market container is a shape
/// mismatch (maintenance page, login wall) rather than an empty market.
pub fn extract_shops(html: &str) -> Result<Vec<ShopBlock>> {
    let doc = Html::parse_document(html);

    let root_sel = selector(selectors::MARKET_ROOT)?;
    let shop_sel = selector(selectors::SHOP)?;
    let shop_name_sel = selector(selectors::SHOP_NAME)?;
    let seller_sel = selector(selectors::SELLER)?;
    let map_sel = selector(selectors::MAP)?;
    let coords_sel = selector(selectors::COORDS)?;
    let offer_sel = selector(selectors::OFFER)?;
    let id_sel = selector(selectors::ITEM_ID)?;
    let name_sel = selector(selectors::ITEM_NAME)?;
    let qty_sel = selector(selectors::QUANTITY)?;
    let price_sel = selector(selectors::PRICE)?;
    let refine_sel = selector(selectors::REFINE)?;
    let enchant_sel = selector(selectors::ENCHANT)?;
    let card_sel = selector(selectors::CARD)?;

    let root = doc.select(&root_sel).next().ok_or_else(|| {
        AppError::Fetch(format!(
            "page has no {} container",
            selectors::MARKET_ROOT
        ))
    })?;

    let shops = root
        .select(&shop_sel)
        .map(|shop| ShopBlock {
            shop: RawShop {
                store_name: text_of(shop, &shop_name_sel),
                seller_name: text_of(shop, &seller_sel),
                map_name: text_of(shop, &map_sel),
                map_coordinates: text_of(shop, &coords_sel),
            },
            offers: shop
                .select(&offer_sel)
                .map(|offer| RawOffer {
                    item_id: text_of(offer, &id_sel),
                    name: text_of(offer, &name_sel),
                    quantity: text_of(offer, &qty_sel),
                    price: text_of(offer, &price_sel),
                    refine: text_of(offer, &refine_sel),
                    enchants: texts_of(offer, &enchant_sel),
                    cards: texts_of(offer, &card_sel),
                })
                .collect(),
        })
        .collect();

    Ok(shops)
}

/// Online player count from the server status page.
pub fn extract_player_count(html: &str) -> Result<i64> {
    let doc = Html::parse_document(html);
    let sel = selector(selectors::PLAYER_COUNT)?;
    let text = doc
        .select(&sel)
        .next()
        .and_then(element_text)
        .ok_or_else(|| AppError::Fetch("status page has no player count".to_string()))?;

    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits
        .parse::<i64>()
        .map_err(|_| AppError::Fetch(format!("unreadable player count {text:?}")))
}

/// Guild members in document order. Guilds without a name and members without a
/// name are dropped; an unreadable level is kept as `None`.
pub fn extract_roster(html: &str) -> Result<Vec<RosterEntry>> {
    let doc = Html::parse_document(html);

    let root_sel = selector(selectors::ROSTER_ROOT)?;
    let guild_sel = selector(selectors::GUILD)?;
    let guild_name_sel = selector(selectors::GUILD_NAME)?;
    let member_sel = selector(selectors::MEMBER)?;
    let member_name_sel = selector(selectors::MEMBER_NAME)?;
    let class_sel = selector(selectors::MEMBER_CLASS)?;
    let level_sel = selector(selectors::MEMBER_LEVEL)?;

    let root = doc.select(&root_sel).next().ok_or_else(|| {
        AppError::Fetch(format!(
            "page has no {} container",
            selectors::ROSTER_ROOT
        ))
    })?;

    let mut entries = Vec::new();
    for guild in root.select(&guild_sel) {
        let Some(guild_name) = text_of(guild, &guild_name_sel) else {
            debug!("Skipping guild block without a name");
            continue;
        };
        for member in guild.select(&member_sel) {
            let Some(member_name) = text_of(member, &member_name_sel) else {
                continue;
            };
            entries.push(RosterEntry {
                guild_name: guild_name.clone(),
                member_name,
                class: text_of(member, &class_sel).unwrap_or_default(),
                level: text_of(member, &level_sel).and_then(|t| parse_level(&t)),
            });
        }
    }

    Ok(entries)
}

/// "Lv. 99" and "99" both read as 99.
fn parse_level(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn element_text(el: ElementRef<'_>) -> Option<String> {
    let text = el.text().collect::<Vec<_>>().join(" ");
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

fn text_of(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope.select(sel).next().and_then(element_text)
}

fn texts_of(scope: ElementRef<'_>, sel: &Selector) -> Vec<String> {
    scope.select(sel).filter_map(element_text).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <html><body>
        <div id="market">
          <div class="shop">
            <span class="shop-name">Cheap   Pots</span>
            <span class="shop-seller">Alice</span>
            <span class="shop-map">prontera</span>
            <span class="shop-coords">150, 180</span>
            <table>
              <tr class="offer">
                <td class="item-id">501</td>
                <td class="item-name">Red Potion</td>
                <td class="item-qty">5</td>
                <td class="item-price">50 z</td>
              </tr>
              <tr class="offer">
                <td class="item-id"></td>
                <td class="item-name">+7 Blade [3]</td>
                <td class="item-qty"></td>
                <td class="item-price">1,500,000 z</td>
                <td><span class="item-enchant">Str+3</span><span class="item-enchant">Agi+2</span></td>
                <td><span class="item-card">Hydra Card</span></td>
              </tr>
            </table>
          </div>
          <div class="shop">
            <span class="shop-seller">Bob</span>
            <table><tr class="offer"><td class="item-name">Herb</td><td class="item-price">5</td></tr></table>
          </div>
        </div>
        </body></html>
    "#;

    #[test]
    fn extracts_shops_and_offers() {
        let shops = extract_shops(PAGE).unwrap();
        assert_eq!(shops.len(), 2);

        let first = &shops[0];
        assert_eq!(first.shop.store_name.as_deref(), Some("Cheap Pots"));
        assert_eq!(first.shop.map_coordinates.as_deref(), Some("150, 180"));
        assert_eq!(first.offers.len(), 2);
        assert_eq!(first.offers[0].item_id.as_deref(), Some("501"));
        assert_eq!(first.offers[0].price.as_deref(), Some("50 z"));

        let blade = &first.offers[1];
        assert_eq!(blade.item_id, None);
        assert_eq!(blade.quantity, None);
        assert_eq!(blade.enchants, vec!["Str+3", "Agi+2"]);
        assert_eq!(blade.cards, vec!["Hydra Card"]);

        assert_eq!(shops[1].shop.store_name, None);
        assert_eq!(shops[1].offers[0].name.as_deref(), Some("Herb"));
    }

    #[test]
    fn empty_market_is_not_an_error() {
        let shops = extract_shops(r#"<div id="market"></div>"#).unwrap();
        assert!(shops.is_empty());
    }

    #[test]
    fn missing_container_is_a_shape_mismatch() {
        let err = extract_shops("<html><body>Down for maintenance</body></html>").unwrap_err();
        assert!(matches!(err, AppError::Fetch(_)));
        assert!(err.is_fetch_failure());
    }

    #[test]
    fn reads_player_count() {
        let html = r#"<div class="status"><b class="player-count"> 1,234 online </b></div>"#;
        assert_eq!(extract_player_count(html).unwrap(), 1234);
        assert!(extract_player_count("<p>offline</p>").is_err());
        assert!(extract_player_count(r#"<b class="player-count">n/a</b>"#).is_err());
    }

    const ROSTER: &str = r#"
        <div id="roster">
          <section class="guild">
            <h2 class="guild-name">Iron  Wolves</h2>
            <ul>
              <li class="guild-member">
                <span class="member-name">Alice</span>
                <span class="member-class">High Priest</span>
                <span class="member-level">Lv. 99</span>
              </li>
              <li class="guild-member">
                <span class="member-name">Bob</span>
                <span class="member-level">?</span>
              </li>
              <li class="guild-member"><span class="member-class">Knight</span></li>
            </ul>
          </section>
          <section class="guild">
            <ul><li class="guild-member"><span class="member-name">Nobody</span></li></ul>
          </section>
        </div>
    "#;

    #[test]
    fn extracts_roster_members() {
        let entries = extract_roster(ROSTER).unwrap();
        assert_eq!(
            entries,
            vec![
                RosterEntry {
                    guild_name: "Iron Wolves".to_string(),
                    member_name: "Alice".to_string(),
                    class: "High Priest".to_string(),
                    level: Some(99),
                },
                RosterEntry {
                    guild_name: "Iron Wolves".to_string(),
                    member_name: "Bob".to_string(),
                    class: String::new(),
                    level: None,
                },
            ]
        );
    }

    #[test]
    fn roster_without_container_is_a_shape_mismatch() {
        let err = extract_roster(PAGE).unwrap_err();
        assert!(err.is_fetch_failure());
        assert!(extract_roster(r#"<div id="roster"></div>"#).unwrap().is_empty());
    }
}
