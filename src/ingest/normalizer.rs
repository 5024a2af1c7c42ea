use tracing::{debug, warn};

use crate::ingest::price::{parse_grouped, Price, PriceError};
use crate::types::{Listing, RawOffer, RawShop, ShopBlock};

/// A normalized listing plus the pieces the item resolver needs, which are not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedOffer {
    pub listing: Listing,
    /// Base item name with refinement and annotations stripped (slot marker kept).
    pub base_name: String,
    pub slots: Option<u8>,
}

/// Why an offer did not become a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    MissingName,
    MissingPrice,
    MissingShop,
    BadPrice(PriceError),
    BadQuantity(String),
    /// Name consisted only of a refinement marker.
    EmptyKey,
}

impl Rejection {
    /// Row-level parse failures, as opposed to offers that were simply incomplete.
    pub fn is_parse_failure(&self) -> bool {
        matches!(
            self,
            Rejection::BadPrice(_) | Rejection::BadQuantity(_) | Rejection::EmptyKey
        )
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NormalizeStats {
    pub offers_seen: usize,
    pub normalized: usize,
    pub missing_name: usize,
    pub missing_price: usize,
    pub missing_shop: usize,
    pub bad_price: usize,
    pub bad_quantity: usize,
    pub empty_key: usize,
}

impl NormalizeStats {
    fn count(&mut self, rejection: &Rejection) {
        match rejection {
            Rejection::MissingName => self.missing_name += 1,
            Rejection::MissingPrice => self.missing_price += 1,
            Rejection::MissingShop => self.missing_shop += 1,
            Rejection::BadPrice(_) => self.bad_price += 1,
            Rejection::BadQuantity(_) => self.bad_quantity += 1,
            Rejection::EmptyKey => self.empty_key += 1,
        }
    }

    pub fn dropped(&self) -> usize {
        self.offers_seen - self.normalized
    }
}

/// Normalize every offer of every shop block, dropping the ones that fail.
pub fn normalize_blocks(
    blocks: &[ShopBlock],
    observed_at: i64,
) -> (Vec<NormalizedOffer>, NormalizeStats) {
    let mut out = Vec::new();
    let mut stats = NormalizeStats::default();

    for block in blocks {
        for raw in &block.offers {
            stats.offers_seen += 1;
            match normalize_offer(raw, &block.shop, observed_at) {
                Ok(offer) => {
                    stats.normalized += 1;
                    out.push(offer);
                }
                Err(rejection) => {
                    if rejection.is_parse_failure() {
                        warn!(
                            store = block.shop.store_name.as_deref().unwrap_or(""),
                            name = raw.name.as_deref().unwrap_or(""),
                            "Dropping offer: {rejection:?}"
                        );
                    } else {
                        debug!(
                            store = block.shop.store_name.as_deref().unwrap_or(""),
                            "Skipping incomplete offer: {rejection:?}"
                        );
                    }
                    stats.count(&rejection);
                }
            }
        }
    }

    (out, stats)
}

pub fn normalize_offer(
    raw: &RawOffer,
    shop: &RawShop,
    observed_at: i64,
) -> Result<NormalizedOffer, Rejection> {
    let name = non_empty(raw.name.as_deref()).ok_or(Rejection::MissingName)?;
    let price_text = non_empty(raw.price.as_deref()).ok_or(Rejection::MissingPrice)?;
    let store_name = non_empty(shop.store_name.as_deref()).ok_or(Rejection::MissingShop)?;

    let price = price_text.parse::<Price>().map_err(Rejection::BadPrice)?;
    let quantity = parse_quantity(raw.quantity.as_deref())?;
    let key = canonical_key(name, raw.refine.as_deref(), &raw.enchants, &raw.cards)
        .ok_or(Rejection::EmptyKey)?;

    let listing = Listing {
        canonical_name: key.canonical,
        item_id: parse_item_id(raw.item_id.as_deref()),
        quantity,
        price,
        store_name: collapse_ws(store_name),
        seller_name: shop.seller_name.as_deref().map(collapse_ws).unwrap_or_default(),
        map_name: shop.map_name.as_deref().map(collapse_ws).unwrap_or_default(),
        map_coordinates: shop
            .map_coordinates
            .as_deref()
            .map(collapse_ws)
            .unwrap_or_default(),
        observed_at,
        available: true,
    };

    Ok(NormalizedOffer {
        listing,
        base_name: key.base,
        slots: key.slots,
    })
}

#[derive(Debug, PartialEq, Eq)]
pub struct CanonicalKey {
    pub canonical: String,
    pub base: String,
    pub slots: Option<u8>,
}

/// Build the grouping key: `<base> [+N] [enchant]... [card]...`.
///
/// A refinement token (`+7`) anywhere in the name is moved to follow the base name.
/// The separate refine field only applies when the name carries no marker. `+0` is
/// the same as no refinement.
pub fn canonical_key(
    name: &str,
    refine: Option<&str>,
    enchants: &[String],
    cards: &[String],
) -> Option<CanonicalKey> {
    let mut level: Option<u8> = None;
    let mut base_tokens: Vec<&str> = Vec::new();
    for token in name.split_whitespace() {
        match parse_refine_token(token) {
            Some(n) if level.is_none() => level = Some(n),
            Some(_) => {}
            None => base_tokens.push(token),
        }
    }

    if base_tokens.is_empty() {
        return None;
    }
    let base = base_tokens.join(" ");

    let level = level.or_else(|| {
        refine
            .map(|r| r.trim().trim_start_matches('+'))
            .and_then(|r| r.parse::<u8>().ok())
    });

    let mut canonical = base.clone();
    if let Some(n) = level.filter(|n| *n > 0) {
        canonical.push_str(&format!(" +{n}"));
    }
    for annotation in enchants.iter().chain(cards.iter()) {
        let inner = collapse_ws(annotation.trim().trim_start_matches('[').trim_end_matches(']'));
        if !inner.is_empty() {
            canonical.push_str(&format!(" [{inner}]"));
        }
    }

    let slots = slot_count(&base);
    Some(CanonicalKey { canonical, base, slots })
}

/// `+7` → 7. Anything else, including `+` alone or `+7a`, is not a refinement marker.
fn parse_refine_token(token: &str) -> Option<u8> {
    let digits = token.strip_prefix('+')?;
    if digits.is_empty() || digits.len() > 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Trailing `[3]` slot marker on the base name.
fn slot_count(base: &str) -> Option<u8> {
    let inner = base.strip_suffix(']')?;
    let open = inner.rfind('[')?;
    inner[open + 1..].trim().parse().ok()
}

fn parse_quantity(raw: Option<&str>) -> Result<i64, Rejection> {
    let Some(text) = non_empty(raw) else {
        return Ok(1);
    };
    let cleaned = text.trim_start_matches(['x', 'X']).trim();
    match parse_grouped(cleaned) {
        Ok(0) => Ok(1),
        Ok(n) if n > 0 => Ok(n),
        _ => Err(Rejection::BadQuantity(text.to_string())),
    }
}

fn parse_item_id(raw: Option<&str>) -> i64 {
    raw.and_then(|s| s.trim().parse::<i64>().ok())
        .filter(|id| *id > 0)
        .unwrap_or(0)
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shop() -> RawShop {
        RawShop {
            store_name: Some("Cheap Pots".to_string()),
            seller_name: Some("Alice".to_string()),
            map_name: Some("prontera".to_string()),
            map_coordinates: Some("150, 180".to_string()),
        }
    }

    fn offer(name: &str, price: &str) -> RawOffer {
        RawOffer {
            name: Some(name.to_string()),
            price: Some(price.to_string()),
            ..Default::default()
        }
    }

    fn key(name: &str) -> String {
        canonical_key(name, None, &[], &[]).unwrap().canonical
    }

    #[test]
    fn refinement_moves_to_suffix() {
        assert_eq!(key("+7 Blade"), "Blade +7");
        assert_eq!(key("Blade +7"), "Blade +7");
        assert_eq!(key("Two  Handed +10 Sword"), "Two Handed Sword +10");
        assert_eq!(key("+0 Blade"), "Blade");
    }

    #[test]
    fn refine_field_used_when_name_has_no_marker() {
        let k = canonical_key("Blade", Some("+4"), &[], &[]).unwrap();
        assert_eq!(k.canonical, "Blade +4");
        let k = canonical_key("+9 Blade", Some("4"), &[], &[]).unwrap();
        assert_eq!(k.canonical, "Blade +9");
    }

    #[test]
    fn annotations_are_bracketed_in_order() {
        let enchants = vec!["Str+3".to_string(), "[Agi+2]".to_string(), " ".to_string()];
        let cards = vec!["Hydra Card".to_string()];
        let k = canonical_key("+7 Blade [3]", None, &enchants, &cards).unwrap();
        assert_eq!(k.canonical, "Blade [3] +7 [Str+3] [Agi+2] [Hydra Card]");
        assert_eq!(k.base, "Blade [3]");
        assert_eq!(k.slots, Some(3));
    }

    #[test]
    fn refinement_only_name_has_no_key() {
        assert!(canonical_key("+7", None, &[], &[]).is_none());
        let err = normalize_offer(&offer("+7", "100"), &shop(), 1).unwrap_err();
        assert_eq!(err, Rejection::EmptyKey);
    }

    #[test]
    fn defaults_quantity_and_item_id() {
        let mut raw = offer("Red Potion", "50");
        raw.item_id = Some("n/a".to_string());
        let n = normalize_offer(&raw, &shop(), 7).unwrap();
        assert_eq!(n.listing.quantity, 1);
        assert_eq!(n.listing.item_id, 0);
        assert_eq!(n.listing.observed_at, 7);
        assert!(n.listing.available);
        assert_eq!(n.listing.map_coordinates, "150, 180");

        raw.quantity = Some("0".to_string());
        raw.item_id = Some(" 501 ".to_string());
        let n = normalize_offer(&raw, &shop(), 7).unwrap();
        assert_eq!(n.listing.quantity, 1);
        assert_eq!(n.listing.item_id, 501);

        raw.quantity = Some("1,200".to_string());
        assert_eq!(normalize_offer(&raw, &shop(), 7).unwrap().listing.quantity, 1200);
    }

    #[test]
    fn fractional_quantity_is_a_parse_failure() {
        let mut raw = offer("Red Potion", "50");
        for bad in ["1.5", "2,50", "x1.5"] {
            raw.quantity = Some(bad.to_string());
            let err = normalize_offer(&raw, &shop(), 1).unwrap_err();
            assert_eq!(err, Rejection::BadQuantity(bad.to_string()));
            assert!(err.is_parse_failure());
        }
        raw.quantity = Some("x3".to_string());
        assert_eq!(normalize_offer(&raw, &shop(), 1).unwrap().listing.quantity, 3);

        let priced = offer("Red Potion", "1,500.50");
        assert!(matches!(
            normalize_offer(&priced, &shop(), 1).unwrap_err(),
            Rejection::BadPrice(PriceError::BadGrouping(2))
        ));
    }

    #[test]
    fn incomplete_offers_are_rejected() {
        assert_eq!(
            normalize_offer(&RawOffer::default(), &shop(), 0).unwrap_err(),
            Rejection::MissingName
        );
        let mut raw = offer("Red Potion", "  ");
        assert_eq!(
            normalize_offer(&raw, &shop(), 0).unwrap_err(),
            Rejection::MissingPrice
        );
        raw.price = Some("50".to_string());
        let nameless_shop = RawShop {
            store_name: None,
            ..shop()
        };
        assert_eq!(
            normalize_offer(&raw, &nameless_shop, 0).unwrap_err(),
            Rejection::MissingShop
        );
    }

    #[test]
    fn parse_failures_drop_single_offer() {
        let block = ShopBlock {
            shop: shop(),
            offers: vec![
                offer("Red Potion", "50"),
                offer("Blue Potion", "lots"),
                RawOffer {
                    quantity: Some("several".to_string()),
                    ..offer("Green Potion", "10")
                },
                offer("", "10"),
            ],
        };
        let (out, stats) = normalize_blocks(&[block], 1);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].listing.canonical_name, "Red Potion");
        assert_eq!(stats.offers_seen, 4);
        assert_eq!(stats.normalized, 1);
        assert_eq!(stats.bad_price, 1);
        assert_eq!(stats.bad_quantity, 1);
        assert_eq!(stats.missing_name, 1);
        assert_eq!(stats.dropped(), 3);
    }

    #[test]
    fn textual_variants_share_a_key() {
        let a = offer("+7  Blade", "1,000");
        let b = RawOffer {
            refine: Some("7".to_string()),
            ..offer("Blade", "1000 z")
        };
        let na = normalize_offer(&a, &shop(), 1).unwrap();
        let nb = normalize_offer(&b, &shop(), 2).unwrap();
        assert_eq!(na.listing.canonical_name, nb.listing.canonical_name);
        assert_eq!(na.listing.price, nb.listing.price);
    }
}
