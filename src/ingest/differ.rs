use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::ingest::price::Price;
use crate::types::Listing;

/// The part of a listing that decides whether a group changed. Storage id, observation
/// time and the resolved item id are left out: offers have no identity of their own and
/// item id resolution may flicker between cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComparableListing<'a> {
    pub canonical_name: &'a str,
    pub quantity: i64,
    pub price: Price,
    pub store_name: &'a str,
    pub seller_name: &'a str,
    pub map_name: &'a str,
    pub map_coordinates: &'a str,
}

impl<'a> From<&'a Listing> for ComparableListing<'a> {
    fn from(l: &'a Listing) -> Self {
        Self {
            canonical_name: &l.canonical_name,
            quantity: l.quantity,
            price: l.price,
            store_name: &l.store_name,
            seller_name: &l.seller_name,
            map_name: &l.map_name,
            map_coordinates: &l.map_coordinates,
        }
    }
}

/// Order-insensitive equality that respects multiplicity.
pub fn same_multiset(a: &[Listing], b: &[Listing]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut counts: HashMap<ComparableListing<'_>, isize> = HashMap::with_capacity(a.len());
    for l in a {
        *counts.entry(ComparableListing::from(l)).or_default() += 1;
    }
    for l in b {
        match counts.get_mut(&ComparableListing::from(l)) {
            Some(n) if *n > 0 => *n -= 1,
            _ => return false,
        }
    }
    true
}

/// Partition of canonical names for one cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SnapshotDiff {
    pub unchanged: BTreeSet<String>,
    /// Groups whose incoming offers differ from what is stored, with those offers.
    pub changed: BTreeMap<String, Vec<Listing>>,
    /// Groups that are stored as available but absent from this cycle.
    pub removed: BTreeSet<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

pub fn group_by_name(listings: Vec<Listing>) -> BTreeMap<String, Vec<Listing>> {
    let mut groups: BTreeMap<String, Vec<Listing>> = BTreeMap::new();
    for l in listings {
        groups.entry(l.canonical_name.clone()).or_default().push(l);
    }
    groups
}

/// Compare this cycle's listings with the currently available stored groups.
/// Names in `unreadable` have available rows that could not be loaded for comparison:
/// they are rewritten when present in the batch and retired when absent.
pub fn diff(
    incoming: Vec<Listing>,
    stored: &HashMap<String, Vec<Listing>>,
    unreadable: &HashSet<&str>,
) -> SnapshotDiff {
    let incoming = group_by_name(incoming);
    let mut out = SnapshotDiff::default();

    for (name, group) in incoming {
        let current = stored.get(&name).map(Vec::as_slice).unwrap_or(&[]);
        if !unreadable.contains(name.as_str()) && same_multiset(&group, current) {
            out.unchanged.insert(name);
        } else {
            out.changed.insert(name, group);
        }
    }

    let stored_names = stored
        .iter()
        .filter(|(_, rows)| !rows.is_empty())
        .map(|(name, _)| name.as_str());
    for name in stored_names.chain(unreadable.iter().copied()) {
        if !out.unchanged.contains(name) && !out.changed.contains_key(name) {
            out.removed.insert(name.to_string());
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(name: &str, qty: i64, price: i64, seller: &str) -> Listing {
        Listing {
            canonical_name: name.to_string(),
            item_id: 0,
            quantity: qty,
            price: Price::new(price),
            store_name: "Shop".to_string(),
            seller_name: seller.to_string(),
            map_name: "prontera".to_string(),
            map_coordinates: "1,1".to_string(),
            observed_at: 0,
            available: true,
        }
    }

    #[test]
    fn multiset_ignores_order_but_not_multiplicity() {
        let a = vec![
            listing("Potion", 1, 10, "a"),
            listing("Potion", 1, 10, "a"),
            listing("Potion", 2, 10, "b"),
        ];
        let mut reordered = a.clone();
        reordered.reverse();
        assert!(same_multiset(&a, &reordered));

        let b = vec![
            listing("Potion", 1, 10, "a"),
            listing("Potion", 2, 10, "b"),
            listing("Potion", 2, 10, "b"),
        ];
        assert!(!same_multiset(&a, &b));
        assert!(!same_multiset(&a, &a[..2]));
    }

    #[test]
    fn timestamp_and_item_id_do_not_count_as_change() {
        let stored = listing("Potion", 5, 50, "a");
        let mut incoming = stored.clone();
        incoming.observed_at = 99;
        incoming.item_id = 501;
        assert!(same_multiset(&[stored], &[incoming]));
    }

    #[test]
    fn partitions_unchanged_changed_and_removed() {
        let mut stored = HashMap::new();
        stored.insert("Potion".to_string(), vec![listing("Potion", 5, 50, "a")]);
        stored.insert("Herb".to_string(), vec![listing("Herb", 1, 5, "a")]);
        stored.insert("Apple".to_string(), vec![listing("Apple", 1, 15, "b")]);

        let incoming = vec![
            listing("Potion", 5, 50, "a"),
            listing("Herb", 1, 4, "a"),
            listing("Jellopy", 3, 2, "c"),
        ];
        let d = diff(incoming, &stored, &HashSet::new());

        assert_eq!(d.unchanged.iter().collect::<Vec<_>>(), vec!["Potion"]);
        assert_eq!(d.changed.keys().collect::<Vec<_>>(), vec!["Herb", "Jellopy"]);
        assert_eq!(d.changed["Herb"][0].price, Price::new(4));
        assert_eq!(d.removed.iter().collect::<Vec<_>>(), vec!["Apple"]);
        assert!(!d.is_empty());
    }

    #[test]
    fn reordered_batch_reports_nothing() {
        let rows = vec![
            listing("Potion", 1, 10, "a"),
            listing("Potion", 3, 12, "b"),
            listing("Potion", 1, 10, "c"),
        ];
        let mut stored = HashMap::new();
        stored.insert("Potion".to_string(), rows.clone());

        let mut incoming = rows;
        incoming.rotate_left(1);
        let d = diff(incoming, &stored, &HashSet::new());
        assert!(d.is_empty());
        assert_eq!(d.unchanged.len(), 1);
    }

    #[test]
    fn empty_cycle_removes_everything() {
        let mut stored = HashMap::new();
        stored.insert("Potion".to_string(), vec![listing("Potion", 1, 10, "a")]);
        let d = diff(Vec::new(), &stored, &HashSet::new());
        assert!(d.changed.is_empty());
        assert!(d.removed.contains("Potion"));
    }

    #[test]
    fn unreadable_groups_are_rewritten_or_removed() {
        let rows = vec![listing("Potion", 1, 10, "a")];
        let mut stored = HashMap::new();
        // Potion also has an unreadable row, so its parsed rows alone are not the group.
        stored.insert("Potion".to_string(), rows.clone());
        let unreadable: HashSet<&str> = ["Potion", "Odd", "Gone"].into_iter().collect();

        let mut incoming = rows;
        incoming.push(listing("Odd", 1, 7, "b"));
        let d = diff(incoming, &stored, &unreadable);

        assert!(d.unchanged.is_empty());
        assert_eq!(d.changed.keys().collect::<Vec<_>>(), vec!["Odd", "Potion"]);
        assert_eq!(d.removed.iter().collect::<Vec<_>>(), vec!["Gone"]);
    }
}
