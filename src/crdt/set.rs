//! Add-wins observed-remove set of items
//!
//! Presence is decided by tags: every add records a globally unique tag,
//! every remove covers the add-tags observed at removal time. An item exists
//! while at least one add-tag is not covered by the remove-tag set, so an
//! add concurrent with a remove survives the merge (add-wins).
//!
//! `pending_removals` is process-local bookkeeping: it hides a locally
//! removed item from reads until the next merge settles the tags.

use crate::common::{timestamp_now_millis, Error, Result};
use crate::crdt::item::Item;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// A field mutation handed to [`AworSet::update_field`]. Counters receive
/// the *target* value; the set converts it to a delta internally.
#[derive(Debug, Clone)]
pub enum ItemField {
    Name(String),
    Quantity(i64),
    Acquired(i64),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AworSet {
    node_id: String,
    elements: BTreeMap<String, Item>,
    add_tags: BTreeMap<String, BTreeSet<String>>,
    remove_tags: BTreeMap<String, BTreeSet<String>>,
    #[serde(skip)]
    pending_removals: HashSet<String>,
    #[serde(skip)]
    tag_counter: u64,
}

impl AworSet {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }

    /// Rebuild the in-memory set from persisted items at boot. Tags are
    /// process-local, so each surviving item gets a fresh add-tag.
    pub fn hydrate(node_id: impl Into<String>, items: Vec<Item>) -> Self {
        let mut set = Self::new(node_id);
        for item in items {
            let tag = set.fresh_tag();
            set.add_tags.entry(item.id.clone()).or_default().insert(tag);
            set.elements.insert(item.id.clone(), item);
        }
        set
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Globally unique tag: node, per-process counter, wall clock, and a
    /// uuid fragment so severe clock skew cannot collide two tags.
    fn fresh_tag(&mut self) -> String {
        self.tag_counter += 1;
        let frag = &uuid::Uuid::new_v4().simple().to_string()[..8];
        format!(
            "{}:{}:{}:{}",
            self.node_id,
            self.tag_counter,
            timestamp_now_millis(),
            frag
        )
    }

    /// True iff at least one add-tag is not covered by the remove-tag set.
    pub fn should_exist(&self, id: &str) -> bool {
        let Some(adds) = self.add_tags.get(id) else {
            return false;
        };
        match self.remove_tags.get(id) {
            Some(removes) => adds.iter().any(|t| !removes.contains(t)),
            None => !adds.is_empty(),
        }
    }

    /// Add (or re-add) an item. Clears any pending removal and the remove
    /// tags for the id: a re-add after a remove is a legitimate re-birth.
    pub fn add(&mut self, item: Item) {
        let id = item.id.clone();
        self.pending_removals.remove(&id);
        self.remove_tags.remove(&id);
        let tag = self.fresh_tag();
        self.add_tags.entry(id.clone()).or_default().insert(tag);
        self.elements.insert(id, item);
    }

    /// Remove an item: cover every observed add-tag and hide the item from
    /// local reads until the next merge.
    pub fn remove(&mut self, id: &str) -> Result<Item> {
        let item = self
            .elements
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("item {}", id)))?;
        let observed: BTreeSet<String> = self
            .add_tags
            .get(id)
            .cloned()
            .unwrap_or_default();
        self.remove_tags.entry(id.to_string()).or_default().extend(observed);
        self.pending_removals.insert(id.to_string());
        self.elements.remove(id);
        Ok(item)
    }

    /// Remove every item belonging to `list_id` (list deletion cascade).
    /// Returns the removed item ids.
    pub fn remove_list_items(&mut self, list_id: &str) -> Vec<String> {
        let ids: Vec<String> = self
            .elements
            .values()
            .filter(|item| item.list_id == list_id)
            .map(|item| item.id.clone())
            .collect();
        for id in &ids {
            let _ = self.remove(id);
        }
        ids
    }

    /// Mutate one field of an item toward a target value.
    ///
    /// Counters get the delta from this writer's own tally; the name goes
    /// through the LWW register. Bumps `last_updated` and the local
    /// component of the item's vector clock.
    pub fn update_field(
        &mut self,
        id: &str,
        field: ItemField,
        last_updated: Option<u64>,
    ) -> Result<Item> {
        if self.pending_removals.contains(id) {
            return Err(Error::NotFound(format!("item {} (removed)", id)));
        }
        let node_id = self.node_id.clone();
        let item = self
            .elements
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("item {}", id)))?;

        let stamp = last_updated.unwrap_or_else(timestamp_now_millis);
        match field {
            ItemField::Name(name) => item.name.set_at(name, stamp, &node_id),
            ItemField::Quantity(target) => item.quantity.set_value(&node_id, target),
            ItemField::Acquired(target) => item.acquired.set_value(&node_id, target),
        }
        item.last_updated = item.last_updated.max(stamp);
        item.vector_clock.increment(&node_id);
        Ok(item.clone())
    }

    /// Replace the stored element for an id whose incoming copy dominates
    /// the local one. Ensures the id carries at least one add-tag.
    pub fn adopt(&mut self, item: Item) {
        let id = item.id.clone();
        self.pending_removals.remove(&id);
        if !self.should_exist(&id) {
            let tag = self.fresh_tag();
            self.add_tags.entry(id.clone()).or_default().insert(tag);
        }
        self.elements.insert(id, item);
    }

    /// CRDT-merge a remote copy into the local element.
    ///
    /// A tombstoned id (removed here, no surviving add-tag) stays removed:
    /// plain updates are not adds and do not resurrect the item. Returns the
    /// merged item, or None when the update was dropped.
    pub fn merge_item(&mut self, incoming: &Item) -> Option<Item> {
        if let Some(local) = self.elements.get_mut(&incoming.id) {
            local.merge(incoming);
            return Some(local.clone());
        }
        if self.remove_tags.contains_key(&incoming.id) {
            return None;
        }
        let item = incoming.clone();
        let tag = self.fresh_tag();
        self.add_tags
            .entry(item.id.clone())
            .or_default()
            .insert(tag);
        self.elements.insert(item.id.clone(), item.clone());
        Some(item)
    }

    /// Full set merge with another replica's state.
    pub fn merge(&mut self, other: &Self) {
        self.pending_removals.clear();

        let ids: BTreeSet<String> = self
            .add_tags
            .keys()
            .chain(other.add_tags.keys())
            .chain(self.remove_tags.keys())
            .chain(other.remove_tags.keys())
            .cloned()
            .collect();

        for (id, tags) in &other.add_tags {
            self.add_tags.entry(id.clone()).or_default().extend(tags.iter().cloned());
        }
        for (id, tags) in &other.remove_tags {
            self.remove_tags.entry(id.clone()).or_default().extend(tags.iter().cloned());
        }

        for id in ids {
            if self.should_exist(&id) {
                if let Some(remote) = other.elements.get(&id) {
                    use std::collections::btree_map::Entry;
                    match self.elements.entry(id.clone()) {
                        Entry::Occupied(mut local) => local.get_mut().merge(remote),
                        Entry::Vacant(slot) => {
                            slot.insert(remote.clone());
                        }
                    }
                }
            } else {
                self.elements.remove(&id);
            }
        }
    }

    /// Read one item, honoring the local pending-removal suppression.
    pub fn get(&self, id: &str) -> Option<&Item> {
        if self.pending_removals.contains(id) {
            return None;
        }
        self.elements.get(id)
    }

    /// All visible items.
    pub fn items(&self) -> impl Iterator<Item = &Item> {
        self.elements
            .values()
            .filter(move |item| !self.pending_removals.contains(&item.id))
    }

    /// Visible items belonging to one list.
    pub fn items_for_list<'a>(&'a self, list_id: &'a str) -> impl Iterator<Item = &'a Item> {
        self.items().filter(move |item| item.list_id == list_id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, qty: i64) -> Item {
        Item::new(id, "L1", format!("item {}", id), qty, "test")
    }

    #[test]
    fn test_add_then_read() {
        let mut set = AworSet::new("a");
        set.add(item("I1", 3));
        assert!(set.contains("I1"));
        assert_eq!(set.get("I1").unwrap().quantity.value(), 3);
        assert_eq!(set.items_for_list("L1").count(), 1);
    }

    #[test]
    fn test_remove_hides_immediately() {
        let mut set = AworSet::new("a");
        set.add(item("I1", 1));
        set.remove("I1").unwrap();
        assert!(!set.contains("I1"));
        assert!(!set.should_exist("I1"));
        assert!(set.remove("I1").is_err());
    }

    #[test]
    fn test_update_field_converts_targets_to_deltas() {
        let mut set = AworSet::new("a");
        set.add(item("I1", 3));
        let updated = set.update_field("I1", ItemField::Quantity(5), None).unwrap();
        assert_eq!(updated.quantity.value(), 5);
        assert_eq!(updated.vector_clock.get("a"), 1);

        let updated = set.update_field("I1", ItemField::Acquired(2), None).unwrap();
        assert_eq!(updated.acquired.value(), 2);
        assert_eq!(updated.vector_clock.get("a"), 2);

        set.remove("I1").unwrap();
        assert!(set
            .update_field("I1", ItemField::Quantity(9), None)
            .is_err());
    }

    #[test]
    fn test_add_wins_over_concurrent_remove() {
        let mut a = AworSet::new("a");
        a.add(item("I1", 1));
        let mut b = a.clone();

        // replica a removes, replica b concurrently re-adds
        a.remove("I1").unwrap();
        b.add(item("I1", 2));

        let mut a2 = a.clone();
        a2.merge(&b);
        let mut b2 = b.clone();
        b2.merge(&a);

        assert!(a2.contains("I1"), "add must win on a");
        assert!(b2.contains("I1"), "add must win on b");
    }

    #[test]
    fn test_remove_propagates_when_uncontested() {
        let mut a = AworSet::new("a");
        a.add(item("I1", 1));
        let mut b = a.clone();

        a.remove("I1").unwrap();
        b.merge(&a);
        assert!(!b.contains("I1"));
    }

    #[test]
    fn test_rebirth_after_remove() {
        let mut set = AworSet::new("a");
        set.add(item("I1", 1));
        set.remove("I1").unwrap();
        set.add(item("I1", 7));
        assert!(set.contains("I1"));
        assert_eq!(set.get("I1").unwrap().quantity.value(), 7);
    }

    #[test]
    fn test_merge_laws() {
        let mut a = AworSet::new("a");
        a.add(item("I1", 1));
        let mut b = AworSet::new("b");
        b.add(item("I2", 2));
        let mut c = AworSet::new("c");
        c.add(item("I3", 3));
        c.remove("I3").unwrap();

        let visible = |s: &AworSet| {
            let mut ids: Vec<String> = s.items().map(|i| i.id.clone()).collect();
            ids.sort();
            ids
        };

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(visible(&ab), visible(&ba), "commutative");

        let mut ab_c = ab.clone();
        ab_c.merge(&c);
        let mut bc = b.clone();
        bc.merge(&c);
        let mut a_bc = a.clone();
        a_bc.merge(&bc);
        assert_eq!(visible(&ab_c), visible(&a_bc), "associative");

        let mut aa = a.clone();
        aa.merge(&a.clone());
        assert_eq!(visible(&aa), visible(&a), "idempotent");
    }

    #[test]
    fn test_merge_clears_pending_removals() {
        let mut a = AworSet::new("a");
        a.add(item("I1", 1));
        let b = a.clone();
        a.remove("I1").unwrap();

        // b still carries the original add-tags, which a's remove covered
        a.merge(&b);
        assert!(!a.contains("I1"), "covered tags stay removed");

        // but a concurrent add with a fresh tag survives
        let mut c = AworSet::new("c");
        c.add(item("I1", 5));
        a.merge(&c);
        assert!(a.contains("I1"));
    }

    #[test]
    fn test_merge_item_ignores_tombstoned() {
        let mut set = AworSet::new("a");
        set.add(item("I1", 1));
        set.remove("I1").unwrap();

        let remote = item("I1", 4);
        assert!(set.merge_item(&remote).is_none());
        assert!(!set.contains("I1"));
    }

    #[test]
    fn test_cascade_remove_list_items() {
        let mut set = AworSet::new("a");
        set.add(item("I1", 1));
        set.add(item("I2", 1));
        set.add(Item::new("I3", "L2", "other", 1, "test"));

        let mut removed = set.remove_list_items("L1");
        removed.sort();
        assert_eq!(removed, vec!["I1".to_string(), "I2".to_string()]);
        assert!(set.contains("I3"));
        assert_eq!(set.items().count(), 1);
    }

    #[test]
    fn test_hydrate_reseeds_tags() {
        let items = vec![item("I1", 1), item("I2", 2)];
        let set = AworSet::hydrate("a", items);
        assert!(set.should_exist("I1"));
        assert!(set.should_exist("I2"));
        assert_eq!(set.items().count(), 2);
    }
}
