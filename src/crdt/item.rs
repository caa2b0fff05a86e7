//! The replicated shopping-list data model
//!
//! A list owns its name (LWW register) and a vector clock. An item owns a
//! name register, two PN counters (desired and acquired quantity), and its
//! own clock. Merging is field-wise: LWW for the name, per-node max for the
//! counters, component-wise max for the clock, max for `last_updated`.
//!
//! Two serialized shapes exist per entity: the internal document (CRDT state
//! embedded, used for storage and replication) and the view (flat values for
//! the HTTP surface, with the CRDT state attached so clients can merge).

use crate::common::timestamp_now_millis;
use crate::crdt::{LwwRegister, PnCounter, VectorClock};
use serde::{Deserialize, Serialize};

/// A shopping list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct List {
    pub id: String,
    pub name: LwwRegister<String>,
    pub created_at: u64,
    pub last_updated: u64,
    pub vector_clock: VectorClock,
}

impl List {
    pub fn new(id: impl Into<String>, name: impl Into<String>, writer: &str) -> Self {
        let now = timestamp_now_millis();
        let mut vector_clock = VectorClock::new();
        vector_clock.increment(writer);
        Self {
            id: id.into(),
            name: LwwRegister::with_timestamp(name.into(), now, writer),
            created_at: now,
            last_updated: now,
            vector_clock,
        }
    }

    /// Field-wise CRDT merge with another replica's copy of this list.
    pub fn merge(&mut self, other: &Self) {
        debug_assert_eq!(self.id, other.id);
        self.name.merge(&other.name);
        self.created_at = self.created_at.min(other.created_at);
        self.last_updated = self.last_updated.max(other.last_updated);
        self.vector_clock.merge(&other.vector_clock);
    }

    pub fn view(&self, items: Option<Vec<ItemView>>) -> ListView {
        ListView {
            id: self.id.clone(),
            name: self.name.get().clone(),
            created_at: self.created_at,
            last_updated: self.last_updated,
            vector_clock: self.vector_clock.clone(),
            crdt: ListCrdtState {
                name: self.name.clone(),
            },
            items,
        }
    }
}

/// An item inside a list. `list_id` is immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub list_id: String,
    pub name: LwwRegister<String>,
    pub quantity: PnCounter,
    pub acquired: PnCounter,
    pub created_at: u64,
    pub last_updated: u64,
    pub vector_clock: VectorClock,
}

impl Item {
    pub fn new(
        id: impl Into<String>,
        list_id: impl Into<String>,
        name: impl Into<String>,
        quantity: i64,
        writer: &str,
    ) -> Self {
        let now = timestamp_now_millis();
        let mut vector_clock = VectorClock::new();
        vector_clock.increment(writer);
        let mut qty = PnCounter::new();
        qty.set_value(writer, quantity);
        Self {
            id: id.into(),
            list_id: list_id.into(),
            name: LwwRegister::with_timestamp(name.into(), now, writer),
            quantity: qty,
            acquired: PnCounter::new(),
            created_at: now,
            last_updated: now,
            vector_clock,
        }
    }

    /// Field-wise CRDT merge with another replica's copy of this item.
    pub fn merge(&mut self, other: &Self) {
        debug_assert_eq!(self.id, other.id);
        self.name.merge(&other.name);
        self.quantity.merge(&other.quantity);
        self.acquired.merge(&other.acquired);
        self.created_at = self.created_at.min(other.created_at);
        self.last_updated = self.last_updated.max(other.last_updated);
        self.vector_clock.merge(&other.vector_clock);
    }

    pub fn view(&self) -> ItemView {
        ItemView {
            id: self.id.clone(),
            list_id: self.list_id.clone(),
            name: self.name.get().clone(),
            quantity: self.quantity.value(),
            acquired: self.acquired.value(),
            created_at: self.created_at,
            last_updated: self.last_updated,
            vector_clock: self.vector_clock.clone(),
            crdt: ItemCrdtState {
                name: self.name.clone(),
                quantity: self.quantity.clone(),
                acquired: self.acquired.clone(),
            },
        }
    }
}

/// CRDT payload attached to an item view so other replicas can merge
/// state-wise instead of guessing deltas from flat values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemCrdtState {
    pub name: LwwRegister<String>,
    pub quantity: PnCounter,
    pub acquired: PnCounter,
}

/// Flat item representation served over HTTP and SSE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemView {
    pub id: String,
    pub list_id: String,
    pub name: String,
    pub quantity: i64,
    pub acquired: i64,
    pub created_at: u64,
    pub last_updated: u64,
    pub vector_clock: VectorClock,
    pub crdt: ItemCrdtState,
}

impl ItemView {
    /// Reconstruct the internal item from the attached CRDT state.
    pub fn into_item(self) -> Item {
        Item {
            id: self.id,
            list_id: self.list_id,
            name: self.crdt.name,
            quantity: self.crdt.quantity,
            acquired: self.crdt.acquired,
            created_at: self.created_at,
            last_updated: self.last_updated,
            vector_clock: self.vector_clock,
        }
    }
}

/// CRDT payload attached to a list view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCrdtState {
    pub name: LwwRegister<String>,
}

/// Flat list representation served over HTTP and SSE.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListView {
    pub id: String,
    pub name: String,
    pub created_at: u64,
    pub last_updated: u64,
    pub vector_clock: VectorClock,
    pub crdt: ListCrdtState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<ItemView>>,
}

impl ListView {
    pub fn into_list(self) -> List {
        List {
            id: self.id,
            name: self.crdt.name,
            created_at: self.created_at,
            last_updated: self.last_updated,
            vector_clock: self.vector_clock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_stamps_writer() {
        let item = Item::new("I1", "L1", "Milk", 3, "client-x");
        assert_eq!(item.vector_clock.get("client-x"), 1);
        assert_eq!(item.quantity.value(), 3);
        assert_eq!(item.acquired.value(), 0);
        assert_eq!(item.name.get(), "Milk");
    }

    #[test]
    fn test_item_merge_is_field_wise() {
        let mut a = Item::new("I1", "L1", "Milk", 5, "x");
        let mut b = a.clone();
        b.name.set_at("Soy Milk".into(), a.name.timestamp() + 10, "y");
        b.acquired.set_value("y", 2);
        b.vector_clock.increment("y");
        b.last_updated += 10;

        a.merge(&b);
        assert_eq!(a.name.get(), "Soy Milk");
        assert_eq!(a.quantity.value(), 5);
        assert_eq!(a.acquired.value(), 2);
        assert_eq!(a.vector_clock.get("y"), 1);
        assert_eq!(a.last_updated, b.last_updated);
    }

    #[test]
    fn test_item_merge_commutes() {
        let mut a = Item::new("I1", "L1", "Milk", 5, "x");
        let mut b = Item::new("I1", "L1", "Milk", 0, "y");
        b.quantity.set_value("y", 4);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);

        assert_eq!(ab.quantity.value(), ba.quantity.value());
        assert_eq!(ab.name.get(), ba.name.get());
        assert_eq!(ab.vector_clock, ba.vector_clock);
        a.merge(&a.clone());
        assert_eq!(a.quantity.value(), 5);
    }

    #[test]
    fn test_view_round_trip() {
        let item = Item::new("I1", "L1", "Milk", 3, "x");
        let view = item.view();
        assert_eq!(view.quantity, 3);
        assert_eq!(view.name, "Milk");
        assert_eq!(view.clone().into_item(), item);

        let list = List::new("L1", "Weekly", "x");
        let lview = list.view(None);
        assert_eq!(lview.name, "Weekly");
        assert_eq!(lview.into_list(), list);
    }

    #[test]
    fn test_wire_shape_is_camel_case() {
        let item = Item::new("I1", "L1", "Milk", 1, "x");
        let json = serde_json::to_value(item.view()).unwrap();
        assert!(json.get("listId").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json.get("vectorClock").is_some());
        assert!(json.get("crdt").is_some());
    }
}
