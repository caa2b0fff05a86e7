//! CRDT building blocks for the shopping-list data model
//!
//! The hierarchy is flat: an item embeds concrete sub-CRDTs by value
//! (one LWW register, two PN counters, one vector clock), and the add-wins
//! observed-remove set holds the items. Every merge here is commutative,
//! associative, and idempotent.

pub mod clock;
pub mod counter;
pub mod item;
pub mod lww;
pub mod set;

pub use clock::{ClockOrdering, VectorClock};
pub use counter::{GCounter, PnCounter};
pub use item::{Item, ItemCrdtState, ItemView, List, ListView};
pub use lww::LwwRegister;
pub use set::{AworSet, ItemField};
