//! RW-shard (table-backed, C3) and RO-shard (file-backed, C4) object
//! storage, per spec.md §4.3–§4.4. Both satisfy the same read-side
//! operations; the design deliberately keeps them as separate types rather
//! than a unified trait with half of its methods unimplemented for one
//! side, per the "polymorphism over shard readers" design note in
//! spec.md §9 — the facade in the `winery` crate picks one or the other
//! based on the shard's current state.

pub(crate) mod mph;
pub mod ro;
pub mod rw;

pub use ro::Reader as RoShard;
pub use rw::RwShard;
