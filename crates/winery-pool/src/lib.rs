//! The shard pool abstraction (spec.md §4.5) and the pool-manager mapping
//! loop (spec.md §4.7). `Pool` is deliberately the only trait here — a
//! small, flat seam rather than a driver hierarchy, per the "polymorphism
//! over pools" design note.

mod error;
pub mod manager;
mod pool;

pub use error::{Error, Result};
pub use pool::{BlockDevicePool, DirectoryPool, Pool};
