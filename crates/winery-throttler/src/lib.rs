//! The cluster-wide I/O throttler (spec.md §4.9, C9): bounds aggregate
//! read/write bandwidth across independent worker processes that share a
//! storage pool but have no other coordination channel.

mod error;
mod throttler;
mod worker;

pub use error::{Error, Result};
pub use throttler::{Direction, Limits, Throttler};
pub use worker::run;
