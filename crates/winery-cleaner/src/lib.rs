//! The RW-shard cleaner (spec.md §4.8): drops packed RW-shard tables once
//! enough hosts have mapped the corresponding RO-shard file read-only.

mod clean;
mod error;
mod worker;

pub use clean::{clean_all_eligible, clean_shard};
pub use error::{Error, Result};
pub use worker::{run, Config};
