//! Winery: a content-addressable object store for very large populations
//! of small immutable blobs (spec.md §1). This crate is the thin `Writer`/
//! `Reader` facade (C10) composing the lower crates:
//!
//! - [`winery_catalog`]: the shard lifecycle state machine and the global
//!   signature->shard index (C1, C2).
//! - [`winery_shard`]: RW-shard (table-backed) and RO-shard (file-backed)
//!   readers/writers (C3, C4).
//! - [`winery_pool`]: the abstract shard pool and pool-manager loop (C5, C7).
//! - [`winery_packer`]: the packing pipeline (C6).
//! - [`winery_cleaner`]: the RW-shard table cleaner (C8).
//! - [`winery_throttler`]: the cluster-wide I/O throttler (C9).
//!
//! The outer HTTP/CLI surface, config file parsing, and concrete Ceph/RBD
//! driver are explicitly out of scope (spec.md §1); this crate only
//! implements the typed contract those surfaces would sit behind.

mod config;
mod error;
mod reader;
mod writer;

pub use config::{Config, DatabaseConfig, PackerConfig, ShardsConfig, ShardsPoolConfig, ThrottlerConfig};
pub use error::{Error, Result};
pub use reader::Reader;
pub use writer::{AddOutcome, DeleteOutcome, InlinePacking, Writer};

pub use winery_catalog::{Locker, ShardId, ShardName, ShardState, Signature};
