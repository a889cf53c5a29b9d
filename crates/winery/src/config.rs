//! The recognized configuration shape of spec.md §6. This is a typed shape
//! only: no file-loading or environment-merging glue is built here, since
//! that belongs to the outer CLI/config surface the spec places out of
//! scope (spec.md §1). Each field is exactly the option the spec names.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Writers refuse to start when true.
    pub readonly: bool,
    pub shards: ShardsConfig,
    pub database: DatabaseConfig,
    pub shards_pool: ShardsPoolConfig,
    pub packer: PackerConfig,
    /// Omit entirely to disable the throttler (spec.md §6).
    #[serde(default)]
    pub throttler: Option<ThrottlerConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShardsConfig {
    /// Fill threshold in bytes. May be exceeded by at most one oversized
    /// object (spec.md §9 O3).
    pub max_size: u64,
    /// Seconds an idle writer waits with no writes before releasing its
    /// shard back to `standby`.
    pub rw_idle_timeout: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub db: String,
    #[serde(default)]
    pub application_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShardsPoolConfig {
    Rbd {
        pool_name: String,
        #[serde(default)]
        data_pool_name: Option<String>,
        #[serde(default)]
        use_sudo: bool,
        #[serde(default)]
        map_options: Vec<String>,
        #[serde(default)]
        image_features_unsupported: Vec<String>,
    },
    Directory {
        base_directory: String,
        pool_name: String,
    },
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
pub struct PackerConfig {
    /// Writer spawns a packer inline rather than waiting for an external one.
    #[serde(default)]
    pub pack_immediately: bool,
    /// Packer creates pool artifacts (images/directories) itself rather
    /// than waiting for an external manager (spec.md §4.6 step 2).
    #[serde(default)]
    pub create_images: bool,
    /// Packer proceeds straight to cleaning after a successful pack
    /// (spec.md §4.6 step 6) instead of waiting for an external cleaner.
    #[serde(default)]
    pub clean_immediately: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThrottlerConfig {
    pub db: String,
    #[serde(default)]
    pub max_read_bps: Option<u64>,
    #[serde(default)]
    pub max_write_bps: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_pool_config_deserializes() {
        let json = serde_json::json!({
            "readonly": false,
            "shards": {"max_size": 67_108_864u64, "rw_idle_timeout": 300},
            "database": {"db": "postgresql://localhost/winery"},
            "shards_pool": {
                "type": "directory",
                "base_directory": "/var/lib/winery",
                "pool_name": "default",
            },
            "packer": {"pack_immediately": true},
        });
        let config: Config = serde_json::from_value(json).expect("valid config");
        assert!(!config.readonly);
        assert_eq!(config.shards.max_size, 67_108_864);
        assert!(matches!(
            config.shards_pool,
            ShardsPoolConfig::Directory { .. }
        ));
        assert!(config.packer.pack_immediately);
        assert!(config.throttler.is_none());
    }
}
