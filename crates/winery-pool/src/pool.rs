//! `Pool`: the abstraction an RO-shard lives behind (spec.md §4.5). Kept
//! deliberately small and flat rather than a deep driver hierarchy, per the
//! "polymorphism over pools" design note — a new backing store is a new
//! impl of five methods, nothing more.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use winery_catalog::ShardName;

/// A place RO-shard files live once a shard has been packed. `create` and
/// `open_ro` hand back filesystem paths rather than open handles: the
/// caller (packer or reader facade) already knows how to build/mmap a
/// `winery_shard::ro` file at a path, so the pool only needs to own *where*.
#[async_trait::async_trait]
pub trait Pool: Send + Sync {
    /// Reserves the final path an RO-shard file for `name` should be
    /// written to. The directory must exist by the time this returns;
    /// the caller is responsible for writing the file atomically (e.g.
    /// via `winery_shard::ro::Builder::finalize`). `size` is only
    /// meaningful for fixed-capacity backends (block devices); directory
    /// backends ignore it (spec.md §4.5).
    async fn create(&self, name: &ShardName, size: Option<u64>) -> Result<PathBuf>;

    /// Returns the path to an already-packed shard's RO-shard file on this
    /// host, mapping/fetching it first if the driver requires that step.
    /// `Err(Error::NotFound)` if the shard has never been packed into this
    /// pool; `Err(Error::PoolUnavailable)` if this host cannot currently
    /// serve shards from this pool at all.
    async fn open_ro(&self, name: &ShardName) -> Result<PathBuf>;

    /// Removes a shard's backing storage. Only valid once the catalog has
    /// no further readers depending on it.
    async fn delete(&self, name: &ShardName) -> Result<()>;

    /// Lists every shard this pool currently holds, for reconciliation
    /// against the catalog.
    async fn list(&self) -> Result<Vec<ShardName>>;

    /// Whether `name` is mapped and readable from the current host right
    /// now, without performing any mapping side effect.
    async fn host_mapped(&self, name: &ShardName) -> Result<bool>;
}

/// Reference driver: one subdirectory per shard under
/// `{base_directory}/{pool_name}/{shard_name}`, used both in tests and as
/// the default single-host deployment (spec.md §4.5).
pub struct DirectoryPool {
    root: PathBuf,
}

impl DirectoryPool {
    pub fn new(base_directory: impl Into<PathBuf>, pool_name: &str) -> Self {
        Self {
            root: base_directory.into().join(pool_name),
        }
    }

    fn path_for(&self, name: &ShardName) -> PathBuf {
        self.root.join(name.as_str())
    }
}

#[async_trait::async_trait]
impl Pool for DirectoryPool {
    async fn create(&self, name: &ShardName, _size: Option<u64>) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.root).await?;
        Ok(self.path_for(name))
    }

    async fn open_ro(&self, name: &ShardName) -> Result<PathBuf> {
        let path = self.path_for(name);
        if tokio::fs::try_exists(&path).await? {
            Ok(path)
        } else {
            Err(Error::NotFound)
        }
    }

    async fn delete(&self, name: &ShardName) -> Result<()> {
        let path = self.path_for(name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self) -> Result<Vec<ShardName>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(file_name) = entry.file_name().to_str() {
                if let Ok(name) = file_name.parse::<ShardName>() {
                    names.push(name);
                }
            }
        }
        Ok(names)
    }

    async fn host_mapped(&self, name: &ShardName) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_for(name)).await?)
    }
}

/// A second driver shape, for a pool backed by a mappable block device
/// (e.g. Ceph/RBD) rather than a plain directory. Mapping a device image
/// onto the host is an operator/environment concern kept out of scope
/// (spec §1); this stub defines the contract so `winery_pool::manager`'s
/// dequeue-and-map logic has something real to exercise, while every
/// method that would need an actual driver returns `PoolUnavailable`.
pub struct BlockDevicePool {
    image_prefix: String,
}

impl BlockDevicePool {
    pub fn new(image_prefix: impl Into<String>) -> Self {
        Self {
            image_prefix: image_prefix.into(),
        }
    }

    /// The block device image name this driver would map for `name`, once
    /// a real mapper is wired in.
    pub fn image_name(&self, name: &ShardName) -> String {
        format!("{}-{}", self.image_prefix, name.as_str())
    }
}

#[async_trait::async_trait]
impl Pool for BlockDevicePool {
    async fn create(&self, _name: &ShardName, _size: Option<u64>) -> Result<PathBuf> {
        Err(Error::PoolUnavailable)
    }

    async fn open_ro(&self, _name: &ShardName) -> Result<PathBuf> {
        Err(Error::PoolUnavailable)
    }

    async fn delete(&self, _name: &ShardName) -> Result<()> {
        Err(Error::PoolUnavailable)
    }

    async fn list(&self) -> Result<Vec<ShardName>> {
        Err(Error::PoolUnavailable)
    }

    async fn host_mapped(&self, _name: &ShardName) -> Result<bool> {
        Ok(false)
    }
}

/// Helper used by [`crate::manager`] and tests: whether a path looks like
/// a non-empty regular file, i.e. a plausible finished RO-shard.
pub(crate) async fn is_nonempty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn directory_pool_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let pool = DirectoryPool::new(dir.path(), "default");
        let name = ShardName::generate();

        assert!(matches!(pool.open_ro(&name).await, Err(Error::NotFound)));
        assert!(!pool.host_mapped(&name).await.unwrap());

        let path = pool.create(&name, None).await.unwrap();
        tokio::fs::write(&path, b"packed shard bytes").await.unwrap();

        assert!(pool.host_mapped(&name).await.unwrap());
        let opened = pool.open_ro(&name).await.unwrap();
        assert_eq!(opened, path);
        assert!(is_nonempty_file(&opened).await);

        let listed = pool.list().await.unwrap();
        assert_eq!(listed, vec![name.clone()]);

        pool.delete(&name).await.unwrap();
        assert!(matches!(pool.open_ro(&name).await, Err(Error::NotFound)));
        // Deleting twice is not an error.
        pool.delete(&name).await.unwrap();
    }

    #[tokio::test]
    async fn block_device_pool_is_unavailable_until_wired() {
        let pool = BlockDevicePool::new("winery");
        let name = ShardName::generate();
        assert_eq!(pool.image_name(&name), format!("winery-{}", name.as_str()));
        assert!(matches!(pool.create(&name, Some(1024)).await, Err(Error::PoolUnavailable)));
        assert!(!pool.host_mapped(&name).await.unwrap());
    }
}
