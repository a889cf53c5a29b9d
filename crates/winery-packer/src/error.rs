#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("catalog error")]
    Catalog(#[from] winery_catalog::Error),
    #[error("rw-shard error")]
    Rw(#[from] winery_shard::rw::Error),
    #[error("ro-shard error")]
    Ro(#[from] winery_shard::ro::Error),
    #[error("pool error")]
    Pool(#[from] winery_pool::Error),
    #[error("packed shard failed post-pack verification")]
    VerificationFailed,
    #[error("timed out waiting for an externally-created image to become visible")]
    ImageNotVisible,
}

pub type Result<T> = std::result::Result<T, Error>;
