#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("shard pool does not have a driver available for this host")]
    PoolUnavailable,
    #[error("shard not found in this pool")]
    NotFound,
    #[error("io error")]
    Io(#[from] std::io::Error),
    #[error("database error")]
    Sqlx(#[from] sqlx::Error),
    #[error("catalog error")]
    Catalog(#[from] winery_catalog::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
