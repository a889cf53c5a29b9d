//! The client-facing error kinds of spec.md §7, aggregated from every
//! lower-crate error. Several sources fold into the same kind (e.g. both
//! `winery_catalog::Error::NotFound` and `winery_pool::Error::NotFound`
//! become [`Error::NotFound`]), so conversions are written by hand rather
//! than derived with `#[from]` — the same mix of domain variants plus
//! `#[from]`-wrapped infra errors used by `journal-client::read::Error`.

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("object is not present in the store")]
    NotFound,

    #[error("store is configured read-only")]
    Readonly,

    #[error("ro-shard key verification failed or header is malformed: shard is corrupt")]
    Corrupt,

    #[error("shard pool unavailable for this host")]
    PoolUnavailable,

    #[error("throttler database unreachable while throttling is enabled")]
    Throttled,

    #[error("lost a conditional-update race on shard {0:?}; caller should retry or move on")]
    Conflict(winery_catalog::ShardId),

    #[error("pool operation did not complete within its deadline")]
    Timeout,

    #[error("database error")]
    Sqlx(#[from] sqlx::Error),

    #[error("io error")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<winery_catalog::Error> for Error {
    fn from(err: winery_catalog::Error) -> Self {
        match err {
            winery_catalog::Error::NotFound => Error::NotFound,
            winery_catalog::Error::Readonly => Error::Readonly,
            winery_catalog::Error::Conflict(id) => Error::Conflict(id),
            winery_catalog::Error::Sqlx(err) => Error::Sqlx(err),
        }
    }
}

impl From<winery_shard::rw::Error> for Error {
    fn from(err: winery_shard::rw::Error) -> Self {
        match err {
            winery_shard::rw::Error::Sqlx(err) => Error::Sqlx(err),
        }
    }
}

impl From<winery_shard::ro::Error> for Error {
    fn from(err: winery_shard::ro::Error) -> Self {
        match err {
            winery_shard::ro::Error::BadHeader | winery_shard::ro::Error::Corrupt => Error::Corrupt,
            winery_shard::ro::Error::Build(_) => Error::Corrupt,
            winery_shard::ro::Error::Io(err) => Error::Io(err),
        }
    }
}

impl From<winery_pool::Error> for Error {
    fn from(err: winery_pool::Error) -> Self {
        match err {
            winery_pool::Error::NotFound => Error::NotFound,
            winery_pool::Error::PoolUnavailable => Error::PoolUnavailable,
            winery_pool::Error::Io(err) => Error::Io(err),
            winery_pool::Error::Sqlx(err) => Error::Sqlx(err),
            winery_pool::Error::Catalog(err) => err.into(),
        }
    }
}

impl From<winery_throttler::Error> for Error {
    fn from(err: winery_throttler::Error) -> Self {
        match err {
            winery_throttler::Error::Throttled(_) => Error::Throttled,
        }
    }
}
