#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("catalog error")]
    Catalog(#[from] winery_catalog::Error),
    #[error("rw-shard error")]
    Rw(#[from] winery_shard::rw::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
