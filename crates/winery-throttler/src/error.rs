/// Per spec.md §7: if the throttler DB is unreachable while throttling is
/// enabled, the worker fails closed and denies the I/O rather than
/// proceeding unthrottled.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("throttler database unreachable, denying i/o while throttling is enabled")]
    Throttled(#[source] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
