/// Errors surfaced by the catalog layer, per spec.md §7.
///
/// `Conflict` is not exceptional: callers racing a conditional UPDATE treat
/// it as a normal "someone else won" outcome, the same way
/// `automations::server` treats an empty dequeue as the ordinary idle case.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("object is not present in the catalog")]
    NotFound,

    #[error("shard {0:?} already has a different state/locker than expected")]
    Conflict(crate::ShardId),

    #[error("catalog is configured read-only")]
    Readonly,

    #[error("database error")]
    Sqlx(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
