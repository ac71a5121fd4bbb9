use thiserror::Error;

use boorumirror_common::{PostId, UserId};
use boorumirror_store::StoreError;

use crate::traits::FetchError;

/// Failure while resolving one entity graph. The caller owns the unit of
/// work and discards it whole; nothing half-populated may stay visible.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Transient remote failure. Nothing durable was written for the affected
    /// id; it is eligible for retry on a later pass.
    #[error("remote fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// A fully resolved post must have an uploader.
    #[error("post {post} resolved without an uploader (remote user {user} missing)")]
    MissingUploader { post: PostId, user: UserId },

    /// The remote sent a value outside the known enumerations.
    #[error("unsupported {field} value {value:?} on {entity} {id}")]
    UnsupportedValue {
        entity: &'static str,
        id: i64,
        field: &'static str,
        value: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of one catch-up tick. Any of these rolls the whole page back and
/// leaves the watermark untouched.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to fetch listing: {0}")]
    Fetch(#[from] FetchError),

    #[error("failed to resolve post {id}: {source}")]
    Resolve { id: PostId, source: ResolveError },

    #[error(transparent)]
    Store(#[from] StoreError),
}
