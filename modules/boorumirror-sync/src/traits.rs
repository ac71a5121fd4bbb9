// Trait abstractions for the mirror core's two collaborators.
//
// RemoteLibrary - the upstream booru API. A confirmed 404 is not an error:
//   single-entity lookups return Ok(None) and the caller decides whether the
//   miss is permanent (posts get tombstoned) or not (users are retried).
// MirrorStore - durable persistence plus unit-of-work control. While a unit
//   is open, reads must observe the unit's own uncommitted writes.
//
// These enable deterministic testing with MockRemote and MemoryStore:
// no network, no database. `cargo test` in seconds.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use booru_client::{BooruClient, BooruError, PostPayload, TagPayload, UserPayload};
use boorumirror_common::{PostId, PostRecord, TagId, TagRecord, UserId, UserRecord};
use boorumirror_store::{PgMirrorStore, StoreError};

/// Tag expression for listing pages. `status:any` keeps posts the upstream has
/// hidden from default listings but still serves individually.
const LISTING_FILTER: &[&str] = &["status:any"];

/// Transient failure talking to the remote. Nothing durable may be written for
/// the affected id; the caller retries on a later pass.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("upstream returned status {status}")]
    Upstream { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<BooruError> for FetchError {
    fn from(err: BooruError) -> Self {
        match err {
            BooruError::Api { status, .. } => FetchError::Upstream { status },
            BooruError::Network(m) => FetchError::Transport(m),
            BooruError::Parse(m) => FetchError::Transport(m),
        }
    }
}

/// Map a client result so that a confirmed 404 becomes `Ok(None)` and
/// everything else stays a transient error.
fn not_found_as_none<T>(res: booru_client::Result<T>) -> Result<Option<T>, FetchError> {
    match res {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ---------------------------------------------------------------------------
// RemoteLibrary
// ---------------------------------------------------------------------------

#[async_trait]
pub trait RemoteLibrary: Send + Sync {
    /// Fetch a single post. `Ok(None)` means the upstream confirmed the id is
    /// gone.
    async fn post(&self, id: PostId) -> Result<Option<PostPayload>, FetchError>;

    /// One listing page of posts with id strictly greater than `after`, at
    /// most `limit` of them. Order is unspecified; callers sort.
    async fn posts_after(&self, after: PostId, limit: u32) -> Result<Vec<PostPayload>, FetchError>;

    /// The newest posts, at most `limit`.
    async fn latest(&self, limit: u32) -> Result<Vec<PostPayload>, FetchError>;

    /// Fetch a single user. `Ok(None)` means the upstream does not know the id
    /// right now; user misses are never cached.
    async fn user(&self, id: UserId) -> Result<Option<UserPayload>, FetchError>;

    /// Batch tag lookup by exact name. Callers chunk to the upstream's batch
    /// ceiling; unknown names are absent from the result.
    async fn tags_by_name(&self, names: &[String]) -> Result<Vec<TagPayload>, FetchError>;

    /// Raw media download by content hash. `Ok(None)` when the file is gone.
    async fn media(&self, md5: &str, ext: &str) -> Result<Option<Bytes>, FetchError>;
}

#[async_trait]
impl RemoteLibrary for BooruClient {
    async fn post(&self, id: PostId) -> Result<Option<PostPayload>, FetchError> {
        not_found_as_none(self.get_post(id).await)
    }

    async fn posts_after(&self, after: PostId, limit: u32) -> Result<Vec<PostPayload>, FetchError> {
        Ok(self.get_posts_after(LISTING_FILTER, after, limit).await?)
    }

    async fn latest(&self, limit: u32) -> Result<Vec<PostPayload>, FetchError> {
        Ok(self.get_latest(limit).await?)
    }

    async fn user(&self, id: UserId) -> Result<Option<UserPayload>, FetchError> {
        not_found_as_none(self.get_user(id).await)
    }

    async fn tags_by_name(&self, names: &[String]) -> Result<Vec<TagPayload>, FetchError> {
        Ok(self.get_tags_by_name(names).await?)
    }

    async fn media(&self, md5: &str, ext: &str) -> Result<Option<Bytes>, FetchError> {
        Ok(self.get_media(md5, ext).await?)
    }
}

// ---------------------------------------------------------------------------
// MirrorStore
// ---------------------------------------------------------------------------

#[async_trait]
pub trait MirrorStore: Send + Sync {
    // --- Unit of work ---

    async fn begin_unit(&self) -> Result<(), StoreError>;
    async fn commit_unit(&self) -> Result<(), StoreError>;
    async fn rollback_unit(&self) -> Result<(), StoreError>;

    // --- Lookups ---

    async fn find_post(&self, id: PostId) -> Result<Option<PostRecord>, StoreError>;
    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;
    async fn is_tombstoned(&self, id: PostId) -> Result<bool, StoreError>;

    /// Tags already known for any of the given texts, in one batched query.
    async fn tags_by_text(&self, texts: &[String]) -> Result<Vec<TagRecord>, StoreError>;

    /// Highest mirrored post id, if any. Watermark recovery at startup.
    async fn max_post_id(&self) -> Result<Option<PostId>, StoreError>;

    // --- Inserts (scalar stubs and owned rows) ---

    async fn insert_post(&self, post: &PostRecord) -> Result<(), StoreError>;
    async fn insert_user(&self, user: &UserRecord) -> Result<(), StoreError>;
    async fn insert_tag(&self, tag: &TagRecord) -> Result<(), StoreError>;
    async fn insert_tombstone(&self, id: PostId) -> Result<(), StoreError>;
    async fn insert_media(&self, post: PostId, bytes: &[u8]) -> Result<(), StoreError>;
    async fn insert_sources(&self, post: PostId, urls: &[String]) -> Result<(), StoreError>;

    // --- Relation links (within the creating unit of work) ---

    async fn set_post_uploader(&self, post: PostId, user: UserId) -> Result<(), StoreError>;
    async fn set_post_approver(&self, post: PostId, user: UserId) -> Result<(), StoreError>;
    async fn set_user_avatar(&self, user: UserId, post: PostId) -> Result<(), StoreError>;
    async fn link_child(&self, parent: PostId, child: PostId, position: i32)
        -> Result<(), StoreError>;
    async fn link_tags(&self, post: PostId, tags: &[TagId]) -> Result<(), StoreError>;
}

#[async_trait]
impl MirrorStore for PgMirrorStore {
    async fn begin_unit(&self) -> Result<(), StoreError> {
        self.begin_unit().await
    }

    async fn commit_unit(&self) -> Result<(), StoreError> {
        self.commit_unit().await
    }

    async fn rollback_unit(&self) -> Result<(), StoreError> {
        self.rollback_unit().await
    }

    async fn find_post(&self, id: PostId) -> Result<Option<PostRecord>, StoreError> {
        self.find_post(id).await
    }

    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        self.find_user(id).await
    }

    async fn is_tombstoned(&self, id: PostId) -> Result<bool, StoreError> {
        self.is_tombstoned(id).await
    }

    async fn tags_by_text(&self, texts: &[String]) -> Result<Vec<TagRecord>, StoreError> {
        self.tags_by_text(texts).await
    }

    async fn max_post_id(&self) -> Result<Option<PostId>, StoreError> {
        self.max_post_id().await
    }

    async fn insert_post(&self, post: &PostRecord) -> Result<(), StoreError> {
        self.insert_post(post).await
    }

    async fn insert_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        self.insert_user(user).await
    }

    async fn insert_tag(&self, tag: &TagRecord) -> Result<(), StoreError> {
        self.insert_tag(tag).await
    }

    async fn insert_tombstone(&self, id: PostId) -> Result<(), StoreError> {
        self.insert_tombstone(id).await
    }

    async fn insert_media(&self, post: PostId, bytes: &[u8]) -> Result<(), StoreError> {
        self.insert_media(post, bytes).await
    }

    async fn insert_sources(&self, post: PostId, urls: &[String]) -> Result<(), StoreError> {
        self.insert_sources(post, urls).await
    }

    async fn set_post_uploader(&self, post: PostId, user: UserId) -> Result<(), StoreError> {
        self.set_post_uploader(post, user).await
    }

    async fn set_post_approver(&self, post: PostId, user: UserId) -> Result<(), StoreError> {
        self.set_post_approver(post, user).await
    }

    async fn set_user_avatar(&self, user: UserId, post: PostId) -> Result<(), StoreError> {
        self.set_user_avatar(user, post).await
    }

    async fn link_child(
        &self,
        parent: PostId,
        child: PostId,
        position: i32,
    ) -> Result<(), StoreError> {
        self.link_child(parent, child, position).await
    }

    async fn link_tags(&self, post: PostId, tags: &[TagId]) -> Result<(), StoreError> {
        self.link_tags(post, tags).await
    }
}
