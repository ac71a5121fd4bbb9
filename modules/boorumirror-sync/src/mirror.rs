// Find-or-create resolution over the remote content graph.
//
// Every entity is materialized stub-first: the scalar row is written (and
// becomes visible to same-id lookups inside the open unit of work) before any
// relation is resolved. Relation expansion goes through an explicit work
// queue rather than recursion, so reference cycles (post -> uploader ->
// avatar-post -> ...) terminate by finding the stub, and pathological child
// chains cannot exhaust the stack.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use booru_client::{PostPayload, TagPayload, UserPayload};
use boorumirror_common::{
    Extension, PostId, PostRecord, Rating, TagCategory, TagRecord, TrustLevel, UserId, UserRecord,
};

use crate::error::ResolveError;
use crate::traits::{MirrorStore, RemoteLibrary};

/// Upstream ceiling on one batched tag lookup.
pub const TAG_LOOKUP_BATCH: usize = 50;

type Result<T> = std::result::Result<T, ResolveError>;

/// Relation expansion deferred until after the entity's scalar stub is
/// written.
enum Expand {
    Post(PostPayload),
    User(UserPayload),
}

pub struct Mirror<R, S> {
    remote: Arc<R>,
    store: Arc<S>,
}

impl<R: RemoteLibrary, S: MirrorStore> Mirror<R, S> {
    pub fn new(remote: Arc<R>, store: Arc<S>) -> Self {
        Self { remote, store }
    }

    /// Resolve a post by remote id. Returns `None` when the id is tombstoned
    /// (no remote call is made) or when the upstream confirms it gone (a
    /// tombstone is written). An id already mirrored returns the existing row
    /// untouched.
    pub async fn resolve_post(&self, id: PostId) -> Result<Option<PostRecord>> {
        let mut queue = VecDeque::new();
        let resolved = self.ensure_post(id, &mut queue).await?;
        self.drain(&mut queue).await?;
        match resolved {
            Some(id) => Ok(self.store.find_post(id).await?),
            None => Ok(None),
        }
    }

    /// Resolve a post the caller already fetched, e.g. while walking a
    /// listing page. Same semantics as [`resolve_post`](Self::resolve_post)
    /// without the redundant remote call.
    pub async fn resolve_post_payload(&self, payload: PostPayload) -> Result<Option<PostRecord>> {
        let id = payload.id;
        if self.store.is_tombstoned(id).await? {
            return Ok(None);
        }
        if let Some(existing) = self.store.find_post(id).await? {
            return Ok(Some(existing));
        }
        let mut queue = VecDeque::new();
        self.admit_post(payload, &mut queue).await?;
        self.drain(&mut queue).await?;
        Ok(self.store.find_post(id).await?)
    }

    /// Resolve a user by remote id. `None` when the upstream does not know
    /// the id; the miss is not cached, so the next reference asks again.
    pub async fn resolve_user(&self, id: UserId) -> Result<Option<UserRecord>> {
        let mut queue = VecDeque::new();
        let resolved = self.ensure_user(id, &mut queue).await?;
        self.drain(&mut queue).await?;
        match resolved {
            Some(id) => Ok(self.store.find_user(id).await?),
            None => Ok(None),
        }
    }

    /// Resolve tag names to rows, creating missing tags from the upstream.
    /// One batched store lookup for the known names; the rest go to the
    /// remote in chunks of [`TAG_LOOKUP_BATCH`].
    pub async fn resolve_tags(&self, names: &[String]) -> Result<Vec<TagRecord>> {
        let mut requested: Vec<String> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        for name in names {
            if seen.insert(name.as_str()) {
                requested.push(name.clone());
            }
        }
        if requested.is_empty() {
            return Ok(Vec::new());
        }

        let mut resolved = self.store.tags_by_text(&requested).await?;

        // Snapshot the names that are still unknown before chunking; the
        // membership test never runs against a collection being mutated.
        let known: HashSet<String> = resolved.iter().map(|t| t.text.clone()).collect();
        let unresolved: Vec<String> = requested
            .into_iter()
            .filter(|name| !known.contains(name))
            .collect();

        for chunk in unresolved.chunks(TAG_LOOKUP_BATCH) {
            let fetched = self.remote.tags_by_name(chunk).await?;
            for payload in fetched {
                let record = tag_record(&payload)?;
                self.store.insert_tag(&record).await?;
                resolved.push(record);
            }
        }

        Ok(resolved)
    }

    // --- Find-or-stub ---

    /// Tombstone check, then store, then remote. A fresh payload gets its
    /// scalar stub written immediately and its relation expansion queued, so
    /// the returned id is linkable by the caller even mid-cycle.
    async fn ensure_post(
        &self,
        id: PostId,
        queue: &mut VecDeque<Expand>,
    ) -> Result<Option<PostId>> {
        if self.store.is_tombstoned(id).await? {
            return Ok(None);
        }
        if let Some(existing) = self.store.find_post(id).await? {
            return Ok(Some(existing.id));
        }
        match self.remote.post(id).await? {
            Some(payload) => Ok(Some(self.admit_post(payload, queue).await?)),
            None => {
                debug!(post = id, "Upstream confirmed post gone, writing tombstone");
                self.store.insert_tombstone(id).await?;
                Ok(None)
            }
        }
    }

    async fn admit_post(&self, payload: PostPayload, queue: &mut VecDeque<Expand>) -> Result<PostId> {
        let record = post_record(&payload)?;
        self.store.insert_post(&record).await?;
        queue.push_back(Expand::Post(payload));
        Ok(record.id)
    }

    async fn ensure_user(
        &self,
        id: UserId,
        queue: &mut VecDeque<Expand>,
    ) -> Result<Option<UserId>> {
        if let Some(existing) = self.store.find_user(id).await? {
            return Ok(Some(existing.id));
        }
        match self.remote.user(id).await? {
            Some(payload) => {
                let record = user_record(&payload)?;
                self.store.insert_user(&record).await?;
                queue.push_back(Expand::User(payload));
                Ok(Some(record.id))
            }
            None => Ok(None),
        }
    }

    // --- Relation expansion ---

    async fn drain(&self, queue: &mut VecDeque<Expand>) -> Result<()> {
        while let Some(task) = queue.pop_front() {
            match task {
                Expand::Post(payload) => self.expand_post(payload, queue).await?,
                Expand::User(payload) => self.expand_user(payload, queue).await?,
            }
        }
        Ok(())
    }

    async fn expand_post(&self, payload: PostPayload, queue: &mut VecDeque<Expand>) -> Result<()> {
        let id = payload.id;

        // Tags carry no further relations, so they resolve first.
        let tags = self.resolve_tags(&payload.tags.all()).await?;
        let tag_ids: Vec<_> = tags.iter().map(|t| t.id).collect();
        self.store.link_tags(id, &tag_ids).await?;

        // The uploader is required; a post without one must never commit.
        match self.ensure_user(payload.uploader_id, queue).await? {
            Some(user) => self.store.set_post_uploader(id, user).await?,
            None => {
                return Err(ResolveError::MissingUploader {
                    post: id,
                    user: payload.uploader_id,
                })
            }
        }

        if let Some(approver) = payload.approver_id {
            match self.ensure_user(approver, queue).await? {
                Some(user) => self.store.set_post_approver(id, user).await?,
                None => debug!(post = id, approver, "Approver unknown upstream, left unset"),
            }
        }

        // Raw media; the buffer is dropped as soon as the row is written.
        match self.remote.media(&payload.file.md5, &payload.file.ext).await {
            Ok(Some(bytes)) => self.store.insert_media(id, &bytes).await?,
            Ok(None) => debug!(post = id, md5 = %payload.file.md5, "No media upstream"),
            Err(e) => {
                warn!(post = id, error = %e, "Media download failed, continuing without it")
            }
        }

        for (position, child) in payload.relationships.children.iter().copied().enumerate() {
            match self.ensure_post(child, queue).await? {
                Some(child_id) => self.store.link_child(id, child_id, position as i32).await?,
                None => debug!(post = id, child, position, "Child gone upstream, skipped"),
            }
        }

        if !payload.sources.is_empty() {
            self.store.insert_sources(id, &payload.sources).await?;
        }

        Ok(())
    }

    async fn expand_user(&self, payload: UserPayload, queue: &mut VecDeque<Expand>) -> Result<()> {
        if let Some(avatar) = payload.avatar_id {
            match self.ensure_post(avatar, queue).await? {
                Some(post) => self.store.set_user_avatar(payload.id, post).await?,
                None => debug!(user = payload.id, avatar, "Avatar post gone upstream, left unset"),
            }
        }
        Ok(())
    }
}

// --- Payload-to-record mapping ---

fn post_record(payload: &PostPayload) -> Result<PostRecord> {
    let extension = Extension::parse(&payload.file.ext)
        .ok_or_else(|| unsupported("post", payload.id, "file.ext", &payload.file.ext))?;
    let rating = Rating::from_code(&payload.rating)
        .ok_or_else(|| unsupported("post", payload.id, "rating", &payload.rating))?;
    Ok(PostRecord {
        id: payload.id,
        created_at: payload.created_at,
        updated_at: payload.updated_at,
        width: payload.file.width,
        height: payload.file.height,
        extension,
        size: payload.file.size,
        md5: payload.file.md5.clone(),
        score_up: payload.score.up,
        score_down: payload.score.down,
        score_total: payload.score.total,
        rating,
        fav_count: payload.fav_count,
        description: payload.description.clone(),
        duration: payload.duration,
        uploader_id: None,
        approver_id: None,
    })
}

fn user_record(payload: &UserPayload) -> Result<UserRecord> {
    let level = TrustLevel::from_code(payload.level)
        .ok_or_else(|| unsupported("user", payload.id, "level", &payload.level.to_string()))?;
    Ok(UserRecord {
        id: payload.id,
        created_at: payload.created_at,
        name: payload.name.clone(),
        level,
        is_banned: payload.is_banned,
        avatar_id: None,
    })
}

fn tag_record(payload: &TagPayload) -> Result<TagRecord> {
    let category = TagCategory::from_code(payload.category).ok_or_else(|| {
        unsupported("tag", payload.id, "category", &payload.category.to_string())
    })?;
    Ok(TagRecord {
        id: payload.id,
        text: payload.name.clone(),
        category,
    })
}

fn unsupported(entity: &'static str, id: i64, field: &'static str, value: &str) -> ResolveError {
    ResolveError::UnsupportedValue {
        entity,
        id,
        field,
        value: value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{post_payload, tag_payload, user_payload, MemoryStore, MockRemote};

    fn mirror(remote: MockRemote, store: MemoryStore) -> (Mirror<MockRemote, MemoryStore>, Arc<MockRemote>, Arc<MemoryStore>) {
        let remote = Arc::new(remote);
        let store = Arc::new(store);
        (Mirror::new(remote.clone(), store.clone()), remote, store)
    }

    #[tokio::test]
    async fn second_resolve_hits_the_store_not_the_remote() {
        let remote = MockRemote::new()
            .with_post(post_payload(1, 10))
            .with_user(user_payload(10));
        let (mirror, remote, _store) = mirror(remote, MemoryStore::new());

        let first = mirror.resolve_post(1).await.unwrap();
        let second = mirror.resolve_post(1).await.unwrap();

        assert_eq!(remote.post_fetches(1), 1);
        assert_eq!(first, second);
        assert_eq!(first.unwrap().uploader_id, Some(10));
    }

    #[tokio::test]
    async fn avatar_uploader_cycle_terminates_with_one_row_each() {
        // Post 7 is uploaded by user 10 whose avatar is post 7.
        let mut user = user_payload(10);
        user.avatar_id = Some(7);
        let remote = MockRemote::new()
            .with_post(post_payload(7, 10))
            .with_user(user);
        let (mirror, remote, store) = mirror(remote, MemoryStore::new());

        let post = mirror.resolve_post(7).await.unwrap().unwrap();

        let state = store.snapshot();
        assert_eq!(state.posts.len(), 1);
        assert_eq!(state.users.len(), 1);
        assert_eq!(post.uploader_id, Some(10));
        assert_eq!(state.users[&10].avatar_id, Some(7));
        assert_eq!(remote.post_fetches(7), 1);
        assert_eq!(remote.user_fetches(10), 1);
    }

    #[tokio::test]
    async fn cycle_entered_from_the_user_side_also_terminates() {
        let mut user = user_payload(10);
        user.avatar_id = Some(7);
        let remote = MockRemote::new()
            .with_post(post_payload(7, 10))
            .with_user(user);
        let (mirror, _remote, store) = mirror(remote, MemoryStore::new());

        let resolved = mirror.resolve_user(10).await.unwrap().unwrap();

        let state = store.snapshot();
        assert_eq!(state.posts.len(), 1);
        assert_eq!(state.users.len(), 1);
        assert_eq!(resolved.avatar_id, Some(7));
        assert_eq!(state.posts[&7].uploader_id, Some(10));
    }

    #[tokio::test]
    async fn not_found_post_is_tombstoned_and_never_refetched() {
        let (mirror, remote, store) = mirror(MockRemote::new(), MemoryStore::new());

        assert!(mirror.resolve_post(999).await.unwrap().is_none());
        assert!(store.snapshot().tombstones.contains(&999));

        assert!(mirror.resolve_post(999).await.unwrap().is_none());
        assert_eq!(remote.post_fetches(999), 1);
    }

    #[tokio::test]
    async fn unknown_tags_are_fetched_in_chunks_of_fifty() {
        let names: Vec<String> = (0..120).map(|i| format!("tag_{i:03}")).collect();
        let mut remote = MockRemote::new();
        for (i, name) in names.iter().enumerate() {
            remote = remote.with_tag(tag_payload(i as i64 + 1, name));
        }
        let (mirror, remote, store) = mirror(remote, MemoryStore::new());

        let resolved = mirror.resolve_tags(&names).await.unwrap();

        assert_eq!(resolved.len(), 120);
        assert_eq!(remote.tag_batch_sizes(), vec![50, 50, 20]);
        assert_eq!(store.snapshot().tags.len(), 120);

        // A second pass finds everything in the store; no further remote work.
        let again = mirror.resolve_tags(&names).await.unwrap();
        assert_eq!(again.len(), 120);
        assert_eq!(remote.tag_batch_sizes(), vec![50, 50, 20]);
        assert_eq!(store.snapshot().tags.len(), 120);
    }

    #[tokio::test]
    async fn listing_payload_materializes_children_and_uploader() {
        let mut root = post_payload(500, 10);
        root.relationships.children = vec![503, 501];
        let remote = MockRemote::new()
            .with_post(post_payload(501, 10))
            .with_post(post_payload(503, 10))
            .with_user(user_payload(10));
        let (mirror, _remote, store) = mirror(remote, MemoryStore::new());

        let post = mirror.resolve_post_payload(root).await.unwrap().unwrap();

        let state = store.snapshot();
        assert_eq!(post.uploader_id, Some(10));
        assert_eq!(state.posts.len(), 3);
        assert_eq!(state.users.len(), 1);
        // Child order follows the payload, not the ids.
        assert_eq!(state.children[&500], vec![(0, 503), (1, 501)]);
    }

    #[tokio::test]
    async fn tombstoned_child_is_skipped_not_fatal() {
        let mut root = post_payload(500, 10);
        root.relationships.children = vec![502];
        let remote = MockRemote::new().with_user(user_payload(10));
        let (mirror, _remote, store) = mirror(remote, MemoryStore::new());

        mirror.resolve_post_payload(root).await.unwrap().unwrap();

        let state = store.snapshot();
        assert!(state.tombstones.contains(&502));
        assert!(state.children.get(&500).is_none());
        assert_eq!(state.posts.len(), 1);
    }

    #[tokio::test]
    async fn missing_uploader_is_an_integrity_error() {
        let remote = MockRemote::new().with_post(post_payload(1, 10));
        let (mirror, _remote, _store) = mirror(remote, MemoryStore::new());

        let err = mirror.resolve_post(1).await.unwrap_err();
        assert!(matches!(
            err,
            ResolveError::MissingUploader { post: 1, user: 10 }
        ));
    }

    #[tokio::test]
    async fn transient_child_failure_aborts_resolution() {
        let mut root = post_payload(500, 10);
        root.relationships.children = vec![501];
        let remote = MockRemote::new()
            .with_user(user_payload(10))
            .with_broken_post(501);
        let (mirror, _remote, store) = mirror(remote, MemoryStore::new());

        let err = mirror.resolve_post_payload(root).await.unwrap_err();
        assert!(matches!(err, ResolveError::Fetch(_)));
        // The broken child was neither tombstoned nor stubbed.
        assert!(!store.snapshot().tombstones.contains(&501));
        assert!(store.snapshot().posts.get(&501).is_none());
    }

    #[tokio::test]
    async fn approver_miss_is_tolerated_and_not_cached() {
        let mut first = post_payload(1, 10);
        first.approver_id = Some(99);
        let mut second = post_payload(2, 10);
        second.approver_id = Some(99);
        let remote = MockRemote::new()
            .with_post(first)
            .with_post(second)
            .with_user(user_payload(10));
        let (mirror, remote, store) = mirror(remote, MemoryStore::new());

        let one = mirror.resolve_post(1).await.unwrap().unwrap();
        let two = mirror.resolve_post(2).await.unwrap().unwrap();

        assert_eq!(one.approver_id, None);
        assert_eq!(two.approver_id, None);
        // No negative caching for users: each reference asks upstream again.
        assert_eq!(remote.user_fetches(99), 2);
        assert_eq!(store.snapshot().users.len(), 1);
    }

    #[tokio::test]
    async fn unknown_extension_is_rejected_before_the_stub_lands() {
        let mut payload = post_payload(1, 10);
        payload.file.ext = "tiff".into();
        let (mirror, _remote, store) = mirror(MockRemote::new(), MemoryStore::new());

        let err = mirror.resolve_post_payload(payload).await.unwrap_err();
        assert!(matches!(err, ResolveError::UnsupportedValue { .. }));
        assert!(store.snapshot().posts.is_empty());
    }

    #[tokio::test]
    async fn media_is_stored_when_the_upstream_serves_it() {
        let payload = post_payload(1, 10);
        let md5 = payload.file.md5.clone();
        let remote = MockRemote::new()
            .with_post(payload)
            .with_user(user_payload(10))
            .with_media(&md5, b"\x89PNG".to_vec());
        let (mirror, _remote, store) = mirror(remote, MemoryStore::new());

        mirror.resolve_post(1).await.unwrap().unwrap();
        assert_eq!(store.snapshot().media[&1], b"\x89PNG".to_vec());
    }
}
