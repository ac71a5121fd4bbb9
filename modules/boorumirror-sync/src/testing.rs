// Test doubles for the mirror core's trait seams.
//
// MockRemote (RemoteLibrary) - HashMap-backed payloads with per-endpoint
//   call counters, so tests can assert exact remote fetch counts.
// MemoryStore (MirrorStore) - in-memory state with real unit-of-work
//   semantics: begin stages a copy, commit replaces, rollback discards.
//
// Plus fixture builders for post/user/tag payloads and stored records.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{TimeZone, Utc};

use booru_client::{FilePayload, PostPayload, ScorePayload, TagPayload, UserPayload};
use boorumirror_common::{
    Extension, PostId, PostRecord, Rating, TagId, TagRecord, UserId, UserRecord,
};
use boorumirror_store::StoreError;

use crate::traits::{FetchError, MirrorStore, RemoteLibrary};

// ---------------------------------------------------------------------------
// Fixture builders
// ---------------------------------------------------------------------------

pub fn post_payload(id: PostId, uploader: UserId) -> PostPayload {
    PostPayload {
        id,
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        updated_at: None,
        file: FilePayload {
            width: 800,
            height: 600,
            ext: "png".to_string(),
            size: 123_456,
            md5: format!("{id:032x}"),
        },
        score: ScorePayload {
            up: 10,
            down: -2,
            total: 8,
        },
        tags: Default::default(),
        rating: "s".to_string(),
        fav_count: 3,
        description: String::new(),
        duration: None,
        approver_id: None,
        uploader_id: uploader,
        relationships: Default::default(),
        sources: Vec::new(),
    }
}

pub fn user_payload(id: UserId) -> UserPayload {
    UserPayload {
        id,
        created_at: Utc.with_ymd_and_hms(2023, 11, 20, 8, 30, 0).unwrap(),
        name: format!("user_{id}"),
        level: 20,
        is_banned: false,
        avatar_id: None,
    }
}

pub fn tag_payload(id: TagId, name: &str) -> TagPayload {
    TagPayload {
        id,
        name: name.to_string(),
        category: 0,
    }
}

/// A post record as it would look after a committed resolution.
pub fn stored_post(id: PostId) -> PostRecord {
    PostRecord {
        id,
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        updated_at: None,
        width: 800,
        height: 600,
        extension: Extension::Png,
        size: 123_456,
        md5: format!("{id:032x}"),
        score_up: 10,
        score_down: -2,
        score_total: 8,
        rating: Rating::Safe,
        fav_count: 3,
        description: String::new(),
        duration: None,
        uploader_id: Some(1),
        approver_id: None,
    }
}

// ---------------------------------------------------------------------------
// MockRemote
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone)]
pub struct RemoteCalls {
    pub post: HashMap<PostId, u32>,
    pub user: HashMap<UserId, u32>,
    pub listing: u32,
    pub latest: u32,
    pub tag_batches: Vec<usize>,
    pub media: u32,
}

/// HashMap-backed remote. Unregistered ids are confirmed misses (`Ok(None)`);
/// ids registered as broken return a 500.
#[derive(Default)]
pub struct MockRemote {
    posts: HashMap<PostId, PostPayload>,
    users: HashMap<UserId, UserPayload>,
    tags: HashMap<String, TagPayload>,
    media: HashMap<String, Bytes>,
    broken_posts: HashSet<PostId>,
    broken_users: HashSet<UserId>,
    latest_reported: Option<PostId>,
    calls: Mutex<RemoteCalls>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_post(mut self, payload: PostPayload) -> Self {
        self.posts.insert(payload.id, payload);
        self
    }

    pub fn with_user(mut self, payload: UserPayload) -> Self {
        self.users.insert(payload.id, payload);
        self
    }

    pub fn with_tag(mut self, payload: TagPayload) -> Self {
        self.tags.insert(payload.name.clone(), payload);
        self
    }

    pub fn with_media(mut self, md5: &str, bytes: Vec<u8>) -> Self {
        self.media.insert(md5.to_string(), Bytes::from(bytes));
        self
    }

    pub fn with_broken_post(mut self, id: PostId) -> Self {
        self.broken_posts.insert(id);
        self
    }

    pub fn with_broken_user(mut self, id: UserId) -> Self {
        self.broken_users.insert(id);
        self
    }

    /// Make `latest()` claim this id exists even if no such post is
    /// registered, simulating an inconsistent upstream listing.
    pub fn with_latest_reported(mut self, id: PostId) -> Self {
        self.latest_reported = Some(id);
        self
    }

    pub fn post_fetches(&self, id: PostId) -> u32 {
        self.calls.lock().unwrap().post.get(&id).copied().unwrap_or(0)
    }

    pub fn user_fetches(&self, id: UserId) -> u32 {
        self.calls.lock().unwrap().user.get(&id).copied().unwrap_or(0)
    }

    pub fn listing_fetches(&self) -> u32 {
        self.calls.lock().unwrap().listing
    }

    pub fn tag_batch_sizes(&self) -> Vec<usize> {
        self.calls.lock().unwrap().tag_batches.clone()
    }
}

#[async_trait]
impl RemoteLibrary for MockRemote {
    async fn post(&self, id: PostId) -> Result<Option<PostPayload>, FetchError> {
        *self.calls.lock().unwrap().post.entry(id).or_insert(0) += 1;
        if self.broken_posts.contains(&id) {
            return Err(FetchError::Upstream { status: 500 });
        }
        Ok(self.posts.get(&id).cloned())
    }

    async fn posts_after(&self, after: PostId, limit: u32) -> Result<Vec<PostPayload>, FetchError> {
        self.calls.lock().unwrap().listing += 1;
        let mut page: Vec<PostPayload> = self
            .posts
            .values()
            .filter(|p| p.id > after)
            .cloned()
            .collect();
        page.sort_by_key(|p| p.id);
        page.truncate(limit as usize);
        Ok(page)
    }

    async fn latest(&self, limit: u32) -> Result<Vec<PostPayload>, FetchError> {
        self.calls.lock().unwrap().latest += 1;
        if let Some(id) = self.latest_reported {
            return Ok(vec![post_payload(id, 1)]);
        }
        let mut newest: Vec<PostPayload> = self.posts.values().cloned().collect();
        newest.sort_by_key(|p| std::cmp::Reverse(p.id));
        newest.truncate(limit as usize);
        Ok(newest)
    }

    async fn user(&self, id: UserId) -> Result<Option<UserPayload>, FetchError> {
        *self.calls.lock().unwrap().user.entry(id).or_insert(0) += 1;
        if self.broken_users.contains(&id) {
            return Err(FetchError::Upstream { status: 500 });
        }
        Ok(self.users.get(&id).cloned())
    }

    async fn tags_by_name(&self, names: &[String]) -> Result<Vec<TagPayload>, FetchError> {
        self.calls.lock().unwrap().tag_batches.push(names.len());
        Ok(names
            .iter()
            .filter_map(|name| self.tags.get(name).cloned())
            .collect())
    }

    async fn media(&self, md5: &str, _ext: &str) -> Result<Option<Bytes>, FetchError> {
        self.calls.lock().unwrap().media += 1;
        Ok(self.media.get(md5).cloned())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Everything the store holds. Tests assert against a committed snapshot.
#[derive(Debug, Default, Clone)]
pub struct StoreState {
    pub posts: BTreeMap<PostId, PostRecord>,
    pub users: BTreeMap<UserId, UserRecord>,
    pub tags: BTreeMap<TagId, TagRecord>,
    pub tombstones: BTreeSet<PostId>,
    pub post_tags: BTreeMap<PostId, Vec<TagId>>,
    pub children: BTreeMap<PostId, Vec<(i32, PostId)>>,
    pub sources: BTreeMap<PostId, Vec<String>>,
    pub media: BTreeMap<PostId, Vec<u8>>,
}

#[derive(Default)]
struct MemoryInner {
    committed: StoreState,
    staged: Option<StoreState>,
}

impl MemoryInner {
    fn state(&self) -> &StoreState {
        self.staged.as_ref().unwrap_or(&self.committed)
    }

    fn state_mut(&mut self) -> &mut StoreState {
        match self.staged.as_mut() {
            Some(staged) => staged,
            None => &mut self.committed,
        }
    }
}

/// In-memory store. Writes outside a unit apply directly (handy for seeding
/// fixtures); writes inside a unit become visible to reads immediately but
/// only survive a commit.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed state only; staged writes are invisible here.
    pub fn snapshot(&self) -> StoreState {
        self.inner.lock().unwrap().committed.clone()
    }

    pub fn unit_open(&self) -> bool {
        self.inner.lock().unwrap().staged.is_some()
    }
}

#[async_trait]
impl MirrorStore for MemoryStore {
    async fn begin_unit(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.staged.is_some() {
            return Err(StoreError::UnitAlreadyOpen);
        }
        inner.staged = Some(inner.committed.clone());
        Ok(())
    }

    async fn commit_unit(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let staged = inner.staged.take().ok_or(StoreError::NoOpenUnit)?;
        inner.committed = staged;
        Ok(())
    }

    async fn rollback_unit(&self) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.staged.take().ok_or(StoreError::NoOpenUnit)?;
        Ok(())
    }

    async fn find_post(&self, id: PostId) -> Result<Option<PostRecord>, StoreError> {
        Ok(self.inner.lock().unwrap().state().posts.get(&id).cloned())
    }

    async fn find_user(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        Ok(self.inner.lock().unwrap().state().users.get(&id).cloned())
    }

    async fn is_tombstoned(&self, id: PostId) -> Result<bool, StoreError> {
        Ok(self.inner.lock().unwrap().state().tombstones.contains(&id))
    }

    async fn tags_by_text(&self, texts: &[String]) -> Result<Vec<TagRecord>, StoreError> {
        let wanted: HashSet<&str> = texts.iter().map(String::as_str).collect();
        Ok(self
            .inner
            .lock()
            .unwrap()
            .state()
            .tags
            .values()
            .filter(|t| wanted.contains(t.text.as_str()))
            .cloned()
            .collect())
    }

    async fn max_post_id(&self) -> Result<Option<PostId>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .state()
            .posts
            .keys()
            .next_back()
            .copied())
    }

    async fn insert_post(&self, post: &PostRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.state_mut();
        if state.posts.contains_key(&post.id) {
            return Err(StoreError::Constraint(format!("duplicate post {}", post.id)));
        }
        state.posts.insert(post.id, post.clone());
        Ok(())
    }

    async fn insert_user(&self, user: &UserRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.state_mut();
        if state.users.contains_key(&user.id) {
            return Err(StoreError::Constraint(format!("duplicate user {}", user.id)));
        }
        state.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn insert_tag(&self, tag: &TagRecord) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.state_mut();
        if state.tags.contains_key(&tag.id)
            || state.tags.values().any(|t| t.text == tag.text)
        {
            return Err(StoreError::Constraint(format!("duplicate tag {:?}", tag.text)));
        }
        state.tags.insert(tag.id, tag.clone());
        Ok(())
    }

    async fn insert_tombstone(&self, id: PostId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.state_mut().tombstones.insert(id) {
            return Err(StoreError::Constraint(format!("duplicate tombstone {id}")));
        }
        Ok(())
    }

    async fn insert_media(&self, post: PostId, bytes: &[u8]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.state_mut().media.insert(post, bytes.to_vec());
        Ok(())
    }

    async fn insert_sources(&self, post: PostId, urls: &[String]) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .state_mut()
            .sources
            .entry(post)
            .or_default()
            .extend(urls.iter().cloned());
        Ok(())
    }

    async fn set_post_uploader(&self, post: PostId, user: UserId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .state_mut()
            .posts
            .get_mut(&post)
            .ok_or_else(|| StoreError::Constraint(format!("no such post {post}")))?;
        record.uploader_id = Some(user);
        Ok(())
    }

    async fn set_post_approver(&self, post: PostId, user: UserId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .state_mut()
            .posts
            .get_mut(&post)
            .ok_or_else(|| StoreError::Constraint(format!("no such post {post}")))?;
        record.approver_id = Some(user);
        Ok(())
    }

    async fn set_user_avatar(&self, user: UserId, post: PostId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .state_mut()
            .users
            .get_mut(&user)
            .ok_or_else(|| StoreError::Constraint(format!("no such user {user}")))?;
        record.avatar_id = Some(post);
        Ok(())
    }

    async fn link_child(
        &self,
        parent: PostId,
        child: PostId,
        position: i32,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .state_mut()
            .children
            .entry(parent)
            .or_default()
            .push((position, child));
        Ok(())
    }

    async fn link_tags(&self, post: PostId, tags: &[TagId]) -> Result<(), StoreError> {
        if tags.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().unwrap();
        inner
            .state_mut()
            .post_tags
            .entry(post)
            .or_default()
            .extend_from_slice(tags);
        Ok(())
    }
}
