// Incremental catch-up against the upstream listing.
//
// One bounded page per tick, one unit of work per page: either every post in
// the page commits and the watermark advances, or the whole page rolls back
// and the identical range is retried on the next tick. The watermark is owned
// by this worker alone and is recovered from the store at startup.

use std::sync::Arc;

use tracing::{error, info, warn};

use boorumirror_common::PostId;

use crate::error::SyncError;
use crate::mirror::Mirror;
use crate::traits::{MirrorStore, RemoteLibrary};

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The upstream had nothing beyond the watermark.
    Idle,
    /// One page mirrored and committed.
    Advanced {
        from: PostId,
        to: PostId,
        resolved: usize,
    },
    /// The listing yielded no ids beyond the watermark even though the
    /// upstream reported newer ones. Nothing was written.
    NoProgress,
}

pub struct CatchUpSync<R, S> {
    remote: Arc<R>,
    store: Arc<S>,
    mirror: Mirror<R, S>,
    page_size: i64,
    watermark: PostId,
}

impl<R: RemoteLibrary, S: MirrorStore> CatchUpSync<R, S> {
    /// Recover the watermark (highest mirrored post id) from the store and
    /// build the sync worker.
    pub async fn recover(remote: Arc<R>, store: Arc<S>, page_size: i64) -> Result<Self, SyncError> {
        let watermark = store.max_post_id().await?.unwrap_or(0);
        info!(watermark, page_size, "Recovered mirror watermark");
        Ok(Self {
            mirror: Mirror::new(remote.clone(), store.clone()),
            remote,
            store,
            page_size,
            watermark,
        })
    }

    pub fn watermark(&self) -> PostId {
        self.watermark
    }

    /// One bounded catch-up cycle. The page either commits as a whole and the
    /// watermark advances, or rolls back as a whole and the watermark stays.
    pub async fn tick(&mut self) -> Result<TickOutcome, SyncError> {
        let target = match self.latest_remote_id().await? {
            Some(id) => id,
            None => return Ok(TickOutcome::Idle),
        };
        if target <= self.watermark {
            return Ok(TickOutcome::Idle);
        }

        // Bound the page so a far-behind mirror still ticks in constant work.
        let goal = target.min(self.watermark + self.page_size);
        let from = self.watermark;
        info!(from = from + 1, to = goal, target, "Mirroring new posts");

        self.store.begin_unit().await?;
        match self.mirror_page(goal).await {
            Ok(0) => {
                self.store.rollback_unit().await?;
                warn!(
                    watermark = self.watermark,
                    target, "Listing made no forward progress; giving up until next tick"
                );
                Ok(TickOutcome::NoProgress)
            }
            Ok(resolved) => {
                self.store.commit_unit().await?;
                self.watermark = goal;
                info!(from = from + 1, to = goal, resolved, "Page committed, watermark advanced");
                Ok(TickOutcome::Advanced {
                    from,
                    to: goal,
                    resolved,
                })
            }
            Err(e) => {
                if let Err(rollback) = self.store.rollback_unit().await {
                    error!(error = %rollback, "Rollback failed after page error");
                }
                Err(e)
            }
        }
    }

    /// Fetch and resolve one clamped page in ascending id order. Returns how
    /// many posts were resolved; 0 means the listing yielded nothing inside
    /// the window.
    async fn mirror_page(&self, goal: PostId) -> Result<usize, SyncError> {
        let limit = (goal - self.watermark) as u32;
        let page = self.remote.posts_after(self.watermark, limit).await?;

        let mut page: Vec<_> = page
            .into_iter()
            .filter(|p| p.id > self.watermark && p.id <= goal)
            .collect();
        if page.is_empty() {
            return Ok(0);
        }
        page.sort_by_key(|p| p.id);

        let mut resolved = 0;
        for payload in page {
            let id = payload.id;
            self.mirror
                .resolve_post_payload(payload)
                .await
                .map_err(|source| SyncError::Resolve { id, source })?;
            // The payload and any media buffer are gone here; the resident
            // working set stays one item no matter the page size.
            resolved += 1;
        }
        Ok(resolved)
    }

    async fn latest_remote_id(&self) -> Result<Option<PostId>, SyncError> {
        let newest = self.remote.latest(1).await?;
        Ok(newest.iter().map(|p| p.id).max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{post_payload, stored_post, user_payload, MemoryStore, MockRemote};

    async fn seeded_store(ids: &[PostId]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for id in ids {
            store.insert_post(&stored_post(*id)).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn tick_is_idle_when_caught_up() {
        let remote = Arc::new(MockRemote::new().with_post(post_payload(1000, 1)));
        let store = seeded_store(&[1000]).await;
        let mut sync = CatchUpSync::recover(remote.clone(), store, 10).await.unwrap();

        assert_eq!(sync.watermark(), 1000);
        assert_eq!(sync.tick().await.unwrap(), TickOutcome::Idle);
        assert_eq!(remote.listing_fetches(), 0);
    }

    #[tokio::test]
    async fn one_tick_mirrors_the_whole_frontier_when_it_fits() {
        let mut remote = MockRemote::new().with_user(user_payload(10));
        for id in 991..=1000 {
            remote = remote.with_post(post_payload(id, 10));
        }
        let remote = Arc::new(remote);
        let store = seeded_store(&[990]).await;
        let mut sync = CatchUpSync::recover(remote, store.clone(), 10).await.unwrap();

        let outcome = sync.tick().await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Advanced {
                from: 990,
                to: 1000,
                resolved: 10
            }
        );
        assert_eq!(sync.watermark(), 1000);
        assert!(!store.unit_open());

        let state = store.snapshot();
        assert_eq!(state.posts.len(), 11);
        assert!((991..=1000).all(|id| state.posts.contains_key(&id)));

        assert_eq!(sync.tick().await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn pages_are_clamped_when_far_behind() {
        let mut remote = MockRemote::new().with_user(user_payload(10));
        for id in 1..=25 {
            remote = remote.with_post(post_payload(id, 10));
        }
        let remote = Arc::new(remote);
        let store = Arc::new(MemoryStore::new());
        let mut sync = CatchUpSync::recover(remote, store.clone(), 10).await.unwrap();

        assert_eq!(
            sync.tick().await.unwrap(),
            TickOutcome::Advanced { from: 0, to: 10, resolved: 10 }
        );
        assert_eq!(
            sync.tick().await.unwrap(),
            TickOutcome::Advanced { from: 10, to: 20, resolved: 10 }
        );
        assert_eq!(
            sync.tick().await.unwrap(),
            TickOutcome::Advanced { from: 20, to: 25, resolved: 5 }
        );
        assert_eq!(sync.tick().await.unwrap(), TickOutcome::Idle);
        assert_eq!(store.snapshot().posts.len(), 25);
    }

    #[tokio::test]
    async fn failing_page_rolls_back_and_keeps_the_watermark() {
        let mut remote = MockRemote::new()
            .with_user(user_payload(10))
            .with_broken_user(66);
        for id in 991..=1000 {
            let uploader = if id == 995 { 66 } else { 10 };
            remote = remote.with_post(post_payload(id, uploader));
        }
        let remote = Arc::new(remote);
        let store = seeded_store(&[990]).await;
        let mut sync = CatchUpSync::recover(remote, store.clone(), 10).await.unwrap();

        let err = sync.tick().await.unwrap_err();
        assert!(matches!(err, SyncError::Resolve { id: 995, .. }));

        // Watermark untouched, nothing from the page visible.
        assert_eq!(sync.watermark(), 990);
        assert!(!store.unit_open());
        assert_eq!(store.snapshot().posts.len(), 1);
    }

    #[tokio::test]
    async fn inconsistent_listing_warns_and_does_not_advance() {
        let remote = Arc::new(MockRemote::new().with_latest_reported(1010));
        let store = seeded_store(&[1000]).await;
        let mut sync = CatchUpSync::recover(remote, store.clone(), 10).await.unwrap();

        assert_eq!(sync.tick().await.unwrap(), TickOutcome::NoProgress);
        assert_eq!(sync.watermark(), 1000);
        assert!(!store.unit_open());
        assert_eq!(store.snapshot().posts.len(), 1);
    }

    #[tokio::test]
    async fn empty_store_starts_from_zero() {
        let remote = Arc::new(MockRemote::new());
        let store = Arc::new(MemoryStore::new());
        let mut sync = CatchUpSync::recover(remote, store, 10).await.unwrap();

        assert_eq!(sync.watermark(), 0);
        assert_eq!(sync.tick().await.unwrap(), TickOutcome::Idle);
    }
}
