// Feed controller - optimistic likes over per-post writer tasks
// Feed state sits behind one synchronous mutex that is never held across an
// await, so `toggle_like` mutates the visible counter before it returns.
// Each post's backend writes go through a single writer task, in the order
// the viewer issued them; a failed write is reconciled by refetching.
use bytes::Bytes;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;

use crate::feed::deletion::{self, DeleteError};
use crate::feed::model::{
    Bucket, FeedPage, FeedQuery, LikeSummary, Post, PostId, PostPage, SortOrder, UserType,
    ViewerId,
};
use crate::feed::ports::{
    DynImageStore, DynLikeStore, DynPostStore, DynViewerContext, StoreError,
};
use crate::feed::sync::{PostSync, SyncState};

/// How much state a failed like write refetches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileScope {
    /// Count and liked flag of the affected post only.
    #[default]
    Post,
    /// The whole current page.
    Page,
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub page_size: u32,
    pub reconcile_scope: ReconcileScope,
    pub reconcile_attempts: u32,
    pub reconcile_backoff: Duration,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            page_size: 12,
            reconcile_scope: ReconcileScope::Post,
            reconcile_attempts: 3,
            reconcile_backoff: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Sign in to do that")]
    AuthRequired,

    #[error("Post {0} is not in the current feed")]
    PostNotLoaded(PostId),

    #[error("Page numbers start at 1")]
    InvalidPage(u32),

    #[error("Could not load the feed: {0}")]
    Load(StoreError),

    #[error(transparent)]
    Delete(#[from] DeleteError),

    #[error("Could not publish the post: {0}")]
    Publish(StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    LoadFailed,
    LikeFailed,
    LikeDenied,
    ReconcileFailed,
    PostRemoved,
    DeleteFailed,
}

/// Non-fatal problem for the presentation layer to show and dismiss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedNotice {
    pub kind: NoticeKind,
    pub message: String,
}

impl FeedNotice {
    fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Local result of a toggle, visible before any network round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LikeToggle {
    pub liked: bool,
    pub like_count: u64,
}

struct FeedState {
    page: FeedPage,
    sync: HashMap<PostId, PostSync>,
    load_generation: u64,
    active_writers: usize,
    notice: Option<FeedNotice>,
}

impl FeedState {
    /// Replace the visible page with a fetched one. Posts that still have a
    /// writer keep their local optimistic values; everything else takes the
    /// server's.
    fn merge_page(&mut self, query: FeedQuery, fetched: PostPage) {
        let mut posts = fetched.items;
        for post in &mut posts {
            let Some(sync) = self.sync.get_mut(&post.id).filter(|s| s.writer_active) else {
                continue;
            };
            match self.page.post(&post.id) {
                Some(local) => {
                    post.like_count = local.like_count;
                    post.viewer_has_liked = local.viewer_has_liked;
                }
                None => {
                    // Fetched while off-page with a write in flight; the
                    // snapshot may predate the write.
                    post.like_count = sync.intended_count(post.like_count, post.viewer_has_liked);
                    post.viewer_has_liked = sync.desired;
                    sync.needs_verify = true;
                }
            }
        }

        self.sync.retain(|_, s| s.writer_active);
        for post in &posts {
            self.sync
                .entry(post.id.clone())
                .or_insert_with(|| PostSync::synced(post.viewer_has_liked));
        }

        self.page.posts = posts;
        self.page.total_count = fetched.total_count;
        self.page.current_page = query.page;
        self.page.sort = query.sort;
        self.page.user_type = query.user_type;
        self.page.author = query.author;
    }

    fn drop_post(&mut self, post_id: &PostId) {
        if self.page.remove(post_id) {
            self.notice = Some(FeedNotice::new(
                NoticeKind::PostRemoved,
                "That post is no longer available",
            ));
        }
        self.sync.remove(post_id);
    }

    fn release_post(&mut self, post_id: &PostId) {
        if let Some(sync) = self.sync.get_mut(post_id) {
            sync.writer_active = false;
        }
    }
}

enum Step {
    Write(bool),
    Verify,
    Done,
}

enum Refetch {
    Applied,
    Superseded,
    Vanished,
    Failed,
}

struct Inner {
    viewer: DynViewerContext,
    posts: DynPostStore,
    likes: DynLikeStore,
    images: DynImageStore,
    settings: FeedSettings,
    state: Mutex<FeedState>,
    idle: Notify,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn load(&self, query: FeedQuery) -> Result<(), FeedError> {
        if query.page == 0 {
            return Err(FeedError::InvalidPage(query.page));
        }

        let viewer = self.viewer.current_viewer();
        let generation = {
            let mut st = self.state();
            st.load_generation += 1;
            st.load_generation
        };

        let result = self
            .posts
            .list_posts(&query, self.settings.page_size, viewer.as_ref())
            .await;

        let mut st = self.state();
        if st.load_generation != generation {
            tracing::debug!("Discarding superseded load of page {}", query.page);
            return Ok(());
        }

        match result {
            Ok(fetched) => {
                tracing::debug!(
                    "Loaded page {} ({} posts, {} total)",
                    query.page,
                    fetched.items.len(),
                    fetched.total_count
                );
                st.merge_page(query, fetched);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Feed load failed: {}", e);
                st.notice = Some(FeedNotice::new(
                    NoticeKind::LoadFailed,
                    "Could not load posts. Showing the last loaded page.",
                ));
                Err(FeedError::Load(e))
            }
        }
    }

    /// Decide the writer's next move. `Done` releases the post.
    fn next_step(&self, post_id: &PostId, writes: u32, verify: bool) -> Step {
        let mut st = self.state();
        let Some(sync) = st.sync.get_mut(post_id) else {
            return Step::Done;
        };

        if sync.needs_write() {
            return Step::Write(sync.desired);
        }

        if writes > 1 || verify || sync.needs_verify {
            return Step::Verify;
        }

        sync.settle();
        sync.writer_active = false;
        Step::Done
    }

    fn confirm_write(&self, post_id: &PostId, liked: bool) {
        let mut st = self.state();
        if let Some(sync) = st.sync.get_mut(post_id) {
            sync.server_liked = Some(liked);
        }
    }

    fn mark_failed(&self, post_id: &PostId, error: &StoreError) {
        let mut st = self.state();
        let notice = if error.is_transient() {
            FeedNotice::new(NoticeKind::LikeFailed, "Could not save your like. Refreshing.")
        } else {
            FeedNotice::new(NoticeKind::LikeDenied, "You can't like that post right now.")
        };
        st.notice = Some(notice);
        if let Some(sync) = st.sync.get_mut(post_id) {
            sync.state = sync.state.write_failed().unwrap_or(SyncState::Reconciling);
            sync.server_liked = None;
        }
    }

    /// Refetch authoritative like state for one post and apply it.
    async fn refetch_post(&self, post_id: &PostId, viewer: &ViewerId) -> Refetch {
        let seq = match self.state().sync.get(post_id) {
            Some(sync) => sync.intent_seq,
            None => return Refetch::Vanished,
        };

        let attempts = self.settings.reconcile_attempts.max(1);
        let mut attempt = 0;
        let summary = loop {
            attempt += 1;
            let fetched = futures::try_join!(
                self.likes.count_likes(post_id),
                self.likes.has_liked(post_id, viewer)
            );
            match fetched {
                Ok((count, viewer_has_liked)) => {
                    break LikeSummary {
                        count,
                        viewer_has_liked,
                    }
                }
                Err(StoreError::NotFound(_)) => return Refetch::Vanished,
                Err(e) if attempt < attempts => {
                    tracing::debug!("Refetch of post {} failed (attempt {}): {}", post_id, attempt, e);
                    tokio::time::sleep(self.settings.reconcile_backoff * attempt).await;
                }
                Err(e) => {
                    tracing::warn!("Giving up reconciling post {}: {}", post_id, e);
                    return Refetch::Failed;
                }
            }
        };

        let mut guard = self.state();
        let st = &mut *guard;
        let Some(sync) = st.sync.get_mut(post_id) else {
            return Refetch::Vanished;
        };
        sync.server_liked = Some(summary.viewer_has_liked);
        sync.needs_verify = false;

        if sync.intent_seq != seq {
            // The viewer toggled while we were fetching: keep their intent on
            // top of the authoritative count and let the writer catch up.
            if let Some(post) = st.page.post_mut(post_id) {
                post.like_count = sync.intended_count(summary.count, summary.viewer_has_liked);
            }
            return Refetch::Superseded;
        }

        if let Some(post) = st.page.post_mut(post_id) {
            post.apply_summary(summary);
        }
        sync.desired = summary.viewer_has_liked;
        sync.settle();
        sync.writer_active = false;
        Refetch::Applied
    }

    fn writer_done(&self) {
        let mut st = self.state();
        st.active_writers = st.active_writers.saturating_sub(1);
        if st.active_writers == 0 {
            self.idle.notify_waiters();
        }
    }

    async fn run_writer(self: Arc<Self>, post_id: PostId, viewer: ViewerId) {
        self.drive_writes(&post_id, &viewer).await;
        self.writer_done();
    }

    async fn drive_writes(&self, post_id: &PostId, viewer: &ViewerId) {
        let mut writes = 0u32;
        let mut verify = false;

        loop {
            let desired = match self.next_step(post_id, writes, verify) {
                Step::Done => return,
                Step::Write(desired) => desired,
                Step::Verify => match self.refetch_post(post_id, viewer).await {
                    Refetch::Applied => return,
                    Refetch::Superseded => {
                        writes = 0;
                        verify = false;
                        continue;
                    }
                    Refetch::Vanished => {
                        self.state().drop_post(post_id);
                        return;
                    }
                    Refetch::Failed => {
                        self.give_up(post_id);
                        return;
                    }
                },
            };

            if self
                .state()
                .sync
                .get(post_id)
                .map(|s| s.server_liked.is_none())
                .unwrap_or(false)
            {
                verify = true;
            }

            let result = if desired {
                self.likes.create_like(post_id, viewer).await
            } else {
                self.likes.delete_like(post_id, viewer).await
            };
            writes += 1;

            match result {
                Ok(()) => self.confirm_write(post_id, desired),
                Err(StoreError::Duplicate) if desired => {
                    tracing::debug!("Post {} was already liked", post_id);
                    self.confirm_write(post_id, true);
                }
                Err(StoreError::NotFound(_)) => {
                    tracing::info!("Post {} vanished while liking it", post_id);
                    self.state().drop_post(post_id);
                    return;
                }
                Err(e) => {
                    tracing::warn!("Like write for post {} failed: {}", post_id, e);
                    self.mark_failed(post_id, &e);
                    if !self.reconcile_after_failure(post_id, viewer).await {
                        return;
                    }
                    writes = 0;
                    verify = false;
                }
            }
        }
    }

    /// Returns whether the writer should keep going.
    async fn reconcile_after_failure(&self, post_id: &PostId, viewer: &ViewerId) -> bool {
        match self.settings.reconcile_scope {
            ReconcileScope::Post => match self.refetch_post(post_id, viewer).await {
                Refetch::Applied => false,
                Refetch::Superseded => true,
                Refetch::Vanished => {
                    self.state().drop_post(post_id);
                    false
                }
                Refetch::Failed => {
                    self.give_up(post_id);
                    false
                }
            },
            ReconcileScope::Page => {
                let query = {
                    let mut st = self.state();
                    st.release_post(post_id);
                    st.page.query()
                };
                // On failure the post stays Reconciling with an unknown
                // server state; the load already raised a notice.
                if let Err(e) = self.load(query).await {
                    tracing::warn!("Page reconcile failed: {}", e);
                }
                false
            }
        }
    }

    fn give_up(&self, post_id: &PostId) {
        let mut st = self.state();
        st.notice = Some(FeedNotice::new(
            NoticeKind::ReconcileFailed,
            "Like counts may be out of date.",
        ));
        if let Some(sync) = st.sync.get_mut(post_id) {
            sync.state = SyncState::Reconciling;
            sync.server_liked = None;
        }
        st.release_post(post_id);
    }
}

/// Paginated, sorted post feed for one viewer.
#[derive(Clone)]
pub struct FeedController {
    inner: Arc<Inner>,
}

impl FeedController {
    pub fn new(
        viewer: DynViewerContext,
        posts: DynPostStore,
        likes: DynLikeStore,
        images: DynImageStore,
        settings: FeedSettings,
    ) -> Self {
        let page = FeedPage::empty(settings.page_size);
        Self {
            inner: Arc::new(Inner {
                viewer,
                posts,
                likes,
                images,
                settings,
                state: Mutex::new(FeedState {
                    page,
                    sync: HashMap::new(),
                    load_generation: 0,
                    active_writers: 0,
                    notice: None,
                }),
                idle: Notify::new(),
            }),
        }
    }

    pub fn snapshot(&self) -> FeedPage {
        self.inner.state().page.clone()
    }

    pub fn post(&self, post_id: &PostId) -> Option<Post> {
        self.inner.state().page.post(post_id).cloned()
    }

    pub fn sync_state(&self, post_id: &PostId) -> Option<SyncState> {
        self.inner.state().sync.get(post_id).map(|s| s.state)
    }

    pub fn notice(&self) -> Option<FeedNotice> {
        self.inner.state().notice.clone()
    }

    pub fn dismiss_notice(&self) {
        self.inner.state().notice = None;
    }

    /// Fetch `page` in `sort` order, keeping the current filter and author scope.
    pub async fn load_page(&self, page: u32, sort: SortOrder) -> Result<(), FeedError> {
        let query = {
            let st = self.inner.state();
            FeedQuery {
                page,
                sort,
                user_type: st.page.user_type,
                author: st.page.author.clone(),
            }
        };
        self.inner.load(query).await
    }

    pub async fn reload(&self) -> Result<(), FeedError> {
        let query = self.inner.state().page.query();
        self.inner.load(query).await
    }

    /// A new order invalidates page numbers, so this always lands on page 1.
    pub async fn change_sort(&self, sort: SortOrder) -> Result<(), FeedError> {
        self.load_page(1, sort).await
    }

    pub async fn change_filter(&self, user_type: Option<UserType>) -> Result<(), FeedError> {
        let query = {
            let st = self.inner.state();
            FeedQuery {
                page: 1,
                sort: st.page.sort,
                user_type,
                author: st.page.author.clone(),
            }
        };
        self.inner.load(query).await
    }

    /// Scope the feed to one profile's posts, or back to everyone's.
    pub async fn show_author(&self, author: Option<ViewerId>) -> Result<(), FeedError> {
        let query = {
            let st = self.inner.state();
            FeedQuery {
                page: 1,
                sort: st.page.sort,
                user_type: st.page.user_type,
                author,
            }
        };
        self.inner.load(query).await
    }

    /// Flip the viewer's like on a loaded post. The returned values are
    /// already visible in `snapshot()`; the backend write happens on a
    /// spawned task, so this must be called within a tokio runtime.
    pub fn toggle_like(&self, post_id: &PostId) -> Result<LikeToggle, FeedError> {
        let viewer = self
            .inner
            .viewer
            .current_viewer()
            .ok_or(FeedError::AuthRequired)?;

        let (toggle, spawn) = {
            let mut guard = self.inner.state();
            let st = &mut *guard;

            let post = st
                .page
                .post_mut(post_id)
                .ok_or_else(|| FeedError::PostNotLoaded(post_id.clone()))?;
            let was_liked = post.viewer_has_liked;
            let liked = post.toggle_like();
            let toggle = LikeToggle {
                liked,
                like_count: post.like_count,
            };

            let sync = st
                .sync
                .entry(post_id.clone())
                .or_insert_with(|| PostSync::synced(was_liked));
            sync.record_toggle(liked);

            let spawn = !sync.writer_active;
            if spawn {
                sync.writer_active = true;
                st.active_writers += 1;
            }
            (toggle, spawn)
        };

        if spawn {
            tokio::spawn(Inner::run_writer(
                self.inner.clone(),
                post_id.clone(),
                viewer,
            ));
        }
        Ok(toggle)
    }

    /// Delete one of the viewer's own posts: image first, then the record.
    pub async fn delete_post(&self, post_id: &PostId) -> Result<(), FeedError> {
        let viewer = self
            .inner
            .viewer
            .current_viewer()
            .ok_or(FeedError::AuthRequired)?;
        let post = self
            .post(post_id)
            .ok_or_else(|| FeedError::PostNotLoaded(post_id.clone()))?;

        let result = deletion::delete_post(
            self.inner.images.as_ref(),
            self.inner.posts.as_ref(),
            &post,
            &viewer,
        )
        .await;

        let mut st = self.inner.state();
        match result {
            Ok(()) => {
                st.page.remove(post_id);
                st.sync.remove(post_id);
                // A load already in flight may carry a pre-delete snapshot.
                st.load_generation += 1;
                tracing::info!("Deleted post {}", post_id);
                Ok(())
            }
            Err(e) => {
                if !matches!(e, DeleteError::NotAuthor) {
                    st.notice = Some(FeedNotice::new(
                        NoticeKind::DeleteFailed,
                        "Could not delete the post.",
                    ));
                }
                Err(e.into())
            }
        }
    }

    /// Upload an image and post it. The upload is removed again if the post
    /// cannot be created. Reloads the first page on success.
    pub async fn publish(
        &self,
        file_name: &str,
        data: Bytes,
        description: &str,
    ) -> Result<Post, FeedError> {
        let viewer = self
            .inner
            .viewer
            .current_viewer()
            .ok_or(FeedError::AuthRequired)?;

        let description = description.trim();
        if description.is_empty() {
            return Err(FeedError::Publish(StoreError::Invalid(
                "Description cannot be empty".into(),
            )));
        }

        let image = self
            .inner
            .images
            .put_image(Bucket::Posts, &viewer, file_name, data)
            .await
            .map_err(FeedError::Publish)?;

        let post = match self
            .inner
            .posts
            .create_post(&viewer, &image, description)
            .await
        {
            Ok(post) => post,
            Err(e) => {
                if let Err(cleanup) = self.inner.images.remove_image(&image).await {
                    tracing::warn!("Orphaned image {}: {}", image, cleanup);
                }
                return Err(FeedError::Publish(e));
            }
        };

        let sort = self.inner.state().page.sort;
        if let Err(e) = self.load_page(1, sort).await {
            tracing::debug!("Post {} published but reload failed: {}", post.id, e);
        }
        Ok(post)
    }

    /// Wait until every like writer, including its reconciliation, has finished.
    pub async fn settle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            let idle = self.inner.state().active_writers == 0;
            if idle {
                return;
            }
            notified.await;
        }
    }
}
