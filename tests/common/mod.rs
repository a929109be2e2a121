// In-memory stand-ins for the feed ports, with failure injection and a gate
// for holding like writes in flight.
#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use pedalboard::feed::model::{
    Bucket, FeedQuery, ImageRef, Post, PostId, PostPage, SortOrder, UserType, ViewerId,
};
use pedalboard::feed::ports::{
    DynViewerContext, ImageStore, LikeStore, PostStore, StaticViewer, StoreError,
};
use pedalboard::feed::{FeedController, FeedSettings};

#[derive(Default)]
struct FakeState {
    posts: Vec<Post>,
    likes: HashSet<(PostId, ViewerId)>,
    images: HashSet<String>,
    calls: Vec<String>,
    failing_writes: u32,
    failing_refetches: u32,
    list_fails: bool,
    image_removal_fails: bool,
    create_post_fails: bool,
    list_delays: VecDeque<Duration>,
    list_stalls: VecDeque<Duration>,
    uploads: u32,
}

#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<FakeState>,
    write_gate: tokio::sync::Mutex<()>,
    write_started: Notify,
}

pub fn alice() -> ViewerId {
    ViewerId::new("alice")
}

pub fn bob() -> ViewerId {
    ViewerId::new("bob")
}

/// A post by `author` created `minutes` after a fixed epoch.
pub fn post(id: &str, author: &ViewerId, user_type: UserType, minutes: i64) -> Post {
    let image_ref = ImageRef::parse(&format!("posts/{}/{}.jpg", author, id)).unwrap();
    Post {
        id: PostId::new(id),
        author_id: author.clone(),
        author_username: author.to_string(),
        author_type: user_type,
        image_url: image_ref.public_path(),
        image_ref,
        description: format!("board {}", id),
        created_at: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
            + ChronoDuration::minutes(minutes),
        like_count: 0,
        viewer_has_liked: false,
    }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: String) {
        self.state().calls.push(call);
    }

    // --- Seeding and inspection ---

    pub fn add_post(&self, post: Post) {
        let mut st = self.state();
        st.images.insert(post.image_ref.to_string());
        st.posts.push(post);
    }

    pub fn add_post_without_image(&self, post: Post) {
        self.state().posts.push(post);
    }

    pub fn remove_post_server_side(&self, id: &str) {
        self.state().posts.retain(|p| p.id.as_str() != id);
    }

    pub fn add_like(&self, post: &str, user: &str) {
        self.state()
            .likes
            .insert((PostId::new(post), ViewerId::new(user)));
    }

    /// Give `post` `n` likes from other users.
    pub fn add_fans(&self, post: &str, n: usize) {
        for i in 0..n {
            self.add_like(post, &format!("fan{}", i));
        }
    }

    pub fn server_count(&self, post: &str) -> u64 {
        self.state()
            .likes
            .iter()
            .filter(|(p, _)| p.as_str() == post)
            .count() as u64
    }

    pub fn server_liked(&self, post: &str, user: &ViewerId) -> bool {
        self.state()
            .likes
            .contains(&(PostId::new(post), user.clone()))
    }

    pub fn has_post(&self, id: &str) -> bool {
        self.state().posts.iter().any(|p| p.id.as_str() == id)
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state().images.contains(image)
    }

    pub fn image_count(&self) -> usize {
        self.state().images.len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Calls touching likes, in order.
    pub fn like_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.contains("like"))
            .collect()
    }

    // --- Failure injection ---

    pub fn fail_next_writes(&self, n: u32) {
        self.state().failing_writes = n;
    }

    pub fn fail_next_refetches(&self, n: u32) {
        self.state().failing_refetches = n;
    }

    pub fn set_list_failure(&self, fails: bool) {
        self.state().list_fails = fails;
    }

    pub fn set_image_removal_failure(&self, fails: bool) {
        self.state().image_removal_fails = fails;
    }

    pub fn set_create_post_failure(&self, fails: bool) {
        self.state().create_post_fails = fails;
    }

    pub fn delay_next_list(&self, delay: Duration) {
        self.state().list_delays.push_back(delay);
    }

    /// Like `delay_next_list`, but the page is read before the wait, the way a
    /// remote server answers from a snapshot that arrives late.
    pub fn stall_next_list_response(&self, delay: Duration) {
        self.state().list_stalls.push_back(delay);
    }

    // --- Write gating ---

    /// Hold like writes until the guard is dropped.
    pub async fn hold_writes(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.write_gate.lock().await
    }

    /// Resolves once a like write has reached the backend.
    pub async fn write_started(&self) {
        self.write_started.notified().await;
    }

    async fn enter_write(&self, call: String) -> Result<(), StoreError> {
        self.record(call);
        self.write_started.notify_one();
        let _gate = self.write_gate.lock().await;

        let mut st = self.state();
        if st.failing_writes > 0 {
            st.failing_writes -= 1;
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }

    fn view(&self, post: &Post, viewer: Option<&ViewerId>) -> Post {
        let st = self.state();
        let mut post = post.clone();
        post.like_count = st.likes.iter().filter(|(p, _)| p == &post.id).count() as u64;
        post.viewer_has_liked = viewer
            .map(|v| st.likes.contains(&(post.id.clone(), v.clone())))
            .unwrap_or(false);
        post
    }
}

#[async_trait]
impl PostStore for FakeBackend {
    async fn list_posts(
        &self,
        query: &FeedQuery,
        page_size: u32,
        viewer: Option<&ViewerId>,
    ) -> Result<PostPage, StoreError> {
        let (delay, stall) = {
            let mut st = self.state();
            st.calls.push(format!("list_posts {}", query.page));
            if st.list_fails {
                return Err(StoreError::Unavailable("injected list failure".into()));
            }
            (st.list_delays.pop_front(), st.list_stalls.pop_front())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut matching: Vec<Post> = self
            .state()
            .posts
            .iter()
            .filter(|p| query.user_type.map_or(true, |t| p.author_type == t))
            .filter(|p| query.author.as_ref().map_or(true, |a| &p.author_id == a))
            .cloned()
            .collect();
        matching.sort_by_key(|p| p.created_at);
        if query.sort == SortOrder::Newest {
            matching.reverse();
        }

        let total_count = matching.len() as u64;
        let items = matching
            .iter()
            .skip(query.offset(page_size) as usize)
            .take(page_size as usize)
            .map(|p| self.view(p, viewer))
            .collect();

        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        Ok(PostPage { items, total_count })
    }

    async fn get_post(
        &self,
        post_id: &PostId,
        viewer: Option<&ViewerId>,
    ) -> Result<Option<Post>, StoreError> {
        let found = self
            .state()
            .posts
            .iter()
            .find(|p| &p.id == post_id)
            .cloned();
        Ok(found.map(|p| self.view(&p, viewer)))
    }

    async fn create_post(
        &self,
        author: &ViewerId,
        image: &ImageRef,
        description: &str,
    ) -> Result<Post, StoreError> {
        let mut st = self.state();
        st.calls.push(format!("create_post {}", image));
        if st.create_post_fails {
            return Err(StoreError::Unavailable("injected create failure".into()));
        }
        let minutes = 10_000 + st.posts.len() as i64;
        let mut created = post(
            &format!("new{}", st.posts.len()),
            author,
            UserType::Guitarist,
            minutes,
        );
        created.image_ref = image.clone();
        created.image_url = image.public_path();
        created.description = description.to_string();
        st.posts.push(created.clone());
        Ok(created)
    }

    async fn delete_post(&self, post_id: &PostId, requester: &ViewerId) -> Result<(), StoreError> {
        let mut st = self.state();
        st.calls.push(format!("delete_post {}", post_id));
        let Some(pos) = st.posts.iter().position(|p| &p.id == post_id) else {
            return Err(StoreError::NotFound(format!("post {}", post_id)));
        };
        if &st.posts[pos].author_id != requester {
            return Err(StoreError::Forbidden);
        }
        st.posts.remove(pos);
        st.likes.retain(|(p, _)| p != post_id);
        Ok(())
    }
}

#[async_trait]
impl LikeStore for FakeBackend {
    async fn create_like(&self, post_id: &PostId, user_id: &ViewerId) -> Result<(), StoreError> {
        self.enter_write(format!("create_like {}", post_id)).await?;
        let mut st = self.state();
        if !st.posts.iter().any(|p| &p.id == post_id) {
            return Err(StoreError::NotFound(format!("post {}", post_id)));
        }
        if !st.likes.insert((post_id.clone(), user_id.clone())) {
            return Err(StoreError::Duplicate);
        }
        Ok(())
    }

    async fn delete_like(&self, post_id: &PostId, user_id: &ViewerId) -> Result<(), StoreError> {
        self.enter_write(format!("delete_like {}", post_id)).await?;
        self.state()
            .likes
            .remove(&(post_id.clone(), user_id.clone()));
        Ok(())
    }

    async fn count_likes(&self, post_id: &PostId) -> Result<u64, StoreError> {
        let mut st = self.state();
        st.calls.push(format!("count_likes {}", post_id));
        if st.failing_refetches > 0 {
            st.failing_refetches -= 1;
            return Err(StoreError::Unavailable("injected refetch failure".into()));
        }
        if !st.posts.iter().any(|p| &p.id == post_id) {
            return Err(StoreError::NotFound(format!("post {}", post_id)));
        }
        Ok(st.likes.iter().filter(|(p, _)| p == post_id).count() as u64)
    }

    async fn has_liked(&self, post_id: &PostId, user_id: &ViewerId) -> Result<bool, StoreError> {
        let mut st = self.state();
        st.calls.push(format!("has_liked {}", post_id));
        Ok(st.likes.contains(&(post_id.clone(), user_id.clone())))
    }
}

#[async_trait]
impl ImageStore for FakeBackend {
    async fn put_image(
        &self,
        bucket: Bucket,
        owner: &ViewerId,
        file_name: &str,
        _data: Bytes,
    ) -> Result<ImageRef, StoreError> {
        let mut st = self.state();
        st.uploads += 1;
        let image = ImageRef::new(bucket, owner, &format!("{}-{}", st.uploads, file_name))
            .map_err(|e| StoreError::Invalid(e.to_string()))?;
        st.calls.push(format!("put_image {}", image));
        st.images.insert(image.to_string());
        Ok(image)
    }

    async fn remove_image(&self, image: &ImageRef) -> Result<(), StoreError> {
        let mut st = self.state();
        st.calls.push(format!("remove_image {}", image));
        if st.image_removal_fails {
            return Err(StoreError::Unavailable("injected storage failure".into()));
        }
        if !st.images.remove(image.as_str()) {
            return Err(StoreError::NotFound(format!("image {}", image)));
        }
        Ok(())
    }
}

pub fn fast_settings() -> FeedSettings {
    FeedSettings {
        reconcile_backoff: Duration::from_millis(1),
        ..FeedSettings::default()
    }
}

/// Controller over `backend` for `viewer`.
pub fn controller_with(
    backend: &Arc<FakeBackend>,
    viewer: Option<ViewerId>,
    settings: FeedSettings,
) -> FeedController {
    let viewer: DynViewerContext = Arc::new(StaticViewer(viewer));
    FeedController::new(
        viewer,
        backend.clone(),
        backend.clone(),
        backend.clone(),
        settings,
    )
}

pub fn controller(backend: &Arc<FakeBackend>, viewer: Option<ViewerId>) -> FeedController {
    controller_with(backend, viewer, fast_settings())
}
