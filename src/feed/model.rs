// Domain types for the feed. Plain data, no I/O.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a post.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub String);

impl PostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an account. The same id keys the account's profile, so a
/// viewer, a post author and a profile owner are all `ViewerId`s.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewerId(pub String);

impl ViewerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage bucket an image lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Posts,
    Avatars,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posts => "posts",
            Self::Avatars => "avatars",
        }
    }
}

impl FromStr for Bucket {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "posts" => Ok(Self::Posts),
            "avatars" => Ok(Self::Avatars),
            other => Err(InvalidValue(format!("unknown bucket '{}'", other))),
        }
    }
}

/// Returned when a string does not parse into one of the domain enums or refs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct InvalidValue(pub String);

/// Key of a stored image: `<bucket>/<segment>/.../<file>`.
///
/// Refs written by this service are always `<bucket>/<owner>/<file>`, but any
/// path with a known bucket and clean segments is accepted so older refs
/// like `posts/abc.jpg` still resolve.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ImageRef(String);

impl ImageRef {
    pub fn new(bucket: Bucket, owner: &ViewerId, file_name: &str) -> Result<Self, InvalidValue> {
        Self::parse(&format!("{}/{}/{}", bucket.as_str(), owner.as_str(), file_name))
    }

    pub fn parse(raw: &str) -> Result<Self, InvalidValue> {
        let mut segments = raw.split('/');
        let bucket = segments.next().unwrap_or_default();
        bucket.parse::<Bucket>()?;

        let rest: Vec<&str> = segments.collect();
        if rest.is_empty() {
            return Err(InvalidValue(format!("image ref '{}' has no file name", raw)));
        }
        for segment in &rest {
            let clean = !segment.is_empty()
                && *segment != "."
                && *segment != ".."
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
            if !clean {
                return Err(InvalidValue(format!("invalid image ref '{}'", raw)));
            }
        }

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn bucket(&self) -> Bucket {
        // Validated in `parse`.
        self.0
            .split('/')
            .next()
            .and_then(|b| b.parse().ok())
            .unwrap_or(Bucket::Posts)
    }

    /// Owner segment, present when the ref has the `<bucket>/<owner>/<file>` shape.
    pub fn owner(&self) -> Option<&str> {
        let segments: Vec<&str> = self.0.split('/').collect();
        if segments.len() >= 3 {
            Some(segments[1])
        } else {
            None
        }
    }

    pub fn is_owned_by(&self, viewer: &ViewerId) -> bool {
        self.owner() == Some(viewer.as_str())
    }

    /// URL path the media route serves this image under.
    pub fn public_path(&self) -> String {
        format!("/media/{}", self.0)
    }
}

impl TryFrom<String> for ImageRef {
    type Error = InvalidValue;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        value.0
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Guitarist,
    Bassist,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Guitarist => "guitarist",
            Self::Bassist => "bassist",
        }
    }
}

impl FromStr for UserType {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "guitarist" => Ok(Self::Guitarist),
            "bassist" => Ok(Self::Bassist),
            other => Err(InvalidValue(format!("unknown user type '{}'", other))),
        }
    }
}

/// Feed ordering by creation time. Ties have no secondary order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::Oldest => "oldest",
        }
    }
}

impl FromStr for SortOrder {
    type Err = InvalidValue;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" => Ok(Self::Newest),
            "oldest" => Ok(Self::Oldest),
            other => Err(InvalidValue(format!("unknown sort order '{}'", other))),
        }
    }
}

/// A post as the viewer sees it. `like_count` and `viewer_has_liked` are
/// derived from the likes relation at fetch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: PostId,
    pub author_id: ViewerId,
    pub author_username: String,
    pub author_type: UserType,
    pub image_ref: ImageRef,
    pub image_url: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub like_count: u64,
    pub viewer_has_liked: bool,
}

impl Post {
    /// Flip the viewer's like and move the counter with it. Returns the new
    /// liked flag.
    pub fn toggle_like(&mut self) -> bool {
        self.viewer_has_liked = !self.viewer_has_liked;
        if self.viewer_has_liked {
            self.like_count += 1;
        } else {
            self.like_count = self.like_count.saturating_sub(1);
        }
        self.viewer_has_liked
    }

    pub fn apply_summary(&mut self, summary: LikeSummary) {
        self.like_count = summary.count;
        self.viewer_has_liked = summary.viewer_has_liked;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub id: ViewerId,
    pub username: String,
    pub user_type: UserType,
    pub avatar_ref: Option<ImageRef>,
    pub avatar_url: Option<String>,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Authoritative like state of one post relative to one viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeSummary {
    pub count: u64,
    pub viewer_has_liked: bool,
}

/// What to fetch for one feed page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedQuery {
    /// 1-based.
    pub page: u32,
    pub sort: SortOrder,
    pub user_type: Option<UserType>,
    pub author: Option<ViewerId>,
}

impl Default for FeedQuery {
    fn default() -> Self {
        Self {
            page: 1,
            sort: SortOrder::Newest,
            user_type: None,
            author: None,
        }
    }
}

impl FeedQuery {
    pub fn offset(&self, page_size: u32) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(page_size)
    }
}

/// One window of posts plus the total the window was cut from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostPage {
    pub items: Vec<Post>,
    pub total_count: u64,
}

/// Client-side feed state. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedPage {
    pub posts: Vec<Post>,
    pub current_page: u32,
    pub total_count: u64,
    pub sort: SortOrder,
    pub user_type: Option<UserType>,
    pub author: Option<ViewerId>,
    pub page_size: u32,
}

impl FeedPage {
    pub fn empty(page_size: u32) -> Self {
        Self {
            posts: Vec::new(),
            current_page: 1,
            total_count: 0,
            sort: SortOrder::default(),
            user_type: None,
            author: None,
            page_size,
        }
    }

    pub fn query(&self) -> FeedQuery {
        FeedQuery {
            page: self.current_page,
            sort: self.sort,
            user_type: self.user_type,
            author: self.author.clone(),
        }
    }

    pub fn page_count(&self) -> u32 {
        if self.page_size == 0 {
            return 1;
        }
        let pages = self.total_count.div_ceil(u64::from(self.page_size)).max(1);
        u32::try_from(pages).unwrap_or(u32::MAX)
    }

    pub fn has_next(&self) -> bool {
        self.current_page < self.page_count()
    }

    pub fn post(&self, id: &PostId) -> Option<&Post> {
        self.posts.iter().find(|p| &p.id == id)
    }

    pub fn post_mut(&mut self, id: &PostId) -> Option<&mut Post> {
        self.posts.iter_mut().find(|p| &p.id == id)
    }

    /// Drop a post from the page. Returns whether it was present.
    pub fn remove(&mut self, id: &PostId) -> bool {
        let before = self.posts.len();
        self.posts.retain(|p| &p.id != id);
        let removed = self.posts.len() != before;
        if removed {
            self.total_count = self.total_count.saturating_sub(1);
        }
        removed
    }
}
