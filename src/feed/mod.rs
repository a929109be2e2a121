pub mod controller;
pub mod deletion;
pub mod model;
pub mod ports;
pub mod sync;

pub use controller::{
    FeedController, FeedError, FeedNotice, FeedSettings, LikeToggle, NoticeKind, ReconcileScope,
};
pub use model::{
    Bucket, FeedPage, FeedQuery, ImageRef, LikeSummary, Post, PostId, PostPage, Profile,
    SortOrder, UserType, ViewerId,
};
pub use ports::{ImageStore, LikeStore, PostStore, ProfileStore, StoreError, ViewerContext};
pub use sync::SyncState;
