use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use crate::db::models::{now_timestamp, PostRow, POST_COLUMNS, POST_FROM};
use crate::feed::model::{Bucket, FeedQuery, ImageRef, Post, PostId, PostPage, SortOrder, ViewerId};
use crate::feed::ports::{PostStore, StoreError};
use crate::state::DbPool;

pub const MAX_DESCRIPTION_CHARS: usize = 2000;

// Optional filters bind NULL to switch themselves off.
const FILTER: &str = "WHERE (?2 IS NULL OR pr.user_type = ?2) AND (?3 IS NULL OR p.user_id = ?3)";

pub struct SqlitePostStore {
    pool: DbPool,
}

impl SqlitePostStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn load(&self, post_id: &PostId, viewer: Option<&ViewerId>) -> Result<Option<Post>, StoreError> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {} {} WHERE p.id = ?2", POST_COLUMNS, POST_FROM);
        let row = conn
            .query_row(
                &sql,
                params![viewer.map(ViewerId::as_str).unwrap_or(""), post_id.as_str()],
                PostRow::from_row,
            )
            .optional()?;

        row.map(PostRow::into_post).transpose()
    }
}

pub fn validate_description(description: &str) -> Result<(), StoreError> {
    if description.trim().is_empty() {
        return Err(StoreError::Invalid("description is required".into()));
    }
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        return Err(StoreError::Invalid(format!(
            "description is limited to {} characters",
            MAX_DESCRIPTION_CHARS
        )));
    }
    Ok(())
}

#[async_trait]
impl PostStore for SqlitePostStore {
    async fn list_posts(
        &self,
        query: &FeedQuery,
        page_size: u32,
        viewer: Option<&ViewerId>,
    ) -> Result<PostPage, StoreError> {
        let conn = self.pool.get()?;
        let viewer_id = viewer.map(ViewerId::as_str).unwrap_or("");
        let user_type = query.user_type.map(|t| t.as_str());
        let author = query.author.as_ref().map(ViewerId::as_str);

        let total_count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) {} {}", POST_FROM, FILTER),
            params![viewer_id, user_type, author],
            |row| row.get(0),
        )?;

        let direction = match query.sort {
            SortOrder::Newest => "DESC",
            SortOrder::Oldest => "ASC",
        };
        let sql = format!(
            "SELECT {} {} {} ORDER BY p.created_at {} LIMIT ?4 OFFSET ?5",
            POST_COLUMNS, POST_FROM, FILTER, direction
        );
        let offset = i64::try_from(query.offset(page_size)).unwrap_or(i64::MAX);

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![viewer_id, user_type, author, page_size, offset],
                PostRow::from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        let items = rows
            .into_iter()
            .map(PostRow::into_post)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PostPage {
            items,
            total_count: u64::try_from(total_count).unwrap_or(0),
        })
    }

    async fn get_post(
        &self,
        post_id: &PostId,
        viewer: Option<&ViewerId>,
    ) -> Result<Option<Post>, StoreError> {
        self.load(post_id, viewer)
    }

    async fn create_post(
        &self,
        author: &ViewerId,
        image: &ImageRef,
        description: &str,
    ) -> Result<Post, StoreError> {
        validate_description(description)?;
        if image.bucket() != Bucket::Posts {
            return Err(StoreError::Invalid("post images live in the posts bucket".into()));
        }

        let id = PostId::generate();
        {
            let conn = self.pool.get()?;
            conn.execute(
                "INSERT INTO posts (id, user_id, image_ref, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.as_str(),
                    author.as_str(),
                    image.as_str(),
                    description.trim(),
                    now_timestamp()
                ],
            )?;
        }
        tracing::info!("Created post {} by {}", id, author);

        self.load(&id, Some(author))?
            .ok_or_else(|| StoreError::NotFound(format!("post {}", id)))
    }

    async fn delete_post(&self, post_id: &PostId, requester: &ViewerId) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        let owner: Option<String> = conn
            .query_row(
                "SELECT user_id FROM posts WHERE id = ?1",
                params![post_id.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        match owner {
            None => Err(StoreError::NotFound(format!("post {}", post_id))),
            Some(owner) if owner != requester.as_str() => Err(StoreError::Forbidden),
            Some(_) => {
                conn.execute("DELETE FROM posts WHERE id = ?1", params![post_id.as_str()])?;
                tracing::info!("Deleted post {}", post_id);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_post, insert_profile, migrated_pool};
    use crate::feed::model::UserType;

    fn like(pool: &DbPool, post: &str, user: &str) {
        pool.get()
            .unwrap()
            .execute(
                "INSERT INTO likes (id, post_id, user_id) VALUES (?1, ?2, ?3)",
                params![format!("{}-{}", post, user), post, user],
            )
            .unwrap();
    }

    fn seeded() -> (SqlitePostStore, DbPool, tempfile::TempDir) {
        let (pool, dir) = migrated_pool();
        insert_profile(&pool, "alice", "alice", "guitarist");
        insert_profile(&pool, "bob", "bob", "bassist");
        for i in 0..5 {
            let author = if i % 2 == 0 { "alice" } else { "bob" };
            insert_post(
                &pool,
                &format!("p{}", i),
                author,
                &format!("2025-01-0{}T10:00:00.000Z", i + 1),
            );
        }
        (SqlitePostStore::new(pool.clone()), pool, dir)
    }

    fn ids(page: &PostPage) -> Vec<&str> {
        page.items.iter().map(|p| p.id.as_str()).collect()
    }

    #[tokio::test]
    async fn lists_newest_first_with_total() {
        let (store, _pool, _dir) = seeded();
        let page = store.list_posts(&FeedQuery::default(), 2, None).await.unwrap();
        assert_eq!(ids(&page), vec!["p4", "p3"]);
        assert_eq!(page.total_count, 5);
    }

    #[tokio::test]
    async fn oldest_sort_and_last_partial_page() {
        let (store, _pool, _dir) = seeded();
        let query = FeedQuery {
            page: 3,
            sort: SortOrder::Oldest,
            ..FeedQuery::default()
        };
        let page = store.list_posts(&query, 2, None).await.unwrap();
        assert_eq!(ids(&page), vec!["p4"]);
    }

    #[tokio::test]
    async fn page_past_the_end_is_empty() {
        let (store, _pool, _dir) = seeded();
        let query = FeedQuery {
            page: 9,
            ..FeedQuery::default()
        };
        let page = store.list_posts(&query, 12, None).await.unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 5);
    }

    #[tokio::test]
    async fn filters_by_user_type_and_author() {
        let (store, _pool, _dir) = seeded();
        let bassists = FeedQuery {
            user_type: Some(UserType::Bassist),
            ..FeedQuery::default()
        };
        let page = store.list_posts(&bassists, 12, None).await.unwrap();
        assert_eq!(ids(&page), vec!["p3", "p1"]);
        assert_eq!(page.total_count, 2);

        let alice = FeedQuery {
            author: Some(ViewerId::new("alice")),
            ..FeedQuery::default()
        };
        let page = store.list_posts(&alice, 12, None).await.unwrap();
        assert_eq!(page.total_count, 3);
        assert!(page.items.iter().all(|p| p.author_username == "alice"));
    }

    #[tokio::test]
    async fn joins_like_counts_and_viewer_flag() {
        let (store, pool, _dir) = seeded();
        like(&pool, "p4", "alice");
        like(&pool, "p4", "bob");

        let alice = ViewerId::new("alice");
        let page = store
            .list_posts(&FeedQuery::default(), 1, Some(&alice))
            .await
            .unwrap();
        assert_eq!(page.items[0].like_count, 2);
        assert!(page.items[0].viewer_has_liked);

        let anon = store.get_post(&PostId::new("p4"), None).await.unwrap().unwrap();
        assert_eq!(anon.like_count, 2);
        assert!(!anon.viewer_has_liked);
    }

    #[tokio::test]
    async fn create_post_returns_the_mapped_post() {
        let (store, _pool, _dir) = seeded();
        let bob = ViewerId::new("bob");
        let image = ImageRef::new(Bucket::Posts, &bob, "rig.jpg").unwrap();

        let post = store.create_post(&bob, &image, "  Big Muff into a Deluxe  ").await.unwrap();
        assert_eq!(post.description, "Big Muff into a Deluxe");
        assert_eq!(post.author_type, UserType::Bassist);
        assert_eq!(post.like_count, 0);

        let newest = store.list_posts(&FeedQuery::default(), 1, None).await.unwrap();
        assert_eq!(newest.items[0].id, post.id);
    }

    #[tokio::test]
    async fn create_post_validates_input() {
        let (store, _pool, _dir) = seeded();
        let bob = ViewerId::new("bob");
        let image = ImageRef::new(Bucket::Posts, &bob, "rig.jpg").unwrap();
        let avatar = ImageRef::new(Bucket::Avatars, &bob, "me.jpg").unwrap();

        assert!(matches!(
            store.create_post(&bob, &image, "   ").await,
            Err(StoreError::Invalid(_))
        ));
        let long = "x".repeat(MAX_DESCRIPTION_CHARS + 1);
        assert!(matches!(
            store.create_post(&bob, &image, &long).await,
            Err(StoreError::Invalid(_))
        ));
        assert!(matches!(
            store.create_post(&bob, &avatar, "board").await,
            Err(StoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn create_post_without_profile_is_not_found() {
        let (store, pool, _dir) = seeded();
        crate::db::test_support::insert_account(&pool, "ghost");
        let ghost = ViewerId::new("ghost");
        let image = ImageRef::new(Bucket::Posts, &ghost, "rig.jpg").unwrap();
        assert!(matches!(
            store.create_post(&ghost, &image, "board").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_checks_ownership() {
        let (store, _pool, _dir) = seeded();
        let p0 = PostId::new("p0");

        assert!(matches!(
            store.delete_post(&p0, &ViewerId::new("bob")).await,
            Err(StoreError::Forbidden)
        ));
        store.delete_post(&p0, &ViewerId::new("alice")).await.unwrap();
        assert!(store.get_post(&p0, None).await.unwrap().is_none());
        assert!(matches!(
            store.delete_post(&p0, &ViewerId::new("alice")).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
