use async_trait::async_trait;
use rusqlite::{params, OptionalExtension};

use crate::db::models::{ProfileRow, PROFILE_COLUMNS};
use crate::feed::model::{Profile, ViewerId};
use crate::feed::ports::{NewProfile, ProfileStore, ProfileUpdate, StoreError};
use crate::state::DbPool;

pub const USERNAME_MIN: usize = 3;
pub const USERNAME_MAX: usize = 30;
pub const MESSAGE_MAX: usize = 500;

pub fn validate_username(username: &str) -> Result<(), StoreError> {
    let len = username.chars().count();
    if !(USERNAME_MIN..=USERNAME_MAX).contains(&len) {
        return Err(StoreError::Invalid(format!(
            "username must be {} to {} characters",
            USERNAME_MIN, USERNAME_MAX
        )));
    }
    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(StoreError::Invalid(
            "username may only contain letters, digits, '_', '-' and '.'".into(),
        ));
    }
    Ok(())
}

fn validate_message(message: Option<&str>) -> Result<(), StoreError> {
    match message {
        Some(m) if m.chars().count() > MESSAGE_MAX => Err(StoreError::Invalid(format!(
            "message is limited to {} characters",
            MESSAGE_MAX
        ))),
        _ => Ok(()),
    }
}

pub struct SqliteProfileStore {
    pool: DbPool,
}

impl SqliteProfileStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn find(&self, column: &str, value: &str) -> Result<Option<Profile>, StoreError> {
        let conn = self.pool.get()?;
        let sql = format!("SELECT {} FROM profiles WHERE {} = ?1", PROFILE_COLUMNS, column);
        let row = conn
            .query_row(&sql, params![value], ProfileRow::from_row)
            .optional()?;
        row.map(ProfileRow::into_profile).transpose()
    }
}

#[async_trait]
impl ProfileStore for SqliteProfileStore {
    async fn create_profile(&self, id: &ViewerId, profile: NewProfile) -> Result<Profile, StoreError> {
        validate_username(&profile.username)?;
        validate_message(profile.message.as_deref())?;

        {
            let conn = self.pool.get()?;
            conn.execute(
                "INSERT INTO profiles (id, username, user_type, avatar_ref, message)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    id.as_str(),
                    profile.username,
                    profile.user_type.as_str(),
                    profile.avatar_ref.as_ref().map(|r| r.as_str()),
                    profile.message,
                ],
            )?;
        }
        tracing::info!("Created profile '{}' for {}", profile.username, id);

        self.find("id", id.as_str())?
            .ok_or_else(|| StoreError::NotFound(format!("profile {}", id)))
    }

    async fn get_profile(&self, id: &ViewerId) -> Result<Option<Profile>, StoreError> {
        self.find("id", id.as_str())
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Profile>, StoreError> {
        self.find("username", username)
    }

    async fn update_profile(&self, id: &ViewerId, update: ProfileUpdate) -> Result<Profile, StoreError> {
        let current = self
            .find("id", id.as_str())?
            .ok_or_else(|| StoreError::NotFound(format!("profile {}", id)))?;

        if let Some(username) = &update.username {
            validate_username(username)?;
        }
        validate_message(update.message.as_deref())?;

        let username = update.username.unwrap_or(current.username);
        let user_type = update.user_type.unwrap_or(current.user_type);
        let message = update.message.or(current.message);
        let avatar_ref = update.avatar_ref.or(current.avatar_ref);

        {
            let conn = self.pool.get()?;
            conn.execute(
                "UPDATE profiles SET username = ?2, user_type = ?3, avatar_ref = ?4, message = ?5
                 WHERE id = ?1",
                params![
                    id.as_str(),
                    username,
                    user_type.as_str(),
                    avatar_ref.as_ref().map(|r| r.as_str()),
                    message,
                ],
            )?;
        }

        self.find("id", id.as_str())?
            .ok_or_else(|| StoreError::NotFound(format!("profile {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{insert_account, migrated_pool};
    use crate::feed::model::{Bucket, ImageRef, UserType};

    fn new_profile(username: &str) -> NewProfile {
        NewProfile {
            username: username.into(),
            user_type: UserType::Guitarist,
            message: None,
            avatar_ref: None,
        }
    }

    #[test]
    fn username_rules() {
        assert!(validate_username("tele_player-1.0").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username(&"a".repeat(31)).is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username("émile").is_err());
    }

    #[tokio::test]
    async fn create_and_fetch() {
        let (pool, _dir) = migrated_pool();
        insert_account(&pool, "a1");
        let store = SqliteProfileStore::new(pool);
        let id = ViewerId::new("a1");

        let created = store.create_profile(&id, new_profile("fuzzface")).await.unwrap();
        assert_eq!(created.username, "fuzzface");
        assert_eq!(store.get_profile(&id).await.unwrap(), Some(created.clone()));
        assert_eq!(
            store.find_by_username("fuzzface").await.unwrap().map(|p| p.id),
            Some(id)
        );
        assert!(store.find_by_username("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn usernames_are_unique() {
        let (pool, _dir) = migrated_pool();
        insert_account(&pool, "a1");
        insert_account(&pool, "a2");
        let store = SqliteProfileStore::new(pool);

        store
            .create_profile(&ViewerId::new("a1"), new_profile("taken"))
            .await
            .unwrap();
        assert!(matches!(
            store.create_profile(&ViewerId::new("a2"), new_profile("taken")).await,
            Err(StoreError::Duplicate)
        ));
    }

    #[tokio::test]
    async fn onboarding_twice_is_a_duplicate() {
        let (pool, _dir) = migrated_pool();
        insert_account(&pool, "a1");
        let store = SqliteProfileStore::new(pool);
        let id = ViewerId::new("a1");

        store.create_profile(&id, new_profile("first")).await.unwrap();
        assert!(matches!(
            store.create_profile(&id, new_profile("second")).await,
            Err(StoreError::Duplicate)
        ));
    }

    #[tokio::test]
    async fn profile_needs_an_account() {
        let (pool, _dir) = migrated_pool();
        let store = SqliteProfileStore::new(pool);
        assert!(matches!(
            store.create_profile(&ViewerId::new("nobody"), new_profile("ghost")).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn update_changes_only_given_fields() {
        let (pool, _dir) = migrated_pool();
        insert_account(&pool, "a1");
        let store = SqliteProfileStore::new(pool);
        let id = ViewerId::new("a1");
        store.create_profile(&id, new_profile("ratbox")).await.unwrap();

        let avatar = ImageRef::new(Bucket::Avatars, &id, "me.png").unwrap();
        let updated = store
            .update_profile(
                &id,
                ProfileUpdate {
                    user_type: Some(UserType::Bassist),
                    avatar_ref: Some(avatar.clone()),
                    message: Some("low end".into()),
                    ..ProfileUpdate::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.username, "ratbox");
        assert_eq!(updated.user_type, UserType::Bassist);
        assert_eq!(updated.avatar_ref, Some(avatar));
        assert_eq!(updated.avatar_url.as_deref(), Some("/media/avatars/a1/me.png"));
        assert_eq!(updated.message.as_deref(), Some("low end"));
    }

    #[tokio::test]
    async fn update_rejects_long_message() {
        let (pool, _dir) = migrated_pool();
        insert_account(&pool, "a1");
        let store = SqliteProfileStore::new(pool);
        let id = ViewerId::new("a1");
        store.create_profile(&id, new_profile("ratbox")).await.unwrap();

        let result = store
            .update_profile(
                &id,
                ProfileUpdate {
                    message: Some("x".repeat(MESSAGE_MAX + 1)),
                    ..ProfileUpdate::default()
                },
            )
            .await;
        assert!(matches!(result, Err(StoreError::Invalid(_))));
    }
}
