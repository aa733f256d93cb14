//! User and category repositories.

use chrono::Utc;
use sqlx::QueryBuilder;

use super::user::{Category, NewUser, User, UserUpdate};
use super::DbPool;
use crate::datetime::{parse_datetime, to_db};
use crate::{FeedloomError, Result};

#[derive(Debug, Clone, sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    language: String,
    block_filter_entry_rules: String,
    keep_filter_entry_rules: String,
    created_at: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            language: row.language,
            block_filter_entry_rules: row.block_filter_entry_rules,
            keep_filter_entry_rules: row.keep_filter_entry_rules,
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
        }
    }
}

const USER_COLUMNS: &str =
    "id, username, language, block_filter_entry_rules, keep_filter_entry_rules, created_at";

/// Repository for user operations.
pub struct UserRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> UserRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    /// Create a new user and return it with its assigned ID.
    pub async fn create(&self, new_user: &NewUser) -> Result<User> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO users (username, language, block_filter_entry_rules, keep_filter_entry_rules, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&new_user.username)
        .bind(&new_user.language)
        .bind(&new_user.block_filter_entry_rules)
        .bind(&new_user.keep_filter_entry_rules)
        .bind(to_db(&Utc::now()))
        .fetch_one(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        self.get_by_id(id)
            .await?
            .ok_or_else(|| FeedloomError::NotFound("user".to_string()))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(row.map(User::from))
    }

    pub async fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = ? COLLATE NOCASE"
        ))
        .bind(username)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(row.map(User::from))
    }

    /// Update a user. Returns `None` if the user does not exist.
    pub async fn update(&self, id: i64, update: &UserUpdate) -> Result<Option<User>> {
        if update.is_empty() {
            return self.get_by_id(id).await;
        }

        let mut query: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new("UPDATE users SET ");
        let mut separated = query.separated(", ");
        if let Some(ref language) = update.language {
            separated.push("language = ");
            separated.push_bind_unseparated(language);
        }
        if let Some(ref rules) = update.block_filter_entry_rules {
            separated.push("block_filter_entry_rules = ");
            separated.push_bind_unseparated(rules);
        }
        if let Some(ref rules) = update.keep_filter_entry_rules {
            separated.push("keep_filter_entry_rules = ");
            separated.push_bind_unseparated(rules);
        }
        query.push(" WHERE id = ");
        query.push_bind(id);

        let result = query
            .build()
            .execute(self.pool)
            .await
            .map_err(|e| FeedloomError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get_by_id(id).await
    }

    pub async fn list_all(&self) -> Result<Vec<User>> {
        let rows = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY username"
        ))
        .fetch_all(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(User::from).collect())
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct CategoryRow {
    id: i64,
    user_id: i64,
    title: String,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Category {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
        }
    }
}

/// Repository for category operations.
pub struct CategoryRepository<'a> {
    pool: &'a DbPool,
}

impl<'a> CategoryRepository<'a> {
    pub fn new(pool: &'a DbPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, user_id: i64, title: &str) -> Result<Category> {
        let row = sqlx::query_as::<_, CategoryRow>(
            "INSERT INTO categories (user_id, title) VALUES (?, ?)
             RETURNING id, user_id, title",
        )
        .bind(user_id)
        .bind(title)
        .fetch_one(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(row.into())
    }

    /// Category owned by `user_id`, or `None`.
    pub async fn get_by_user_and_id(&self, user_id: i64, id: i64) -> Result<Option<Category>> {
        let row = sqlx::query_as::<_, CategoryRow>(
            "SELECT id, user_id, title FROM categories WHERE user_id = ? AND id = ?",
        )
        .bind(user_id)
        .bind(id)
        .fetch_optional(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(row.map(Category::from))
    }

    pub async fn exists(&self, user_id: i64, id: i64) -> Result<bool> {
        Ok(self.get_by_user_and_id(user_id, id).await?.is_some())
    }

    pub async fn list_by_user(&self, user_id: i64) -> Result<Vec<Category>> {
        let rows = sqlx::query_as::<_, CategoryRow>(
            "SELECT id, user_id, title FROM categories WHERE user_id = ? ORDER BY title",
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await
        .map_err(|e| FeedloomError::Database(e.to_string()))?;

        Ok(rows.into_iter().map(Category::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_create_and_get_user() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = UserRepository::new(db.pool());

        let user = repo
            .create(&NewUser::new("alice").with_language("ja"))
            .await
            .unwrap();
        assert_eq!(user.username, "alice");
        assert_eq!(user.language, "ja");

        let found = repo.get_by_username("ALICE").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert!(repo.get_by_id(9999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_fails() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = UserRepository::new(db.pool());
        repo.create(&NewUser::new("alice")).await.unwrap();
        assert!(matches!(
            repo.create(&NewUser::new("alice")).await,
            Err(FeedloomError::Database(_))
        ));
    }

    #[tokio::test]
    async fn test_update_user_rules() {
        let db = Database::open_in_memory().await.unwrap();
        let repo = UserRepository::new(db.pool());
        let user = repo.create(&NewUser::new("alice")).await.unwrap();

        let updated = repo
            .update(user.id, &UserUpdate::new().block_rules("EntryTitle=ad"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.block_filter_entry_rules, "EntryTitle=ad");
        assert_eq!(updated.language, "en");

        let missing = repo
            .update(9999, &UserUpdate::new().language("ja"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_category_ownership() {
        let db = Database::open_in_memory().await.unwrap();
        let users = UserRepository::new(db.pool());
        let alice = users.create(&NewUser::new("alice")).await.unwrap();
        let bob = users.create(&NewUser::new("bob")).await.unwrap();

        let categories = CategoryRepository::new(db.pool());
        let news = categories.create(alice.id, "News").await.unwrap();

        assert!(categories.exists(alice.id, news.id).await.unwrap());
        assert!(!categories.exists(bob.id, news.id).await.unwrap());
        assert_eq!(categories.list_by_user(alice.id).await.unwrap(), vec![news]);
    }
}
