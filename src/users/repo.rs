use anyhow::Context;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use super::repo_types::{
    ChannelProfile, NewUser, ProfileUpdate, PublicUser, User, WatchedVideo, WatchedVideoRow,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A unique column (`userName` or `email`) is already taken.
    #[error("{0} already exists")]
    Conflict(&'static str),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for user records and the read-side aggregations that hang off
/// them. Reads that flow back to callers return [`PublicUser`].
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: NewUser) -> StoreResult<User>;
    /// A `user_name` match wins over an `email` match on a different row.
    async fn find_by_handle_or_email(
        &self,
        user_name: Option<&str>,
        email: Option<&str>,
    ) -> StoreResult<Option<User>>;
    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    async fn find_public_by_id(&self, id: Uuid) -> StoreResult<Option<PublicUser>>;
    async fn update_refresh_token(&self, id: Uuid, token: Option<&str>) -> StoreResult<()>;
    /// Swaps the stored refresh token only if it still equals `expected`.
    async fn replace_refresh_token(&self, id: Uuid, expected: &str, new: &str) -> StoreResult<bool>;
    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()>;
    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Option<PublicUser>>;
    async fn update_avatar(&self, id: Uuid, url: &str) -> StoreResult<Option<PublicUser>>;
    async fn update_cover(&self, id: Uuid, url: &str) -> StoreResult<Option<PublicUser>>;
    async fn channel_profile(&self, user_name: &str, viewer: Uuid) -> StoreResult<Option<ChannelProfile>>;
    /// `None` when the user does not exist; most recent first otherwise.
    async fn watch_history(&self, user_id: Uuid) -> StoreResult<Option<Vec<WatchedVideo>>>;
}

const USER_COLUMNS: &str = "id, user_name, email, full_name, avatar, cover_image, \
                            password_hash, refresh_token, created_at, updated_at";
const PUBLIC_COLUMNS: &str =
    "id, user_name, email, full_name, avatar, cover_image, created_at, updated_at";

fn map_write_error(err: sqlx::Error, what: &'static str) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let field = match db.constraint() {
                Some(c) if c.contains("email") => "email",
                _ => "userName",
            };
            return StoreError::Conflict(field);
        }
    }
    StoreError::Other(anyhow::Error::new(err).context(what))
}

pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    async fn update_returning_public(
        &self,
        sql: &str,
        id: Uuid,
        value: &str,
        what: &'static str,
    ) -> StoreResult<Option<PublicUser>> {
        let user = sqlx::query_as::<_, PublicUser>(sql)
            .bind(id)
            .bind(value)
            .fetch_optional(&self.db)
            .await
            .context(what)?;
        Ok(user)
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn create(&self, new: NewUser) -> StoreResult<User> {
        if let Some(existing) = self
            .find_by_handle_or_email(Some(&new.user_name), Some(&new.email))
            .await?
        {
            let field = if existing.user_name == new.user_name { "userName" } else { "email" };
            return Err(StoreError::Conflict(field));
        }

        let sql = format!(
            "INSERT INTO users (user_name, email, full_name, avatar, cover_image, password_hash)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(&new.user_name)
            .bind(&new.email)
            .bind(&new.full_name)
            .bind(&new.avatar)
            .bind(&new.cover_image)
            .bind(&new.password_hash)
            .fetch_one(&self.db)
            .await
            .map_err(|e| map_write_error(e, "insert user"))
    }

    async fn find_by_handle_or_email(
        &self,
        user_name: Option<&str>,
        email: Option<&str>,
    ) -> StoreResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS}
               FROM users
              WHERE user_name = $1 OR email = $2
              ORDER BY (user_name IS NOT DISTINCT FROM $1) DESC
              LIMIT 1"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(user_name)
            .bind(email)
            .fetch_optional(&self.db)
            .await
            .context("find user by handle or email")?;
        Ok(user)
    }

    async fn find_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find user by id")?;
        Ok(user)
    }

    async fn find_public_by_id(&self, id: Uuid) -> StoreResult<Option<PublicUser>> {
        let sql = format!("SELECT {PUBLIC_COLUMNS} FROM users WHERE id = $1");
        let user = sqlx::query_as::<_, PublicUser>(&sql)
            .bind(id)
            .fetch_optional(&self.db)
            .await
            .context("find public user by id")?;
        Ok(user)
    }

    async fn update_refresh_token(&self, id: Uuid, token: Option<&str>) -> StoreResult<()> {
        sqlx::query("UPDATE users SET refresh_token = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(token)
            .execute(&self.db)
            .await
            .context("update refresh token")?;
        Ok(())
    }

    async fn replace_refresh_token(&self, id: Uuid, expected: &str, new: &str) -> StoreResult<bool> {
        let res = sqlx::query(
            "UPDATE users
                SET refresh_token = $3, updated_at = now()
              WHERE id = $1 AND refresh_token = $2",
        )
        .bind(id)
        .bind(expected)
        .bind(new)
        .execute(&self.db)
        .await
        .context("rotate refresh token")?;
        Ok(res.rows_affected() == 1)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> StoreResult<()> {
        sqlx::query("UPDATE users SET password_hash = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(password_hash)
            .execute(&self.db)
            .await
            .context("update password")?;
        Ok(())
    }

    async fn update_profile(&self, id: Uuid, update: ProfileUpdate) -> StoreResult<Option<PublicUser>> {
        let sql = format!(
            "UPDATE users
                SET full_name = COALESCE($2, full_name),
                    email = COALESCE($3, email),
                    updated_at = now()
              WHERE id = $1
          RETURNING {PUBLIC_COLUMNS}"
        );
        sqlx::query_as::<_, PublicUser>(&sql)
            .bind(id)
            .bind(update.full_name)
            .bind(update.email)
            .fetch_optional(&self.db)
            .await
            .map_err(|e| map_write_error(e, "update profile"))
    }

    async fn update_avatar(&self, id: Uuid, url: &str) -> StoreResult<Option<PublicUser>> {
        let sql = format!(
            "UPDATE users SET avatar = $2, updated_at = now() WHERE id = $1 RETURNING {PUBLIC_COLUMNS}"
        );
        self.update_returning_public(&sql, id, url, "update avatar").await
    }

    async fn update_cover(&self, id: Uuid, url: &str) -> StoreResult<Option<PublicUser>> {
        let sql = format!(
            "UPDATE users SET cover_image = $2, updated_at = now() WHERE id = $1 RETURNING {PUBLIC_COLUMNS}"
        );
        self.update_returning_public(&sql, id, url, "update cover image").await
    }

    async fn channel_profile(&self, user_name: &str, viewer: Uuid) -> StoreResult<Option<ChannelProfile>> {
        let profile = sqlx::query_as::<_, ChannelProfile>(
            r#"
            SELECT u.id, u.user_name, u.full_name, u.email, u.avatar, u.cover_image,
                   (SELECT COUNT(*) FROM subscriptions s WHERE s.channel = u.id) AS subscribers_count,
                   (SELECT COUNT(*) FROM subscriptions s WHERE s.subscriber = u.id) AS channels_subscribed_to_count,
                   EXISTS (
                       SELECT 1 FROM subscriptions s
                        WHERE s.channel = u.id AND s.subscriber = $2
                   ) AS is_subscribed
              FROM users u
             WHERE u.user_name = $1
            "#,
        )
        .bind(user_name)
        .bind(viewer)
        .fetch_optional(&self.db)
        .await
        .context("channel profile")?;
        Ok(profile)
    }

    async fn watch_history(&self, user_id: Uuid) -> StoreResult<Option<Vec<WatchedVideo>>> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(user_id)
            .fetch_one(&self.db)
            .await
            .context("check user exists")?;
        if !exists {
            return Ok(None);
        }

        let rows = sqlx::query_as::<_, WatchedVideoRow>(
            r#"
            SELECT v.id, v.title, v.description, v.video_file, v.thumbnail,
                   v.duration, v.views, v.created_at,
                   o.user_name AS owner_user_name,
                   o.full_name AS owner_full_name,
                   o.avatar    AS owner_avatar
              FROM users u
             CROSS JOIN LATERAL unnest(u.watch_history) WITH ORDINALITY AS h(video_id, pos)
              JOIN videos v ON v.id = h.video_id
              JOIN users o ON o.id = v.owner
             WHERE u.id = $1
             ORDER BY h.pos DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.db)
        .await
        .context("watch history")?;

        Ok(Some(rows.into_iter().map(WatchedVideo::from).collect()))
    }
}
