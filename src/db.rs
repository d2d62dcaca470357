use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::store::{MessageStore, PersistenceError, PresenceFlags, StoredMessage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    /// Display cache of presence; may be stale.
    pub online_status: bool,
}

/// What any signed-in user may see about the others.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub online_status: bool,
}

type UserRow = (String, String, String, bool);
type SummaryRow = (String, String, bool);
type MessageRow = (String, String, String, String, i64);

impl TryFrom<UserRow> for User {
    type Error = PersistenceError;

    fn try_from((id, name, email, online_status): UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: Uuid::parse_str(&id)?,
            name,
            email,
            online_status,
        })
    }
}

impl TryFrom<SummaryRow> for UserSummary {
    type Error = PersistenceError;

    fn try_from((id, name, online_status): SummaryRow) -> Result<Self, Self::Error> {
        Ok(UserSummary {
            id: Uuid::parse_str(&id)?,
            name,
            online_status,
        })
    }
}

impl TryFrom<MessageRow> for StoredMessage {
    type Error = PersistenceError;

    fn try_from(
        (id, sender_id, recipient_id, content, created_at): MessageRow,
    ) -> Result<Self, Self::Error> {
        Ok(StoredMessage {
            id: Uuid::parse_str(&id)?,
            sender_id: Uuid::parse_str(&sender_id)?,
            recipient_id: Uuid::parse_str(&recipient_id)?,
            content,
            created_at: from_millis(created_at)?,
        })
    }
}

/// Open the pool and bring the schema up to date.
pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect_with(options)
        .await?;

    sqlx::migrate!().run(&db_pool).await?;
    tracing::info!(database_url, "database ready");
    Ok(db_pool)
}

/// Nobody holds a connection right after boot, whatever the flags say.
pub async fn reset_presence(db_pool: &SqlitePool) -> Result<u64, PersistenceError> {
    let result = sqlx::query("UPDATE users SET online_status=0 WHERE online_status<>0")
        .execute(db_pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn create_user(
    db_pool: &SqlitePool,
    name: &str,
    email: &str,
    hashed_password: &str,
) -> Result<Uuid, PersistenceError> {
    let id = Uuid::now_v7();
    let (created_at, _) = now();
    sqlx::query("INSERT INTO users (id,name,email,hashed_password,online_status,created_at) VALUES (?,?,?,?,0,?)")
        .bind(id.to_string())
        .bind(name)
        .bind(email)
        .bind(hashed_password)
        .bind(created_at)
        .execute(db_pool)
        .await?;
    Ok(id)
}

pub async fn find_user(db_pool: &SqlitePool, user_id: Uuid) -> Result<Option<User>, PersistenceError> {
    sqlx::query_as::<_, UserRow>("SELECT id,name,email,online_status FROM users WHERE id=?")
        .bind(user_id.to_string())
        .fetch_optional(db_pool)
        .await?
        .map(User::try_from)
        .transpose()
}

/// The user with `email` along with their stored password hash.
pub async fn find_credentials(
    db_pool: &SqlitePool,
    email: &str,
) -> Result<Option<(User, String)>, PersistenceError> {
    let row: Option<(String, String, String, bool, String)> = sqlx::query_as(
        "SELECT id,name,email,online_status,hashed_password FROM users WHERE email=?",
    )
    .bind(email)
    .fetch_optional(db_pool)
    .await?;

    let Some((id, name, email, online_status, hashed_password)) = row else {
        return Ok(None);
    };
    let user = User::try_from((id, name, email, online_status))?;
    Ok(Some((user, hashed_password)))
}

pub async fn list_users(db_pool: &SqlitePool) -> Result<Vec<UserSummary>, PersistenceError> {
    sqlx::query_as::<_, SummaryRow>("SELECT id,name,online_status FROM users ORDER BY name")
        .fetch_all(db_pool)
        .await?
        .into_iter()
        .map(UserSummary::try_from)
        .collect()
}

/// [`MessageStore`] and [`PresenceFlags`] over the shared pool.
#[derive(Clone)]
pub struct SqliteStore {
    db_pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        content: &str,
    ) -> Result<StoredMessage, PersistenceError> {
        let id = Uuid::now_v7();
        let (millis, created_at) = now();
        sqlx::query("INSERT INTO messages (id,sender_id,recipient_id,content,created_at) VALUES (?,?,?,?,?)")
            .bind(id.to_string())
            .bind(sender_id.to_string())
            .bind(recipient_id.to_string())
            .bind(content)
            .bind(millis)
            .execute(&self.db_pool)
            .await?;

        Ok(StoredMessage {
            id,
            sender_id,
            recipient_id,
            content: content.to_owned(),
            created_at,
        })
    }

    async fn history(
        &self,
        user_a: Uuid,
        user_b: Uuid,
    ) -> Result<Vec<StoredMessage>, PersistenceError> {
        sqlx::query_as::<_, MessageRow>(
            "SELECT id,sender_id,recipient_id,content,created_at FROM messages \
             WHERE (sender_id=?1 AND recipient_id=?2) OR (sender_id=?2 AND recipient_id=?1) \
             ORDER BY created_at ASC, rowid ASC",
        )
        .bind(user_a.to_string())
        .bind(user_b.to_string())
        .fetch_all(&self.db_pool)
        .await?
        .into_iter()
        .map(StoredMessage::try_from)
        .collect()
    }
}

#[async_trait]
impl PresenceFlags for SqliteStore {
    async fn set_online(&self, user_id: Uuid, online: bool) -> Result<(), PersistenceError> {
        sqlx::query("UPDATE users SET online_status=? WHERE id=?")
            .bind(online)
            .bind(user_id.to_string())
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }
}

/// Current time at millisecond precision, both as stored and as returned,
/// so a freshly appended record compares equal to its history copy.
fn now() -> (i64, OffsetDateTime) {
    let millis = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
    let at = from_millis(millis).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    (millis, at)
}

fn from_millis(millis: i64) -> Result<OffsetDateTime, time::error::ComponentRange> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);
    // One connection that never recycles, or the in-memory database vanishes.
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();
    sqlx::migrate!().run(&db_pool).await.unwrap();
    db_pool
}
