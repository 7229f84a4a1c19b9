use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use time::OffsetDateTime;

use crate::{auth::Role, AppResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: String,
    // unique: homeowner_id
    pub homeowner_id: String,
    pub company_id: String,
    // unique: room_id
    pub room_id: String,
    pub active: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    /// Role at send time, not a live lookup.
    pub sender_role: Role,
    pub content: String,
    pub read: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Opens the pool and brings the schema up to date.
///
/// In-memory databases live only as long as their connection, so they are
/// pinned to a single connection that is never recycled.
pub async fn connect(database_url: &str) -> AppResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");
    let pool = if in_memory {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await?
    };

    sqlx::migrate!("./migrations").run(&pool).await?;
    Ok(pool)
}

/// Records an identity in the directory. Normally the REST side owns these
/// rows; this exists for seeding and tests.
pub async fn upsert_user(db_pool: &SqlitePool, id: &str, email: &str, role: Role) -> AppResult<()> {
    sqlx::query(
        "INSERT INTO users (id,email,role) VALUES (?,?,?)
         ON CONFLICT(id) DO UPDATE SET email=excluded.email, role=excluded.role",
    )
    .bind(id)
    .bind(email)
    .bind(role)
    .execute(db_pool)
    .await?;
    Ok(())
}

/// All company ids, in directory insertion order.
pub async fn company_ids(db_pool: &SqlitePool) -> AppResult<Vec<String>> {
    let ids: Vec<(String,)> = sqlx::query_as("SELECT id FROM users WHERE role=? ORDER BY rowid")
        .bind(Role::Company)
        .fetch_all(db_pool)
        .await?;
    Ok(ids.into_iter().map(|(id,)| id).collect())
}
