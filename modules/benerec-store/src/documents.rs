//! Read-only access to the platform document store (users, posts, votes).
//!
//! Row-level decode failures are skipped with a warning and a default where
//! one exists; a bad row never aborts a whole fetch. Only a missing id makes
//! a row unusable.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{info, warn};

use benerec_common::{EngineError, ItemId, PostDoc, UserDoc, UserId, VoteBlock, VoteDoc};

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get_users(&self) -> Result<Vec<UserDoc>>;
    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserDoc>>;
    async fn get_posts(&self) -> Result<Vec<PostDoc>>;
    async fn get_votes(&self) -> Result<Vec<VoteDoc>>;
}

pub struct PgDocumentStore {
    pool: PgPool,
}

impl PgDocumentStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| EngineError::Connectivity(format!("postgres: {e}")))?;
        info!("Connected to Postgres document store");
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const USER_COLUMNS: &str =
    "id, username, bio, interests, num_posts, num_comments, communities_followed";

#[async_trait]
impl DocumentStore for PgDocumentStore {
    async fn get_users(&self) -> Result<Vec<UserDoc>> {
        let rows = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users"))
            .fetch_all(&self.pool)
            .await?;

        let mut users = Vec::with_capacity(rows.len());
        for row in &rows {
            match user_from_row(row) {
                Ok(user) => users.push(user),
                Err(e) => warn!(error = %e, "Skipping malformed user row"),
            }
        }
        Ok(users)
    }

    async fn get_user(&self, user_id: &UserId) -> Result<Option<UserDoc>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => match user_from_row(&row) {
                Ok(user) => Ok(Some(user)),
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Malformed user row");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn get_posts(&self) -> Result<Vec<PostDoc>> {
        let rows = sqlx::query("SELECT id, community_id, score, status FROM posts")
            .fetch_all(&self.pool)
            .await?;

        let mut posts = Vec::with_capacity(rows.len());
        for row in &rows {
            match post_from_row(row) {
                Ok(post) => posts.push(post),
                Err(e) => warn!(error = %e, "Skipping malformed post row"),
            }
        }
        Ok(posts)
    }

    async fn get_votes(&self) -> Result<Vec<VoteDoc>> {
        let rows = sqlx::query("SELECT user_id, votes FROM votes")
            .fetch_all(&self.pool)
            .await?;

        let mut votes = Vec::with_capacity(rows.len());
        for row in &rows {
            match vote_from_row(row) {
                Ok(vote) => votes.push(vote),
                Err(e) => warn!(error = %e, "Skipping malformed vote row"),
            }
        }
        Ok(votes)
    }
}

fn user_from_row(row: &sqlx::postgres::PgRow) -> Result<UserDoc, EngineError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| EngineError::Data(format!("user row missing id: {e}")))?;

    let communities: Vec<String> = row
        .try_get::<serde_json::Value, _>("communities_followed")
        .ok()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_default();

    Ok(UserDoc {
        user_id: UserId(id),
        username: row.try_get("username").unwrap_or_default(),
        bio: row.try_get("bio").unwrap_or_default(),
        interests: row.try_get("interests").unwrap_or_default(),
        num_posts: row.try_get::<i32, _>("num_posts").unwrap_or(0).max(0) as u32,
        num_comments: row.try_get::<i32, _>("num_comments").unwrap_or(0).max(0) as u32,
        communities_followed: communities,
    })
}

fn post_from_row(row: &sqlx::postgres::PgRow) -> Result<PostDoc, EngineError> {
    let id: String = row
        .try_get("id")
        .map_err(|e| EngineError::Data(format!("post row missing id: {e}")))?;

    Ok(PostDoc {
        post_id: ItemId(id),
        community_id: row.try_get("community_id").unwrap_or_default(),
        score: row.try_get("score").unwrap_or(0.0),
        status: row
            .try_get("status")
            .unwrap_or_else(|_| "active".to_string()),
    })
}

/// A vote row carries the user's nested vote document as JSONB:
/// `{"post": {"target_ids": [...], "value": 1}, "comment": {...}}`.
/// An unreadable post block degrades to no post votes for that user.
fn vote_from_row(row: &sqlx::postgres::PgRow) -> Result<VoteDoc, EngineError> {
    let user_id: String = row
        .try_get("user_id")
        .map_err(|e| EngineError::Data(format!("vote row missing user_id: {e}")))?;

    let post = row
        .try_get::<serde_json::Value, _>("votes")
        .ok()
        .and_then(|v| v.get("post").cloned())
        .and_then(|block| serde_json::from_value::<VoteBlock>(block).ok());

    Ok(VoteDoc {
        user_id: UserId(user_id),
        post,
    })
}
