//! Session tokens kept in SQLite with an expiry timestamp.

use super::{SessionStore, StoreResult};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};
use uuid::Uuid;

/// Build the lookup key for a session token.
pub fn session_key(token: &str) -> String {
    format!("auth_{}", token)
}

#[derive(Clone)]
pub struct SqliteSessionStore {
    db: Arc<SqlitePool>,
}

impl SqliteSessionStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Create a session for `user_id` valid for `ttl` and return its token.
    pub async fn issue(&self, user_id: &str, ttl: Duration) -> StoreResult<String> {
        let token = Uuid::new_v4().to_string();
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp().saturating_add(ttl);

        sqlx::query(
            "INSERT INTO sessions (key, user_id, expires_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET user_id = excluded.user_id,
                                            expires_at = excluded.expires_at",
        )
        .bind(session_key(&token))
        .bind(user_id)
        .bind(expires_at)
        .execute(&*self.db)
        .await?;

        Ok(token)
    }

    /// Drop expired sessions. Returns how many were removed.
    pub async fn purge_expired(&self) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
            .bind(Utc::now().timestamp())
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let user_id = sqlx::query_scalar::<_, String>(
            "SELECT user_id FROM sessions WHERE key = ? AND expires_at > ?",
        )
        .bind(key)
        .bind(Utc::now().timestamp())
        .fetch_optional(&*self.db)
        .await?;
        Ok(user_id)
    }
}
