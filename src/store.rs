//! Process-local embedded store.
//!
//! One SQLite database per agent process, dropped and recreated on every
//! start: nothing in it survives a restart, which doubles as the cache
//! invalidation strategy for the revocation entries.

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::AgentResult;

#[derive(Clone)]
pub struct AgentStore {
    pool: SqlitePool,
}

impl AgentStore {
    pub async fn open(database_url: &str) -> AgentResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(sqlx::Error::from)?
            .create_if_missing(true);
        // One connection: keeps `sqlite::memory:` a single database and is
        // plenty for the cache and event log traffic.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.reset().await?;
        Ok(store)
    }

    /// Wipe and recreate all tables. Called once at startup.
    async fn reset(&self) -> AgentResult<()> {
        sqlx::query("DROP TABLE IF EXISTS revocation_cache")
            .execute(&self.pool)
            .await?;
        sqlx::query("DROP TABLE IF EXISTS session_events")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE revocation_cache (
                serial TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                valid INTEGER NOT NULL,
                expires_at TEXT NOT NULL,
                PRIMARY KEY (serial, fingerprint)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE session_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_data TEXT,
                timestamp TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn log_session_event(
        &self,
        session_id: &uuid::Uuid,
        event_type: &str,
        event_data: Option<&str>,
    ) -> AgentResult<()> {
        sqlx::query(
            r#"
            INSERT INTO session_events (session_id, event_type, event_data, timestamp)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(session_id.to_string())
        .bind(event_type)
        .bind(event_data)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_recreates_tables() {
        let store = AgentStore::open("sqlite::memory:").await.unwrap();

        let session_id = uuid::Uuid::new_v4();
        store
            .log_session_event(&session_id, "session_started", Some("backend: X11VNC"))
            .await
            .unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM session_events")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
