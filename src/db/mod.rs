pub mod blob;
#[cfg(test)]
pub mod testing;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use sqlx::{
    Row, Sqlite, SqliteConnection,
    migrate::MigrateDatabase,
    sqlite::{SqlitePool, SqlitePoolOptions},
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::StorageError;
use crate::models::{Catalog, SurveyState, Tally, Vote};

/// Durable home of the survey's votes and counters.
#[async_trait]
pub trait TallyStore: Send + Sync {
    /// Last persisted state, or a fresh one with every catalog option zeroed.
    async fn load(&self, catalog: &Arc<Catalog>) -> Result<SurveyState, StorageError>;

    /// Replace everything on disk with `state`, atomically.
    async fn save(&self, state: &SurveyState) -> Result<(), StorageError>;

    /// Persist one newly accepted vote. `state` already includes it.
    async fn append(&self, state: &SurveyState, vote: &Vote) -> Result<(), StorageError> {
        let _ = vote;
        self.save(state).await
    }

    /// Drop all persisted vote data; the next `load` starts a new epoch.
    async fn clear(&self) -> Result<(), StorageError>;
}

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn connect(db_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        // Create database if it doesn't exist
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database at {}", db_url);
            Sqlite::create_database(db_url).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;

        Self::init_schema(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(pool: &SqlitePool) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS survey_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                epoch_started_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS votes (
                session_id TEXT PRIMARY KEY,
                selections TEXT NOT NULL,
                accepted_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tallies (
                option_name TEXT PRIMARY KEY,
                count INTEGER NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                key TEXT PRIMARY KEY,
                content_type TEXT NOT NULL,
                bytes BLOB NOT NULL,
                stored_at TEXT NOT NULL
            );
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl TallyStore for Database {
    async fn load(&self, catalog: &Arc<Catalog>) -> Result<SurveyState, StorageError> {
        let meta = sqlx::query("SELECT epoch_started_at FROM survey_meta WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;

        let Some(meta) = meta else {
            return Ok(SurveyState::fresh(Arc::clone(catalog)));
        };
        let epoch_started_at = parse_timestamp(&meta.get::<String, _>("epoch_started_at"))?;

        let rows = sqlx::query("SELECT session_id, selections, accepted_at FROM votes")
            .fetch_all(&self.pool)
            .await?;

        let mut votes = HashMap::with_capacity(rows.len());
        for row in rows {
            let stored: Vec<String> = serde_json::from_str(&row.get::<String, _>("selections"))?;
            let vote = Vote {
                session_id: row.get::<String, _>("session_id"),
                // Options dropped from the catalog since the vote was cast stop counting.
                // An empty result is kept: the session has still voted this epoch.
                selections: catalog.filter_selections(&stored),
                accepted_at: parse_timestamp(&row.get::<String, _>("accepted_at"))?,
            };
            votes.insert(vote.session_id.clone(), vote);
        }

        let tally = Tally::from_votes(Arc::clone(catalog), votes.values());

        let counters = sqlx::query("SELECT option_name, count FROM tallies")
            .fetch_all(&self.pool)
            .await?;
        for row in counters {
            let option = row.get::<String, _>("option_name");
            let stored = row.get::<i64, _>("count");
            if let Some(actual) = tally.get(&option) {
                if actual as i64 != stored {
                    warn!(
                        "Stored counter for {:?} is {} but votes add up to {}; using votes",
                        option, stored, actual
                    );
                }
            }
        }

        info!(
            "Loaded {} vote(s) from epoch started {}",
            votes.len(),
            epoch_started_at.to_rfc3339()
        );

        Ok(SurveyState {
            votes,
            tally,
            epoch_started_at,
        })
    }

    async fn save(&self, state: &SurveyState) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM votes").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM tallies").execute(&mut *tx).await?;

        for vote in state.votes.values() {
            insert_vote(&mut tx, vote).await?;
        }
        for (option, count) in state.tally.iter() {
            upsert_counter(&mut tx, option, count).await?;
        }
        write_epoch(&mut tx, state.epoch_started_at, true).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn append(&self, state: &SurveyState, vote: &Vote) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;

        insert_vote(&mut tx, vote).await?;
        for option in &vote.selections {
            let count = state.tally.get(option).unwrap_or(0);
            upsert_counter(&mut tx, option, count).await?;
        }
        // First vote of a never-saved epoch also records when it began.
        write_epoch(&mut tx, state.epoch_started_at, false).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM votes").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM tallies").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM survey_meta").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}

async fn insert_vote(conn: &mut SqliteConnection, vote: &Vote) -> Result<(), StorageError> {
    sqlx::query(
        r#"
        INSERT INTO votes (session_id, selections, accepted_at)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(&vote.session_id)
    .bind(serde_json::to_string(&vote.selections)?)
    .bind(vote.accepted_at.to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn upsert_counter(
    conn: &mut SqliteConnection,
    option: &str,
    count: u64,
) -> Result<(), StorageError> {
    let count = i64::try_from(count)
        .map_err(|_| StorageError::Corrupt(format!("counter for {option:?} out of range")))?;
    sqlx::query(
        r#"
        INSERT INTO tallies (option_name, count)
        VALUES (?, ?)
        ON CONFLICT(option_name)
        DO UPDATE SET count = excluded.count
        "#,
    )
    .bind(option)
    .bind(count)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn write_epoch(
    conn: &mut SqliteConnection,
    started_at: DateTime<Utc>,
    overwrite: bool,
) -> Result<(), StorageError> {
    let sql = if overwrite {
        r#"
        INSERT INTO survey_meta (id, epoch_started_at) VALUES (1, ?)
        ON CONFLICT(id) DO UPDATE SET epoch_started_at = excluded.epoch_started_at
        "#
    } else {
        "INSERT OR IGNORE INTO survey_meta (id, epoch_started_at) VALUES (1, ?)"
    };
    sqlx::query(sql)
        .bind(started_at.to_rfc3339())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::Corrupt(format!("bad timestamp {raw:?}: {e}")))
}
