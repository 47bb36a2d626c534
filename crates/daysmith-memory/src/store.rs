//! SQLite-backed similarity store with three independent collections:
//! reusable plan snippets, recurring user routines, and past utterances.
//! Embeddings are stored as JSON arrays; ranking is brute-force cosine over
//! the collection, which is plenty at session scale.

use std::cmp::Ordering;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use daysmith_schema::TimeWindow;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tokio::task;

use crate::embedding::cosine_similarity;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnippetRecord {
    pub id: String,
    pub content: String,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutineRecord {
    pub id: String,
    pub pattern: String,
    #[serde(default)]
    pub time_window: Option<TimeWindow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtteranceRecord {
    pub id: String,
    pub transcript: String,
    pub intent: String,
    pub accepted: bool,
}

/// A record plus its similarity score to the query embedding.
#[derive(Debug, Clone)]
pub struct Scored<T> {
    pub record: T,
    pub score: f32,
}

#[async_trait]
pub trait SimilarityStore: Send + Sync {
    async fn insert_snippet(&self, record: SnippetRecord, embedding: &[f32]) -> Result<()>;
    async fn insert_routine(&self, record: RoutineRecord, embedding: &[f32]) -> Result<()>;
    async fn insert_utterance(&self, record: UtteranceRecord, embedding: &[f32]) -> Result<()>;

    /// Nearest snippets; with a tag filter, a snippet qualifies when it
    /// shares at least one tag with the filter.
    async fn nearest_snippets(
        &self,
        query: &[f32],
        k: usize,
        tag_filter: Option<&[String]>,
    ) -> Result<Vec<Scored<SnippetRecord>>>;
    async fn nearest_routines(&self, query: &[f32], k: usize)
        -> Result<Vec<Scored<RoutineRecord>>>;
    async fn nearest_utterances(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<Scored<UtteranceRecord>>>;
}

#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init_schema(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS snippets (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                tags TEXT NOT NULL,
                embedding TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS routines (
                id TEXT PRIMARY KEY,
                pattern TEXT NOT NULL,
                time_window TEXT,
                embedding TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS utterances (
                id TEXT PRIMARY KEY,
                transcript TEXT NOT NULL,
                intent TEXT NOT NULL,
                accepted INTEGER NOT NULL,
                embedding TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn lock(db: &Arc<Mutex<Connection>>) -> Result<std::sync::MutexGuard<'_, Connection>> {
        db.lock().map_err(|_| anyhow!("failed to lock sqlite connection"))
    }
}

fn rank_keep_k<T>(mut scored: Vec<Scored<T>>, k: usize) -> Vec<Scored<T>> {
    // Stable sort: ties keep insertion order.
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    scored.truncate(k);
    scored
}

#[async_trait]
impl SimilarityStore for SqliteStore {
    async fn insert_snippet(&self, record: SnippetRecord, embedding: &[f32]) -> Result<()> {
        let db = Arc::clone(&self.db);
        let embedding_json = serde_json::to_string(embedding)?;
        let tags_json = serde_json::to_string(&record.tags)?;
        task::spawn_blocking(move || {
            let conn = Self::lock(&db)?;
            conn.execute(
                "INSERT OR REPLACE INTO snippets(id, content, tags, embedding) VALUES (?1, ?2, ?3, ?4)",
                params![record.id, record.content, tags_json, embedding_json],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;
        Ok(())
    }

    async fn insert_routine(&self, record: RoutineRecord, embedding: &[f32]) -> Result<()> {
        let db = Arc::clone(&self.db);
        let embedding_json = serde_json::to_string(embedding)?;
        let window_json = record
            .time_window
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        task::spawn_blocking(move || {
            let conn = Self::lock(&db)?;
            conn.execute(
                "INSERT OR REPLACE INTO routines(id, pattern, time_window, embedding) VALUES (?1, ?2, ?3, ?4)",
                params![record.id, record.pattern, window_json, embedding_json],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;
        Ok(())
    }

    async fn insert_utterance(&self, record: UtteranceRecord, embedding: &[f32]) -> Result<()> {
        let db = Arc::clone(&self.db);
        let embedding_json = serde_json::to_string(embedding)?;
        task::spawn_blocking(move || {
            let conn = Self::lock(&db)?;
            conn.execute(
                "INSERT OR REPLACE INTO utterances(id, transcript, intent, accepted, embedding) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.id,
                    record.transcript,
                    record.intent,
                    record.accepted as i64,
                    embedding_json
                ],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;
        Ok(())
    }

    async fn nearest_snippets(
        &self,
        query: &[f32],
        k: usize,
        tag_filter: Option<&[String]>,
    ) -> Result<Vec<Scored<SnippetRecord>>> {
        let db = Arc::clone(&self.db);
        let query = query.to_vec();
        let filter: Option<Vec<String>> = tag_filter.map(|tags| tags.to_vec());
        let scored = task::spawn_blocking(move || {
            let conn = Self::lock(&db)?;
            let mut stmt =
                conn.prepare("SELECT id, content, tags, embedding FROM snippets ORDER BY rowid")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;

            let mut scored = Vec::new();
            for row in rows {
                let (id, content, tags_json, embedding_json) = row?;
                let tags: Vec<String> = serde_json::from_str(&tags_json)?;
                if let Some(filter) = &filter {
                    if !tags.iter().any(|tag| filter.contains(tag)) {
                        continue;
                    }
                }
                let embedding: Vec<f32> = serde_json::from_str(&embedding_json)?;
                scored.push(Scored {
                    score: cosine_similarity(&query, &embedding),
                    record: SnippetRecord { id, content, tags },
                });
            }
            Ok::<Vec<Scored<SnippetRecord>>, anyhow::Error>(scored)
        })
        .await??;
        Ok(rank_keep_k(scored, k))
    }

    async fn nearest_routines(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<Scored<RoutineRecord>>> {
        let db = Arc::clone(&self.db);
        let query = query.to_vec();
        let scored = task::spawn_blocking(move || {
            let conn = Self::lock(&db)?;
            let mut stmt =
                conn.prepare("SELECT id, pattern, time_window, embedding FROM routines ORDER BY rowid")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;

            let mut scored = Vec::new();
            for row in rows {
                let (id, pattern, window_json, embedding_json) = row?;
                let time_window: Option<TimeWindow> = window_json
                    .as_deref()
                    .map(serde_json::from_str)
                    .transpose()?;
                let embedding: Vec<f32> = serde_json::from_str(&embedding_json)?;
                scored.push(Scored {
                    score: cosine_similarity(&query, &embedding),
                    record: RoutineRecord {
                        id,
                        pattern,
                        time_window,
                    },
                });
            }
            Ok::<Vec<Scored<RoutineRecord>>, anyhow::Error>(scored)
        })
        .await??;
        Ok(rank_keep_k(scored, k))
    }

    async fn nearest_utterances(
        &self,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<Scored<UtteranceRecord>>> {
        let db = Arc::clone(&self.db);
        let query = query.to_vec();
        let scored = task::spawn_blocking(move || {
            let conn = Self::lock(&db)?;
            let mut stmt = conn.prepare(
                "SELECT id, transcript, intent, accepted, embedding FROM utterances ORDER BY rowid",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?;

            let mut scored = Vec::new();
            for row in rows {
                let (id, transcript, intent, accepted, embedding_json) = row?;
                let embedding: Vec<f32> = serde_json::from_str(&embedding_json)?;
                scored.push(Scored {
                    score: cosine_similarity(&query, &embedding),
                    record: UtteranceRecord {
                        id,
                        transcript,
                        intent,
                        accepted: accepted != 0,
                    },
                });
            }
            Ok::<Vec<Scored<UtteranceRecord>>, anyhow::Error>(scored)
        })
        .await??;
        Ok(rank_keep_k(scored, k))
    }
}
