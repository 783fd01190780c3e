use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};
use sqlx::{Row, SqlitePool};
use techai_core::SupportSession;
use tokio::sync::Mutex as AsyncMutex;

pub trait SessionRepository: Send + Sync {
    async fn load_session(&self, session_id: &str) -> Result<Option<SupportSession>>;
    async fn upsert_session(&self, session: &SupportSession) -> Result<()>;
}

/// Default backing: quota state lives for the lifetime of the process and is
/// gone on restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    sessions: Arc<RwLock<HashMap<String, SupportSession>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionRepository for MemoryStore {
    async fn load_session(&self, session_id: &str) -> Result<Option<SupportSession>> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn upsert_session(&self, session: &SupportSession) -> Result<()> {
        self.sessions
            .write()
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }
}

/// Optional swappable backing store. Durability stays a non-requirement; the
/// schema mirrors the in-memory session one-to-one.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url)
            .await
            .with_context(|| format!("failed connecting to sqlite at {}", database_url))?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS support_sessions (
              session_id TEXT PRIMARY KEY,
              topic_id TEXT NOT NULL,
              topic_title TEXT NOT NULL,
              answer_count INTEGER NOT NULL,
              free_limit INTEGER NOT NULL,
              warnings INTEGER NOT NULL,
              blocked_new_topics INTEGER NOT NULL,
              solved INTEGER NOT NULL,
              closed INTEGER NOT NULL,
              off_topic_strikes INTEGER NOT NULL,
              close_confirmations INTEGER NOT NULL,
              limit_notice_sent INTEGER NOT NULL,
              voice_notice_sent INTEGER NOT NULL,
              difficulty_signals INTEGER NOT NULL,
              difficulty_logged INTEGER NOT NULL,
              turns_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

impl SessionRepository for SqliteStore {
    async fn load_session(&self, session_id: &str) -> Result<Option<SupportSession>> {
        let row = sqlx::query(
            r#"
            SELECT session_id, topic_id, topic_title, answer_count, free_limit, warnings,
                   blocked_new_topics, solved, closed, off_topic_strikes, close_confirmations,
                   limit_notice_sent, voice_notice_sent, difficulty_signals, difficulty_logged,
                   turns_json
            FROM support_sessions
            WHERE session_id = ?1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let turns_json: String = row.get("turns_json");
        let turns = serde_json::from_str(&turns_json).unwrap_or_default();

        let session = SupportSession {
            session_id: row.get("session_id"),
            topic_id: row.get("topic_id"),
            topic_title: row.get("topic_title"),
            answer_count: row.get::<i64, _>("answer_count") as u32,
            free_limit: row.get::<i64, _>("free_limit") as u32,
            warnings: row.get::<i64, _>("warnings") as u32,
            blocked_new_topics: row.get::<i64, _>("blocked_new_topics") != 0,
            solved: row.get::<i64, _>("solved") != 0,
            closed: row.get::<i64, _>("closed") != 0,
            off_topic_strikes: row.get::<i64, _>("off_topic_strikes") as u8,
            close_confirmations: row.get::<i64, _>("close_confirmations") as u8,
            limit_notice_sent: row.get::<i64, _>("limit_notice_sent") != 0,
            voice_notice_sent: row.get::<i64, _>("voice_notice_sent") != 0,
            difficulty_signals: row.get::<i64, _>("difficulty_signals") as u32,
            difficulty_logged: row.get::<i64, _>("difficulty_logged") != 0,
            turns,
        };

        Ok(Some(session))
    }

    async fn upsert_session(&self, session: &SupportSession) -> Result<()> {
        let turns_json = serde_json::to_string(&session.turns)?;

        sqlx::query(
            r#"
            INSERT INTO support_sessions (
              session_id, topic_id, topic_title, answer_count, free_limit, warnings,
              blocked_new_topics, solved, closed, off_topic_strikes, close_confirmations,
              limit_notice_sent, voice_notice_sent, difficulty_signals, difficulty_logged,
              turns_json
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
            ON CONFLICT(session_id) DO UPDATE SET
              topic_id=excluded.topic_id,
              topic_title=excluded.topic_title,
              answer_count=excluded.answer_count,
              free_limit=excluded.free_limit,
              warnings=excluded.warnings,
              blocked_new_topics=excluded.blocked_new_topics,
              solved=excluded.solved,
              closed=excluded.closed,
              off_topic_strikes=excluded.off_topic_strikes,
              close_confirmations=excluded.close_confirmations,
              limit_notice_sent=excluded.limit_notice_sent,
              voice_notice_sent=excluded.voice_notice_sent,
              difficulty_signals=excluded.difficulty_signals,
              difficulty_logged=excluded.difficulty_logged,
              turns_json=excluded.turns_json
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.topic_id)
        .bind(&session.topic_title)
        .bind(session.answer_count as i64)
        .bind(session.free_limit as i64)
        .bind(session.warnings as i64)
        .bind(session.blocked_new_topics as i64)
        .bind(session.solved as i64)
        .bind(session.closed as i64)
        .bind(session.off_topic_strikes as i64)
        .bind(session.close_confirmations as i64)
        .bind(session.limit_notice_sent as i64)
        .bind(session.voice_notice_sent as i64)
        .bind(session.difficulty_signals as i64)
        .bind(session.difficulty_logged as i64)
        .bind(turns_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(Clone)]
pub enum Store {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
}

impl Store {
    pub fn memory() -> Self {
        Self::Memory(MemoryStore::new())
    }

    pub async fn sqlite(database_url: &str) -> Result<Self> {
        let sqlite = SqliteStore::connect(database_url).await?;
        Ok(Self::Sqlite(sqlite))
    }
}

impl SessionRepository for Store {
    async fn load_session(&self, session_id: &str) -> Result<Option<SupportSession>> {
        match self {
            Store::Memory(store) => store.load_session(session_id).await,
            Store::Sqlite(store) => store.load_session(session_id).await,
        }
    }

    async fn upsert_session(&self, session: &SupportSession) -> Result<()> {
        match self {
            Store::Memory(store) => store.upsert_session(session).await,
            Store::Sqlite(store) => store.upsert_session(session).await,
        }
    }
}

/// Per-session mutual exclusion. Counters of one session must never race, so
/// the agent holds the session's lock for the whole turn, including the
/// gateway await; different sessions proceed in parallel.
#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, session_id: &str) -> Arc<AsyncMutex<()>> {
        self.inner
            .lock()
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
