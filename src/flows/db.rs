use super::types::{Scratch, Session, State};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// How a flow instance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcome {
    Confirmed,
    Failed,
}

impl FlowOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }
}

/// Input for [`SessionStore::record_history`].
#[derive(Debug, Clone)]
pub struct NewHistoryEntry {
    pub phone: String,
    pub flow: String,
    pub outcome: FlowOutcome,
    pub detail: Option<String>,
}

/// Row type for flow history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowHistoryRow {
    pub id: i64,
    pub phone: String,
    pub flow: String,
    pub outcome: String,
    pub detail: Option<String>,
    pub completed_at: String,
}

/// Durable per-phone session storage.
///
/// Callers serialize read-modify-write per phone by holding the mutex from
/// [`SessionStore::phone_lock`] for the whole load/mutate/save cycle.
pub trait SessionStore: Send + Sync {
    fn get_or_create(&self, phone: &str) -> anyhow::Result<Session>;

    fn save(&self, session: &Session) -> anyhow::Result<()>;

    fn record_history(&self, entry: &NewHistoryEntry) -> anyhow::Result<()>;

    fn phone_lock(&self, phone: &str) -> Arc<tokio::sync::Mutex<()>>;
}

/// Entries above this count trigger a sweep of idle locks.
const LOCK_SWEEP_THRESHOLD: usize = 1024;

/// One async mutex per phone number.
#[derive(Default)]
pub struct PhoneLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl PhoneLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, phone: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut guard = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if guard.len() > LOCK_SWEEP_THRESHOLD {
            // Only the map holds an idle lock.
            guard.retain(|_, lock| Arc::strong_count(lock) > 1);
        }
        guard
            .entry(phone.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ── SQLite ───────────────────────────────────────────────────────

/// SQLite-backed session store.
///
/// Thread safety: wraps `Connection` in `Mutex`; the server shares one
/// store across tasks via `Arc`.
pub struct SqliteSessionStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    locks: PhoneLocks,
}

impl SqliteSessionStore {
    /// Open (or create) the session database at the given path.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
            locks: PhoneLocks::new(),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Create an in-memory database (for tests and the chat REPL).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
            locks: PhoneLocks::new(),
        };
        db.init_schema()?;
        Ok(db)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA busy_timeout=5000;

             CREATE TABLE IF NOT EXISTS sessions (
                 phone        TEXT PRIMARY KEY NOT NULL,
                 state        TEXT NOT NULL,
                 scratch      TEXT NOT NULL DEFAULT '{\"flow\":\"empty\"}',
                 created_at   TEXT NOT NULL,
                 updated_at   TEXT NOT NULL
             );

             CREATE TABLE IF NOT EXISTS flow_history (
                 id           INTEGER PRIMARY KEY AUTOINCREMENT,
                 phone        TEXT NOT NULL,
                 flow         TEXT NOT NULL,
                 outcome      TEXT NOT NULL,
                 detail       TEXT,
                 completed_at TEXT NOT NULL DEFAULT (datetime('now'))
             );
             CREATE INDEX IF NOT EXISTS idx_flow_history_phone
                 ON flow_history(phone);
             CREATE INDEX IF NOT EXISTS idx_flow_history_completed
                 ON flow_history(completed_at DESC);",
        )?;
        Ok(())
    }

    fn get(&self, conn: &Connection, phone: &str) -> anyhow::Result<Option<Session>> {
        let row = conn
            .query_row(
                "SELECT phone, state, scratch, created_at, updated_at
                 FROM sessions WHERE phone = ?1",
                params![phone],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        let Some((phone, state_raw, scratch_raw, created_at, updated_at)) = row else {
            return Ok(None);
        };

        let state = state_raw.parse::<State>().unwrap_or_else(|e| {
            tracing::warn!("session {phone}: {e}; routing to {}", State::MainMenu);
            State::MainMenu
        });
        let scratch = serde_json::from_str::<Scratch>(&scratch_raw).unwrap_or_else(|e| {
            tracing::warn!("session {phone}: unreadable scratch ({e}); clearing");
            Scratch::Empty
        });

        Ok(Some(Session {
            phone,
            state,
            scratch,
            created_at,
            updated_at,
        }))
    }

    /// List flow history, newest first, optionally for one phone.
    /// Returns (rows, total_count).
    pub fn list_history(
        &self,
        limit: usize,
        offset: usize,
        phone: Option<&str>,
    ) -> anyhow::Result<(Vec<FlowHistoryRow>, usize)> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());

        let total: usize = guard.query_row(
            "SELECT COUNT(*) FROM flow_history WHERE ?1 IS NULL OR phone = ?1",
            params![phone],
            |row| row.get(0),
        )?;

        let mut stmt = guard.prepare(
            "SELECT id, phone, flow, outcome, detail, completed_at
             FROM flow_history
             WHERE ?1 IS NULL OR phone = ?1
             ORDER BY id DESC
             LIMIT ?2 OFFSET ?3",
        )?;
        let rows = stmt.query_map(params![phone, limit as i64, offset as i64], |row| {
            Ok(FlowHistoryRow {
                id: row.get(0)?,
                phone: row.get(1)?,
                flow: row.get(2)?,
                outcome: row.get(3)?,
                detail: row.get(4)?,
                completed_at: row.get(5)?,
            })
        })?;

        let mut result = Vec::new();
        for r in rows {
            result.push(r?);
        }
        Ok((result, total))
    }

    /// Number of stored sessions.
    pub fn session_count(&self) -> anyhow::Result<usize> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let n: usize = guard.query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))?;
        Ok(n)
    }
}

impl SessionStore for SqliteSessionStore {
    fn get_or_create(&self, phone: &str) -> anyhow::Result<Session> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = self.get(&guard, phone)? {
            return Ok(session);
        }

        let session = Session::new(phone);
        guard.execute(
            "INSERT INTO sessions (phone, state, scratch, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.phone,
                session.state.as_str(),
                serde_json::to_string(&session.scratch)?,
                session.created_at,
                session.updated_at,
            ],
        )?;
        tracing::info!("created session for {phone}");
        Ok(session)
    }

    fn save(&self, session: &Session) -> anyhow::Result<()> {
        let scratch = serde_json::to_string(&session.scratch)?;
        let now = chrono::Utc::now().to_rfc3339();
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.execute(
            "INSERT INTO sessions (phone, state, scratch, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(phone) DO UPDATE SET
                 state = excluded.state,
                 scratch = excluded.scratch,
                 updated_at = excluded.updated_at",
            params![
                session.phone,
                session.state.as_str(),
                scratch,
                session.created_at,
                now,
            ],
        )?;
        Ok(())
    }

    fn record_history(&self, entry: &NewHistoryEntry) -> anyhow::Result<()> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        guard.execute(
            "INSERT INTO flow_history (phone, flow, outcome, detail, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.phone,
                entry.flow,
                entry.outcome.as_str(),
                entry.detail,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn phone_lock(&self, phone: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.get(phone)
    }
}

// ── In-memory ────────────────────────────────────────────────────

/// In-memory session store for tests and local runs.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    history: Mutex<Vec<NewHistoryEntry>>,
    locks: PhoneLocks,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a stored session without creating one.
    pub fn get(&self, phone: &str) -> Option<Session> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(phone)
            .cloned()
    }

    /// Insert or replace a session as-is.
    pub fn put(&self, session: Session) {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session.phone.clone(), session);
    }

    pub fn history(&self) -> Vec<NewHistoryEntry> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl SessionStore for MemorySessionStore {
    fn get_or_create(&self, phone: &str) -> anyhow::Result<Session> {
        let mut guard = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        Ok(guard
            .entry(phone.to_string())
            .or_insert_with(|| Session::new(phone))
            .clone())
    }

    fn save(&self, session: &Session) -> anyhow::Result<()> {
        let mut stored = session.clone();
        stored.updated_at = chrono::Utc::now().to_rfc3339();
        self.put(stored);
        Ok(())
    }

    fn record_history(&self, entry: &NewHistoryEntry) -> anyhow::Result<()> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
        Ok(())
    }

    fn phone_lock(&self, phone: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.get(phone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::types::PlanChoice;
    use tempfile::TempDir;

    fn data_scratch() -> Scratch {
        Scratch::Data {
            network: Some("mtn".into()),
            plan: Some(PlanChoice {
                id: "plan_500".into(),
                title: "₦500 - 1GB".into(),
            }),
            beneficiary_phone: None,
        }
    }

    #[test]
    fn sqlite_creates_tables() {
        let db = SqliteSessionStore::open_in_memory().unwrap();
        let guard = db.conn.lock().unwrap();
        let _: i64 = guard
            .query_row("SELECT COUNT(*) FROM sessions", [], |r| r.get(0))
            .unwrap();
        let _: i64 = guard
            .query_row("SELECT COUNT(*) FROM flow_history", [], |r| r.get(0))
            .unwrap();
    }

    #[test]
    fn sqlite_get_or_create_is_lazy_and_stable() {
        let db = SqliteSessionStore::open_in_memory().unwrap();
        assert_eq!(db.session_count().unwrap(), 0);
        let first = db.get_or_create("2348012345678").unwrap();
        assert_eq!(first.state, State::MainMenu);
        assert!(first.scratch.is_empty());
        let second = db.get_or_create("2348012345678").unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(db.session_count().unwrap(), 1);
    }

    #[test]
    fn sqlite_save_roundtrip() {
        let db = SqliteSessionStore::open_in_memory().unwrap();
        let mut session = db.get_or_create("p1").unwrap();
        session.state = State::SelectingPlan;
        session.scratch = data_scratch();
        db.save(&session).unwrap();

        let got = db.get_or_create("p1").unwrap();
        assert_eq!(got.state, State::SelectingPlan);
        assert_eq!(got.scratch, data_scratch());
        assert_eq!(got.created_at, session.created_at);
    }

    #[test]
    fn sqlite_persists_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("sessions.db");
        {
            let db = SqliteSessionStore::open(&path).unwrap();
            let mut session = db.get_or_create("p1").unwrap();
            session.state = State::EnterPhone;
            db.save(&session).unwrap();
        }
        let db = SqliteSessionStore::open(&path).unwrap();
        assert_eq!(db.db_path(), path.as_path());
        assert_eq!(db.get_or_create("p1").unwrap().state, State::EnterPhone);
    }

    #[test]
    fn sqlite_corrupt_row_falls_back() {
        let db = SqliteSessionStore::open_in_memory().unwrap();
        {
            let guard = db.conn.lock().unwrap();
            guard
                .execute(
                    "INSERT INTO sessions (phone, state, scratch, created_at, updated_at)
                     VALUES ('p1', 'CHECKOUT', 'not json', 'x', 'x')",
                    [],
                )
                .unwrap();
        }
        let session = db.get_or_create("p1").unwrap();
        assert_eq!(session.state, State::MainMenu);
        assert!(session.scratch.is_empty());
    }

    #[test]
    fn sqlite_history_filters_and_orders() {
        let db = SqliteSessionStore::open_in_memory().unwrap();
        for (phone, outcome) in [
            ("p1", FlowOutcome::Confirmed),
            ("p2", FlowOutcome::Failed),
            ("p1", FlowOutcome::Failed),
        ] {
            db.record_history(&NewHistoryEntry {
                phone: phone.into(),
                flow: "data".into(),
                outcome,
                detail: None,
            })
            .unwrap();
        }

        let (rows, total) = db.list_history(10, 0, None).unwrap();
        assert_eq!(total, 3);
        assert_eq!(rows[0].outcome, "failed");
        assert_eq!(rows[0].phone, "p1");

        let (rows, total) = db.list_history(10, 0, Some("p1")).unwrap();
        assert_eq!(total, 2);
        assert!(rows.iter().all(|r| r.phone == "p1"));

        let (rows, total) = db.list_history(1, 1, Some("p1")).unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].outcome, "confirmed");
    }

    #[test]
    fn memory_store_roundtrip() {
        let store = MemorySessionStore::new();
        assert!(store.get("p1").is_none());
        let mut session = store.get_or_create("p1").unwrap();
        session.scratch = data_scratch();
        store.save(&session).unwrap();
        assert_eq!(store.get("p1").unwrap().scratch, data_scratch());
    }

    #[test]
    fn phone_locks_are_shared_per_phone() {
        let locks = PhoneLocks::new();
        let a = locks.get("p1");
        let b = locks.get("p1");
        let c = locks.get("p2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn phone_locks_sweep_idle_entries() {
        let locks = PhoneLocks::new();
        let held = locks.get("held");
        for i in 0..=LOCK_SWEEP_THRESHOLD {
            let _ = locks.get(&format!("idle{i}"));
        }
        let _ = locks.get("trigger");
        assert!(locks.len() < LOCK_SWEEP_THRESHOLD);
        assert!(Arc::ptr_eq(&held, &locks.get("held")));
    }

    #[tokio::test]
    async fn phone_lock_serializes() {
        let store = MemorySessionStore::new();
        let lock = store.phone_lock("p1");
        let guard = lock.clone().lock_owned().await;
        assert!(store.phone_lock("p1").try_lock().is_err());
        drop(guard);
        assert!(store.phone_lock("p1").try_lock().is_ok());
    }
}
