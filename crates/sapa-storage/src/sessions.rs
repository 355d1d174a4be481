//! Durable conversation transcripts.
//!
//! Each session is a single row whose `turns` column holds the ordered
//! transcript as JSON. An append reads the row, extends the transcript and
//! writes the row back inside one transaction, so a crash mid-write leaves
//! the previously committed transcript intact.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use sapa_core::error::SapaError;
use sapa_core::types::{Session, SessionSummary, Turn};

use crate::db::Database;

/// Maximum number of characters kept in a session preview.
pub const PREVIEW_CHARS: usize = 80;

fn storage_err(context: &str) -> impl Fn(rusqlite::Error) -> SapaError + '_ {
    move |e| SapaError::Storage(format!("{}: {}", context, e))
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>, SapaError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| SapaError::Storage(format!("invalid stored timestamp {}", micros)))
}

fn preview_of(session: &Session) -> String {
    session
        .first_user_message()
        .map(|m| m.chars().take(PREVIEW_CHARS).collect())
        .unwrap_or_default()
}

/// Session persistence backed by [`Database`].
///
/// Every method blocks on SQLite; async callers run them through
/// `tokio::task::spawn_blocking`.
#[derive(Debug, Clone)]
pub struct SessionStore {
    db: Arc<Database>,
}

impl SessionStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append one turn, creating the session on first use.
    pub fn append(&self, session_id: &str, turn: Turn) -> Result<Session, SapaError> {
        self.append_turns(session_id, vec![turn])
    }

    /// Append several turns atomically: either all are committed or none.
    ///
    /// Turns are kept strictly time-ordered. A turn whose timestamp is not
    /// after the previous one is stamped one microsecond later than it.
    pub fn append_turns(&self, session_id: &str, turns: Vec<Turn>) -> Result<Session, SapaError> {
        if session_id.trim().is_empty() {
            return Err(SapaError::Validation("session id must not be empty".into()));
        }
        if turns.is_empty() {
            return self.load(session_id);
        }

        let added = turns.len();
        let session = self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(storage_err("Failed to begin transaction"))?;

            let mut session =
                read_session(&tx, session_id)?.unwrap_or_else(|| Session::empty(session_id));
            let is_new = session.is_empty();

            for mut turn in turns {
                if let Some(last) = session.last_turn() {
                    if turn.timestamp <= last.timestamp {
                        turn.timestamp = last.timestamp + Duration::microseconds(1);
                    }
                }
                session.turns.push(turn);
            }

            if is_new {
                if let Some(first) = session.turns.first() {
                    session.created_at = session.created_at.min(first.timestamp);
                }
            }
            if let Some(last) = session.last_turn() {
                session.updated_at = last.timestamp;
            }

            write_session(&tx, &session)?;
            tx.commit().map_err(storage_err("Failed to commit session"))?;
            Ok(session)
        })?;

        debug!(
            session_id,
            added,
            total = session.turns.len(),
            "Session appended"
        );
        Ok(session)
    }

    /// Load a session. An unknown id yields an empty session, not an error.
    pub fn load(&self, session_id: &str) -> Result<Session, SapaError> {
        self.db.with_conn(|conn| {
            Ok(read_session(conn, session_id)?.unwrap_or_else(|| Session::empty(session_id)))
        })
    }

    /// Most recently updated sessions first; ties ordered by id.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<SessionSummary>, SapaError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT session_id, preview, turn_count, created_at, updated_at
                     FROM sessions
                     ORDER BY updated_at DESC, session_id ASC
                     LIMIT ?1",
                )
                .map_err(storage_err("Failed to prepare session listing"))?;

            let rows = stmt
                .query_map(rusqlite::params![limit as i64], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })
                .map_err(storage_err("Failed to list sessions"))?;

            let mut summaries = Vec::new();
            for row in rows {
                let (session_id, preview, turn_count, created, updated) =
                    row.map_err(storage_err("Failed to read session row"))?;
                summaries.push(SessionSummary {
                    session_id,
                    preview,
                    turn_count: turn_count.max(0) as usize,
                    created_at: from_micros(created)?,
                    updated_at: from_micros(updated)?,
                });
            }
            Ok(summaries)
        })
    }

    /// Remove a session. Returns whether it existed.
    ///
    /// Never called by the conversation engine; retention is the caller's
    /// policy.
    pub fn delete(&self, session_id: &str) -> Result<bool, SapaError> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM sessions WHERE session_id = ?1",
                    rusqlite::params![session_id],
                )
                .map_err(storage_err("Failed to delete session"))?;
            Ok(removed > 0)
        })
    }

    /// Number of stored sessions.
    pub fn count(&self) -> Result<usize, SapaError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn
                .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
                .map_err(storage_err("Failed to count sessions"))?;
            Ok(n.max(0) as usize)
        })
    }
}

fn read_session(conn: &Connection, session_id: &str) -> Result<Option<Session>, SapaError> {
    let row = conn
        .query_row(
            "SELECT created_at, updated_at, turns FROM sessions WHERE session_id = ?1",
            rusqlite::params![session_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()
        .map_err(storage_err("Failed to read session"))?;

    match row {
        Some((created, updated, turns_json)) => {
            let turns: Vec<Turn> = serde_json::from_str(&turns_json)?;
            Ok(Some(Session {
                session_id: session_id.to_string(),
                turns,
                created_at: from_micros(created)?,
                updated_at: from_micros(updated)?,
            }))
        }
        None => Ok(None),
    }
}

fn write_session(conn: &Connection, session: &Session) -> Result<(), SapaError> {
    let turns_json = serde_json::to_string(&session.turns)?;
    conn.execute(
        "INSERT INTO sessions (session_id, created_at, updated_at, preview, turn_count, turns)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(session_id) DO UPDATE SET
             updated_at = excluded.updated_at,
             preview    = excluded.preview,
             turn_count = excluded.turn_count,
             turns      = excluded.turns",
        rusqlite::params![
            session.session_id,
            to_micros(session.created_at),
            to_micros(session.updated_at),
            preview_of(session),
            session.turns.len() as i64,
            turns_json,
        ],
    )
    .map_err(storage_err("Failed to write session"))?;
    Ok(())
}
