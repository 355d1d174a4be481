//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use sapa_core::error::SapaError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), SapaError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| SapaError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| SapaError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: sessions");
    }

    Ok(())
}

/// Version 1: one row per session; the ordered transcript lives in `turns`
/// as a JSON array and is replaced as a whole on every append.
fn apply_v1(conn: &Connection) -> Result<(), SapaError> {
    conn.execute_batch(
        "
        BEGIN;

        CREATE TABLE IF NOT EXISTS sessions (
            session_id  TEXT PRIMARY KEY NOT NULL,
            created_at  INTEGER NOT NULL,
            updated_at  INTEGER NOT NULL,
            preview     TEXT NOT NULL DEFAULT '',
            turn_count  INTEGER NOT NULL DEFAULT 0,
            turns       TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_sessions_updated_at
            ON sessions (updated_at DESC, session_id ASC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'sessions');

        COMMIT;
        ",
    )
    .map_err(|e| SapaError::Storage(format!("Migration v1 failed: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_once() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn test_sessions_table_defaults() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        conn.execute(
            "INSERT INTO sessions (session_id, created_at, updated_at) VALUES ('s1', 1, 1)",
            [],
        )
        .unwrap();

        let (turns, count): (String, i64) = conn
            .query_row(
                "SELECT turns, turn_count FROM sessions WHERE session_id = 's1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(turns, "[]");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_session_id_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        let insert =
            "INSERT INTO sessions (session_id, created_at, updated_at) VALUES ('dup', 1, 1)";
        conn.execute(insert, []).unwrap();
        assert!(conn.execute(insert, []).is_err());
    }
}
