//! Connection pragmas and schema migrations, tracked with `PRAGMA user_version`.

use rusqlite::Connection;

pub(crate) fn apply_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA busy_timeout = 5000;
        PRAGMA foreign_keys = ON;
        ",
    )
}

const V1: &str = "
    CREATE TABLE IF NOT EXISTS enrollments (
        seq             INTEGER PRIMARY KEY AUTOINCREMENT,
        environment     TEXT NOT NULL,
        subject_id      TEXT NOT NULL,
        display_name    TEXT NOT NULL,
        embedding       BLOB NOT NULL,
        model_version   TEXT,
        reference_image TEXT,
        status          TEXT NOT NULL CHECK (status IN ('active', 'inactive')),
        created_at      TEXT NOT NULL,
        updated_at      TEXT NOT NULL,
        UNIQUE (environment, subject_id)
    );

    CREATE INDEX IF NOT EXISTS idx_enrollments_env_status ON enrollments(environment, status);

    CREATE TABLE IF NOT EXISTS access_log (
        seq             INTEGER PRIMARY KEY AUTOINCREMENT,
        id              TEXT NOT NULL UNIQUE,
        timestamp       TEXT NOT NULL,
        environment     TEXT NOT NULL,
        subject_id      TEXT NOT NULL,
        display_name    TEXT NOT NULL,
        access_granted  INTEGER NOT NULL,
        face_confidence REAL NOT NULL,
        uniform_score   REAL NOT NULL,
        device_id       TEXT NOT NULL,
        denial_reason   TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_access_log_env ON access_log(environment, seq);

    CREATE TRIGGER IF NOT EXISTS access_log_append_only
    BEFORE UPDATE ON access_log
    BEGIN
        SELECT RAISE(ABORT, 'access_log is append-only');
    END;
";

const MIGRATIONS: &[&str] = &[V1];

pub(crate) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let current: usize = conn.pragma_query_value(None, "user_version", |row| row.get::<_, i64>(0))? as usize;
    for (i, sql) in MIGRATIONS.iter().enumerate().skip(current) {
        let version = i + 1;
        conn.execute_batch(&format!("BEGIN; {sql} PRAGMA user_version = {version}; COMMIT;"))?;
        tracing::info!(version, "applied store migration");
    }
    Ok(())
}

pub(crate) fn schema_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
}
