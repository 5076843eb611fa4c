//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` and are safe to
//! re-run on every startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS workspace (
    id              TEXT PRIMARY KEY NOT NULL,
    name            TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    color           TEXT NOT NULL DEFAULT 'cyan',
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS session (
    id              TEXT PRIMARY KEY NOT NULL,
    workspace_id    TEXT NOT NULL REFERENCES workspace(id) ON DELETE CASCADE,
    name            TEXT NOT NULL,
    working_dir     TEXT NOT NULL DEFAULT '',
    topic           TEXT NOT NULL DEFAULT '',
    command         TEXT NOT NULL,
    status          TEXT NOT NULL CHECK(status IN ('idle','running','stopped','error')),
    pid             INTEGER,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS session_log (
    seq             INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id      TEXT NOT NULL REFERENCES session(id) ON DELETE CASCADE,
    time            TEXT NOT NULL,
    message         TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS setting (
    key             TEXT PRIMARY KEY NOT NULL,
    value           TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_workspace ON session(workspace_id);
CREATE INDEX IF NOT EXISTS idx_session_status ON session(status);
CREATE INDEX IF NOT EXISTS idx_log_session ON session_log(session_id, seq);
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}
