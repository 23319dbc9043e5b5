use anyhow::{bail, Context};
use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE: &str = "attendance.sqlite3";
pub const SCHEMA_VERSION: i64 = 1;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!(
            "failed to create workspace directory {}",
            workspace.to_string_lossy()
        )
    })?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open {}", db_path.to_string_lossy()))?;
    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    migrate(&conn)?;
    Ok(conn)
}

pub fn schema_version(conn: &Connection) -> anyhow::Result<i64> {
    Ok(conn.pragma_query_value(None, "user_version", |r| r.get(0))?)
}

fn migrate(conn: &Connection) -> anyhow::Result<()> {
    let version = schema_version(conn)?;
    if version > SCHEMA_VERSION {
        bail!(
            "attendance store schema v{} is newer than supported v{}",
            version,
            SCHEMA_VERSION
        );
    }
    if version == SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            data TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            sync_status TEXT NOT NULL,
            error TEXT
        )",
        [],
    )?;
    tx.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_sync_status ON attendance(sync_status)",
        [],
    )?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;
    Ok(())
}
