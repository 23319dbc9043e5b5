use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::OnceCell;
use rusqlite::{Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::db;
use crate::error::StoreError;
use crate::model::{AttendanceRecord, PendingRecord, RecordCounts, RecordStatus};

/// Durable queue of attendance captures, backed by the workspace SQLite file.
///
/// The connection is opened on first use. Concurrent first callers block on a
/// single initialization; a failed initialization is retried by the next call.
pub struct RecordStore {
    workspace: PathBuf,
    conn: OnceCell<Mutex<Connection>>,
}

struct RawRow {
    id: i64,
    data: String,
    timestamp: String,
    sync_status: String,
    error: Option<String>,
}

const SELECT_COLUMNS: &str = "SELECT id, data, timestamp, sync_status, error FROM attendance";

impl RecordStore {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            conn: OnceCell::new(),
        }
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        let cell = self
            .conn
            .get_or_try_init(|| {
                tracing::debug!(workspace = %self.workspace.display(), "initializing attendance store");
                db::open_db(&self.workspace).map(Mutex::new)
            })
            .map_err(|e| {
                tracing::error!(error = %format!("{e:#}"), "attendance store initialization failed");
                StoreError::Unavailable(format!("{e:#}"))
            })?;
        cell.lock()
            .map_err(|_| StoreError::Unavailable("attendance store lock poisoned".to_string()))
    }

    /// Forces initialization without touching any record.
    pub fn init(&self) -> Result<(), StoreError> {
        self.conn().map(|_| ())
    }

    pub fn store(&self, record: &AttendanceRecord) -> Result<i64, StoreError> {
        let data = serde_json::to_string(record)
            .map_err(|e| StoreError::Unavailable(format!("failed to encode record: {e}")))?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO attendance(data, timestamp, sync_status) VALUES(?, ?, ?)",
            (
                &data,
                Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                RecordStatus::Pending.as_str(),
            ),
        )?;
        let id = conn.last_insert_rowid();
        tracing::info!(id, qr_code = %record.qr_code, "attendance stored offline");
        Ok(id)
    }

    /// Records still owed to the server: PENDING and FAILED, oldest first.
    pub fn list_pending(&self) -> Result<Vec<PendingRecord>, StoreError> {
        let conn = self.conn()?;
        query_records(
            &conn,
            &format!("{SELECT_COLUMNS} WHERE sync_status IN (?, ?) ORDER BY id"),
            (RecordStatus::Pending.as_str(), RecordStatus::Failed.as_str()),
        )
    }

    pub fn list_with_status(&self, status: RecordStatus) -> Result<Vec<PendingRecord>, StoreError> {
        let conn = self.conn()?;
        query_records(
            &conn,
            &format!("{SELECT_COLUMNS} WHERE sync_status = ? ORDER BY id"),
            [status.as_str()],
        )
    }

    pub fn list_all(&self) -> Result<Vec<PendingRecord>, StoreError> {
        let conn = self.conn()?;
        query_records(&conn, &format!("{SELECT_COLUMNS} ORDER BY id"), [])
    }

    pub fn get(&self, id: i64) -> Result<Option<PendingRecord>, StoreError> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?"), [id], read_raw)
            .optional()?;
        raw.map(decode_row).transpose()
    }

    pub fn counts(&self) -> Result<RecordCounts, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT sync_status, COUNT(*) FROM attendance GROUP BY sync_status")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut counts = RecordCounts::default();
        for (status, n) in rows {
            let n = n.max(0) as usize;
            match RecordStatus::parse(&status) {
                Some(RecordStatus::Pending) => counts.pending += n,
                Some(RecordStatus::Failed) => counts.failed += n,
                Some(RecordStatus::Synced) => counts.synced += n,
                None => tracing::warn!(status = %status, "ignoring unknown sync status"),
            }
        }
        Ok(counts)
    }

    #[allow(dead_code)]
    pub fn mark_synced(&self, id: i64) -> Result<(), StoreError> {
        let conn = self.conn()?;
        set_status(&conn, id, RecordStatus::Synced, None)
    }

    #[allow(dead_code)]
    pub fn mark_failed(&self, id: i64, error: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        set_status(&conn, id, RecordStatus::Failed, Some(error))
    }

    /// Applies one transition to a whole batch atomically: either every id
    /// lands or none does.
    pub fn mark_batch(
        &self,
        ids: &[i64],
        status: RecordStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;
        for &id in ids {
            set_status(&tx, id, status, error)?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Deletes every SYNCED record and returns how many went away.
    pub fn reap_synced(&self) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let n = conn.execute(
            "DELETE FROM attendance WHERE sync_status = ?",
            [RecordStatus::Synced.as_str()],
        )?;
        if n > 0 {
            tracing::debug!(reaped = n, "reaped synced attendance records");
        }
        Ok(n)
    }
}

fn set_status(
    conn: &Connection,
    id: i64,
    status: RecordStatus,
    error: Option<&str>,
) -> Result<(), StoreError> {
    // A SYNCED record carries no error; FAILED keeps the prior message unless
    // a new one is supplied.
    let changed = match status {
        RecordStatus::Failed => conn.execute(
            "UPDATE attendance SET sync_status = ?, error = COALESCE(?, error) WHERE id = ?",
            (status.as_str(), error, id),
        )?,
        _ => conn.execute(
            "UPDATE attendance SET sync_status = ?, error = NULL WHERE id = ?",
            (status.as_str(), id),
        )?,
    };
    if changed == 0 {
        return Err(StoreError::RecordNotFound(id));
    }
    Ok(())
}

fn read_raw(r: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: r.get(0)?,
        data: r.get(1)?,
        timestamp: r.get(2)?,
        sync_status: r.get(3)?,
        error: r.get(4)?,
    })
}

fn query_records<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<PendingRecord>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let raws = stmt
        .query_map(params, read_raw)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(decode_row).collect()
}

fn decode_row(raw: RawRow) -> Result<PendingRecord, StoreError> {
    let corrupt = |what: String| StoreError::Unavailable(format!("record {}: {}", raw.id, what));
    let data: AttendanceRecord =
        serde_json::from_str(&raw.data).map_err(|e| corrupt(format!("bad data: {e}")))?;
    let timestamp = DateTime::parse_from_rfc3339(&raw.timestamp)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| corrupt(format!("bad timestamp: {e}")))?;
    let sync_status = RecordStatus::parse(&raw.sync_status)
        .ok_or_else(|| corrupt(format!("bad sync status {}", raw.sync_status)))?;
    Ok(PendingRecord {
        id: raw.id,
        data,
        timestamp,
        sync_status,
        error: raw.error,
    })
}
