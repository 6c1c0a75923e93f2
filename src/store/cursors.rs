use chrono::Utc;
use duckdb::{params, Connection};
use serde::{Deserialize, Serialize};

use super::Store;
use crate::error::Result;

/// High-water mark of one (source, scope, stream) feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorState {
    pub source: String,
    pub scope: String,
    pub stream: String,
    pub cursor: i64,
    /// Milliseconds since the epoch.
    pub updated_at: i64,
}

pub(crate) fn get_cursor(conn: &Connection, source: &str, scope: &str, stream: &str) -> Result<i64> {
    let mut stmt = conn.prepare(
        "SELECT cursor FROM sync_cursors WHERE source = ? AND scope = ? AND stream = ?",
    )?;
    let mut rows = stmt.query_map(params![source, scope, stream], |row| row.get::<_, i64>(0))?;
    let cursor = rows.next().transpose()?.unwrap_or(0);
    Ok(cursor)
}

pub(crate) fn set_cursor(
    conn: &Connection,
    source: &str,
    scope: &str,
    stream: &str,
    cursor: i64,
    updated_at: i64,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE sync_cursors SET cursor = ?, updated_at = ? WHERE source = ? AND scope = ? AND stream = ?",
        params![cursor, updated_at, source, scope, stream],
    )?;
    if updated == 0 {
        conn.execute(
            "INSERT INTO sync_cursors (source, scope, stream, cursor, updated_at) VALUES (?, ?, ?, ?, ?)",
            params![source, scope, stream, cursor, updated_at],
        )?;
    }
    Ok(())
}

pub(crate) fn cursors_for_scope(conn: &Connection, scope: &str) -> Result<Vec<CursorState>> {
    let mut stmt = conn.prepare(
        "SELECT source, scope, stream, cursor, updated_at FROM sync_cursors \
         WHERE scope = ? ORDER BY source, stream",
    )?;
    let rows = stmt
        .query_map(params![scope], |row| {
            Ok(CursorState {
                source: row.get(0)?,
                scope: row.get(1)?,
                stream: row.get(2)?,
                cursor: row.get(3)?,
                updated_at: row.get(4)?,
            })
        })?
        .collect::<duckdb::Result<Vec<_>>>()?;
    Ok(rows)
}

impl Store {
    /// Stored cursor, or 0 when the feed has never been synced.
    pub fn cursor(&self, source: &str, scope: &str, stream: &str) -> Result<i64> {
        self.read(|conn| get_cursor(conn, source, scope, stream))
    }

    pub fn set_cursor(&self, source: &str, scope: &str, stream: &str, cursor: i64) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        self.write(scope, |conn| set_cursor(conn, source, scope, stream, cursor, now))
    }

    /// Forget every cursor of `scope`, forcing the next sync to backfill.
    pub fn reset_cursors(&self, scope: &str) -> Result<usize> {
        self.write(scope, |conn| {
            Ok(conn.execute("DELETE FROM sync_cursors WHERE scope = ?", params![scope])?)
        })
    }

    pub fn cursors(&self, scope: &str) -> Result<Vec<CursorState>> {
        self.read(|conn| cursors_for_scope(conn, scope))
    }
}
