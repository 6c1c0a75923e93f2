use std::fmt;
use std::str::FromStr;

use duckdb::{params, Connection, Row};
use serde::{Deserialize, Serialize};

use super::Store;
use crate::error::{CacheError, Result};
use crate::event::SignedEvent;

/// Confirmation lifecycle of a locally authored event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Confirmed,
    Failed,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Pending => "pending",
            PendingStatus::Confirmed => "confirmed",
            PendingStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PendingStatus {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PendingStatus::Pending),
            "confirmed" => Ok(PendingStatus::Confirmed),
            "failed" => Ok(PendingStatus::Failed),
            other => Err(CacheError::InvalidRow(format!("unknown pending status {other}"))),
        }
    }
}

/// What kind of user action produced a pending write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteAction {
    Thread,
    Reaction,
    Report,
}

impl WriteAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteAction::Thread => "thread",
            WriteAction::Reaction => "reaction",
            WriteAction::Report => "report",
        }
    }
}

impl FromStr for WriteAction {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "thread" => Ok(WriteAction::Thread),
            "reaction" => Ok(WriteAction::Reaction),
            "report" => Ok(WriteAction::Report),
            other => Err(CacheError::InvalidRow(format!("unknown write action {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub id: String,
    pub event_id: String,
    pub scope: String,
    pub kind: u32,
    pub action: WriteAction,
    pub target_id: String,
    pub author: String,
    pub status: PendingStatus,
    pub attempt_count: i64,
    /// The signed event exactly as first published, serialized as JSON.
    pub signed_payload: String,
    /// Milliseconds since the epoch.
    pub created_at: i64,
    pub updated_at: i64,
    pub error_message: Option<String>,
}

impl PendingWrite {
    /// Parse the stored payload back into a signed event. `None` when the
    /// payload is corrupt or lacks an id or signature.
    pub fn signed_event(&self) -> Option<SignedEvent> {
        let event: SignedEvent = serde_json::from_str(&self.signed_payload).ok()?;
        if event.id.is_empty() || event.sig.is_empty() {
            return None;
        }
        Some(event)
    }
}

/// Row contents for a freshly queued write.
#[derive(Debug, Clone)]
pub struct NewPendingWrite<'a> {
    pub id: &'a str,
    pub event: &'a SignedEvent,
    pub scope: &'a str,
    pub action: WriteAction,
    pub target_id: &'a str,
    pub now: i64,
}

const PENDING_COLUMNS: &str = "id, event_id, scope, kind, action, target_id, author, status, \
     attempt_count, signed_payload, created_at, updated_at, error_message";

struct PendingRow {
    id: String,
    event_id: String,
    scope: String,
    kind: i64,
    action: String,
    target_id: String,
    author: String,
    status: String,
    attempt_count: i64,
    signed_payload: String,
    created_at: i64,
    updated_at: i64,
    error_message: Option<String>,
}

impl PendingRow {
    fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            event_id: row.get(1)?,
            scope: row.get(2)?,
            kind: row.get(3)?,
            action: row.get(4)?,
            target_id: row.get(5)?,
            author: row.get(6)?,
            status: row.get(7)?,
            attempt_count: row.get(8)?,
            signed_payload: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
            error_message: row.get(12)?,
        })
    }

    fn into_pending(self) -> Result<PendingWrite> {
        let kind = u32::try_from(self.kind)
            .map_err(|_| CacheError::InvalidRow(format!("pending write {} has kind {}", self.id, self.kind)))?;
        Ok(PendingWrite {
            kind,
            action: self.action.parse()?,
            status: self.status.parse()?,
            id: self.id,
            event_id: self.event_id,
            scope: self.scope,
            target_id: self.target_id,
            author: self.author,
            attempt_count: self.attempt_count,
            signed_payload: self.signed_payload,
            created_at: self.created_at,
            updated_at: self.updated_at,
            error_message: self.error_message,
        })
    }
}

fn query_pending(conn: &Connection, sql: &str, args: &[&dyn duckdb::ToSql]) -> Result<Vec<PendingWrite>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, PendingRow::from_row)?
        .collect::<duckdb::Result<Vec<_>>>()?;
    rows.into_iter().map(PendingRow::into_pending).collect()
}

/// Queue a write at status `pending` with no attempts yet.
pub(crate) fn insert_pending_write(conn: &Connection, new: &NewPendingWrite<'_>) -> Result<PendingWrite> {
    let pending = PendingWrite {
        id: new.id.to_string(),
        event_id: new.event.id.clone(),
        scope: new.scope.to_string(),
        kind: new.event.kind,
        action: new.action,
        target_id: new.target_id.to_string(),
        author: new.event.pubkey.clone(),
        status: PendingStatus::Pending,
        attempt_count: 0,
        signed_payload: serde_json::to_string(new.event)?,
        created_at: new.now,
        updated_at: new.now,
        error_message: None,
    };
    conn.execute(
        &format!("INSERT INTO pending_writes ({PENDING_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
        params![
            pending.id,
            pending.event_id,
            pending.scope,
            i64::from(pending.kind),
            pending.action.as_str(),
            pending.target_id,
            pending.author,
            pending.status.as_str(),
            pending.attempt_count,
            pending.signed_payload,
            pending.created_at,
            pending.updated_at,
            pending.error_message,
        ],
    )?;
    Ok(pending)
}

pub(crate) fn get_pending_write(conn: &Connection, id: &str) -> Result<Option<PendingWrite>> {
    let sql = format!("SELECT {PENDING_COLUMNS} FROM pending_writes WHERE id = ?");
    Ok(query_pending(conn, &sql, &[&id])?.into_iter().next())
}

/// Move a pending write to `status`. A publish outcome counts one attempt
/// (`count_attempt`); resetting to pending for a retry does not. Returns the
/// updated row, or `None` when no write has that id.
pub(crate) fn update_pending_status(
    conn: &Connection,
    id: &str,
    status: PendingStatus,
    now: i64,
    error_message: Option<&str>,
    count_attempt: bool,
) -> Result<Option<PendingWrite>> {
    let updated = conn.execute(
        "UPDATE pending_writes SET status = ?, updated_at = ?, error_message = ?, \
         attempt_count = attempt_count + ? WHERE id = ?",
        params![status.as_str(), now, error_message, i64::from(count_attempt), id],
    )?;
    if updated == 0 {
        return Ok(None);
    }
    get_pending_write(conn, id)
}

/// Writes of `scope`, most recently updated first.
pub(crate) fn pending_for_scope(conn: &Connection, scope: &str) -> Result<Vec<PendingWrite>> {
    let sql = format!(
        "SELECT {PENDING_COLUMNS} FROM pending_writes WHERE scope = ? ORDER BY updated_at DESC, id"
    );
    query_pending(conn, &sql, &[&scope])
}

impl Store {
    pub fn pending_write(&self, id: &str) -> Result<Option<PendingWrite>> {
        self.read(|conn| get_pending_write(conn, id))
    }

    pub fn pending_count(&self) -> Result<i64> {
        self.read(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM pending_writes", [], |row| row.get(0))?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::kind;

    fn signed(id: &str) -> SignedEvent {
        SignedEvent {
            id: id.to_string(),
            kind: kind::POST,
            pubkey: "alice".to_string(),
            created_at: 100,
            tags: vec![vec!["h".into(), "c1".into()]],
            content: "hello".to_string(),
            sig: "sig".to_string(),
        }
    }

    #[test]
    fn test_pending_lifecycle_counts_attempts() {
        let store = Store::open_in_memory().unwrap();
        let event = signed("e1");
        let created = store
            .write("c1", |conn| {
                insert_pending_write(
                    conn,
                    &NewPendingWrite {
                        id: "w1",
                        event: &event,
                        scope: "c1",
                        action: WriteAction::Thread,
                        target_id: "e1",
                        now: 1,
                    },
                )
            })
            .unwrap();
        assert_eq!(created.status, PendingStatus::Pending);
        assert_eq!(created.attempt_count, 0);
        assert_eq!(created.signed_event().unwrap(), event);

        let failed = store
            .write("c1", |conn| {
                update_pending_status(conn, "w1", PendingStatus::Failed, 2, Some("boom"), true)
            })
            .unwrap()
            .unwrap();
        assert_eq!(failed.attempt_count, 1);
        assert_eq!(failed.error_message.as_deref(), Some("boom"));

        let reset = store
            .write("c1", |conn| update_pending_status(conn, "w1", PendingStatus::Pending, 3, None, false))
            .unwrap()
            .unwrap();
        assert_eq!(reset.status, PendingStatus::Pending);
        assert_eq!(reset.attempt_count, 1);
        assert_eq!(reset.error_message, None);
    }

    #[test]
    fn test_update_missing_write_returns_none() {
        let store = Store::open_in_memory().unwrap();
        let result = store
            .write("c1", |conn| update_pending_status(conn, "nope", PendingStatus::Confirmed, 1, None, true))
            .unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_corrupt_payload_has_no_signed_event() {
        let mut pending = PendingWrite {
            id: "w1".into(),
            event_id: "e1".into(),
            scope: "c1".into(),
            kind: kind::POST,
            action: WriteAction::Thread,
            target_id: "e1".into(),
            author: "alice".into(),
            status: PendingStatus::Failed,
            attempt_count: 1,
            signed_payload: "{not json".into(),
            created_at: 0,
            updated_at: 0,
            error_message: None,
        };
        assert!(pending.signed_event().is_none());

        let mut unsigned = signed("e1");
        unsigned.sig = String::new();
        pending.signed_payload = serde_json::to_string(&unsigned).unwrap();
        assert!(pending.signed_event().is_none());
    }
}
