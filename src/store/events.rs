use duckdb::{params, Connection, Row};

use super::Store;
use crate::error::{CacheError, Result};
use crate::event::{Event, Tag};

const EVENT_COLUMNS: &str =
    "id, kind, author, created_at, scope, forum_slug, root_id, content, tags";

struct EventRow {
    id: String,
    kind: i64,
    author: String,
    created_at: i64,
    scope: String,
    forum_slug: String,
    root_id: String,
    content: String,
    tags: String,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            kind: row.get(1)?,
            author: row.get(2)?,
            created_at: row.get(3)?,
            scope: row.get(4)?,
            forum_slug: row.get(5)?,
            root_id: row.get(6)?,
            content: row.get(7)?,
            tags: row.get(8)?,
        })
    }

    fn into_event(self) -> Result<Event> {
        let kind = u32::try_from(self.kind)
            .map_err(|_| CacheError::InvalidRow(format!("event {} has kind {}", self.id, self.kind)))?;
        let tags: Vec<Tag> = serde_json::from_str(&self.tags)?;
        Ok(Event {
            id: self.id,
            kind,
            author: self.author,
            created_at: self.created_at,
            scope: self.scope,
            forum_slug: self.forum_slug,
            root_id: self.root_id,
            content: self.content,
            tags,
        })
    }
}

fn query_events(conn: &Connection, sql: &str, args: &[&dyn duckdb::ToSql]) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(args, EventRow::from_row)?
        .collect::<duckdb::Result<Vec<_>>>()?;
    rows.into_iter().map(EventRow::into_event).collect()
}

pub(crate) fn event_exists(conn: &Connection, id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM events WHERE id = ?",
        params![id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Append events whose ids are not stored yet. Stored events are never
/// touched. Returns the events actually inserted, in input order.
pub(crate) fn insert_new_events<'a>(conn: &Connection, events: &'a [Event]) -> Result<Vec<&'a Event>> {
    let mut inserted = Vec::new();
    for event in events {
        if event_exists(conn, &event.id)? {
            continue;
        }
        conn.execute(
            &format!("INSERT INTO events ({EVENT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"),
            params![
                event.id,
                i64::from(event.kind),
                event.author,
                event.created_at,
                event.scope,
                event.forum_slug,
                event.root_id,
                event.content,
                serde_json::to_string(&event.tags)?,
            ],
        )?;
        inserted.push(event);
    }
    Ok(inserted)
}

pub(crate) fn get_event(conn: &Connection, id: &str) -> Result<Option<Event>> {
    let sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?");
    Ok(query_events(conn, &sql, &[&id])?.into_iter().next())
}

/// Every event of `kind` in `scope`, ordered by (created_at, id).
pub(crate) fn events_in_scope(conn: &Connection, scope: &str, kind: u32) -> Result<Vec<Event>> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE scope = ? AND kind = ? ORDER BY created_at, id"
    );
    query_events(conn, &sql, &[&scope, &i64::from(kind)])
}

pub(crate) fn events_for_root(conn: &Connection, scope: &str, root_id: &str) -> Result<Vec<Event>> {
    let sql = format!(
        "SELECT {EVENT_COLUMNS} FROM events WHERE scope = ? AND root_id = ? ORDER BY created_at, id"
    );
    query_events(conn, &sql, &[&scope, &root_id])
}

impl Store {
    pub fn event(&self, id: &str) -> Result<Option<Event>> {
        self.read(|conn| get_event(conn, id))
    }

    pub fn event_count(&self) -> Result<i64> {
        self.read(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?)
        })
    }

    pub fn events_in_scope(&self, scope: &str, kind: u32) -> Result<Vec<Event>> {
        self.read(|conn| events_in_scope(conn, scope, kind))
    }
}
