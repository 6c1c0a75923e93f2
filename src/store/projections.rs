use duckdb::{params, Connection, Row};

use super::Store;
use crate::error::Result;
use crate::projections::thread_heads::sort_heads;
use crate::projections::{LabelRecord, ReactionRecord, ThreadHead};

const HEAD_COLUMNS: &str =
    "root_id, scope, forum_slug, title, author, last_activity_at, reply_count";

fn head_from_row(row: &Row<'_>) -> duckdb::Result<ThreadHead> {
    Ok(ThreadHead {
        root_id: row.get(0)?,
        scope: row.get(1)?,
        forum_slug: row.get(2)?,
        title: row.get(3)?,
        author: row.get(4)?,
        last_activity_at: row.get(5)?,
        reply_count: row.get(6)?,
    })
}

fn reaction_from_row(row: &Row<'_>) -> duckdb::Result<ReactionRecord> {
    Ok(ReactionRecord {
        event_id: row.get(0)?,
        scope: row.get(1)?,
        target_id: row.get(2)?,
        author: row.get(3)?,
        value: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn label_from_row(row: &Row<'_>) -> duckdb::Result<LabelRecord> {
    Ok(LabelRecord {
        id: row.get(0)?,
        event_id: row.get(1)?,
        scope: row.get(2)?,
        target_id: row.get(3)?,
        label: row.get(4)?,
        reason: row.get(5)?,
        author: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn insert_head(conn: &Connection, head: &ThreadHead) -> Result<()> {
    conn.execute(
        &format!("INSERT INTO thread_heads ({HEAD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"),
        params![
            head.root_id,
            head.scope,
            head.forum_slug,
            head.title,
            head.author,
            head.last_activity_at,
            head.reply_count,
        ],
    )?;
    Ok(())
}

/// Replace the whole thread-head set of `scope`.
pub(crate) fn replace_thread_heads(conn: &Connection, scope: &str, heads: &[ThreadHead]) -> Result<()> {
    conn.execute("DELETE FROM thread_heads WHERE scope = ?", params![scope])?;
    for head in heads {
        insert_head(conn, head)?;
    }
    Ok(())
}

pub(crate) fn get_thread_head(
    conn: &Connection,
    scope: &str,
    root_id: &str,
) -> Result<Option<ThreadHead>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {HEAD_COLUMNS} FROM thread_heads WHERE scope = ? AND root_id = ?"
    ))?;
    let mut rows = stmt.query_map(params![scope, root_id], head_from_row)?;
    let head = rows.next().transpose()?;
    Ok(head)
}

/// Insert or overwrite the single head keyed by (`head.scope`, `head.root_id`).
pub(crate) fn put_thread_head(conn: &Connection, head: &ThreadHead) -> Result<()> {
    let updated = conn.execute(
        "UPDATE thread_heads SET forum_slug = ?, title = ?, author = ?, \
         last_activity_at = ?, reply_count = ? WHERE scope = ? AND root_id = ?",
        params![
            head.forum_slug,
            head.title,
            head.author,
            head.last_activity_at,
            head.reply_count,
            head.scope,
            head.root_id,
        ],
    )?;
    if updated == 0 {
        insert_head(conn, head)?;
    }
    Ok(())
}

pub(crate) fn insert_reaction_records(conn: &Connection, records: &[ReactionRecord]) -> Result<()> {
    for r in records {
        conn.execute(
            "INSERT OR IGNORE INTO reactions (event_id, scope, target_id, author, value, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
            params![r.event_id, r.scope, r.target_id, r.author, r.value, r.created_at],
        )?;
    }
    Ok(())
}

pub(crate) fn insert_label_records(conn: &Connection, records: &[LabelRecord]) -> Result<()> {
    for l in records {
        conn.execute(
            "INSERT OR IGNORE INTO labels (id, event_id, scope, target_id, label, reason, author, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![l.id, l.event_id, l.scope, l.target_id, l.label, l.reason, l.author, l.created_at],
        )?;
    }
    Ok(())
}

pub(crate) fn thread_heads_for_scope(conn: &Connection, scope: &str) -> Result<Vec<ThreadHead>> {
    let mut stmt = conn.prepare(&format!("SELECT {HEAD_COLUMNS} FROM thread_heads WHERE scope = ?"))?;
    let mut heads = stmt
        .query_map(params![scope], head_from_row)?
        .collect::<duckdb::Result<Vec<_>>>()?;
    sort_heads(&mut heads);
    Ok(heads)
}

pub(crate) fn reactions_for_targets(
    conn: &Connection,
    scope: &str,
    targets: &[String],
) -> Result<Vec<ReactionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, scope, target_id, author, value, created_at FROM reactions \
         WHERE scope = ? AND target_id = ? ORDER BY created_at, event_id",
    )?;
    let mut out = Vec::new();
    for target in targets {
        let rows = stmt
            .query_map(params![scope, target], reaction_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        out.extend(rows);
    }
    Ok(out)
}

pub(crate) fn labels_for_targets(
    conn: &Connection,
    scope: &str,
    targets: &[String],
) -> Result<Vec<LabelRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, event_id, scope, target_id, label, reason, author, created_at FROM labels \
         WHERE scope = ? AND target_id = ? ORDER BY created_at, id",
    )?;
    let mut out = Vec::new();
    for target in targets {
        let rows = stmt
            .query_map(params![scope, target], label_from_row)?
            .collect::<duckdb::Result<Vec<_>>>()?;
        out.extend(rows);
    }
    Ok(out)
}

pub(crate) fn labels_for_scope(conn: &Connection, scope: &str) -> Result<Vec<LabelRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, event_id, scope, target_id, label, reason, author, created_at FROM labels \
         WHERE scope = ? ORDER BY created_at DESC, id",
    )?;
    let rows = stmt
        .query_map(params![scope], label_from_row)?
        .collect::<duckdb::Result<Vec<_>>>()?;
    Ok(rows)
}

impl Store {
    pub fn thread_head(&self, scope: &str, root_id: &str) -> Result<Option<ThreadHead>> {
        self.read(|conn| get_thread_head(conn, scope, root_id))
    }

    /// All thread heads of `scope`, most recently active first.
    pub fn thread_heads(&self, scope: &str) -> Result<Vec<ThreadHead>> {
        self.read(|conn| thread_heads_for_scope(conn, scope))
    }

    pub fn reactions(&self, scope: &str, targets: &[String]) -> Result<Vec<ReactionRecord>> {
        self.read(|conn| reactions_for_targets(conn, scope, targets))
    }

    pub fn labels(&self, scope: &str, targets: &[String]) -> Result<Vec<LabelRecord>> {
        self.read(|conn| labels_for_targets(conn, scope, targets))
    }
}
