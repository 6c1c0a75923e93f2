use duckdb::Connection;

use crate::error::Result;

// thread_heads (scope, root_id) and member_lists (scope, list_id) carry no key
// constraint: both are deleted and re-inserted inside a single transaction,
// which DuckDB rejects on indexed keys.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS events (
    id VARCHAR PRIMARY KEY,
    kind BIGINT NOT NULL,
    author VARCHAR NOT NULL,
    created_at BIGINT NOT NULL,
    scope VARCHAR NOT NULL,
    forum_slug VARCHAR NOT NULL,
    root_id VARCHAR NOT NULL,
    content VARCHAR NOT NULL,
    tags VARCHAR NOT NULL
);

CREATE TABLE IF NOT EXISTS thread_heads (
    root_id VARCHAR NOT NULL,
    scope VARCHAR NOT NULL,
    forum_slug VARCHAR NOT NULL,
    title VARCHAR NOT NULL,
    author VARCHAR NOT NULL,
    last_activity_at BIGINT NOT NULL,
    reply_count BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS reactions (
    event_id VARCHAR PRIMARY KEY,
    scope VARCHAR NOT NULL,
    target_id VARCHAR NOT NULL,
    author VARCHAR NOT NULL,
    value VARCHAR NOT NULL,
    created_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS labels (
    id VARCHAR PRIMARY KEY,
    event_id VARCHAR NOT NULL,
    scope VARCHAR NOT NULL,
    target_id VARCHAR NOT NULL,
    label VARCHAR NOT NULL,
    reason VARCHAR,
    author VARCHAR NOT NULL,
    created_at BIGINT NOT NULL
);

CREATE TABLE IF NOT EXISTS sync_cursors (
    source VARCHAR NOT NULL,
    scope VARCHAR NOT NULL,
    stream VARCHAR NOT NULL,
    cursor BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    PRIMARY KEY (source, scope, stream)
);

CREATE TABLE IF NOT EXISTS pending_writes (
    id VARCHAR PRIMARY KEY,
    event_id VARCHAR NOT NULL,
    scope VARCHAR NOT NULL,
    kind BIGINT NOT NULL,
    action VARCHAR NOT NULL,
    target_id VARCHAR NOT NULL,
    author VARCHAR NOT NULL,
    status VARCHAR NOT NULL,
    attempt_count BIGINT NOT NULL,
    signed_payload VARCHAR NOT NULL,
    created_at BIGINT NOT NULL,
    updated_at BIGINT NOT NULL,
    error_message VARCHAR
);

CREATE TABLE IF NOT EXISTS member_lists (
    scope VARCHAR NOT NULL,
    list_id VARCHAR NOT NULL,
    author VARCHAR NOT NULL,
    event_id VARCHAR NOT NULL,
    members VARCHAR NOT NULL,
    created_at BIGINT NOT NULL
);
"#;

pub(crate) fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}
