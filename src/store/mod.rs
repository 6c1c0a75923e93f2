//! Local persistence: the append-only event store, its projections, sync
//! cursors and the pending-write queue, all in one DuckDB database.
//!
//! The store is an explicitly constructed handle shared as `Arc<Store>`.
//! Every mutation goes through [`Store::write`], which wraps the closure in a
//! single transaction and notifies scope subscribers only after commit.

mod cursors;
mod events;
mod lists;
mod pending;
mod projections;
mod schema;
mod views;

pub use cursors::CursorState;
pub use lists::MemberList;
pub use pending::{NewPendingWrite, PendingStatus, PendingWrite, WriteAction};
pub use views::{SyncState, ThreadDetail};

pub(crate) use cursors::{get_cursor, set_cursor};
pub(crate) use events::{events_in_scope, get_event, insert_new_events};
pub(crate) use lists::upsert_member_list;
pub(crate) use pending::{get_pending_write, insert_pending_write, update_pending_status};
pub(crate) use projections::{
    get_thread_head, insert_label_records, insert_reaction_records, put_thread_head,
    replace_thread_heads,
};

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use duckdb::Connection;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::live::{ChangeFeed, Listener, Subscription};

pub struct Store {
    conn: Mutex<Option<Connection>>,
    feed: ChangeFeed,
}

impl Store {
    /// Open (or create) a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        debug!(path = %path.display(), "opening event store");
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// A store with no persistence runtime behind it; every call reports
    /// [`CacheError::Unavailable`].
    pub fn unavailable() -> Self {
        Self {
            conn: Mutex::new(None),
            feed: ChangeFeed::default(),
        }
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            feed: ChangeFeed::default(),
        })
    }

    /// Close the underlying database. Later calls report `Unavailable`.
    pub fn close(&self) -> Result<()> {
        if let Some(conn) = self.lock()?.take() {
            conn.close().map_err(|(_, e)| CacheError::Database(e))?;
        }
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        self.lock().map(|conn| conn.is_some()).unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn.lock().map_err(|_| CacheError::LockPoisoned)
    }

    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(CacheError::Unavailable)?;
        f(conn)
    }

    /// Run `f` in one transaction. Nothing it wrote persists unless it returns
    /// `Ok`; subscribers of `scope` are notified after the commit.
    pub fn write<T>(&self, scope: &str, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let out = {
            let mut guard = self.lock()?;
            let conn = guard.as_mut().ok_or(CacheError::Unavailable)?;
            let tx = conn.transaction()?;
            let out = f(&tx)?;
            tx.commit()?;
            out
        };
        self.feed.notify(scope);
        Ok(out)
    }

    /// Register `listener` for commits touching `scope`.
    pub fn subscribe(&self, scope: &str, listener: Listener) -> Subscription {
        self.feed.subscribe(scope, listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_creates_schema_on_disk() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("cache.duckdb");
        let store = Store::open(&db_path).unwrap();
        assert!(store.is_available());
        assert_eq!(store.event_count().unwrap(), 0);
        drop(store);

        // Reopening keeps the schema idempotent.
        let store = Store::open(&db_path).unwrap();
        assert_eq!(store.event_count().unwrap(), 0);
    }

    #[test]
    fn test_unavailable_store_rejects_everything() {
        let store = Store::unavailable();
        assert!(!store.is_available());
        assert!(matches!(store.event_count(), Err(CacheError::Unavailable)));
        assert!(matches!(
            store.write("c1", |_| Ok(())),
            Err(CacheError::Unavailable)
        ));
    }

    #[test]
    fn test_close_makes_store_unavailable() {
        let store = Store::open_in_memory().unwrap();
        store.close().unwrap();
        assert!(!store.is_available());
        assert!(matches!(store.cursor("s", "c1", "forum"), Err(CacheError::Unavailable)));
    }

    #[test]
    fn test_failed_write_rolls_back() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<()> = store.write("c1", |conn| {
            set_cursor(conn, "s", "c1", "forum", 42, 0)?;
            Err(CacheError::InvalidRow("abort".into()))
        });
        assert!(result.is_err());
        assert_eq!(store.cursor("s", "c1", "forum").unwrap(), 0);
    }
}
