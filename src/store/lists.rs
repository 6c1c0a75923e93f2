use duckdb::{params, Connection};
use serde::{Deserialize, Serialize};

use super::Store;
use crate::error::Result;
use crate::event::{first_tag_value, kind, tag, tag_values, Event};

/// Latest known membership of one addressable list in a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberList {
    pub scope: String,
    /// Value of the list-identifier tag, e.g. `General` or `Moderation`.
    pub list_id: String,
    pub author: String,
    pub event_id: String,
    pub members: Vec<String>,
    pub created_at: i64,
}

impl MemberList {
    /// Reads a list event. `None` unless it is a list kind with a list id.
    pub fn from_event(event: &Event) -> Option<Self> {
        if event.kind != kind::MEMBER_LIST {
            return None;
        }
        let list_id = first_tag_value(&event.tags, tag::LIST_ID)?;
        let mut members: Vec<String> = Vec::new();
        for member in tag_values(&event.tags, tag::MEMBER) {
            if !members.iter().any(|m| m == member) {
                members.push(member.to_string());
            }
        }
        Some(Self {
            scope: event.scope.clone(),
            list_id: list_id.to_string(),
            author: event.author.clone(),
            event_id: event.id.clone(),
            members,
            created_at: event.created_at,
        })
    }

    pub fn contains(&self, member: &str) -> bool {
        self.members.iter().any(|m| m == member)
    }
}

pub(crate) fn get_member_list(conn: &Connection, scope: &str, list_id: &str) -> Result<Option<MemberList>> {
    let mut stmt = conn.prepare(
        "SELECT scope, list_id, author, event_id, members, created_at FROM member_lists \
         WHERE scope = ? AND list_id = ?",
    )?;
    let mut rows = stmt.query_map(params![scope, list_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, i64>(5)?,
        ))
    })?;
    let Some((scope, list_id, author, event_id, members, created_at)) = rows.next().transpose()? else {
        return Ok(None);
    };
    Ok(Some(MemberList {
        scope,
        list_id,
        author,
        event_id,
        members: serde_json::from_str(&members)?,
        created_at,
    }))
}

/// Store `list` unless a newer (or same-age) version of it is already known.
/// Returns whether the stored list changed.
pub(crate) fn upsert_member_list(conn: &Connection, list: &MemberList) -> Result<bool> {
    if let Some(existing) = get_member_list(conn, &list.scope, &list.list_id)? {
        if existing.created_at >= list.created_at {
            return Ok(false);
        }
        conn.execute(
            "UPDATE member_lists SET author = ?, event_id = ?, members = ?, created_at = ? \
             WHERE scope = ? AND list_id = ?",
            params![
                list.author,
                list.event_id,
                serde_json::to_string(&list.members)?,
                list.created_at,
                list.scope,
                list.list_id,
            ],
        )?;
        return Ok(true);
    }
    conn.execute(
        "INSERT INTO member_lists (scope, list_id, author, event_id, members, created_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
        params![
            list.scope,
            list.list_id,
            list.author,
            list.event_id,
            serde_json::to_string(&list.members)?,
            list.created_at,
        ],
    )?;
    Ok(true)
}

impl Store {
    pub fn upsert_member_list(&self, list: &MemberList) -> Result<bool> {
        self.write(&list.scope, |conn| upsert_member_list(conn, list))
    }

    pub fn member_list(&self, scope: &str, list_id: &str) -> Result<Option<MemberList>> {
        self.read(|conn| get_member_list(conn, scope, list_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_event(id: &str, created_at: i64, members: &[&str]) -> Event {
        let mut tags = vec![
            vec!["h".to_string(), "c1".to_string()],
            vec!["d".to_string(), "General".to_string()],
        ];
        tags.extend(members.iter().map(|m| vec!["p".to_string(), m.to_string()]));
        Event {
            id: id.to_string(),
            kind: kind::MEMBER_LIST,
            author: "owner".to_string(),
            created_at,
            scope: "c1".to_string(),
            forum_slug: "general".to_string(),
            root_id: id.to_string(),
            content: String::new(),
            tags,
        }
    }

    #[test]
    fn test_from_event_reads_members() {
        let list = MemberList::from_event(&list_event("l1", 10, &["alice", "bob", "alice"])).unwrap();
        assert_eq!(list.list_id, "General");
        assert_eq!(list.members, vec!["alice".to_string(), "bob".to_string()]);
        assert!(list.contains("bob"));
        assert!(!list.contains("carol"));
    }

    #[test]
    fn test_newest_list_wins() {
        let store = Store::open_in_memory().unwrap();
        let older = MemberList::from_event(&list_event("l1", 10, &["alice"])).unwrap();
        let newer = MemberList::from_event(&list_event("l2", 20, &["bob"])).unwrap();

        assert!(store.upsert_member_list(&newer).unwrap());
        assert!(!store.upsert_member_list(&older).unwrap());

        let stored = store.member_list("c1", "General").unwrap().unwrap();
        assert_eq!(stored.event_id, "l2");
        assert_eq!(stored.members, vec!["bob".to_string()]);
    }
}
