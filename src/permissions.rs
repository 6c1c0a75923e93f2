//! Capability evaluation from a scope's member lists.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::store::{MemberList, Store};

/// List id whose members may post and react.
pub const GENERAL_LIST: &str = "General";
/// List id whose members may moderate.
pub const MODERATION_LIST: &str = "Moderation";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionsView {
    pub can_post: bool,
    pub can_react: bool,
    pub can_moderate: bool,
}

/// A single permission a write action requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Post,
    React,
    Moderate,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::Post => "can_post",
            Capability::React => "can_react",
            Capability::Moderate => "can_moderate",
        }
    }
}

impl PermissionsView {
    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::Post => self.can_post,
            Capability::React => self.can_react,
            Capability::Moderate => self.can_moderate,
        }
    }
}

/// Posting requires General membership, reacting follows posting, and
/// moderating requires Moderation membership.
pub fn evaluate_from_members(user: &str, general: &[String], moderation: &[String]) -> PermissionsView {
    let can_post = general.iter().any(|m| m == user);
    PermissionsView {
        can_post,
        can_react: can_post,
        can_moderate: moderation.iter().any(|m| m == user),
    }
}

pub fn evaluate_from_lists(user: &str, lists: &[MemberList]) -> PermissionsView {
    let members = |list_id: &str| {
        lists
            .iter()
            .find(|l| l.list_id == list_id)
            .map(|l| l.members.as_slice())
            .unwrap_or_default()
    };
    evaluate_from_members(user, members(GENERAL_LIST), members(MODERATION_LIST))
}

/// Resolves what `author` may do in `scope`.
#[async_trait]
pub trait PermissionResolver: Send + Sync {
    async fn resolve(&self, scope: &str, author: &str) -> anyhow::Result<PermissionsView>;
}

/// Resolver backed by the member lists synced into the store. A scope with
/// no lists grants nothing.
pub struct ListPermissionResolver {
    store: Arc<Store>,
}

impl ListPermissionResolver {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl PermissionResolver for ListPermissionResolver {
    async fn resolve(&self, scope: &str, author: &str) -> anyhow::Result<PermissionsView> {
        let mut lists = Vec::new();
        for list_id in [GENERAL_LIST, MODERATION_LIST] {
            if let Some(list) = self.store.member_list(scope, list_id)? {
                lists.push(list);
            }
        }
        Ok(evaluate_from_lists(author, &lists))
    }
}

/// Grants the same view to everyone. Useful for tooling and tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermissions(pub PermissionsView);

#[async_trait]
impl PermissionResolver for StaticPermissions {
    async fn resolve(&self, _scope: &str, _author: &str) -> anyhow::Result<PermissionsView> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_evaluate_from_members() {
        let view = evaluate_from_members("alice", &members(&["alice"]), &members(&["bob"]));
        assert_eq!(
            view,
            PermissionsView {
                can_post: true,
                can_react: true,
                can_moderate: false
            }
        );

        let view = evaluate_from_members("bob", &members(&["alice"]), &members(&["bob"]));
        assert!(!view.allows(Capability::Post));
        assert!(!view.allows(Capability::React));
        assert!(view.allows(Capability::Moderate));
    }

    #[tokio::test]
    async fn test_list_resolver_reads_stored_lists() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let resolver = ListPermissionResolver::new(store.clone());
        assert_eq!(resolver.resolve("c1", "alice").await.unwrap(), PermissionsView::default());

        store
            .upsert_member_list(&MemberList {
                scope: "c1".to_string(),
                list_id: GENERAL_LIST.to_string(),
                author: "owner".to_string(),
                event_id: "l1".to_string(),
                members: members(&["alice"]),
                created_at: 10,
            })
            .unwrap();

        let view = resolver.resolve("c1", "alice").await.unwrap();
        assert!(view.can_post && view.can_react && !view.can_moderate);
        assert_eq!(resolver.resolve("c2", "alice").await.unwrap(), PermissionsView::default());
    }

    #[tokio::test]
    async fn test_list_resolver_surfaces_store_errors() {
        let resolver = ListPermissionResolver::new(Arc::new(Store::unavailable()));
        assert!(resolver.resolve("c1", "alice").await.is_err());
    }
}
