use std::sync::Arc;

use duckdb::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::collaborators::{Clock, NoopPublisher, NoopSigner, Publisher, Signer, SystemClock};
use crate::error::{CacheError, WriteError};
use crate::event::{
    self, forum_tag, kind, scope_tag, tag, target_tag, Event, SignedEvent, Tag, UnsignedEvent,
    RELATION_REPLY, RELATION_ROOT,
};
use crate::permissions::{Capability, ListPermissionResolver, PermissionResolver};
use crate::projections::{thread_title, LabelRecord, ReactionRecord, ThreadHead};
use crate::store::{
    get_event, get_pending_write, get_thread_head, insert_label_records, insert_new_events,
    insert_pending_write, insert_reaction_records, put_thread_head, update_pending_status,
    NewPendingWrite, PendingStatus, Store, WriteAction,
};

pub const DEFAULT_REPORT_LABEL: &str = "mod:report";

pub type WriteResult = std::result::Result<WriteOutcome, WriteError>;

/// A write that committed locally. `status` tells whether publishing
/// confirmed it; a failed publish is still a successful call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub event_id: String,
    pub pending_id: String,
    pub status: PendingStatus,
}

#[derive(Debug, Clone, Default)]
pub struct CreateThread {
    pub scope: String,
    pub author: String,
    pub destinations: Vec<String>,
    pub content: String,
    pub title: Option<String>,
    pub forum_slug: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateReply {
    pub scope: String,
    pub author: String,
    pub destinations: Vec<String>,
    /// Root of the thread being replied to.
    pub thread_id: String,
    pub content: String,
    /// Immediate parent when it is not the root.
    pub reply_to: Option<String>,
    pub forum_slug: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateReaction {
    pub scope: String,
    pub author: String,
    pub destinations: Vec<String>,
    pub target_id: String,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct CreateReport {
    pub scope: String,
    pub author: String,
    pub destinations: Vec<String>,
    pub target_id: String,
    pub reason: Option<String>,
    pub label: Option<String>,
}

/// How the optimistic commit updates the read models.
enum Projection {
    NewThread,
    Reply { root_id: String, forum_slug: String },
    Reaction,
    Report,
}

/// Everything one create-action needs once its input has been validated.
struct WriteOperation<'a> {
    scope: &'a str,
    author: &'a str,
    destinations: &'a [String],
    action: WriteAction,
    capability: Capability,
    kind: u32,
    target_id: String,
    tags: Vec<Tag>,
    content: String,
    projection: Projection,
}

/// Authors events locally, commits them optimistically and tracks their
/// publication.
pub struct WriteFlowService {
    store: Arc<Store>,
    signer: Arc<dyn Signer>,
    publisher: Arc<dyn Publisher>,
    permissions: Arc<dyn PermissionResolver>,
    clock: Arc<dyn Clock>,
}

impl WriteFlowService {
    /// Service with no signer or publisher configured and permissions taken
    /// from the store's member lists.
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            permissions: Arc::new(ListPermissionResolver::new(store.clone())),
            store,
            signer: Arc::new(NoopSigner),
            publisher: Arc::new(NoopPublisher),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn PermissionResolver>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn create_thread(&self, input: CreateThread) -> WriteResult {
        let forum_slug = event::normalize_slug_input(input.forum_slug.as_deref());
        let mut tags = vec![scope_tag(&input.scope), forum_tag(&forum_slug)];
        if let Some(title) = input.title.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            tags.push(vec![tag::TITLE.to_string(), title.to_string()]);
        }

        self.perform(WriteOperation {
            scope: &input.scope,
            author: &input.author,
            destinations: &input.destinations,
            action: WriteAction::Thread,
            capability: Capability::Post,
            kind: kind::POST,
            target_id: String::new(),
            tags,
            content: input.content.trim().to_string(),
            projection: Projection::NewThread,
        })
        .await
    }

    pub async fn create_reply(&self, input: CreateReply) -> WriteResult {
        let forum_slug = event::normalize_slug_input(input.forum_slug.as_deref());
        let root_id = input.thread_id.trim().to_string();
        if root_id.is_empty() {
            return Err(WriteError::InvalidInput("reply needs a thread id".to_string()));
        }
        let parent_id = input
            .reply_to
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(&root_id)
            .to_string();

        let mut tags = vec![
            scope_tag(&input.scope),
            forum_tag(&forum_slug),
            target_tag(&root_id, Some(RELATION_ROOT)),
        ];
        if parent_id != root_id {
            tags.push(target_tag(&parent_id, Some(RELATION_REPLY)));
        }

        self.perform(WriteOperation {
            scope: &input.scope,
            author: &input.author,
            destinations: &input.destinations,
            action: WriteAction::Thread,
            capability: Capability::Post,
            kind: kind::POST,
            target_id: parent_id,
            tags,
            content: input.content.trim().to_string(),
            projection: Projection::Reply { root_id, forum_slug },
        })
        .await
    }

    pub async fn create_reaction(&self, input: CreateReaction) -> WriteResult {
        let target_id = input.target_id.trim().to_string();
        let value = input.value.trim().to_string();
        if target_id.is_empty() {
            return Err(WriteError::InvalidInput("reaction needs a target".to_string()));
        }
        if value.is_empty() {
            return Err(WriteError::InvalidInput("reaction value is empty".to_string()));
        }

        self.perform(WriteOperation {
            scope: &input.scope,
            author: &input.author,
            destinations: &input.destinations,
            action: WriteAction::Reaction,
            capability: Capability::React,
            kind: kind::REACTION,
            tags: vec![scope_tag(&input.scope), target_tag(&target_id, None)],
            target_id,
            content: value,
            projection: Projection::Reaction,
        })
        .await
    }

    pub async fn create_report(&self, input: CreateReport) -> WriteResult {
        let target_id = input.target_id.trim().to_string();
        if target_id.is_empty() {
            return Err(WriteError::InvalidInput("report needs a target".to_string()));
        }
        let label = input
            .label
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_REPORT_LABEL)
            .to_lowercase();

        let mut tags = vec![
            scope_tag(&input.scope),
            target_tag(&target_id, None),
            vec![tag::TOPIC.to_string(), label],
        ];
        if let Some(reason) = input.reason.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            tags.push(vec![tag::REASON.to_string(), reason.to_string()]);
        }

        self.perform(WriteOperation {
            scope: &input.scope,
            author: &input.author,
            destinations: &input.destinations,
            action: WriteAction::Report,
            capability: Capability::Moderate,
            kind: kind::LABEL,
            target_id,
            tags,
            content: String::new(),
            projection: Projection::Report,
        })
        .await
    }

    /// Publish a stored write again, using exactly the payload signed the
    /// first time.
    pub async fn retry_pending_write(&self, pending_id: &str, destinations: &[String]) -> WriteResult {
        if !self.store.is_available() {
            return Err(WriteError::DbUnavailable);
        }
        let pending = self
            .store
            .read(|conn| get_pending_write(conn, pending_id))?
            .ok_or_else(|| WriteError::InvalidPendingWrite(format!("pending write {pending_id} not found")))?;
        let signed = pending.signed_event().ok_or_else(|| {
            WriteError::InvalidPendingWrite(format!(
                "pending write {pending_id} has an invalid signed event payload"
            ))
        })?;

        let now = self.clock.now_ms();
        self.store.write(&pending.scope, |conn| {
            update_pending_status(conn, pending_id, PendingStatus::Pending, now, None, false)
        })?;
        debug!("Retrying pending write {} for event {}", pending_id, signed.id);

        let status = self
            .publish_and_record(&pending.scope, pending_id, &signed, destinations)
            .await?;
        Ok(WriteOutcome {
            event_id: pending.event_id,
            pending_id: pending_id.to_string(),
            status,
        })
    }

    async fn perform(&self, op: WriteOperation<'_>) -> WriteResult {
        if !self.store.is_available() {
            return Err(WriteError::DbUnavailable);
        }

        let view = self
            .permissions
            .resolve(op.scope, op.author)
            .await
            .map_err(|e| {
                WriteError::PermissionDenied(format!(
                    "could not resolve permissions for {}: {}",
                    op.author, e
                ))
            })?;
        if !view.allows(op.capability) {
            return Err(WriteError::PermissionDenied(format!(
                "permission {} denied for {}",
                op.capability.as_str(),
                op.author
            )));
        }

        let unsigned = UnsignedEvent {
            kind: op.kind,
            pubkey: op.author.to_string(),
            created_at: self.clock.now_ms().div_euclid(1000),
            tags: op.tags.clone(),
            content: op.content.clone(),
        };
        let signed = self
            .signer
            .sign(unsigned)
            .await
            .map_err(|e| WriteError::SignFailed(e.to_string()))?;

        let pending_id = Uuid::new_v4().to_string();
        let now = self.clock.now_ms();
        self.store.write(op.scope, |conn| {
            commit_optimistic(conn, &op, &signed)?;
            insert_pending_write(
                conn,
                &NewPendingWrite {
                    id: &pending_id,
                    event: &signed,
                    scope: op.scope,
                    action: op.action,
                    target_id: &op.target_id,
                    now,
                },
            )
        })?;
        info!(
            "Committed {} {} in scope {} as pending write {}",
            op.action.as_str(),
            signed.id,
            op.scope,
            pending_id
        );

        let status = self
            .publish_and_record(op.scope, &pending_id, &signed, op.destinations)
            .await?;
        Ok(WriteOutcome {
            event_id: signed.id,
            pending_id,
            status,
        })
    }

    /// Publishes outside any transaction, then records the outcome as one
    /// more attempt.
    async fn publish_and_record(
        &self,
        scope: &str,
        pending_id: &str,
        signed: &SignedEvent,
        destinations: &[String],
    ) -> std::result::Result<PendingStatus, WriteError> {
        let (status, error) = match self.publisher.publish(signed, destinations).await {
            Ok(()) => (PendingStatus::Confirmed, None),
            Err(e) => {
                warn!("Publishing {} failed: {}", signed.id, e);
                (PendingStatus::Failed, Some(e.to_string()))
            }
        };
        let now = self.clock.now_ms();
        self.store.write(scope, |conn| {
            update_pending_status(conn, pending_id, status, now, error.as_deref(), true)
        })?;
        Ok(status)
    }
}

/// Applies a signed write to the event store and read models. Runs inside
/// the write transaction.
fn commit_optimistic(conn: &Connection, op: &WriteOperation<'_>, signed: &SignedEvent) -> crate::error::Result<()> {
    let event = Event {
        id: signed.id.clone(),
        kind: signed.kind,
        author: signed.pubkey.clone(),
        created_at: signed.created_at,
        scope: op.scope.to_string(),
        forum_slug: event::forum_slug(&signed.tags),
        root_id: event::root_id(&signed.id, &signed.tags),
        content: signed.content.clone(),
        tags: signed.tags.clone(),
    };
    insert_new_events(conn, std::slice::from_ref(&event))?;

    match &op.projection {
        Projection::NewThread => put_thread_head(
            conn,
            &ThreadHead {
                root_id: event.id.clone(),
                scope: event.scope.clone(),
                forum_slug: event.forum_slug.clone(),
                title: thread_title(event.title(), &event.content, &event.id),
                author: event.author.clone(),
                last_activity_at: event.created_at,
                reply_count: 0,
            },
        ),
        Projection::Reply { root_id, forum_slug } => {
            let head = match get_thread_head(conn, &event.scope, root_id)? {
                Some(existing) => ThreadHead {
                    last_activity_at: existing.last_activity_at.max(event.created_at),
                    reply_count: existing.reply_count + 1,
                    ..existing
                },
                None => {
                    let root = get_event(conn, root_id)?;
                    ThreadHead {
                        root_id: root_id.clone(),
                        scope: event.scope.clone(),
                        forum_slug: root
                            .as_ref()
                            .map_or_else(|| forum_slug.clone(), |r| r.forum_slug.clone()),
                        title: match &root {
                            Some(r) => thread_title(r.title(), &r.content, root_id),
                            None => thread_title(None, "", root_id),
                        },
                        author: root
                            .as_ref()
                            .map_or_else(|| event.author.clone(), |r| r.author.clone()),
                        last_activity_at: event.created_at,
                        reply_count: 1,
                    }
                }
            };
            put_thread_head(conn, &head)
        }
        Projection::Reaction => {
            let record = ReactionRecord::from_event(&event).ok_or_else(|| {
                CacheError::InvalidRow(format!("reaction {} lacks a target or value", event.id))
            })?;
            insert_reaction_records(conn, &[record])
        }
        Projection::Report => {
            let records = LabelRecord::from_event(&event);
            if records.is_empty() {
                return Err(CacheError::InvalidRow(format!(
                    "report {} lacks a target or label",
                    event.id
                )));
            }
            insert_label_records(conn, &records)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::{PermissionsView, StaticPermissions};
    use crate::test_utils::{FixedClock, GatedPublisher, MockSigner};

    const ALL: PermissionsView = PermissionsView {
        can_post: true,
        can_react: true,
        can_moderate: true,
    };

    struct Harness {
        store: Arc<Store>,
        signer: Arc<MockSigner>,
        publisher: Arc<GatedPublisher>,
        service: WriteFlowService,
    }

    fn harness(view: PermissionsView) -> Harness {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let signer = Arc::new(MockSigner::default());
        let publisher = Arc::new(GatedPublisher::accepting());
        let service = WriteFlowService::new(store.clone())
            .with_signer(signer.clone())
            .with_publisher(publisher.clone())
            .with_permissions(Arc::new(StaticPermissions(view)))
            .with_clock(Arc::new(FixedClock::new(1_700_000_000_000)));
        Harness {
            store,
            signer,
            publisher,
            service,
        }
    }

    fn relays() -> Vec<String> {
        vec!["wss://relay.example".to_string()]
    }

    fn thread(content: &str) -> CreateThread {
        CreateThread {
            scope: "c1".to_string(),
            author: "alice".to_string(),
            destinations: relays(),
            content: content.to_string(),
            title: Some("  Welcome  ".to_string()),
            forum_slug: Some(" Meta ".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_thread_builds_tags_and_confirms() {
        let h = harness(ALL);
        let outcome = h.service.create_thread(thread(" Hello ")).await.unwrap();
        assert_eq!(outcome.status, PendingStatus::Confirmed);

        let signed = h.signer.signed();
        assert_eq!(signed.len(), 1);
        assert_eq!(
            signed[0].tags,
            vec![
                vec!["h".to_string(), "c1".to_string()],
                vec!["t".to_string(), "forum:meta".to_string()],
                vec!["title".to_string(), "Welcome".to_string()],
            ]
        );
        assert_eq!(signed[0].content, "Hello");
        assert_eq!(signed[0].created_at, 1_700_000_000);

        let heads = h.store.thread_list("c1", Some("meta")).unwrap();
        assert_eq!(heads.len(), 1);
        assert_eq!(heads[0].title, "Welcome");
        assert_eq!(heads[0].reply_count, 0);

        let pending = h.store.pending_write(&outcome.pending_id).unwrap().unwrap();
        assert_eq!(pending.attempt_count, 1);
        assert_eq!(pending.action, WriteAction::Thread);
    }

    #[tokio::test]
    async fn test_permission_denied_touches_nothing() {
        let h = harness(PermissionsView::default());
        let err = h.service.create_thread(thread("Hello")).await.unwrap_err();
        assert_eq!(err.reason(), "permission_denied");
        assert!(h.signer.signed().is_empty());
        assert_eq!(h.store.event_count().unwrap(), 0);
        assert_eq!(h.store.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sign_failure_touches_nothing() {
        let h = harness(ALL);
        h.signer.fail_with("wallet locked");
        let err = h.service.create_thread(thread("Hello")).await.unwrap_err();
        assert_eq!(err.reason(), "sign_failed");
        assert!(err.to_string().contains("wallet locked"));
        assert_eq!(h.store.event_count().unwrap(), 0);
        assert_eq!(h.store.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_short_circuits() {
        let signer = Arc::new(MockSigner::default());
        let service = WriteFlowService::new(Arc::new(Store::unavailable()))
            .with_signer(signer.clone())
            .with_permissions(Arc::new(StaticPermissions(ALL)));
        let err = service.create_thread(thread("Hello")).await.unwrap_err();
        assert_eq!(err.reason(), "db_unavailable");
        let err = service.retry_pending_write("w1", &relays()).await.unwrap_err();
        assert_eq!(err.reason(), "db_unavailable");
        assert!(signer.signed().is_empty());
    }

    #[tokio::test]
    async fn test_reply_links_root_and_parent() {
        let h = harness(ALL);
        let root = h.service.create_thread(thread("Root")).await.unwrap();
        let first = h
            .service
            .create_reply(CreateReply {
                scope: "c1".to_string(),
                author: "bob".to_string(),
                destinations: relays(),
                thread_id: root.event_id.clone(),
                content: "first".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        h.service
            .create_reply(CreateReply {
                scope: "c1".to_string(),
                author: "carol".to_string(),
                destinations: relays(),
                thread_id: root.event_id.clone(),
                reply_to: Some(first.event_id.clone()),
                content: "second".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let signed = h.signer.signed();
        assert_eq!(
            signed[1].tags[2],
            vec!["e".to_string(), root.event_id.clone(), String::new(), "root".to_string()]
        );
        assert_eq!(signed[1].tags.len(), 3);
        assert_eq!(
            signed[2].tags[3],
            vec!["e".to_string(), first.event_id.clone(), String::new(), "reply".to_string()]
        );

        let head = h.store.thread_head("c1", &root.event_id).unwrap().unwrap();
        assert_eq!(head.reply_count, 2);
        assert_eq!(head.author, "alice");
    }

    #[tokio::test]
    async fn test_reply_to_unknown_root_synthesizes_head() {
        let h = harness(ALL);
        h.service
            .create_reply(CreateReply {
                scope: "c1".to_string(),
                author: "bob".to_string(),
                destinations: relays(),
                thread_id: "abcdef0123456789".to_string(),
                content: "orphan".to_string(),
                forum_slug: Some("meta".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let head = h.store.thread_head("c1", "abcdef0123456789").unwrap().unwrap();
        assert_eq!(head.reply_count, 1);
        assert_eq!(head.author, "bob");
        assert_eq!(head.forum_slug, "meta");
        assert_eq!(head.title, "Thread abcdef01");
    }

    #[tokio::test]
    async fn test_reaction_and_report_inputs() {
        let h = harness(ALL);
        let err = h
            .service
            .create_reaction(CreateReaction {
                scope: "c1".to_string(),
                author: "alice".to_string(),
                destinations: relays(),
                target_id: "p1".to_string(),
                value: "   ".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "invalid_input");

        h.service
            .create_reaction(CreateReaction {
                scope: "c1".to_string(),
                author: "alice".to_string(),
                destinations: relays(),
                target_id: "p1".to_string(),
                value: " + ".to_string(),
            })
            .await
            .unwrap();
        h.service
            .create_report(CreateReport {
                scope: "c1".to_string(),
                author: "alice".to_string(),
                destinations: relays(),
                target_id: "p1".to_string(),
                reason: Some("  ".to_string()),
                label: None,
            })
            .await
            .unwrap();

        let signed = h.signer.signed();
        assert_eq!(signed[0].content, "+");
        assert_eq!(
            signed[1].tags,
            vec![
                vec!["h".to_string(), "c1".to_string()],
                vec!["e".to_string(), "p1".to_string()],
                vec!["t".to_string(), "mod:report".to_string()],
            ]
        );
        let reactions = h.store.reactions("c1", &["p1".to_string()]).unwrap();
        assert_eq!(reactions.len(), 1);
        let labels = h.store.moderation_labels("c1").unwrap();
        assert_eq!(labels[0].label, "mod:report");
        assert_eq!(labels[0].reason, None);
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_local_write() {
        let h = harness(ALL);
        h.publisher.reject_with("relay offline");
        let outcome = h.service.create_thread(thread("Hello")).await.unwrap();
        assert_eq!(outcome.status, PendingStatus::Failed);

        let pending = h.store.pending_write(&outcome.pending_id).unwrap().unwrap();
        assert_eq!(pending.attempt_count, 1);
        assert_eq!(pending.error_message.as_deref(), Some("relay offline"));
        assert_eq!(h.store.thread_list("c1", None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_republishes_same_payload() {
        let h = harness(ALL);
        h.publisher.reject_with("relay offline");
        let outcome = h.service.create_thread(thread("Hello")).await.unwrap();

        h.publisher.accept();
        let retried = h
            .service
            .retry_pending_write(&outcome.pending_id, &relays())
            .await
            .unwrap();
        assert_eq!(retried.status, PendingStatus::Confirmed);
        assert_eq!(retried.event_id, outcome.event_id);

        let published = h.publisher.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0], published[1]);
        assert_eq!(h.signer.signed().len(), 1);
        assert_eq!(h.store.event_count().unwrap(), 1);

        let pending = h.store.pending_write(&outcome.pending_id).unwrap().unwrap();
        assert_eq!(pending.attempt_count, 2);
        assert_eq!(pending.error_message, None);
    }

    #[tokio::test]
    async fn test_retry_unknown_write_is_invalid() {
        let h = harness(ALL);
        let err = h.service.retry_pending_write("missing", &relays()).await.unwrap_err();
        assert_eq!(err.reason(), "invalid_pending_write");
    }

    #[tokio::test]
    async fn test_retry_corrupt_payload_is_invalid() {
        let h = harness(ALL);
        h.publisher.reject_with("relay offline");
        let outcome = h.service.create_thread(thread("Hello")).await.unwrap();
        h.store
            .write("c1", |conn| {
                conn.execute(
                    "UPDATE pending_writes SET signed_payload = ? WHERE id = ?",
                    duckdb::params!["{\"id\": 42", outcome.pending_id],
                )?;
                Ok(())
            })
            .unwrap();

        h.publisher.accept();
        let err = h
            .service
            .retry_pending_write(&outcome.pending_id, &relays())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "invalid_pending_write");
        assert_eq!(h.publisher.published().len(), 1);

        let pending = h.store.pending_write(&outcome.pending_id).unwrap().unwrap();
        assert_eq!(pending.status, PendingStatus::Failed);
        assert_eq!(pending.attempt_count, 1);
        assert_eq!(pending.error_message.as_deref(), Some("relay offline"));
    }
}
