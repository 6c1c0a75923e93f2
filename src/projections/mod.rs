//! Pure read-model derivations over the event population.
//!
//! Every function here is deterministic and leaves its input untouched, so
//! replaying a sync over the same events yields identical output. Maps are
//! `BTreeMap` for the same reason.

pub mod labels;
pub mod reactions;
pub mod thread_heads;

pub use labels::{group_labels, normalize_labels, project_labels, LabelRecord, LabelsByTarget};
pub use reactions::{
    aggregate_reaction_counts, dedupe_latest_reactions, normalize_reactions,
    project_reaction_counts, ReactionCounts, ReactionRecord,
};
pub use thread_heads::{project_thread_heads, thread_title, ThreadHead};

use std::cmp::Ordering;

/// Ascending (created_at, id) order used for every tie-break.
pub(crate) fn by_time_then_id(a: (i64, &str), b: (i64, &str)) -> Ordering {
    a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1))
}
