//! Group node status derivation.
//!
//! A group node's progress is never written by participants. It is
//! recomputed from scratch from its direct link-children every time the
//! assignment or the graph changes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::graph::QuestGraph;
use crate::store::QuestStore;
use crate::types::{AssignmentId, NodeId, ProgressStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupDerivation {
    pub status: ProgressStatus,
    /// Number of children in `Completed`.
    pub completed: u32,
}

/// Aggregate child statuses into the group's status.
///
/// A group with no children counts as complete.
pub fn derive_group_status(children: &[ProgressStatus]) -> GroupDerivation {
    let completed = children
        .iter()
        .filter(|s| **s == ProgressStatus::Completed)
        .count();
    let completed_u32 = u32::try_from(completed).unwrap_or(u32::MAX);

    let status = if completed == children.len() {
        ProgressStatus::Completed
    } else if children.contains(&ProgressStatus::Blocked) {
        ProgressStatus::Blocked
    } else if completed > 0 || children.contains(&ProgressStatus::InProgress) {
        ProgressStatus::InProgress
    } else {
        ProgressStatus::NotStarted
    };

    GroupDerivation {
        status,
        completed: completed_u32,
    }
}

/// Rewrite every group node's progress row of one assignment.
///
/// Children without a progress row count as `NotStarted`. Rows that already
/// hold the derived values are left untouched. Returns the number of rows
/// written.
pub async fn sync_group_progress(
    store: &dyn QuestStore,
    graph: &QuestGraph,
    assignment_id: &AssignmentId,
    now: DateTime<Utc>,
) -> crate::error::Result<usize> {
    if graph.group_nodes().next().is_none() {
        return Ok(0);
    }

    let rows = store.list_progress(assignment_id).await?;
    let statuses: HashMap<&NodeId, ProgressStatus> =
        rows.iter().map(|r| (&r.node_id, r.status)).collect();

    let mut written = 0;
    for group_id in graph.group_nodes() {
        let Some(current) = rows.iter().find(|r| &r.node_id == group_id) else {
            debug!(node = %group_id, assignment = %assignment_id, "Group node has no progress row");
            continue;
        };

        let children = graph.direct_children(group_id);
        let child_statuses: Vec<ProgressStatus> = children
            .iter()
            .map(|c| statuses.get(c).copied().unwrap_or_default())
            .collect();
        let derived = derive_group_status(&child_statuses);
        let target = u32::try_from(children.len()).unwrap_or(u32::MAX);

        let completed_at = if derived.status == ProgressStatus::Completed {
            current.completed_at.or(Some(now))
        } else {
            None
        };

        if current.status == derived.status
            && current.progress_count == derived.completed
            && current.target_count == target
            && current.completed_at == completed_at
        {
            continue;
        }

        let mut next = current.clone();
        next.status = derived.status;
        next.progress_count = derived.completed;
        next.target_count = target;
        next.completed_at = completed_at;
        next.updated_at = now;
        store.update_progress(&next).await?;
        written += 1;
    }

    if written > 0 {
        debug!(assignment = %assignment_id, written, "Synced group progress");
    }
    Ok(written)
}
