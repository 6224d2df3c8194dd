use chrono::{DateTime, Utc};

use crate::store::QuestStore;
use crate::types::{Assignment, NodeProgress, ProgressStatus, ProgressSummary};

/// Count every progress row of an assignment by status, group rows included.
pub fn build_progress_summary(rows: &[NodeProgress]) -> ProgressSummary {
    let mut summary = ProgressSummary {
        total_nodes: u32::try_from(rows.len()).unwrap_or(u32::MAX),
        ..ProgressSummary::default()
    };
    for row in rows {
        match row.status {
            ProgressStatus::Completed => summary.completed += 1,
            ProgressStatus::InProgress => summary.in_progress += 1,
            ProgressStatus::Blocked => summary.blocked += 1,
            ProgressStatus::NotStarted => summary.not_started += 1,
        }
    }
    if summary.total_nodes > 0 {
        let ratio = f64::from(summary.completed) / f64::from(summary.total_nodes);
        summary.percent_complete = (ratio * 10_000.0).round() / 10_000.0;
    }
    summary
}

/// Recompute the summary snapshot from the stored rows and persist it when
/// it changed.
pub async fn refresh_assignment_summary(
    store: &dyn QuestStore,
    assignment: &mut Assignment,
    now: DateTime<Utc>,
) -> crate::error::Result<ProgressSummary> {
    let rows = store.list_progress(&assignment.id).await?;
    let summary = build_progress_summary(&rows);
    if assignment.progress_summary != summary {
        assignment.progress_summary = summary;
        assignment.updated_at = now;
        store.update_assignment(assignment).await?;
    }
    Ok(summary)
}
