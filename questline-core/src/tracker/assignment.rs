use std::collections::HashMap;

use chrono::Utc;
use tracing::{debug, info, instrument};

use crate::access::Actor;
use crate::error::{
    ConflictError, NotFoundError, PermissionError, Result, ValidationError,
};
use crate::graph::QuestGraph;
use crate::types::{
    Assignment, AssignmentFilter, AssignmentId, AssignmentStatus, BlueprintId, GuildId,
    NodeProgress, ProgressStatus, ProgressSummary, ProgressUpdate, UserId, new_id,
};
use crate::value::clamp_count;

use super::derive::sync_group_progress;
use super::summary::refresh_assignment_summary;
use super::{AssignmentView, QuestTracker, hydrate, load_guild_assignment, load_guild_blueprint};

impl QuestTracker {
    /// Start the actor's run of a blueprint, seeding one progress row per node.
    #[instrument(skip_all, name = "assignment_start", fields(blueprint = %blueprint_id))]
    pub async fn start_assignment(
        &self,
        guild_id: &GuildId,
        blueprint_id: &BlueprintId,
        actor: &Actor,
    ) -> Result<AssignmentView> {
        let _gate = self.gate.lock().await;
        self.store.begin_transaction().await?;
        let result = self.start_assignment_tx(guild_id, blueprint_id, actor).await;
        let view = self.finish(result).await?;

        info!(
            assignment = %view.assignment.id,
            user = %actor.user_id,
            nodes = view.progress.len(),
            "Quest assignment started"
        );
        Ok(view)
    }

    async fn start_assignment_tx(
        &self,
        guild_id: &GuildId,
        blueprint_id: &BlueprintId,
        actor: &Actor,
    ) -> Result<AssignmentView> {
        let store = self.store();
        let blueprint = load_guild_blueprint(store, guild_id, blueprint_id).await?;
        if actor.role.is_none() {
            return Err(PermissionError::NotMember(actor.user_id.clone()).into());
        }
        if blueprint.is_archived {
            return Err(ValidationError::ArchivedBlueprint(blueprint_id.clone()).into());
        }
        if self
            .has_open_assignment(blueprint_id, &actor.user_id, None)
            .await?
        {
            return Err(ConflictError::ActiveAssignment {
                blueprint: blueprint_id.clone(),
                user: actor.user_id.clone(),
            }
            .into());
        }

        let now = Utc::now();
        let mut assignment = Assignment {
            id: new_id(),
            blueprint_id: blueprint_id.clone(),
            guild_id: guild_id.clone(),
            user_id: actor.user_id.clone(),
            status: AssignmentStatus::Active,
            started_at: now,
            completed_at: None,
            cancelled_at: None,
            last_progress_at: None,
            progress_summary: ProgressSummary::default(),
            created_at: now,
            updated_at: now,
        };
        store.insert_assignment(&assignment).await?;

        let nodes = store.list_nodes(blueprint_id).await?;
        let seeds: Vec<NodeProgress> = nodes
            .iter()
            .map(|n| NodeProgress::seed(&assignment.id, n, now))
            .collect();
        store.insert_progress_batch(&seeds).await?;

        let links = store.list_links(blueprint_id).await?;
        let graph = QuestGraph::from_stored(&nodes, &links);
        sync_group_progress(store, &graph, &assignment.id, now).await?;
        refresh_assignment_summary(store, &mut assignment, now).await?;

        hydrate(store, assignment, actor.display_name.clone()).await
    }

    /// Move an assignment to another status. Setting the current status is a no-op.
    #[instrument(skip_all, name = "assignment_status", fields(assignment = %assignment_id))]
    pub async fn update_assignment_status(
        &self,
        guild_id: &GuildId,
        assignment_id: &AssignmentId,
        actor: &Actor,
        next: AssignmentStatus,
    ) -> Result<AssignmentView> {
        let _gate = self.gate.lock().await;
        self.store.begin_transaction().await?;
        let result = self
            .update_assignment_status_tx(guild_id, assignment_id, actor, next)
            .await;
        let view = self.finish(result).await?;

        info!(status = %view.assignment.status, "Quest assignment status set");
        Ok(view)
    }

    async fn update_assignment_status_tx(
        &self,
        guild_id: &GuildId,
        assignment_id: &AssignmentId,
        actor: &Actor,
        next: AssignmentStatus,
    ) -> Result<AssignmentView> {
        let store = self.store();
        let mut assignment = load_guild_assignment(store, guild_id, assignment_id).await?;
        if !actor.can_act_for(&assignment.user_id) {
            return Err(PermissionError::AssignmentUpdate(actor.user_id.clone()).into());
        }
        let owner_name = owner_name(actor, &assignment.user_id);

        if assignment.status == next {
            debug!(status = %next, "Status unchanged");
            return hydrate(store, assignment, owner_name).await;
        }

        if next.is_open()
            && !assignment.status.is_open()
            && self
                .has_open_assignment(
                    &assignment.blueprint_id,
                    &assignment.user_id,
                    Some(&assignment.id),
                )
                .await?
        {
            return Err(ConflictError::ActiveAssignment {
                blueprint: assignment.blueprint_id.clone(),
                user: assignment.user_id.clone(),
            }
            .into());
        }

        let now = Utc::now();
        match next {
            AssignmentStatus::Completed => {
                assignment.completed_at = Some(now);
                assignment.cancelled_at = None;
            }
            AssignmentStatus::Cancelled => {
                assignment.cancelled_at = Some(now);
                assignment.completed_at = None;
            }
            AssignmentStatus::Active | AssignmentStatus::Paused => {
                assignment.completed_at = None;
                assignment.cancelled_at = None;
            }
        }
        assignment.status = next;
        assignment.updated_at = now;
        store.update_assignment(&assignment).await?;

        hydrate(store, assignment, owner_name).await
    }

    /// Apply a batch of leaf progress changes, then re-derive groups and the summary.
    ///
    /// Updates aimed at group nodes are skipped; their rows are derived.
    #[instrument(skip_all, name = "assignment_progress", fields(assignment = %assignment_id))]
    pub async fn apply_progress_updates(
        &self,
        guild_id: &GuildId,
        assignment_id: &AssignmentId,
        actor: &Actor,
        updates: &[ProgressUpdate],
    ) -> Result<AssignmentView> {
        if updates.is_empty() {
            return Err(ValidationError::EmptyUpdateBatch.into());
        }

        let _gate = self.gate.lock().await;
        self.store.begin_transaction().await?;
        let result = self
            .apply_progress_updates_tx(guild_id, assignment_id, actor, updates)
            .await;
        let view = self.finish(result).await?;

        info!(
            updates = updates.len(),
            percent = view.assignment.progress_summary.percent_complete,
            "Quest progress applied"
        );
        Ok(view)
    }

    async fn apply_progress_updates_tx(
        &self,
        guild_id: &GuildId,
        assignment_id: &AssignmentId,
        actor: &Actor,
        updates: &[ProgressUpdate],
    ) -> Result<AssignmentView> {
        let store = self.store();
        let mut assignment = load_guild_assignment(store, guild_id, assignment_id).await?;
        if !actor.can_act_for(&assignment.user_id) {
            return Err(PermissionError::AssignmentUpdate(actor.user_id.clone()).into());
        }

        let nodes = store.list_nodes(&assignment.blueprint_id).await?;
        let links = store.list_links(&assignment.blueprint_id).await?;
        let graph = QuestGraph::from_stored(&nodes, &links);

        let mut rows: HashMap<_, NodeProgress> = store
            .list_progress(&assignment.id)
            .await?
            .into_iter()
            .map(|r| (r.node_id.clone(), r))
            .collect();

        let now = Utc::now();
        let max_note = self.config.progress.max_note_chars;
        for update in updates {
            if graph.is_group(&update.node_id) {
                debug!(node = %update.node_id, "Ignoring update to group node");
                continue;
            }
            let row = rows
                .get_mut(&update.node_id)
                .ok_or_else(|| NotFoundError::Node(update.node_id.clone()))?;

            let before = row.clone();
            apply_update(row, update, max_note, now);
            if *row != before {
                row.updated_at = now;
                store.update_progress(row).await?;
            }
        }

        sync_group_progress(store, &graph, &assignment.id, now).await?;
        refresh_assignment_summary(store, &mut assignment, now).await?;
        assignment.last_progress_at = Some(now);
        assignment.updated_at = now;
        store.update_assignment(&assignment).await?;

        let owner_name = owner_name(actor, &assignment.user_id);
        hydrate(store, assignment, owner_name).await
    }

    async fn has_open_assignment(
        &self,
        blueprint_id: &BlueprintId,
        user_id: &UserId,
        except: Option<&AssignmentId>,
    ) -> Result<bool> {
        let open = self
            .store()
            .find_assignments(&AssignmentFilter {
                blueprint_id: Some(blueprint_id.clone()),
                user_id: Some(user_id.clone()),
                statuses: AssignmentStatus::OPEN.to_vec(),
                ..AssignmentFilter::default()
            })
            .await?;
        Ok(open.iter().any(|a| Some(&a.id) != except))
    }
}

fn owner_name(actor: &Actor, owner: &UserId) -> Option<String> {
    if &actor.user_id == owner {
        actor.display_name.clone()
    } else {
        None
    }
}

/// Apply one update to a leaf row in memory.
fn apply_update(
    row: &mut NodeProgress,
    update: &ProgressUpdate,
    max_note_chars: usize,
    now: chrono::DateTime<Utc>,
) {
    if let Some(status) = update.status.filter(|s| *s != row.status) {
        if status == ProgressStatus::InProgress && row.started_at.is_none() {
            row.started_at = Some(now);
        }
        row.completed_at = (status == ProgressStatus::Completed).then_some(now);
        row.status = status;
    }

    if let Some(count) = update.progress_count {
        row.progress_count = clamp_count(count.trunc());
    }

    if let Some(notes) = &update.notes {
        row.notes = notes
            .as_ref()
            .map(|n| n.chars().take(max_note_chars).collect());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::access::GuildRole;
    use crate::config::QuestConfig;
    use crate::error::QuestError;
    use crate::store::sqlite::SqliteStore;
    use crate::types::{
        BlueprintPatch, GraphPayload, LinkInput, NewBlueprint, NodeId, NodeInput, NodeType,
        PositionInput,
    };
    use crate::value::{Attributes, QuestValue};

    const GUILD: &str = "guild-1";

    fn leader() -> Actor {
        Actor::new("leader", Some(GuildRole::Leader))
    }

    fn raider(id: &str) -> Actor {
        Actor::new(id, Some(GuildRole::Raider)).with_display_name(id.to_uppercase())
    }

    fn node(id: &str, group: bool, count: f64) -> NodeInput {
        NodeInput {
            id: NodeId::from(id),
            title: id.to_string(),
            description: None,
            node_type: NodeType::Kill,
            position: PositionInput::default(),
            sort_order: 0,
            requirements: Attributes::from([("count".to_string(), QuestValue::Number(count))]),
            metadata: Attributes::new(),
            is_group: Some(group),
        }
    }

    async fn setup() -> (QuestTracker, BlueprintId) {
        let store = SqliteStore::in_memory().unwrap();
        let tracker = QuestTracker::new(Arc::new(store), QuestConfig::default());
        let guild = GuildId::from(GUILD);
        let bp = tracker
            .create_blueprint(
                &guild,
                &leader(),
                NewBlueprint {
                    title: "Ring quest".into(),
                    ..NewBlueprint::default()
                },
            )
            .await
            .unwrap();
        let payload = GraphPayload {
            nodes: vec![node("a", false, 10.0), node("b", false, 2.7), node("g", true, 0.0)],
            links: vec![
                LinkInput {
                    id: None,
                    parent_node_id: NodeId::from("g"),
                    child_node_id: NodeId::from("a"),
                    conditions: Attributes::new(),
                },
                LinkInput {
                    id: None,
                    parent_node_id: NodeId::from("g"),
                    child_node_id: NodeId::from("b"),
                    conditions: Attributes::new(),
                },
            ],
            expected_revision: None,
        };
        tracker
            .upsert_graph(&guild, &bp.id, &leader(), &payload)
            .await
            .unwrap();
        (tracker, bp.id)
    }

    fn update(node: &str, status: ProgressStatus) -> ProgressUpdate {
        ProgressUpdate {
            node_id: NodeId::from(node),
            status: Some(status),
            ..ProgressUpdate::default()
        }
    }

    #[tokio::test]
    async fn start_seeds_rows_with_target_counts() {
        let (tracker, bp) = setup().await;
        let view = tracker
            .start_assignment(&GuildId::from(GUILD), &bp, &raider("u1"))
            .await
            .unwrap();
        assert_eq!(view.progress.len(), 3);
        assert_eq!(view.owner_name.as_deref(), Some("U1"));
        let targets: HashMap<&str, u32> = view
            .progress
            .iter()
            .map(|p| (p.node_id.as_str(), p.target_count))
            .collect();
        assert_eq!(targets["a"], 10);
        assert_eq!(targets["b"], 2);
        // Group target is its child count
        assert_eq!(targets["g"], 2);
        assert_eq!(view.assignment.progress_summary.total_nodes, 3);
        assert_eq!(view.assignment.progress_summary.not_started, 3);
    }

    #[tokio::test]
    async fn second_open_start_conflicts() {
        let (tracker, bp) = setup().await;
        let guild = GuildId::from(GUILD);
        tracker.start_assignment(&guild, &bp, &raider("u1")).await.unwrap();
        let err = tracker
            .start_assignment(&guild, &bp, &raider("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::Conflict(ConflictError::ActiveAssignment { .. })));
        let stats = tracker.store().stats().await.unwrap();
        assert_eq!(stats.assignments, 1);
        assert_eq!(stats.progress_rows, 3);
    }

    #[tokio::test]
    async fn archived_blueprints_cannot_be_started() {
        let (tracker, bp) = setup().await;
        let guild = GuildId::from(GUILD);
        tracker
            .update_blueprint_metadata(
                &guild,
                &bp,
                &leader(),
                BlueprintPatch {
                    is_archived: Some(true),
                    ..BlueprintPatch::default()
                },
            )
            .await
            .unwrap();
        let err = tracker
            .start_assignment(&guild, &bp, &raider("u1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QuestError::Validation(ValidationError::ArchivedBlueprint(_))
        ));
    }

    #[tokio::test]
    async fn foreign_guild_sees_not_found() {
        let (tracker, bp) = setup().await;
        let err = tracker
            .start_assignment(&GuildId::from("other"), &bp, &raider("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::NotFound(NotFoundError::Blueprint(_))));
    }

    #[tokio::test]
    async fn status_transitions_stamp_and_clear_timestamps() {
        let (tracker, bp) = setup().await;
        let guild = GuildId::from(GUILD);
        let view = tracker.start_assignment(&guild, &bp, &raider("u1")).await.unwrap();
        let id = view.assignment.id;

        let done = tracker
            .update_assignment_status(&guild, &id, &raider("u1"), AssignmentStatus::Completed)
            .await
            .unwrap();
        assert!(done.assignment.completed_at.is_some());
        assert!(done.assignment.cancelled_at.is_none());

        let cancelled = tracker
            .update_assignment_status(&guild, &id, &leader(), AssignmentStatus::Cancelled)
            .await
            .unwrap();
        assert!(cancelled.assignment.completed_at.is_none());
        assert!(cancelled.assignment.cancelled_at.is_some());
        assert!(cancelled.owner_name.is_none());

        let same = tracker
            .update_assignment_status(&guild, &id, &leader(), AssignmentStatus::Cancelled)
            .await
            .unwrap();
        assert_eq!(same.assignment, cancelled.assignment);

        let reopened = tracker
            .update_assignment_status(&guild, &id, &raider("u1"), AssignmentStatus::Paused)
            .await
            .unwrap();
        assert!(reopened.assignment.completed_at.is_none());
        assert!(reopened.assignment.cancelled_at.is_none());
    }

    #[tokio::test]
    async fn other_members_cannot_touch_an_assignment() {
        let (tracker, bp) = setup().await;
        let guild = GuildId::from(GUILD);
        let view = tracker.start_assignment(&guild, &bp, &raider("u1")).await.unwrap();
        let err = tracker
            .update_assignment_status(
                &guild,
                &view.assignment.id,
                &raider("u2"),
                AssignmentStatus::Paused,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::Permission(_)));

        let err = tracker
            .apply_progress_updates(
                &guild,
                &view.assignment.id,
                &raider("u2"),
                &[update("a", ProgressStatus::Completed)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::Permission(_)));
    }

    #[tokio::test]
    async fn reopening_while_another_run_is_open_conflicts() {
        let (tracker, bp) = setup().await;
        let guild = GuildId::from(GUILD);
        let first = tracker.start_assignment(&guild, &bp, &raider("u1")).await.unwrap();
        tracker
            .update_assignment_status(
                &guild,
                &first.assignment.id,
                &raider("u1"),
                AssignmentStatus::Cancelled,
            )
            .await
            .unwrap();
        tracker.start_assignment(&guild, &bp, &raider("u1")).await.unwrap();

        let err = tracker
            .update_assignment_status(
                &guild,
                &first.assignment.id,
                &raider("u1"),
                AssignmentStatus::Active,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::Conflict(_)));
    }

    #[tokio::test]
    async fn progress_updates_stamp_and_derive() {
        let (tracker, bp) = setup().await;
        let guild = GuildId::from(GUILD);
        let actor = raider("u1");
        let view = tracker.start_assignment(&guild, &bp, &actor).await.unwrap();
        let id = view.assignment.id;

        let view = tracker
            .apply_progress_updates(
                &guild,
                &id,
                &actor,
                &[
                    update("a", ProgressStatus::InProgress),
                    ProgressUpdate {
                        node_id: NodeId::from("a"),
                        progress_count: Some(-4.0),
                        notes: Some(Some("x".repeat(600))),
                        ..ProgressUpdate::default()
                    },
                ],
            )
            .await
            .unwrap();
        let a = view.progress.iter().find(|p| p.node_id.as_str() == "a").unwrap();
        assert_eq!(a.status, ProgressStatus::InProgress);
        assert!(a.started_at.is_some());
        assert_eq!(a.progress_count, 0);
        assert_eq!(a.notes.as_ref().map(|n| n.chars().count()), Some(500));
        let g = view.progress.iter().find(|p| p.node_id.as_str() == "g").unwrap();
        assert_eq!(g.status, ProgressStatus::InProgress);
        assert!(view.assignment.last_progress_at.is_some());

        let view = tracker
            .apply_progress_updates(
                &guild,
                &id,
                &actor,
                &[
                    update("a", ProgressStatus::Completed),
                    update("b", ProgressStatus::Completed),
                    ProgressUpdate {
                        node_id: NodeId::from("a"),
                        notes: Some(None),
                        ..ProgressUpdate::default()
                    },
                ],
            )
            .await
            .unwrap();
        let a = view.progress.iter().find(|p| p.node_id.as_str() == "a").unwrap();
        assert!(a.completed_at.is_some());
        assert!(a.notes.is_none());
        let g = view.progress.iter().find(|p| p.node_id.as_str() == "g").unwrap();
        assert_eq!(g.status, ProgressStatus::Completed);
        assert_eq!(g.progress_count, 2);
        assert!((view.assignment.progress_summary.percent_complete - 1.0).abs() < f64::EPSILON);

        let view = tracker
            .apply_progress_updates(&guild, &id, &actor, &[update("a", ProgressStatus::Blocked)])
            .await
            .unwrap();
        let a = view.progress.iter().find(|p| p.node_id.as_str() == "a").unwrap();
        assert!(a.completed_at.is_none());
        let g = view.progress.iter().find(|p| p.node_id.as_str() == "g").unwrap();
        assert_eq!(g.status, ProgressStatus::Blocked);
        assert!(g.completed_at.is_none());
    }

    #[tokio::test]
    async fn fractional_counts_are_truncated() {
        let (tracker, bp) = setup().await;
        let guild = GuildId::from(GUILD);
        let actor = raider("u1");
        let view = tracker.start_assignment(&guild, &bp, &actor).await.unwrap();
        let id = view.assignment.id;

        let counted = |node: &str, count: f64| ProgressUpdate {
            node_id: NodeId::from(node),
            progress_count: Some(count),
            ..ProgressUpdate::default()
        };
        let view = tracker
            .apply_progress_updates(&guild, &id, &actor, &[counted("a", 2.7), counted("b", -0.5)])
            .await
            .unwrap();
        let a = view.progress.iter().find(|p| p.node_id.as_str() == "a").unwrap();
        assert_eq!(a.progress_count, 2);
        let b = view.progress.iter().find(|p| p.node_id.as_str() == "b").unwrap();
        assert_eq!(b.progress_count, 0);
    }

    #[tokio::test]
    async fn group_updates_are_ignored_and_unknown_nodes_fail() {
        let (tracker, bp) = setup().await;
        let guild = GuildId::from(GUILD);
        let actor = raider("u1");
        let view = tracker.start_assignment(&guild, &bp, &actor).await.unwrap();
        let id = view.assignment.id;

        let after = tracker
            .apply_progress_updates(&guild, &id, &actor, &[update("g", ProgressStatus::Completed)])
            .await
            .unwrap();
        let g = after.progress.iter().find(|p| p.node_id.as_str() == "g").unwrap();
        assert_eq!(g.status, ProgressStatus::NotStarted);

        let err = tracker
            .apply_progress_updates(&guild, &id, &actor, &[update("zz", ProgressStatus::Completed)])
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::NotFound(NotFoundError::Node(_))));

        let err = tracker
            .apply_progress_updates(&guild, &id, &actor, &[])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QuestError::Validation(ValidationError::EmptyUpdateBatch)
        ));
    }

    #[tokio::test]
    async fn failed_batch_rolls_back_earlier_updates() {
        let (tracker, bp) = setup().await;
        let guild = GuildId::from(GUILD);
        let actor = raider("u1");
        let view = tracker.start_assignment(&guild, &bp, &actor).await.unwrap();

        tracker
            .apply_progress_updates(
                &guild,
                &view.assignment.id,
                &actor,
                &[
                    update("a", ProgressStatus::Completed),
                    update("missing", ProgressStatus::Completed),
                ],
            )
            .await
            .unwrap_err();

        let rows = tracker.store().list_progress(&view.assignment.id).await.unwrap();
        assert!(rows.iter().all(|r| r.status == ProgressStatus::NotStarted));
    }
}
