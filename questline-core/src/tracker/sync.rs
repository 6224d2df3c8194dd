//! Full-graph replacement and the recompute that follows it.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::access::{Actor, can_edit_quest_blueprint};
use crate::error::{ConflictError, NotFoundError, PermissionError, Result};
use crate::graph::{QuestGraph, validate_payload};
use crate::store::QuestStore;
use crate::types::{
    AssignmentFilter, AssignmentId, Blueprint, BlueprintId, GraphPayload, GuildId, LinkId,
    NodeId, NodeInput, NodeProgress, Position, QuestLink, QuestNode, new_id,
};
use crate::value::{IS_GROUP_KEY, QuestValue};

use super::derive::sync_group_progress;
use super::summary::refresh_assignment_summary;
use super::{QuestTracker, load_guild_blueprint};

/// What a graph replacement changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GraphSyncReport {
    pub nodes_created: usize,
    pub nodes_updated: usize,
    pub nodes_deleted: u64,
    pub links: usize,
    pub progress_seeded: usize,
    pub assignments_recomputed: usize,
    pub graph_revision: u64,
}

impl QuestTracker {
    /// Replace a blueprint's whole node/link set.
    ///
    /// The payload is validated before the transaction starts. Nodes are
    /// matched by id: new ids are created, known ids updated in place and
    /// missing ids deleted along with their links and progress rows. Every
    /// assignment of the blueprint then gets rows for the new nodes and has
    /// its group rows and summary recomputed.
    #[instrument(skip_all, name = "graph_upsert", fields(blueprint = %blueprint_id))]
    pub async fn upsert_graph(
        &self,
        guild_id: &GuildId,
        blueprint_id: &BlueprintId,
        actor: &Actor,
        payload: &GraphPayload,
    ) -> Result<GraphSyncReport> {
        validate_payload(payload, self.config.graph.reject_cycles)?;

        let _gate = self.gate.lock().await;
        self.store.begin_transaction().await?;
        let result = self
            .upsert_graph_tx(guild_id, blueprint_id, actor, payload)
            .await;
        let report = self.finish(result).await?;

        info!(
            created = report.nodes_created,
            updated = report.nodes_updated,
            deleted = report.nodes_deleted,
            links = report.links,
            seeded = report.progress_seeded,
            assignments = report.assignments_recomputed,
            revision = report.graph_revision,
            "Quest graph replaced"
        );
        Ok(report)
    }

    async fn upsert_graph_tx(
        &self,
        guild_id: &GuildId,
        blueprint_id: &BlueprintId,
        actor: &Actor,
        payload: &GraphPayload,
    ) -> Result<GraphSyncReport> {
        let store = self.store();
        let mut blueprint = load_guild_blueprint(store, guild_id, blueprint_id).await?;
        if !can_edit_quest_blueprint(actor.role, &actor.user_id, &blueprint.created_by) {
            return Err(PermissionError::BlueprintEdit(actor.user_id.clone()).into());
        }
        if let Some(expected) = payload.expected_revision {
            if expected != blueprint.graph_revision {
                return Err(ConflictError::StaleRevision {
                    expected,
                    actual: blueprint.graph_revision,
                }
                .into());
            }
        }

        let now = Utc::now();
        let mut report = GraphSyncReport::default();

        let existing: HashMap<NodeId, QuestNode> = store
            .list_nodes(blueprint_id)
            .await?
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();

        let mut created = Vec::new();
        for input in &payload.nodes {
            match existing.get(&input.id) {
                Some(current) => {
                    let next = self.build_node(blueprint_id, input, current.created_at, now);
                    if !same_content(current, &next) {
                        store.update_node(&next).await?;
                        report.nodes_updated += 1;
                    }
                }
                None => {
                    let node = self.build_node(blueprint_id, input, now, now);
                    store.insert_node(&node).await?;
                    created.push(node);
                }
            }
        }
        report.nodes_created = created.len();

        let keep: HashSet<&NodeId> = payload.nodes.iter().map(|n| &n.id).collect();
        let stale: Vec<NodeId> = existing
            .keys()
            .filter(|id| !keep.contains(id))
            .cloned()
            .collect();
        report.nodes_deleted = store.delete_nodes(blueprint_id, &stale).await?;

        let links: Vec<QuestLink> = payload
            .links
            .iter()
            .map(|l| QuestLink {
                id: l
                    .id
                    .clone()
                    .filter(|id| !id.as_str().trim().is_empty())
                    .unwrap_or_else(new_id::<LinkId>),
                blueprint_id: blueprint_id.clone(),
                parent_node_id: l.parent_node_id.clone(),
                child_node_id: l.child_node_id.clone(),
                conditions: l.conditions.clone(),
            })
            .collect();
        store.replace_links(blueprint_id, &links).await?;
        report.links = links.len();

        let assignment_ids: Vec<AssignmentId> = store
            .find_assignments(&AssignmentFilter::for_blueprint(blueprint_id))
            .await?
            .into_iter()
            .map(|a| a.id)
            .collect();

        if !created.is_empty() && !assignment_ids.is_empty() {
            let seeds: Vec<NodeProgress> = assignment_ids
                .iter()
                .flat_map(|aid| created.iter().map(move |n| NodeProgress::seed(aid, n, now)))
                .collect();
            store.insert_progress_batch(&seeds).await?;
            report.progress_seeded = seeds.len();
        }

        report.assignments_recomputed =
            recompute_with_time(store, blueprint_id, &assignment_ids, now).await?;

        stamp_editor(&mut blueprint, actor, now);
        blueprint.graph_revision += 1;
        store.update_blueprint(&blueprint).await?;
        report.graph_revision = blueprint.graph_revision;

        Ok(report)
    }

    fn build_node(
        &self,
        blueprint_id: &BlueprintId,
        input: &NodeInput,
        created_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> QuestNode {
        let mut metadata = input.metadata.clone();
        if input.is_group() {
            metadata.insert(IS_GROUP_KEY.to_string(), QuestValue::Bool(true));
        } else {
            metadata.remove(IS_GROUP_KEY);
        }

        QuestNode {
            id: input.id.clone(),
            blueprint_id: blueprint_id.clone(),
            title: input.title.trim().to_string(),
            description: input.description.clone(),
            node_type: input.node_type,
            position: Position::clamped(
                input.position.x,
                input.position.y,
                self.config.graph.position_limit,
            ),
            sort_order: input.sort_order,
            requirements: input.requirements.clone(),
            metadata,
            created_at,
            updated_at: now,
        }
    }
}

/// Equal apart from timestamps.
fn same_content(a: &QuestNode, b: &QuestNode) -> bool {
    a.title == b.title
        && a.description == b.description
        && a.node_type == b.node_type
        && a.position == b.position
        && a.sort_order == b.sort_order
        && a.requirements == b.requirements
        && a.metadata == b.metadata
}

pub(crate) fn stamp_editor(blueprint: &mut Blueprint, actor: &Actor, now: DateTime<Utc>) {
    blueprint.last_edited_by = Some(actor.user_id.clone());
    blueprint.last_edited_by_name = actor.display_name.clone();
    blueprint.updated_at = now;
}

/// Re-derive group rows and summaries for each assignment, one at a time.
///
/// The blueprint graph is loaded once and shared across all assignments.
/// Returns the number of assignments processed.
pub async fn recompute_assignments(
    store: &dyn QuestStore,
    blueprint_id: &BlueprintId,
    assignment_ids: &[AssignmentId],
) -> Result<usize> {
    recompute_with_time(store, blueprint_id, assignment_ids, Utc::now()).await
}

async fn recompute_with_time(
    store: &dyn QuestStore,
    blueprint_id: &BlueprintId,
    assignment_ids: &[AssignmentId],
    now: DateTime<Utc>,
) -> Result<usize> {
    if assignment_ids.is_empty() {
        return Ok(0);
    }

    let nodes = store.list_nodes(blueprint_id).await?;
    let links = store.list_links(blueprint_id).await?;
    let graph = QuestGraph::from_stored(&nodes, &links);

    for assignment_id in assignment_ids {
        sync_group_progress(store, &graph, assignment_id, now).await?;
        let mut assignment = store
            .get_assignment(assignment_id)
            .await?
            .ok_or_else(|| NotFoundError::Assignment(assignment_id.clone()))?;
        refresh_assignment_summary(store, &mut assignment, now).await?;
    }

    debug!(
        blueprint = %blueprint_id,
        assignments = assignment_ids.len(),
        nodes = graph.node_count(),
        "Recomputed assignment progress"
    );
    Ok(assignment_ids.len())
}
