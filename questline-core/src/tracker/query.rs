//! Read-only views over blueprints and their assignments.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, instrument};

use crate::access::{Actor, IdentityResolver};
use crate::error::Result;
use crate::store::QuestStore;
use crate::types::{
    Assignment, AssignmentCounts, AssignmentFilter, AssignmentOrder, AssignmentStatus, Blueprint,
    BlueprintId, GuildId, QuestLink, QuestNode,
};

use super::{AssignmentView, QuestTracker, hydrate, load_guild_blueprint};

/// Statuses listed as the viewer's own runs.
const VIEWER_STATUSES: [AssignmentStatus; 3] = [
    AssignmentStatus::Active,
    AssignmentStatus::Paused,
    AssignmentStatus::Completed,
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlueprintSummary {
    #[serde(flatten)]
    pub blueprint: Blueprint,
    pub node_count: u64,
    pub assignment_counts: AssignmentCounts,
    /// The viewer's runs, newest first.
    pub viewer_assignments: Vec<AssignmentView>,
    /// The viewer's most recent run.
    pub viewer_assignment: Option<AssignmentView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BlueprintDetail {
    #[serde(flatten)]
    pub summary: BlueprintSummary,
    pub nodes: Vec<QuestNode>,
    pub links: Vec<QuestLink>,
    /// Every open run of the blueprint, oldest first. Empty unless requested.
    pub guild_assignments: Vec<AssignmentView>,
}

impl QuestTracker {
    /// Every blueprint of the guild, unarchived first then by title.
    #[instrument(skip_all, name = "blueprint_list")]
    pub async fn list_blueprint_summaries(
        &self,
        guild_id: &GuildId,
        viewer: &Actor,
    ) -> Result<Vec<BlueprintSummary>> {
        let _gate = self.gate.lock().await;
        let store = self.store();

        let blueprints = store.list_blueprints(guild_id).await?;
        let mut by_blueprint: HashMap<BlueprintId, Vec<Assignment>> = HashMap::new();
        for assignment in store
            .find_assignments(&AssignmentFilter {
                guild_id: Some(guild_id.clone()),
                user_id: Some(viewer.user_id.clone()),
                statuses: VIEWER_STATUSES.to_vec(),
                order: AssignmentOrder::StartedDesc,
                ..AssignmentFilter::default()
            })
            .await?
        {
            by_blueprint
                .entry(assignment.blueprint_id.clone())
                .or_default()
                .push(assignment);
        }

        let mut summaries = Vec::with_capacity(blueprints.len());
        for blueprint in blueprints {
            let own = by_blueprint.remove(&blueprint.id).unwrap_or_default();
            summaries.push(summarize(store, blueprint, own, viewer).await?);
        }
        debug!(count = summaries.len(), "Listed quest blueprints");
        Ok(summaries)
    }

    /// One blueprint with its graph, stats and, optionally, the guild's open runs.
    #[instrument(skip_all, name = "blueprint_detail", fields(blueprint = %blueprint_id))]
    pub async fn blueprint_detail(
        &self,
        guild_id: &GuildId,
        blueprint_id: &BlueprintId,
        viewer: &Actor,
        include_guild_assignments: bool,
        names: &dyn IdentityResolver,
    ) -> Result<BlueprintDetail> {
        let _gate = self.gate.lock().await;
        let store = self.store();

        let blueprint = load_guild_blueprint(store, guild_id, blueprint_id).await?;
        let own = store
            .find_assignments(&AssignmentFilter {
                blueprint_id: Some(blueprint_id.clone()),
                user_id: Some(viewer.user_id.clone()),
                statuses: VIEWER_STATUSES.to_vec(),
                order: AssignmentOrder::StartedDesc,
                ..AssignmentFilter::default()
            })
            .await?;
        let summary = summarize(store, blueprint, own, viewer).await?;

        let mut nodes = store.list_nodes(blueprint_id).await?;
        nodes.sort_by(|a, b| {
            a.sort_order
                .cmp(&b.sort_order)
                .then_with(|| a.title.cmp(&b.title))
        });
        let links = store.list_links(blueprint_id).await?;

        let guild_assignments = if include_guild_assignments {
            let open = store
                .find_assignments(&AssignmentFilter {
                    blueprint_id: Some(blueprint_id.clone()),
                    statuses: AssignmentStatus::OPEN.to_vec(),
                    order: AssignmentOrder::StartedAsc,
                    ..AssignmentFilter::default()
                })
                .await?;
            hydrate_all(store, open, viewer, names).await?
        } else {
            Vec::new()
        };

        Ok(BlueprintDetail {
            summary,
            nodes,
            links,
            guild_assignments,
        })
    }

    /// Every open run across the guild, oldest first.
    #[instrument(skip_all, name = "guild_roster")]
    pub async fn guild_roster(
        &self,
        guild_id: &GuildId,
        viewer: &Actor,
        names: &dyn IdentityResolver,
    ) -> Result<Vec<AssignmentView>> {
        let _gate = self.gate.lock().await;
        let store = self.store();
        let open = store
            .find_assignments(&AssignmentFilter {
                guild_id: Some(guild_id.clone()),
                statuses: AssignmentStatus::OPEN.to_vec(),
                order: AssignmentOrder::StartedAsc,
                ..AssignmentFilter::default()
            })
            .await?;
        hydrate_all(store, open, viewer, names).await
    }
}

async fn summarize(
    store: &dyn QuestStore,
    blueprint: Blueprint,
    own: Vec<Assignment>,
    viewer: &Actor,
) -> Result<BlueprintSummary> {
    let node_count = store.count_nodes(&blueprint.id).await?;
    let assignment_counts = store.count_assignments(&blueprint.id).await?;

    let mut viewer_assignments = Vec::with_capacity(own.len());
    for assignment in own {
        viewer_assignments.push(hydrate(store, assignment, viewer.display_name.clone()).await?);
    }
    let viewer_assignment = viewer_assignments.first().cloned();

    Ok(BlueprintSummary {
        blueprint,
        node_count,
        assignment_counts,
        viewer_assignments,
        viewer_assignment,
    })
}

/// The viewer's own name wins over the resolver.
async fn hydrate_all(
    store: &dyn QuestStore,
    assignments: Vec<Assignment>,
    viewer: &Actor,
    names: &dyn IdentityResolver,
) -> Result<Vec<AssignmentView>> {
    let mut views = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let owner_name = if assignment.user_id == viewer.user_id && viewer.display_name.is_some() {
            viewer.display_name.clone()
        } else {
            names.display_name(&assignment.user_id)
        };
        views.push(hydrate(store, assignment, owner_name).await?);
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::access::{GuildRole, NoIdentities};
    use crate::config::QuestConfig;
    use crate::error::{NotFoundError, QuestError};
    use crate::store::sqlite::SqliteStore;
    use crate::types::{
        BlueprintPatch, GraphPayload, NewBlueprint, NodeId, NodeInput, NodeType, PositionInput,
        UserId,
    };
    use crate::value::Attributes;

    const GUILD: &str = "guild-1";

    fn leader() -> Actor {
        Actor::new("leader", Some(GuildRole::Leader)).with_display_name("Leader")
    }

    fn node(id: &str, title: &str, sort_order: i32) -> NodeInput {
        NodeInput {
            id: NodeId::from(id),
            title: title.to_string(),
            description: None,
            node_type: NodeType::Explore,
            position: PositionInput::default(),
            sort_order,
            requirements: Attributes::new(),
            metadata: Attributes::new(),
            is_group: None,
        }
    }

    async fn tracker_with(titles: &[&str]) -> (QuestTracker, Vec<BlueprintId>) {
        let tracker = QuestTracker::new(
            Arc::new(SqliteStore::in_memory().unwrap()),
            QuestConfig::default(),
        );
        let mut ids = Vec::new();
        for title in titles {
            let bp = tracker
                .create_blueprint(
                    &GuildId::from(GUILD),
                    &leader(),
                    NewBlueprint {
                        title: (*title).to_string(),
                        ..NewBlueprint::default()
                    },
                )
                .await
                .unwrap();
            ids.push(bp.id);
        }
        (tracker, ids)
    }

    #[tokio::test]
    async fn summaries_order_and_viewer_runs() {
        let (tracker, ids) = tracker_with(&["Zeta", "Alpha", "Mid"]).await;
        let guild = GuildId::from(GUILD);
        tracker
            .update_blueprint_metadata(
                &guild,
                &ids[1],
                &leader(),
                BlueprintPatch {
                    is_archived: Some(true),
                    ..BlueprintPatch::default()
                },
            )
            .await
            .unwrap();
        tracker
            .upsert_graph(
                &guild,
                &ids[0],
                &leader(),
                &GraphPayload {
                    nodes: vec![node("a", "A", 0), node("b", "B", 1)],
                    ..GraphPayload::default()
                },
            )
            .await
            .unwrap();

        let viewer = Actor::new("u1", Some(GuildRole::Raider));
        let first = tracker.start_assignment(&guild, &ids[0], &viewer).await.unwrap();
        tracker
            .update_assignment_status(&guild, &first.assignment.id, &viewer, AssignmentStatus::Completed)
            .await
            .unwrap();
        let second = tracker.start_assignment(&guild, &ids[0], &viewer).await.unwrap();
        tracker
            .start_assignment(&guild, &ids[0], &Actor::new("u2", Some(GuildRole::Member)))
            .await
            .unwrap();

        let summaries = tracker.list_blueprint_summaries(&guild, &viewer).await.unwrap();
        let titles: Vec<&str> = summaries.iter().map(|s| s.blueprint.title.as_str()).collect();
        assert_eq!(titles, vec!["Mid", "Zeta", "Alpha"]);

        let zeta = &summaries[1];
        assert_eq!(zeta.node_count, 2);
        assert_eq!(zeta.assignment_counts.active, 2);
        assert_eq!(zeta.assignment_counts.completed, 1);
        assert_eq!(zeta.viewer_assignments.len(), 2);
        assert_eq!(
            zeta.viewer_assignment.as_ref().map(|v| &v.assignment.id),
            Some(&second.assignment.id)
        );
        assert!(summaries[0].viewer_assignment.is_none());
    }

    #[tokio::test]
    async fn detail_sorts_nodes_and_lists_open_runs() {
        let (tracker, ids) = tracker_with(&["Ring"]).await;
        let guild = GuildId::from(GUILD);
        let bp = &ids[0];
        tracker
            .upsert_graph(
                &guild,
                bp,
                &leader(),
                &GraphPayload {
                    nodes: vec![node("c", "Charlie", 1), node("b", "Bravo", 1), node("a", "Zulu", 0)],
                    ..GraphPayload::default()
                },
            )
            .await
            .unwrap();
        tracker
            .start_assignment(&guild, bp, &Actor::new("u1", Some(GuildRole::Raider)))
            .await
            .unwrap();
        tracker.start_assignment(&guild, bp, &leader()).await.unwrap();

        let names = HashMap::from([(UserId::from("u1"), "Frodo".to_string())]);
        let detail = tracker
            .blueprint_detail(&guild, bp, &leader(), true, &names)
            .await
            .unwrap();
        let order: Vec<&str> = detail.nodes.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(order, vec!["Zulu", "Bravo", "Charlie"]);
        assert_eq!(detail.guild_assignments.len(), 2);
        assert_eq!(detail.guild_assignments[0].owner_name.as_deref(), Some("Frodo"));
        assert_eq!(detail.guild_assignments[1].owner_name.as_deref(), Some("Leader"));
        assert_eq!(detail.guild_assignments[0].progress.len(), 3);

        let hidden = tracker
            .blueprint_detail(&guild, bp, &leader(), false, &NoIdentities)
            .await
            .unwrap();
        assert!(hidden.guild_assignments.is_empty());

        let roster = tracker
            .guild_roster(&guild, &leader(), &NoIdentities)
            .await
            .unwrap();
        assert_eq!(roster.len(), 2);
        assert!(roster[0].owner_name.is_none());
    }

    #[tokio::test]
    async fn detail_of_foreign_blueprint_is_not_found() {
        let (tracker, ids) = tracker_with(&["Ring"]).await;
        let err = tracker
            .blueprint_detail(&GuildId::from("other"), &ids[0], &leader(), false, &NoIdentities)
            .await
            .unwrap_err();
        assert!(matches!(err, QuestError::NotFound(NotFoundError::Blueprint(_))));
    }
}
