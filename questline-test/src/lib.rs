// Integration test fixtures for Questline.

use std::path::Path;
use std::sync::Arc;

use questline_core::access::{Actor, GuildRole};
use questline_core::config::QuestConfig;
use questline_core::store::sqlite::SqliteStore;
use questline_core::tracker::{AssignmentView, GraphSyncReport, QuestTracker};
use questline_core::types::{
    Blueprint, BlueprintId, GraphPayload, GuildId, LinkInput, NewBlueprint, NodeId, NodeInput,
    NodeProgress, NodeType, PositionInput, ProgressStatus, ProgressUpdate,
};
use questline_core::value::{Attributes, QuestValue};

/// A guild with its own tracker, backed by an in-memory or on-disk store.
#[derive(Debug)]
pub struct TestGuild {
    pub id: GuildId,
    pub tracker: QuestTracker,
    dir: Option<tempfile::TempDir>,
}

impl TestGuild {
    pub fn in_memory() -> Self {
        let store = SqliteStore::in_memory().expect("open in-memory store");
        Self {
            id: GuildId::from("guild-1"),
            tracker: QuestTracker::new(Arc::new(store), QuestConfig::default()),
            dir: None,
        }
    }

    /// File-backed store in a temporary directory, journaled in WAL mode.
    pub fn on_disk() -> Self {
        let dir = tempfile::tempdir().expect("create tempdir");
        let store = SqliteStore::open(&dir.path().join("questline.db")).expect("open store");
        Self {
            id: GuildId::from("guild-1"),
            tracker: QuestTracker::new(Arc::new(store), QuestConfig::default()),
            dir: Some(dir),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(tempfile::TempDir::path)
    }

    pub fn leader() -> Actor {
        Actor::new("leader", Some(GuildRole::Leader)).with_display_name("Guild Leader")
    }

    pub fn member(user: &str) -> Actor {
        Actor::new(user, Some(GuildRole::Member))
    }

    pub async fn blueprint(&self, title: &str) -> Blueprint {
        self.tracker
            .create_blueprint(
                &self.id,
                &Self::leader(),
                NewBlueprint {
                    title: title.to_string(),
                    ..NewBlueprint::default()
                },
            )
            .await
            .expect("create blueprint")
    }

    pub async fn import(&self, blueprint: &BlueprintId, payload: &GraphPayload) -> GraphSyncReport {
        self.tracker
            .upsert_graph(&self.id, blueprint, &Self::leader(), payload)
            .await
            .expect("upsert graph")
    }

    pub async fn start(&self, blueprint: &BlueprintId, user: &str) -> AssignmentView {
        self.tracker
            .start_assignment(&self.id, blueprint, &Self::member(user))
            .await
            .expect("start assignment")
    }

    /// Set one leaf's status as the assignment's owner.
    pub async fn mark(
        &self,
        view: &AssignmentView,
        node: &str,
        status: ProgressStatus,
    ) -> AssignmentView {
        let update = ProgressUpdate {
            node_id: NodeId::from(node),
            status: Some(status),
            ..ProgressUpdate::default()
        };
        self.tracker
            .apply_progress_updates(
                &self.id,
                &view.assignment.id,
                &Self::member(view.assignment.user_id.as_str()),
                &[update],
            )
            .await
            .expect("apply progress")
    }
}

pub fn node(id: &str) -> NodeInput {
    NodeInput {
        id: NodeId::from(id),
        title: format!("Step {id}"),
        description: None,
        node_type: NodeType::Other,
        position: PositionInput::default(),
        sort_order: 0,
        requirements: Attributes::new(),
        metadata: Attributes::new(),
        is_group: None,
    }
}

/// A leaf whose `requirements.count` holds `count` verbatim.
pub fn counted(id: &str, count: QuestValue) -> NodeInput {
    let mut node = node(id);
    node.node_type = NodeType::Kill;
    node.requirements.insert("count".into(), count);
    node
}

/// A group node flagged through `metadata.isGroup`.
pub fn group(id: &str) -> NodeInput {
    let mut node = node(id);
    node.node_type = NodeType::Group;
    node.metadata.insert("isGroup".into(), QuestValue::Bool(true));
    node
}

pub fn link(parent: &str, child: &str) -> LinkInput {
    LinkInput {
        id: None,
        parent_node_id: NodeId::from(parent),
        child_node_id: NodeId::from(child),
        conditions: Attributes::new(),
    }
}

pub fn graph(nodes: Vec<NodeInput>, links: Vec<LinkInput>) -> GraphPayload {
    GraphPayload {
        nodes,
        links,
        expected_revision: None,
    }
}

/// Leaves `a` (count 10) and `b` (count "2.7"), grouped under `g`.
pub fn abg_payload() -> GraphPayload {
    graph(
        vec![
            counted("a", QuestValue::Number(10.0)),
            counted("b", QuestValue::String("2.7".into())),
            group("g"),
        ],
        vec![link("g", "a"), link("g", "b")],
    )
}

/// The progress row for `node`.
pub fn row<'a>(view: &'a AssignmentView, node: &str) -> &'a NodeProgress {
    view.progress
        .iter()
        .find(|r| r.node_id.as_str() == node)
        .unwrap_or_else(|| panic!("no progress row for node {node}"))
}
