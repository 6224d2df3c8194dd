use serde::{Deserialize, Serialize};

use crate::types::{
    Assignment, AssignmentCounts, AssignmentFilter, AssignmentId, Blueprint, BlueprintId, GuildId,
    NodeId, NodeProgress, QuestLink, QuestNode,
};

/// Row counts across the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub blueprints: u64,
    pub nodes: u64,
    pub links: u64,
    pub assignments: u64,
    pub progress_rows: u64,
    pub db_size_bytes: u64,
}

/// The persistence abstraction. Every tracker operation reads and writes
/// through this trait.
#[async_trait::async_trait]
pub trait QuestStore: Send + Sync {
    // ── Blueprints ─────────────────────────────────────────────────

    async fn insert_blueprint(&self, blueprint: &Blueprint) -> crate::error::Result<()>;

    async fn get_blueprint(&self, id: &BlueprintId) -> crate::error::Result<Option<Blueprint>>;

    /// All blueprints of a guild, unarchived first, then by title.
    async fn list_blueprints(&self, guild_id: &GuildId) -> crate::error::Result<Vec<Blueprint>>;

    /// Overwrite every mutable column of an existing blueprint.
    async fn update_blueprint(&self, blueprint: &Blueprint) -> crate::error::Result<()>;

    // ── Graph ──────────────────────────────────────────────────────

    async fn list_nodes(&self, blueprint_id: &BlueprintId) -> crate::error::Result<Vec<QuestNode>>;

    async fn count_nodes(&self, blueprint_id: &BlueprintId) -> crate::error::Result<u64>;

    async fn insert_node(&self, node: &QuestNode) -> crate::error::Result<()>;

    /// Update a node in place, keyed by `(blueprint_id, id)`.
    async fn update_node(&self, node: &QuestNode) -> crate::error::Result<()>;

    /// Delete nodes, cascading their links and progress rows. Returns count deleted.
    async fn delete_nodes(
        &self,
        blueprint_id: &BlueprintId,
        ids: &[NodeId],
    ) -> crate::error::Result<u64>;

    async fn list_links(&self, blueprint_id: &BlueprintId) -> crate::error::Result<Vec<QuestLink>>;

    /// Replace the blueprint's entire link set.
    async fn replace_links(
        &self,
        blueprint_id: &BlueprintId,
        links: &[QuestLink],
    ) -> crate::error::Result<()>;

    // ── Assignments ────────────────────────────────────────────────

    async fn insert_assignment(&self, assignment: &Assignment) -> crate::error::Result<()>;

    async fn get_assignment(&self, id: &AssignmentId) -> crate::error::Result<Option<Assignment>>;

    async fn update_assignment(&self, assignment: &Assignment) -> crate::error::Result<()>;

    async fn find_assignments(
        &self,
        filter: &AssignmentFilter,
    ) -> crate::error::Result<Vec<Assignment>>;

    async fn count_assignments(
        &self,
        blueprint_id: &BlueprintId,
    ) -> crate::error::Result<AssignmentCounts>;

    // ── Node progress ──────────────────────────────────────────────

    async fn insert_progress_batch(&self, rows: &[NodeProgress]) -> crate::error::Result<()>;

    async fn list_progress(
        &self,
        assignment_id: &AssignmentId,
    ) -> crate::error::Result<Vec<NodeProgress>>;

    /// Update a progress row in place, keyed by `(assignment_id, node_id)`.
    async fn update_progress(&self, row: &NodeProgress) -> crate::error::Result<()>;

    // ── Transactions ──────────────────────────────────────────────

    /// Begin an explicit transaction. Operations between begin and commit
    /// are executed atomically. Default: no-op (each operation auto-commits).
    async fn begin_transaction(&self) -> crate::error::Result<()> {
        Ok(())
    }

    /// Commit the current transaction started by `begin_transaction`.
    async fn commit_transaction(&self) -> crate::error::Result<()> {
        Ok(())
    }

    /// Roll back the current transaction started by `begin_transaction`.
    async fn rollback_transaction(&self) -> crate::error::Result<()> {
        Ok(())
    }

    // ── Metrics ────────────────────────────────────────────────────

    async fn stats(&self) -> crate::error::Result<StoreStats>;
}
