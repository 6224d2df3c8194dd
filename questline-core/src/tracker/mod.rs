//! The quest tracker service.
//!
//! [`QuestTracker`] owns the store handle and runs every operation as one
//! store transaction. Operations are serialized through an async gate held
//! from `begin_transaction` to `commit_transaction`, so a single connection
//! never interleaves two transactions and readers never see partial writes.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::warn;

use crate::config::QuestConfig;
use crate::error::{NotFoundError, Result};
use crate::store::QuestStore;
use crate::types::{Assignment, AssignmentId, Blueprint, BlueprintId, GuildId, NodeProgress};

pub mod assignment;
pub mod blueprint;
pub mod derive;
pub mod query;
pub mod summary;
pub mod sync;

pub use derive::{GroupDerivation, derive_group_status, sync_group_progress};
pub use query::{BlueprintDetail, BlueprintSummary};
pub use summary::{build_progress_summary, refresh_assignment_summary};
pub use sync::{GraphSyncReport, recompute_assignments};

/// An assignment together with its progress rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentView {
    #[serde(flatten)]
    pub assignment: Assignment,
    pub owner_name: Option<String>,
    pub progress: Vec<NodeProgress>,
}

pub struct QuestTracker {
    store: Arc<dyn QuestStore>,
    config: QuestConfig,
    gate: Mutex<()>,
}

impl std::fmt::Debug for QuestTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuestTracker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QuestTracker {
    pub fn new(store: Arc<dyn QuestStore>, config: QuestConfig) -> Self {
        Self {
            store,
            config,
            gate: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &dyn QuestStore {
        self.store.as_ref()
    }

    pub fn config(&self) -> &QuestConfig {
        &self.config
    }

    /// Commit on success, roll back on failure. The caller holds the gate.
    async fn finish<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => match self.store.commit_transaction().await {
                Ok(()) => Ok(value),
                Err(e) => {
                    self.rollback_quietly().await;
                    Err(e)
                }
            },
            Err(e) => {
                self.rollback_quietly().await;
                Err(e)
            }
        }
    }

    async fn rollback_quietly(&self) {
        if let Err(e) = self.store.rollback_transaction().await {
            warn!(error = %e, "Rollback failed");
        }
    }
}

/// Fetch a blueprint, treating one owned by another guild as missing.
pub(crate) async fn load_guild_blueprint(
    store: &dyn QuestStore,
    guild_id: &GuildId,
    blueprint_id: &BlueprintId,
) -> Result<Blueprint> {
    match store.get_blueprint(blueprint_id).await? {
        Some(bp) if &bp.guild_id == guild_id => Ok(bp),
        _ => Err(NotFoundError::Blueprint(blueprint_id.clone()).into()),
    }
}

/// Fetch an assignment, treating one owned by another guild as missing.
pub(crate) async fn load_guild_assignment(
    store: &dyn QuestStore,
    guild_id: &GuildId,
    assignment_id: &AssignmentId,
) -> Result<Assignment> {
    match store.get_assignment(assignment_id).await? {
        Some(a) if &a.guild_id == guild_id => Ok(a),
        _ => Err(NotFoundError::Assignment(assignment_id.clone()).into()),
    }
}

pub(crate) async fn hydrate(
    store: &dyn QuestStore,
    assignment: Assignment,
    owner_name: Option<String>,
) -> Result<AssignmentView> {
    let progress = store.list_progress(&assignment.id).await?;
    Ok(AssignmentView {
        assignment,
        owner_name,
        progress,
    })
}
