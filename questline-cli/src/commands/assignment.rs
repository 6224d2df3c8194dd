use std::path::PathBuf;

use clap::{Args, Subcommand};

use questline_core::types::{
    AssignmentId, AssignmentStatus, BlueprintId, NodeId, ProgressStatus, ProgressUpdate,
};

use super::{GlobalArgs, load_names, print_json, read_json};

#[derive(Args, Debug)]
pub struct AssignmentArgs {
    #[command(subcommand)]
    pub action: AssignmentAction,
}

#[derive(Subcommand, Debug)]
pub enum AssignmentAction {
    /// Start the caller's run of a blueprint
    Start { blueprint: String },
    /// Move a run to active, paused, completed or cancelled
    Status {
        assignment: String,
        status: AssignmentStatus,
    },
    /// Record progress on leaf nodes
    Progress(ProgressArgs),
    /// Every open run in the guild, oldest first
    Roster {
        /// JSON object mapping user ids to display names
        #[arg(long)]
        names: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
pub struct ProgressArgs {
    pub assignment: String,

    /// JSON array of updates, or `-` for stdin
    #[arg(long, conflicts_with = "node", required_unless_present = "node")]
    pub file: Option<PathBuf>,

    /// Single node to update
    #[arg(long)]
    pub node: Option<String>,

    /// not_started, in_progress, completed or blocked
    #[arg(long, requires = "node")]
    pub status: Option<ProgressStatus>,

    /// Fractions are truncated; negatives floor at 0
    #[arg(long, requires = "node", allow_negative_numbers = true)]
    pub count: Option<f64>,

    #[arg(long, requires = "node", conflicts_with = "clear_note")]
    pub note: Option<String>,

    #[arg(long, requires = "node")]
    pub clear_note: bool,
}

impl ProgressArgs {
    fn updates(&self) -> anyhow::Result<Vec<ProgressUpdate>> {
        if let Some(file) = &self.file {
            return read_json(file, "progress updates");
        }
        let Some(node) = &self.node else {
            anyhow::bail!("Either --file or --node is required");
        };
        Ok(vec![ProgressUpdate {
            node_id: NodeId::from(node.as_str()),
            status: self.status,
            progress_count: self.count,
            notes: if self.clear_note {
                Some(None)
            } else {
                self.note.clone().map(Some)
            },
        }])
    }
}

pub async fn run(args: AssignmentArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let tracker = global.open_tracker()?;
    let guild = global.guild_id();
    let actor = global.actor();

    match args.action {
        AssignmentAction::Start { blueprint } => {
            let view = tracker
                .start_assignment(&guild, &BlueprintId::from(blueprint), &actor)
                .await?;
            print_json(&view)
        }
        AssignmentAction::Status { assignment, status } => {
            let view = tracker
                .update_assignment_status(&guild, &AssignmentId::from(assignment), &actor, status)
                .await?;
            print_json(&view)
        }
        AssignmentAction::Progress(progress) => {
            let updates = progress.updates()?;
            let view = tracker
                .apply_progress_updates(
                    &guild,
                    &AssignmentId::from(progress.assignment.as_str()),
                    &actor,
                    &updates,
                )
                .await?;
            print_json(&view)
        }
        AssignmentAction::Roster { names } => {
            let actor = global.require_member()?;
            let names = load_names(names.as_deref())?;
            let roster = tracker.guild_roster(&guild, &actor, &names).await?;
            print_json(&roster)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(node: Option<&str>) -> ProgressArgs {
        ProgressArgs {
            assignment: "a1".into(),
            file: None,
            node: node.map(str::to_string),
            status: None,
            count: None,
            note: None,
            clear_note: false,
        }
    }

    #[test]
    fn single_node_flags_become_one_update() {
        let mut progress = args(Some("kill-rats"));
        progress.status = Some(ProgressStatus::InProgress);
        progress.count = Some(4.0);
        progress.note = Some("halfway".into());
        let updates = progress.updates().unwrap();
        assert_eq!(
            updates,
            vec![ProgressUpdate {
                node_id: NodeId::from("kill-rats"),
                status: Some(ProgressStatus::InProgress),
                progress_count: Some(4.0),
                notes: Some(Some("halfway".into())),
            }]
        );
    }

    #[test]
    fn clear_note_sends_explicit_null() {
        let mut progress = args(Some("kill-rats"));
        progress.clear_note = true;
        assert_eq!(progress.updates().unwrap()[0].notes, Some(None));
    }

    #[test]
    fn updates_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("updates.json");
        std::fs::write(
            &path,
            r#"[{"node_id": "a", "status": "completed"}, {"node_id": "b", "progress_count": 2.5}]"#,
        )
        .unwrap();
        let mut progress = args(None);
        progress.file = Some(path);
        let updates = progress.updates().unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].status, Some(ProgressStatus::Completed));
        assert_eq!(updates[1].progress_count, Some(2.5));
        assert!(updates[1].notes.is_none());
    }
}
