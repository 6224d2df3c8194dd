use std::path::PathBuf;

use clap::{Args, Subcommand};
use tracing::info;

use questline_core::types::{BlueprintId, GraphPayload};

use super::{GlobalArgs, print_json, read_json};

#[derive(Args, Debug)]
pub struct GraphArgs {
    #[command(subcommand)]
    pub action: GraphAction,
}

#[derive(Subcommand, Debug)]
pub enum GraphAction {
    /// Replace the graph with a JSON payload of `nodes` and `links`
    Import {
        blueprint: String,

        /// Payload file, or `-` for stdin
        file: PathBuf,

        /// Fail unless the stored graph is still at this revision
        #[arg(long)]
        expected_revision: Option<u64>,
    },
}

pub async fn run(args: GraphArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    match args.action {
        GraphAction::Import {
            blueprint,
            file,
            expected_revision,
        } => {
            let mut payload: GraphPayload = read_json(&file, "graph payload")?;
            if expected_revision.is_some() {
                payload.expected_revision = expected_revision;
            }
            info!(
                nodes = payload.nodes.len(),
                links = payload.links.len(),
                "Importing quest graph"
            );

            let tracker = global.open_tracker()?;
            let report = tracker
                .upsert_graph(
                    &global.guild_id(),
                    &BlueprintId::from(blueprint),
                    &global.actor(),
                    &payload,
                )
                .await?;
            print_json(&report)
        }
    }
}
