use std::path::PathBuf;

use clap::{Args, Subcommand};
use serde::Serialize;

use questline_core::access::{
    Actor, GuildRole, can_edit_quest_blueprint, can_manage_quest_blueprints,
    can_view_guild_quest_board,
};
use questline_core::tracker::BlueprintDetail;
use questline_core::types::{BlueprintId, BlueprintPatch, NewBlueprint, Visibility};

use super::{GlobalArgs, load_names, print_json};

#[derive(Args, Debug)]
pub struct BlueprintArgs {
    #[command(subcommand)]
    pub action: BlueprintAction,
}

#[derive(Subcommand, Debug)]
pub enum BlueprintAction {
    /// Create an empty blueprint in the current guild
    Create {
        #[arg(long)]
        title: String,

        #[arg(long)]
        summary: Option<String>,

        /// guild, link_only or private
        #[arg(long, default_value = "guild")]
        visibility: Visibility,
    },
    /// Edit title, summary, visibility or archive state
    Update {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long, conflicts_with = "clear_summary")]
        summary: Option<String>,

        /// Remove the summary
        #[arg(long)]
        clear_summary: bool,

        #[arg(long)]
        visibility: Option<Visibility>,

        #[arg(long, conflicts_with = "unarchive")]
        archive: bool,

        #[arg(long)]
        unarchive: bool,
    },
    /// List the guild's blueprints with the caller's own runs
    List,
    /// Show one blueprint with its nodes, links and the guild's open runs
    Show {
        id: String,

        /// JSON object mapping user ids to display names
        #[arg(long)]
        names: Option<PathBuf>,
    },
}

/// What the caller may do with a blueprint.
#[derive(Debug, Serialize)]
struct Permissions {
    role: Option<GuildRole>,
    can_manage_blueprints: bool,
    can_view_guild_board: bool,
    can_edit_blueprint: bool,
}

#[derive(Debug, Serialize)]
struct DetailOutput {
    #[serde(flatten)]
    detail: BlueprintDetail,
    permissions: Permissions,
}

impl DetailOutput {
    fn new(detail: BlueprintDetail, actor: &Actor) -> Self {
        let creator = &detail.summary.blueprint.created_by;
        let permissions = Permissions {
            role: actor.role,
            can_manage_blueprints: can_manage_quest_blueprints(actor.role),
            can_view_guild_board: can_view_guild_quest_board(actor.role),
            can_edit_blueprint: can_edit_quest_blueprint(actor.role, &actor.user_id, creator),
        };
        Self {
            detail,
            permissions,
        }
    }
}

pub async fn run(args: BlueprintArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let tracker = global.open_tracker()?;
    let guild = global.guild_id();
    let actor = global.actor();

    match args.action {
        BlueprintAction::Create {
            title,
            summary,
            visibility,
        } => {
            let input = NewBlueprint {
                title,
                summary,
                visibility,
            };
            let blueprint = tracker.create_blueprint(&guild, &actor, input).await?;
            print_json(&blueprint)
        }
        BlueprintAction::Update {
            id,
            title,
            summary,
            clear_summary,
            visibility,
            archive,
            unarchive,
        } => {
            let patch = BlueprintPatch {
                title,
                summary: if clear_summary { Some(None) } else { summary.map(Some) },
                visibility,
                is_archived: match (archive, unarchive) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                },
            };
            let blueprint = tracker
                .update_blueprint_metadata(&guild, &BlueprintId::from(id), &actor, patch)
                .await?;
            print_json(&blueprint)
        }
        BlueprintAction::List => {
            let actor = global.require_member()?;
            let summaries = tracker.list_blueprint_summaries(&guild, &actor).await?;
            print_json(&summaries)
        }
        BlueprintAction::Show { id, names } => {
            let actor = global.require_member()?;
            let names = load_names(names.as_deref())?;
            let include_guild_assignments = can_view_guild_quest_board(actor.role);
            let detail = tracker
                .blueprint_detail(
                    &guild,
                    &BlueprintId::from(id),
                    &actor,
                    include_guild_assignments,
                    &names,
                )
                .await?;
            print_json(&DetailOutput::new(detail, &actor))
        }
    }
}
