pub mod assignment;
pub mod blueprint;
pub mod graph;
pub mod init;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Subcommand, ValueEnum};
use serde::Serialize;

use questline_core::access::{Actor, GuildRole, can_view_guild_quest_board};
use questline_core::config::QuestConfig;
use questline_core::error::{PermissionError, QuestError};
use questline_core::store::sqlite::SqliteStore;
use questline_core::tracker::QuestTracker;
use questline_core::types::{GuildId, UserId};

pub const QUESTLINE_DIR: &str = ".questline";
pub const CONFIG_FILE: &str = "config.toml";

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create `.questline/` with a default config and an empty database
    Init(init::InitArgs),
    /// Create, edit and inspect quest blueprints
    Blueprint(blueprint::BlueprintArgs),
    /// Replace a blueprint's node and link set
    Graph(graph::GraphArgs),
    /// Start runs, move them through their lifecycle and record progress
    Assignment(assignment::AssignmentArgs),
}

/// Caller context shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Database file (default: `[store] path` from the config)
    #[arg(long, global = true, env = "QUESTLINE_DB")]
    pub db: Option<PathBuf>,

    /// Config file (default: .questline/config.toml when present)
    #[arg(long, global = true, env = "QUESTLINE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Guild the caller is acting in
    #[arg(long, global = true, env = "QUESTLINE_GUILD", default_value = "default")]
    pub guild: String,

    /// Caller's user id
    #[arg(long, global = true, env = "QUESTLINE_USER", default_value = "local")]
    pub user: String,

    /// Caller's display name
    #[arg(long, global = true, env = "QUESTLINE_NAME")]
    pub name: Option<String>,

    /// Caller's guild role
    #[arg(long, global = true, value_enum, default_value_t = RoleArg::Member)]
    pub role: RoleArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleArg {
    Leader,
    Officer,
    Raider,
    Member,
    /// Not a member of the guild
    #[value(name = "none")]
    Outsider,
}

impl RoleArg {
    fn as_role(self) -> Option<GuildRole> {
        match self {
            Self::Leader => Some(GuildRole::Leader),
            Self::Officer => Some(GuildRole::Officer),
            Self::Raider => Some(GuildRole::Raider),
            Self::Member => Some(GuildRole::Member),
            Self::Outsider => None,
        }
    }
}

impl GlobalArgs {
    pub fn guild_id(&self) -> GuildId {
        GuildId::from(self.guild.as_str())
    }

    pub fn actor(&self) -> Actor {
        let actor = Actor::new(self.user.as_str(), self.role.as_role());
        match &self.name {
            Some(name) => actor.with_display_name(name.as_str()),
            None => actor,
        }
    }

    /// Explicit `--config`, else `.questline/config.toml` when it exists, else defaults.
    pub fn load_config(&self) -> anyhow::Result<QuestConfig> {
        let path = match &self.config {
            Some(path) => path.clone(),
            None => {
                let default = Path::new(QUESTLINE_DIR).join(CONFIG_FILE);
                if !default.exists() {
                    return Ok(QuestConfig::default());
                }
                default
            }
        };
        let config = QuestConfig::load(&path)
            .map_err(QuestError::from)
            .with_context(|| format!("Cannot load config: {}", path.display()))?;
        Ok(config)
    }

    /// Read commands are open to any guild member.
    pub fn require_member(&self) -> anyhow::Result<Actor> {
        let actor = self.actor();
        if !can_view_guild_quest_board(actor.role) {
            return Err(QuestError::from(PermissionError::NotMember(actor.user_id)).into());
        }
        Ok(actor)
    }

    pub fn db_path(&self, config: &QuestConfig) -> PathBuf {
        self.db.clone().unwrap_or_else(|| config.store.path.clone())
    }

    /// Open the configured database, which `questline init` must have created.
    pub fn open_tracker(&self) -> anyhow::Result<QuestTracker> {
        let config = self.load_config()?;
        let db_path = self.db_path(&config);
        if !db_path.exists() {
            anyhow::bail!(
                "Questline is not initialized: {} does not exist. Run `questline init` first.",
                db_path.display()
            );
        }
        let store = open_store(&db_path)?;
        Ok(QuestTracker::new(Arc::new(store), config))
    }
}

/// Open or create the database, creating its parent directory first.
pub fn open_store(db_path: &Path) -> anyhow::Result<SqliteStore> {
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create database directory: {}", parent.display()))?;
    }
    SqliteStore::open(db_path)
        .with_context(|| format!("Cannot open database: {}", db_path.display()))
}

/// Read a JSON document from a file, or stdin when the path is `-`.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
    let text = if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin())
            .with_context(|| format!("Cannot read {what} from stdin"))?
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read {what}: {}", path.display()))?
    };
    serde_json::from_str(&text)
        .with_context(|| format!("Cannot parse {what} {}", path.display()))
}

/// Display names for other users, from a JSON object of `user id -> name`.
pub fn load_names(path: Option<&Path>) -> anyhow::Result<HashMap<UserId, String>> {
    match path {
        Some(path) => read_json(path, "name map"),
        None => Ok(HashMap::new()),
    }
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let text = serde_json::to_string_pretty(value).context("Cannot render output as JSON")?;
    println!("{text}");
    Ok(())
}

pub async fn run(cmd: Command, global: GlobalArgs) -> anyhow::Result<()> {
    match cmd {
        Command::Init(args) => init::run(args, &global).await,
        Command::Blueprint(args) => blueprint::run(args, &global).await,
        Command::Graph(args) => graph::run(args, &global).await,
        Command::Assignment(args) => assignment::run(args, &global).await,
    }
}
