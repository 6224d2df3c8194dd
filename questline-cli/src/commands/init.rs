use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use questline_core::config::QuestConfig;
use questline_core::error::QuestError;
use questline_core::store::QuestStore;

use super::{CONFIG_FILE, GlobalArgs, QUESTLINE_DIR};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory to initialize (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

pub async fn run(args: InitArgs, global: &GlobalArgs) -> anyhow::Result<()> {
    let root = std::fs::canonicalize(&args.path)
        .with_context(|| format!("Cannot resolve path: {}", args.path.display()))?;
    let questline_dir = root.join(QUESTLINE_DIR);
    std::fs::create_dir_all(&questline_dir)
        .with_context(|| format!("Cannot create {}", questline_dir.display()))?;

    let config_path = questline_dir.join(CONFIG_FILE);
    let config = if config_path.exists() && !args.force {
        tracing::info!(path = %config_path.display(), "Keeping existing config");
        QuestConfig::load(&config_path)
            .map_err(QuestError::from)
            .with_context(|| format!("Cannot load config: {}", config_path.display()))?
    } else {
        let config = QuestConfig::default();
        let text = config.to_toml().map_err(QuestError::from)?;
        std::fs::write(&config_path, text)
            .with_context(|| format!("Cannot write config: {}", config_path.display()))?;
        config
    };

    let db_path = match &global.db {
        Some(db) => db.clone(),
        None => root.join(&config.store.path),
    };
    let store = super::open_store(&db_path)?;

    let stats = store.stats().await.context("Failed to read store stats")?;

    println!("Questline initialized in {}", root.display());
    println!("  Config:     {}", config_path.display());
    println!("  Database:   {}", db_path.display());
    println!("  Blueprints: {}", stats.blueprints);
    Ok(())
}
