use clap::Parser;

use questline_core::error::QuestError;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "questline",
    version,
    about = "Author quest blueprints and track guild members' progress through them"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    #[command(flatten)]
    global: commands::GlobalArgs,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Classify an error into a process exit code.
///
/// Exit codes:
///   0: success
///   1: general/unknown error
///   2: configuration error
///   3: blueprint/assignment/node not found, or store not initialized
///   4: database error
///   5: validation error (bad payload, empty batch, bad input file)
///   6: permission denied
///   7: conflict (open assignment exists, stale graph revision)
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    if let Some(quest) = err.chain().find_map(|e| e.downcast_ref::<QuestError>()) {
        return match quest {
            QuestError::Config(_) => 2,
            QuestError::NotFound(_) => 3,
            QuestError::Store(_) => 4,
            QuestError::Validation(_) => 5,
            QuestError::Permission(_) => 6,
            QuestError::Conflict(_) => 7,
        };
    }

    let lower = format!("{err:#}").to_lowercase();
    if lower.contains("not initialized") {
        3
    } else if lower.contains("config") {
        2
    } else if lower.contains("database") || lower.contains("sqlite") {
        4
    } else if lower.contains("cannot parse") || lower.contains("cannot read") {
        5
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };

    // stdout carries the JSON output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(commands::run(cli.command, cli.global)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Context;
    use questline_core::error::{
        ConfigError, ConflictError, NotFoundError, PermissionError, StoreError, ValidationError,
    };
    use questline_core::types::{BlueprintId, UserId};

    use super::*;

    fn wrapped(err: impl Into<QuestError>) -> anyhow::Error {
        let result: Result<(), QuestError> = Err(err.into());
        result.context("Command failed").unwrap_err()
    }

    #[test]
    fn exit_code_not_found() {
        let err = wrapped(NotFoundError::Blueprint(BlueprintId::from("bp")));
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_not_initialized() {
        let err = anyhow::anyhow!("Questline is not initialized in /foo. Run `questline init` first.");
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_config() {
        assert_eq!(
            classify_exit_code(&wrapped(ConfigError::Parse("bad toml".into()))),
            2
        );
        let err = anyhow::anyhow!("Cannot write config: permission denied");
        assert_eq!(classify_exit_code(&err), 2);
    }

    #[test]
    fn exit_code_database() {
        let err = wrapped(StoreError::Corrupt("bad status".into()));
        assert_eq!(classify_exit_code(&err), 4);
        let err = anyhow::anyhow!("Cannot open database: /foo/.questline/questline.db");
        assert_eq!(classify_exit_code(&err), 4);
    }

    #[test]
    fn exit_code_validation() {
        assert_eq!(
            classify_exit_code(&wrapped(ValidationError::EmptyUpdateBatch)),
            5
        );
        let err = anyhow::anyhow!("Cannot parse graph payload graph.json: expected value");
        assert_eq!(classify_exit_code(&err), 5);
    }

    #[test]
    fn exit_code_permission() {
        let err = wrapped(PermissionError::BlueprintEdit(UserId::from("u")));
        assert_eq!(classify_exit_code(&err), 6);
    }

    #[test]
    fn exit_code_conflict() {
        let err = wrapped(ConflictError::StaleRevision {
            expected: 1,
            actual: 2,
        });
        assert_eq!(classify_exit_code(&err), 7);
    }

    #[test]
    fn exit_code_general() {
        let err = anyhow::anyhow!("Something unexpected happened");
        assert_eq!(classify_exit_code(&err), 1);
    }
}
