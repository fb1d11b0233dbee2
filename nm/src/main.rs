//! Nuum CLI entry point

use std::fs;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use nuum::cli::{Cli, Command, log_dir};
use nuum::config::Config;
use nuum::repl::ReplSession;
use nuum::session::Session;
use nuum::wire;

fn setup_logging(cli_level: Option<&str>, config_level: Option<&str>) -> Result<()> {
    let log_dir = log_dir();
    fs::create_dir_all(&log_dir).context("failed to create log directory")?;

    // Priority: CLI flag > config file > INFO
    let level = match cli_level.or(config_level).map(str::to_uppercase).as_deref() {
        Some("TRACE") => tracing::Level::TRACE,
        Some("DEBUG") => tracing::Level::DEBUG,
        Some("INFO") | None => tracing::Level::INFO,
        Some("WARN") | Some("WARNING") => tracing::Level::WARN,
        Some("ERROR") => tracing::Level::ERROR,
        Some(other) => {
            eprintln!("Warning: unknown log-level '{other}', defaulting to INFO");
            tracing::Level::INFO
        }
    };

    let log_file = fs::File::create(log_dir.join("nuum.log")).context("failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    info!(?level, "logging initialized");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_ref()).context("failed to load configuration")?;
    if let Some(db) = &cli.db {
        config.store.path = Some(db.clone());
    }

    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref())
        .context("failed to set up logging")?;

    match cli.command {
        Some(Command::Run) => {
            let session = Session::new(config).await?;
            wire::run_stdio(session).await
        }
        Some(Command::Repl { initial }) => {
            let session = Session::new(config).await?;
            ReplSession::new(session).run(initial).await
        }
        Some(Command::Status) => cmd_status(&config).await,
        None => {
            let session = Session::new(config).await?;
            ReplSession::new(session).run(None).await
        }
    }
}

/// Read-only snapshot of present state and tasks; does not take the store
/// lock
async fn cmd_status(config: &Config) -> Result<()> {
    use memstore::{OpenOptions, Store};

    let store = Store::open(
        config.store_path(),
        OpenOptions {
            read_only: true,
            ..OpenOptions::default()
        },
    )
    .await?;

    print!("{}", store.present().get()?.render());

    let tasks = store.tasks().list(None)?;
    if tasks.is_empty() {
        println!("Background tasks: none");
    } else {
        println!("Background tasks:");
        for task in tasks {
            println!("  {} [{}] {}: {}", task.id, task.status, task.kind, task.description);
        }
    }
    Ok(())
}
