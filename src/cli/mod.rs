use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ConfigLoader;
use crate::persist;

pub mod commands;

use self::commands::{
    BackupPathArgs, FolderArgs, HistoryArgs, NoteArgs, ProjectArgs, TagArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "clipvault",
    version,
    about = "Local clipboard history manager with projects and notes"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Override the config file location (takes precedence over CLIPVAULT_CONFIG)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the data directory (takes precedence over CLIPVAULT_DATA)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Minimum log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch the clipboard and record changes until interrupted (default)
    Monitor,
    /// Inspect and manage the capture history
    History(HistoryArgs),
    /// Manage projects
    Project(ProjectArgs),
    /// Manage folders within a project
    Folder(FolderArgs),
    /// Manage notes within a folder
    Note(NoteArgs),
    /// Manage the global tag set
    Tag(TagArgs),
    /// Write a full backup document to a JSON file
    Export(BackupPathArgs),
    /// Replace all state from a backup document
    Import(BackupPathArgs),
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.config {
        env::set_var("CLIPVAULT_CONFIG", path);
    }
    if let Some(path) = &cli.data_dir {
        env::set_var("CLIPVAULT_DATA", path);
    }

    let loader = ConfigLoader::discover()?;
    loader.paths().ensure_directories()?;
    let paths = loader.paths().clone();
    init_tracing(&cli.log_level)
        .with_context(|| format!("initialising logging at level {}", cli.log_level))?;
    let config = loader.load_or_init()?;
    let engine = persist::init(&paths, &config.persist)?;

    match cli.command.unwrap_or(Commands::Monitor) {
        Commands::Monitor => commands::run_monitor(&config, &paths, engine),
        Commands::History(args) => commands::handle_history(&config, &paths, engine, args),
        Commands::Project(args) => commands::handle_project(&config, &paths, engine, args),
        Commands::Folder(args) => commands::handle_folder(&config, &paths, engine, args),
        Commands::Note(args) => commands::handle_note(&config, &paths, engine, args),
        Commands::Tag(args) => commands::handle_tag(&config, &paths, engine, args),
        Commands::Export(args) => commands::export_backup(&config, &paths, engine, args),
        Commands::Import(args) => commands::import_backup(&config, &paths, engine, args),
    }
}

fn init_tracing(level: &str) -> Result<()> {
    static INIT: OnceCell<()> = OnceCell::new();
    INIT.get_or_try_init(|| {
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        Ok(())
    })
    .map(|_| ())
}
