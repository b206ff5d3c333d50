use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};

use crate::app::MonitorApp;
use crate::blob::ImageBlobStore;
use crate::clipboard::ArboardClipboard;
use crate::config::{AppConfig, ConfigPaths};
use crate::model::HistoryItem;
use crate::persist::{PersistenceEngine, WriteOutcome};
use crate::store::HistoryStore;

#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    #[command(subcommand)]
    pub command: HistoryCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum HistoryCommand {
    /// Print the capture history, most recent first
    List(HistoryListArgs),
    /// Search captures by substring
    Search(HistorySearchArgs),
    /// Put a stored capture back on the system clipboard
    Copy(ItemIdArgs),
    /// Toggle the favorite flag on a capture
    Favorite(ItemIdArgs),
    /// Remove a capture from the history
    Delete(ItemIdArgs),
    /// Re-insert a capture from its JSON form (as found in an export)
    Restore(RestoreArgs),
    /// Copy a capture's text into a folder as a note
    Promote(PromoteArgs),
    /// Remove every capture
    Clear,
}

#[derive(Args, Debug, Clone)]
pub struct HistoryListArgs {
    /// Only show favorited captures
    #[arg(long)]
    pub favorites: bool,
    /// Limit the number of entries printed
    #[arg(long, default_value_t = 50)]
    pub limit: usize,
}

#[derive(Args, Debug, Clone)]
pub struct HistorySearchArgs {
    /// Substring to look for (case-insensitive)
    pub query: String,
}

#[derive(Args, Debug, Clone)]
pub struct ItemIdArgs {
    /// Capture identifier as shown by `history list`
    pub id: String,
}

#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    /// Capture entry as a JSON object
    pub item: String,
}

#[derive(Args, Debug, Clone)]
pub struct PromoteArgs {
    /// Capture identifier
    pub id: String,
    /// Target project id
    #[arg(long)]
    pub project: String,
    /// Target folder id
    #[arg(long)]
    pub folder: String,
}

#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    #[command(subcommand)]
    pub command: ProjectCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ProjectCommand {
    /// Print the full project tree
    List,
    /// Create a project
    Add { name: String },
    /// Rename a project
    Rename { id: String, name: String },
    /// Delete a project and everything in it
    Delete { id: String },
}

#[derive(Args, Debug, Clone)]
pub struct FolderArgs {
    /// Project the folder belongs to
    #[arg(long)]
    pub project: String,
    #[command(subcommand)]
    pub command: FolderCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum FolderCommand {
    /// Create a folder
    Add { name: String },
    /// Rename a folder
    Rename { id: String, name: String },
    /// Delete a folder and its notes
    Delete { id: String },
}

#[derive(Args, Debug, Clone)]
pub struct NoteArgs {
    /// Project the note belongs to
    #[arg(long)]
    pub project: String,
    /// Folder the note belongs to
    #[arg(long)]
    pub folder: String,
    #[command(subcommand)]
    pub command: NoteCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum NoteCommand {
    /// Create a note
    Add { text: String },
    /// Replace a note's text
    Edit { id: String, text: String },
    /// Delete a note
    Delete { id: String },
    /// Toggle a tag on a note
    Tag { id: String, tag: String },
}

#[derive(Args, Debug, Clone)]
pub struct TagArgs {
    #[command(subcommand)]
    pub command: TagCommand,
}

#[derive(Subcommand, Debug, Clone)]
pub enum TagCommand {
    /// Print the global tag set
    List,
    /// Add a tag to the global set
    Add { name: String },
    /// Remove a tag from the global set
    Delete { name: String },
}

#[derive(Args, Debug, Clone)]
pub struct BackupPathArgs {
    /// Backup file location
    pub path: PathBuf,
}

pub fn run_monitor(config: &AppConfig, paths: &ConfigPaths, engine: PersistenceEngine) -> Result<()> {
    let mut app = MonitorApp::new(config, paths, engine)?;
    let shutdown = app.shutdown_flag();
    ctrlc::set_handler(move || {
        shutdown.store(true, Ordering::Relaxed);
    })
    .context("installing interrupt handler")?;
    app.run()
}

pub fn handle_history(
    config: &AppConfig,
    paths: &ConfigPaths,
    engine: PersistenceEngine,
    args: HistoryArgs,
) -> Result<()> {
    let mut store = open_store(config, paths, &engine);
    match args.command {
        HistoryCommand::List(args) => {
            let items: Vec<&HistoryItem> = store
                .history()
                .iter()
                .filter(|item| !args.favorites || item.favorite())
                .take(args.limit)
                .collect();
            print!("{}", format_history(&items));
            return Ok(());
        }
        HistoryCommand::Search(args) => {
            let hits = store.search_history(&args.query);
            print!("{}", format_history(&hits));
            return Ok(());
        }
        HistoryCommand::Copy(args) => {
            let mut clipboard = ArboardClipboard::new()?;
            store.copy_item_to_clipboard(&args.id, &mut clipboard)?;
            println!("Copied #{} to clipboard", args.id);
            return Ok(());
        }
        HistoryCommand::Favorite(args) => {
            if store.find_history_item(&args.id).is_none() {
                bail!("capture #{} not found", args.id);
            }
            store.toggle_favorite(&args.id);
            let state = store
                .find_history_item(&args.id)
                .map(HistoryItem::favorite)
                .unwrap_or(false);
            println!(
                "Capture #{} {}",
                args.id,
                if state { "favorited" } else { "unfavorited" }
            );
        }
        HistoryCommand::Delete(args) => {
            if store.find_history_item(&args.id).is_none() {
                bail!("capture #{} not found", args.id);
            }
            store.delete_history_item(&args.id);
            println!("Deleted capture #{}", args.id);
        }
        HistoryCommand::Restore(args) => {
            let item: HistoryItem =
                serde_json::from_str(&args.item).context("parsing capture JSON")?;
            let id = item.id.clone();
            store.restore_history_item(item);
            println!("Restored capture #{id}");
        }
        HistoryCommand::Promote(args) => {
            let Some(note_id) = store.promote_history_item(&args.id, &args.project, &args.folder)
            else {
                bail!("capture, project or folder not found");
            };
            println!("Promoted capture #{} to note #{note_id}", args.id);
        }
        HistoryCommand::Clear => {
            let removed = store.history().len();
            store.clear_history();
            println!("Cleared {removed} capture(s)");
        }
    }
    commit(store, &engine)
}

pub fn handle_project(
    config: &AppConfig,
    paths: &ConfigPaths,
    engine: PersistenceEngine,
    args: ProjectArgs,
) -> Result<()> {
    let mut store = open_store(config, paths, &engine);
    match args.command {
        ProjectCommand::List => {
            print!("{}", format_project_tree(&store));
            return Ok(());
        }
        ProjectCommand::Add { name } => {
            let name = non_empty(&name, "project name")?;
            let id = store.add_project(name);
            println!("Created project #{id} ({name})");
        }
        ProjectCommand::Rename { id, name } => {
            let name = non_empty(&name, "project name")?;
            ensure_project(&store, &id)?;
            store.rename_project(&id, name);
            println!("Renamed project #{id} to '{name}'");
        }
        ProjectCommand::Delete { id } => {
            ensure_project(&store, &id)?;
            store.delete_project(&id);
            println!("Deleted project #{id}");
        }
    }
    commit(store, &engine)
}

pub fn handle_folder(
    config: &AppConfig,
    paths: &ConfigPaths,
    engine: PersistenceEngine,
    args: FolderArgs,
) -> Result<()> {
    let mut store = open_store(config, paths, &engine);
    ensure_project(&store, &args.project)?;
    match args.command {
        FolderCommand::Add { name } => {
            let name = non_empty(&name, "folder name")?;
            let Some(id) = store.add_folder(&args.project, name) else {
                bail!("project #{} not found", args.project);
            };
            println!("Created folder #{id} ({name})");
        }
        FolderCommand::Rename { id, name } => {
            let name = non_empty(&name, "folder name")?;
            store.rename_folder(&args.project, &id, name);
            println!("Renamed folder #{id} to '{name}'");
        }
        FolderCommand::Delete { id } => {
            store.delete_folder(&args.project, &id);
            println!("Deleted folder #{id}");
        }
    }
    commit(store, &engine)
}

pub fn handle_note(
    config: &AppConfig,
    paths: &ConfigPaths,
    engine: PersistenceEngine,
    args: NoteArgs,
) -> Result<()> {
    let mut store = open_store(config, paths, &engine);
    match args.command {
        NoteCommand::Add { text } => {
            let Some(id) = store.add_note(&args.project, &args.folder, &text) else {
                bail!("project or folder not found");
            };
            println!("Created note #{id}");
        }
        NoteCommand::Edit { id, text } => {
            store.edit_note(&args.project, &args.folder, &id, &text);
            println!("Updated note #{id}");
        }
        NoteCommand::Delete { id } => {
            store.delete_note(&args.project, &args.folder, &id);
            println!("Deleted note #{id}");
        }
        NoteCommand::Tag { id, tag } => {
            store.toggle_note_tag(&args.project, &args.folder, &id, &tag);
            println!("Toggled tag '{tag}' on note #{id}");
        }
    }
    commit(store, &engine)
}

pub fn handle_tag(
    config: &AppConfig,
    paths: &ConfigPaths,
    engine: PersistenceEngine,
    args: TagArgs,
) -> Result<()> {
    let mut store = open_store(config, paths, &engine);
    match args.command {
        TagCommand::List => {
            let tags: Vec<&str> = store.global_tags().collect();
            if tags.is_empty() {
                println!("(no tags)");
            } else {
                for tag in tags {
                    println!("#{tag}");
                }
            }
            return Ok(());
        }
        TagCommand::Add { name } => {
            let name = non_empty(&name, "tag")?;
            store.add_global_tag(name);
            println!("Added tag '{name}'");
        }
        TagCommand::Delete { name } => {
            store.delete_global_tag(&name);
            println!("Deleted tag '{name}'");
        }
    }
    commit(store, &engine)
}

pub fn export_backup(
    config: &AppConfig,
    paths: &ConfigPaths,
    engine: PersistenceEngine,
    args: BackupPathArgs,
) -> Result<()> {
    let store = open_store(config, paths, &engine);
    store.export_backup_to_path(&args.path)?;
    println!("Backup written to {}", args.path.display());
    Ok(())
}

pub fn import_backup(
    config: &AppConfig,
    paths: &ConfigPaths,
    engine: PersistenceEngine,
    args: BackupPathArgs,
) -> Result<()> {
    let mut store = open_store(config, paths, &engine);
    let document = store.import_backup_from_path(&args.path)?;
    println!(
        "Imported {} capture(s), {} project(s), {} tag(s) from backup dated {}",
        document.history.len(),
        document.projects.len(),
        document.global_tags.len(),
        document.date
    );
    commit(store, &engine)
}

fn open_store(config: &AppConfig, paths: &ConfigPaths, engine: &PersistenceEngine) -> HistoryStore {
    let blobs = ImageBlobStore::new(paths.images_dir.clone());
    HistoryStore::load(engine, config, blobs)
}

/// Flush every scheduled write before the process exits; one-shot commands
/// never get a second tick to retry on.
fn commit(mut store: HistoryStore, engine: &PersistenceEngine) -> Result<()> {
    for outcome in store.flush_now(engine) {
        if let WriteOutcome::Failed { key, message } = outcome {
            bail!("failed to persist {key}: {message}");
        }
    }
    Ok(())
}

fn ensure_project(store: &HistoryStore, project_id: &str) -> Result<()> {
    if !store.projects().iter().any(|p| p.id == project_id) {
        bail!("project #{project_id} not found");
    }
    Ok(())
}

fn non_empty<'a>(value: &'a str, label: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        bail!("{label} cannot be empty");
    }
    Ok(trimmed)
}

fn format_history(items: &[&HistoryItem]) -> String {
    if items.is_empty() {
        return "No captures.\n".to_string();
    }
    let mut out = String::new();
    for item in items {
        let mut headline = format!("#{}  [{}]", item.id, item.content_type);
        if item.favorite() {
            headline.push_str("  [FAVORITE]");
        }
        let _ = writeln!(&mut out, "{headline}");
        let _ = writeln!(&mut out, "    captured {}", item.date);
        if let Some(reference) = item.image_data.as_deref() {
            let _ = writeln!(&mut out, "    image    {reference}");
        } else {
            let _ = writeln!(&mut out, "    {}", snippet(&item.text));
        }
        out.push('\n');
    }
    out
}

fn format_project_tree(store: &HistoryStore) -> String {
    let mut out = String::new();
    for project in store.projects() {
        let _ = writeln!(&mut out, "#{}  {}", project.id, project.name);
        for folder in &project.folders {
            let _ = writeln!(&mut out, "  #{}  {}/", folder.id, folder.name);
            for note in &folder.notes {
                let mut line = format!("    #{}  [{}] {}", note.id, note.content_type, snippet(&note.text));
                if !note.tags.is_empty() {
                    let tags: Vec<String> = note.tags.iter().map(|t| format!("#{t}")).collect();
                    let _ = write!(&mut line, "  {}", tags.join(" "));
                }
                let _ = writeln!(&mut out, "{line}");
            }
        }
    }
    out
}

fn snippet(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("");
    let mut cleaned: String = first_line.trim().chars().take(80).collect();
    if cleaned.len() < first_line.trim().len() || text.lines().count() > 1 {
        cleaned.push('…');
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::ClipEvent;
    use crate::persist::test_support::temp_engine;
    use tempfile::TempDir;

    fn populated_store() -> HistoryStore {
        let mut store = HistoryStore::empty_for_test(50);
        store.process_clipboard_content(ClipEvent::Text("first capture".into()));
        store.process_clipboard_content(ClipEvent::Text("https://example.com".into()));
        store
    }

    #[test]
    fn history_listing_shows_type_and_favorite_marker() {
        let mut store = populated_store();
        let id = store.history()[0].id.clone();
        store.toggle_favorite(&id);

        let items: Vec<&HistoryItem> = store.history().iter().collect();
        let output = format_history(&items);
        assert!(output.contains("[url]"));
        assert!(output.contains("[FAVORITE]"));
        assert!(output.contains("first capture"));
    }

    #[test]
    fn empty_history_listing_has_placeholder() {
        assert_eq!(format_history(&[]), "No captures.\n");
    }

    #[test]
    fn project_tree_lists_folders_and_tagged_notes() {
        let mut store = HistoryStore::empty_for_test(50);
        let project_id = store.projects()[0].id.clone();
        let folder_id = store.add_folder(&project_id, "Snippets").unwrap();
        let note_id = store.add_note(&project_id, &folder_id, "let x = 1;").unwrap();
        store.toggle_note_tag(&project_id, &folder_id, &note_id, "rust");

        let output = format_project_tree(&store);
        assert!(output.contains("Default"));
        assert!(output.contains("Snippets/"));
        assert!(output.contains("[code]"));
        assert!(output.contains("#rust"));
    }

    #[test]
    fn snippet_truncates_long_and_multiline_text() {
        assert_eq!(snippet("short"), "short");
        assert_eq!(snippet("line one\nline two"), "line one…");
        let long = "x".repeat(120);
        assert_eq!(snippet(&long).chars().count(), 81);
    }

    #[test]
    fn export_then_import_round_trips_through_a_file() -> Result<()> {
        let temp = TempDir::new()?;
        let engine = temp_engine(&temp)?;
        let path = temp.path().join("backup.json");

        let store = populated_store();
        store.export_backup_to_path(&path)?;

        let mut target = HistoryStore::empty_for_test(50);
        let document = target.import_backup_from_path(&path)?;
        assert_eq!(document.history.len(), 2);
        assert_eq!(target.history().len(), 2);
        commit(target, &engine)?;

        let config = AppConfig::default();
        let blobs = ImageBlobStore::new(temp.path().join("images"));
        let reloaded = HistoryStore::load(&engine, &config, blobs);
        assert_eq!(reloaded.history().len(), 2);
        Ok(())
    }

    #[test]
    fn commit_persists_scheduled_state() -> Result<()> {
        let temp = TempDir::new()?;
        let engine = temp_engine(&temp)?;
        let mut store = HistoryStore::empty_for_test(50);
        store.add_global_tag("durable");

        commit(store, &engine)?;
        let config = AppConfig::default();
        let blobs = ImageBlobStore::new(temp.path().join("images"));
        let reloaded = HistoryStore::load(&engine, &config, blobs);
        assert_eq!(reloaded.global_tags().collect::<Vec<_>>(), vec!["durable"]);
        Ok(())
    }
}
