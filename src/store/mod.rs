use anyhow::{Context, Result};
use indexmap::IndexSet;

use crate::blob::ImageBlobStore;
use crate::clipboard::{ClipEvent, SystemClipboard};
use crate::config::AppConfig;
use crate::model::{Folder, HistoryItem, NoteItem, Project};
use crate::persist::{DebouncedWriter, PersistKey, PersistenceEngine, WriteOutcome};

pub mod backup;

pub const DEFAULT_PROJECT_NAME: &str = "Default";

/// Owner of all mutable application state: the bounded capture history,
/// the project/folder/note tree and the global tag set.
///
/// Every mutation goes through a method here, and every method that
/// changes state schedules exactly one key on the debounced writer. The
/// in-memory state is the momentary source of truth; persistence trails it
/// by at most the debounce window. The store also owns the image blob
/// store: an image entry leaving the history (delete, clear, eviction)
/// takes its PNG on disk with it.
pub struct HistoryStore {
    history: Vec<HistoryItem>,
    projects: Vec<Project>,
    global_tags: IndexSet<String>,
    max_items: usize,
    writer: DebouncedWriter,
    blobs: ImageBlobStore,
}

impl HistoryStore {
    /// Load state from the persistence engine. Any key that is absent or
    /// unreadable falls back to its default instead of failing startup:
    /// empty history and tags, a single default project.
    pub fn load(engine: &PersistenceEngine, config: &AppConfig, blobs: ImageBlobStore) -> Self {
        let history = read_or_default::<Vec<HistoryItem>>(engine, PersistKey::History)
            .unwrap_or_default();
        let projects = read_or_default::<Vec<Project>>(engine, PersistKey::Projects)
            .filter(|projects| !projects.is_empty())
            .unwrap_or_else(|| vec![Project::new(DEFAULT_PROJECT_NAME)]);
        let global_tags = read_or_default::<IndexSet<String>>(engine, PersistKey::GlobalTags)
            .unwrap_or_default();

        Self {
            history,
            projects,
            global_tags,
            max_items: config.history.max_items,
            writer: DebouncedWriter::new(config.persist.debounce()),
            blobs,
        }
    }

    #[cfg(test)]
    pub(crate) fn empty_for_test(max_items: usize) -> Self {
        Self::for_test(max_items, ImageBlobStore::new(std::path::PathBuf::new()))
    }

    #[cfg(test)]
    pub(crate) fn for_test(max_items: usize, blobs: ImageBlobStore) -> Self {
        Self {
            history: Vec::new(),
            projects: vec![Project::new(DEFAULT_PROJECT_NAME)],
            global_tags: IndexSet::new(),
            max_items,
            writer: DebouncedWriter::new(std::time::Duration::ZERO),
            blobs,
        }
    }

    pub fn history(&self) -> &[HistoryItem] {
        &self.history
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn global_tags(&self) -> impl Iterator<Item = &str> {
        self.global_tags.iter().map(String::as_str)
    }

    // ---- capture pipeline ----

    /// Apply a poller event. Dedup compares against the single most-recent
    /// entry only; an older identical entry further down the log does not
    /// suppress a new capture (recency-only policy). The check and the
    /// insert run back to back with no suspension point between them.
    pub fn process_clipboard_content(&mut self, event: ClipEvent) {
        if self.is_duplicate_of_latest(&event) {
            tracing::debug!("dropping duplicate clipboard event");
            return;
        }
        let item = match event {
            ClipEvent::Text(text) => HistoryItem::from_text(text),
            ClipEvent::Image { filename } => HistoryItem::from_image(filename),
        };
        self.history.insert(0, item);
        self.truncate_history();
        self.schedule_history();
    }

    fn is_duplicate_of_latest(&self, event: &ClipEvent) -> bool {
        let Some(latest) = self.history.first() else {
            return false;
        };
        match event {
            ClipEvent::Text(text) => !latest.is_image() && latest.text == *text,
            ClipEvent::Image { filename } => {
                latest.is_image() && latest.image_data.as_deref() == Some(filename.as_str())
            }
        }
    }

    // ---- history mutators ----

    pub fn toggle_favorite(&mut self, item_id: &str) {
        let Some(item) = self.history.iter_mut().find(|item| item.id == item_id) else {
            return;
        };
        item.is_favorite = Some(!item.is_favorite.unwrap_or(false));
        self.schedule_history();
    }

    pub fn delete_history_item(&mut self, item_id: &str) {
        let Some(pos) = self.history.iter().position(|item| item.id == item_id) else {
            return;
        };
        let removed = self.history.remove(pos);
        self.discard_blob(&removed);
        self.schedule_history();
    }

    /// Put a previously removed item back at the top of the log.
    /// Idempotent: restoring an id already present changes nothing.
    pub fn restore_history_item(&mut self, item: HistoryItem) {
        if self.history.iter().any(|existing| existing.id == item.id) {
            return;
        }
        self.history.insert(0, item);
        self.truncate_history();
        self.schedule_history();
    }

    pub fn clear_history(&mut self) {
        if self.history.is_empty() {
            return;
        }
        for item in &self.history {
            self.discard_blob(item);
        }
        self.history.clear();
        self.schedule_history();
    }

    /// Case-insensitive substring match over the capture log.
    pub fn search_history(&self, needle: &str) -> Vec<&HistoryItem> {
        let needle = needle.to_lowercase();
        self.history
            .iter()
            .filter(|item| item.text.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn find_history_item(&self, item_id: &str) -> Option<&HistoryItem> {
        self.history.iter().find(|item| item.id == item_id)
    }

    /// Write a stored entry back to the OS clipboard. Image entries are
    /// read back out of the blob store first.
    pub fn copy_item_to_clipboard(
        &self,
        item_id: &str,
        clipboard: &mut dyn SystemClipboard,
    ) -> Result<()> {
        let item = self
            .find_history_item(item_id)
            .with_context(|| format!("history item {item_id} not found"))?;
        if item.is_image() {
            let reference = item
                .image_data
                .as_deref()
                .context("image entry has no stored reference")?;
            let encoded = self
                .blobs
                .read(reference)?
                .with_context(|| format!("image blob {reference} missing from disk"))?;
            clipboard.write_image_encoded(&encoded)?;
        } else {
            clipboard.write_text(&item.text)?;
        }
        Ok(())
    }

    // ---- project tree mutators ----

    pub fn add_project(&mut self, name: &str) -> String {
        let project = Project::new(name);
        let id = project.id.clone();
        self.projects.push(project);
        self.schedule_projects();
        id
    }

    pub fn rename_project(&mut self, project_id: &str, name: &str) {
        let Some(project) = self.project_mut(project_id) else {
            return;
        };
        project.name = name.to_string();
        self.schedule_projects();
    }

    /// Remove a project and everything it owns. The store never ends up
    /// without a project: deleting the last one reseeds the default.
    pub fn delete_project(&mut self, project_id: &str) {
        let before = self.projects.len();
        self.projects.retain(|project| project.id != project_id);
        if self.projects.len() == before {
            return;
        }
        if self.projects.is_empty() {
            self.projects.push(Project::new(DEFAULT_PROJECT_NAME));
        }
        self.schedule_projects();
    }

    pub fn add_folder(&mut self, project_id: &str, name: &str) -> Option<String> {
        let project = self.project_mut(project_id)?;
        let folder = Folder::new(name);
        let id = folder.id.clone();
        project.folders.push(folder);
        self.schedule_projects();
        Some(id)
    }

    pub fn rename_folder(&mut self, project_id: &str, folder_id: &str, name: &str) {
        let Some(folder) = self.folder_mut(project_id, folder_id) else {
            return;
        };
        folder.name = name.to_string();
        self.schedule_projects();
    }

    /// Deleting a folder cascades to its notes; they have no life outside
    /// their folder.
    pub fn delete_folder(&mut self, project_id: &str, folder_id: &str) {
        let Some(project) = self.project_mut(project_id) else {
            return;
        };
        let before = project.folders.len();
        project.folders.retain(|folder| folder.id != folder_id);
        if project.folders.len() != before {
            self.schedule_projects();
        }
    }

    pub fn add_note(&mut self, project_id: &str, folder_id: &str, text: &str) -> Option<String> {
        let folder = self.folder_mut(project_id, folder_id)?;
        let note = NoteItem::new(text);
        let id = note.id.clone();
        folder.notes.push(note);
        self.schedule_projects();
        Some(id)
    }

    /// Edit a note body; its content type is recomputed so the badge never
    /// goes stale.
    pub fn edit_note(&mut self, project_id: &str, folder_id: &str, note_id: &str, text: &str) {
        let Some(note) = self.note_mut(project_id, folder_id, note_id) else {
            return;
        };
        note.set_text(text);
        self.schedule_projects();
    }

    pub fn delete_note(&mut self, project_id: &str, folder_id: &str, note_id: &str) {
        let Some(folder) = self.folder_mut(project_id, folder_id) else {
            return;
        };
        let before = folder.notes.len();
        folder.notes.retain(|note| note.id != note_id);
        if folder.notes.len() != before {
            self.schedule_projects();
        }
    }

    pub fn toggle_note_tag(&mut self, project_id: &str, folder_id: &str, note_id: &str, tag: &str) {
        let Some(note) = self.note_mut(project_id, folder_id, note_id) else {
            return;
        };
        if let Some(pos) = note.tags.iter().position(|existing| existing == tag) {
            note.tags.remove(pos);
        } else {
            note.tags.push(tag.to_string());
        }
        self.schedule_projects();
    }

    /// Turn a captured history entry into a curated note inside a folder.
    /// The entry itself stays in history.
    pub fn promote_history_item(
        &mut self,
        item_id: &str,
        project_id: &str,
        folder_id: &str,
    ) -> Option<String> {
        let text = self.find_history_item(item_id)?.text.clone();
        self.add_note(project_id, folder_id, &text)
    }

    // ---- global tags ----

    pub fn add_global_tag(&mut self, tag: &str) {
        let tag = tag.trim();
        if tag.is_empty() {
            return;
        }
        if self.global_tags.insert(tag.to_string()) {
            self.schedule_tags();
        }
    }

    /// Remove a tag from the global set. Notes that already carry the tag
    /// keep it; note tags are free-form strings, not foreign keys.
    pub fn delete_global_tag(&mut self, tag: &str) {
        if self.global_tags.shift_remove(tag) {
            self.schedule_tags();
        }
    }

    // ---- persistence plumbing ----

    /// Flush debounced writes whose quiet period has elapsed. Called from
    /// the owning loop's tick.
    pub fn poll_writes(&mut self, engine: &PersistenceEngine) -> Vec<WriteOutcome> {
        self.writer.poll(engine)
    }

    /// Flush everything pending, ignoring the quiet period. Shutdown path.
    pub fn flush_now(&mut self, engine: &PersistenceEngine) -> Vec<WriteOutcome> {
        self.writer.flush_now(engine)
    }

    pub fn has_pending_writes(&self) -> bool {
        self.writer.has_pending()
    }

    /// Enforce the retention bound, reclaiming the blobs of evicted image
    /// entries.
    fn truncate_history(&mut self) {
        if self.history.len() <= self.max_items {
            return;
        }
        for evicted in self.history.split_off(self.max_items) {
            self.discard_blob(&evicted);
        }
    }

    /// Best-effort blob removal for an entry leaving the history. A
    /// deletion failure is logged and the file orphaned; it never blocks
    /// the state mutation. Duplicate image events share their predecessor's
    /// filename and are dropped before reaching here, so a live entry's
    /// blob is never removed.
    fn discard_blob(&self, item: &HistoryItem) {
        let Some(reference) = item.image_data.as_deref() else {
            return;
        };
        if let Err(err) = self.blobs.remove(reference) {
            tracing::warn!(%reference, ?err, "failed to remove image blob");
        }
    }

    fn schedule_history(&mut self) {
        match serde_json::to_value(&self.history) {
            Ok(value) => self.writer.schedule(PersistKey::History, value),
            Err(err) => tracing::error!(?err, "failed to serialise history for persistence"),
        }
    }

    fn schedule_projects(&mut self) {
        match serde_json::to_value(&self.projects) {
            Ok(value) => self.writer.schedule(PersistKey::Projects, value),
            Err(err) => tracing::error!(?err, "failed to serialise projects for persistence"),
        }
    }

    fn schedule_tags(&mut self) {
        match serde_json::to_value(&self.global_tags) {
            Ok(value) => self.writer.schedule(PersistKey::GlobalTags, value),
            Err(err) => tracing::error!(?err, "failed to serialise tags for persistence"),
        }
    }

    // ---- id path resolution (silent no-op when the path is broken) ----

    fn project_mut(&mut self, project_id: &str) -> Option<&mut Project> {
        self.projects
            .iter_mut()
            .find(|project| project.id == project_id)
    }

    fn folder_mut(&mut self, project_id: &str, folder_id: &str) -> Option<&mut Folder> {
        self.project_mut(project_id)?
            .folders
            .iter_mut()
            .find(|folder| folder.id == folder_id)
    }

    fn note_mut(
        &mut self,
        project_id: &str,
        folder_id: &str,
        note_id: &str,
    ) -> Option<&mut NoteItem> {
        self.folder_mut(project_id, folder_id)?
            .notes
            .iter_mut()
            .find(|note| note.id == note_id)
    }
}

fn read_or_default<T: serde::de::DeserializeOwned>(
    engine: &PersistenceEngine,
    key: PersistKey,
) -> Option<T> {
    match engine.get(key) {
        Ok(Some(value)) => match serde_json::from_value(value) {
            Ok(parsed) => Some(parsed),
            Err(err) => {
                tracing::warn!(%key, ?err, "stored value unreadable, using default");
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            tracing::warn!(%key, ?err, "failed to read persisted key, using default");
            None
        }
    }
}
