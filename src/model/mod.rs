use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::classify::{classify, ContentType};

/// Literal text stored for image captures; the real payload lives in the
/// blob store and is referenced through `image_data`.
pub const IMAGE_TEXT_LABEL: &str = "Image";

/// A captured clipboard entry in the bounded history log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: String,
    pub text: String,
    pub date: String,
    pub content_type: ContentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_favorite: Option<bool>,
}

impl HistoryItem {
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let content_type = classify(&text);
        Self {
            id: next_id(),
            text,
            date: display_timestamp(),
            content_type,
            image_data: None,
            is_favorite: None,
        }
    }

    pub fn from_image(filename: impl Into<String>) -> Self {
        Self {
            id: next_id(),
            text: IMAGE_TEXT_LABEL.to_string(),
            date: display_timestamp(),
            content_type: ContentType::Image,
            image_data: Some(filename.into()),
            is_favorite: None,
        }
    }

    pub fn is_image(&self) -> bool {
        self.content_type == ContentType::Image
    }

    pub fn favorite(&self) -> bool {
        self.is_favorite.unwrap_or(false)
    }
}

/// A user-curated snippet living inside a folder, independent of the
/// transient history log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NoteItem {
    pub id: String,
    pub text: String,
    pub date: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl NoteItem {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let content_type = classify(&text);
        Self {
            id: next_id(),
            text,
            date: display_timestamp(),
            content_type,
            tags: Vec::new(),
        }
    }

    /// Replace the note body, recomputing its content type so the label
    /// never goes stale relative to the text.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.content_type = classify(&self.text);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Folder {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub notes: Vec<NoteItem>,
}

impl Folder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: next_id(),
            name: name.into(),
            notes: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub folders: Vec<Folder>,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: next_id(),
            name: name.into(),
            folders: Vec::new(),
        }
    }
}

static LAST_ID: AtomicI64 = AtomicI64::new(0);

/// Millisecond-timestamp id, bumped past the previously issued value so
/// ids stay unique and strictly increasing even when two items are created
/// within the same millisecond.
pub fn next_id() -> String {
    let now = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
    let mut prev = LAST_ID.load(Ordering::Relaxed);
    loop {
        let candidate = now.max(prev + 1);
        match LAST_ID.compare_exchange_weak(prev, candidate, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => return candidate.to_string(),
            Err(actual) => prev = actual,
        }
    }
}

pub fn display_timestamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}
