use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use time::OffsetDateTime;
use uuid::Uuid;

/// Disk-backed store for captured image payloads. History entries keep only
/// the generated filename; the encoded PNG bytes live under the application
/// images directory.
#[derive(Debug, Clone)]
pub struct ImageBlobStore {
    images_dir: PathBuf,
}

impl ImageBlobStore {
    pub fn new(images_dir: PathBuf) -> Self {
        Self { images_dir }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Persist encoded image bytes and return the stable filename used to
    /// reference them. The directory is created on first use.
    pub fn save(&self, encoded: &[u8]) -> Result<String> {
        fs::create_dir_all(&self.images_dir)
            .with_context(|| format!("creating images directory {}", self.images_dir.display()))?;
        let filename = generate_filename();
        let path = self.images_dir.join(&filename);
        fs::write(&path, encoded)
            .with_context(|| format!("writing image blob {}", path.display()))?;
        tracing::debug!(filename = %filename, size = encoded.len(), "stored image blob");
        Ok(filename)
    }

    /// Read a previously saved blob. A missing file is reported as `None`
    /// rather than an error; callers treat it like any other stale
    /// reference.
    pub fn read(&self, filename: &str) -> Result<Option<Vec<u8>>> {
        let path = self.images_dir.join(filename);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("reading image blob {}", path.display()))
            }
        }
    }

    pub fn remove(&self, filename: &str) -> Result<()> {
        let path = self.images_dir.join(filename);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("removing image blob {}", path.display()))
            }
        }
    }
}

fn generate_filename() -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let random = Uuid::new_v4().simple().to_string();
    format!("img_{millis}_{}.png", &random[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn save_then_read_round_trips() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = ImageBlobStore::new(temp.path().join("images"));
        let filename = store.save(b"fake png bytes")?;
        assert!(filename.starts_with("img_"));
        assert!(filename.ends_with(".png"));

        let bytes = store.read(&filename)?.expect("blob present");
        assert_eq!(bytes, b"fake png bytes");
        Ok(())
    }

    #[test]
    fn missing_blob_reads_as_none() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = ImageBlobStore::new(temp.path().join("images"));
        assert!(store.read("img_0_deadbeef.png")?.is_none());
        Ok(())
    }

    #[test]
    fn remove_is_idempotent() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = ImageBlobStore::new(temp.path().join("images"));
        let filename = store.save(b"bytes")?;
        store.remove(&filename)?;
        store.remove(&filename)?;
        assert!(store.read(&filename)?.is_none());
        Ok(())
    }

    #[test]
    fn filenames_are_distinct() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let store = ImageBlobStore::new(temp.path().join("images"));
        let a = store.save(b"one")?;
        let b = store.save(b"one")?;
        assert_ne!(a, b);
        Ok(())
    }
}
