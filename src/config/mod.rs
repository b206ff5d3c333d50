use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

const APP_DOMAIN: &str = "io";
const APP_ORG: &str = "Clipvault";
const APP_NAME: &str = "clipvault";

pub struct ConfigLoader {
    paths: ConfigPaths,
}

impl ConfigLoader {
    pub fn discover() -> Result<Self> {
        let paths = ConfigPaths::discover()?;
        Ok(Self { paths })
    }

    pub fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub fn load_or_init(&self) -> Result<AppConfig> {
        self.paths.ensure_directories()?;
        if !self.paths.config_file.exists() {
            let mut default_cfg = AppConfig::default();
            default_cfg.post_load(&self.paths)?;
            self.write_default_config(&default_cfg)?;
            return Ok(default_cfg);
        }

        self.load()
    }

    pub fn load(&self) -> Result<AppConfig> {
        let raw = fs::read_to_string(&self.paths.config_file)
            .with_context(|| format!("reading config {}", self.paths.config_file.display()))?;
        let mut cfg: AppConfig = toml::from_str(&raw).context("parsing config toml")?;
        cfg.post_load(&self.paths)?;
        Ok(cfg)
    }

    fn write_default_config(&self, cfg: &AppConfig) -> Result<()> {
        let toml = toml::to_string_pretty(cfg).context("serializing default config")?;
        if let Some(parent) = self.paths.config_file.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
        }
        let mut file = fs::File::create(&self.paths.config_file)
            .with_context(|| format!("creating config {}", self.paths.config_file.display()))?;
        file.write_all(toml.as_bytes())
            .context("writing default config")?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_dir: PathBuf,
    pub config_file: PathBuf,
    pub data_dir: PathBuf,
    pub database_path: PathBuf,
    pub images_dir: PathBuf,
    pub log_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl ConfigPaths {
    pub fn discover() -> Result<Self> {
        let override_config = env::var("CLIPVAULT_CONFIG").ok().map(PathBuf::from);
        let override_data = env::var("CLIPVAULT_DATA").ok().map(PathBuf::from);

        let project_dirs = ProjectDirs::from(APP_DOMAIN, APP_ORG, APP_NAME)
            .context("resolving XDG project directories")?;

        let config_dir = override_config
            .clone()
            .map(|p| {
                if p.is_dir() {
                    p
                } else {
                    p.parent().map(Path::to_path_buf).unwrap_or(p)
                }
            })
            .unwrap_or_else(|| project_dirs.config_dir().to_path_buf());

        let config_file = override_config
            .filter(|p| p.is_file() || p.extension().is_some())
            .unwrap_or_else(|| config_dir.join("config.toml"));

        let data_root = override_data.unwrap_or_else(|| project_dirs.data_dir().to_path_buf());
        let database_path = data_root.join("clipvault.db");
        let images_dir = data_root.join("images");
        let state_dir = project_dirs
            .state_dir()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| data_root.join("state"));
        let log_dir = state_dir.join("logs");

        Ok(Self {
            config_dir,
            config_file,
            data_dir: data_root,
            database_path,
            images_dir,
            log_dir,
            state_dir,
        })
    }

    /// Build all paths beneath one base directory. Used for throwaway
    /// setups (tests, ad-hoc sandboxes) where XDG discovery is unwanted.
    pub fn for_base_dir(base: &Path) -> Self {
        let config_dir = base.join("config");
        let data_dir = base.join("data");
        let state_dir = base.join("state");
        Self {
            config_file: config_dir.join("config.toml"),
            config_dir,
            database_path: data_dir.join("clipvault.db"),
            images_dir: data_dir.join("images"),
            log_dir: state_dir.join("logs"),
            data_dir,
            state_dir,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.images_dir,
            &self.log_dir,
            &self.state_dir,
        ] {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating application directory {}", dir.display()))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub history: HistoryOptions,
    pub poller: PollerOptions,
    pub persist: PersistOptions,
}

impl AppConfig {
    fn post_load(&mut self, paths: &ConfigPaths) -> Result<()> {
        self.persist
            .resolve(paths)
            .context("resolving persistence paths")?;
        if self.history.max_items == 0 {
            tracing::warn!("history.max_items of 0 is not usable, falling back to default");
            self.history.max_items = HistoryOptions::default().max_items;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryOptions {
    /// Sliding-window retention bound for the capture log.
    pub max_items: usize,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self { max_items: 50 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerOptions {
    pub interval_ms: u64,
    /// Bytes taken from each end of an encoded image payload to build the
    /// change-detection fingerprint.
    pub fingerprint_window: usize,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            fingerprint_window: 50,
        }
    }
}

impl PollerOptions {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistOptions {
    #[serde(skip)]
    pub database_path: PathBuf,
    pub wal_autocheckpoint: u32,
    pub debounce_ms: u64,
}

impl Default for PersistOptions {
    fn default() -> Self {
        Self {
            database_path: PathBuf::new(),
            wal_autocheckpoint: 1000,
            debounce_ms: 500,
        }
    }
}

impl PersistOptions {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    fn resolve(&mut self, paths: &ConfigPaths) -> Result<()> {
        if self.database_path.as_os_str().is_empty() {
            self.database_path = paths.database_path.clone();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_round_trips_through_toml() -> anyhow::Result<()> {
        let cfg = AppConfig::default();
        let raw = toml::to_string_pretty(&cfg)?;
        let parsed: AppConfig = toml::from_str(&raw)?;
        assert_eq!(parsed.history.max_items, 50);
        assert_eq!(parsed.poller.interval_ms, 1000);
        assert_eq!(parsed.poller.fingerprint_window, 50);
        assert_eq!(parsed.persist.debounce_ms, 500);
        Ok(())
    }

    #[test]
    fn partial_config_fills_defaults() -> anyhow::Result<()> {
        let parsed: AppConfig = toml::from_str("[poller]\ninterval_ms = 250\n")?;
        assert_eq!(parsed.poller.interval_ms, 250);
        assert_eq!(parsed.history.max_items, 50);
        Ok(())
    }

    #[test]
    fn zero_max_items_falls_back_to_default() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let paths = ConfigPaths::for_base_dir(temp.path());
        let mut cfg: AppConfig = toml::from_str("[history]\nmax_items = 0\n")?;
        cfg.post_load(&paths)?;
        assert_eq!(cfg.history.max_items, 50);
        Ok(())
    }

    #[test]
    fn base_dir_paths_stay_under_base() {
        let paths = ConfigPaths::for_base_dir(Path::new("/tmp/cv"));
        assert!(paths.database_path.starts_with("/tmp/cv"));
        assert!(paths.images_dir.starts_with("/tmp/cv"));
        assert!(paths.config_file.starts_with("/tmp/cv"));
    }
}
