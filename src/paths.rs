use anyhow::{Context, Result};
use directories::BaseDirs;
use std::path::PathBuf;

/// Environment variable overriding the base directory (~/.guise)
pub const HOME_ENV: &str = "GUISE_HOME";

/// All computed paths used by guise
#[derive(Debug, Clone)]
pub struct Paths {
    /// The user's home directory, used to seed default tool locations
    pub home_dir: PathBuf,
    /// ~/.guise
    pub base_dir: PathBuf,
    /// ~/.guise/store
    pub store_dir: PathBuf,
    /// ~/.guise/config.json
    pub config_file: PathBuf,
}

impl Paths {
    pub fn new() -> Result<Self> {
        let base_dirs = BaseDirs::new().context("Failed to determine home directory")?;
        let home = base_dirs.home_dir().to_path_buf();

        let base_dir = match std::env::var_os(HOME_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => home.join(".guise"),
        };

        Ok(Self::with_base(home, base_dir))
    }

    /// Build paths rooted at an explicit base directory
    pub fn with_base(home_dir: PathBuf, base_dir: PathBuf) -> Self {
        Self {
            home_dir,
            store_dir: base_dir.join("store"),
            config_file: base_dir.join("config.json"),
            base_dir,
        }
    }

    /// Directory holding every snapshot of one tool
    pub fn tool_store_dir(&self, tool_id: &str) -> PathBuf {
        self.store_dir.join(tool_id)
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.store_dir).with_context(|| {
            format!("Failed to create store directory: {:?}", self.store_dir)
        })?;
        Ok(())
    }
}
