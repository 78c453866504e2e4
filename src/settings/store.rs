use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::settings::types::PipelineSettings;

/// Settings persistence errors.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("settings I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("settings file is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Pipeline settings held in memory and mirrored to a JSON file.
pub struct SettingsStore {
    path: PathBuf,
    current: Mutex<PipelineSettings>,
}

impl SettingsStore {
    /// Open the store at `path`. A missing file means defaults; a broken one
    /// is logged and also replaced by defaults (the file is left untouched
    /// until the next [`save`](Self::save)).
    pub fn new(path: PathBuf) -> Self {
        let settings = match Self::load(&path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Ignoring settings at {}: {e}", path.display());
                PipelineSettings::default()
            }
        };
        Self {
            path,
            current: Mutex::new(settings),
        }
    }

    /// Read `path`, or return defaults if it does not exist.
    pub fn load(path: &Path) -> Result<PipelineSettings> {
        match fs::read_to_string(path) {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(PipelineSettings::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Re-read the file, replacing the in-memory copy on success.
    pub fn reload(&self) -> Result<()> {
        let settings = Self::load(&self.path)?;
        *self.current.lock() = settings;
        Ok(())
    }

    /// Write the current settings. The JSON goes to a sibling `.json.tmp`
    /// first and is renamed over the target, so readers never see a torn file.
    pub fn save(&self) -> Result<()> {
        let json = serde_json::to_string_pretty(&*self.current.lock())?;
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, json)?;
        fs::rename(&staging, &self.path)?;
        debug!("settings saved to {}", self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> PipelineSettings {
        self.current.lock().clone()
    }

    /// Edit the in-memory settings; persist with [`save`](Self::save).
    pub fn update(&self, edit: impl FnOnce(&mut PipelineSettings)) {
        edit(&mut self.current.lock());
    }

    pub fn reset_to_defaults(&self) {
        *self.current.lock() = PipelineSettings::default();
    }
}
