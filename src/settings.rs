//! # Persisted Settings Module
//!
//! Application settings that survive across runs: a bounded list of
//! most-recently-used file paths and the last window geometry. Loaded at
//! startup, written back at shutdown only when something changed.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Maximum number of remembered paths; the oldest entry is evicted.
const MRU_LIMIT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowGeometry {
    pub maximized: bool,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub most_recently_used: Vec<PathBuf>,
    pub window: Option<WindowGeometry>,
    #[serde(skip)]
    modified: bool,
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl AppSettings {
    /// Load settings from a file; a missing or unreadable file yields
    /// defaults bound to the same path.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut settings = std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| serde_json::from_str::<AppSettings>(&content).ok())
            .unwrap_or_default();
        settings.path = Some(path);
        settings
    }

    /// Load from the default location: `$NCPLOT_SETTINGS`, or
    /// `~/.ncplot/settings.json`.
    pub fn load_default() -> Self {
        let path = std::env::var_os("NCPLOT_SETTINGS")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
                home.join(".ncplot").join("settings.json")
            });
        Self::load(path)
    }

    /// Remember a path, moving a duplicate to the front and evicting the
    /// oldest entry beyond the limit.
    pub fn add_recent_path(&mut self, path: &Path) {
        let path = path.to_path_buf();
        self.most_recently_used.retain(|p| *p != path);
        self.most_recently_used.insert(0, path);
        self.most_recently_used.truncate(MRU_LIMIT);
        self.modified = true;
    }

    /// Drop remembered paths that no longer exist on disk.
    pub fn remove_nonexistent(&mut self) {
        let before = self.most_recently_used.len();
        self.most_recently_used.retain(|p| p.exists());
        if self.most_recently_used.len() != before {
            self.modified = true;
        }
    }

    pub fn set_window_geometry(&mut self, geometry: WindowGeometry) {
        if self.window != Some(geometry) {
            self.window = Some(geometry);
            self.modified = true;
        }
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// Write the settings back if anything changed since loading.
    pub fn save_if_modified(&mut self) -> Result<()> {
        if !self.modified {
            return Ok(());
        }
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self).expect("settings serialize");
        std::fs::write(&path, content)?;
        self.modified = false;
        Ok(())
    }
}
