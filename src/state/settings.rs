// SPDX-License-Identifier: MPL-2.0

use crate::config::APP_ID;
use crate::feed::FeedAlgorithm;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which algorithm drives each feed surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSettings {
    pub home: FeedAlgorithm,
    pub discover: FeedAlgorithm,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            home: FeedAlgorithm::default(),
            discover: FeedAlgorithm::Discover,
        }
    }
}

impl FeedSettings {
    /// Get the settings file path (~/.config/io.github.sethcottle.Hearth/settings.json)
    fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|mut p| {
            p.push(APP_ID);
            p.push("settings.json");
            p
        })
    }

    /// Load settings from disk, or return defaults if not found
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Each surface falls back to its own default when its entry is
    /// missing or unreadable; one bad entry does not reset the others.
    pub fn load_from(path: &Path) -> Self {
        let Ok(contents) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&contents) else {
            return Self::default();
        };

        let defaults = Self::default();
        let surface = |name: &str, fallback: FeedAlgorithm| match value.get(name) {
            Some(entry) => FeedAlgorithm::decode_or(entry, fallback),
            None => fallback,
        };
        Self {
            home: surface("home", defaults.home),
            discover: surface("discover", defaults.discover),
        }
    }

    /// Save settings to disk
    pub fn save(&self) -> Result<(), String> {
        let path = Self::settings_path().ok_or("Could not determine config directory")?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create config directory: {e}"))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;

        std::fs::write(path, json).map_err(|e| format!("Failed to write settings: {e}"))?;

        Ok(())
    }
}
