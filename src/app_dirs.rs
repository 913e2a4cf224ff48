//! Application directory paths.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | Data | `~/Library/Application Support/quest-tracker/` | `~/.local/share/quest-tracker/` |
//! | Config | `~/Library/Application Support/quest-tracker/` | `~/.config/quest-tracker/` |
//!
//! # Environment Overrides
//!
//! - `QUEST_TRACKER_DATA_DIR` overrides [`data_dir`]
//! - `QUEST_TRACKER_CONFIG_DIR` overrides [`config_dir`]

use std::path::PathBuf;

const APP_DIR_NAME: &str = "quest-tracker";

/// Application data root directory.
///
/// Resolves to `dirs::data_dir()/quest-tracker/` by default.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("QUEST_TRACKER_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("/tmp/quest-tracker-data"))
}

/// Application config directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("QUEST_TRACKER_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join(APP_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from("/tmp/quest-tracker-config"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

/// Persisted resume list path (`data_dir()/resume.json`).
#[must_use]
pub fn resume_file() -> PathBuf {
    data_dir().join("resume.json")
}
