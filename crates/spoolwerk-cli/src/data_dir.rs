// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Platform-aware data directory resolution and config persistence.

use std::path::{Path, PathBuf};

use spoolwerk_core::config::EngineConfig;
use spoolwerk_core::error::Result;

const CONFIG_FILE: &str = "config.json";

/// Application data directory (not created).
///
/// `%APPDATA%\spoolwerk` on Windows, the XDG data dir elsewhere.
pub fn data_dir() -> PathBuf {
    dirs_fallback().join("spoolwerk")
}

pub fn config_path() -> PathBuf {
    data_dir().join(CONFIG_FILE)
}

fn dirs_fallback() -> PathBuf {
    if let Ok(appdata) = std::env::var("APPDATA") {
        return PathBuf::from(appdata);
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local").join("share");
    }
    // Last resort
    std::env::temp_dir()
}

/// Explicit `--config` file, else the data-dir config when present, else
/// defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<EngineConfig> {
    if let Some(path) = explicit {
        return EngineConfig::load(path);
    }
    let path = config_path();
    if path.is_file() {
        tracing::debug!(path = %path.display(), "loading config");
        EngineConfig::load(&path)
    } else {
        Ok(EngineConfig::default())
    }
}

/// Write `config` as pretty JSON, creating the parent directory.
pub fn persist_config(path: &Path, config: &EngineConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    config.save(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_config_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("spoolwerk.json");
        let config = EngineConfig {
            preflight: false,
            ..Default::default()
        };
        persist_config(&path, &config).unwrap();

        let loaded = load_config(Some(&path)).unwrap();
        assert!(!loaded.preflight);
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("absent.json"))).is_err());
    }

    #[test]
    fn data_dir_ends_with_app_name() {
        assert!(data_dir().ends_with("spoolwerk"));
    }
}
