//! Engine configuration, loaded from TOML at startup.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::engine::error::EngineError;
use crate::engine::models::GameOptions;

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub options: GameOptions,
    #[serde(default)]
    pub autosave: AutosaveConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct AutosaveConfig {
    /// Checkpoint at the start of every round (INITIATIVE_REPORT).
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Also checkpoint after every turn handoff and report broadcast.
    #[serde(default)]
    pub paranoid: bool,
    /// Date-stamp checkpoint names instead of overwriting one file.
    #[serde(default)]
    pub timestamped: bool,
    /// Announce each checkpoint in chat.
    #[serde(default = "default_true")]
    pub announce: bool,
    #[serde(default = "default_save_dir")]
    pub directory: PathBuf,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            paranoid: false,
            timestamped: false,
            announce: true,
            directory: default_save_dir(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct NotificationConfig {
    #[serde(default)]
    pub victory_email: bool,
}

fn default_true() -> bool {
    true
}

fn default_save_dir() -> PathBuf {
    PathBuf::from("savegames")
}

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &Path) -> Result<EngineConfig, EngineError> {
    let content = std::fs::read_to_string(path).map_err(|e| EngineError::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_config(&content).map_err(|message| EngineError::Config {
        path: path.to_path_buf(),
        message,
    })
}

pub fn parse_config(content: &str) -> Result<EngineConfig, String> {
    toml::from_str(content).map_err(|e| e.to_string())
}

/// Try well-known locations, falling back to built-in defaults.
pub fn load_default_config() -> EngineConfig {
    let candidates = [
        "battle_engine.toml",
        "../battle_engine.toml",
        "/etc/battle-engine/battle_engine.toml",
    ];
    for path in &candidates {
        let p = Path::new(path);
        if p.exists() {
            match load_config(p) {
                Ok(config) => {
                    tracing::info!(path = %p.display(), "loaded engine config");
                    return config;
                }
                Err(e) => {
                    tracing::warn!(path = %p.display(), error = %e, "failed to load engine config");
                }
            }
        }
    }
    tracing::info!("no battle_engine.toml found, using built-in defaults");
    EngineConfig::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert!(config.autosave.enabled);
        assert_eq!(config.autosave.directory, PathBuf::from("savegames"));
    }

    #[test]
    fn test_sections_override_defaults() {
        let config = parse_config(
            r#"
            [options]
            double_blind = true
            hidden_units = true

            [autosave]
            paranoid = true
            timestamped = true
            directory = "/tmp/saves"

            [notifications]
            victory_email = true
            "#,
        )
        .unwrap();
        assert!(config.options.double_blind);
        assert!(config.options.hidden_units);
        assert!(!config.options.capital_fighters);
        assert!(config.autosave.enabled);
        assert!(config.autosave.paranoid);
        assert!(config.autosave.timestamped);
        assert_eq!(config.autosave.directory, PathBuf::from("/tmp/saves"));
        assert!(config.notifications.victory_email);
    }

    #[test]
    fn test_load_reports_path_on_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("battle_engine.toml");
        std::fs::write(&path, "[autosave\nenabled = 1").unwrap();
        match load_config(&path) {
            Err(EngineError::Config { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected config error, got {other:?}"),
        }
    }
}
