//! Autosave trigger and the gzip checkpoint store.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::engine::collaborators::Persistence;
use crate::engine::config::AutosaveConfig;
use crate::engine::error::EngineError;
use crate::engine::phase::Phase;
use crate::engine::state::GameState;

pub const SAVE_SUFFIX: &str = ".sav.gz";
const AUTOSAVE_NAME: &str = "autosave";

/// Phase boundaries where a checkpoint may be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointPoint {
    /// INITIATIVE_REPORT broadcast: once per round.
    RoundStart,
    /// First turn handed out in a turn-bearing phase.
    TurnHandoff(Phase),
    /// Any other report phase broadcast.
    ReportBroadcast(Phase),
}

#[derive(Debug, Clone)]
pub struct AutosaveTrigger {
    policy: AutosaveConfig,
}

impl AutosaveTrigger {
    pub fn new(policy: AutosaveConfig) -> Self {
        Self { policy }
    }

    pub fn should_fire(&self, point: CheckpointPoint) -> bool {
        match point {
            CheckpointPoint::RoundStart => self.policy.enabled,
            CheckpointPoint::TurnHandoff(_) | CheckpointPoint::ReportBroadcast(_) => {
                self.policy.enabled && self.policy.paranoid
            }
        }
    }

    pub fn announce(&self) -> bool {
        self.policy.announce
    }

    pub fn checkpoint_name(&self, now: DateTime<Local>) -> String {
        if self.policy.timestamped {
            format!("{AUTOSAVE_NAME}-{}", now.format("%Y%m%d-%H%M%S"))
        } else {
            AUTOSAVE_NAME.to_string()
        }
    }
}

/// Appends the compressed-save suffix unless it is already there; a bare
/// `.sav` only gains `.gz`.
pub fn normalize_save_name(name: &str) -> String {
    if name.ends_with(SAVE_SUFFIX) {
        name.to_string()
    } else if name.ends_with(".sav") {
        format!("{name}.gz")
    } else {
        format!("{name}{SAVE_SUFFIX}")
    }
}

/// Writes gzip-compressed JSON snapshots into a fixed directory.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Persistence for FileCheckpointStore {
    fn save_game(&mut self, name: &str, state: &GameState) -> Result<PathBuf, EngineError> {
        let file_name = normalize_save_name(name);
        let path = self.dir.join(&file_name);
        let staging = self.dir.join(staging_name(&file_name));
        let io_err = |source| EngineError::Persistence {
            path: path.clone(),
            source,
        };

        std::fs::create_dir_all(&self.dir).map_err(io_err)?;
        // The previous checkpoint stays in place until the new one is complete.
        if let Err(e) = write_snapshot(&staging, state) {
            let _ = std::fs::remove_file(&staging);
            return Err(e);
        }
        std::fs::rename(&staging, &path).map_err(io_err)?;

        tracing::debug!(path = %path.display(), round = state.round, phase = %state.phase, "checkpoint written");
        Ok(path)
    }
}

fn staging_name(file_name: &str) -> String {
    format!(".{file_name}.tmp")
}

fn write_snapshot(path: &Path, state: &GameState) -> Result<(), EngineError> {
    let io_err = |source| EngineError::Persistence {
        path: path.to_path_buf(),
        source,
    };
    let file = File::create(path).map_err(io_err)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    serde_json::to_writer(&mut encoder, state)?;
    let mut inner = encoder.finish().map_err(io_err)?;
    inner.flush().map_err(io_err)?;
    inner.get_ref().sync_all().map_err(io_err)
}

/// Reads a checkpoint written by [`FileCheckpointStore`].
pub fn load_snapshot(path: &Path) -> Result<GameState, EngineError> {
    let file = File::open(path).map_err(|source| EngineError::Persistence {
        path: path.to_path_buf(),
        source,
    })?;
    let decoder = GzDecoder::new(BufReader::new(file));
    Ok(serde_json::from_reader(decoder)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::models::{GameOptions, Player};
    use chrono::TimeZone;

    fn policy(enabled: bool, paranoid: bool, timestamped: bool) -> AutosaveConfig {
        AutosaveConfig {
            enabled,
            paranoid,
            timestamped,
            ..AutosaveConfig::default()
        }
    }

    #[test]
    fn test_suffix_normalization() {
        assert_eq!(normalize_save_name("autosave"), "autosave.sav.gz");
        assert_eq!(normalize_save_name("game.sav"), "game.sav.gz");
        assert_eq!(normalize_save_name("game.sav.gz"), "game.sav.gz");
    }

    #[test]
    fn test_trigger_points() {
        let plain = AutosaveTrigger::new(policy(true, false, false));
        assert!(plain.should_fire(CheckpointPoint::RoundStart));
        assert!(!plain.should_fire(CheckpointPoint::TurnHandoff(Phase::Movement)));
        assert!(!plain.should_fire(CheckpointPoint::ReportBroadcast(Phase::FiringReport)));

        let paranoid = AutosaveTrigger::new(policy(true, true, false));
        assert!(paranoid.should_fire(CheckpointPoint::TurnHandoff(Phase::Movement)));
        assert!(paranoid.should_fire(CheckpointPoint::ReportBroadcast(Phase::FiringReport)));

        let off = AutosaveTrigger::new(policy(false, true, false));
        assert!(!off.should_fire(CheckpointPoint::RoundStart));
        assert!(!off.should_fire(CheckpointPoint::TurnHandoff(Phase::Firing)));
    }

    #[test]
    fn test_checkpoint_names() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            AutosaveTrigger::new(policy(true, false, false)).checkpoint_name(now),
            "autosave"
        );
        assert_eq!(
            AutosaveTrigger::new(policy(true, false, true)).checkpoint_name(now),
            "autosave-20240309-140507"
        );
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCheckpointStore::new(dir.path().join("saves"));
        let mut state = GameState::new(vec![Player::new("p0", 1)], vec![], GameOptions::default());
        state.round = 4;
        state.reports.push_placeholder();

        let path = store.save_game("autosave", &state).unwrap();
        assert_eq!(path.file_name().unwrap(), "autosave.sav.gz");
        assert_eq!(load_snapshot(&path).unwrap(), state);
    }

    #[test]
    fn test_failed_overwrite_keeps_previous_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCheckpointStore::new(dir.path());
        let mut state = GameState::new(vec![Player::new("p0", 1)], vec![], GameOptions::default());
        state.round = 4;
        let path = store.save_game("autosave", &state).unwrap();

        // A directory squatting on the staging path makes the next write fail.
        std::fs::create_dir(dir.path().join(staging_name("autosave.sav.gz"))).unwrap();
        state.round = 5;
        assert!(matches!(
            store.save_game("autosave", &state),
            Err(EngineError::Persistence { .. })
        ));
        assert_eq!(load_snapshot(&path).unwrap().round, 4);
    }

    #[test]
    fn test_overwrite_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileCheckpointStore::new(dir.path());
        let mut state = GameState::new(vec![], vec![], GameOptions::default());
        store.save_game("autosave", &state).unwrap();
        state.round = 2;
        let path = store.save_game("autosave", &state).unwrap();

        assert_eq!(load_snapshot(&path).unwrap().round, 2);
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("autosave.sav.gz")]);
    }

    #[test]
    fn test_save_into_unwritable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let mut store = FileCheckpointStore::new(blocker.join("nested"));
        let state = GameState::new(vec![], vec![], GameOptions::default());
        assert!(matches!(
            store.save_game("autosave", &state),
            Err(EngineError::Persistence { .. })
        ));
    }
}
