//! Round-start checkpoints written to disk restore into a fresh controller
//! that carries on from the same point.

use battle_phase_engine::engine::checkpoint::{load_snapshot, FileCheckpointStore};
use battle_phase_engine::engine::config::EngineConfig;
use battle_phase_engine::engine::controller::PhaseController;
use battle_phase_engine::engine::models::GameOptions;
use battle_phase_engine::engine::phase::Phase;
use battle_phase_engine::engine::simulator::{skirmish_roster, SimWorld};
use battle_phase_engine::engine::state::GameState;

fn controller(save_dir: &std::path::Path) -> PhaseController {
    let (players, entities) = skirmish_roster(2, 2);
    let (mut services, _probe) = SimWorld::quiet(21).build();
    services.persistence = Box::new(FileCheckpointStore::new(save_dir));
    let state = GameState::new(players, entities, GameOptions::default());
    PhaseController::new(state, services, &EngineConfig::default())
}

fn ready_all(c: &mut PhaseController) {
    for id in ["p0", "p1"] {
        c.player_ready(id, true).unwrap();
    }
}

#[test]
fn round_start_checkpoint_restores_and_resumes() {
    let dir = tempfile::tempdir().unwrap();
    let mut c = controller(dir.path());
    c.change_phase(Phase::Lounge).unwrap();
    ready_all(&mut c);
    ready_all(&mut c);
    assert_eq!(c.phase(), Phase::InitiativeReport);
    assert_eq!(c.stats().checkpoints_written, 1);

    let path = dir.path().join("autosave.sav.gz");
    let snapshot = load_snapshot(&path).unwrap();
    assert_eq!(&snapshot, c.state());

    let mut resumed = controller(dir.path());
    resumed.restore(snapshot);
    assert_eq!(resumed.phase(), Phase::InitiativeReport);
    ready_all(&mut resumed);
    assert_eq!(resumed.phase(), Phase::Deployment);
    assert_eq!(resumed.state().turns.turns().len(), 4);
}

#[test]
fn missing_checkpoint_is_a_persistence_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = load_snapshot(&dir.path().join("nope.sav.gz")).unwrap_err();
    assert!(err.to_string().contains("nope.sav.gz"));
}
