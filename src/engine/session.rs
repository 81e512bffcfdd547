//! Headless session runner: plays one seeded game from the lounge to victory
//! with every client answering immediately.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::checkpoint::FileCheckpointStore;
use crate::engine::config::EngineConfig;
use crate::engine::controller::PhaseController;
use crate::engine::error::EngineError;
use crate::engine::models::{PlayerId, VictoryOutcome};
use crate::engine::phase::Phase;
use crate::engine::simulator::{skirmish_roster, SimWorld};
use crate::engine::state::GameState;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub players: usize,
    pub units_per_player: usize,
    pub seed: u64,
    /// Victory goes to the largest surviving force once this round is reached.
    pub round_limit: u32,
    /// Upper bound on client actions before the session gives up.
    pub max_steps: usize,
    pub engine: EngineConfig,
    /// Write real checkpoints here instead of keeping them in memory.
    pub save_dir: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            players: 2,
            units_per_player: 3,
            seed: 42,
            round_limit: 10,
            max_steps: 10_000,
            engine: EngineConfig::default(),
            save_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub seed: u64,
    pub rounds_played: u32,
    pub steps: usize,
    pub phase_entries: BTreeMap<Phase, usize>,
    pub longest_cascade: usize,
    pub checkpoints_written: usize,
    pub checkpoint_failures: usize,
    pub report_entries: usize,
    pub outcome: Option<VictoryOutcome>,
    pub duration_ms: f64,
}

impl SessionSummary {
    pub fn entries(&self, phase: Phase) -> usize {
        self.phase_entries.get(&phase).copied().unwrap_or(0)
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "Session Results (seed {}, {} rounds, {} steps)",
            self.seed, self.rounds_played, self.steps
        )];
        lines.push("=".repeat(60));
        for (phase, count) in &self.phase_entries {
            lines.push(format!("  {:>28}: {:4}", phase.name(), count));
        }
        lines.push(format!(
            "  Longest cascade: {}  |  Report entries: {}",
            self.longest_cascade, self.report_entries
        ));
        lines.push(format!(
            "  Checkpoints: {} written, {} failed",
            self.checkpoints_written, self.checkpoint_failures
        ));
        let result = match &self.outcome {
            Some(o) => match (&o.winning_player, o.winning_team) {
                (Some(p), _) => format!("player {p} wins"),
                (None, Some(t)) => format!("team {t} wins"),
                (None, None) => "draw".to_string(),
            },
            None => "unfinished".to_string(),
        };
        lines.push(format!("  Result: {result}  |  {:.0}ms", self.duration_ms));
        lines.join("\n")
    }
}

/// Plays one game to completion and returns what happened.
pub fn run_session(config: &SessionConfig) -> Result<SessionSummary, EngineError> {
    if config.players < 2 {
        return Err(EngineError::invalid_argument(format!(
            "a session needs at least two players, got {}",
            config.players
        )));
    }

    let (players, entities) = skirmish_roster(config.players, config.units_per_player);
    let mut world = SimWorld::new(config.seed);
    world.round_limit = Some(config.round_limit);
    let (mut services, _probe) = world.build();
    if let Some(dir) = &config.save_dir {
        services.persistence = Box::new(FileCheckpointStore::new(dir));
    }

    let state = GameState::new(players, entities, config.engine.options.clone());
    let mut controller = PhaseController::new(state, services, &config.engine);

    let t0 = Instant::now();
    controller.change_phase(Phase::Lounge)?;

    let mut steps = 0;
    let mut outcome = None;
    let mut rounds_played = 0;
    let mut report_entries = 0;
    while controller.stats().games_completed == 0 {
        if steps >= config.max_steps {
            warn!(steps, phase = %controller.phase(), "session step limit reached");
            break;
        }
        steps += 1;

        if controller.phase() == Phase::Victory && outcome.is_none() {
            rounds_played = controller.state().round;
            report_entries = controller.state().history.total_entries();
            outcome = Some(controller.evaluate_victory());
        }
        step(&mut controller)?;
    }

    let summary = SessionSummary {
        seed: config.seed,
        rounds_played: if outcome.is_some() {
            rounds_played
        } else {
            controller.state().round
        },
        steps,
        phase_entries: controller.stats().phase_entries.clone(),
        longest_cascade: controller.stats().longest_cascade,
        checkpoints_written: controller.stats().checkpoints_written,
        checkpoint_failures: controller.stats().checkpoint_failures,
        report_entries: if outcome.is_some() {
            report_entries
        } else {
            controller.state().history.total_entries()
        },
        outcome,
        duration_ms: t0.elapsed().as_secs_f64() * 1000.0,
    };
    info!(
        seed = summary.seed,
        rounds = summary.rounds_played,
        steps = summary.steps,
        "session finished"
    );
    Ok(summary)
}

/// One client action: the turn owner ends their turn, or every gating
/// player declares done.
fn step(controller: &mut PhaseController) -> Result<(), EngineError> {
    let phase = controller.phase();
    if phase.has_turns() {
        let owner = controller
            .state()
            .turns
            .current()
            .map(|t| t.player_id.clone())
            .ok_or_else(|| EngineError::invalid_argument(format!("{phase} has no current turn")))?;
        return controller.end_turn(&owner);
    }

    let waiting: Vec<PlayerId> = controller
        .state()
        .players
        .iter()
        .filter(|p| p.gates_readiness() && !controller.state().readiness.is_done(&p.player_id))
        .map(|p| p.player_id.clone())
        .collect();
    if waiting.is_empty() {
        let Some(player_id) = controller
            .state()
            .connected_players()
            .next()
            .map(|p| p.player_id.clone())
        else {
            return Err(EngineError::invalid_argument(format!("{phase} has no connected players")));
        };
        debug!(%phase, player = %player_id, "only observers left, answering for one");
        return controller.player_ready(&player_id, true);
    }
    for player_id in waiting {
        controller.player_ready(&player_id, true)?;
        if controller.phase() != phase {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_reaches_victory() {
        let summary = run_session(&SessionConfig {
            round_limit: 4,
            ..SessionConfig::default()
        })
        .unwrap();
        assert!(summary.outcome.as_ref().is_some_and(|o| o.terminated));
        assert!(summary.rounds_played >= 1 && summary.rounds_played <= 4);
        assert_eq!(summary.entries(Phase::Victory), 1);
        assert_eq!(summary.entries(Phase::Lounge), 2);
        assert!(summary.checkpoints_written >= summary.rounds_played as usize);
        assert!(summary.report_entries > 0);
        assert!(summary.summary().contains("Result:"));
    }

    #[test]
    fn test_same_seed_same_game() {
        let config = SessionConfig {
            round_limit: 3,
            ..SessionConfig::default()
        };
        let a = run_session(&config).unwrap();
        let b = run_session(&config).unwrap();
        assert_eq!(a.phase_entries, b.phase_entries);
        assert_eq!(a.outcome, b.outcome);
        assert_eq!(a.steps, b.steps);
    }

    #[test]
    fn test_single_player_rejected() {
        let err = run_session(&SessionConfig {
            players: 1,
            ..SessionConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
    }
}
