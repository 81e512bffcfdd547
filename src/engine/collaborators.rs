//! Collaborator traits: the narrow contracts the phase controller drives.
//!
//! Each collaborator owns one concern (turn order, combat resolution,
//! visibility, victory, ratings, board setup, transport, persistence,
//! notifications). None of them decides phase transitions; they only read
//! or mutate the [`GameState`] handed to them and append to its report
//! buffer.

use std::path::PathBuf;

use crate::engine::error::{EngineError, NotificationError};
use crate::engine::models::*;
use crate::engine::phase::Phase;
use crate::engine::state::GameState;
use crate::engine::turns::Turn;

/// Turn-order provider.
pub trait TurnOrder: Send {
    /// Adjusts initiative bonuses carried over from the previous round.
    fn apply_initiative_compensation(&mut self, state: &mut GameState);

    /// Rolls initiative for the new round and appends the initiative report.
    fn roll_initiative(&mut self, state: &mut GameState);

    /// Ordered turns for a unit-level turn-bearing phase.
    fn determine_turn_order(&mut self, phase: Phase, state: &GameState) -> Vec<Turn>;
}

/// Combat resolution. Appends to the report buffer and mutates units and
/// terrain.
pub trait CombatResolver: Send {
    fn resolve_all_but_weapon_attacks(&mut self, state: &mut GameState);

    fn resolve_only_weapon_attacks(&mut self, state: &mut GameState);

    fn handle_attacks(&mut self, state: &mut GameState);

    fn resolve_physical_attacks(&mut self, state: &mut GameState);

    /// Post-attack checks for the phase just resolved: building damage,
    /// piloting rolls, narc cleanup, flawed cooling and, after movement,
    /// call-support requests.
    fn resolve_aftermath(&mut self, phase: Phase, state: &mut GameState);

    /// End phase effects: heat, sand and control-roll damage, ammo dumps.
    fn resolve_end_phase(&mut self, state: &mut GameState);

    /// End of round housekeeping: crew wake-up, self-destruct,
    /// fortification and terrain post-processing. Returns changed hexes.
    fn resolve_end_of_round(&mut self, state: &mut GameState) -> Vec<HexChange>;

    /// Environmental survival checks at the start of a round.
    fn check_condition_deaths(&mut self, state: &mut GameState);
}

/// Visibility and blind-play recomputation.
pub trait Visibility: Send {
    fn recompute(&mut self, state: &mut GameState);

    fn detect_hidden_units(&mut self, state: &mut GameState);

    fn detect_spacecraft(&mut self, state: &mut GameState);
}

/// Victory coordinator. The controller caches the outcome per round.
pub trait VictoryJudge: Send {
    /// Installs victory conditions for a new game.
    fn seed_context(&mut self, state: &GameState);

    fn evaluate(&mut self, state: &GameState) -> VictoryOutcome;
}

pub trait RatingService: Send {
    fn update_players_rating(&mut self, state: &mut GameState, outcome: &VictoryOutcome);
}

/// Map catalogue and board-level setup.
pub trait BoardSetup: Send {
    /// Rescans available maps; returns how many were found.
    fn rescan_maps(&mut self) -> usize;

    fn apply_board_settings(&mut self, state: &mut GameState);

    fn determine_wind(&mut self, state: &GameState) -> Option<String>;
}

/// Fire-and-forget delivery to connected clients. Ordering is FIFO per
/// recipient; anything beyond that is the transport's business.
pub trait Transport: Send {
    fn send(&self, recipient: Recipient, packet: Packet);

    fn broadcast(&self, packet: Packet) {
        self.send(Recipient::All, packet);
    }
}

/// Checkpoint writer.
pub trait Persistence: Send {
    /// Writes a snapshot under `name`; returns where it landed.
    fn save_game(&mut self, name: &str, state: &GameState) -> Result<PathBuf, EngineError>;
}

/// Out-of-band victory notifications, one recipient at a time.
pub trait Notifier: Send {
    fn notify_victory(
        &mut self,
        player: &Player,
        outcome: &VictoryOutcome,
        summary: &str,
    ) -> Result<(), NotificationError>;
}

/// Every collaborator the controller needs, injected at construction.
pub struct Collaborators {
    pub turn_order: Box<dyn TurnOrder>,
    pub combat: Box<dyn CombatResolver>,
    pub visibility: Box<dyn Visibility>,
    pub victory: Box<dyn VictoryJudge>,
    pub ratings: Box<dyn RatingService>,
    pub board: Box<dyn BoardSetup>,
    pub transport: Box<dyn Transport>,
    pub persistence: Box<dyn Persistence>,
    pub notifier: Box<dyn Notifier>,
}
