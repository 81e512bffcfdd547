//! Phase lifecycle controller, the round/phase state machine.
//!
//! Every transition runs `prepare → broadcast/execute → end`. Playable
//! phases stop after execution and wait for turns or readiness; the rest
//! cascade straight into their own end. Cascades run as a loop rather than
//! recursion, bounded by the number of phases.

use std::collections::BTreeMap;

use chrono::Local;
use tracing::{debug, error, info, warn};

use crate::engine::checkpoint::{AutosaveTrigger, CheckpointPoint};
use crate::engine::collaborators::{Collaborators, VictoryJudge};
use crate::engine::config::EngineConfig;
use crate::engine::error::EngineError;
use crate::engine::models::*;
use crate::engine::phase::Phase;
use crate::engine::report::{ids, ReportEntry};
use crate::engine::state::{CachedVictory, GameState};
use crate::engine::transitions::{self, Guard, GuardContext, Successor};
use crate::engine::turns::Turn;

/// Counters kept for diagnostics and session summaries.
#[derive(Debug, Clone, Default)]
pub struct ControllerStats {
    pub phase_entries: BTreeMap<Phase, usize>,
    pub longest_cascade: usize,
    pub checkpoints_written: usize,
    pub checkpoint_failures: usize,
    pub notification_failures: usize,
    pub games_completed: usize,
}

pub struct PhaseController {
    state: GameState,
    services: Collaborators,
    autosave: AutosaveTrigger,
    victory_email: bool,
    stats: ControllerStats,
}

impl PhaseController {
    pub fn new(state: GameState, services: Collaborators, config: &EngineConfig) -> Self {
        Self {
            state,
            services,
            autosave: AutosaveTrigger::new(config.autosave.clone()),
            victory_email: config.notifications.victory_email,
            stats: ControllerStats::default(),
        }
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut GameState {
        &mut self.state
    }

    /// Replaces the live state with a restored snapshot.
    pub fn restore(&mut self, state: GameState) {
        info!(round = state.round, phase = %state.phase, "restoring game state");
        self.state = state;
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Makes `next` current and runs it until it either waits on clients or
    /// has cascaded into a phase that does.
    pub fn change_phase(&mut self, next: Phase) -> Result<(), EngineError> {
        let start = next;
        let mut next = next;
        let mut hops = 0;
        loop {
            if hops >= Phase::ALL.len() {
                error!(%start, hops, "phase cascade did not settle");
                return Err(EngineError::CascadeOverflow { start, hops });
            }
            hops += 1;

            self.enter_phase(next);
            if next.is_playable(self.state.turns.has_more_turns()) {
                self.services.transport.broadcast(Packet::PhaseChanged {
                    phase: next,
                    round: self.state.round,
                });
                self.execute_phase(next);
                break;
            }

            debug!(phase = %next, "phase not playable, cascading");
            next = match self.finish_phase(next)? {
                Successor::Phase(p) => p,
                Successor::Reset => {
                    self.reset_state();
                    Phase::Lounge
                }
            };
        }
        self.stats.longest_cascade = self.stats.longest_cascade.max(hops);
        self.settle();
        Ok(())
    }

    /// Ends the current phase and moves on to its successor.
    pub fn end_current_phase(&mut self) -> Result<(), EngineError> {
        let ending = self.state.phase;
        match self.finish_phase(ending)? {
            Successor::Phase(p) => self.change_phase(p),
            Successor::Reset => {
                self.reset_state();
                self.change_phase(Phase::Lounge)
            }
        }
    }

    fn enter_phase(&mut self, phase: Phase) {
        self.state.last_phase = self.state.phase;
        self.state.phase = phase;
        *self.stats.phase_entries.entry(phase).or_default() += 1;
        info!(%phase, last = %self.state.last_phase, round = self.state.round, "phase change");
        self.prepare_for_phase(phase);
    }

    /// Runs the ending phase's resolution, consults the transition table and
    /// files the report buffer accordingly.
    fn finish_phase(&mut self, ending: Phase) -> Result<Successor, EngineError> {
        self.resolve_phase_end(ending);

        let decision = {
            let mut guards = Guards {
                state: &mut self.state,
                victory: &mut *self.services.victory,
            };
            transitions::decide(ending, &mut guards).map_err(|e| {
                error!(phase = %ending, error = %e, "transition table rejected phase");
                e
            })?
        };

        if decision.report_entered {
            self.state.commit_reports();
        }
        if decision.report_skipped {
            self.state.reports.push_placeholder();
            self.state.commit_reports();
            self.send_report();
        }
        debug!(phase = %ending, next = ?decision.next, "phase ended");
        Ok(decision.next)
    }

    /// Clears hidden-activation markers naming the phase that settled as current.
    fn settle(&mut self) {
        let phase = self.state.phase;
        let cleared = self.state.consume_activation_markers(phase);
        if !cleared.is_empty() {
            debug!(%phase, entities = ?cleared, "hidden activation markers consumed");
        }
    }

    /// Phase-specific setup.
    pub fn prepare_for_phase(&mut self, phase: Phase) {
        match phase {
            Phase::Lounge => {
                self.state.reports.clear();
                let maps = self.services.board.rescan_maps();
                debug!(maps, "map catalogue rescanned");
            }
            Phase::Exchange | Phase::StartingScenario => {
                self.state.reports.clear();
            }
            Phase::Initiative => self.prepare_initiative(),
            Phase::DeployMinefields => {
                self.prepare_player_turns(phase, |s, p| s.eligible_for_minefields(p));
            }
            Phase::SetArtilleryAutohitHexes => {
                self.prepare_player_turns(phase, |s, p| s.eligible_for_artillery_autohit(p));
            }
            Phase::End => self.prepare_end(),
            Phase::InitiativeReport => {
                self.state.readiness.reset();
                self.send_report();
                self.checkpoint(CheckpointPoint::RoundStart);
            }
            Phase::Victory => self.prepare_victory(),
            p if p.uses_unit_turn_order() => self.prepare_unit_turns(p),
            p if p.is_report() => {
                self.state.readiness.reset();
                self.send_report();
                self.checkpoint(CheckpointPoint::ReportBroadcast(p));
            }
            p => warn!(phase = %p, "no preparation defined"),
        }
    }

    /// Phase-entry actions for playable phases.
    pub fn execute_phase(&mut self, phase: Phase) {
        match phase {
            Phase::Exchange => {
                self.state.readiness.reset();
                self.state.snapshot_initial_battle_values();
                self.state.setup_teams();
                self.services.board.apply_board_settings(&mut self.state);
                self.state.board.wind = self.services.board.determine_wind(&self.state);
                self.services.victory.seed_context(&self.state);
                info!(teams = self.state.teams.len(), wind = ?self.state.board.wind, "game exchange complete");
            }
            p if p.has_turns() => {
                self.change_to_next_turn();
                self.checkpoint(CheckpointPoint::TurnHandoff(p));
            }
            _ => {}
        }
    }

    fn prepare_initiative(&mut self) {
        self.services
            .turn_order
            .apply_initiative_compensation(&mut self.state);
        self.state.reset_actions();
        self.state.reports.clear();
        self.state.reports.begin_section(ids::INITIATIVE_HEADER);
        self.state.refresh_observers();
        self.state.readiness.reset();
        self.services.turn_order.roll_initiative(&mut self.state);

        if self.state.should_deploy_this_round() {
            debug!(round = self.state.round, "deployment pending, round held");
        } else if self.state.round_advance_pending {
            self.state.round += 1;
            self.state.round_advance_pending = false;
            info!(round = self.state.round, "round advanced");
            self.services.transport.broadcast(Packet::RoundChanged {
                round: self.state.round,
            });
        }

        let turns = self
            .services
            .turn_order
            .determine_turn_order(Phase::Initiative, &self.state);
        self.replace_turns(turns);
        self.services
            .combat
            .check_condition_deaths(&mut self.state);
    }

    fn prepare_player_turns(&mut self, phase: Phase, eligible: fn(&GameState, &Player) -> bool) {
        self.state.refresh_observers();
        self.state.readiness.reset();
        let turns: Vec<Turn> = self
            .state
            .players
            .iter()
            .filter(|p| eligible(&self.state, p))
            .map(|p| Turn::new(p.player_id.clone()))
            .collect();
        debug!(%phase, turns = turns.len(), "player-eligibility turns built");
        self.replace_turns(turns);
        self.state.reports.clear();
    }

    fn prepare_unit_turns(&mut self, phase: Phase) {
        if self.state.options.hidden_units {
            let revealed = self.state.reveal_hidden_units(phase);
            if revealed > 0 {
                debug!(%phase, revealed, "hidden units activated");
            }
        }
        if self.state.options.double_blind {
            self.services.visibility.recompute(&mut self.state);
        }
        self.state.refresh_observers();
        self.state.readiness.reset();
        let turns = self
            .services
            .turn_order
            .determine_turn_order(phase, &self.state);
        self.replace_turns(turns);
        self.state.reports.clear();
        if let Some(header) = phase.header() {
            self.state.reports.begin_section(header);
        }
    }

    fn prepare_end(&mut self) {
        self.state.victory = None;
        self.state.reports.clear();
        self.state.reports.begin_section(ids::END_HEADER);
        self.services.combat.resolve_end_phase(&mut self.state);
        self.state.reports.begin_section(ids::END_OF_ROUND_HEADER);
        let hexes = self.services.combat.resolve_end_of_round(&mut self.state);
        if !hexes.is_empty() {
            debug!(changed = hexes.len(), "terrain changed at end of round");
            self.services
                .transport
                .broadcast(Packet::ChangedHexes { hexes });
        }
        self.state.turns.clear();
        self.state.round_advance_pending = true;
    }

    fn prepare_victory(&mut self) {
        self.state.readiness.reset();
        self.state.reports.clear();
        self.services.transport.broadcast(Packet::AllReports {
            history: self.state.history.clone(),
        });

        let outcome = self.evaluate_victory();
        self.services
            .ratings
            .update_players_rating(&mut self.state, &outcome);

        if self.state.options.capital_fighters {
            rescale_capital_fighters(&mut self.state);
        }

        let mut entries = build_victory_report(&self.state, &outcome).into_iter();
        if let Some(header) = entries.next() {
            self.state.reports.begin_section(header.message_id);
        }
        self.state.reports.extend(entries);
        self.state.commit_reports();

        if self.victory_email {
            self.send_victory_notifications(&outcome);
        }

        self.services.transport.broadcast(Packet::EntitySnapshot {
            entities: self.state.entities.clone(),
        });
        self.send_report();
        info!(
            winner = ?outcome.winning_player,
            team = ?outcome.winning_team,
            round = self.state.round,
            "victory report prepared"
        );
    }

    /// Work that must happen before the transition table is consulted.
    fn resolve_phase_end(&mut self, ending: Phase) {
        let state = &mut self.state;
        let combat = &mut self.services.combat;
        match ending {
            Phase::Deployment => state.clear_deployment_this_round(),
            Phase::Initiative => {
                self.services.visibility.recompute(state);
                self.services.visibility.detect_spacecraft(state);
                state.commit_reports();
            }
            Phase::Movement => {
                self.services.visibility.detect_hidden_units(state);
                combat.resolve_aftermath(Phase::Movement, state);
            }
            Phase::Targeting => {
                combat.resolve_all_but_weapon_attacks(state);
                combat.resolve_only_weapon_attacks(state);
                combat.handle_attacks(state);
            }
            Phase::Offboard => {
                combat.resolve_only_weapon_attacks(state);
                combat.handle_attacks(state);
            }
            Phase::Firing => {
                combat.resolve_all_but_weapon_attacks(state);
                combat.resolve_only_weapon_attacks(state);
                combat.handle_attacks(state);
                combat.resolve_aftermath(Phase::Firing, state);
            }
            Phase::Physical => {
                combat.resolve_physical_attacks(state);
                combat.resolve_aftermath(Phase::Physical, state);
            }
            Phase::EndReport => self.process_team_change(),
            Phase::Victory => {
                let outcome = self.evaluate_victory();
                self.services
                    .transport
                    .broadcast(Packet::GameVictory { outcome });
                self.broadcast_player_dones();
                self.stats.games_completed += 1;
                info!(round = self.state.round, "game over, resetting");
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Turns and readiness
    // ------------------------------------------------------------------

    fn replace_turns(&mut self, turns: Vec<Turn>) {
        self.state.turns.replace(turns.clone());
        self.services
            .transport
            .broadcast(Packet::TurnVector { turns });
    }

    fn change_to_next_turn(&mut self) -> bool {
        match self.state.turns.advance() {
            Some((index, turn)) => {
                let player_id = turn.player_id.clone();
                debug!(phase = %self.state.phase, index, player = %player_id, "turn handed out");
                self.services
                    .transport
                    .broadcast(Packet::Turn { index, player_id });
                true
            }
            None => false,
        }
    }

    /// The current turn's owner is finished. Hands out the next turn, or
    /// ends the phase once the queue is exhausted.
    pub fn end_turn(&mut self, player_id: &str) -> Result<(), EngineError> {
        let phase = self.state.phase;
        let expected = self.state.turns.current().map(|t| t.player_id.clone());
        if !phase.has_turns() || expected.as_deref() != Some(player_id) {
            return Err(EngineError::NotYourTurn {
                player: player_id.to_string(),
                expected,
                phase,
            });
        }
        if let Some(e) = self
            .state
            .entities
            .iter_mut()
            .find(|e| e.owner == player_id && e.is_alive() && !e.acted)
        {
            e.acted = true;
        }
        if self.change_to_next_turn() {
            Ok(())
        } else {
            self.end_current_phase()
        }
    }

    /// Sets a player's done flag; in phases without turns the phase ends once
    /// everyone who counts is done.
    pub fn player_ready(&mut self, player_id: &str, done: bool) -> Result<(), EngineError> {
        if self.state.player(player_id).is_none() {
            return Err(EngineError::UnknownPlayer(player_id.to_string()));
        }
        self.state.readiness.mark(player_id, done);
        self.broadcast_player_dones();

        // With every connected player observing, any connected player's
        // "done" closes the phase.
        let nobody_gates = !self.state.players.iter().any(|p| p.gates_readiness());
        let connected = self.state.player(player_id).is_some_and(|p| p.connected);
        if done && nobody_gates && connected && !self.state.phase.has_turns() {
            debug!(phase = %self.state.phase, player = %player_id, "no gating players, ending phase");
            return self.end_current_phase();
        }
        self.check_ready()
    }

    fn check_ready(&mut self) -> Result<(), EngineError> {
        if !self.state.phase.has_turns() && self.state.readiness.all_done(&self.state.players) {
            debug!(phase = %self.state.phase, "all players done");
            self.end_current_phase()
        } else {
            Ok(())
        }
    }

    fn broadcast_player_dones(&self) {
        let done = self.state.readiness.snapshot(&self.state.players);
        self.services
            .transport
            .broadcast(Packet::PlayerDones { done });
    }

    // ------------------------------------------------------------------
    // Roster
    // ------------------------------------------------------------------

    pub fn connect_player(&mut self, player: Player) {
        let player_id = player.player_id.clone();
        match self.state.player_mut(&player_id) {
            Some(existing) => existing.connected = true,
            None => self.state.players.push(player),
        }
        if let Some(p) = self.state.player(&player_id) {
            self.services
                .transport
                .broadcast(Packet::PlayerUpdate { player: p.clone() });
        }
        info!(player = %player_id, "player connected");
    }

    /// Marks a player gone. The last departure resets the game.
    pub fn disconnect_player(&mut self, player_id: &str) -> Result<(), EngineError> {
        let player = self
            .state
            .player_mut(player_id)
            .ok_or_else(|| EngineError::UnknownPlayer(player_id.to_string()))?;
        player.connected = false;
        info!(player = %player_id, "player disconnected");

        if self.state.connected_players().next().is_none() {
            info!("no players remain");
            return self.reset_game();
        }
        self.check_ready()
    }

    /// Queues a team change, applied when the round's final report closes.
    pub fn request_team_change(&mut self, player_id: &str, team: u32) -> Result<(), EngineError> {
        if self.state.player(player_id).is_none() {
            return Err(EngineError::UnknownPlayer(player_id.to_string()));
        }
        self.state.pending_team_change = Some(TeamChange {
            player_id: player_id.to_string(),
            team,
        });
        Ok(())
    }

    fn process_team_change(&mut self) {
        let Some(change) = self.state.pending_team_change.take() else {
            return;
        };
        let Some(player) = self.state.player_mut(&change.player_id) else {
            warn!(player = %change.player_id, "team change for departed player dropped");
            return;
        };
        player.team = change.team;
        let updated = player.clone();
        self.state.setup_teams();
        self.state.victory = None;
        info!(player = %change.player_id, team = change.team, "team changed");
        self.services
            .transport
            .broadcast(Packet::PlayerUpdate { player: updated });
    }

    /// Removes an entity from play for the given wire removal code.
    pub fn remove_entity(&mut self, entity_id: EntityId, condition: u32) -> Result<(), EngineError> {
        let condition = RemovalCondition::from_code(condition)?;
        let entity = self
            .state
            .entity_mut(entity_id)
            .ok_or(EngineError::UnknownEntity(entity_id))?;
        entity.status = condition.status();
        debug!(entity = entity_id, ?condition, "entity removed");
        self.state.victory = None;
        Ok(())
    }

    /// Full reset back to the lounge.
    pub fn reset_game(&mut self) -> Result<(), EngineError> {
        self.reset_state();
        self.change_phase(Phase::Lounge)
    }

    fn reset_state(&mut self) {
        info!(round = self.state.round, "resetting game state");
        self.state.reset();
    }

    // ------------------------------------------------------------------
    // Victory, reports, checkpoints
    // ------------------------------------------------------------------

    pub fn evaluate_victory(&mut self) -> VictoryOutcome {
        evaluate_victory(&mut self.state, &mut *self.services.victory)
    }

    fn send_report(&self) {
        for p in self.state.connected_players() {
            self.services.transport.send(
                Recipient::Player(p.player_id.clone()),
                Packet::Report {
                    entries: self.state.reports.visible_to(Some(&p.player_id)),
                },
            );
        }
    }

    fn send_victory_notifications(&mut self, outcome: &VictoryOutcome) {
        let summary = victory_summary(outcome);
        for player in &self.state.players {
            if let Err(e) = self
                .services
                .notifier
                .notify_victory(player, outcome, &summary)
            {
                self.stats.notification_failures += 1;
                warn!(player = %player.player_id, error = %e, "victory notification failed");
            }
        }
    }

    fn checkpoint(&mut self, point: CheckpointPoint) {
        if !self.autosave.should_fire(point) {
            return;
        }
        let name = self.autosave.checkpoint_name(Local::now());
        match self.services.persistence.save_game(&name, &self.state) {
            Ok(path) => {
                self.stats.checkpoints_written += 1;
                info!(path = %path.display(), ?point, "game autosaved");
                if self.autosave.announce() {
                    let file = path
                        .file_name()
                        .map(|f| f.to_string_lossy().into_owned())
                        .unwrap_or(name);
                    self.services.transport.broadcast(Packet::Chat {
                        message: format!("*** Game saved to {file}"),
                    });
                }
            }
            Err(e) => {
                self.stats.checkpoint_failures += 1;
                warn!(error = %e, ?point, "autosave failed, continuing unsaved");
            }
        }
    }
}

struct Guards<'a> {
    state: &'a mut GameState,
    victory: &'a mut dyn VictoryJudge,
}

impl GuardContext for Guards<'_> {
    fn check(&mut self, guard: Guard) -> bool {
        match guard {
            Guard::AnyPlayerHasMinefields => self.state.any_player_has_minefields(),
            Guard::BeforeFirstRound => self.state.round < 1,
            Guard::ShouldDeployThisRound => self.state.should_deploy_this_round(),
            Guard::ReportSubstantive => self.state.reports.is_substantive(),
            Guard::VictoryAchieved => evaluate_victory(self.state, self.victory).terminated,
        }
    }
}

/// Victory outcome for the current round, computed at most once per round.
fn evaluate_victory(state: &mut GameState, judge: &mut dyn VictoryJudge) -> VictoryOutcome {
    if let Some(outcome) = state.cached_victory() {
        return outcome.clone();
    }
    let outcome = judge.evaluate(state);
    state.victory = Some(CachedVictory {
        round: state.round,
        outcome: outcome.clone(),
    });
    outcome
}

/// Squadron armor and structure go back to standard scale for the final report.
fn rescale_capital_fighters(state: &mut GameState) {
    for e in state
        .entities
        .iter_mut()
        .filter(|e| e.kind == EntityKind::FighterSquadron)
    {
        e.armor *= 10;
        e.structural_integrity *= 10;
    }
}

fn victory_summary(outcome: &VictoryOutcome) -> String {
    match (&outcome.winning_player, outcome.winning_team) {
        (Some(p), _) => format!("Player {p} is victorious"),
        (None, Some(t)) => format!("Team {t} is victorious"),
        (None, None) => "The battle ended in a draw".to_string(),
    }
}

/// Header, winner line and the non-empty unit rosters.
pub fn build_victory_report(state: &GameState, outcome: &VictoryOutcome) -> Vec<ReportEntry> {
    let mut entries = vec![ReportEntry::public(ids::VICTORY_HEADER).with_arg(state.round)];
    entries.push(match (&outcome.winning_player, outcome.winning_team) {
        (Some(p), _) => ReportEntry::public(ids::VICTORY_PLAYER).with_arg(p),
        (None, Some(t)) => ReportEntry::public(ids::VICTORY_TEAM).with_arg(t),
        (None, None) => ReportEntry::public(ids::VICTORY_DRAW),
    });

    let rosters: [(u32, fn(&Entity) -> bool); 5] = [
        (ids::ROSTER_SURVIVORS, |e| e.is_alive() && e.deployed),
        (ids::ROSTER_UNDEPLOYED, |e| e.is_alive() && !e.deployed),
        (ids::ROSTER_RETREATED, |e| e.status == EntityStatus::Retreated),
        (ids::ROSTER_DESTROYED, |e| e.status == EntityStatus::Destroyed),
        (ids::ROSTER_DEVASTATED, |e| e.status == EntityStatus::Devastated),
    ];
    for (header, member) in rosters {
        let listed: Vec<&Entity> = state.entities.iter().filter(|e| member(e)).collect();
        if listed.is_empty() {
            continue;
        }
        entries.push(ReportEntry::public(header).with_arg(listed.len()));
        entries.extend(listed.into_iter().map(|e| {
            ReportEntry::public(ids::ROSTER_ENTRY)
                .with_arg(&e.name)
                .with_arg(&e.owner)
        }));
    }
    entries
}
