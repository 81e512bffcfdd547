//! The single explicit mutable game state handed to every operation.
//!
//! Everything a replay needs lives here and round-trips through serde, so a
//! checkpoint restores the controller exactly where it left off.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::models::*;
use crate::engine::phase::Phase;
use crate::engine::report::{ReportBuffer, RoundHistory};
use crate::engine::turns::{Readiness, TurnQueue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedVictory {
    pub round: u32,
    pub outcome: VictoryOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    pub phase: Phase,
    pub last_phase: Phase,
    pub round: u32,
    /// Armed at END preparation, consumed by the next round increment, so
    /// re-preparing INITIATIVE never advances the round twice.
    pub round_advance_pending: bool,
    pub players: Vec<Player>,
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub teams: Vec<Team>,
    #[serde(default)]
    pub board: BoardInfo,
    #[serde(default)]
    pub options: GameOptions,
    #[serde(default)]
    pub reports: ReportBuffer,
    #[serde(default)]
    pub history: RoundHistory,
    #[serde(default)]
    pub turns: TurnQueue,
    #[serde(default)]
    pub readiness: Readiness,
    #[serde(default)]
    pub victory: Option<CachedVictory>,
    #[serde(default)]
    pub pending_team_change: Option<TeamChange>,
    #[serde(default)]
    pub initial_battle_value: BTreeMap<PlayerId, u32>,
}

impl GameState {
    pub fn new(players: Vec<Player>, entities: Vec<Entity>, options: GameOptions) -> Self {
        Self {
            phase: Phase::Lounge,
            last_phase: Phase::Lounge,
            round: 0,
            round_advance_pending: true,
            players,
            entities,
            teams: Vec::new(),
            board: BoardInfo::default(),
            options,
            reports: ReportBuffer::new(),
            history: RoundHistory::default(),
            turns: TurnQueue::default(),
            readiness: Readiness::default(),
            victory: None,
            pending_team_change: None,
            initial_battle_value: BTreeMap::new(),
        }
    }

    pub fn player(&self, player_id: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.player_id == player_id)
    }

    pub fn player_mut(&mut self, player_id: &str) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.player_id == player_id)
    }

    pub fn entity_mut(&mut self, entity_id: EntityId) -> Option<&mut Entity> {
        self.entities.iter_mut().find(|e| e.entity_id == entity_id)
    }

    pub fn live_entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(|e| e.is_alive())
    }

    pub fn connected_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.connected)
    }

    /// Undeployed live units are scheduled to enter this round.
    pub fn should_deploy_this_round(&self) -> bool {
        self.live_entities()
            .any(|e| !e.deployed && e.deploy_round == self.round)
    }

    pub fn clear_deployment_this_round(&mut self) {
        let round = self.round;
        for e in self
            .entities
            .iter_mut()
            .filter(|e| e.is_alive() && e.deploy_round == round)
        {
            e.deployed = true;
        }
    }

    pub fn any_player_has_minefields(&self) -> bool {
        self.players.iter().any(|p| p.has_minefields)
    }

    pub fn eligible_for_minefields(&self, player: &Player) -> bool {
        player.has_minefields && self.board.on_ground
    }

    pub fn eligible_for_artillery_autohit(&self, player: &Player) -> bool {
        self.board.on_ground
            && self
                .live_entities()
                .any(|e| e.owner == player.player_id && e.has_artillery)
    }

    /// Players without a live unit watch instead of play.
    pub fn refresh_observers(&mut self) {
        let owners: Vec<PlayerId> = self.live_entities().map(|e| e.owner.clone()).collect();
        for p in &mut self.players {
            p.observer = !owners.contains(&p.player_id);
        }
    }

    pub fn reset_actions(&mut self) {
        for e in &mut self.entities {
            e.acted = false;
        }
    }

    /// Unhides units scheduled to activate in `phase`. The marker itself is
    /// consumed separately, once the phase has settled as current.
    pub fn reveal_hidden_units(&mut self, phase: Phase) -> usize {
        let mut revealed = 0;
        for e in &mut self.entities {
            if e.hidden && e.hidden_activation == Some(phase) {
                e.hidden = false;
                revealed += 1;
            }
        }
        revealed
    }

    pub fn consume_activation_markers(&mut self, phase: Phase) -> Vec<EntityId> {
        let mut cleared = Vec::new();
        for e in &mut self.entities {
            if e.hidden_activation == Some(phase) {
                e.hidden_activation = None;
                cleared.push(e.entity_id);
            }
        }
        cleared
    }

    pub fn commit_reports(&mut self) {
        self.history.commit(self.round, &self.reports);
    }

    pub fn snapshot_initial_battle_values(&mut self) {
        let mut totals: BTreeMap<PlayerId, u32> =
            self.players.iter().map(|p| (p.player_id.clone(), 0)).collect();
        for e in self.live_entities() {
            *totals.entry(e.owner.clone()).or_default() += e.battle_value;
        }
        self.initial_battle_value = totals;
    }

    pub fn setup_teams(&mut self) {
        let mut teams: BTreeMap<u32, Vec<PlayerId>> = BTreeMap::new();
        for p in self.players.iter().filter(|p| !p.observer) {
            teams.entry(p.team).or_default().push(p.player_id.clone());
        }
        self.teams = teams
            .into_iter()
            .map(|(team_id, members)| Team { team_id, members })
            .collect();
    }

    pub fn cached_victory(&self) -> Option<&VictoryOutcome> {
        self.victory
            .as_ref()
            .filter(|v| v.round == self.round)
            .map(|v| &v.outcome)
    }

    /// Discards all round and phase state. The connected roster survives,
    /// with its per-game flags cleared.
    pub fn reset(&mut self) {
        let mut players = std::mem::take(&mut self.players);
        players.retain(|p| p.connected);
        for p in &mut players {
            p.observer = false;
            p.has_minefields = false;
        }
        let options = std::mem::take(&mut self.options);
        *self = GameState::new(players, Vec::new(), options);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> GameState {
        let mut early = Entity::new(1, "p0", "Atlas");
        early.deploy_round = 0;
        let mut late = Entity::new(2, "p1", "Locust");
        late.deploy_round = 3;
        GameState::new(
            vec![Player::new("p0", 1), Player::new("p1", 2)],
            vec![early, late],
            GameOptions::default(),
        )
    }

    #[test]
    fn test_deployment_gate_follows_round() {
        let mut s = state();
        assert!(s.should_deploy_this_round());
        s.clear_deployment_this_round();
        assert!(!s.should_deploy_this_round());
        s.round = 3;
        assert!(s.should_deploy_this_round());
    }

    #[test]
    fn test_observers_are_players_without_live_units() {
        let mut s = state();
        s.players.push(Player::new("p2", 3));
        s.entities[1].status = EntityStatus::Destroyed;
        s.refresh_observers();
        assert!(!s.player("p0").unwrap().observer);
        assert!(s.player("p1").unwrap().observer);
        assert!(s.player("p2").unwrap().observer);
    }

    #[test]
    fn test_artillery_eligibility_needs_ground_board() {
        let mut s = state();
        s.entities[0].has_artillery = true;
        let p0 = s.player("p0").unwrap().clone();
        assert!(s.eligible_for_artillery_autohit(&p0));
        s.board.on_ground = false;
        assert!(!s.eligible_for_artillery_autohit(&p0));
    }

    #[test]
    fn test_reveal_and_consume_are_separate() {
        let mut s = state();
        s.entities[0].hidden = true;
        s.entities[0].hidden_activation = Some(Phase::Firing);
        assert_eq!(s.reveal_hidden_units(Phase::Movement), 0);
        assert_eq!(s.reveal_hidden_units(Phase::Firing), 1);
        assert_eq!(s.entities[0].hidden_activation, Some(Phase::Firing));
        assert_eq!(s.consume_activation_markers(Phase::Firing), vec![1]);
        assert!(s.consume_activation_markers(Phase::Firing).is_empty());
    }

    #[test]
    fn test_teams_group_non_observers() {
        let mut s = state();
        s.players.push(Player::new("p2", 1));
        s.setup_teams();
        assert_eq!(s.teams.len(), 2);
        assert_eq!(s.teams[0].members, vec!["p0".to_string(), "p2".to_string()]);
    }

    #[test]
    fn test_reset_keeps_connected_roster_only() {
        let mut s = state();
        s.round = 5;
        s.phase = Phase::Victory;
        s.players[1].connected = false;
        s.players[0].has_minefields = true;
        s.reports.push_placeholder();
        s.reset();
        assert_eq!(s.phase, Phase::Lounge);
        assert_eq!(s.round, 0);
        assert!(s.round_advance_pending);
        assert!(s.entities.is_empty());
        assert!(s.reports.is_empty());
        assert_eq!(s.players.len(), 1);
        assert!(!s.players[0].has_minefields);
    }

    #[test]
    fn test_snapshot_round_trips_through_json() {
        let mut s = state();
        s.reports.push_placeholder();
        s.commit_reports();
        let json = serde_json::to_string(&s).unwrap();
        let back: GameState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
