//! Seeded in-memory collaborators for headless sessions, tests and benches.
//!
//! Nothing here models the tabletop rules in depth; the goal is a world that
//! drives every phase the controller knows about with reproducible dice.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::engine::checkpoint::normalize_save_name;
use crate::engine::collaborators::*;
use crate::engine::error::{EngineError, NotificationError};
use crate::engine::models::*;
use crate::engine::phase::Phase;
use crate::engine::report::{ids, ReportEntry};
use crate::engine::state::GameState;
use crate::engine::turns::Turn;

/// Builds a roster of `players` players, each with `units` undeployed units.
/// Player `pN` is on team `N + 1`.
pub fn skirmish_roster(players: usize, units: usize) -> (Vec<Player>, Vec<Entity>) {
    let roster: Vec<Player> = (0..players)
        .map(|i| {
            let mut p = Player::new(format!("p{i}"), i as u32 + 1);
            p.email = Some(format!("p{i}@example.org"));
            p
        })
        .collect();
    let mut entities = Vec::with_capacity(players * units);
    let mut next_id = 1;
    for p in &roster {
        for u in 0..units {
            let mut e = Entity::new(next_id, p.player_id.clone(), format!("{} unit {u}", p.player_id));
            e.battle_value = 1000 + 100 * u as u32;
            e.armor = 20;
            e.structural_integrity = 5;
            entities.push(e);
            next_id += 1;
        }
    }
    (roster, entities)
}

// ----------------------------------------------------------------------
// Turn order
// ----------------------------------------------------------------------

/// 2d6 initiative with a +1 compensation bonus for the previous loser.
pub struct DiceInitiative {
    rng: StdRng,
    order: Vec<PlayerId>,
    bonus: HashMap<PlayerId, u32>,
}

impl DiceInitiative {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            order: Vec::new(),
            bonus: HashMap::new(),
        }
    }

    fn ordered_players<'a>(&self, state: &'a GameState) -> Vec<&'a PlayerId> {
        if self.order.is_empty() {
            state.players.iter().map(|p| &p.player_id).collect()
        } else {
            self.order
                .iter()
                .filter_map(|id| state.player(id).map(|p| &p.player_id))
                .collect()
        }
    }
}

impl TurnOrder for DiceInitiative {
    fn apply_initiative_compensation(&mut self, _state: &mut GameState) {
        self.bonus.clear();
        if let Some(loser) = self.order.last() {
            self.bonus.insert(loser.clone(), 1);
        }
    }

    fn roll_initiative(&mut self, state: &mut GameState) {
        let mut rolls: Vec<(u32, PlayerId)> = state
            .players
            .iter()
            .filter(|p| p.gates_readiness())
            .map(|p| {
                let roll = self.rng.gen_range(1..=6) + self.rng.gen_range(1..=6);
                (roll + self.bonus.get(&p.player_id).copied().unwrap_or(0), p.player_id.clone())
            })
            .collect();
        rolls.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        for (roll, player_id) in &rolls {
            state.reports.push(
                ReportEntry::public(ids::INITIATIVE_ROLL)
                    .with_arg(player_id)
                    .with_arg(roll),
            );
        }
        self.order = rolls.into_iter().map(|(_, id)| id).collect();
    }

    fn determine_turn_order(&mut self, phase: Phase, state: &GameState) -> Vec<Turn> {
        let order = self.ordered_players(state);
        let units_of = |owner: &PlayerId, pick: &dyn Fn(&Entity) -> bool| {
            state
                .live_entities()
                .filter(|e| &e.owner == owner && pick(e))
                .count()
        };
        let pick: Box<dyn Fn(&Entity) -> bool> = match phase {
            Phase::Deployment => {
                let round = state.round;
                Box::new(move |e: &Entity| !e.deployed && e.deploy_round == round)
            }
            Phase::Movement | Phase::Firing | Phase::Physical => Box::new(|e: &Entity| e.deployed),
            Phase::Targeting | Phase::Offboard => {
                Box::new(|e: &Entity| e.deployed && e.has_artillery)
            }
            _ => return Vec::new(),
        };
        order
            .into_iter()
            .flat_map(|owner| std::iter::repeat(owner).take(units_of(owner, pick.as_ref())))
            .map(|owner| Turn::new(owner.clone()))
            .collect()
    }
}

// ----------------------------------------------------------------------
// Combat
// ----------------------------------------------------------------------

/// Random hits and kills plus scripted report volume per phase.
pub struct SkirmishCombat {
    rng: StdRng,
    /// Chance per deployed unit of a reported exchange in each attack step.
    pub intensity: f64,
    /// Chance that a reported exchange destroys its target.
    pub lethality: f64,
    scripted: HashMap<Phase, usize>,
    /// Last round each scripted phase produced its entries.
    scripted_round: HashMap<Phase, u32>,
}

impl SkirmishCombat {
    pub fn new(seed: u64, intensity: f64, lethality: f64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            intensity,
            lethality,
            scripted: HashMap::new(),
            scripted_round: HashMap::new(),
        }
    }

    /// Nothing happens unless scripted.
    pub fn quiet(seed: u64) -> Self {
        Self::new(seed, 0.0, 0.0)
    }

    /// Appends `entries` report lines the first time `phase` resolves each round.
    pub fn with_scripted(mut self, phase: Phase, entries: usize) -> Self {
        self.scripted.insert(phase, entries);
        self
    }

    fn scripted_entries(&mut self, state: &mut GameState) {
        let phase = state.phase;
        let Some(&n) = self.scripted.get(&phase) else {
            return;
        };
        if self.scripted_round.insert(phase, state.round) != Some(state.round) {
            for i in 0..n {
                state
                    .reports
                    .push(ReportEntry::public(phase.header().unwrap_or(ids::END_HEADER) + 5).with_arg(i));
            }
        }
    }

    fn exchange_fire(&mut self, state: &mut GameState, message_id: u32) {
        self.scripted_entries(state);
        if self.intensity <= 0.0 {
            return;
        }
        let targets: Vec<usize> = state
            .entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_alive() && e.deployed)
            .map(|(i, _)| i)
            .collect();
        for i in targets {
            if !state.entities[i].is_alive() || !self.rng.gen_bool(self.intensity) {
                continue;
            }
            let destroyed = self.rng.gen_bool(self.lethality);
            let target = &mut state.entities[i];
            if destroyed {
                target.status = EntityStatus::Destroyed;
            } else {
                target.armor = target.armor.saturating_sub(5);
            }
            let entry = ReportEntry::public(message_id)
                .with_arg(&target.name)
                .with_arg(if destroyed { "destroyed" } else { "damaged" });
            state.reports.push(entry);
        }
    }
}

impl CombatResolver for SkirmishCombat {
    fn resolve_all_but_weapon_attacks(&mut self, state: &mut GameState) {
        self.scripted_entries(state);
    }

    fn resolve_only_weapon_attacks(&mut self, state: &mut GameState) {
        self.exchange_fire(state, ids::FIRING_HEADER + 10);
    }

    fn handle_attacks(&mut self, state: &mut GameState) {
        self.scripted_entries(state);
    }

    fn resolve_physical_attacks(&mut self, state: &mut GameState) {
        self.exchange_fire(state, ids::PHYSICAL_HEADER + 10);
    }

    fn resolve_aftermath(&mut self, _phase: Phase, state: &mut GameState) {
        self.scripted_entries(state);
    }

    fn resolve_end_phase(&mut self, state: &mut GameState) {
        self.scripted_entries(state);
    }

    fn resolve_end_of_round(&mut self, _state: &mut GameState) -> Vec<HexChange> {
        Vec::new()
    }

    fn check_condition_deaths(&mut self, _state: &mut GameState) {}
}

// ----------------------------------------------------------------------
// Visibility, victory, ratings, board
// ----------------------------------------------------------------------

/// Everyone sees everything.
pub struct OpenSkies;

impl Visibility for OpenSkies {
    fn recompute(&mut self, _state: &mut GameState) {}

    fn detect_hidden_units(&mut self, _state: &mut GameState) {}

    fn detect_spacecraft(&mut self, _state: &mut GameState) {}
}

/// The last team with a live unit wins. With a round limit, the team with the
/// most surviving battle value wins once the limit is reached.
pub struct LastTeamStanding {
    pub round_limit: Option<u32>,
    teams: HashMap<PlayerId, u32>,
}

impl LastTeamStanding {
    pub fn new(round_limit: Option<u32>) -> Self {
        Self {
            round_limit,
            teams: HashMap::new(),
        }
    }

    fn team_of(&self, state: &GameState, owner: &str) -> Option<u32> {
        self.teams
            .get(owner)
            .copied()
            .or_else(|| state.player(owner).map(|p| p.team))
    }
}

impl VictoryJudge for LastTeamStanding {
    fn seed_context(&mut self, state: &GameState) {
        self.teams = state
            .players
            .iter()
            .map(|p| (p.player_id.clone(), p.team))
            .collect();
    }

    fn evaluate(&mut self, state: &GameState) -> VictoryOutcome {
        let mut standing: HashMap<u32, u32> = HashMap::new();
        for e in state.live_entities() {
            if let Some(team) = self.team_of(state, &e.owner) {
                *standing.entry(team).or_default() += e.battle_value;
            }
        }
        match standing.len() {
            0 => return VictoryOutcome::draw(),
            1 => {
                let team = standing.keys().copied().next().unwrap_or_default();
                return VictoryOutcome::team(team);
            }
            _ => {}
        }
        match self.round_limit {
            Some(limit) if state.round >= limit => standing
                .into_iter()
                .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
                .map(|(team, _)| VictoryOutcome::team(team))
                .unwrap_or_else(VictoryOutcome::draw),
            _ => VictoryOutcome::ongoing(),
        }
    }
}

/// Flat rating swing for every winner and loser.
pub struct FlatRatings {
    pub swing: f64,
}

impl RatingService for FlatRatings {
    fn update_players_rating(&mut self, state: &mut GameState, outcome: &VictoryOutcome) {
        if !outcome.terminated || (outcome.winning_team.is_none() && outcome.winning_player.is_none()) {
            return;
        }
        for p in &mut state.players {
            let won = outcome.winning_player.as_deref() == Some(p.player_id.as_str())
                || outcome.winning_team == Some(p.team);
            p.rating += if won { self.swing } else { -self.swing };
        }
    }
}

/// Fixed map catalogue.
pub struct MapCatalog {
    pub maps: Vec<String>,
}

impl BoardSetup for MapCatalog {
    fn rescan_maps(&mut self) -> usize {
        self.maps.len()
    }

    fn apply_board_settings(&mut self, state: &mut GameState) {
        state.board.map_name = self.maps.first().cloned();
    }

    fn determine_wind(&mut self, _state: &GameState) -> Option<String> {
        Some("calm".to_string())
    }
}

// ----------------------------------------------------------------------
// Transport, persistence, notifications
// ----------------------------------------------------------------------

type Shared<T> = Arc<Mutex<Vec<T>>>;

fn record<T>(log: &Shared<T>, item: T) {
    if let Ok(mut log) = log.lock() {
        log.push(item);
    }
}

fn read<T: Clone>(log: &Shared<T>) -> Vec<T> {
    log.lock().map(|l| l.clone()).unwrap_or_default()
}

pub struct RecordingTransport {
    log: Shared<(Recipient, Packet)>,
}

impl Transport for RecordingTransport {
    fn send(&self, recipient: Recipient, packet: Packet) {
        record(&self.log, (recipient, packet));
    }
}

/// Keeps checkpoint names in memory; optionally fails every write.
pub struct MemoryCheckpoints {
    saves: Shared<String>,
    fail: bool,
}

impl Persistence for MemoryCheckpoints {
    fn save_game(&mut self, name: &str, _state: &GameState) -> Result<PathBuf, EngineError> {
        let file = normalize_save_name(name);
        if self.fail {
            return Err(EngineError::Persistence {
                path: PathBuf::from(&file),
                source: io::Error::new(io::ErrorKind::PermissionDenied, "read-only savegame store"),
            });
        }
        record(&self.saves, file.clone());
        Ok(PathBuf::from(file))
    }
}

/// Records deliveries; players without an address, or listed in `bounce`,
/// fail.
pub struct OutboxNotifier {
    sent: Shared<PlayerId>,
    bounce: HashSet<PlayerId>,
}

impl Notifier for OutboxNotifier {
    fn notify_victory(
        &mut self,
        player: &Player,
        _outcome: &VictoryOutcome,
        summary: &str,
    ) -> Result<(), NotificationError> {
        let Some(address) = &player.email else {
            return Err(NotificationError::NoAddress(player.player_id.clone()));
        };
        if self.bounce.contains(&player.player_id) {
            return Err(NotificationError::Delivery {
                recipient: address.clone(),
                reason: "mailbox unavailable".to_string(),
            });
        }
        tracing::debug!(to = %address, %summary, "victory notification queued");
        record(&self.sent, player.player_id.clone());
        Ok(())
    }
}

/// Read side of the recording collaborators.
#[derive(Clone, Default)]
pub struct SimProbe {
    packets: Shared<(Recipient, Packet)>,
    saves: Shared<String>,
    notified: Shared<PlayerId>,
}

impl SimProbe {
    pub fn packets(&self) -> Vec<(Recipient, Packet)> {
        read(&self.packets)
    }

    /// Phases announced to clients, in order.
    pub fn announced_phases(&self) -> Vec<Phase> {
        self.packets()
            .into_iter()
            .filter_map(|(_, p)| match p {
                Packet::PhaseChanged { phase, .. } => Some(phase),
                _ => None,
            })
            .collect()
    }

    pub fn saves(&self) -> Vec<String> {
        read(&self.saves)
    }

    pub fn notified(&self) -> Vec<PlayerId> {
        read(&self.notified)
    }

    pub fn clear(&self) {
        if let Ok(mut p) = self.packets.lock() {
            p.clear();
        }
    }
}

/// Assembles a full set of simulated collaborators.
pub struct SimWorld {
    pub seed: u64,
    pub combat: SkirmishCombat,
    pub round_limit: Option<u32>,
    pub failing_saves: bool,
    pub bounced: HashSet<PlayerId>,
}

impl SimWorld {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            combat: SkirmishCombat::new(seed.wrapping_add(1), 0.3, 0.2),
            round_limit: Some(20),
            failing_saves: false,
            bounced: HashSet::new(),
        }
    }

    /// No combat and no round limit: the game only moves when told to.
    pub fn quiet(seed: u64) -> Self {
        Self {
            combat: SkirmishCombat::quiet(seed),
            round_limit: None,
            ..Self::new(seed)
        }
    }

    pub fn build(self) -> (Collaborators, SimProbe) {
        let probe = SimProbe::default();
        let services = Collaborators {
            turn_order: Box::new(DiceInitiative::new(self.seed)),
            combat: Box::new(self.combat),
            visibility: Box::new(OpenSkies),
            victory: Box::new(LastTeamStanding::new(self.round_limit)),
            ratings: Box::new(FlatRatings { swing: 16.0 }),
            board: Box::new(MapCatalog {
                maps: vec!["grassland".to_string(), "river-crossing".to_string()],
            }),
            transport: Box::new(RecordingTransport {
                log: probe.packets.clone(),
            }),
            persistence: Box::new(MemoryCheckpoints {
                saves: probe.saves.clone(),
                fail: self.failing_saves,
            }),
            notifier: Box::new(OutboxNotifier {
                sent: probe.notified.clone(),
                bounce: self.bounced,
            }),
        };
        (services, probe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_shape() {
        let (players, entities) = skirmish_roster(3, 2);
        assert_eq!(players.len(), 3);
        assert_eq!(entities.len(), 6);
        assert_eq!(entities[5].owner, "p2");
        assert!(entities.iter().all(|e| !e.deployed && e.deploy_round == 0));
    }

    #[test]
    fn test_deployment_turns_follow_undeployed_units() {
        let (players, mut entities) = skirmish_roster(2, 2);
        entities[0].deployed = true;
        let state = GameState::new(players, entities, GameOptions::default());
        let mut order = DiceInitiative::new(7);
        let turns = order.determine_turn_order(Phase::Deployment, &state);
        let owners: Vec<&str> = turns.iter().map(|t| t.player_id.as_str()).collect();
        assert_eq!(owners, vec!["p0", "p1", "p1"]);
        assert!(order.determine_turn_order(Phase::Premovement, &state).is_empty());
    }

    #[test]
    fn test_initiative_reports_one_roll_per_active_player() {
        let (players, entities) = skirmish_roster(3, 1);
        let mut state = GameState::new(players, entities, GameOptions::default());
        let mut order = DiceInitiative::new(7);
        order.roll_initiative(&mut state);
        assert_eq!(state.reports.len(), 3);
        assert!(state
            .reports
            .entries()
            .iter()
            .all(|e| e.message_id == ids::INITIATIVE_ROLL));
    }

    #[test]
    fn test_last_team_standing() {
        let (players, mut entities) = skirmish_roster(2, 1);
        let mut judge = LastTeamStanding::new(None);
        let state = GameState::new(players.clone(), entities.clone(), GameOptions::default());
        assert!(!judge.evaluate(&state).terminated);

        entities[1].status = EntityStatus::Destroyed;
        let state = GameState::new(players, entities, GameOptions::default());
        assert_eq!(judge.evaluate(&state), VictoryOutcome::team(1));
    }

    #[test]
    fn test_round_limit_awards_largest_force() {
        let (players, mut entities) = skirmish_roster(2, 1);
        entities[1].battle_value = 5000;
        let mut state = GameState::new(players, entities, GameOptions::default());
        state.round = 3;
        let mut judge = LastTeamStanding::new(Some(3));
        assert_eq!(judge.evaluate(&state), VictoryOutcome::team(2));
    }

    #[test]
    fn test_scripted_entries_once_per_round() {
        let (players, entities) = skirmish_roster(1, 1);
        let mut state = GameState::new(players, entities, GameOptions::default());
        state.phase = Phase::Firing;
        let mut combat = SkirmishCombat::quiet(1).with_scripted(Phase::Firing, 2);
        combat.resolve_all_but_weapon_attacks(&mut state);
        combat.handle_attacks(&mut state);
        assert_eq!(state.reports.len(), 2);
        state.round = 1;
        combat.handle_attacks(&mut state);
        assert_eq!(state.reports.len(), 4);
    }

    #[test]
    fn test_scripted_bookkeeping_stays_per_phase() {
        let (players, entities) = skirmish_roster(1, 1);
        let mut state = GameState::new(players, entities, GameOptions::default());
        state.phase = Phase::Firing;
        let mut combat = SkirmishCombat::quiet(1).with_scripted(Phase::Firing, 1);
        for round in 0..50 {
            state.round = round;
            combat.handle_attacks(&mut state);
            combat.handle_attacks(&mut state);
        }
        assert_eq!(state.reports.len(), 50);
        assert_eq!(combat.scripted_round.len(), 1);
        assert_eq!(combat.scripted_round.get(&Phase::Firing), Some(&49));
    }
}
