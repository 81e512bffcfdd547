//! Core engine data types: players, units, board and outbound packets.

use serde::{Deserialize, Serialize};

use crate::engine::error::EngineError;
use crate::engine::phase::Phase;
use crate::engine::report::{ReportEntry, RoundHistory};
use crate::engine::turns::Turn;

pub type PlayerId = String;
pub type EntityId = u32;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub player_id: PlayerId,
    pub display_name: String,
    #[serde(default)]
    pub team: u32,
    #[serde(default)]
    pub observer: bool,
    #[serde(default = "default_connected")]
    pub connected: bool,
    #[serde(default)]
    pub has_minefields: bool,
    #[serde(default = "default_rating")]
    pub rating: f64,
    #[serde(default)]
    pub email: Option<String>,
}

fn default_connected() -> bool {
    true
}

fn default_rating() -> f64 {
    1500.0
}

impl Player {
    pub fn new(player_id: impl Into<PlayerId>, team: u32) -> Self {
        let player_id = player_id.into();
        Self {
            display_name: player_id.clone(),
            player_id,
            team,
            observer: false,
            connected: true,
            has_minefields: false,
            rating: default_rating(),
            email: None,
        }
    }

    /// Counts toward "everyone is done" readiness checks.
    pub fn gates_readiness(&self) -> bool {
        self.connected && !self.observer
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Ground,
    Aerospace,
    FighterSquadron,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    Active,
    Retreated,
    Destroyed,
    Devastated,
    NeverJoined,
}

/// Reason an entity leaves the game. Codes are the bit values used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalCondition {
    Unknown,
    InRetreat,
    Pushed,
    Salvageable,
    Ejected,
    Captured,
    Devastated,
    NeverJoined,
}

impl RemovalCondition {
    pub fn code(self) -> u32 {
        match self {
            Self::Unknown => 0x0000,
            Self::InRetreat => 0x0100,
            Self::Pushed => 0x0200,
            Self::Salvageable => 0x0400,
            Self::Ejected => 0x0800,
            Self::Captured => 0x1000,
            Self::Devastated => 0x2000,
            Self::NeverJoined => 0x4000,
        }
    }

    pub fn from_code(code: u32) -> Result<Self, EngineError> {
        Ok(match code {
            0x0000 => Self::Unknown,
            0x0100 => Self::InRetreat,
            0x0200 => Self::Pushed,
            0x0400 => Self::Salvageable,
            0x0800 => Self::Ejected,
            0x1000 => Self::Captured,
            0x2000 => Self::Devastated,
            0x4000 => Self::NeverJoined,
            other => {
                return Err(EngineError::invalid_argument(format!(
                    "unknown removal condition {other:#06x}"
                )))
            }
        })
    }

    /// Roster the entity is listed under in the victory report.
    pub fn status(self) -> EntityStatus {
        match self {
            Self::InRetreat | Self::Pushed | Self::Captured => EntityStatus::Retreated,
            Self::Unknown | Self::Salvageable | Self::Ejected => EntityStatus::Destroyed,
            Self::Devastated => EntityStatus::Devastated,
            Self::NeverJoined => EntityStatus::NeverJoined,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity_id: EntityId,
    pub owner: PlayerId,
    pub name: String,
    pub kind: EntityKind,
    #[serde(default)]
    pub battle_value: u32,
    #[serde(default)]
    pub deploy_round: u32,
    #[serde(default)]
    pub deployed: bool,
    pub status: EntityStatus,
    #[serde(default)]
    pub hidden: bool,
    /// Phase in which a hidden unit reveals itself. Consumed once that
    /// phase has become current.
    #[serde(default)]
    pub hidden_activation: Option<Phase>,
    #[serde(default)]
    pub has_artillery: bool,
    #[serde(default)]
    pub acted: bool,
    #[serde(default)]
    pub armor: u32,
    #[serde(default)]
    pub structural_integrity: u32,
}

impl Entity {
    pub fn new(entity_id: EntityId, owner: impl Into<PlayerId>, name: impl Into<String>) -> Self {
        Self {
            entity_id,
            owner: owner.into(),
            name: name.into(),
            kind: EntityKind::Ground,
            battle_value: 1000,
            deploy_round: 0,
            deployed: false,
            status: EntityStatus::Active,
            hidden: false,
            hidden_activation: None,
            has_artillery: false,
            acted: false,
            armor: 0,
            structural_integrity: 0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.status == EntityStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub team_id: u32,
    pub members: Vec<PlayerId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardInfo {
    #[serde(default = "default_connected")]
    pub on_ground: bool,
    #[serde(default)]
    pub map_name: Option<String>,
    #[serde(default)]
    pub wind: Option<String>,
}

impl Default for BoardInfo {
    fn default() -> Self {
        Self {
            on_ground: true,
            map_name: None,
            wind: None,
        }
    }
}

/// Rules options consulted by the phase flow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOptions {
    #[serde(default)]
    pub double_blind: bool,
    #[serde(default)]
    pub hidden_units: bool,
    #[serde(default)]
    pub capital_fighters: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VictoryOutcome {
    pub terminated: bool,
    #[serde(default)]
    pub winning_player: Option<PlayerId>,
    #[serde(default)]
    pub winning_team: Option<u32>,
}

impl VictoryOutcome {
    pub fn ongoing() -> Self {
        Self::default()
    }

    pub fn draw() -> Self {
        Self {
            terminated: true,
            winning_player: None,
            winning_team: None,
        }
    }

    pub fn team(team_id: u32) -> Self {
        Self {
            terminated: true,
            winning_player: None,
            winning_team: Some(team_id),
        }
    }

    pub fn player(player_id: impl Into<PlayerId>) -> Self {
        Self {
            terminated: true,
            winning_player: Some(player_id.into()),
            winning_team: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HexChange {
    pub x: i32,
    pub y: i32,
    pub terrain: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamChange {
    pub player_id: PlayerId,
    pub team: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "to", content = "player_id")]
pub enum Recipient {
    All,
    Player(PlayerId),
}

/// Outbound notifications. Framing and encoding belong to the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Packet {
    PhaseChanged { phase: Phase, round: u32 },
    RoundChanged { round: u32 },
    Report { entries: Vec<ReportEntry> },
    AllReports { history: RoundHistory },
    TurnVector { turns: Vec<Turn> },
    Turn { index: usize, player_id: PlayerId },
    PlayerDones { done: Vec<(PlayerId, bool)> },
    PlayerUpdate { player: Player },
    ChangedHexes { hexes: Vec<HexChange> },
    EntitySnapshot { entities: Vec<Entity> },
    Chat { message: String },
    GameVictory { outcome: VictoryOutcome },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_codes_round_trip_through_status() {
        let retreat = RemovalCondition::from_code(0x0100).unwrap();
        assert_eq!(retreat, RemovalCondition::InRetreat);
        assert_eq!(retreat.status(), EntityStatus::Retreated);
        assert_eq!(
            RemovalCondition::from_code(0x2000).unwrap().status(),
            EntityStatus::Devastated
        );
    }

    #[test]
    fn test_out_of_range_removal_code_is_rejected() {
        let err = RemovalCondition::from_code(0x0300).unwrap_err();
        assert!(matches!(err, EngineError::InvalidArgument(_)));
        assert!(RemovalCondition::from_code(0x8000).is_err());
    }

    #[test]
    fn test_player_defaults_from_json() {
        let p: Player = serde_json::from_value(serde_json::json!({
            "player_id": "p0",
            "display_name": "Alice",
        }))
        .unwrap();
        assert!(p.connected);
        assert!(!p.observer);
        assert_eq!(p.rating, 1500.0);
        assert!(p.gates_readiness());
    }

    #[test]
    fn test_packet_wire_tag() {
        let json = serde_json::to_value(Packet::RoundChanged { round: 3 }).unwrap();
        assert_eq!(json["type"], "round_changed");
        assert_eq!(json["round"], 3);
    }
}
