//! Phase identity and the static phase classifier.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::report::ids;

/// One named stage of a game round, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Lounge,
    Exchange,
    StartingScenario,
    SetArtilleryAutohitHexes,
    DeployMinefields,
    Deployment,
    Initiative,
    InitiativeReport,
    Premovement,
    Movement,
    MovementReport,
    Prefiring,
    Firing,
    FiringReport,
    Targeting,
    TargetingReport,
    Offboard,
    OffboardReport,
    Physical,
    PhysicalReport,
    End,
    EndReport,
    Victory,
}

/// Static metadata carried by every phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTraits {
    pub phase: Phase,
    /// Clients may interact before the phase ends. Phases without this flag
    /// always auto-advance.
    pub playable: bool,
    /// The phase hands out turns from the turn queue.
    pub has_turns: bool,
    /// The phase only exists to present the previous phase's report.
    pub is_report: bool,
    /// Header entry opening the phase's report buffer, if any.
    pub header: Option<u32>,
}

const fn traits(
    phase: Phase,
    playable: bool,
    has_turns: bool,
    is_report: bool,
    header: Option<u32>,
) -> PhaseTraits {
    PhaseTraits { phase, playable, has_turns, is_report, header }
}

/// Classifier table, indexed by `Phase as usize`.
pub const PHASE_TABLE: [PhaseTraits; 23] = [
    traits(Phase::Lounge, true, false, false, None),
    traits(Phase::Exchange, true, false, false, None),
    traits(Phase::StartingScenario, true, false, false, None),
    traits(Phase::SetArtilleryAutohitHexes, true, true, false, None),
    traits(Phase::DeployMinefields, true, true, false, None),
    traits(Phase::Deployment, true, true, false, None),
    traits(Phase::Initiative, false, false, false, Some(ids::INITIATIVE_HEADER)),
    traits(Phase::InitiativeReport, true, false, true, None),
    traits(Phase::Premovement, true, true, false, None),
    traits(Phase::Movement, true, true, false, Some(ids::MOVEMENT_HEADER)),
    traits(Phase::MovementReport, true, false, true, None),
    traits(Phase::Prefiring, true, true, false, None),
    traits(Phase::Firing, true, true, false, Some(ids::FIRING_HEADER)),
    traits(Phase::FiringReport, true, false, true, None),
    traits(Phase::Targeting, true, true, false, Some(ids::TARGETING_HEADER)),
    traits(Phase::TargetingReport, true, false, true, None),
    traits(Phase::Offboard, true, true, false, Some(ids::OFFBOARD_HEADER)),
    traits(Phase::OffboardReport, true, false, true, None),
    traits(Phase::Physical, true, true, false, Some(ids::PHYSICAL_HEADER)),
    traits(Phase::PhysicalReport, true, false, true, None),
    traits(Phase::End, false, false, false, Some(ids::END_HEADER)),
    traits(Phase::EndReport, true, false, true, None),
    traits(Phase::Victory, true, false, false, None),
];

impl Phase {
    pub const ALL: [Phase; 23] = [
        Phase::Lounge,
        Phase::Exchange,
        Phase::StartingScenario,
        Phase::SetArtilleryAutohitHexes,
        Phase::DeployMinefields,
        Phase::Deployment,
        Phase::Initiative,
        Phase::InitiativeReport,
        Phase::Premovement,
        Phase::Movement,
        Phase::MovementReport,
        Phase::Prefiring,
        Phase::Firing,
        Phase::FiringReport,
        Phase::Targeting,
        Phase::TargetingReport,
        Phase::Offboard,
        Phase::OffboardReport,
        Phase::Physical,
        Phase::PhysicalReport,
        Phase::End,
        Phase::EndReport,
        Phase::Victory,
    ];

    #[inline]
    pub fn traits(self) -> &'static PhaseTraits {
        &PHASE_TABLE[self as usize]
    }

    pub fn has_turns(self) -> bool {
        self.traits().has_turns
    }

    pub fn is_report(self) -> bool {
        self.traits().is_report
    }

    pub fn header(self) -> Option<u32> {
        self.traits().header
    }

    /// Whether clients get to see this phase, given the state of the turn queue.
    /// Turn-bearing phases with nobody left to act are skipped.
    pub fn is_playable(self, has_more_turns: bool) -> bool {
        let t = self.traits();
        t.playable && (!t.has_turns || has_more_turns)
    }

    /// The shared turn-bearing group prepared by unit-level turn order.
    /// Minefield and artillery phases build their queues from player
    /// eligibility instead.
    pub fn uses_unit_turn_order(self) -> bool {
        self.has_turns()
            && !matches!(self, Phase::SetArtilleryAutohitHexes | Phase::DeployMinefields)
    }

    pub fn name(self) -> &'static str {
        match self {
            Phase::Lounge => "LOUNGE",
            Phase::Exchange => "EXCHANGE",
            Phase::StartingScenario => "STARTING_SCENARIO",
            Phase::SetArtilleryAutohitHexes => "SET_ARTILLERY_AUTOHIT_HEXES",
            Phase::DeployMinefields => "DEPLOY_MINEFIELDS",
            Phase::Deployment => "DEPLOYMENT",
            Phase::Initiative => "INITIATIVE",
            Phase::InitiativeReport => "INITIATIVE_REPORT",
            Phase::Premovement => "PREMOVEMENT",
            Phase::Movement => "MOVEMENT",
            Phase::MovementReport => "MOVEMENT_REPORT",
            Phase::Prefiring => "PREFIRING",
            Phase::Firing => "FIRING",
            Phase::FiringReport => "FIRING_REPORT",
            Phase::Targeting => "TARGETING",
            Phase::TargetingReport => "TARGETING_REPORT",
            Phase::Offboard => "OFFBOARD",
            Phase::OffboardReport => "OFFBOARD_REPORT",
            Phase::Physical => "PHYSICAL",
            Phase::PhysicalReport => "PHYSICAL_REPORT",
            Phase::End => "END",
            Phase::EndReport => "END_REPORT",
            Phase::Victory => "VICTORY",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_indexed_by_discriminant() {
        for phase in Phase::ALL {
            assert_eq!(phase.traits().phase, phase);
        }
    }

    #[test]
    fn test_report_phases_are_playable_without_turns() {
        for phase in Phase::ALL.into_iter().filter(|p| p.is_report()) {
            assert!(phase.is_playable(false), "{phase} should be playable");
            assert!(!phase.has_turns());
        }
    }

    #[test]
    fn test_initiative_and_end_always_auto_advance() {
        assert!(!Phase::Initiative.is_playable(true));
        assert!(!Phase::End.is_playable(true));
    }

    #[test]
    fn test_turn_phase_without_turns_is_skipped() {
        assert!(Phase::Movement.is_playable(true));
        assert!(!Phase::Movement.is_playable(false));
        assert!(!Phase::DeployMinefields.is_playable(false));
    }

    #[test]
    fn test_unit_turn_order_group() {
        let group: Vec<Phase> = Phase::ALL
            .into_iter()
            .filter(|p| p.uses_unit_turn_order())
            .collect();
        assert_eq!(
            group,
            vec![
                Phase::Deployment,
                Phase::Premovement,
                Phase::Movement,
                Phase::Prefiring,
                Phase::Firing,
                Phase::Targeting,
                Phase::Offboard,
                Phase::Physical,
            ]
        );
    }

    #[test]
    fn test_serde_uses_wire_names() {
        let json = serde_json::to_string(&Phase::SetArtilleryAutohitHexes).unwrap();
        assert_eq!(json, "\"SET_ARTILLERY_AUTOHIT_HEXES\"");
        assert_eq!(Phase::EndReport.to_string(), "END_REPORT");
    }
}
