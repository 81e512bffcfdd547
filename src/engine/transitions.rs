//! The phase transition table.
//!
//! Pure data: which phase follows the one being ended, and under which
//! guard. The controller evaluates guards through [`GuardContext`] and
//! performs all side effects itself, so the table can be exercised against
//! plain boolean fakes.

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::engine::error::EngineError;
use crate::engine::phase::Phase;

/// Conditions a transition row may branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Guard {
    /// Some player has minefields to lay.
    AnyPlayerHasMinefields,
    /// The round counter is still below 1 (initial deployment).
    BeforeFirstRound,
    /// Undeployed units are scheduled for the current round.
    ShouldDeployThisRound,
    /// The report buffer holds more than its section headers.
    ReportSubstantive,
    /// The victory coordinator says the game is over.
    VictoryAchieved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Phase(Phase),
    /// VICTORY if the game is over, otherwise the given phase.
    VictoryOr(Phase),
    /// Full game reset.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub ending: Phase,
    pub guard: Option<Guard>,
    pub then: Target,
    pub otherwise: Target,
}

impl Rule {
    const fn always(ending: Phase, next: Phase) -> Self {
        Self {
            ending,
            guard: None,
            then: Target::Phase(next),
            otherwise: Target::Phase(next),
        }
    }

    const fn branch(ending: Phase, guard: Guard, then: Target, otherwise: Target) -> Self {
        Self { ending, guard: Some(guard), then, otherwise }
    }

    /// Rows whose failing guard skips a report phase leave a placeholder entry.
    pub fn placeholder_on_skip(&self) -> bool {
        self.guard == Some(Guard::ReportSubstantive)
    }
}

use Phase as P;
use Target::{Phase as To, VictoryOr};

pub const RULES: &[Rule] = &[
    Rule::always(P::Lounge, P::Exchange),
    Rule::always(P::Exchange, P::SetArtilleryAutohitHexes),
    Rule::always(P::StartingScenario, P::SetArtilleryAutohitHexes),
    Rule::branch(
        P::SetArtilleryAutohitHexes,
        Guard::AnyPlayerHasMinefields,
        To(P::DeployMinefields),
        To(P::Initiative),
    ),
    Rule::always(P::DeployMinefields, P::Initiative),
    Rule::branch(P::Deployment, Guard::BeforeFirstRound, To(P::Initiative), To(P::Targeting)),
    Rule::always(P::Initiative, P::InitiativeReport),
    Rule::branch(
        P::InitiativeReport,
        Guard::ShouldDeployThisRound,
        To(P::Deployment),
        To(P::Targeting),
    ),
    Rule::always(P::Premovement, P::Movement),
    Rule::branch(P::Movement, Guard::ReportSubstantive, To(P::MovementReport), To(P::Offboard)),
    Rule::always(P::MovementReport, P::Offboard),
    Rule::always(P::Prefiring, P::Firing),
    Rule::branch(P::Firing, Guard::ReportSubstantive, To(P::FiringReport), To(P::Physical)),
    Rule::always(P::FiringReport, P::Physical),
    Rule::branch(P::Physical, Guard::ReportSubstantive, To(P::PhysicalReport), To(P::End)),
    Rule::always(P::PhysicalReport, P::End),
    Rule::branch(
        P::Targeting,
        Guard::ReportSubstantive,
        To(P::TargetingReport),
        To(P::Premovement),
    ),
    Rule::always(P::TargetingReport, P::Premovement),
    Rule::branch(P::Offboard, Guard::ReportSubstantive, To(P::OffboardReport), To(P::Prefiring)),
    Rule::always(P::OffboardReport, P::Prefiring),
    Rule::branch(P::End, Guard::ReportSubstantive, To(P::EndReport), VictoryOr(P::Initiative)),
    Rule::branch(P::EndReport, Guard::VictoryAchieved, To(P::Victory), To(P::Initiative)),
    Rule {
        ending: P::Victory,
        guard: None,
        then: Target::Reset,
        otherwise: Target::Reset,
    },
];

static RULE_LOOKUP: Lazy<HashMap<Phase, &'static Rule>> =
    Lazy::new(|| RULES.iter().map(|r| (r.ending, r)).collect());

pub fn rule_for(phase: Phase) -> Result<&'static Rule, EngineError> {
    RULE_LOOKUP
        .get(&phase)
        .copied()
        .ok_or(EngineError::NoTransition { phase })
}

/// Answers guard questions for one transition evaluation.
pub trait GuardContext {
    fn check(&mut self, guard: Guard) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Successor {
    Phase(Phase),
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub next: Successor,
    /// A report phase was skipped and needs its placeholder entry.
    pub report_skipped: bool,
    /// The report guard passed and the buffer goes to a report phase.
    pub report_entered: bool,
}

pub fn decide(ending: Phase, ctx: &mut dyn GuardContext) -> Result<Decision, EngineError> {
    let rule = rule_for(ending)?;
    let passed = rule.guard.map_or(true, |g| ctx.check(g));
    let target = if passed { rule.then } else { rule.otherwise };
    let next = match target {
        Target::Phase(p) => Successor::Phase(p),
        Target::VictoryOr(p) => {
            if ctx.check(Guard::VictoryAchieved) {
                Successor::Phase(Phase::Victory)
            } else {
                Successor::Phase(p)
            }
        }
        Target::Reset => Successor::Reset,
    };
    Ok(Decision {
        next,
        report_skipped: rule.placeholder_on_skip() && !passed,
        report_entered: rule.placeholder_on_skip() && passed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Default)]
    struct Flags {
        on: HashSet<Guard>,
        asked: Vec<Guard>,
    }

    impl Flags {
        fn with(guards: &[Guard]) -> Self {
            Self {
                on: guards.iter().copied().collect(),
                asked: Vec::new(),
            }
        }
    }

    impl GuardContext for Flags {
        fn check(&mut self, guard: Guard) -> bool {
            self.asked.push(guard);
            self.on.contains(&guard)
        }
    }

    fn next(phase: Phase, guards: &[Guard]) -> Successor {
        decide(phase, &mut Flags::with(guards)).unwrap().next
    }

    #[test]
    fn test_every_phase_has_exactly_one_rule() {
        for phase in Phase::ALL {
            assert_eq!(RULES.iter().filter(|r| r.ending == phase).count(), 1, "{phase}");
        }
    }

    #[test]
    fn test_unconditional_rows() {
        assert_eq!(next(P::Lounge, &[]), Successor::Phase(P::Exchange));
        assert_eq!(next(P::StartingScenario, &[]), Successor::Phase(P::SetArtilleryAutohitHexes));
        assert_eq!(next(P::Initiative, &[]), Successor::Phase(P::InitiativeReport));
        assert_eq!(next(P::OffboardReport, &[]), Successor::Phase(P::Prefiring));
        assert_eq!(next(P::Victory, &[]), Successor::Reset);
    }

    #[test]
    fn test_minefield_branch() {
        assert_eq!(
            next(P::SetArtilleryAutohitHexes, &[Guard::AnyPlayerHasMinefields]),
            Successor::Phase(P::DeployMinefields)
        );
        assert_eq!(next(P::SetArtilleryAutohitHexes, &[]), Successor::Phase(P::Initiative));
    }

    #[test]
    fn test_deployment_branches() {
        assert_eq!(next(P::Deployment, &[Guard::BeforeFirstRound]), Successor::Phase(P::Initiative));
        assert_eq!(next(P::Deployment, &[]), Successor::Phase(P::Targeting));
        assert_eq!(
            next(P::InitiativeReport, &[Guard::ShouldDeployThisRound]),
            Successor::Phase(P::Deployment)
        );
        assert_eq!(next(P::InitiativeReport, &[]), Successor::Phase(P::Targeting));
    }

    #[test]
    fn test_report_guard_flags_skip_and_entry() {
        let d = decide(P::Movement, &mut Flags::with(&[])).unwrap();
        assert_eq!(d.next, Successor::Phase(P::Offboard));
        assert!(d.report_skipped);
        assert!(!d.report_entered);

        let d = decide(P::Movement, &mut Flags::with(&[Guard::ReportSubstantive])).unwrap();
        assert_eq!(d.next, Successor::Phase(P::MovementReport));
        assert!(!d.report_skipped);
        assert!(d.report_entered);
    }

    #[test]
    fn test_non_report_guard_never_asks_for_placeholder() {
        let d = decide(P::EndReport, &mut Flags::with(&[])).unwrap();
        assert!(!d.report_skipped);
        let d = decide(P::SetArtilleryAutohitHexes, &mut Flags::with(&[])).unwrap();
        assert!(!d.report_skipped);
    }

    #[test]
    fn test_end_consults_victory_only_when_report_is_skipped() {
        let mut flags = Flags::with(&[Guard::ReportSubstantive, Guard::VictoryAchieved]);
        let d = decide(P::End, &mut flags).unwrap();
        assert_eq!(d.next, Successor::Phase(P::EndReport));
        assert_eq!(flags.asked, vec![Guard::ReportSubstantive]);

        assert_eq!(next(P::End, &[Guard::VictoryAchieved]), Successor::Phase(P::Victory));
        assert_eq!(next(P::End, &[]), Successor::Phase(P::Initiative));
    }

    #[test]
    fn test_end_report_branches_on_victory() {
        assert_eq!(next(P::EndReport, &[Guard::VictoryAchieved]), Successor::Phase(P::Victory));
        assert_eq!(next(P::EndReport, &[]), Successor::Phase(P::Initiative));
    }
}
