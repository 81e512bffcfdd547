//! Narrative report entries, the per-phase report buffer and the
//! permanent per-round history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::engine::models::PlayerId;

/// Localizable message ids used by the engine itself. Combat and turn-order
/// collaborators bring their own ids.
pub mod ids {
    pub const INITIATIVE_HEADER: u32 = 1000;
    pub const INITIATIVE_ROLL: u32 = 1015;
    pub const TEAM_CHANGE: u32 = 1030;
    pub const TARGETING_HEADER: u32 = 1035;
    pub const OFFBOARD_HEADER: u32 = 1100;
    /// "<nothing happens>" placeholder for a skipped report phase.
    pub const NOTHING_HAPPENS: u32 = 1205;
    pub const MOVEMENT_HEADER: u32 = 2000;
    pub const FIRING_HEADER: u32 = 3000;
    pub const PHYSICAL_HEADER: u32 = 4000;
    pub const END_HEADER: u32 = 5000;
    pub const END_OF_ROUND_HEADER: u32 = 5005;
    pub const ENVIRONMENT_DEATH: u32 = 6015;
    pub const VICTORY_HEADER: u32 = 7000;
    pub const VICTORY_PLAYER: u32 = 7005;
    pub const VICTORY_TEAM: u32 = 7010;
    pub const VICTORY_DRAW: u32 = 7015;
    pub const ROSTER_SURVIVORS: u32 = 7020;
    pub const ROSTER_ENTRY: u32 = 7030;
    pub const ROSTER_UNDEPLOYED: u32 = 7075;
    pub const ROSTER_RETREATED: u32 = 7080;
    pub const ROSTER_DESTROYED: u32 = 7085;
    pub const ROSTER_DEVASTATED: u32 = 7090;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "player_id")]
pub enum Visibility {
    Public,
    Player(PlayerId),
}

/// One immutable narrative log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub message_id: u32,
    pub visibility: Visibility,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ReportEntry {
    pub fn public(message_id: u32) -> Self {
        Self {
            message_id,
            visibility: Visibility::Public,
            args: Vec::new(),
        }
    }

    pub fn scoped(message_id: u32, player_id: impl Into<PlayerId>) -> Self {
        Self {
            message_id,
            visibility: Visibility::Player(player_id.into()),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl ToString) -> Self {
        self.args.push(arg.to_string());
        self
    }

    /// `None` is an observer-style recipient and only sees public entries.
    pub fn is_visible_to(&self, player_id: Option<&str>) -> bool {
        match (&self.visibility, player_id) {
            (Visibility::Public, _) => true,
            (Visibility::Player(owner), Some(pid)) => owner == pid,
            (Visibility::Player(_), None) => false,
        }
    }
}

/// Ordered, append-only buffer of the current phase's report entries.
///
/// Each merged sub-report opens with a header entry via [`begin_section`];
/// the section count is what separates "only headers" from real content.
///
/// [`begin_section`]: ReportBuffer::begin_section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportBuffer {
    entries: Vec<ReportEntry>,
    sections: usize,
}

impl ReportBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: ReportEntry) {
        self.entries.push(entry);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = ReportEntry>) {
        self.entries.extend(entries);
    }

    pub fn begin_section(&mut self, header_id: u32) {
        self.sections += 1;
        self.entries.push(ReportEntry::public(header_id));
    }

    pub fn push_placeholder(&mut self) {
        self.entries.push(ReportEntry::public(ids::NOTHING_HAPPENS));
    }

    /// More entries than section headers (at least one entry is always
    /// treated as a header, even when no section was opened).
    pub fn is_substantive(&self) -> bool {
        self.entries.len() > self.sections.max(1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn sections(&self) -> usize {
        self.sections
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.sections = 0;
    }

    pub fn visible_to(&self, player_id: Option<&str>) -> Vec<ReportEntry> {
        self.entries
            .iter()
            .filter(|e| e.is_visible_to(player_id))
            .cloned()
            .collect()
    }
}

/// Permanent report history, keyed by round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundHistory {
    rounds: BTreeMap<u32, Vec<ReportEntry>>,
}

impl RoundHistory {
    pub fn commit(&mut self, round: u32, buffer: &ReportBuffer) {
        self.rounds
            .entry(round)
            .or_default()
            .extend(buffer.entries().iter().cloned());
    }

    pub fn round(&self, round: u32) -> &[ReportEntry] {
        self.rounds.get(&round).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, round: u32, message_id: u32) -> bool {
        self.round(round).iter().any(|e| e.message_id == message_id)
    }

    pub fn count(&self, round: u32, message_id: u32) -> usize {
        self.round(round)
            .iter()
            .filter(|e| e.message_id == message_id)
            .count()
    }

    pub fn total_entries(&self) -> usize {
        self.rounds.values().map(Vec::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &[ReportEntry])> {
        self.rounds.iter().map(|(r, e)| (*r, e.as_slice()))
    }

    pub fn clear(&mut self) {
        self.rounds.clear();
    }
}
