//! Turn queue and player readiness tracking.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::engine::models::{Player, PlayerId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub player_id: PlayerId,
}

impl Turn {
    pub fn new(player_id: impl Into<PlayerId>) -> Self {
        Self { player_id: player_id.into() }
    }
}

/// Ordered pending turns for the current phase. Rebuilt from scratch on
/// every turn-bearing phase entry and consumed front to back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnQueue {
    turns: Vec<Turn>,
    /// Index of the turn currently being played, if one was handed out.
    cursor: Option<usize>,
}

impl TurnQueue {
    pub fn replace(&mut self, turns: Vec<Turn>) {
        self.turns = turns;
        self.cursor = None;
    }

    pub fn clear(&mut self) {
        self.replace(Vec::new());
    }

    pub fn has_more_turns(&self) -> bool {
        self.turns.len() > self.cursor.map_or(0, |c| c + 1)
    }

    /// Hands out the next turn. `None` means the queue is exhausted.
    pub fn advance(&mut self) -> Option<(usize, &Turn)> {
        if !self.has_more_turns() {
            return None;
        }
        let next = self.cursor.map_or(0, |c| c + 1);
        self.cursor = Some(next);
        self.turns.get(next).map(|t| (next, t))
    }

    pub fn current(&self) -> Option<&Turn> {
        self.cursor.and_then(|c| self.turns.get(c))
    }

    pub fn remaining(&self) -> usize {
        self.turns.len() - self.cursor.map_or(0, |c| c + 1)
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Per-player "done" flags gating phases without turns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    done: BTreeSet<PlayerId>,
}

impl Readiness {
    pub fn reset(&mut self) {
        self.done.clear();
    }

    pub fn mark(&mut self, player_id: &str, done: bool) {
        if done {
            self.done.insert(player_id.to_string());
        } else {
            self.done.remove(player_id);
        }
    }

    pub fn is_done(&self, player_id: &str) -> bool {
        self.done.contains(player_id)
    }

    /// Every connected non-observer is done. An empty table is never "all done".
    pub fn all_done<'a>(&self, players: impl IntoIterator<Item = &'a Player>) -> bool {
        let mut gating = players.into_iter().filter(|p| p.gates_readiness()).peekable();
        if gating.peek().is_none() {
            return false;
        }
        gating.all(|p| self.is_done(&p.player_id))
    }

    pub fn snapshot<'a>(&self, players: impl IntoIterator<Item = &'a Player>) -> Vec<(PlayerId, bool)> {
        players
            .into_iter()
            .map(|p| (p.player_id.clone(), self.is_done(&p.player_id)))
            .collect()
    }
}
