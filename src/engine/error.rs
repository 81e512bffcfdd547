//! Error taxonomy for the round/phase engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::engine::models::{EntityId, PlayerId};
use crate::engine::phase::Phase;

/// Errors surfaced by controller operations and the dispatch host.
///
/// Collaborator failures that must not abort a round (checkpoint writes,
/// victory notifications) are logged and swallowed by the controller; they
/// only surface here when a caller invokes the collaborator directly.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The transition table has no row for the phase being ended.
    #[error("no transition defined for phase {phase}")]
    NoTransition { phase: Phase },

    /// A cascade of non-playable phases did not settle.
    #[error("phase cascade starting at {start} did not settle after {hops} hops")]
    CascadeOverflow { start: Phase, hops: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("unknown player {0}")]
    UnknownPlayer(PlayerId),

    #[error("unknown entity {0}")]
    UnknownEntity(EntityId),

    /// A turn was ended by someone other than its owner.
    #[error("player {player} tried to end a turn owned by {expected:?} during {phase}")]
    NotYourTurn {
        player: PlayerId,
        expected: Option<PlayerId>,
        phase: Phase,
    },

    #[error("failed to persist checkpoint {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config error in {}: {message}", .path.display())]
    Config { path: PathBuf, message: String },

    /// The dispatch host task is gone.
    #[error("game host is no longer running")]
    HostClosed,
}

impl EngineError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

/// Failure delivering an out-of-band notification to one recipient.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("player {0} has no notification address")]
    NoAddress(PlayerId),

    #[error("delivery to {recipient} failed: {reason}")]
    Delivery { recipient: String, reason: String },
}
