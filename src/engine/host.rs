//! Async host: one task owns the controller and applies client commands in
//! arrival order, so phase logic never runs concurrently with itself.

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::engine::collaborators::Transport;
use crate::engine::controller::PhaseController;
use crate::engine::error::EngineError;
use crate::engine::models::*;
use crate::engine::phase::Phase;
use crate::engine::state::GameState;

const COMMAND_BUFFER: usize = 32;

/// A packet addressed to one recipient, as it leaves the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outbound {
    pub recipient: Recipient,
    pub packet: Packet,
}

pub type OutboundFeed = UnboundedReceiverStream<Outbound>;

/// Transport that forwards every packet onto an unbounded channel.
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Transport for ChannelTransport {
    fn send(&self, recipient: Recipient, packet: Packet) {
        if self.tx.send(Outbound { recipient, packet }).is_err() {
            debug!("outbound feed closed, packet dropped");
        }
    }
}

pub fn channel_transport() -> (ChannelTransport, OutboundFeed) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelTransport { tx }, UnboundedReceiverStream::new(rx))
}

type Reply = oneshot::Sender<Result<(), EngineError>>;

enum Command {
    ChangePhase { phase: Phase, reply: Reply },
    PlayerReady { player_id: PlayerId, done: bool, reply: Reply },
    EndTurn { player_id: PlayerId, reply: Reply },
    Connect { player: Player, reply: Reply },
    Disconnect { player_id: PlayerId, reply: Reply },
    RequestTeamChange { player_id: PlayerId, team: u32, reply: Reply },
    RemoveEntity { entity_id: EntityId, condition: u32, reply: Reply },
    Snapshot { reply: oneshot::Sender<GameState> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Cloneable handle for submitting commands to a running host.
#[derive(Clone)]
pub struct HostHandle {
    tx: mpsc::Sender<Command>,
}

impl HostHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| EngineError::HostClosed)?;
        rx.await.map_err(|_| EngineError::HostClosed)
    }

    pub async fn change_phase(&self, phase: Phase) -> Result<(), EngineError> {
        self.request(|reply| Command::ChangePhase { phase, reply })
            .await?
    }

    pub async fn player_ready(&self, player_id: &str, done: bool) -> Result<(), EngineError> {
        let player_id = player_id.to_string();
        self.request(|reply| Command::PlayerReady { player_id, done, reply })
            .await?
    }

    pub async fn end_turn(&self, player_id: &str) -> Result<(), EngineError> {
        let player_id = player_id.to_string();
        self.request(|reply| Command::EndTurn { player_id, reply })
            .await?
    }

    pub async fn connect(&self, player: Player) -> Result<(), EngineError> {
        self.request(|reply| Command::Connect { player, reply })
            .await?
    }

    pub async fn disconnect(&self, player_id: &str) -> Result<(), EngineError> {
        let player_id = player_id.to_string();
        self.request(|reply| Command::Disconnect { player_id, reply })
            .await?
    }

    pub async fn request_team_change(&self, player_id: &str, team: u32) -> Result<(), EngineError> {
        let player_id = player_id.to_string();
        self.request(|reply| Command::RequestTeamChange { player_id, team, reply })
            .await?
    }

    pub async fn remove_entity(&self, entity_id: EntityId, condition: u32) -> Result<(), EngineError> {
        self.request(|reply| Command::RemoveEntity { entity_id, condition, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<GameState, EngineError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Stops the host after commands already queued have been applied.
    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

/// Spawns the host task. The join handle yields the controller back once
/// every handle is dropped or [`HostHandle::shutdown`] is called.
pub fn spawn(controller: PhaseController) -> (HostHandle, JoinHandle<PhaseController>) {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let task = tokio::spawn(run(controller, rx));
    (HostHandle { tx }, task)
}

async fn run(mut controller: PhaseController, mut rx: mpsc::Receiver<Command>) -> PhaseController {
    info!(phase = %controller.phase(), "host started");
    while let Some(command) = rx.recv().await {
        if let ControlFlow::Stop = dispatch(&mut controller, command) {
            break;
        }
    }
    info!(phase = %controller.phase(), round = controller.state().round, "host stopped");
    controller
}

enum ControlFlow {
    Continue,
    Stop,
}

fn dispatch(controller: &mut PhaseController, command: Command) -> ControlFlow {
    let (label, result, reply) = match command {
        Command::ChangePhase { phase, reply } => ("change_phase", controller.change_phase(phase), reply),
        Command::PlayerReady { player_id, done, reply } => {
            ("player_ready", controller.player_ready(&player_id, done), reply)
        }
        Command::EndTurn { player_id, reply } => ("end_turn", controller.end_turn(&player_id), reply),
        Command::Connect { player, reply } => {
            controller.connect_player(player);
            ("connect", Ok(()), reply)
        }
        Command::Disconnect { player_id, reply } => {
            ("disconnect", controller.disconnect_player(&player_id), reply)
        }
        Command::RequestTeamChange { player_id, team, reply } => (
            "request_team_change",
            controller.request_team_change(&player_id, team),
            reply,
        ),
        Command::RemoveEntity { entity_id, condition, reply } => (
            "remove_entity",
            controller.remove_entity(entity_id, condition),
            reply,
        ),
        Command::Snapshot { reply } => {
            let _ = reply.send(controller.state().clone());
            return ControlFlow::Continue;
        }
        Command::Shutdown { reply } => {
            let _ = reply.send(());
            return ControlFlow::Stop;
        }
    };
    if let Err(e) = &result {
        warn!(command = label, error = %e, "command rejected");
    }
    let _ = reply.send(result);
    ControlFlow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::EngineConfig;
    use crate::engine::simulator::{skirmish_roster, SimWorld};
    use tokio_stream::StreamExt;

    fn hosted() -> (HostHandle, JoinHandle<PhaseController>, OutboundFeed) {
        let (players, entities) = skirmish_roster(2, 1);
        let (mut services, _probe) = SimWorld::quiet(3).build();
        let (transport, feed) = channel_transport();
        services.transport = Box::new(transport);
        let state = GameState::new(players, entities, GameOptions::default());
        let controller = PhaseController::new(state, services, &EngineConfig::default());
        let (handle, task) = spawn(controller);
        (handle, task, feed)
    }

    #[tokio::test]
    async fn test_readiness_moves_lounge_to_exchange() {
        let (handle, _task, mut feed) = hosted();
        handle.change_phase(Phase::Lounge).await.unwrap();
        handle.player_ready("p0", true).await.unwrap();
        assert_eq!(handle.snapshot().await.unwrap().phase, Phase::Lounge);
        handle.player_ready("p1", true).await.unwrap();
        assert_eq!(handle.snapshot().await.unwrap().phase, Phase::Exchange);

        let first = feed.next().await.unwrap();
        assert_eq!(first.recipient, Recipient::All);
        assert_eq!(
            first.packet,
            Packet::PhaseChanged {
                phase: Phase::Lounge,
                round: 0
            }
        );
    }

    #[tokio::test]
    async fn test_rejected_command_reports_error() {
        let (handle, _task, _feed) = hosted();
        handle.change_phase(Phase::Lounge).await.unwrap();
        let err = handle.player_ready("ghost", true).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownPlayer(_)));
        let err = handle.end_turn("p0").await.unwrap_err();
        assert!(matches!(err, EngineError::NotYourTurn { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_returns_controller() {
        let (handle, task, _feed) = hosted();
        handle.change_phase(Phase::Lounge).await.unwrap();
        handle.shutdown().await.unwrap();
        let controller = task.await.unwrap();
        assert_eq!(controller.phase(), Phase::Lounge);
        assert!(matches!(
            handle.snapshot().await,
            Err(EngineError::HostClosed)
        ));
    }
}
