//! Single-worker command queue for the player.
//!
//! Commands run one at a time in issue order, so a `Play` followed by speed
//! steps reaches the player in that order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::runtime::Input;
use crate::player::Player;
use crate::sync::PlayerCommand;

#[derive(Debug, Clone)]
pub(super) struct Actuator {
    command_tx: mpsc::UnboundedSender<PlayerCommand>,
}

impl Actuator {
    /// Spawn the worker. Pause outcomes are reported on `inputs`.
    pub(super) fn spawn(player: Arc<dyn Player>, inputs: mpsc::UnboundedSender<Input>) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(player, command_rx, inputs));
        Self { command_tx }
    }

    pub(super) fn send(&self, command: PlayerCommand) {
        if self.command_tx.send(command).is_err() {
            warn!("Actuator stopped, dropping {:?}", command);
        }
    }
}

async fn run(
    player: Arc<dyn Player>,
    mut command_rx: mpsc::UnboundedReceiver<PlayerCommand>,
    inputs: mpsc::UnboundedSender<Input>,
) {
    while let Some(command) = command_rx.recv().await {
        debug!("Player command {:?}", command);
        match command {
            PlayerCommand::Play => {
                if let Err(e) = player.play().await {
                    warn!("Failed to resume playback: {}", e);
                }
            }
            PlayerCommand::Pause { lead, issued_at } => {
                let result = player.pause().await;
                if let Err(e) = &result {
                    warn!("Failed to pause: {}", e);
                }
                let _ = inputs.send(Input::PauseCompleted {
                    succeeded: result.is_ok(),
                    lead,
                    issued_at,
                });
            }
            PlayerCommand::Seek(seconds) => {
                if let Err(e) = player.set_position(seconds).await {
                    warn!("Error setting position: {}", e);
                }
            }
            PlayerCommand::StepFaster => player.step_faster().await,
            PlayerCommand::StepSlower => player.step_slower().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use crate::player::fake::{Call, FakePlayer};

    #[tokio::test]
    async fn test_commands_run_in_issue_order() {
        let player = Arc::new(FakePlayer::new(0.0, 10.0));
        let (inputs, mut input_rx) = mpsc::unbounded_channel();
        let actuator = Actuator::spawn(player.clone(), inputs);

        actuator.send(PlayerCommand::Play);
        actuator.send(PlayerCommand::StepFaster);
        actuator.send(PlayerCommand::StepFaster);
        actuator.send(PlayerCommand::Seek(4.5));
        actuator.send(PlayerCommand::Pause {
            lead: 1.0,
            issued_at: Timestamp::from_micros(7),
        });

        match input_rx.recv().await {
            Some(Input::PauseCompleted {
                succeeded,
                lead,
                issued_at,
            }) => {
                assert!(succeeded);
                assert_eq!(lead, 1.0);
                assert_eq!(issued_at, Timestamp::from_micros(7));
            }
            other => panic!("expected pause outcome, got {:?}", other),
        }
        assert_eq!(
            player.calls(),
            vec![
                Call::Play,
                Call::StepFaster,
                Call::StepFaster,
                Call::SetPosition(4.5),
                Call::Pause
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_pause_is_reported() {
        let player = Arc::new(FakePlayer::new(0.0, 10.0).failing_pause());
        let (inputs, mut input_rx) = mpsc::unbounded_channel();
        let actuator = Actuator::spawn(player, inputs);

        actuator.send(PlayerCommand::Pause {
            lead: 2.0,
            issued_at: Timestamp::UNIX_EPOCH,
        });

        assert!(matches!(
            input_rx.recv().await,
            Some(Input::PauseCompleted { succeeded: false, .. })
        ));
    }
}
