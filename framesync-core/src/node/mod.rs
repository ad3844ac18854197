//! Sync Node
//!
//! Wires the clock, election, synchronizer, dispatcher and timers into one
//! event loop that talks to a player and a broadcast network.

mod actuator;
mod handlers;
mod runtime;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::election::Role;
use crate::network::NetworkError;
use crate::player::PlayerError;
use crate::sync::Tier;

pub use runtime::SyncNode;

/// Fatal node errors
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Player bootstrap failed: {0}")]
    Player(#[from] PlayerError),

    #[error("Network failure: {0}")]
    Network(#[from] NetworkError),
}

/// Events emitted by a running node
#[derive(Debug, Clone, PartialEq)]
pub enum NodeEvent {
    /// The player answered and position polling has started
    Ready,
    RoleChanged(Role),
    /// A master broadcast was compared against the local position
    Corrected { tier: Tier, delta: f64 },
    /// The player was stopped and the loop has ended
    Stopped,
}

#[derive(Debug)]
pub(crate) enum NodeCommand {
    Shutdown,
}

/// Handle to communicate with the running node
#[derive(Debug, Clone)]
pub struct NodeHandle {
    command_tx: mpsc::UnboundedSender<NodeCommand>,
}

impl NodeHandle {
    /// Stop the player and end the node's loop
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(NodeCommand::Shutdown);
    }
}
