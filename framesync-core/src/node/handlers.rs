//! Inbound message handlers
//!
//! `/elect` feeds the election, `/sync` feeds the failure detector and
//! drift correction. Handlers only change state and queue effects; the
//! runtime carries the effects out.

use std::time::Duration;

use tracing::{debug, warn};

use crate::clock::LogicalClock;
use crate::dispatcher::Dispatcher;
use crate::election::{Action, ElectionNode, Role};
use crate::sync::{
    Arg, Correction, ElectAnnouncement, PlaybackSynchronizer, PlayerCommand, PositionBroadcast,
    ELECT_ADDRESS, SYNC_ADDRESS,
};

/// Side effect queued by a state change
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Effect {
    Election(Action),
    Player(PlayerCommand),
    Corrected(Correction),
    /// Resume playback after a jump pause
    ScheduleResume(Duration),
}

/// Everything the event loop mutates in response to inputs
#[derive(Debug)]
pub(super) struct NodeState {
    pub(super) clock: LogicalClock,
    pub(super) election: ElectionNode,
    pub(super) synchronizer: PlaybackSynchronizer,
    effects: Vec<Effect>,
}

impl NodeState {
    pub(super) fn new(
        clock: LogicalClock,
        election: ElectionNode,
        synchronizer: PlaybackSynchronizer,
    ) -> Self {
        Self {
            clock,
            election,
            synchronizer,
            effects: Vec::new(),
        }
    }

    pub(super) fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    /// Queue election actions. Becoming master puts the player back to
    /// normal speed and playing.
    pub(super) fn election_actions(&mut self, actions: Vec<Action>) {
        for action in actions {
            let to_master = action == Action::RoleChanged(Role::Master);
            self.effects.push(Effect::Election(action));
            if to_master {
                let commands = self.synchronizer.reset();
                self.player_commands(commands);
            }
        }
    }

    pub(super) fn player_commands(&mut self, commands: Vec<PlayerCommand>) {
        self.effects.extend(commands.into_iter().map(Effect::Player));
    }

    pub(super) fn schedule_resume(&mut self, after: Duration) {
        self.effects.push(Effect::ScheduleResume(after));
    }

    fn on_elect(&mut self, args: &[Arg]) {
        let announcement = match ElectAnnouncement::try_from(args) {
            Ok(announcement) => announcement,
            Err(e) => {
                warn!("Dropping malformed elect: {}", e);
                return;
            }
        };

        let actions = self.election.on_elect(announcement.id);
        self.election_actions(actions);
    }

    fn on_sync(&mut self, args: &[Arg]) {
        let broadcast = match PositionBroadcast::try_from(args) {
            Ok(broadcast) => broadcast,
            Err(e) => {
                warn!("Dropping malformed sync: {}", e);
                return;
            }
        };

        let actions = self.election.heartbeat();
        self.election_actions(actions);

        if self.election.is_master() {
            // Our own broadcast coming back
            return;
        }

        debug!("Master at {:.3}s ({})", broadcast.seconds, broadcast.time);
        if let Some(correction) =
            self.synchronizer
                .synchronize(&mut self.clock, broadcast.seconds, broadcast.time)
        {
            self.player_commands(correction.commands.clone());
            self.effects.push(Effect::Corrected(correction));
        }
    }
}

/// Route `/elect` and `/sync` to the node state
pub(super) fn register(dispatcher: &mut Dispatcher<NodeState>) {
    dispatcher.register(ELECT_ADDRESS, |state: &mut NodeState, args: &[Arg]| {
        state.on_elect(args)
    });
    dispatcher.register(SYNC_ADDRESS, |state: &mut NodeState, args: &[Arg]| {
        state.on_sync(args)
    });
}
