//! Master election over lossy broadcast
//!
//! A bully-style election without coordinator messages. Every candidate
//! keeps re-announcing its identity on `/elect`. Hearing a lower identity
//! counts as a concession (a vote) and restarts the voting window; hearing
//! a higher identity means yielding at once. The highest node becomes
//! master once a full voting window passes with no new votes.
//!
//! The state machine performs no IO. Every transition returns the timer
//! and broadcast actions the caller has to carry out, in order.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::sync::ProtocolError;

/// Globally unique, totally ordered node identity.
///
/// Generated once per process and never persisted. Rendered as 32 hex
/// digits, so string order matches numeric order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(u128);

impl NodeId {
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn from_u128(value: u128) -> Self {
        Self(value)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl FromStr for NodeId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 32 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ProtocolError::InvalidNodeId(s.to_string()));
        }
        u128::from_str_radix(s, 16)
            .map(NodeId)
            .map_err(|_| ProtocolError::InvalidNodeId(s.to_string()))
    }
}

/// Role of this node in the group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Indeterminate,
    Slave,
    Master,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Indeterminate => "indeterminate",
            Role::Slave => "slave",
            Role::Master => "master",
        };
        f.write_str(name)
    }
}

/// Timers owned by the election state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElectionTimer {
    /// Master failure detector, refreshed by every accepted `/sync`
    Heartbeat,
    /// Re-announcement while the role is undecided
    Elect,
    /// Quiet period after the last vote before self-promotion
    Voting,
}

/// Side effects requested by the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Broadcast an `/elect` carrying this identity
    Announce(NodeId),
    /// (Re)arm a timer, replacing any pending instance
    Arm(ElectionTimer, Duration),
    Cancel(ElectionTimer),
    RoleChanged(Role),
}

/// Election timeouts. Must match across all nodes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    pub heartbeat_timeout_ms: u64,
    pub elect_timeout_ms: u64,
    pub voting_timeout_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_ms: 1000,
            elect_timeout_ms: 100,
            voting_timeout_ms: 750,
        }
    }
}

impl ElectionConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn elect_timeout(&self) -> Duration {
        Duration::from_millis(self.elect_timeout_ms)
    }

    pub fn voting_timeout(&self) -> Duration {
        Duration::from_millis(self.voting_timeout_ms)
    }
}

/// Election state for one node
#[derive(Debug)]
pub struct ElectionNode {
    id: NodeId,
    config: ElectionConfig,
    role: Role,
    votes: u32,
    /// Announcement round of the current election attempt
    cycle: u32,
    /// Timers this node believes are armed
    pending: HashSet<ElectionTimer>,
}

impl ElectionNode {
    pub fn new(id: NodeId, config: ElectionConfig) -> Self {
        Self {
            id,
            config,
            role: Role::Indeterminate,
            votes: 0,
            cycle: 0,
            pending: HashSet::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    pub fn votes(&self) -> u32 {
        self.votes
    }

    pub fn cycle(&self) -> u32 {
        self.cycle
    }

    pub fn is_pending(&self, timer: ElectionTimer) -> bool {
        self.pending.contains(&timer)
    }

    /// Restart the failure detector. Called at startup and for every
    /// accepted master broadcast.
    pub fn heartbeat(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        self.arm(ElectionTimer::Heartbeat, self.config.heartbeat_timeout(), &mut actions);
        actions
    }

    /// React to an expired timer. Timers that were cancelled or
    /// re-armed since are ignored.
    pub fn on_timer(&mut self, timer: ElectionTimer) -> Vec<Action> {
        if !self.pending.remove(&timer) {
            debug!("Ignoring stale {:?} timer", timer);
            return Vec::new();
        }

        match timer {
            ElectionTimer::Heartbeat => {
                info!("Heartbeat lost, starting election");
                self.elect(0)
            }
            ElectionTimer::Elect => self.elect(self.cycle.saturating_add(1)),
            ElectionTimer::Voting => {
                let mut actions = Vec::new();
                self.transition(Role::Master, &mut actions);
                actions
            }
        }
    }

    /// React to a peer's `/elect`. Each delivery is judged on its own, so
    /// duplicates and reordering need no bookkeeping.
    pub fn on_elect(&mut self, other: NodeId) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.id > other {
            debug!("Got elect {}, incrementing votes", other);
            self.set_votes(self.votes.saturating_add(1), &mut actions);
        } else if self.id < other {
            debug!("Got elect {}, becoming slave", other);
            self.transition(Role::Slave, &mut actions);
        }
        actions
    }

    fn elect(&mut self, cycle: u32) -> Vec<Action> {
        let mut actions = Vec::new();
        self.cycle = cycle;
        if cycle == 0 {
            self.set_votes(0, &mut actions);
        }
        if self.role != Role::Indeterminate {
            self.role = Role::Indeterminate;
            actions.push(Action::RoleChanged(Role::Indeterminate));
        }

        actions.push(Action::Announce(self.id));
        self.arm(ElectionTimer::Elect, self.config.elect_timeout(), &mut actions);
        actions
    }

    /// Every vote change restarts the voting window
    fn set_votes(&mut self, votes: u32, actions: &mut Vec<Action>) {
        self.votes = votes;
        self.arm(ElectionTimer::Voting, self.config.voting_timeout(), actions);
    }

    fn transition(&mut self, role: Role, actions: &mut Vec<Action>) {
        self.cancel(ElectionTimer::Elect, actions);
        self.cancel(ElectionTimer::Voting, actions);

        if self.role == role {
            return;
        }
        self.role = role;
        info!("Node {} is now {}", self.id, role);
        actions.push(Action::RoleChanged(role));

        // A slave waits for its master's broadcasts. If they never come,
        // the heartbeat sends it back into the election.
        if role == Role::Slave {
            self.arm(ElectionTimer::Heartbeat, self.config.heartbeat_timeout(), actions);
        }
    }

    fn arm(&mut self, timer: ElectionTimer, after: Duration, actions: &mut Vec<Action>) {
        self.pending.insert(timer);
        actions.push(Action::Arm(timer, after));
    }

    fn cancel(&mut self, timer: ElectionTimer, actions: &mut Vec<Action>) {
        if self.pending.remove(&timer) {
            actions.push(Action::Cancel(timer));
        }
    }
}
