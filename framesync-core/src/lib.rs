//! framesync - Core Library
//!
//! Keeps media players on a local broadcast network on the same frame.
//! Nodes elect a single master over lossy UDP broadcast; slaves map the
//! master's timestamps onto their own clock and correct playback drift by
//! nudging speed, pausing or seeking.

pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod election;
pub mod network;
pub mod node;
pub mod player;
pub mod sync;
pub mod timers;

// Re-exports for convenience
pub use clock::{LogicalClock, Timestamp};
pub use config::{ConfigError, NodeConfig};
pub use election::{NodeId, Role};
pub use network::{BroadcastTransport, NetworkHandle};
pub use node::{NodeError, NodeEvent, NodeHandle, SyncNode};
pub use player::{HttpPlayer, Player, PlayerError};
