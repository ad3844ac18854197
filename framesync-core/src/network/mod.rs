//! Broadcast Networking
//!
//! Best-effort UDP broadcast of JSON packets on the local network.

mod transport;

pub use transport::{BroadcastTransport, NetworkCommand, NetworkConfig, NetworkError, NetworkHandle};
