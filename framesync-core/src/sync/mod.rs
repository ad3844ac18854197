//! Sync Engine
//!
//! Wire messages and the drift-correction controller.

mod protocol;
mod synchronizer;

pub use protocol::*;
pub use synchronizer::*;
