//! Player Control
//!
//! The actuator side of drift correction: an abstract [`Player`] and an
//! HTTP client for a local player-control API.

mod client;
#[cfg(test)]
pub(crate) mod fake;
mod types;

use std::path::Path;

use async_trait::async_trait;

pub use client::{HttpPlayer, PlayerError};
pub use types::*;

/// Capabilities the sync node needs from a media player
#[async_trait]
pub trait Player: Send + Sync {
    /// Bootstrap the control channel. Success means polling may start.
    async fn connect(&self) -> Result<(), PlayerError>;

    /// Load `media` and start playing it from the beginning
    async fn open(&self, media: &Path, looping: bool) -> Result<(), PlayerError>;

    async fn play(&self) -> Result<(), PlayerError>;

    async fn pause(&self) -> Result<(), PlayerError>;

    /// Current playback position in seconds
    async fn position(&self) -> Result<f64, PlayerError>;

    /// Length of the loaded media in seconds
    async fn duration(&self) -> Result<f64, PlayerError>;

    /// Seek to `seconds`. Only acknowledges the request.
    async fn set_position(&self, seconds: f64) -> Result<(), PlayerError>;

    /// Nudge playback speed up one step. Failures are logged, not reported.
    async fn step_faster(&self);

    /// Nudge playback speed down one step. Failures are logged, not reported.
    async fn step_slower(&self);

    async fn stop(&self) -> Result<(), PlayerError>;
}
