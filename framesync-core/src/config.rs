//! Node configuration
//!
//! Every node on a network must agree on the frame rate, the port and the
//! election timeouts. All sections are optional in the TOML file.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::election::ElectionConfig;
use crate::network::NetworkConfig;
use crate::player::PlayerConfig;
use crate::sync::Tolerances;

/// Frame intervals between position polls
const POLL_FRAMES: f64 = 2.0;

/// Accepted frame rates
const MIN_FPS: f64 = 1.0;
const MAX_FPS: f64 = 1000.0;

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(2);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Target frame rate of the played media
    pub fps: f64,
    pub network: NetworkConfig,
    pub election: ElectionConfig,
    pub player: PlayerConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            fps: 25.0,
            network: NetworkConfig::default(),
            election: ElectionConfig::default(),
            player: PlayerConfig::default(),
        }
    }
}

impl NodeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_FPS..=MAX_FPS).contains(&self.fps) {
            return Err(ConfigError::Invalid(format!(
                "fps must be between {} and {}, got {}",
                MIN_FPS, MAX_FPS, self.fps
            )));
        }

        let timeouts = [
            ("heartbeat_timeout_ms", self.election.heartbeat_timeout_ms),
            ("elect_timeout_ms", self.election.elect_timeout_ms),
            ("voting_timeout_ms", self.election.voting_timeout_ms),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, ms)| *ms == 0) {
            return Err(ConfigError::Invalid(format!("election.{} must be > 0", name)));
        }

        if self.player.connect_attempts == 0 {
            return Err(ConfigError::Invalid(
                "player.connect_attempts must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn tolerances(&self) -> Tolerances {
        Tolerances::from_fps(self.fps)
    }

    /// How often the player position is sampled. Stays within the range
    /// valid frame rates give, even for a config that skipped validation.
    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(POLL_FRAMES / self.fps)
            .unwrap_or(MAX_POLL_INTERVAL)
            .clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL)
    }
}
