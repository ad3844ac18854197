//! Types for the player-control API

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Player-control connection settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Base URL of the local player-control API
    pub url: String,
    /// Sent as the `apitoken` header when set
    pub api_token: Option<String>,
    /// How many times `connect` tries the player before giving up
    pub connect_attempts: u32,
    /// Pause between connection attempts
    pub connect_backoff_ms: u64,
    pub request_timeout_ms: u64,
    /// Media file opened once the player is reachable. Without one the node
    /// syncs whatever the player already has loaded.
    pub media: Option<PathBuf>,
    /// Loop the opened media at its end
    pub looping: bool,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:10800".to_string(),
            api_token: None,
            connect_attempts: 3,
            connect_backoff_ms: 500,
            request_timeout_ms: 2000,
            media: None,
            looping: true,
        }
    }
}

/// Response for position endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct PositionResponse {
    /// Seconds into the media
    pub position: f64,
}

/// Response for duration endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct DurationResponse {
    /// Total media length in seconds
    pub duration: f64,
}

/// Request body for open endpoint
#[derive(Debug, Clone, Serialize)]
pub struct OpenRequest {
    pub path: PathBuf,
    #[serde(rename = "loop")]
    pub looping: bool,
}

/// Request body for seek endpoint
#[derive(Debug, Clone, Serialize)]
pub struct SeekRequest {
    pub position: f64,
}
