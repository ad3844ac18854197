//! Player-control HTTP Client

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::types::*;
use super::Player;

/// Connection timeout (short since it's localhost)
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(1);

/// Errors that can occur when talking to the player
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Player is not running or not reachable")]
    NotReachable,

    #[error("Invalid API token")]
    Unauthorized,

    #[error("API error: {0}")]
    Api(String),
}

/// Client for a local player-control REST API
#[derive(Debug, Clone)]
pub struct HttpPlayer {
    http: Client,
    base_url: String,
    api_token: Option<String>,
    connect_attempts: u32,
    connect_backoff: Duration,
}

impl HttpPlayer {
    pub fn new(config: &PlayerConfig) -> Result<Self, PlayerError> {
        let http = Client::builder()
            .connect_timeout(CONNECTION_TIMEOUT)
            .timeout(Duration::from_millis(config.request_timeout_ms))
            // Limit connection pool to avoid stale connections
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(10))
            .tcp_keepalive(None)
            .build()?;

        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            connect_attempts: config.connect_attempts.max(1),
            connect_backoff: Duration::from_millis(config.connect_backoff_ms),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a request with optional authentication
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/api/v1/player{}", self.base_url, path);
        let mut req = self.http.request(method, &url);

        if let Some(token) = &self.api_token {
            req = req.header("apitoken", token);
        }

        req
    }

    async fn command(&self, path: &str) -> Result<(), PlayerError> {
        self.request(reqwest::Method::POST, path)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Check the player once
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn is_active(&self) -> Result<(), PlayerError> {
        debug!("Checking player connection");

        let resp = self
            .request(reqwest::Method::GET, "/active")
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    debug!("Player not reachable: {}", e);
                    PlayerError::NotReachable
                } else {
                    PlayerError::Api(format!("Network error ({})", e))
                }
            })?;

        match resp.status().as_u16() {
            200 | 204 => Ok(()),
            401 | 403 => Err(PlayerError::Unauthorized),
            status => Err(PlayerError::Api(format!("Unexpected response (HTTP {})", status))),
        }
    }
}

#[async_trait]
impl Player for HttpPlayer {
    async fn connect(&self) -> Result<(), PlayerError> {
        let mut attempt = 1;
        loop {
            match self.is_active().await {
                Ok(()) => {
                    info!("Connected to player at {}", self.base_url);
                    return Ok(());
                }
                Err(PlayerError::Unauthorized) => return Err(PlayerError::Unauthorized),
                Err(e) if attempt < self.connect_attempts => {
                    warn!(
                        "Player connection attempt {}/{} failed: {}",
                        attempt, self.connect_attempts, e
                    );
                    tokio::time::sleep(self.connect_backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[instrument(skip(self))]
    async fn open(&self, media: &Path, looping: bool) -> Result<(), PlayerError> {
        info!("Opening {} (loop: {})", media.display(), looping);
        self.request(reqwest::Method::POST, "/open")
            .json(&OpenRequest {
                path: media.to_path_buf(),
                looping,
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn play(&self) -> Result<(), PlayerError> {
        self.command("/play").await
    }

    async fn pause(&self) -> Result<(), PlayerError> {
        self.command("/pause").await
    }

    async fn position(&self) -> Result<f64, PlayerError> {
        let resp: PositionResponse = self
            .request(reqwest::Method::GET, "/position")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp.position)
    }

    async fn duration(&self) -> Result<f64, PlayerError> {
        let resp: DurationResponse = self
            .request(reqwest::Method::GET, "/duration")
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(resp.duration)
    }

    async fn set_position(&self, seconds: f64) -> Result<(), PlayerError> {
        self.request(reqwest::Method::POST, "/seek")
            .json(&SeekRequest { position: seconds })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn step_faster(&self) {
        if let Err(e) = self.command("/faster").await {
            warn!("Failed to step speed up: {}", e);
        }
    }

    async fn step_slower(&self) {
        if let Err(e) = self.command("/slower").await {
            warn!("Failed to step speed down: {}", e);
        }
    }

    async fn stop(&self) -> Result<(), PlayerError> {
        self.command("/stop").await
    }
}
