//! Command-line arguments

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;
use framesync_core::{ConfigError, NodeConfig};

#[derive(Debug, Parser)]
#[command(name = "framesync")]
#[command(about = "Keep media players on a local network on the same frame", long_about = None)]
pub struct Args {
    /// Config file path (TOML). Built-in defaults are used without one.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Target frame rate of the played media
    #[arg(long)]
    pub fps: Option<f64>,

    /// UDP port for election and sync traffic
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Broadcast address of the local network
    #[arg(short, long)]
    pub broadcast: Option<IpAddr>,

    /// Base URL of the player-control API
    #[arg(long)]
    pub player_url: Option<String>,

    /// Media file to open and loop at startup
    #[arg(short, long)]
    pub media: Option<PathBuf>,
}

impl Args {
    /// Load the config file if one was given and apply flag overrides
    pub fn load_config(&self) -> Result<NodeConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => NodeConfig::load(path)?,
            None => NodeConfig::default(),
        };

        if let Some(fps) = self.fps {
            config.fps = fps;
        }
        if let Some(port) = self.port {
            config.network.port = port;
        }
        if let Some(broadcast) = self.broadcast {
            config.network.broadcast_address = broadcast;
        }
        if let Some(url) = &self.player_url {
            config.player.url = url.clone();
        }
        if let Some(media) = &self.media {
            config.player.media = Some(media.clone());
        }

        config.validate()?;
        Ok(config)
    }
}
