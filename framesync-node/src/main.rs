//! framesync - Playback Node
//!
//! One node per display. Elects a master with its peers over UDP broadcast
//! and keeps the local player on the master's frame.
//!
//! Usage:
//!   cargo run --release -- --config framesync.toml
//!   RUST_LOG=framesync_core=trace cargo run --release

mod cli;

use std::sync::Arc;

use clap::Parser;
use framesync_core::{BroadcastTransport, HttpPlayer, NodeEvent, SyncNode};
use tracing::{debug, info, warn};

use cli::Args;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("framesync_core=debug".parse()?)
                .add_directive("framesync_node=info".parse()?)
                .add_directive("hyper_util=off".parse()?)
                .add_directive("reqwest=off".parse()?)
                .add_directive("hyper=off".parse()?),
        )
        .init();

    let config = args.load_config()?;
    info!(
        "framesync starting: {} fps, port {}, player {}",
        config.fps, config.network.port, config.player.url
    );

    let player = Arc::new(HttpPlayer::new(&config.player)?);
    let transport = BroadcastTransport::bind(&config.network).await?;
    let (network, inbound) = transport.start();

    let node = SyncNode::new(&config, player, network, inbound);
    info!("Node ID: {}", node.id());
    let (handle, mut events, task) = node.start();

    let signal_handle = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Quitting");
                signal_handle.shutdown();
            }
            Err(e) => warn!("Failed to listen for ctrl-c: {}", e),
        }
    });

    while let Some(event) = events.recv().await {
        match event {
            NodeEvent::Ready => info!("Player connected"),
            NodeEvent::RoleChanged(role) => info!("Role: {}", role),
            NodeEvent::Corrected { tier, delta } => debug!("Correction {:?} ({:+.3}s)", tier, delta),
            NodeEvent::Stopped => break,
        }
    }

    task.await??;
    info!("Done.");
    Ok(())
}
