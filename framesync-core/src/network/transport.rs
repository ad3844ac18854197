//! UDP broadcast transport
//!
//! Binds one socket for both directions: datagrams go out to the broadcast
//! address and everything that arrives on the port, including our own
//! broadcasts, is decoded and forwarded to the node.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::Deserialize;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::sync::{Packet, WireError};

/// Largest datagram we accept
const MAX_DATAGRAM: usize = 64 * 1024;

/// Network configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Port used for both listening and broadcasting
    pub port: u16,
    pub bind_address: IpAddr,
    /// Destination for outbound broadcasts
    pub broadcast_address: IpAddr,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            broadcast_address: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 255)),
        }
    }
}

impl NetworkConfig {
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn broadcast_addr(&self) -> SocketAddr {
        SocketAddr::new(self.broadcast_address, self.port)
    }
}

/// Network-related errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("Network task closed")]
    Closed,
}

/// Commands sent to the transport task
#[derive(Debug)]
pub enum NetworkCommand {
    /// Send a packet to every node on the network
    Broadcast(Packet),
    /// Stop the transport task
    Shutdown,
}

/// Handle to communicate with the running transport
#[derive(Debug, Clone)]
pub struct NetworkHandle {
    command_tx: mpsc::UnboundedSender<NetworkCommand>,
}

impl NetworkHandle {
    /// A handle and the command stream it feeds. Lets any task stand in for
    /// the transport, such as an in-process bus.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<NetworkCommand>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        (Self { command_tx }, command_rx)
    }

    pub fn broadcast(&self, packet: impl Into<Packet>) -> Result<(), NetworkError> {
        self.command_tx
            .send(NetworkCommand::Broadcast(packet.into()))
            .map_err(|_| NetworkError::Closed)
    }

    pub fn shutdown(&self) {
        let _ = self.command_tx.send(NetworkCommand::Shutdown);
    }
}

/// UDP broadcast socket - runs in a background task once started
pub struct BroadcastTransport {
    socket: UdpSocket,
    destination: SocketAddr,
}

impl BroadcastTransport {
    pub async fn bind(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let addr = config.bind_addr();
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| NetworkError::Bind { addr, source })?;
        socket.set_broadcast(true)?;

        info!(
            "Listening on {}, broadcasting to {}",
            socket.local_addr()?,
            config.broadcast_addr()
        );

        Ok(Self {
            socket,
            destination: config.broadcast_addr(),
        })
    }

    /// Start the transport and return a handle plus the inbound packet stream
    pub fn start(self) -> (NetworkHandle, mpsc::UnboundedReceiver<Packet>) {
        let (packet_tx, packet_rx) = mpsc::unbounded_channel();
        let (handle, command_rx) = NetworkHandle::channel();

        tokio::spawn(self.run(packet_tx, command_rx));

        (handle, packet_rx)
    }

    /// Run the transport event loop
    async fn run(
        self,
        packet_tx: mpsc::UnboundedSender<Packet>,
        mut command_rx: mpsc::UnboundedReceiver<NetworkCommand>,
    ) {
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buf) => {
                    if !forward(received, &buf, &packet_tx) {
                        debug!("Packet receiver dropped, stopping network task");
                        break;
                    }
                }
                cmd = command_rx.recv() => {
                    match cmd {
                        Some(NetworkCommand::Broadcast(packet)) => {
                            if let Err(e) = self.send(&packet).await {
                                // Best effort: the protocol tolerates loss
                                debug!("Broadcast error: {}", e);
                            }
                        }
                        Some(NetworkCommand::Shutdown) | None => {
                            info!("Network shutting down");
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn send(&self, packet: &Packet) -> Result<(), NetworkError> {
        let data = packet.encode()?;
        self.socket.send_to(&data, self.destination).await?;
        Ok(())
    }
}

/// Decode one received datagram and pass it on. Receive errors and bad
/// datagrams are dropped; returns false once nobody is listening.
fn forward(
    received: io::Result<(usize, SocketAddr)>,
    buf: &[u8],
    packet_tx: &mpsc::UnboundedSender<Packet>,
) -> bool {
    let (len, from) = match received {
        Ok(received) => received,
        Err(e) => {
            // e.g. ICMP port unreachable surfacing as a reset
            warn!("Receive error: {}", e);
            return true;
        }
    };

    match Packet::decode(&buf[..len]) {
        Ok(packet) => packet_tx.send(packet).is_ok(),
        Err(e) => {
            debug!("Dropping datagram from {}: {}", from, e);
            true
        }
    }
}
