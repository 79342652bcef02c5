//! Server network layer handling UDP communications and sweep coordination

use crate::registry::{Registry, RelayConfig};
use log::{debug, error, info, warn};
use shared::{is_command, Command, ErrorCode, ErrorReply, Reply, MAX_DATAGRAM};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::interval;

/// Messages sent from network tasks to the main server loop
#[derive(Debug)]
pub enum ServerMessage {
    DatagramReceived { data: Vec<u8>, addr: SocketAddr },
    Shutdown,
}

/// Main relay coordinating the datagram endpoint, registry and sweeper.
///
/// The registry is owned by the run loop and mutated only there, so every
/// command and every sweep observes a consistent state without locking.
pub struct Server {
    socket: Arc<UdpSocket>,
    registry: Registry,

    // Communication channel from the receiver task (and shutdown handles)
    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub async fn new(
        addr: &str,
        config: RelayConfig,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!(
            "Relay listening on {} (max payload {} bytes)",
            socket.local_addr()?,
            MAX_DATAGRAM
        );

        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Ok(Server {
            socket,
            registry: Registry::new(config),
            server_tx,
            server_rx,
        })
    }

    /// Address the relay is bound to; useful when binding to port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Sender half of the event channel. Pushing [`ServerMessage::Shutdown`]
    /// into it makes the run loop drain and exit.
    pub fn shutdown_handle(&self) -> mpsc::UnboundedSender<ServerMessage> {
        self.server_tx.clone()
    }

    /// Spawns the task that continuously listens for incoming datagrams
    fn spawn_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let server_tx = self.server_tx.clone();

        tokio::spawn(async move {
            // One byte beyond the cap so an over-large datagram is
            // observable instead of silently truncated at the cap.
            let mut buffer = [0u8; MAX_DATAGRAM + 1];

            loop {
                match socket.recv_from(&mut buffer).await {
                    Ok((len, addr)) => {
                        let message = ServerMessage::DatagramReceived {
                            data: buffer[..len].to_vec(),
                            addr,
                        };
                        if server_tx.send(message).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Error receiving datagram: {}", e);
                        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                    }
                }
            }
        });
    }

    /// Sends one reply datagram. Transport errors are logged and swallowed;
    /// one failing peer must not affect others.
    async fn send_reply(&self, reply: Reply, addr: SocketAddr) {
        let text = reply.to_string();
        debug!("Reply to {}: {}", addr, text);
        if let Err(e) = self.socket.send_to(text.as_bytes(), addr).await {
            warn!("Failed to send reply to {}: {}", addr, e);
        }
    }

    async fn send_raw(&self, data: &[u8], addr: SocketAddr) {
        if let Err(e) = self.socket.send_to(data, addr).await {
            warn!("Failed to relay payload to {}: {}", addr, e);
        }
    }

    /// Classifies and processes one inbound datagram.
    async fn handle_datagram(&mut self, data: Vec<u8>, addr: SocketAddr) {
        if data.is_empty() {
            return;
        }
        // A datagram that filled the receive buffer past the cap arrived
        // over-large; reject without touching any state.
        if data.len() > MAX_DATAGRAM {
            warn!("Oversized datagram ({} bytes) from {}", data.len(), addr);
            let err = ErrorReply::new(ErrorCode::TooLarge, "PayloadTooLarge");
            self.send_reply(Reply::Error(err), addr).await;
            return;
        }

        if is_command(&data) {
            let reply = match Command::parse(&data) {
                Ok(command) => self.dispatch_command(command, addr),
                Err(err) => Reply::Error(err),
            };
            self.send_reply(reply, addr).await;
        } else {
            self.relay_payload(data, addr).await;
        }
    }

    /// Runs one parsed command against the registry and produces its reply.
    ///
    /// Touch comes first: any well-formed command counts as activity.
    fn dispatch_command(&mut self, command: Command, addr: SocketAddr) -> Reply {
        self.registry.touch(addr);

        match command {
            Command::Create => match self.registry.create_group(addr) {
                Ok(id) => Reply::Created { id },
                Err(err) => Reply::Error(err),
            },
            Command::Join { id } => match self.registry.join(addr, &id) {
                Ok(()) => Reply::Joined { id },
                Err(err) => Reply::Error(err),
            },
            Command::Leave { id } => match self.registry.leave(addr, &id) {
                Ok(()) => Reply::Left { id },
                Err(err) => Reply::Error(err),
            },
            Command::Ping => Reply::Pong {
                seconds: self.registry.config().heartbeat.as_secs(),
            },
            Command::Who => match self.registry.who(addr) {
                Ok((id, count)) => Reply::Who { id, count },
                Err(err) => Reply::Error(err),
            },
        }
    }

    /// Fans a payload datagram out verbatim to the sender's co-members.
    ///
    /// The sender is never echoed to itself and receivers see exactly the
    /// bytes the sender transmitted; the relay adds no framing.
    async fn relay_payload(&mut self, data: Vec<u8>, addr: SocketAddr) {
        self.registry.touch(addr);

        match self.registry.broadcast_targets(addr) {
            Ok((id, peers)) => {
                debug!(
                    "Relaying {} bytes from {} to {} peers in {}",
                    data.len(),
                    addr,
                    peers.len(),
                    id
                );
                for peer in peers {
                    self.send_raw(&data, peer).await;
                }
            }
            Err(err) => self.send_reply(Reply::Error(err), addr).await,
        }
    }

    /// Main server loop serializing all registry access
    pub async fn run(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        self.spawn_receiver();

        let mut sweep_interval = interval(self.registry.config().sweep_interval);

        info!("Relay started");

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(ServerMessage::DatagramReceived { data, addr }) => {
                            self.handle_datagram(data, addr).await;
                        }
                        Some(ServerMessage::Shutdown) | None => {
                            info!("Relay shutting down");
                            break;
                        }
                    }
                }

                _ = sweep_interval.tick() => {
                    let stats = self.registry.sweep(Instant::now());
                    if !stats.evicted_clients.is_empty() || !stats.removed_groups.is_empty() {
                        info!(
                            "Sweep: evicted {} clients, removed {} groups",
                            stats.evicted_clients.len(),
                            stats.removed_groups.len()
                        );
                    }
                    debug!(
                        "Status: {} clients, {} groups",
                        self.registry.num_clients(),
                        self.registry.num_groups()
                    );
                }
            }
        }

        Ok(())
    }
}
