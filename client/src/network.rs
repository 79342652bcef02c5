//! Client-side network layer for the group relay
//!
//! This module implements the client's network responsibilities:
//! - UDP socket management and server address resolution
//! - A background receive task that prints server replies and peer
//!   payloads as they arrive, out of band with the readline loop
//! - A background heartbeat task sending `!PING` at the server-advertised
//!   cadence while the client is joined to a group

use log::warn;
use rand::Rng;
use shared::MAX_DATAGRAM;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::Mutex;

/// Heartbeat interval assumed until the first `PONG` tells us better.
const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(60);

/// Mutable session state shared between the readline loop and the
/// background tasks.
#[derive(Debug)]
pub struct Session {
    /// Group we most recently joined, if any.
    pub joined_group: Option<String>,
    /// ID from the most recent `OK CREATED` reply.
    pub last_created: Option<String>,
    /// Server-advertised heartbeat interval.
    pub heartbeat: Duration,
    /// When we last sent anything; the heartbeat task pings once this is
    /// older than the interval.
    pub last_send: Instant,
}

impl Session {
    fn new() -> Self {
        Self {
            joined_group: None,
            last_created: None,
            heartbeat: DEFAULT_HEARTBEAT,
            last_send: Instant::now(),
        }
    }

    /// Seconds until the heartbeat task would ping next.
    pub fn next_ping_eta(&self) -> Duration {
        self.heartbeat.saturating_sub(self.last_send.elapsed())
    }
}

/// A server reply or peer payload, classified for display.
#[derive(Debug, PartialEq, Eq)]
pub enum ServerEvent {
    Created { id: String },
    Joined { id: String },
    Left { id: String },
    Who { id: String, count: usize },
    Pong { seconds: u64 },
    Error { code: String, message: String },
    Payload,
}

/// Classifies one inbound datagram rendered as text.
///
/// Anything that does not parse as a known reply envelope is a peer
/// payload; the relay adds no framing, so this is best-effort by design.
pub fn classify_server_message(msg: &str) -> ServerEvent {
    let tokens: Vec<&str> = msg.split(' ').collect();
    match tokens.as_slice() {
        ["OK", "CREATED", id] => ServerEvent::Created { id: (*id).to_string() },
        ["OK", "JOINED", id] => ServerEvent::Joined { id: (*id).to_string() },
        ["OK", "LEFT", id] => ServerEvent::Left { id: (*id).to_string() },
        ["OK", "WHO", id, count] => match count.parse() {
            Ok(count) => ServerEvent::Who { id: (*id).to_string(), count },
            Err(_) => ServerEvent::Payload,
        },
        ["PONG", seconds] => match seconds.parse() {
            Ok(seconds) => ServerEvent::Pong { seconds },
            Err(_) => ServerEvent::Payload,
        },
        ["ERR", code, rest @ ..] if !rest.is_empty() => ServerEvent::Error {
            code: (*code).to_string(),
            message: rest.join(" "),
        },
        _ => ServerEvent::Payload,
    }
}

/// Relay client: one UDP socket plus the shared session state.
pub struct Client {
    socket: Arc<UdpSocket>,
    server_addr: SocketAddr,
    session: Arc<Mutex<Session>>,
}

impl Client {
    /// Binds a local socket, resolves the relay address and starts the
    /// receive and heartbeat tasks.
    pub async fn new(server_addr: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let socket = Arc::new(UdpSocket::bind("0.0.0.0:0").await?);
        let server_addr = Self::resolve_address(server_addr)?;

        let client = Client {
            socket,
            server_addr,
            session: Arc::new(Mutex::new(Session::new())),
        };
        client.spawn_receiver();
        client.spawn_heartbeat();
        Ok(client)
    }

    /// Resolves the relay address, supporting both IP addresses and
    /// domain names.
    fn resolve_address(addr_str: &str) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        if let Ok(addr) = addr_str.parse::<SocketAddr>() {
            return Ok(addr);
        }

        use std::net::ToSocketAddrs;
        let mut addrs = addr_str.to_socket_addrs()?;
        addrs
            .next()
            .ok_or_else(|| format!("Failed to resolve address: {}", addr_str).into())
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn session(&self) -> Arc<Mutex<Session>> {
        Arc::clone(&self.session)
    }

    /// Listens for server replies and peer payloads and prints them.
    fn spawn_receiver(&self) {
        let socket = Arc::clone(&self.socket);
        let session = Arc::clone(&self.session);

        tokio::spawn(async move {
            let mut buffer = [0u8; MAX_DATAGRAM + 1];

            loop {
                let (len, _) = match socket.recv_from(&mut buffer).await {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("Error receiving datagram: {}", e);
                        break;
                    }
                };
                let msg = String::from_utf8_lossy(&buffer[..len]).into_owned();

                match classify_server_message(&msg) {
                    ServerEvent::Created { id } => {
                        session.lock().await.last_created = Some(id);
                        println!("[server] {}", msg);
                    }
                    ServerEvent::Joined { id } => {
                        session.lock().await.joined_group = Some(id);
                        println!("[server] {}", msg);
                    }
                    ServerEvent::Left { .. } => {
                        session.lock().await.joined_group = None;
                        println!("[server] {}", msg);
                    }
                    ServerEvent::Who { id, count } => {
                        println!("[server] group={} peers={}", id, count);
                    }
                    ServerEvent::Pong { seconds } => {
                        if seconds > 0 {
                            let mut state = session.lock().await;
                            state.heartbeat = Duration::from_secs(seconds);
                            // Restart the timer with a little jitter so a
                            // fleet of clients does not ping in lockstep
                            let jitter_ms =
                                rand::thread_rng().gen_range(0..=seconds * 100);
                            state.last_send = Instant::now() - Duration::from_millis(jitter_ms);
                        }
                        println!("[server] {}", msg);
                    }
                    ServerEvent::Error { code, message } => {
                        println!("[server] error: {} - {}", code, message);
                    }
                    ServerEvent::Payload => {
                        println!("[peer] {}", msg);
                    }
                }
            }
        });
    }

    /// Sends periodic pings while joined to a group.
    fn spawn_heartbeat(&self) {
        let socket = Arc::clone(&self.socket);
        let server_addr = self.server_addr;
        let session = Arc::clone(&self.session);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(250)).await;

                let due = {
                    let state = session.lock().await;
                    state.joined_group.is_some()
                        && state.last_send.elapsed() >= state.heartbeat
                };
                if due {
                    if let Err(e) = socket.send_to(b"!PING", server_addr).await {
                        warn!("Heartbeat send failed: {}", e);
                    }
                    session.lock().await.last_send = Instant::now();
                }
            }
        });
    }

    /// Sends raw text to the relay. Any user-initiated send resets the
    /// heartbeat timer; the relay counts it as activity too.
    pub async fn send_text(&self, text: &str) {
        self.session.lock().await.last_send = Instant::now();
        if let Err(e) = self.socket.send_to(text.as_bytes(), self.server_addr).await {
            warn!("Failed to send to relay: {}", e);
        }
    }

    pub async fn create(&self) {
        // Cleared first so a waiter can tell this create's reply apart
        // from an older one
        self.session.lock().await.last_created = None;
        self.send_text("!CREATE").await;
    }

    pub async fn join(&self, id: &str) {
        self.send_text(&format!("!JOIN {}", id)).await;
    }

    pub async fn leave(&self, id: &str) {
        self.send_text(&format!("!LEAVE {}", id)).await;
    }

    pub async fn ping(&self) {
        self.send_text("!PING").await;
    }

    pub async fn who(&self) {
        self.send_text("!WHO").await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_reply_envelopes() {
        assert_eq!(
            classify_server_message("OK CREATED AB12CD34"),
            ServerEvent::Created { id: "AB12CD34".to_string() }
        );
        assert_eq!(
            classify_server_message("OK JOINED AB12CD34"),
            ServerEvent::Joined { id: "AB12CD34".to_string() }
        );
        assert_eq!(
            classify_server_message("OK LEFT AB12CD34"),
            ServerEvent::Left { id: "AB12CD34".to_string() }
        );
        assert_eq!(
            classify_server_message("OK WHO AB12CD34 3"),
            ServerEvent::Who { id: "AB12CD34".to_string(), count: 3 }
        );
        assert_eq!(classify_server_message("PONG 60"), ServerEvent::Pong { seconds: 60 });
    }

    #[test]
    fn classifies_errors_with_multiword_messages() {
        assert_eq!(
            classify_server_message("ERR BAD_CMD UnknownCommand"),
            ServerEvent::Error {
                code: "BAD_CMD".to_string(),
                message: "UnknownCommand".to_string(),
            }
        );
        assert_eq!(
            classify_server_message("ERR BAD_ARG Usage:!JOIN <GROUPID>"),
            ServerEvent::Error {
                code: "BAD_ARG".to_string(),
                message: "Usage:!JOIN <GROUPID>".to_string(),
            }
        );
    }

    #[test]
    fn everything_else_is_a_payload() {
        assert_eq!(classify_server_message("hello there"), ServerEvent::Payload);
        assert_eq!(classify_server_message("OK"), ServerEvent::Payload);
        assert_eq!(classify_server_message("OK WHO X notanumber"), ServerEvent::Payload);
        assert_eq!(classify_server_message("PONG sixty"), ServerEvent::Payload);
        assert_eq!(classify_server_message("ERR"), ServerEvent::Payload);
        assert_eq!(classify_server_message(""), ServerEvent::Payload);
    }

    #[test]
    fn session_tracks_next_ping_eta() {
        let mut session = Session::new();
        session.heartbeat = Duration::from_secs(60);
        session.last_send = Instant::now();
        let eta = session.next_ping_eta();
        assert!(eta <= Duration::from_secs(60));
        assert!(eta > Duration::from_secs(58));
    }
}
