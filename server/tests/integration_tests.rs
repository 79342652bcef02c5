//! Integration tests for the group relay
//!
//! These tests validate cross-component interactions and real network
//! behavior: each one binds a relay on an ephemeral port, runs it as a
//! task and drives it with plain UDP sockets.

use server::network::Server;
use server::registry::RelayConfig;
use shared::{is_valid_group_id, MAX_DATAGRAM};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{sleep, timeout};

async fn start_relay(config: RelayConfig) -> SocketAddr {
    let mut relay = Server::new("127.0.0.1:0", config)
        .await
        .expect("Failed to bind relay");
    let addr = relay.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = relay.run().await;
    });
    addr
}

async fn peer() -> UdpSocket {
    UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind peer socket")
}

async fn recv_text(sock: &UdpSocket) -> String {
    let mut buf = [0u8; MAX_DATAGRAM + 1];
    let (len, _) = timeout(Duration::from_secs(1), sock.recv_from(&mut buf))
        .await
        .expect("Timed out waiting for a datagram")
        .expect("recv failed");
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

async fn request(sock: &UdpSocket, relay: SocketAddr, msg: &str) -> String {
    sock.send_to(msg.as_bytes(), relay).await.expect("send failed");
    recv_text(sock).await
}

/// Creates a group via `sock` and returns its ID.
async fn create_group(sock: &UdpSocket, relay: SocketAddr) -> String {
    let reply = request(sock, relay, "!CREATE").await;
    let id = reply
        .strip_prefix("OK CREATED ")
        .unwrap_or_else(|| panic!("unexpected create reply: {}", reply))
        .to_string();
    assert!(is_valid_group_id(&id), "malformed group id: {}", id);
    id
}

/// COMMAND PROTOCOL TESTS
mod command_tests {
    use super::*;

    #[tokio::test]
    async fn create_join_who_round_trip() {
        let relay = start_relay(RelayConfig::default()).await;
        let a = peer().await;

        let id = create_group(&a, relay).await;

        let reply = request(&a, relay, &format!("!JOIN {}", id)).await;
        assert_eq!(reply, format!("OK JOINED {}", id));

        let reply = request(&a, relay, "!WHO").await;
        assert_eq!(reply, format!("OK WHO {} 1", id));

        let reply = request(&a, relay, &format!("!LEAVE {}", id)).await;
        assert_eq!(reply, format!("OK LEFT {}", id));
    }

    #[tokio::test]
    async fn ping_and_malformed_commands() {
        let relay = start_relay(RelayConfig::default()).await;
        let a = peer().await;

        assert_eq!(request(&a, relay, "!PING").await, "PONG 60");
        assert_eq!(request(&a, relay, "!FOO").await, "ERR BAD_CMD UnknownCommand");
        assert_eq!(
            request(&a, relay, "!JOIN").await,
            "ERR BAD_ARG Usage:!JOIN <GROUPID>"
        );
    }

    #[tokio::test]
    async fn third_member_bounces_off_cap() {
        let relay = start_relay(RelayConfig {
            default_cap: Some(2),
            ..RelayConfig::default()
        })
        .await;
        let a = peer().await;
        let b = peer().await;
        let c = peer().await;

        let id = create_group(&a, relay).await;
        assert_eq!(
            request(&a, relay, &format!("!JOIN {}", id)).await,
            format!("OK JOINED {}", id)
        );
        assert_eq!(
            request(&b, relay, &format!("!JOIN {}", id)).await,
            format!("OK JOINED {}", id)
        );
        assert_eq!(request(&b, relay, "!WHO").await, format!("OK WHO {} 2", id));

        assert_eq!(
            request(&c, relay, &format!("!JOIN {}", id)).await,
            format!("ERR GROUP_FULL {}", id)
        );
    }

    #[tokio::test]
    async fn owner_limit_blocks_extra_groups() {
        let relay = start_relay(RelayConfig {
            max_groups_per_client: 3,
            ..RelayConfig::default()
        })
        .await;
        let a = peer().await;

        for _ in 0..3 {
            create_group(&a, relay).await;
        }
        assert_eq!(
            request(&a, relay, "!CREATE").await,
            "ERR OWNER_LIMIT TooManyGroups"
        );
    }
}

/// BROADCAST FAN-OUT TESTS
mod broadcast_tests {
    use super::*;

    #[tokio::test]
    async fn payload_is_relayed_verbatim_without_echo() {
        let relay = start_relay(RelayConfig::default()).await;
        let a = peer().await;
        let b = peer().await;

        let id = create_group(&a, relay).await;
        request(&a, relay, &format!("!JOIN {}", id)).await;
        request(&b, relay, &format!("!JOIN {}", id)).await;

        a.send_to(b"hello", relay).await.unwrap();
        assert_eq!(recv_text(&b).await, "hello");

        // The sender gets neither an echo nor a reply
        let mut buf = [0u8; 64];
        let echoed = timeout(Duration::from_millis(200), a.recv_from(&mut buf)).await;
        assert!(echoed.is_err(), "sender unexpectedly received a datagram");
    }

    #[tokio::test]
    async fn binary_payload_bytes_pass_through_unmodified() {
        let relay = start_relay(RelayConfig::default()).await;
        let a = peer().await;
        let b = peer().await;

        let id = create_group(&a, relay).await;
        request(&a, relay, &format!("!JOIN {}", id)).await;
        request(&b, relay, &format!("!JOIN {}", id)).await;

        let payload: Vec<u8> = (0u16..256).map(|b| b as u8).filter(|b| *b != b'!').collect();
        a.send_to(&payload, relay).await.unwrap();

        let mut buf = [0u8; MAX_DATAGRAM + 1];
        let (len, _) = timeout(Duration::from_secs(1), b.recv_from(&mut buf))
            .await
            .expect("timed out")
            .unwrap();
        assert_eq!(&buf[..len], payload.as_slice());
    }

    #[tokio::test]
    async fn payload_from_outsider_is_rejected() {
        let relay = start_relay(RelayConfig::default()).await;
        let a = peer().await;

        assert_eq!(
            request(&a, relay, "no group yet").await,
            "ERR NOT_IN_GROUP JoinFirstUseJOIN"
        );
    }

    #[tokio::test]
    async fn datagram_size_boundary() {
        let relay = start_relay(RelayConfig::default()).await;
        let a = peer().await;

        // Exactly at the cap: accepted and processed (sender has no group)
        let at_cap = vec![b'x'; MAX_DATAGRAM];
        a.send_to(&at_cap, relay).await.unwrap();
        assert_eq!(recv_text(&a).await, "ERR NOT_IN_GROUP JoinFirstUseJOIN");

        // One byte past the cap: rejected outright
        let over_cap = vec![b'x'; MAX_DATAGRAM + 1];
        a.send_to(&over_cap, relay).await.unwrap();
        assert_eq!(recv_text(&a).await, "ERR TOO_LARGE PayloadTooLarge");
    }
}

/// LIFECYCLE TESTS
///
/// These run the relay with sub-second intervals so eviction and expiry
/// are observable without minute-scale sleeps.
mod lifecycle_tests {
    use super::*;

    fn quick_config() -> RelayConfig {
        RelayConfig {
            heartbeat: Duration::from_millis(200),
            sweep_interval: Duration::from_millis(100),
            empty_ttl: Duration::from_millis(300),
            ..RelayConfig::default()
        }
    }

    #[tokio::test]
    async fn idle_client_is_evicted_and_empty_group_expires() {
        let relay = start_relay(quick_config()).await;
        let a = peer().await;
        let b = peer().await;

        let id = create_group(&a, relay).await;
        request(&a, relay, &format!("!JOIN {}", id)).await;
        request(&b, relay, &format!("!JOIN {}", id)).await;

        // B keeps pinging while A goes silent past 3 × heartbeat
        for _ in 0..7 {
            sleep(Duration::from_millis(150)).await;
            request(&b, relay, "!PING").await;
        }
        assert_eq!(request(&b, relay, "!WHO").await, format!("OK WHO {} 1", id));

        // B leaves; once the group has sat empty past the TTL it is gone
        assert_eq!(
            request(&b, relay, &format!("!LEAVE {}", id)).await,
            format!("OK LEFT {}", id)
        );
        sleep(Duration::from_millis(600)).await;
        assert_eq!(
            request(&b, relay, &format!("!JOIN {}", id)).await,
            format!("ERR NO_SUCH_GROUP {}", id)
        );
    }

    #[tokio::test]
    async fn heartbeats_keep_a_client_live() {
        let relay = start_relay(quick_config()).await;
        let a = peer().await;

        let id = create_group(&a, relay).await;
        request(&a, relay, &format!("!JOIN {}", id)).await;

        // Ping through several eviction horizons
        for _ in 0..8 {
            sleep(Duration::from_millis(150)).await;
            request(&a, relay, "!PING").await;
        }
        assert_eq!(request(&a, relay, "!WHO").await, format!("OK WHO {} 1", id));
    }
}
