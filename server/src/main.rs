use clap::Parser;
use log::info;
use server::network::{Server, ServerMessage};
use server::registry::RelayConfig;
use std::time::Duration;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Bind port
    #[arg(long, default_value = "5000")]
    port: u16,

    /// Seconds an empty group survives before it is reaped
    #[arg(long = "empty-ttl", default_value = "300")]
    empty_ttl: u64,

    /// Sweep interval in seconds
    #[arg(long = "sweep", default_value = "30")]
    sweep: u64,

    /// Advertised heartbeat interval in seconds; clients idle for three
    /// times this are evicted
    #[arg(long = "heartbeat", default_value = "60")]
    heartbeat: u64,

    /// Default per-group member cap (0 = unlimited)
    #[arg(long, default_value = "128")]
    cap: usize,

    /// Maximum live groups a single client may own
    #[arg(long = "max-groups-per-client", default_value = "3")]
    max_groups_per_client: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Warning: RUST_LOG environment variable not set. Set it to display logs!");
        eprintln!("Recommended: RUST_LOG=info cargo run");
    }

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);
    let config = RelayConfig {
        heartbeat: Duration::from_secs(args.heartbeat),
        sweep_interval: Duration::from_secs(args.sweep),
        empty_ttl: Duration::from_secs(args.empty_ttl),
        default_cap: if args.cap == 0 { None } else { Some(args.cap) },
        max_groups_per_client: args.max_groups_per_client,
    };

    info!("Starting group relay on {}", addr);

    let mut server = Server::new(&addr, config).await?;

    // Translate Ctrl-C into a cooperative shutdown of the run loop
    let shutdown = server.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown.send(ServerMessage::Shutdown);
        }
    });

    server.run().await
}
