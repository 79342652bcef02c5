mod network;

use clap::Parser;
use network::Client;
use shared::is_valid_group_id;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Relay host
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Relay port
    #[arg(short, long, default_value = "5000")]
    port: u16,
}

const HELP: &str = "Local helpers:
  create [--join]   create a group (optionally join it right away)
  join <id>         join a group by its 8-character ID
  leave <id>        leave a group
  who               show your current group and its peer count
  ping              heartbeat the relay now
  status            show session state
  quit/exit
  (lines that are none of the above are broadcast to your current group)";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let server = format!("{}:{}", args.host, args.port);

    println!("Connecting to relay at {} ...", server);
    let client = Client::new(&server).await?;
    println!("Type 'help' for commands. Lines that don't match a helper are sent as payloads.");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.eq_ignore_ascii_case("quit") || line.eq_ignore_ascii_case("exit") {
            break;
        }
        if line.eq_ignore_ascii_case("help") {
            println!("{}", HELP);
            continue;
        }
        if line.eq_ignore_ascii_case("status") {
            let session = client.session();
            let state = session.lock().await;
            println!(
                "[cli] server={} group={} last_created={} heartbeat={}s next_ping_eta={:.1}s",
                client.server_addr(),
                state.joined_group.as_deref().unwrap_or("<none>"),
                state.last_created.as_deref().unwrap_or("<none>"),
                state.heartbeat.as_secs(),
                state.next_ping_eta().as_secs_f64(),
            );
            continue;
        }

        // Raw protocol commands stay a relay-side concern
        if line.starts_with('!') {
            println!("[cli] error: direct '!' commands are not allowed; use the helpers");
            continue;
        }

        let mut parts = line.split_whitespace();
        let cmd = parts.next().unwrap_or("");
        let cmd_args: Vec<&str> = parts.collect();

        match cmd {
            "create" => {
                let auto_join = cmd_args.contains(&"--join");
                client.create().await;
                if auto_join {
                    match wait_for_created(&client).await {
                        Some(id) => client.join(&id).await,
                        None => println!("[cli] create timed out"),
                    }
                }
            }
            "join" | "leave" => match cmd_args.first() {
                Some(raw) => {
                    let id = raw.to_uppercase();
                    if !is_valid_group_id(&id) {
                        println!("[cli] error: group IDs are 8 characters A-Z/1-9 (no O, no 0)");
                        continue;
                    }
                    if cmd == "join" {
                        client.join(&id).await;
                    } else {
                        client.leave(&id).await;
                    }
                }
                None => println!("[cli] usage: {} <group_id>", cmd),
            },
            "who" => client.who().await,
            "ping" => client.ping().await,
            _ => {
                // Anything else is a payload for the current group
                let joined = client.session().lock().await.joined_group.is_some();
                if !joined {
                    println!("[cli] not joined; use 'join <group_id>' or 'create --join'");
                    continue;
                }
                client.send_text(line).await;
            }
        }
    }

    println!("Goodbye.");
    Ok(())
}

/// Polls briefly for the `OK CREATED` reply after a `create` so `--join`
/// can chain onto the fresh ID.
async fn wait_for_created(client: &Client) -> Option<String> {
    let session = client.session();
    for _ in 0..40 {
        sleep(Duration::from_millis(50)).await;
        if let Some(id) = session.lock().await.last_created.clone() {
            return Some(id);
        }
    }
    None
}
