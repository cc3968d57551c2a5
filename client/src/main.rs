use clap::Parser;
use client::network::Client;
use log::info;
use shared::{AfkActions, PlayerId, Scheduler};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Authoritative node address to synchronize with
    #[arg(short = 's', long, default_value = "127.0.0.1:8080")]
    server: String,

    /// Seconds between cache refresh polls
    #[arg(short = 'p', long, default_value = "30")]
    poll_interval: u64,

    /// Seconds of inactivity before a player is considered AFK
    #[arg(short = 'a', long, default_value = "300")]
    afk_threshold: u64,
}

/// Platform adapter for this node. A real deployment forwards these calls
/// into the host's player handling; the standalone binary just logs them.
struct LoggingAfkActions;

impl AfkActions for LoggingAfkActions {
    fn execute_player_afk(&self, player: PlayerId, idle_seconds: u64) {
        info!("Player {} went AFK ({}s idle)", player, idle_seconds);
    }

    fn execute_player_resume(&self, player: PlayerId) {
        info!("Player {} resumed", player);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting dependent node...");
    info!("Authoritative node: {}", args.server);
    info!("Poll interval: {}s", args.poll_interval);
    info!("AFK threshold: {}s", args.afk_threshold);

    let mut client = Client::new(
        &args.server,
        Arc::new(LoggingAfkActions),
        Scheduler::new(),
        Duration::from_secs(args.poll_interval),
        args.afk_threshold,
    )
    .await?;

    client.run().await?;

    Ok(())
}
