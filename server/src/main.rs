use clap::Parser;
use log::info;
use server::accumulator::{AccumulatorAfkActions, SessionAccumulator};
use server::network::Server;
use server::provider::{FileProvider, PersistenceProvider};
use server::store::TimeStore;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind the node's UDP socket to
    #[arg(short = 'H', long, default_value = "127.0.0.1:8080")]
    host: String,

    /// Path of the durable time data file
    #[arg(short = 'd', long, default_value = "playtime.dat")]
    data_file: String,

    /// Seconds between periodic safety flushes of open sessions
    #[arg(short = 'f', long, default_value = "300")]
    flush_interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting authoritative node...");
    info!("Data file: {}", args.data_file);
    info!("Flush interval: {}s", args.flush_interval);

    let provider = Arc::new(FileProvider::open(&args.data_file)?);
    let store = Arc::new(TimeStore::new(provider as Arc<dyn PersistenceProvider>));
    let accumulator = Arc::new(SessionAccumulator::new(store));
    let afk_actions = Arc::new(AccumulatorAfkActions::new(Arc::clone(&accumulator)));

    let mut server = Server::new(
        &args.host,
        accumulator,
        afk_actions,
        Duration::from_secs(args.flush_interval),
    )
    .await?;

    // Connect/disconnect events arrive through the host hooks
    // (Server::handle_connect / handle_disconnect); the loop below serves
    // dependent nodes and flushes until shutdown.
    server.run().await?;

    Ok(())
}
