use clap::Parser;
use log::info;
use std::time::Duration;
use sync_client::network::{Client, ClientOptions};
use sync_shared::config::DEFAULT_TICK_RATE;
use sync_shared::SyncConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server WebSocket URL to connect to
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Display name sent with the join
    #[arg(short, long, default_value = "Player")]
    name: String,

    /// Local tick rate (updates per second)
    #[arg(short, long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// Milliseconds between input samples
    #[arg(short = 'i', long, default_value = "50")]
    input_interval: u64,

    /// Reconnect attempts before giving up
    #[arg(short, long, default_value = "3")]
    reconnects: u32,

    /// Stop after this many seconds (runs until Ctrl+C if omitted)
    #[arg(short, long)]
    duration: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Starting client...");
    info!("Connecting to: {}", args.server);

    let options = ClientOptions {
        server_url: args.server,
        player_name: args.name,
        tick_duration: SyncConfig::tick_duration(args.tick_rate),
        command_interval: Duration::from_millis(args.input_interval.max(1)),
        max_reconnects: args.reconnects,
        run_for: args.duration.map(Duration::from_secs),
    };

    let mut client = Client::new(options, SyncConfig::default());

    tokio::select! {
        result = client.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
    }

    Ok(())
}
