use clap::Parser;
use log::{error, info};
use sync_server::network::Server;
use sync_shared::config::{DEFAULT_TICK_RATE, MAX_PLAYERS, SNAPSHOT_INTERVAL};
use sync_shared::SyncConfig;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server IP address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Server port to listen on
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Tick rate (updates per second)
    #[arg(short, long, default_value_t = DEFAULT_TICK_RATE)]
    tick_rate: u32,

    /// Maximum number of connected players
    #[arg(short, long, default_value_t = MAX_PLAYERS)]
    max_players: usize,

    /// Ticks between snapshot broadcasts
    #[arg(short, long, default_value_t = SNAPSHOT_INTERVAL)]
    snapshot_interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    let config = SyncConfig {
        max_players: args.max_players,
        snapshot_interval: args.snapshot_interval.max(1),
        ..SyncConfig::default()
    };

    info!(
        "Starting server: {} Hz, up to {} players, snapshot every {} ticks",
        args.tick_rate, config.max_players, config.snapshot_interval
    );

    let address = format!("{}:{}", args.host, args.port);
    let mut server = Server::new(&address, SyncConfig::tick_duration(args.tick_rate), config).await?;

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
