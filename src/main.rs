use std::sync::Arc;

use clap::{Parser, Subcommand};

use lorans::backend::gateway::ChannelGateway;
use lorans::backend::mock::{MockApplicationServer, MockNetworkController};
use lorans::config::ServerConfig;
use lorans::lorawan::PhyPayload;
use lorans::server::{Context, NetworkServer};
use lorans::storage::MemoryCache;
use lorans::{band, init_logger, ServerError};

#[derive(Parser)]
#[command(name = "lorans")]
#[command(about = "LoRaWAN Class-A network server")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the server with in-process backends. Real deployments embed
    /// the library and wire their own gateway/application adapters.
    Run {
        /// Path to a JSON configuration file.
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Parse a hex-encoded PHY payload and print its structure.
    ParseFrame { hex: String },
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    init_logger();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { config } => {
            let config = match config {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .map_err(|e| ServerError::Config(format!("read {path}: {e}")))?;
                    serde_json::from_str::<ServerConfig>(&raw)
                        .map_err(|e| ServerError::Config(format!("parse {path}: {e}")))?
                }
                None => ServerConfig::default(),
            };
            let band = band::by_name(&config.band)?;

            let (gateway, mut downlinks) = ChannelGateway::new();
            let ctx = Arc::new(Context {
                cache: Arc::new(MemoryCache::new()),
                gateway: Arc::new(gateway),
                application: Arc::new(MockApplicationServer::new()),
                controller: Arc::new(MockNetworkController::new()),
                band,
                net_id: config.net_id,
                config,
            });

            tokio::spawn(async move {
                while let Some(packet) = downlinks.recv().await {
                    log::info!(
                        "downlink for gateway {}: timestamp={}, frequency={}, size={}",
                        packet.tx_info.mac,
                        packet.tx_info.timestamp,
                        packet.tx_info.frequency,
                        packet.phy_payload.len()
                    );
                }
            });

            let (_events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
            let server = NetworkServer::new(ctx);
            tokio::select! {
                _ = server.run(events_rx) => {}
                _ = tokio::signal::ctrl_c() => {
                    log::info!("interrupt received, shutting down");
                }
            }
            Ok(())
        }
        Commands::ParseFrame { hex } => {
            let raw = hex::decode(hex.trim())
                .map_err(|e| ServerError::Config(format!("invalid hex: {e}")))?;
            let phy = PhyPayload::parse(&raw)?;
            println!("{phy:#?}");
            Ok(())
        }
    }
}
