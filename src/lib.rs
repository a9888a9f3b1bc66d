//! # lorans - A LoRaWAN 1.0 Class-A Network Server
//!
//! `lorans` sits between LoRa gateways and application back-ends and
//! operates the LoRaWAN MAC layer on behalf of many devices: it
//! authenticates uplinks, deduplicates the copies of a frame heard by
//! multiple gateways, maintains per-device sessions (keys, frame
//! counters, radio parameters), exchanges MAC-layer control commands and
//! schedules downlinks into the short Class-A receive windows.
//!
//! ## Architecture
//!
//! - [`lorawan`]: the frame codec: PHY payload parsing/serialization,
//!   MIC computation, payload encryption, MAC-command wire format.
//! - [`band`]: immutable regional parameters (channels, RX1/RX2 mappings,
//!   payload ceilings, delays).
//! - [`storage`]: the key-value cache contract and the node-session store.
//! - [`uplink`]: frame intake, gateway deduplication, the data path and
//!   the OTAA join handshake.
//! - [`maccommand`]: the per-device command queue and inbound dispatch.
//! - [`downlink`]: receive-window downlink assembly and scheduling.
//! - [`backend`]: contracts of the external collaborators (gateway
//!   transport, application server, network controller) plus in-process
//!   mocks.
//! - [`server`]: wiring and the inbound fan-out loop.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lorans::backend::gateway::ChannelGateway;
//! use lorans::backend::mock::{MockApplicationServer, MockNetworkController};
//! use lorans::config::ServerConfig;
//! use lorans::server::{Context, NetworkServer};
//! use lorans::storage::MemoryCache;
//! use lorans::{band, logging};
//!
//! #[tokio::main]
//! async fn main() {
//!     logging::init_logger();
//!
//!     let config = ServerConfig::default();
//!     let (gateway, _downlinks) = ChannelGateway::new();
//!     let ctx = Arc::new(Context {
//!         cache: Arc::new(MemoryCache::new()),
//!         gateway: Arc::new(gateway),
//!         application: Arc::new(MockApplicationServer::new()),
//!         controller: Arc::new(MockNetworkController::new()),
//!         band: band::by_name(&config.band).unwrap(),
//!         net_id: config.net_id,
//!         config,
//!     });
//!
//!     let (_events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
//!     NetworkServer::new(ctx).run(events_rx).await;
//! }
//! ```

pub mod backend;
pub mod band;
pub mod config;
pub mod downlink;
pub mod error;
pub mod logging;
pub mod lorawan;
pub mod maccommand;
pub mod server;
pub mod storage;
pub mod uplink;

pub use config::{ServerConfig, ServerConfigBuilder};
pub use error::ServerError;
pub use logging::init_logger;
pub use server::{Context, NetworkServer};
