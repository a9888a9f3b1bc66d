//! # Server Assembly
//!
//! [`Context`] bundles the shared collaborators every pipeline step needs
//! (cache, backends, band plan, configuration); [`NetworkServer`] drives
//! the inbound loop, spawning one task per gateway frame. A bad frame
//! never takes the server down: per-frame failures are logged and the
//! frame is dropped.

use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::backend::application::ApplicationServer;
use crate::backend::controller::NetworkController;
use crate::backend::gateway::{Gateway, GatewayEvent};
use crate::band::Band;
use crate::config::ServerConfig;
use crate::logging::LogThrottle;
use crate::lorawan::NetId;
use crate::storage::cache::Cache;
use crate::uplink;

/// Shared state and collaborators of one server instance.
pub struct Context {
    pub cache: Arc<dyn Cache>,
    pub gateway: Arc<dyn Gateway>,
    pub application: Arc<dyn ApplicationServer>,
    pub controller: Arc<dyn NetworkController>,
    pub band: &'static Band,
    pub net_id: NetId,
    pub config: ServerConfig,
}

/// The network server: consumes gateway events and runs the uplink
/// pipeline.
pub struct NetworkServer {
    ctx: Arc<Context>,
}

impl NetworkServer {
    pub fn new(ctx: Arc<Context>) -> Self {
        NetworkServer { ctx }
    }

    pub fn context(&self) -> Arc<Context> {
        Arc::clone(&self.ctx)
    }

    /// Consume gateway events until the channel closes. Each received
    /// frame is handled on its own task so a slow collection window never
    /// blocks the intake.
    pub async fn run(&self, mut events: mpsc::UnboundedReceiver<GatewayEvent>) {
        log::info!(
            "network server started: net_id={}, band={}",
            self.ctx.net_id,
            self.ctx.band.name
        );

        // a misbehaving device or gateway produces one error per frame;
        // keep those from flooding the log
        let rx_error_throttle = Arc::new(Mutex::new(LogThrottle::new(1000, 10)));

        while let Some(event) = events.recv().await {
            match event {
                GatewayEvent::Rx(rx_packet) => {
                    let ctx = Arc::clone(&self.ctx);
                    let throttle = Arc::clone(&rx_error_throttle);
                    tokio::spawn(async move {
                        if let Err(e) = uplink::handle_rx_packet(&ctx, rx_packet).await {
                            let allow = throttle.lock().map(|mut t| t.allow()).unwrap_or(true);
                            if allow {
                                log::error!("processing rx packet error: {e}");
                            }
                        }
                    });
                }
                GatewayEvent::Stats(stats) => {
                    log::info!(
                        "gateway stats: mac={}, received={}, ok={}",
                        stats.mac,
                        stats.rx_packets_received,
                        stats.rx_packets_received_ok
                    );
                }
            }
        }

        log::info!("gateway event channel closed, server stopping");
    }
}
