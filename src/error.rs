//! # Top-Level Error Type
//!
//! Aggregates the module-level errors for callers that drive the server
//! as a whole (the binary, embedders). Pipeline code uses the specific
//! module errors directly.

use thiserror::Error;

use crate::band::BandError;
use crate::backend::application::BackendError;
use crate::backend::gateway::GatewayError;
use crate::downlink::DownlinkError;
use crate::lorawan::phy::FrameError;
use crate::maccommand::QueueError;
use crate::storage::cache::CacheError;
use crate::storage::session::SessionError;
use crate::uplink::UplinkError;

/// Any error the network server can surface.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("uplink error: {0}")]
    Uplink(#[from] UplinkError),
    #[error("downlink error: {0}")]
    Downlink(#[from] DownlinkError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("mac-command queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("band error: {0}")]
    Band(#[from] BandError),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("configuration error: {0}")]
    Config(String),
}
