//! # Uplink Pipeline
//!
//! Entry point for every frame delivered by the gateway transport:
//! parse, dispatch by message type, deduplicate across gateways, then run
//! the data path or the join handshake exactly once per unique frame.

pub mod collect;
pub mod data;
pub mod join;

pub use collect::{collect_and_call_once, CollectedPacket};

use thiserror::Error;

use crate::backend::application::BackendError;
use crate::backend::gateway::RxPacket;
use crate::downlink::DownlinkError;
use crate::lorawan::phy::FrameError;
use crate::lorawan::{MType, PhyPayload};
use crate::maccommand::QueueError;
use crate::server::Context;
use crate::storage::session::SessionError;

/// Errors for uplink processing.
#[derive(Error, Debug)]
pub enum UplinkError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("unexpected mtype: {0:?}")]
    UnexpectedMType(MType),
    #[error("collect error: {0}")]
    Collect(#[from] collect::CollectError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("mac-command queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("downlink error: {0}")]
    Downlink(#[from] DownlinkError),
    #[error("application-server error: {0}")]
    Application(BackendError),
}

/// Handle one frame from a gateway: parse and dispatch by message type.
///
/// A frame that does not parse is dropped here with an error; it never
/// reaches the deduplicator.
pub async fn handle_rx_packet(ctx: &Context, rx_packet: RxPacket) -> Result<(), UplinkError> {
    crate::logging::log_frame_hex("rx packet received", &rx_packet.phy_payload);
    let phy = PhyPayload::parse(&rx_packet.phy_payload)?;

    log::debug!(
        "rx packet parsed: gw_mac={}, mtype={:?}, size={}",
        rx_packet.rx_info.mac,
        phy.mhdr.mtype,
        rx_packet.phy_payload.len()
    );

    match phy.mhdr.mtype {
        MType::JoinRequest => join::collect_join_request(ctx, rx_packet).await,
        MType::UnconfirmedDataUp | MType::ConfirmedDataUp => {
            data::collect_data_up(ctx, rx_packet).await
        }
        other => Err(UplinkError::UnexpectedMType(other)),
    }
}
