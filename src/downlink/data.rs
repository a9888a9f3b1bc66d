//! # Data Downlink Scheduling
//!
//! Builds and transmits Class-A data downlinks. Two entry points:
//!
//! - [`send_uplink_response`] runs synchronously at the tail of the
//!   uplink pipeline and produces a downlink only when something warrants
//!   one: queued application data, pending MAC commands, an ACK owed to a
//!   confirmed uplink, or an ADRACKReq to answer.
//! - [`push_data_down`] serves unsolicited pushes. A Class-A device only
//!   listens right after its own uplinks, so the push targets the RX2
//!   parameters of the gateway that heard the device last.
//!
//! Framing rule: MAC commands ride in FOpts (≤ 15 bytes, plaintext) when
//! application data is present or the queue head is not marked for
//! FRMPayload; otherwise they are encrypted into an FPort-0 FRMPayload.
//! Application data always wins the FRMPayload.

use thiserror::Error;
use tokio::time::timeout;

use crate::backend::application::{ErrorType, GetDataDownRequest, GetDataDownResponse};
use crate::backend::controller::ControllerErrorRequest;
use crate::backend::gateway::{GatewayError, RxInfo, TxInfo, TxPacket};
use crate::band::BandError;
use crate::lorawan::maccommands::{self, MacCommand};
use crate::lorawan::phy::FrameError;
use crate::lorawan::{Direction, FCtrl, Fhdr, MType, MacPayload, Mhdr, Payload, PhyPayload};
use crate::maccommand::queue::{self, QueueError, QueueItem};
use crate::server::Context;
use crate::storage::session::{self, NodeSession, RxWindow, SessionError};
use crate::uplink::collect::CollectedPacket;

/// gRPC-style status code a downlink error maps to when the downlink was
/// API-initiated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcCode {
    InvalidArgument,
    FailedPrecondition,
    Internal,
    Unknown,
}

/// Errors for downlink assembly and transmission.
#[derive(Error, Debug)]
pub enum DownlinkError {
    #[error("FPort must not be 0 when data is present")]
    FPortMustNotBeZero,
    #[error("FPort must be 0 when mac-commands are encrypted")]
    FPortMustBeZero,
    #[error("no last RX-info set available, the device has not been heard yet")]
    NoLastRxInfoSet,
    #[error("invalid data-rate: {0}")]
    InvalidDataRate(#[from] BandError),
    #[error("maximum payload size exceeded: {size} > {max}")]
    MaxPayloadSizeExceeded { size: usize, max: usize },
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("mac-command queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),
}

impl DownlinkError {
    /// The RPC status code for API-initiated pushes.
    pub fn rpc_code(&self) -> RpcCode {
        match self {
            DownlinkError::FPortMustNotBeZero
            | DownlinkError::FPortMustBeZero
            | DownlinkError::MaxPayloadSizeExceeded { .. } => RpcCode::InvalidArgument,
            DownlinkError::NoLastRxInfoSet => RpcCode::FailedPrecondition,
            DownlinkError::InvalidDataRate(_) => RpcCode::Internal,
            _ => RpcCode::Unknown,
        }
    }
}

/// Everything that goes into one data downlink frame.
#[derive(Debug, Clone, Default)]
struct DownlinkFrame {
    /// Acknowledge a confirmed uplink.
    ack: bool,
    /// FPort; must be non-zero when `data` is set.
    f_port: u8,
    /// Application payload (already encrypted by the application server).
    data: Vec<u8>,
    confirmed: bool,
    /// More application data or MAC commands are waiting.
    more_data: bool,
    mac_commands: Vec<MacCommand>,
    /// Encrypt the MAC commands into an FPort-0 FRMPayload instead of
    /// FOpts.
    encrypt_mac_commands: bool,
}

impl DownlinkFrame {
    fn validate(&self) -> Result<(), DownlinkError> {
        if self.f_port == 0 && !self.data.is_empty() {
            return Err(DownlinkError::FPortMustNotBeZero);
        }
        if self.f_port > 0 && self.encrypt_mac_commands {
            return Err(DownlinkError::FPortMustBeZero);
        }
        Ok(())
    }
}

/// Respond to an uplink within its receive window, if anything warrants a
/// response.
pub async fn send_uplink_response(
    ctx: &Context,
    ns: &mut NodeSession,
    collected: &CollectedPacket,
    uplink_phy: &PhyPayload,
) -> Result<(), DownlinkError> {
    let uplink_mac = uplink_phy.mac_payload()?;
    let rx_info = collected
        .rx_info_set
        .first()
        .ok_or(DownlinkError::NoLastRxInfoSet)?;

    let (tx_info, dr) = data_down_tx_info(ctx, ns, rx_info)?;

    let mut remaining = ctx.band.max_payload_size(dr)?;
    let mut allow_encrypted = true;

    let tx_payload = get_data_down_from_application(ctx, ns, dr).await;
    if let Some(p) = &tx_payload {
        remaining -= p.data.len();
        allow_encrypted = false;
    }

    let (queue_items, encrypted, pending) =
        get_and_filter_queue_items(ctx, ns, allow_encrypted, remaining).await?;
    let mac_commands = queue_items_to_mac_commands(ctx, ns, &queue_items).await;

    let mut frame = DownlinkFrame {
        ack: uplink_phy.mhdr.mtype == MType::ConfirmedDataUp,
        mac_commands,
        ..Default::default()
    };
    if let Some(p) = &tx_payload {
        frame.confirmed = p.confirmed;
        frame.more_data = p.more_data;
        frame.f_port = p.f_port;
        frame.data = p.data.clone();
    }
    if pending {
        frame.more_data = true;
    }
    if allow_encrypted && encrypted {
        frame.encrypt_mac_commands = true;
    }

    // an unconfirmed uplink with nothing queued needs no response, unless
    // the device asked for an ADR acknowledgement
    if tx_payload.is_none()
        && !frame.ack
        && frame.mac_commands.is_empty()
        && !uplink_mac.fhdr.f_ctrl.adr_ack_req
    {
        return Ok(());
    }

    send_data_down(ctx, ns, tx_info, frame).await?;

    for item in &queue_items {
        queue::delete_item(ctx.cache.as_ref(), ns.dev_eui, item).await?;
    }
    Ok(())
}

/// Push an unsolicited downlink over the RX2 parameters of the last-heard
/// gateway.
pub async fn push_data_down(
    ctx: &Context,
    ns: &mut NodeSession,
    confirmed: bool,
    f_port: u8,
    data: Vec<u8>,
) -> Result<(), DownlinkError> {
    let rx_info = ns
        .last_rx_info_set
        .first()
        .cloned()
        .ok_or(DownlinkError::NoLastRxInfoSet)?;

    let dr = ns.rx2_dr;
    let max = ctx.band.max_payload_size(dr)?;
    if data.len() > max {
        return Err(DownlinkError::MaxPayloadSizeExceeded {
            size: data.len(),
            max,
        });
    }
    let remaining = max - data.len();

    let (queue_items, _, pending) = get_and_filter_queue_items(ctx, ns, false, remaining).await?;
    let mac_commands = queue_items_to_mac_commands(ctx, ns, &queue_items).await;

    let tx_info = TxInfo {
        mac: rx_info.mac,
        immediately: true,
        timestamp: 0,
        frequency: ctx.band.rx2_frequency,
        power: ctx.band.default_tx_power,
        data_rate: *ctx.band.data_rate(dr)?,
        code_rate: "4/5".to_string(),
    };

    let frame = DownlinkFrame {
        f_port,
        data,
        confirmed,
        more_data: pending,
        mac_commands,
        ..Default::default()
    };

    send_data_down(ctx, ns, tx_info, frame).await?;

    for item in &queue_items {
        queue::delete_item(ctx.cache.as_ref(), ns.dev_eui, item).await?;
    }
    Ok(())
}

/// Assemble, sign and transmit one downlink frame. Advances and persists
/// FCntDown for unconfirmed frames; confirmed frames advance it only when
/// the device acknowledges (handled on the next uplink).
async fn send_data_down(
    ctx: &Context,
    ns: &mut NodeSession,
    tx_info: TxInfo,
    frame: DownlinkFrame,
) -> Result<(), DownlinkError> {
    frame.validate()?;

    let mtype = if frame.confirmed {
        MType::ConfirmedDataDown
    } else {
        MType::UnconfirmedDataDown
    };

    let mut f_opts = Vec::new();
    let mut f_port = None;
    let mut frm_payload = Vec::new();

    if !frame.mac_commands.is_empty() {
        let mut encoded = Vec::new();
        for command in &frame.mac_commands {
            command.encode(&mut encoded);
        }
        if frame.encrypt_mac_commands {
            f_port = Some(0);
            frm_payload = encoded;
        } else {
            f_opts = encoded;
        }
    }
    if frame.f_port > 0 {
        f_port = Some(frame.f_port);
        frm_payload = frame.data.clone();
    }

    let mut phy = PhyPayload {
        mhdr: Mhdr::new(mtype),
        payload: Payload::Mac(MacPayload {
            fhdr: Fhdr {
                dev_addr: ns.dev_addr,
                f_ctrl: FCtrl {
                    adr: ns.adr_interval != 0,
                    adr_ack_req: false,
                    ack: frame.ack,
                    f_pending: frame.more_data,
                },
                f_cnt: ns.f_cnt_down,
                f_opts,
            },
            f_port,
            frm_payload,
        }),
        mic: [0; 4],
    };

    if frame.encrypt_mac_commands {
        phy.encrypt_frm_payload(&ns.nwk_s_key)?;
    }
    phy.set_mic(&ns.nwk_s_key)?;

    let phy_payload = phy.serialize()?;
    log::info!(
        "scheduling downlink: dev_eui={}, mtype={:?}, fcnt_down={}, ack={}, mac_commands={}, data_len={}",
        ns.dev_eui,
        mtype,
        ns.f_cnt_down,
        frame.ack,
        frame.mac_commands.len(),
        frame.data.len()
    );

    ctx.gateway
        .send_tx_packet(TxPacket {
            tx_info,
            phy_payload,
        })
        .await?;

    if !frame.confirmed {
        ns.f_cnt_down += 1;
        session::save_node_session(ctx.cache.as_ref(), ns, ctx.config.session_ttl()).await?;
    }
    Ok(())
}

/// TX parameters and data-rate index for the session's receive window.
fn data_down_tx_info(
    ctx: &Context,
    ns: &NodeSession,
    rx_info: &RxInfo,
) -> Result<(TxInfo, u8), DownlinkError> {
    let rx_delay = if ns.rx_delay > 0 {
        std::time::Duration::from_secs(ns.rx_delay as u64)
    } else {
        ctx.band.receive_delay1
    };

    let (dr, frequency, delay) = match ns.rx_window {
        RxWindow::Rx1 => {
            let uplink_dr = ctx.band.get_data_rate(&rx_info.data_rate)?;
            let dr = ctx.band.rx1_data_rate(uplink_dr, ns.rx1_dr_offset)?;
            let frequency = ctx.band.rx1_frequency(rx_info.frequency)?;
            (dr, frequency, rx_delay)
        }
        RxWindow::Rx2 => {
            // RX2 opens one second after RX1
            let dr = ns.rx2_dr;
            ctx.band.data_rate(dr)?;
            (
                dr,
                ctx.band.rx2_frequency,
                rx_delay + std::time::Duration::from_secs(1),
            )
        }
    };

    Ok((
        TxInfo {
            mac: rx_info.mac,
            immediately: false,
            timestamp: rx_info.timestamp.wrapping_add(delay.as_micros() as u32),
            frequency,
            power: ctx.band.default_tx_power,
            data_rate: *ctx.band.data_rate(dr)?,
            code_rate: rx_info.code_rate.clone(),
        },
        dr,
    ))
}

/// Poll the application server's downlink queue under a deadline. Any
/// failure degrades to "nothing queued": the downlink can still carry an
/// ACK or MAC commands.
async fn get_data_down_from_application(
    ctx: &Context,
    ns: &NodeSession,
    dr: u8,
) -> Option<GetDataDownResponse> {
    let max_payload_size = ctx.band.max_payload_size(dr).ok()?;
    let req = GetDataDownRequest {
        app_eui: ns.app_eui,
        dev_eui: ns.dev_eui,
        max_payload_size,
        f_cnt: ns.f_cnt_down,
    };

    let resp = match timeout(
        ctx.config.data_down_timeout(),
        ctx.application.get_data_down(req),
    )
    .await
    {
        Ok(Ok(resp)) => resp?,
        Ok(Err(e)) => {
            log::error!(
                "get data down from application error: dev_eui={}, fcnt={}, error={e}",
                ns.dev_eui,
                ns.f_cnt_down
            );
            return None;
        }
        Err(_) => {
            log::error!(
                "get data down from application deadline exceeded: dev_eui={}",
                ns.dev_eui
            );
            return None;
        }
    };

    if resp.f_port == 0 {
        return None;
    }
    if resp.data.len() > max_payload_size {
        log::warn!(
            "data down from application exceeds max payload size: dev_eui={}, size={}, max={max_payload_size}, dr={dr}",
            ns.dev_eui,
            resp.data.len()
        );
        return None;
    }

    log::info!(
        "received data down from application: dev_eui={}, fcnt={}, confirmed={}, more_data={}",
        ns.dev_eui,
        ns.f_cnt_down,
        resp.confirmed,
        resp.more_data
    );
    Some(resp)
}

/// Read the MAC queue and select what fits this downlink.
///
/// Returns the selected items, whether they must be encrypted into the
/// FRMPayload, and whether unselected items remain queued (sets the
/// frame-pending bit).
async fn get_and_filter_queue_items(
    ctx: &Context,
    ns: &NodeSession,
    allow_encrypted: bool,
    remaining_payload_size: usize,
) -> Result<(Vec<QueueItem>, bool, bool), DownlinkError> {
    let items = queue::read_queue(ctx.cache.as_ref(), ns.dev_eui).await?;
    if items.is_empty() {
        return Ok((Vec::new(), false, false));
    }
    let total = items.len();

    let (selected, encrypted) = if allow_encrypted && items[0].frm_payload {
        (queue::filter_items(items, true, remaining_payload_size), true)
    } else {
        let budget = remaining_payload_size.min(crate::lorawan::phy::MAX_FOPTS_LEN);
        (queue::filter_items(items, false, budget), false)
    };

    let pending = selected.len() != total;
    Ok((selected, encrypted, pending))
}

/// Decode queued items into commands. Items that fail to decode are
/// dropped from the frame (and the queue) and reported to the network
/// controller.
async fn queue_items_to_mac_commands(
    ctx: &Context,
    ns: &NodeSession,
    items: &[QueueItem],
) -> Vec<MacCommand> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match maccommands::decode_commands(Direction::Downlink, &item.data) {
            Ok(mut commands) if !commands.is_empty() => out.append(&mut commands),
            _ => {
                let error = format!(
                    "unmarshal mac command error (command: {})",
                    hex::encode(&item.data)
                );
                log::warn!("dev_eui={}, {error}", ns.dev_eui);
                if let Err(e) = ctx
                    .controller
                    .handle_error(ControllerErrorRequest {
                        app_eui: ns.app_eui,
                        dev_eui: ns.dev_eui,
                        error,
                    })
                    .await
                {
                    log::error!("notify network-controller error: {e}");
                }
            }
        }
    }
    out
}

/// Report a downlink error to the application server.
pub async fn notify_data_down_error(ctx: &Context, ns: &NodeSession, error: &DownlinkError) {
    let req = crate::backend::application::HandleErrorRequest {
        app_eui: ns.app_eui,
        dev_eui: ns.dev_eui,
        error_type: ErrorType::DataDown,
        error: error.to_string(),
    };
    if let Err(e) = ctx.application.handle_error(req).await {
        log::error!("notify application-server error: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_validation() {
        let frame = DownlinkFrame {
            f_port: 0,
            data: vec![1],
            ..Default::default()
        };
        assert!(matches!(
            frame.validate(),
            Err(DownlinkError::FPortMustNotBeZero)
        ));

        let frame = DownlinkFrame {
            f_port: 1,
            encrypt_mac_commands: true,
            ..Default::default()
        };
        assert!(matches!(frame.validate(), Err(DownlinkError::FPortMustBeZero)));

        let frame = DownlinkFrame {
            f_port: 1,
            data: vec![1],
            ..Default::default()
        };
        assert!(frame.validate().is_ok());
    }

    #[test]
    fn test_rpc_code_mapping() {
        assert_eq!(
            DownlinkError::FPortMustNotBeZero.rpc_code(),
            RpcCode::InvalidArgument
        );
        assert_eq!(
            DownlinkError::NoLastRxInfoSet.rpc_code(),
            RpcCode::FailedPrecondition
        );
        assert_eq!(
            DownlinkError::InvalidDataRate(BandError::InvalidDataRate(99)).rpc_code(),
            RpcCode::Internal
        );
        assert_eq!(
            DownlinkError::MaxPayloadSizeExceeded { size: 300, max: 51 }.rpc_code(),
            RpcCode::InvalidArgument
        );
    }
}
