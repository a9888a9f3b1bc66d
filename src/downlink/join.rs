//! # Join-Accept Scheduling
//!
//! The JoinAccept uses its own, longer receive delays (JoinAcceptDelay1/2)
//! and is transmitted verbatim: the application server authenticated the
//! join and produced the (AppKey-encrypted) frame, the network server only
//! times and routes it.

use crate::backend::gateway::{TxInfo, TxPacket};
use crate::server::Context;
use crate::storage::session::{NodeSession, RxWindow};
use crate::uplink::collect::CollectedPacket;

use super::data::DownlinkError;

/// Schedule the JoinAccept on the gateway that heard the join-request
/// best, in the session's configured receive window.
pub async fn send_join_accept_response(
    ctx: &Context,
    ns: &NodeSession,
    collected: &CollectedPacket,
    phy_payload: Vec<u8>,
) -> Result<(), DownlinkError> {
    let rx_info = collected
        .rx_info_set
        .first()
        .ok_or(DownlinkError::NoLastRxInfoSet)?;

    let tx_info = match ns.rx_window {
        RxWindow::Rx1 => TxInfo {
            mac: rx_info.mac,
            immediately: false,
            timestamp: rx_info
                .timestamp
                .wrapping_add(ctx.band.join_accept_delay1.as_micros() as u32),
            frequency: ctx.band.rx1_frequency(rx_info.frequency)?,
            power: ctx.band.default_tx_power,
            data_rate: {
                let uplink_dr = ctx.band.get_data_rate(&rx_info.data_rate)?;
                *ctx.band
                    .data_rate(ctx.band.rx1_data_rate(uplink_dr, 0)?)?
            },
            code_rate: rx_info.code_rate.clone(),
        },
        RxWindow::Rx2 => TxInfo {
            mac: rx_info.mac,
            immediately: false,
            timestamp: rx_info
                .timestamp
                .wrapping_add(ctx.band.join_accept_delay2.as_micros() as u32),
            frequency: ctx.band.rx2_frequency,
            power: ctx.band.default_tx_power,
            data_rate: *ctx.band.data_rate(ctx.band.rx2_data_rate)?,
            code_rate: "4/5".to_string(),
        },
    };

    log::info!(
        "scheduling join-accept: dev_eui={}, dev_addr={}, gw_mac={}, timestamp={}",
        ns.dev_eui,
        ns.dev_addr,
        tx_info.mac,
        tx_info.timestamp
    );

    ctx.gateway
        .send_tx_packet(TxPacket {
            tx_info,
            phy_payload,
        })
        .await?;
    Ok(())
}
