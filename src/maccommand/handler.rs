//! # Inbound MAC-Command Dispatch
//!
//! Every MAC command carried by an uplink (FOpts or an FPort-0
//! FRMPayload) runs through [`handle_uplink_mac_commands`]. Commands the
//! server can act on are consumed here: answers are correlated with the
//! pending request for their CID and committed into the session, and
//! LinkCheckReq gets an immediate answer queued. Everything else is
//! forwarded to the network controller untouched.
//!
//! A command that fails to decode is skipped and reported; it never
//! aborts the uplink.

use crate::backend::controller::{ControllerErrorRequest, HandleDataUpMacCommandRequest};
use crate::backend::gateway::RxInfo;
use crate::band::Modulation;
use crate::lorawan::maccommands::{self, MacCommand};
use crate::lorawan::Direction;
use crate::server::Context;
use crate::storage::session::NodeSession;

use super::queue::{self, QueueError, QueueItem};

/// Required demodulation SNR in dB per LoRa spreading factor, used for
/// the LinkCheckAns margin.
fn demodulation_floor(spread_factor: u8) -> f64 {
    match spread_factor {
        7 => -7.5,
        8 => -10.0,
        9 => -12.5,
        10 => -15.0,
        11 => -17.5,
        12 => -20.0,
        _ => -10.0,
    }
}

/// Process the MAC commands of one uplink. `frm_payload` records where
/// they rode (FOpts vs. encrypted FPort-0 payload) for controller
/// forwarding. Session mutations (committed RX parameters) land in `ns`;
/// the caller persists the session afterwards.
pub async fn handle_uplink_mac_commands(
    ctx: &Context,
    ns: &mut NodeSession,
    frm_payload: bool,
    raw: &[u8],
    rx_info_set: &[RxInfo],
) -> Result<(), QueueError> {
    let commands = match maccommands::decode_commands(Direction::Uplink, raw) {
        Ok(commands) => commands,
        Err(e) => {
            // skip the undecodable remainder, tell the controller
            log::warn!(
                "decode mac-commands error: dev_eui={}, data={}, error={e}",
                ns.dev_eui,
                hex::encode(raw)
            );
            notify_controller_error(ctx, ns, &format!("decode mac-commands error: {e}")).await;
            return Ok(());
        }
    };

    for command in commands {
        handle_command(ctx, ns, frm_payload, command, rx_info_set).await?;
    }
    Ok(())
}

async fn handle_command(
    ctx: &Context,
    ns: &mut NodeSession,
    frm_payload: bool,
    command: MacCommand,
    rx_info_set: &[RxInfo],
) -> Result<(), QueueError> {
    log::debug!(
        "mac-command received: dev_eui={}, cid=0x{:02x}, frm_payload={frm_payload}",
        ns.dev_eui,
        command.cid()
    );

    match command {
        MacCommand::LinkCheckReq => {
            let ans = link_check_answer(rx_info_set);
            queue::enqueue(
                ctx.cache.as_ref(),
                ns.dev_eui,
                &QueueItem {
                    data: ans.to_bytes(),
                    frm_payload: false,
                    external: false,
                },
                ctx.config.session_ttl(),
            )
            .await?;
        }
        MacCommand::LinkAdrAns(ans) => {
            queue::clear_pending(ctx.cache.as_ref(), ns.dev_eui, command.cid()).await?;
            if !ans.all_ack() {
                log::warn!(
                    "link-adr rejected by device: dev_eui={}, ch_mask_ack={}, dr_ack={}, power_ack={}",
                    ns.dev_eui,
                    ans.channel_mask_ack,
                    ans.data_rate_ack,
                    ans.power_ack
                );
            }
            forward_to_controller(ctx, ns, frm_payload, &command).await;
        }
        MacCommand::RxParamSetupAns(ans) => {
            let pending =
                queue::get_pending(ctx.cache.as_ref(), ns.dev_eui, command.cid()).await?;
            queue::clear_pending(ctx.cache.as_ref(), ns.dev_eui, command.cid()).await?;
            match pending {
                Some(req) if ans.all_ack() => {
                    if let Ok(cmds) = maccommands::decode_commands(Direction::Downlink, &req) {
                        if let Some(MacCommand::RxParamSetupReq(p)) = cmds.first() {
                            ns.rx1_dr_offset = p.rx1_dr_offset;
                            ns.rx2_dr = p.rx2_dr;
                            log::info!(
                                "rx-params committed: dev_eui={}, rx1_dr_offset={}, rx2_dr={}",
                                ns.dev_eui,
                                p.rx1_dr_offset,
                                p.rx2_dr
                            );
                        }
                    }
                }
                Some(_) => {
                    log::warn!("rx-param setup rejected by device: dev_eui={}", ns.dev_eui);
                }
                None => {
                    log::warn!(
                        "rx-param setup answer without pending request: dev_eui={}",
                        ns.dev_eui
                    );
                }
            }
            forward_to_controller(ctx, ns, frm_payload, &command).await;
        }
        MacCommand::RxTimingSetupAns => {
            let pending =
                queue::get_pending(ctx.cache.as_ref(), ns.dev_eui, command.cid()).await?;
            queue::clear_pending(ctx.cache.as_ref(), ns.dev_eui, command.cid()).await?;
            if let Some(req) = pending {
                if let Ok(cmds) = maccommands::decode_commands(Direction::Downlink, &req) {
                    if let Some(MacCommand::RxTimingSetupReq { delay }) = cmds.first() {
                        ns.rx_delay = *delay;
                        log::info!(
                            "rx-timing committed: dev_eui={}, rx_delay={delay}",
                            ns.dev_eui
                        );
                    }
                }
            }
            forward_to_controller(ctx, ns, frm_payload, &command).await;
        }
        MacCommand::DutyCycleAns | MacCommand::NewChannelAns { .. } => {
            queue::clear_pending(ctx.cache.as_ref(), ns.dev_eui, command.cid()).await?;
            forward_to_controller(ctx, ns, frm_payload, &command).await;
        }
        MacCommand::DevStatusAns { battery, margin } => {
            log::info!(
                "device status: dev_eui={}, battery={battery}, margin={margin}",
                ns.dev_eui
            );
            queue::clear_pending(ctx.cache.as_ref(), ns.dev_eui, command.cid()).await?;
            forward_to_controller(ctx, ns, frm_payload, &command).await;
        }
        MacCommand::Proprietary { cid, .. } => {
            log::warn!(
                "unhandled mac-command: dev_eui={}, cid=0x{cid:02x}",
                ns.dev_eui
            );
            forward_to_controller(ctx, ns, frm_payload, &command).await;
        }
        // downlink-only variants cannot legally arrive on an uplink; the
        // direction-aware decoder never produces them here
        other => {
            forward_to_controller(ctx, ns, frm_payload, &other).await;
        }
    }
    Ok(())
}

/// Build a LinkCheckAns from the aggregated receptions: the margin above
/// the demodulation floor of the best reception, and the gateway count.
fn link_check_answer(rx_info_set: &[RxInfo]) -> MacCommand {
    let margin = rx_info_set
        .first()
        .map(|rx| {
            let floor = match rx.data_rate.modulation {
                Modulation::Lora => demodulation_floor(rx.data_rate.spread_factor),
                Modulation::Fsk => 0.0,
            };
            (rx.lora_snr - floor).round().max(0.0) as u8
        })
        .unwrap_or(0);

    MacCommand::LinkCheckAns {
        margin,
        gw_cnt: rx_info_set.len() as u8,
    }
}

async fn forward_to_controller(
    ctx: &Context,
    ns: &NodeSession,
    frm_payload: bool,
    command: &MacCommand,
) {
    let req = HandleDataUpMacCommandRequest {
        app_eui: ns.app_eui,
        dev_eui: ns.dev_eui,
        frm_payload,
        data: command.to_bytes(),
    };
    if let Err(e) = ctx.controller.handle_data_up_mac_command(req).await {
        log::error!(
            "forward mac-command to network-controller error: dev_eui={}, error={e}",
            ns.dev_eui
        );
    }
}

async fn notify_controller_error(ctx: &Context, ns: &NodeSession, error: &str) {
    let req = ControllerErrorRequest {
        app_eui: ns.app_eui,
        dev_eui: ns.dev_eui,
        error: error.to_string(),
    };
    if let Err(e) = ctx.controller.handle_error(req).await {
        log::error!("notify network-controller error: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band;
    use crate::backend::gateway::RxInfo;
    use crate::lorawan::Eui64;

    fn rx_info(snr: f64) -> RxInfo {
        RxInfo {
            mac: Eui64::from_bytes([1; 8]),
            timestamp: 0,
            frequency: 868_100_000,
            data_rate: *band::eu868().data_rate(5).unwrap(), // SF7
            code_rate: "4/5".to_string(),
            rssi: -60,
            lora_snr: snr,
            crc_status: 1,
        }
    }

    #[test]
    fn test_link_check_margin() {
        // SF7 floor is -7.5 dB; +5 dB SNR gives 12.5 → 13 margin
        let set = vec![rx_info(5.0), rx_info(1.0)];
        assert_eq!(
            link_check_answer(&set),
            MacCommand::LinkCheckAns {
                margin: 13,
                gw_cnt: 2
            }
        );
    }

    #[test]
    fn test_link_check_margin_clamps_at_zero() {
        let set = vec![rx_info(-20.0)];
        assert_eq!(
            link_check_answer(&set),
            MacCommand::LinkCheckAns {
                margin: 0,
                gw_cnt: 1
            }
        );
    }
}
