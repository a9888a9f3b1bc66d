//! # Data Uplink Handling
//!
//! The data path for Un/ConfirmedDataUp frames, run once per unique frame
//! after deduplication:
//!
//! 1. Resolve the session by DevAddr + MIC, expanding the 16-bit wire
//!    counter to 32 bits in the same step. A miss is dropped silently;
//!    the frame may belong to another network.
//! 2. Enforce the frame-counter watermark (anti-replay); violations are
//!    reported to the application server.
//! 3. FPort 0 payloads are NwkSKey-encrypted MAC commands and go to the
//!    MAC-command engine; FPort > 0 payloads are forwarded to the
//!    application server still encrypted (the AppSKey never lives here).
//! 4. FOpts MAC commands are processed, an ACK bit settles the pending
//!    confirmed downlink, the session is saved, and the downlink
//!    scheduler gets its chance to respond in the receive window.

use crate::backend::application::{
    ErrorType, HandleDataDownAckRequest, HandleDataUpRequest, HandleErrorRequest,
};
use crate::backend::gateway::RxPacket;
use crate::downlink;
use crate::lorawan::{Payload, PhyPayload};
use crate::maccommand;
use crate::server::Context;
use crate::storage::session::{self, NodeSession, SessionError};

use super::collect::{collect_and_call_once, CollectedPacket};
use super::UplinkError;

/// Deduplicate a data uplink and handle the collected result once.
pub async fn collect_data_up(ctx: &Context, rx_packet: RxPacket) -> Result<(), UplinkError> {
    collect_and_call_once(ctx, rx_packet, |collected| async move {
        handle_collected_data_up(ctx, collected).await
    })
    .await
    .map_err(UplinkError::from)
}

async fn handle_collected_data_up(
    ctx: &Context,
    collected: CollectedPacket,
) -> Result<(), UplinkError> {
    let mut phy = PhyPayload::parse(&collected.phy_payload)?;

    let (mut ns, full_fcnt) = match session::get_session_for_phy_payload(
        ctx.cache.as_ref(),
        &phy,
        ctx.band.max_fcnt_gap,
    )
    .await
    {
        Ok(found) => found,
        Err(SessionError::DoesNotExistOrFCntOrMicInvalid) => {
            // possibly another network's traffic; drop without notifying
            log::warn!(
                "rx packet dropped, no session or invalid FCnt/MIC: frame={}",
                hex::encode(&collected.phy_payload)
            );
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let relax_reset = ns.relax_f_cnt && full_fcnt == 0;
    if full_fcnt <= ns.f_cnt_up && !relax_reset {
        log::warn!(
            "frame-counter replay: dev_eui={}, stored_fcnt={}, frame_fcnt={full_fcnt}",
            ns.dev_eui,
            ns.f_cnt_up
        );
        notify_application_error(
            ctx,
            &ns,
            ErrorType::DataUp,
            &format!(
                "invalid FCnt or frame replay (stored: {}, got: {full_fcnt})",
                ns.f_cnt_up
            ),
        )
        .await;
        return Ok(());
    }
    if relax_reset {
        // device without persistent counters rebooted; both directions
        // restart from zero
        ns.f_cnt_up = 0;
        ns.f_cnt_down = 0;
    }

    // the payload keystream runs over the expanded counter
    if let Payload::Mac(mac) = &mut phy.payload {
        mac.fhdr.f_cnt = full_fcnt;
    }

    let mac = phy.mac_payload()?.clone();
    match mac.f_port {
        Some(0) => {
            let mut decrypted = phy.clone();
            decrypted.decrypt_frm_payload(&ns.nwk_s_key)?;
            let commands = decrypted.mac_payload()?.frm_payload.clone();
            maccommand::handle_uplink_mac_commands(
                ctx,
                &mut ns,
                true,
                &commands,
                &collected.rx_info_set,
            )
            .await?;
        }
        Some(f_port) => {
            publish_data_up(ctx, &ns, &collected, full_fcnt, f_port, &mac.frm_payload).await;
        }
        None => {}
    }

    if !mac.fhdr.f_opts.is_empty() {
        maccommand::handle_uplink_mac_commands(
            ctx,
            &mut ns,
            false,
            &mac.fhdr.f_opts,
            &collected.rx_info_set,
        )
        .await?;
    }

    if mac.fhdr.f_ctrl.ack {
        handle_uplink_ack(ctx, &mut ns).await;
    }

    ns.f_cnt_up = full_fcnt;
    ns.last_rx_info_set = collected.rx_info_set.clone();
    session::save_node_session(ctx.cache.as_ref(), &ns, ctx.config.session_ttl()).await?;

    downlink::send_uplink_response(ctx, &mut ns, &collected, &phy).await?;
    Ok(())
}

/// Forward the (still encrypted) application payload with its reception
/// metadata. A failing application server does not drop the frame; the
/// downlink may still carry MAC commands or an ACK.
async fn publish_data_up(
    ctx: &Context,
    ns: &NodeSession,
    collected: &CollectedPacket,
    f_cnt: u32,
    f_port: u8,
    data: &[u8],
) {
    let best = &collected.rx_info_set[0];
    let req = HandleDataUpRequest {
        app_eui: ns.app_eui,
        dev_eui: ns.dev_eui,
        f_cnt,
        f_port,
        data: data.to_vec(),
        gateway_count: collected.rx_info_set.len() as u32,
        rssi: best.rssi,
        data_rate: best.data_rate,
    };
    if let Err(e) = ctx.application.handle_data_up(req).await {
        log::error!(
            "publish data up to application error: dev_eui={}, error={e}",
            ns.dev_eui
        );
    }
}

/// The device acknowledged the pending confirmed downlink: report it and
/// advance FCntDown (the counter of the acknowledged frame is the stored
/// one).
async fn handle_uplink_ack(ctx: &Context, ns: &mut NodeSession) {
    let req = HandleDataDownAckRequest {
        app_eui: ns.app_eui,
        dev_eui: ns.dev_eui,
        f_cnt: ns.f_cnt_down,
    };
    if let Err(e) = ctx.application.handle_data_down_ack(req).await {
        log::error!(
            "publish data down ack to application error: dev_eui={}, error={e}",
            ns.dev_eui
        );
    }
    ns.f_cnt_down += 1;
}

async fn notify_application_error(
    ctx: &Context,
    ns: &NodeSession,
    error_type: ErrorType,
    error: &str,
) {
    let req = HandleErrorRequest {
        app_eui: ns.app_eui,
        dev_eui: ns.dev_eui,
        error_type,
        error: error.to_string(),
    };
    if let Err(e) = ctx.application.handle_error(req).await {
        log::error!("notify application-server error: {e}");
    }
}
