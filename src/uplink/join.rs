//! # Over-the-Air Activation
//!
//! The join handshake. The network server assigns the DevAddr and owns
//! the session, but the cryptographic decisions are delegated: the
//! application server holds the AppKey, validates the join-request MIC,
//! rejects replayed DevNonces, derives the session keys and returns the
//! JoinAccept frame, which is transmitted verbatim.
//!
//! A successful join replaces any previous session atomically and flushes
//! the MAC-command queue: nothing queued for the old session keys makes
//! sense under the new ones.

use crate::backend::application::{
    ErrorType, HandleErrorRequest, JoinRequestRequest, JoinRequestResponse,
};
use crate::backend::gateway::RxPacket;
use crate::downlink;
use crate::lorawan::phy::MAX_CFLIST_CHANNELS;
use crate::lorawan::{JoinRequestPayload, PhyPayload};
use crate::maccommand::queue;
use crate::server::Context;
use crate::storage::session::{self, NodeSession};

use super::collect::{collect_and_call_once, CollectedPacket};
use super::UplinkError;

/// Deduplicate a join-request and handle the collected result once.
pub async fn collect_join_request(ctx: &Context, rx_packet: RxPacket) -> Result<(), UplinkError> {
    collect_and_call_once(ctx, rx_packet, |collected| async move {
        handle_collected_join_request(ctx, collected).await
    })
    .await
    .map_err(UplinkError::from)
}

async fn handle_collected_join_request(
    ctx: &Context,
    collected: CollectedPacket,
) -> Result<(), UplinkError> {
    let phy = PhyPayload::parse(&collected.phy_payload)?;
    let jr = *phy.join_request_payload()?;

    log::info!(
        "join-request collected: dev_eui={}, app_eui={}, dev_nonce=0x{:04x}, gw_count={}",
        jr.dev_eui,
        jr.app_eui,
        jr.dev_nonce,
        collected.rx_info_set.len()
    );

    let dev_addr = session::random_dev_addr(ctx.net_id);

    let resp = ctx
        .application
        .join_request(JoinRequestRequest {
            phy_payload: collected.phy_payload.clone(),
            dev_addr,
            net_id: ctx.net_id,
        })
        .await
        .map_err(|e| {
            log::warn!("join-request rejected: dev_eui={}, error={e}", jr.dev_eui);
            UplinkError::Application(e)
        })?;

    if resp.cf_list.len() > MAX_CFLIST_CHANNELS {
        let error = format!(
            "max CFList size {MAX_CFLIST_CHANNELS}, got {}",
            resp.cf_list.len()
        );
        notify_otaa_error(ctx, &jr, &error).await;
        return Err(UplinkError::Application(
            crate::backend::application::BackendError::Rpc(error),
        ));
    }

    // the returned frame goes out verbatim, but it must at least be a
    // well-formed PHY payload
    if let Err(e) = PhyPayload::parse(&resp.phy_payload) {
        let error = format!("join-accept PHYPayload parse error: {e}");
        notify_otaa_error(ctx, &jr, &error).await;
        return Err(e.into());
    }

    let ns = node_session_from_join(&jr, dev_addr, &resp, &collected);
    session::save_node_session(ctx.cache.as_ref(), &ns, ctx.config.session_ttl()).await?;

    queue::flush_queue(ctx.cache.as_ref(), ns.dev_eui).await?;

    downlink::send_join_accept_response(ctx, &ns, &collected, resp.phy_payload.clone()).await?;

    log::info!(
        "node joined: dev_eui={}, dev_addr={}, rx_window={:?}",
        ns.dev_eui,
        ns.dev_addr,
        ns.rx_window
    );
    Ok(())
}

fn node_session_from_join(
    jr: &JoinRequestPayload,
    dev_addr: crate::lorawan::DevAddr,
    resp: &JoinRequestResponse,
    collected: &CollectedPacket,
) -> NodeSession {
    NodeSession {
        dev_addr,
        app_eui: jr.app_eui,
        dev_eui: jr.dev_eui,
        nwk_s_key: resp.nwk_s_key,
        f_cnt_up: 0,
        f_cnt_down: 0,
        relax_f_cnt: resp.relax_fcnt || resp.disable_f_cnt_check,
        rx_window: resp.rx_window,
        rx_delay: resp.rx_delay,
        rx1_dr_offset: resp.rx1_dr_offset,
        rx2_dr: resp.rx2_dr,
        cf_list: resp.cf_list.clone(),
        adr_interval: resp.adr_interval,
        installation_margin: resp.installation_margin,
        last_rx_info_set: collected.rx_info_set.clone(),
    }
}

async fn notify_otaa_error(ctx: &Context, jr: &JoinRequestPayload, error: &str) {
    log::warn!("otaa error: dev_eui={}, {error}", jr.dev_eui);
    let req = HandleErrorRequest {
        app_eui: jr.app_eui,
        dev_eui: jr.dev_eui,
        error_type: ErrorType::Otaa,
        error: error.to_string(),
    };
    if let Err(e) = ctx.application.handle_error(req).await {
        log::error!("notify application-server error: {e}");
    }
}
