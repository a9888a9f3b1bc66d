//! # Node-Session Store
//!
//! A node-session holds everything the server must remember about an
//! activated device: session key, frame counters, receive-window
//! parameters and the metadata of the last uplink. Sessions live in the
//! cache under the DevEUI, with a secondary DevAddr index since the
//! 25-bit address space is shared and several devices may sit behind one
//! address; MIC verification disambiguates.
//!
//! The uplink carries only the 16 LSB of the frame counter, so the lookup
//! reconstructs the full 32-bit value from the session's high bits, with
//! one retry at `high + 1` to cover a rollover of the wire counter.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::cache::{Cache, CacheError};
use crate::backend::gateway::RxInfo;
use crate::lorawan::phy::FrameError;
use crate::lorawan::{Aes128Key, DevAddr, Eui64, NetId, PhyPayload};

const SESSION_KEY_PREFIX: &str = "lora:ns:session:";
const DEV_ADDR_KEY_PREFIX: &str = "lora:ns:devaddr:";

/// Errors for session persistence and lookup.
#[derive(Error, Debug)]
pub enum SessionError {
    /// No session is stored for the DevEUI.
    #[error("node-session does not exist")]
    DoesNotExist,
    /// No stored session under the frame's DevAddr yields a valid MIC for
    /// any frame-counter candidate. Deliberately one error: the frame may
    /// simply belong to another network.
    #[error("node-session does not exist or invalid FCnt or MIC")]
    DoesNotExistOrFCntOrMicInvalid,
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("session encoding error: {0}")]
    Encoding(String),
}

/// Which receive window the device listens on for data downlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RxWindow {
    #[default]
    Rx1,
    Rx2,
}

/// Per-device session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSession {
    pub dev_addr: DevAddr,
    pub app_eui: Eui64,
    pub dev_eui: Eui64,
    /// Immutable for the lifetime of the session; a new join replaces the
    /// whole session.
    pub nwk_s_key: Aes128Key,
    /// Watermark of the last accepted uplink counter.
    pub f_cnt_up: u32,
    /// The counter the next downlink will use.
    pub f_cnt_down: u32,
    /// Accept a counter reset to zero (devices without persistent FCnt).
    pub relax_f_cnt: bool,
    pub rx_window: RxWindow,
    /// Seconds between uplink end and RX1; 0 means the 1 s default.
    pub rx_delay: u8,
    pub rx1_dr_offset: u8,
    pub rx2_dr: u8,
    /// Extra channel frequencies pushed at join (at most five; empty when
    /// none).
    pub cf_list: Vec<u32>,
    pub adr_interval: u32,
    pub installation_margin: f64,
    /// Reception records of the most recent uplink, best SNR first. The
    /// downlink scheduler targets the first entry.
    pub last_rx_info_set: Vec<RxInfo>,
}

fn session_key(dev_eui: Eui64) -> String {
    format!("{SESSION_KEY_PREFIX}{dev_eui}")
}

fn dev_addr_key(dev_addr: DevAddr) -> String {
    format!("{DEV_ADDR_KEY_PREFIX}{dev_addr}")
}

/// Persist a session under its DevEUI and register it in the DevAddr
/// index. Refreshes the TTL of both keys.
pub async fn save_node_session(
    cache: &dyn Cache,
    ns: &NodeSession,
    ttl: Duration,
) -> Result<(), SessionError> {
    let blob = serde_json::to_vec(ns).map_err(|e| SessionError::Encoding(e.to_string()))?;
    cache.set(&session_key(ns.dev_eui), blob, ttl).await?;

    let mut euis = read_dev_addr_index(cache, ns.dev_addr).await?;
    if !euis.contains(&ns.dev_eui) {
        euis.push(ns.dev_eui);
    }
    let blob = serde_json::to_vec(&euis).map_err(|e| SessionError::Encoding(e.to_string()))?;
    cache.set(&dev_addr_key(ns.dev_addr), blob, ttl).await?;

    log::debug!(
        "node-session saved: dev_eui={}, dev_addr={}, fcnt_up={}, fcnt_down={}",
        ns.dev_eui,
        ns.dev_addr,
        ns.f_cnt_up,
        ns.f_cnt_down
    );
    Ok(())
}

/// Load the session for a DevEUI.
pub async fn get_node_session(
    cache: &dyn Cache,
    dev_eui: Eui64,
) -> Result<NodeSession, SessionError> {
    let blob = cache
        .get(&session_key(dev_eui))
        .await?
        .ok_or(SessionError::DoesNotExist)?;
    serde_json::from_slice(&blob).map_err(|e| SessionError::Encoding(e.to_string()))
}

async fn read_dev_addr_index(
    cache: &dyn Cache,
    dev_addr: DevAddr,
) -> Result<Vec<Eui64>, SessionError> {
    match cache.get(&dev_addr_key(dev_addr)).await? {
        Some(blob) => {
            serde_json::from_slice(&blob).map_err(|e| SessionError::Encoding(e.to_string()))
        }
        None => Ok(Vec::new()),
    }
}

/// Resolve the session for a data uplink by DevAddr and MIC, and expand
/// the 16-bit wire counter to the full 32-bit value in the same step.
///
/// For every candidate session sharing the frame's DevAddr, the expected
/// counter is built from the session's high 16 bits, retried at the next
/// rollover boundary, and (for RelaxFCnt sessions with a wire counter of
/// zero) at zero. The first candidate whose MIC verifies wins.
pub async fn get_session_for_phy_payload(
    cache: &dyn Cache,
    phy: &PhyPayload,
    max_fcnt_gap: u32,
) -> Result<(NodeSession, u32), SessionError> {
    let mac = phy.mac_payload()?;
    let wire_fcnt = mac.fhdr.f_cnt & 0xffff;

    for dev_eui in read_dev_addr_index(cache, mac.fhdr.dev_addr).await? {
        let ns = match get_node_session(cache, dev_eui).await {
            Ok(ns) => ns,
            // the index can outlive an expired session entry
            Err(SessionError::DoesNotExist) => continue,
            Err(e) => return Err(e),
        };

        for full_fcnt in fcnt_candidates(&ns, wire_fcnt, max_fcnt_gap) {
            let mut candidate = phy.clone();
            if let crate::lorawan::Payload::Mac(mac) = &mut candidate.payload {
                mac.fhdr.f_cnt = full_fcnt;
            }
            if candidate.verify_mic(&ns.nwk_s_key) {
                return Ok((ns, full_fcnt));
            }
        }
    }

    Err(SessionError::DoesNotExistOrFCntOrMicInvalid)
}

/// The full-counter candidates to try for a session, in order.
fn fcnt_candidates(ns: &NodeSession, wire_fcnt: u32, max_fcnt_gap: u32) -> Vec<u32> {
    let base = (ns.f_cnt_up & 0xffff_0000) | wire_fcnt;
    let mut out = vec![base];
    if let Some(rollover) = base.checked_add(0x1_0000) {
        if rollover.wrapping_sub(ns.f_cnt_up) <= max_fcnt_gap {
            out.push(rollover);
        }
    }
    if ns.relax_f_cnt && wire_fcnt == 0 && base != 0 {
        out.push(0);
    }
    out
}

/// Draw a random DevAddr under the network's NwkID prefix: the 7 MSBs
/// carry the NetID low bits, the remaining 25 bits are random.
pub fn random_dev_addr(net_id: NetId) -> DevAddr {
    let nwk_addr: u32 = rand::thread_rng().gen_range(0..1 << 25);
    DevAddr::from_u32(((net_id.nwk_id() as u32) << 25) | nwk_addr)
}
