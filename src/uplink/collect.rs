//! # Uplink Deduplication
//!
//! The same radio frame is usually demodulated by several gateways, each
//! delivering its own copy with its own reception metadata. The collector
//! fans those copies back into one handler invocation:
//!
//! 1. Every reception RPUSHes its metadata onto a cache list keyed by the
//!    raw frame bytes and refreshes the list's short expiry (the
//!    collection window).
//! 2. The first reception additionally wins a one-shot SETNX handler
//!    lock on the same key. The winner sleeps until the window closes,
//!    reads the accumulated list back and invokes the handler exactly
//!    once with the full reception set, best SNR first.
//!
//! The lock lives slightly longer than the window so stragglers that
//! arrive while the handler runs still only contribute metadata. When the
//! handler fails the entry is left to expire; the radio moment has
//! passed, so there is nothing to retry.

use std::future::Future;
use thiserror::Error;
use tokio::time::sleep;

use crate::backend::gateway::{RxInfo, RxPacket};
use crate::server::Context;
use crate::storage::cache::CacheError;

const COLLECT_KEY_PREFIX: &str = "lora:ns:rx:collect:";
const LOCK_KEY_PREFIX: &str = "lora:ns:rx:lock:";

/// Errors from the collection layer.
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("rx-info encoding error: {0}")]
    Encoding(String),
    #[error("empty rx-info set after collection")]
    EmptySet,
}

/// A frame with the reception metadata of every gateway that heard it
/// within the collection window, best SNR first.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedPacket {
    pub phy_payload: Vec<u8>,
    pub rx_info_set: Vec<RxInfo>,
}

/// Collect duplicate receptions of `rx_packet` and invoke `handler` once
/// per unique frame with the aggregated set.
pub async fn collect_and_call_once<F, Fut, E>(
    ctx: &Context,
    rx_packet: RxPacket,
    handler: F,
) -> Result<(), CollectError>
where
    F: FnOnce(CollectedPacket) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    let frame_id = hex::encode(&rx_packet.phy_payload);
    let collect_key = format!("{COLLECT_KEY_PREFIX}{frame_id}");
    let lock_key = format!("{LOCK_KEY_PREFIX}{frame_id}");

    let window = ctx.config.deduplication_window();
    let cache = ctx.cache.as_ref();

    let blob = serde_json::to_vec(&rx_packet.rx_info)
        .map_err(|e| CollectError::Encoding(e.to_string()))?;
    cache.rpush(&collect_key, blob).await?;
    cache.expire(&collect_key, window * 2).await?;

    // the lock outlives the window so late duplicates cannot re-trigger
    // the handler while it still runs
    if !cache.set_nx(&lock_key, vec![1], window * 2).await? {
        log::debug!("duplicate rx packet contributed: frame_id={frame_id}");
        return Ok(());
    }

    sleep(window).await;

    let blobs = cache.lrange(&collect_key).await?;
    let mut rx_info_set = Vec::with_capacity(blobs.len());
    for blob in blobs {
        let rx_info: RxInfo =
            serde_json::from_slice(&blob).map_err(|e| CollectError::Encoding(e.to_string()))?;
        rx_info_set.push(rx_info);
    }
    if rx_info_set.is_empty() {
        return Err(CollectError::EmptySet);
    }

    // deterministic best-gateway-first ordering; downstream targets the
    // first entry
    rx_info_set.sort_by(|a, b| {
        b.lora_snr
            .partial_cmp(&a.lora_snr)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    log::info!(
        "packet(s) collected: frame_id={frame_id}, gw_count={}",
        rx_info_set.len()
    );

    let collected = CollectedPacket {
        phy_payload: rx_packet.phy_payload,
        rx_info_set,
    };
    if let Err(e) = handler(collected).await {
        log::error!("collected packet handler error: {e}");
    }
    Ok(())
}
