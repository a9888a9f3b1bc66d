//! # MAC-Command Queue
//!
//! Pending downlink MAC commands are queued per DevEUI in the cache and
//! drained FIFO into the next downlink that has room. An item is deleted
//! only after the frame carrying it was handed to the gateway; a failed
//! downlink leaves the queue untouched.
//!
//! The pending-store keeps the last request sent per CID so that the
//! device's answer can be correlated back to it (e.g. committing the RX
//! parameters a RXParamSetupReq proposed once the Ans arrives).

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::storage::cache::{Cache, CacheError};
use crate::lorawan::Eui64;

const QUEUE_KEY_PREFIX: &str = "lora:ns:mac:queue:";
const PENDING_KEY_PREFIX: &str = "lora:ns:mac:pending:";

/// Errors for MAC-command queue operations.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    #[error("queue item encoding error: {0}")]
    Encoding(String),
}

/// One queued MAC command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Raw command bytes, CID included.
    pub data: Vec<u8>,
    /// Must be sent encrypted in the FRMPayload (FPort 0) instead of the
    /// plaintext FOpts field.
    pub frm_payload: bool,
    /// Originated from the network controller rather than generated by
    /// the server itself.
    pub external: bool,
}

fn queue_key(dev_eui: Eui64) -> String {
    format!("{QUEUE_KEY_PREFIX}{dev_eui}")
}

fn pending_key(dev_eui: Eui64, cid: u8) -> String {
    format!("{PENDING_KEY_PREFIX}{dev_eui}:{cid:02x}")
}

fn encode(item: &QueueItem) -> Result<Vec<u8>, QueueError> {
    serde_json::to_vec(item).map_err(|e| QueueError::Encoding(e.to_string()))
}

/// Append a command to the device's queue and refresh the queue TTL.
pub async fn enqueue(
    cache: &dyn Cache,
    dev_eui: Eui64,
    item: &QueueItem,
    ttl: Duration,
) -> Result<(), QueueError> {
    let key = queue_key(dev_eui);
    cache.rpush(&key, encode(item)?).await?;
    cache.expire(&key, ttl).await?;
    log::debug!(
        "mac-command queued: dev_eui={dev_eui}, cid=0x{:02x}, frm_payload={}, external={}",
        item.data.first().copied().unwrap_or(0),
        item.frm_payload,
        item.external
    );
    Ok(())
}

/// Read the full queue, oldest first.
pub async fn read_queue(cache: &dyn Cache, dev_eui: Eui64) -> Result<Vec<QueueItem>, QueueError> {
    let blobs = cache.lrange(&queue_key(dev_eui)).await?;
    blobs
        .iter()
        .map(|b| serde_json::from_slice(b).map_err(|e| QueueError::Encoding(e.to_string())))
        .collect()
}

/// Remove one transmitted item from the queue.
pub async fn delete_item(
    cache: &dyn Cache,
    dev_eui: Eui64,
    item: &QueueItem,
) -> Result<(), QueueError> {
    let removed = cache.lrem(&queue_key(dev_eui), &encode(item)?).await?;
    if removed == 0 {
        log::warn!(
            "mac-command queue item already gone: dev_eui={dev_eui}, cid=0x{:02x}",
            item.data.first().copied().unwrap_or(0)
        );
    }
    Ok(())
}

/// Drop the whole queue (a fresh join invalidates everything queued for
/// the old session).
pub async fn flush_queue(cache: &dyn Cache, dev_eui: Eui64) -> Result<(), QueueError> {
    cache.del(&queue_key(dev_eui)).await?;
    Ok(())
}

/// Select the commands that fit into a downlink: the FIFO prefix of the
/// items matching the `frm_payload` placement whose concatenated length
/// stays within `budget` bytes. The first matching item that would
/// overflow stops the scan, so an oversized command blocks later ones
/// rather than being reordered around.
pub fn filter_items(items: Vec<QueueItem>, frm_payload: bool, budget: usize) -> Vec<QueueItem> {
    let mut out = Vec::new();
    let mut used = 0;
    for item in items {
        if item.frm_payload != frm_payload {
            continue;
        }
        used += item.data.len();
        if used > budget {
            break;
        }
        out.push(item);
    }
    out
}

/// Remember the request just sent for a CID, for answer correlation.
pub async fn set_pending(
    cache: &dyn Cache,
    dev_eui: Eui64,
    cid: u8,
    data: &[u8],
    ttl: Duration,
) -> Result<(), QueueError> {
    cache
        .set(&pending_key(dev_eui, cid), data.to_vec(), ttl)
        .await?;
    Ok(())
}

/// The pending request for a CID, if any.
pub async fn get_pending(
    cache: &dyn Cache,
    dev_eui: Eui64,
    cid: u8,
) -> Result<Option<Vec<u8>>, QueueError> {
    Ok(cache.get(&pending_key(dev_eui, cid)).await?)
}

/// Drop the pending request for a CID.
pub async fn clear_pending(cache: &dyn Cache, dev_eui: Eui64, cid: u8) -> Result<(), QueueError> {
    cache.del(&pending_key(dev_eui, cid)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::cache::MemoryCache;

    fn item(cid: u8, len: usize, frm_payload: bool) -> QueueItem {
        let mut data = vec![cid];
        data.extend(std::iter::repeat(0xaa).take(len - 1));
        QueueItem {
            data,
            frm_payload,
            external: false,
        }
    }

    fn eui() -> Eui64 {
        Eui64::from_bytes([2; 8])
    }

    #[tokio::test]
    async fn test_queue_fifo_round_trip() {
        let cache = MemoryCache::new();
        let a = item(0x06, 1, false);
        let b = item(0x03, 5, false);
        enqueue(&cache, eui(), &a, Duration::ZERO).await.unwrap();
        enqueue(&cache, eui(), &b, Duration::ZERO).await.unwrap();

        assert_eq!(read_queue(&cache, eui()).await.unwrap(), vec![a.clone(), b.clone()]);

        delete_item(&cache, eui(), &a).await.unwrap();
        assert_eq!(read_queue(&cache, eui()).await.unwrap(), vec![b]);
    }

    #[tokio::test]
    async fn test_flush_queue() {
        let cache = MemoryCache::new();
        enqueue(&cache, eui(), &item(0x06, 1, false), Duration::ZERO)
            .await
            .unwrap();
        flush_queue(&cache, eui()).await.unwrap();
        assert!(read_queue(&cache, eui()).await.unwrap().is_empty());
    }

    #[test]
    fn test_filter_respects_budget() {
        let items = vec![
            item(0x06, 1, false),
            item(0x03, 5, false),
            item(0x05, 5, false),
        ];
        // 1 + 5 fit into 6; the third would overflow and stays queued
        let selected = filter_items(items.clone(), false, 6);
        assert_eq!(selected, items[..2]);

        // an overflowing head blocks everything behind it
        let selected = filter_items(items.clone(), false, 0);
        assert!(selected.is_empty());

        let selected = filter_items(items.clone(), false, 15);
        assert_eq!(selected, items);
    }

    #[test]
    fn test_filter_matches_placement() {
        let items = vec![
            item(0x06, 1, true),
            item(0x03, 5, false),
            item(0x05, 5, true),
        ];
        let frm = filter_items(items.clone(), true, 15);
        assert_eq!(frm.len(), 2);
        assert!(frm.iter().all(|i| i.frm_payload));

        let fopts = filter_items(items, false, 15);
        assert_eq!(fopts.len(), 1);
        assert!(!fopts[0].frm_payload);
    }

    #[tokio::test]
    async fn test_pending_store() {
        let cache = MemoryCache::new();
        assert_eq!(get_pending(&cache, eui(), 0x05).await.unwrap(), None);
        set_pending(&cache, eui(), 0x05, &[0x05, 0x13, 0x01, 0x02], Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(
            get_pending(&cache, eui(), 0x05).await.unwrap(),
            Some(vec![0x05, 0x13, 0x01, 0x02])
        );
        clear_pending(&cache, eui(), 0x05).await.unwrap();
        assert_eq!(get_pending(&cache, eui(), 0x05).await.unwrap(), None);
    }
}
