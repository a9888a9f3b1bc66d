//! # Key-Value Cache Contract
//!
//! The network server keeps all short-lived shared state (sessions, MAC
//! command queues, deduplication sets) in an external key-value cache with
//! per-key TTLs. The [`Cache`] trait captures exactly the operations the
//! server needs; a Redis deployment maps them 1:1 (GET, SET PX, DEL,
//! SET NX PX, RPUSH, LRANGE, LREM, PEXPIRE).
//!
//! [`MemoryCache`] is a process-local implementation used by the test
//! suite and the demo binary. Expiry is lazy: entries are dropped when
//! they are next touched.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

/// Errors from cache backends. These are transient by contract; callers
/// propagate them so the caller's retry discipline applies.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("wrong value type for key: {0}")]
    WrongType(String),
}

/// The cache operations the server depends on, defined against Redis
/// semantics.
#[async_trait]
pub trait Cache: Send + Sync {
    /// GET. `None` when the key is absent or expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// SET with TTL (a zero TTL means no expiry).
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// DEL.
    async fn del(&self, key: &str) -> Result<(), CacheError>;

    /// SET NX with TTL. Returns `true` when the key was newly set.
    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool, CacheError>;

    /// RPUSH. Returns the list length after the push.
    async fn rpush(&self, key: &str, value: Vec<u8>) -> Result<usize, CacheError>;

    /// LRANGE 0 -1.
    async fn lrange(&self, key: &str) -> Result<Vec<Vec<u8>>, CacheError>;

    /// LREM: remove the first occurrence of `value`. Returns the number
    /// of removed elements (0 or 1).
    async fn lrem(&self, key: &str, value: &[u8]) -> Result<usize, CacheError>;

    /// PEXPIRE: (re)set the TTL of an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError>;
}

enum Value {
    Bytes(Vec<u8>),
    List(Vec<Vec<u8>>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if at <= Instant::now())
    }
}

/// In-process cache for tests and single-node demo deployments.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

fn deadline(ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        Some(Instant::now() + ttl)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(e) if e.expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(Entry {
                value: Value::Bytes(b),
                ..
            }) => Ok(Some(b.clone())),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(value),
                expires_at: deadline(ttl),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<bool, CacheError> {
        let mut entries = self.entries.lock().await;
        if let Some(e) = entries.get(key) {
            if !e.expired() {
                return Ok(false);
            }
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(value),
                expires_at: deadline(ttl),
            },
        );
        Ok(true)
    }

    async fn rpush(&self, key: &str, value: Vec<u8>) -> Result<usize, CacheError> {
        let mut entries = self.entries.lock().await;
        if matches!(entries.get(key), Some(e) if e.expired()) {
            entries.remove(key);
        }
        let entry = entries.entry(key.to_string()).or_insert(Entry {
            value: Value::List(Vec::new()),
            expires_at: None,
        });
        match &mut entry.value {
            Value::List(list) => {
                list.push(value);
                Ok(list.len())
            }
            Value::Bytes(_) => Err(CacheError::WrongType(key.to_string())),
        }
    }

    async fn lrange(&self, key: &str) -> Result<Vec<Vec<u8>>, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(e) if e.expired() => {
                entries.remove(key);
                Ok(Vec::new())
            }
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(list.clone()),
            Some(_) => Err(CacheError::WrongType(key.to_string())),
            None => Ok(Vec::new()),
        }
    }

    async fn lrem(&self, key: &str, value: &[u8]) -> Result<usize, CacheError> {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some(e) if e.expired() => {
                entries.remove(key);
                Ok(0)
            }
            Some(Entry {
                value: Value::List(list),
                ..
            }) => match list.iter().position(|v| v == value) {
                Some(i) => {
                    list.remove(i);
                    Ok(1)
                }
                None => Ok(0),
            },
            Some(_) => Err(CacheError::WrongType(key.to_string())),
            None => Ok(0),
        }
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().await;
        if let Some(e) = entries.get_mut(key) {
            e.expires_at = deadline(ttl);
        }
        Ok(())
    }
}
