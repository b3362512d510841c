//! Nonce replay cache for the resource-server gate.
//!
//! An accepted authorization's `(payer, asset, nonce)` is remembered until its
//! validity window has closed (plus clock skew). After that the authorization
//! is rejected as expired anyway, so the entry can go.

use crate::clock::Clock;
use crate::types::UnixTimestamp;
use async_trait::async_trait;
use ethers::types::{Address, H256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Identity of a single-use authorization.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplayKey {
    /// Payer address
    pub payer: Address,
    /// Asset address, lowercased
    pub asset: String,
    /// Authorization nonce
    pub nonce: H256,
}

impl ReplayKey {
    /// Builds a key; the asset is normalised so checksummed and lowercase forms collide.
    pub fn new(payer: Address, asset: &str, nonce: H256) -> Self {
        Self {
            payer,
            asset: asset.to_ascii_lowercase(),
            nonce,
        }
    }
}

/// Storage for used nonces. Implementations must be safe under arbitrary concurrency.
#[async_trait]
pub trait NonceStore: Send + Sync {
    /// Atomically records `key` if unseen. Returns `false` if it was already recorded.
    async fn try_claim(&self, key: ReplayKey, expires_at: UnixTimestamp) -> bool;

    /// Forgets a claim, e.g. when the facilitator refused the payment.
    async fn release(&self, key: &ReplayKey);

    /// Drops entries whose expiry is at or before `now`. Returns how many were dropped.
    async fn purge_expired(&self, now: UnixTimestamp) -> usize;

    /// Whether entries survive a process restart.
    ///
    /// A volatile store reopens a replay window for authorizations issued just
    /// before a restart; the gate refuses one unless that is acknowledged.
    fn is_persistent(&self) -> bool;
}

/// In-memory nonce store. Lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryNonceStore {
    entries: RwLock<HashMap<ReplayKey, UnixTimestamp>>,
}

impl InMemoryNonceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of remembered nonces.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Whether `key` is currently recorded.
    pub async fn contains(&self, key: &ReplayKey) -> bool {
        self.entries.read().await.contains_key(key)
    }
}

#[async_trait]
impl NonceStore for InMemoryNonceStore {
    async fn try_claim(&self, key: ReplayKey, expires_at: UnixTimestamp) -> bool {
        use std::collections::hash_map::Entry;
        match self.entries.write().await.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
                true
            }
        }
    }

    async fn release(&self, key: &ReplayKey) {
        self.entries.write().await.remove(key);
    }

    async fn purge_expired(&self, now: UnixTimestamp) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        before - entries.len()
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

/// Periodically purges expired entries from `store` until the handle is aborted.
pub fn spawn_eviction(
    store: Arc<dyn NonceStore>,
    clock: Arc<dyn Clock>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let purged = store.purge_expired(clock.now()).await;
            if purged > 0 {
                tracing::debug!(purged, "evicted expired payment nonces");
            }
        }
    })
}
