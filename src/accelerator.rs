//! Graph-search accelerator.
//!
//! An optional collaborator that can hand a job ancestor transactions it
//! already has, saving network round trips. Validation is correct without
//! it, only slower.
//!
//! [`RecentTxCache`] is the in-process implementation: an LRU of recently
//! fetched transactions shared app-wide, keyed by (token id, txid).
//!
//! ## Cache Key Design
//!
//! Entries are keyed by both ids so that one token's graph never serves a
//! transaction recorded while walking another token's graph.

use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::types::{TokenId, Transaction, TxId};

/// Source of already-fetched ancestor transactions.
pub trait GraphSearch: Send + Sync {
    /// Transaction `txid` as seen while walking `token_id`'s graph.
    fn get_tx(&self, token_id: &TokenId, txid: &TxId) -> Option<Arc<Transaction>>;

    /// Remember a transaction fetched for `token_id`.
    fn record(&self, token_id: &TokenId, tx: Arc<Transaction>);
}

/// Configuration for the recent-transaction cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_entries: 10_000 }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Current number of entries in the cache.
    pub len: usize,
    /// Maximum capacity of the cache.
    pub cap: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that fell through.
    pub misses: u64,
}

/// LRU of recently fetched transactions.
pub struct RecentTxCache {
    cache: RwLock<LruCache<(TokenId, TxId), Arc<Transaction>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl RecentTxCache {
    /// Create a cache with the given configuration.
    pub fn new(config: CacheConfig) -> Self {
        let size = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: RwLock::new(LruCache::new(size)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let cache = self.cache.read();
        CacheStats {
            len: cache.len(),
            cap: cache.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.cache.write().clear();
    }
}

impl Default for RecentTxCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl GraphSearch for RecentTxCache {
    fn get_tx(&self, token_id: &TokenId, txid: &TxId) -> Option<Arc<Transaction>> {
        // peek under the read lock; recency is refreshed on record
        let found = self.cache.read().peek(&(*token_id, *txid)).cloned();
        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    fn record(&self, token_id: &TokenId, tx: Arc<Transaction>) {
        self.cache.write().put((*token_id, tx.txid()), tx);
    }
}
