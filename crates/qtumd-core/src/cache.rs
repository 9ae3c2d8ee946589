//! The Cache Layer: bounded LRU caches per logical query, with single-flight
//! deduplication so concurrent callers never issue two RPC fetches for the
//! same key (`spec.md` §4.7).

use crate::model::{AddressSummary, BlockOverview, DetailedTransaction, Utxo};
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::{future::Future, hash::Hash, num::NonZeroUsize, sync::Arc};
use tokio::sync::Notify;

/// One bounded LRU cache with single-flight fetch deduplication.
pub struct Cache<K, V> {
    lru: Mutex<LruCache<K, V>>,
    in_flight: DashMap<K, Arc<Notify>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self { lru: Mutex::new(LruCache::new(capacity)), in_flight: DashMap::new() }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.lru.lock().get(key).cloned()
    }

    pub fn insert(&self, key: K, value: V) {
        self.lru.lock().put(key, value);
    }

    pub fn clear(&self) {
        self.lru.lock().clear();
    }

    /// Returns the cached value for `key`, or runs `fetch` exactly once
    /// across every concurrently-waiting caller and caches its success.
    /// Failed fetches are not cached: the next call retries (`spec.md` §7).
    pub async fn get_or_fetch<E, Fut>(&self, key: K, fetch: impl FnOnce() -> Fut) -> Result<V, Arc<E>>
    where
        Fut: Future<Output = Result<V, E>>,
    {
        loop {
            if let Some(value) = self.get(&key) {
                return Ok(value);
            }

            use dashmap::mapref::entry::Entry;
            let notify = match self.in_flight.entry(key.clone()) {
                Entry::Occupied(entry) => {
                    let notify = entry.get().clone();
                    // Register the Notified future while still holding the
                    // entry guard, so a notify_waiters() call racing with
                    // the guard drop below can't be missed: Notify
                    // remembers calls to notified() that precede it even if
                    // the future isn't polled yet.
                    let notified = notify.notified();
                    drop(entry);
                    notified.await;
                    continue;
                }
                Entry::Vacant(entry) => {
                    let notify = Arc::new(Notify::new());
                    entry.insert(notify.clone());
                    notify
                }
            };

            let result = fetch().await;
            if let Ok(value) = &result {
                self.insert(key.clone(), value.clone());
            }
            self.in_flight.remove(&key);
            notify.notify_waiters();
            return result.map_err(Arc::new);
        }
    }
}

/// Every per-operation cache named in `spec.md` §4.7, grouped by
/// invalidation policy. Content-addressed caches are never invalidated,
/// only LRU-evicted; tip-sensitive ones are cleared wholesale on every tip
/// change via [`CacheRegistry::invalidate_tip_sensitive`].
pub struct CacheRegistry {
    pub raw_transactions: Cache<String, Vec<u8>>,
    pub parsed_transactions: Cache<String, serde_json::Value>,
    pub detailed_transactions: Cache<String, DetailedTransaction>,
    pub raw_blocks: Cache<String, Vec<u8>>,
    pub parsed_blocks: Cache<String, serde_json::Value>,
    pub block_headers: Cache<String, serde_json::Value>,
    pub block_overviews: Cache<String, BlockOverview>,
    pub json_raw_transactions: Cache<String, serde_json::Value>,
    pub json_blocks: Cache<String, serde_json::Value>,
    pub transaction_receipts: Cache<String, serde_json::Value>,

    pub address_utxos: Cache<String, Vec<Utxo>>,
    pub address_txids: Cache<String, Vec<String>>,
    pub address_balances: Cache<String, serde_json::Value>,
    pub address_summaries: Cache<String, AddressSummary>,
    pub account_info: Cache<String, serde_json::Value>,
    pub block_subsidy: Cache<i64, serde_json::Value>,
    /// Keyed by `"dgp"` / `"mining"` / `"staking"`: the singleton info
    /// entries named in `spec.md` §4.7.
    pub singleton_info: Cache<String, serde_json::Value>,
}

impl CacheRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            raw_transactions: Cache::new(capacity),
            parsed_transactions: Cache::new(capacity),
            detailed_transactions: Cache::new(capacity),
            raw_blocks: Cache::new(capacity),
            parsed_blocks: Cache::new(capacity),
            block_headers: Cache::new(capacity),
            block_overviews: Cache::new(capacity),
            json_raw_transactions: Cache::new(capacity),
            json_blocks: Cache::new(capacity),
            transaction_receipts: Cache::new(capacity),
            address_utxos: Cache::new(capacity),
            address_txids: Cache::new(capacity),
            address_balances: Cache::new(capacity),
            address_summaries: Cache::new(capacity),
            account_info: Cache::new(capacity),
            block_subsidy: Cache::new(capacity),
            singleton_info: Cache::new(capacity),
        }
    }

    pub fn invalidate_tip_sensitive(&self) {
        self.address_utxos.clear();
        self.address_txids.clear();
        self.address_balances.clear();
        self.address_summaries.clear();
        self.account_info.clear();
        self.block_subsidy.clear();
        self.singleton_info.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn concurrent_fetches_for_same_key_run_once() {
        let cache: Cache<String, i64> = Cache::new(8);
        let calls = Arc::new(AtomicUsize::new(0));

        let fetch = || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                Ok::<i64, std::convert::Infallible>(42)
            }
        };

        let (a, b) = tokio::join!(
            cache.get_or_fetch("k".to_string(), fetch.clone()),
            cache.get_or_fetch("k".to_string(), fetch.clone()),
        );

        assert_eq!(a.unwrap(), 42);
        assert_eq!(b.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_fetch_is_not_cached_and_retries() {
        let cache: Cache<String, i64> = Cache::new(8);
        let calls = Arc::new(AtomicUsize::new(0));

        let first = cache
            .get_or_fetch("k".to_string(), || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<i64, &str>("boom")
                }
            })
            .await;
        assert!(first.is_err());

        let second = cache
            .get_or_fetch("k".to_string(), || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<i64, &str>(7)
                }
            })
            .await;
        assert_eq!(second.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn invalidate_tip_sensitive_clears_only_tip_sensitive_caches() {
        let registry = CacheRegistry::new(8);
        registry.raw_blocks.insert("hash".to_string(), vec![1, 2, 3]);
        registry.address_utxos.insert("addr".to_string(), vec![]);

        registry.invalidate_tip_sensitive();

        assert!(registry.raw_blocks.get(&"hash".to_string()).is_some());
        assert!(registry.address_utxos.get(&"addr".to_string()).is_none());
    }
}
