use crate::handle::SubscriberHandle;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use std::sync::Arc;

/// Validates an address string against the configured network. Address
/// decoding itself is a chain-primitives concern and lives outside this
/// crate; the registry only needs a yes/no answer.
pub trait AddressValidator: Send + Sync {
    fn is_valid(&self, address: &str) -> bool;
}

/// Accepts every address unchanged. Useful for tests and for deployments
/// that validate elsewhere.
#[derive(Debug, Default)]
pub struct AcceptAllAddresses;

impl AddressValidator for AcceptAllAddresses {
    fn is_valid(&self, _address: &str) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct Topics {
    hashblock: IndexSet<SubscriberHandle>,
    rawtransaction: IndexSet<SubscriberHandle>,
    addresstxid: IndexMap<String, IndexSet<SubscriberHandle>>,
    addressbalance: IndexMap<String, IndexSet<SubscriberHandle>>,
}

/// Per-topic and per-address subscriber bookkeeping (`spec.md` §3, §4.9).
///
/// A handle appears at most once per (topic, address) pair; subscribing
/// twice is a no-op, and unsubscribing an unknown handle is a silent no-op.
/// Empty address buckets are removed immediately.
#[derive(Debug)]
pub struct SubscriptionRegistry {
    topics: RwLock<Topics>,
    validator: Arc<dyn AddressValidator>,
}

impl SubscriptionRegistry {
    pub fn new(validator: Arc<dyn AddressValidator>) -> Self {
        Self { topics: RwLock::new(Topics::default()), validator }
    }

    pub fn subscribe_hashblock(&self, handle: SubscriberHandle) {
        self.topics.write().hashblock.insert(handle);
    }

    pub fn unsubscribe_hashblock(&self, handle: SubscriberHandle) {
        self.topics.write().hashblock.shift_remove(&handle);
    }

    pub fn subscribe_rawtransaction(&self, handle: SubscriberHandle) {
        self.topics.write().rawtransaction.insert(handle);
    }

    pub fn unsubscribe_rawtransaction(&self, handle: SubscriberHandle) {
        self.topics.write().rawtransaction.shift_remove(&handle);
    }

    /// Subscribes `handle` to `addresstxid` notifications for each valid
    /// address in `addresses`; invalid addresses are dropped with a log entry.
    pub fn subscribe_address_txid(&self, handle: SubscriberHandle, addresses: &[String]) {
        self.subscribe_address(handle, addresses, |t| &mut t.addresstxid);
    }

    pub fn unsubscribe_address_txid(&self, handle: SubscriberHandle, addresses: Option<&[String]>) {
        self.unsubscribe_address(handle, addresses, |t| &mut t.addresstxid);
    }

    pub fn subscribe_address_balance(&self, handle: SubscriberHandle, addresses: &[String]) {
        self.subscribe_address(handle, addresses, |t| &mut t.addressbalance);
    }

    pub fn unsubscribe_address_balance(&self, handle: SubscriberHandle, addresses: Option<&[String]>) {
        self.unsubscribe_address(handle, addresses, |t| &mut t.addressbalance);
    }

    /// Removes `handle` from every topic and address bucket at once. Used by
    /// the host's connection-close path.
    pub fn unsubscribe_all(&self, handle: SubscriberHandle) {
        let mut topics = self.topics.write();
        topics.hashblock.shift_remove(&handle);
        topics.rawtransaction.shift_remove(&handle);
        remove_from_all_buckets(&mut topics.addresstxid, handle);
        remove_from_all_buckets(&mut topics.addressbalance, handle);
    }

    pub fn hashblock_subscribers(&self) -> Vec<SubscriberHandle> {
        self.topics.read().hashblock.iter().copied().collect()
    }

    pub fn rawtransaction_subscribers(&self) -> Vec<SubscriberHandle> {
        self.topics.read().rawtransaction.iter().copied().collect()
    }

    pub fn address_txid_subscribers(&self, address: &str) -> Vec<SubscriberHandle> {
        self.topics
            .read()
            .addresstxid
            .get(address)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn address_balance_subscribers(&self, address: &str) -> Vec<SubscriberHandle> {
        self.topics
            .read()
            .addressbalance
            .get(address)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    fn subscribe_address(
        &self,
        handle: SubscriberHandle,
        addresses: &[String],
        bucket: impl Fn(&mut Topics) -> &mut IndexMap<String, IndexSet<SubscriberHandle>>,
    ) {
        let mut topics = self.topics.write();
        for address in addresses {
            if !self.validator.is_valid(address) {
                tracing::warn!(address, "ignoring subscribe for invalid address");
                continue;
            }
            bucket(&mut topics).entry(address.clone()).or_default().insert(handle);
        }
    }

    fn unsubscribe_address(
        &self,
        handle: SubscriberHandle,
        addresses: Option<&[String]>,
        bucket: impl Fn(&mut Topics) -> &mut IndexMap<String, IndexSet<SubscriberHandle>>,
    ) {
        let mut topics = self.topics.write();
        let map = bucket(&mut topics);
        match addresses {
            Some(addresses) => {
                for address in addresses {
                    remove_one(map, address, handle);
                }
            }
            None => remove_from_all_buckets(map, handle),
        }
    }
}

fn remove_one(map: &mut IndexMap<String, IndexSet<SubscriberHandle>>, address: &str, handle: SubscriberHandle) {
    if let Some(set) = map.get_mut(address) {
        set.shift_remove(&handle);
        if set.is_empty() {
            map.shift_remove(address);
        }
    }
}

fn remove_from_all_buckets(map: &mut IndexMap<String, IndexSet<SubscriberHandle>>, handle: SubscriberHandle) {
    map.retain(|_, set| {
        set.shift_remove(&handle);
        !set.is_empty()
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SubscriptionRegistry {
        SubscriptionRegistry::new(Arc::new(AcceptAllAddresses))
    }

    #[test]
    fn subscribe_is_idempotent() {
        let reg = registry();
        let h = SubscriberHandle::from_raw(1);
        reg.subscribe_hashblock(h);
        reg.subscribe_hashblock(h);
        assert_eq!(reg.hashblock_subscribers(), vec![h]);
    }

    #[test]
    fn subscribe_then_unsubscribe_returns_to_prior_state() {
        let reg = registry();
        let h = SubscriberHandle::from_raw(1);
        reg.subscribe_hashblock(h);
        reg.unsubscribe_hashblock(h);
        assert!(reg.hashblock_subscribers().is_empty());
    }

    #[test]
    fn empty_address_bucket_is_removed() {
        let reg = registry();
        let h = SubscriberHandle::from_raw(1);
        reg.subscribe_address_txid(h, &["qAddr1".to_string()]);
        assert_eq!(reg.address_txid_subscribers("qAddr1"), vec![h]);

        reg.unsubscribe_address_txid(h, None);
        assert!(reg.address_txid_subscribers("qAddr1").is_empty());
        assert!(reg.topics.read().addresstxid.is_empty());
    }

    #[test]
    fn unsubscribe_unknown_handle_is_a_silent_noop() {
        let reg = registry();
        reg.unsubscribe_hashblock(SubscriberHandle::from_raw(99));
        reg.unsubscribe_address_balance(SubscriberHandle::from_raw(99), None);
    }

    #[test]
    fn unsubscribe_all_clears_every_topic() {
        let reg = registry();
        let h = SubscriberHandle::from_raw(1);
        reg.subscribe_hashblock(h);
        reg.subscribe_rawtransaction(h);
        reg.subscribe_address_txid(h, &["addr".to_string()]);
        reg.subscribe_address_balance(h, &["addr".to_string()]);

        reg.unsubscribe_all(h);

        assert!(reg.hashblock_subscribers().is_empty());
        assert!(reg.rawtransaction_subscribers().is_empty());
        assert!(reg.address_txid_subscribers("addr").is_empty());
        assert!(reg.address_balance_subscribers("addr").is_empty());
    }

    #[test]
    fn invalid_address_is_ignored() {
        struct RejectAll;
        impl AddressValidator for RejectAll {
            fn is_valid(&self, _address: &str) -> bool {
                false
            }
        }
        let reg = SubscriptionRegistry::new(Arc::new(RejectAll));
        let h = SubscriberHandle::from_raw(1);
        reg.subscribe_address_txid(h, &["bogus".to_string()]);
        assert!(reg.address_txid_subscribers("bogus").is_empty());
    }
}
