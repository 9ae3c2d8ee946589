//! Push-channel subscriber and subscription registry (`spec.md` §4.5, §4.9).
//!
//! Grounded on the broadcast-channel fan-out `alloy-pubsub`'s
//! `ActiveSubscription` uses, adapted from "one broadcast channel per
//! subscription request" to "one registry keyed by (topic, address) with
//! opaque subscriber handles" per the redesign spec §9 calls for.

mod handle;
mod recent;
mod registry;
mod subscriber;

pub use handle::{HandleAllocator, SubscriberHandle};
pub use recent::RecentSet;
pub use registry::{AcceptAllAddresses, AddressValidator, SubscriptionRegistry};
pub use subscriber::{PushChannelSubscriber, PushSubscriberError, SubscriberConfig};

use async_trait::async_trait;

/// One fanned-out notification, named by the wire convention in `spec.md` §6.
#[derive(Debug, Clone)]
pub enum PushEvent {
    Block { hash_hex: String },
    RawTransaction { hex: String },
    AddressTxid { address: String, txid_hex: String },
    AddressBalance { address: String, txid_hex: String },
}

impl PushEvent {
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::Block { .. } => "qtumd/hashblock",
            Self::RawTransaction { .. } => "qtumd/rawtransaction",
            Self::AddressTxid { .. } => "qtumd/addresstxid",
            Self::AddressBalance { .. } => "qtumd/addressbalance",
        }
    }
}

/// Delivers one notification to one subscriber. The actual transport to the
/// connected client (WebSocket frame, callback, ...) is an external
/// collaborator per `spec.md` §1.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, handle: SubscriberHandle, event: PushEvent);
}

/// Invoked on every new, non-duplicate block hash, so the Tip Tracker can run
/// its update protocol without this crate depending on it directly.
#[async_trait]
pub trait TipUpdateSink: Send + Sync {
    async fn notify_block_hash(&self, hash: [u8; 32]);
}

/// Extracts the distinct addresses touched by a raw transaction. Transaction
/// parsing is a chain-primitives concern, out of scope per `spec.md` §1; a
/// real deployment supplies this from that library.
pub trait TransactionAddressExtractor: Send + Sync {
    fn addresses_in(&self, raw_tx: &[u8]) -> Vec<String>;
}
