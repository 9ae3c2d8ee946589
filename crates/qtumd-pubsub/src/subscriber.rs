use crate::{
    NotificationSink, PushEvent, RecentSet, SubscriptionRegistry, TipUpdateSink,
    TransactionAddressExtractor,
};
use async_trait::async_trait;
use qtumd_rpc_client::NodeEndpoint;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Errors raised while connecting or running the push-channel subscriber.
#[derive(Debug, thiserror::Error)]
pub enum PushSubscriberError {
    #[error("could not create zmq context: {0}")]
    Context(#[source] zmq::Error),
    #[error("could not connect zmq subscriber to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: zmq::Error,
    },
    #[error("push-channel worker thread panicked")]
    WorkerPanicked,
}

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// `tcp://host:port`, matching the daemon's `zmqpubhashblock`/`zmqpubrawtx`.
    pub zmq_endpoint: String,
    /// Capacity of the duplicate-suppression sets; "order of hundreds" per `spec.md` §3.
    pub recent_capacity: usize,
    /// How often the worker thread polls the socket for new messages.
    pub poll_interval: Duration,
    /// `verificationprogress` threshold at which the push socket may attach.
    pub zmq_subscribe_progress: f64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            zmq_endpoint: String::new(),
            recent_capacity: 200,
            poll_interval: Duration::from_millis(500),
            zmq_subscribe_progress: 0.9999,
        }
    }
}

/// Attaches to one daemon's push socket, deduplicates notifications, drives
/// the tip-update protocol, and fans out to the Subscription Registry.
///
/// Before the daemon is synced enough, it polls the tip instead of
/// attaching, matching the pre-sync fallback in `spec.md` §4.5.
pub struct PushChannelSubscriber {
    config: SubscriberConfig,
    registry: Arc<SubscriptionRegistry>,
    notifications: Arc<dyn NotificationSink>,
    tip_sink: Arc<dyn TipUpdateSink>,
    extractor: Arc<dyn TransactionAddressExtractor>,
    stopping: Arc<AtomicBool>,
}

impl PushChannelSubscriber {
    pub fn new(
        config: SubscriberConfig,
        registry: Arc<SubscriptionRegistry>,
        notifications: Arc<dyn NotificationSink>,
        tip_sink: Arc<dyn TipUpdateSink>,
        extractor: Arc<dyn TransactionAddressExtractor>,
        stopping: Arc<AtomicBool>,
    ) -> Self {
        Self { config, registry, notifications, tip_sink, extractor, stopping }
    }

    /// Polls the tip, at `endpoint.tip_update_interval`, until sync progress
    /// clears `zmqSubscribeProgress`, then attaches the push socket exactly
    /// once and runs until shutdown.
    pub async fn attach_when_synced(&self, endpoint: Arc<NodeEndpoint>) {
        let mut last_hash: Option<String> = None;

        loop {
            if self.stopping.load(Ordering::SeqCst) {
                return;
            }

            let progress = fetch_verification_progress(&endpoint).await.unwrap_or(0.0);
            if progress >= self.config.zmq_subscribe_progress {
                break;
            }

            if let Ok(hash) = fetch_best_block_hash(&endpoint).await {
                if last_hash.as_deref() != Some(hash.as_str()) {
                    if let Some(array) = decode_hash(&hash) {
                        self.tip_sink.notify_block_hash(array).await;
                    }
                    last_hash = Some(hash);
                }
            }

            tokio::time::sleep(endpoint.tip_update_interval).await;
        }

        if let Err(err) = self.run_zmq_loop().await {
            tracing::error!(error = %err, "push-channel subscriber failed");
        }
    }

    async fn run_zmq_loop(&self) -> Result<(), PushSubscriberError> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<(String, Vec<u8>)>();
        let zmq_endpoint = self.config.zmq_endpoint.clone();
        let poll_interval = self.config.poll_interval;
        let stopping = self.stopping.clone();

        let worker = tokio::task::spawn_blocking(move || -> Result<(), PushSubscriberError> {
            let ctx = zmq::Context::new();
            let socket = ctx.socket(zmq::SUB).map_err(PushSubscriberError::Context)?;
            socket.connect(&zmq_endpoint).map_err(|source| PushSubscriberError::Connect {
                endpoint: zmq_endpoint.clone(),
                source,
            })?;
            let _ = socket.set_subscribe(b"hashblock");
            let _ = socket.set_subscribe(b"rawtx");

            while !stopping.load(Ordering::SeqCst) {
                let mut items = [socket.as_poll_item(zmq::POLLIN)];
                let ready = zmq::poll(&mut items, poll_interval.as_millis() as i64).unwrap_or(0);
                if ready == 0 {
                    continue;
                }
                let Ok(parts) = socket.recv_multipart(0) else { continue };
                let (Some(topic), Some(body)) = (parts.first(), parts.get(1)) else { continue };
                let topic = String::from_utf8_lossy(topic).into_owned();
                if tx.send((topic, body.clone())).is_err() {
                    break;
                }
            }
            Ok(())
        });

        let mut recent_blocks = RecentSet::new(self.config.recent_capacity);
        let mut recent_txs = RecentSet::new(self.config.recent_capacity);

        while let Some((topic, payload)) = rx.recv().await {
            match topic.as_str() {
                "hashblock" => self.handle_hashblock(&mut recent_blocks, payload).await,
                "rawtx" => self.handle_rawtx(&mut recent_txs, payload).await,
                _ => tracing::trace!(topic, "ignoring unknown push-channel topic"),
            }
        }

        match worker.await {
            Ok(inner) => inner,
            Err(_) => Err(PushSubscriberError::WorkerPanicked),
        }
    }

    async fn handle_hashblock(&self, recent: &mut RecentSet, payload: Vec<u8>) {
        let Ok(hash): Result<[u8; 32], _> = payload.as_slice().try_into() else {
            tracing::warn!(len = payload.len(), "hashblock payload was not 32 bytes");
            return;
        };
        if recent.insert_if_new(hash) {
            return;
        }

        let hash_hex = hex::encode(hash);
        for handle in self.registry.hashblock_subscribers() {
            self.notifications.notify(handle, PushEvent::Block { hash_hex: hash_hex.clone() });
        }
        self.tip_sink.notify_block_hash(hash).await;
    }

    async fn handle_rawtx(&self, recent: &mut RecentSet, payload: Vec<u8>) {
        if payload.len() < 32 {
            tracing::warn!(len = payload.len(), "rawtx payload shorter than a hash");
            return;
        }
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&payload[..32]);
        if recent.insert_if_new(hash) {
            return;
        }

        let hex_payload = hex::encode(&payload);
        for handle in self.registry.rawtransaction_subscribers() {
            self.notifications.notify(handle, PushEvent::RawTransaction { hex: hex_payload.clone() });
        }

        for address in dedup(self.extractor.addresses_in(&payload)) {
            for handle in self.registry.address_txid_subscribers(&address) {
                self.notifications.notify(
                    handle,
                    PushEvent::AddressTxid { address: address.clone(), txid_hex: hex_payload.clone() },
                );
            }
            for handle in self.registry.address_balance_subscribers(&address) {
                self.notifications.notify(
                    handle,
                    PushEvent::AddressBalance { address: address.clone(), txid_hex: hex_payload.clone() },
                );
            }
        }
    }
}

#[async_trait]
impl qtumd_bindings::PushAttacher for PushChannelSubscriber {
    async fn attach(&self, endpoint: Arc<NodeEndpoint>) {
        self.attach_when_synced(endpoint).await;
    }
}

fn dedup(addresses: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    addresses.into_iter().filter(|a| seen.insert(a.clone())).collect()
}

fn decode_hash(hash_hex: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(hash_hex).ok()?;
    bytes.as_slice().try_into().ok()
}

async fn fetch_best_block_hash(endpoint: &NodeEndpoint) -> Result<String, qtumd_jsonrpc::RpcError> {
    let response = endpoint.transport.call("getbestblockhash", serde_json::json!([])).await?;
    let raw = response.into_result()?;
    serde_json::from_str(raw.get()).map_err(qtumd_jsonrpc::RpcError::Deserialize)
}

async fn fetch_verification_progress(endpoint: &NodeEndpoint) -> Result<f64, qtumd_jsonrpc::RpcError> {
    let response = endpoint.transport.call("getblockchaininfo", serde_json::json!([])).await?;
    let raw = response.into_result()?;
    let value: serde_json::Value =
        serde_json::from_str(raw.get()).map_err(qtumd_jsonrpc::RpcError::Deserialize)?;
    Ok(value.get("verificationprogress").and_then(|v| v.as_f64()).unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AcceptAllAddresses;
    use std::sync::Mutex;

    struct RecordingSink {
        events: Mutex<Vec<(SubscriberHandle, String)>>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { events: Mutex::new(Vec::new()) }
        }
    }

    impl NotificationSink for RecordingSink {
        fn notify(&self, handle: crate::SubscriberHandle, event: PushEvent) {
            self.events.lock().unwrap().push((handle, event.topic().to_string()));
        }
    }

    struct NoopTipSink;
    #[async_trait]
    impl TipUpdateSink for NoopTipSink {
        async fn notify_block_hash(&self, _hash: [u8; 32]) {}
    }

    struct FixedAddresses(Vec<String>);
    impl TransactionAddressExtractor for FixedAddresses {
        fn addresses_in(&self, _raw_tx: &[u8]) -> Vec<String> {
            self.0.clone()
        }
    }

    use crate::SubscriberHandle;

    #[tokio::test]
    async fn duplicate_hashblock_notifies_once() {
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(AcceptAllAddresses)));
        let handle = SubscriberHandle::from_raw(1);
        registry.subscribe_hashblock(handle);
        let sink = Arc::new(RecordingSink::new());

        let subscriber = PushChannelSubscriber::new(
            SubscriberConfig::default(),
            registry,
            sink.clone(),
            Arc::new(NoopTipSink),
            Arc::new(FixedAddresses(vec![])),
            Arc::new(AtomicBool::new(false)),
        );

        let mut recent = RecentSet::new(10);
        let payload = vec![9u8; 32];
        subscriber.handle_hashblock(&mut recent, payload.clone()).await;
        subscriber.handle_hashblock(&mut recent, payload).await;

        assert_eq!(sink.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rawtx_fans_out_to_address_subscribers() {
        let registry = Arc::new(SubscriptionRegistry::new(Arc::new(AcceptAllAddresses)));
        let handle = SubscriberHandle::from_raw(1);
        registry.subscribe_address_txid(handle, &["qAddr".to_string()]);
        let sink = Arc::new(RecordingSink::new());

        let subscriber = PushChannelSubscriber::new(
            SubscriberConfig::default(),
            registry,
            sink.clone(),
            Arc::new(NoopTipSink),
            Arc::new(FixedAddresses(vec!["qAddr".to_string()])),
            Arc::new(AtomicBool::new(false)),
        );

        let mut recent = RecentSet::new(10);
        let mut payload = vec![1u8; 32];
        payload.extend_from_slice(b"rest of the raw tx bytes");
        subscriber.handle_rawtx(&mut recent, payload).await;

        let events = sink.events.lock().unwrap();
        assert!(events.iter().any(|(_, topic)| topic == "qtumd/addresstxid"));
        assert!(events.iter().any(|(_, topic)| topic == "qtumd/rawtransaction"));
    }
}
