//! The Tip Tracker: owns `height`/`genesis`, coalesces rapid block
//! notifications into a bounded number of updates, and invalidates
//! tip-sensitive caches (`spec.md` §4.6).

use crate::cache::CacheRegistry;
use async_trait::async_trait;
use qtumd_rpc_client::NodePool;
use std::{
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
pub enum TipEvent {
    Tip { height: i64 },
    Synced,
}

#[derive(Debug, Clone, Copy)]
pub struct TipTrackerConfig {
    /// The quiet period a burst of block notifications collapses into at
    /// most one trailing update after the leading one (`spec.md` §9 leaves
    /// the exact value unspecified; this only needs to keep 50 synchronous
    /// notifications to ≤ 2 resolutions).
    pub coalescing_window: Duration,
    pub synced_threshold: f64,
}

impl Default for TipTrackerConfig {
    fn default() -> Self {
        Self { coalescing_window: Duration::from_millis(50), synced_threshold: 99.50 }
    }
}

#[derive(Default)]
struct Pending {
    scheduled: bool,
    latest_hash: Option<String>,
}

pub struct TipTracker {
    config: TipTrackerConfig,
    height: AtomicI64,
    genesis: parking_lot::RwLock<Option<Vec<u8>>>,
    last_resolved_hash: parking_lot::Mutex<Option<String>>,
    pending: Mutex<Pending>,
    pool: Arc<NodePool>,
    cache: Arc<CacheRegistry>,
    events: tokio::sync::broadcast::Sender<TipEvent>,
    stopping: Arc<AtomicBool>,
}

impl TipTracker {
    pub fn new(
        config: TipTrackerConfig,
        pool: Arc<NodePool>,
        cache: Arc<CacheRegistry>,
        stopping: Arc<AtomicBool>,
    ) -> Self {
        let (events, _) = tokio::sync::broadcast::channel(64);
        Self {
            config,
            height: AtomicI64::new(-1),
            genesis: parking_lot::RwLock::new(None),
            last_resolved_hash: parking_lot::Mutex::new(None),
            pending: Mutex::new(Pending::default()),
            pool,
            cache,
            events,
            stopping,
        }
    }

    pub fn height(&self) -> i64 {
        self.height.load(Ordering::SeqCst)
    }

    /// Set exactly once at startup; later calls are ignored.
    pub fn set_genesis(&self, bytes: Vec<u8>) {
        let mut genesis = self.genesis.write();
        if genesis.is_none() {
            *genesis = Some(bytes);
        }
    }

    pub fn genesis(&self) -> Option<Vec<u8>> {
        self.genesis.read().clone()
    }

    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<TipEvent> {
        self.events.subscribe()
    }

    pub async fn sync_percentage(&self) -> Result<f64, qtumd_jsonrpc::RpcError> {
        let info: serde_json::Value =
            self.pool.call("getblockchaininfo", serde_json::json!([])).await?;
        Ok(info.get("verificationprogress").and_then(|v| v.as_f64()).unwrap_or(0.0) * 100.0)
    }

    pub async fn is_synced(&self) -> Result<bool, qtumd_jsonrpc::RpcError> {
        Ok(self.sync_percentage().await? >= self.config.synced_threshold)
    }

    /// Entry point for a freshly-seen block hash. Implements the
    /// leading-edge-immediate, trailing-edge-once coalescing scheme: the
    /// first notification in a burst resolves right away; any notifications
    /// that land before the window elapses fold into a single follow-up
    /// resolution of the latest hash once the window closes.
    pub async fn on_block_hash(&self, hash_hex: String) {
        let mut pending = self.pending.lock().await;
        pending.latest_hash = Some(hash_hex.clone());
        if pending.scheduled {
            return;
        }
        pending.scheduled = true;
        drop(pending);

        self.resolve_tip(&hash_hex).await;

        tokio::time::sleep(self.config.coalescing_window).await;

        let trailing = {
            let mut pending = self.pending.lock().await;
            pending.scheduled = false;
            match pending.latest_hash.take() {
                Some(latest) if latest != hash_hex => Some(latest),
                _ => None,
            }
        };

        if let Some(latest) = trailing {
            self.resolve_tip(&latest).await;
        }
    }

    async fn resolve_tip(&self, hash_hex: &str) {
        {
            let mut last = self.last_resolved_hash.lock();
            if last.as_deref() == Some(hash_hex) {
                return;
            }
            *last = Some(hash_hex.to_string());
        }

        let block: serde_json::Value =
            match self.pool.call("getblock", serde_json::json!([hash_hex])).await {
                Ok(block) => block,
                Err(err) => {
                    tracing::warn!(hash = hash_hex, error = %err, "failed to resolve new tip");
                    return;
                }
            };

        let height = block.get("height").and_then(|v| v.as_i64()).unwrap_or(self.height());
        self.height.store(height, Ordering::SeqCst);
        self.cache.invalidate_tip_sensitive();

        let _ = self.events.send(TipEvent::Tip { height });

        if self.stopping.load(Ordering::SeqCst) {
            return;
        }
        match self.sync_percentage().await {
            Ok(pct) if pct >= 100.0 => {
                let _ = self.events.send(TipEvent::Synced);
            }
            Ok(_) => {}
            Err(err) => tracing::debug!(error = %err, "failed to check sync percentage after tip update"),
        }
    }
}

#[async_trait]
impl qtumd_pubsub::TipUpdateSink for TipTracker {
    async fn notify_block_hash(&self, hash: [u8; 32]) {
        self.on_block_hash(hex::encode(hash)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheRegistry;
    use qtumd_transport::mock::{Asserter, MockTransport};
    use std::sync::Arc;

    fn pool_with_block_response(height: i64) -> Arc<NodePool> {
        let pool = NodePool::new(Duration::from_millis(1));
        let asserter = Asserter::new();
        // 50 bursts share one hash in the coalescing test; each resolution
        // re-asks for the block, so queue a generous number of responses.
        for _ in 0..4 {
            asserter.push_success(&serde_json::json!({"height": height}));
        }
        pool.push(Arc::new(qtumd_rpc_client::NodeEndpoint::new(
            Arc::new(MockTransport::new("a", asserter)),
            None,
            Duration::from_secs(1),
        )));
        Arc::new(pool)
    }

    #[tokio::test]
    async fn second_update_for_same_hash_is_a_noop() {
        let pool = pool_with_block_response(10);
        let cache = Arc::new(CacheRegistry::new(16));
        let tracker = TipTracker::new(
            TipTrackerConfig { coalescing_window: Duration::from_millis(5), ..Default::default() },
            pool,
            cache,
            Arc::new(AtomicBool::new(true)),
        );

        tracker.resolve_tip("abc").await;
        assert_eq!(tracker.height(), 10);
        tracker.resolve_tip("abc").await;
        assert_eq!(tracker.height(), 10);
    }

    #[tokio::test]
    async fn genesis_is_set_exactly_once() {
        let pool = pool_with_block_response(0);
        let cache = Arc::new(CacheRegistry::new(16));
        let tracker = TipTracker::new(
            TipTrackerConfig::default(),
            pool,
            cache,
            Arc::new(AtomicBool::new(true)),
        );
        tracker.set_genesis(vec![1, 2, 3]);
        tracker.set_genesis(vec![9, 9, 9]);
        assert_eq!(tracker.genesis(), Some(vec![1, 2, 3]));
    }

    /// Concrete Scenario #3: 50 rapid notifications for the same hash,
    /// fired concurrently, produce at most 2 tip-update invocations.
    #[tokio::test]
    async fn fifty_rapid_same_hash_notifications_coalesce() {
        let pool = pool_with_block_response(42);
        let cache = Arc::new(CacheRegistry::new(16));
        let stopping = Arc::new(AtomicBool::new(true));
        let tracker = Arc::new(TipTracker::new(
            TipTrackerConfig { coalescing_window: Duration::from_millis(20), ..Default::default() },
            pool,
            cache,
            stopping,
        ));

        let mut events = tracker.subscribe_events();
        let mut handles = Vec::new();
        for _ in 0..50 {
            let tracker = tracker.clone();
            handles.push(tokio::spawn(async move {
                tracker.on_block_hash("deadbeef".to_string()).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let mut tip_events = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, TipEvent::Tip { .. }) {
                tip_events += 1;
            }
        }
        assert_eq!(tip_events, 1);
        assert_eq!(tracker.height(), 42);
    }
}
