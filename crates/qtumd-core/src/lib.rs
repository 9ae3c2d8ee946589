//! Wires the Process Supervisor, Node Pool, Push-Channel Subscriber,
//! Subscription Registry, Tip Tracker, Cache Layer, and Query Broker into
//! one service (`spec.md` §2).

pub mod broker;
pub mod cache;
pub mod error;
pub mod mempool;
pub mod model;
pub mod options;
pub mod tip;

pub use broker::{BrokerLimits, ChainPrimitives, QueryBroker};
pub use cache::CacheRegistry;
pub use error::{CoreError, ValidationError};
pub use options::QueryOptions;
pub use tip::{TipEvent, TipTracker, TipTrackerConfig};

use qtumd_bindings::{DaemonSupervisor, SpawnConfig, Timeouts};
use qtumd_pubsub::{
    AddressValidator, NotificationSink, PushChannelSubscriber, SubscriberConfig,
    SubscriptionRegistry, TransactionAddressExtractor,
};
use qtumd_rpc_client::{NodeEndpoint, NodePool};
use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;

/// Owns every long-lived component for one daemon deployment and exposes
/// the Query Broker as the single public read surface (`spec.md` §2's
/// component table).
pub struct NodeCore {
    /// `None` for connect-only deployments, which never spawn a child
    /// process and so skip the PID-file/spawn machinery entirely
    /// (`spec.md` §9).
    supervisor: Option<Arc<DaemonSupervisor>>,
    pool: Arc<NodePool>,
    cache: Arc<CacheRegistry>,
    tip: Arc<TipTracker>,
    registry: Arc<SubscriptionRegistry>,
    subscriber: Arc<PushChannelSubscriber>,
    stopping: Arc<AtomicBool>,
    broker: QueryBroker,
}

/// Everything `NodeCore::spawn_mode` / `NodeCore::connect_mode` need beyond
/// the mode-specific daemon-lifecycle configuration.
pub struct NodeCoreConfig {
    pub subscriber: SubscriberConfig,
    pub validator: Arc<dyn AddressValidator>,
    pub notifications: Arc<dyn NotificationSink>,
    pub extractor: Arc<dyn TransactionAddressExtractor>,
    pub chain: Arc<dyn ChainPrimitives>,
    pub cache_capacity: usize,
    pub tip: TipTrackerConfig,
    pub broker_limits: BrokerLimits,
    pub try_all_interval: Duration,
}

impl NodeCore {
    /// For deployments that spawn and own the daemon process (`spec.md` §4.2).
    pub fn spawn_mode(spawn: SpawnConfig, timeouts: Timeouts, config: NodeCoreConfig) -> Self {
        let supervisor = Arc::new(DaemonSupervisor::new(spawn, timeouts));
        let stopping = supervisor.shutdown_flag();
        Self::assemble(Some(supervisor), stopping, config)
    }

    /// For deployments that only connect to an already-running daemon.
    pub fn connect_mode(config: NodeCoreConfig) -> Self {
        Self::assemble(None, Arc::new(AtomicBool::new(false)), config)
    }

    fn assemble(
        supervisor: Option<Arc<DaemonSupervisor>>,
        stopping: Arc<AtomicBool>,
        config: NodeCoreConfig,
    ) -> Self {
        let pool = Arc::new(NodePool::new(config.try_all_interval));
        let cache = Arc::new(CacheRegistry::new(config.cache_capacity));
        let tip =
            Arc::new(TipTracker::new(config.tip, pool.clone(), cache.clone(), stopping.clone()));
        let registry = Arc::new(SubscriptionRegistry::new(config.validator));
        let subscriber = Arc::new(PushChannelSubscriber::new(
            config.subscriber,
            registry.clone(),
            config.notifications,
            tip.clone(),
            config.extractor,
            stopping.clone(),
        ));
        let broker = QueryBroker::new(
            pool.clone(),
            cache.clone(),
            tip.clone(),
            config.chain,
            config.broker_limits,
            stopping.clone(),
        );

        Self { supervisor, pool, cache, tip, registry, subscriber, stopping, broker }
    }

    pub fn broker(&self) -> &QueryBroker {
        &self.broker
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn tip(&self) -> &Arc<TipTracker> {
        &self.tip
    }

    pub fn pool(&self) -> &Arc<NodePool> {
        &self.pool
    }

    pub fn cache(&self) -> &Arc<CacheRegistry> {
        &self.cache
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Sets the shared `stopping` flag and, in spawn mode, signals the
    /// child to stop gracefully. Never cleared once set (`spec.md` §5).
    pub fn shutdown(&self) {
        self.stopping.store(true, std::sync::atomic::Ordering::SeqCst);
        if let Some(supervisor) = &self.supervisor {
            supervisor.shutdown();
        }
    }

    /// Connects a pre-proven endpoint directly onto the pool and attaches
    /// the push subscriber; the connect-only counterpart to `run`.
    pub async fn attach_connected(&self, endpoint: Arc<NodeEndpoint>) {
        self.pool.push(endpoint.clone());
        self.subscriber.attach_when_synced(endpoint).await;
    }

    /// Runs the process supervisor for the remainder of the process
    /// lifetime. A no-op in connect-only mode, where there is no child
    /// process to spawn or respawn.
    pub async fn run(&self) -> Result<(), CoreError> {
        let Some(supervisor) = self.supervisor.clone() else {
            return Ok(());
        };
        let push_attacher: Arc<dyn qtumd_bindings::PushAttacher> = self.subscriber.clone();
        supervisor.run(self.pool.clone(), push_attacher).await?;
        Ok(())
    }
}
