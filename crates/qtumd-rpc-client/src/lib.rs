//! The Node Pool: an ordered ring of daemon endpoints with round-robin
//! failover, and the thin RPC client wrapper each endpoint owns.
//!
//! Mirrors the shape of `alloy_transport::layers::fallback::FallbackService`,
//! simplified to the spec's "try each client until one succeeds, never
//! advance the cursor on success" semantics rather than latency/stability
//! scoring — see `spec.md` §4.3 and §9's Open Questions.

use qtumd_jsonrpc::RpcError;
use qtumd_transport::RpcTransport;
use serde::de::DeserializeOwned;
use std::{
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

/// One daemon the supervisor has proved reachable.
#[derive(Debug)]
pub struct NodeEndpoint {
    pub transport: Arc<dyn RpcTransport>,
    /// Set when the daemon's config had `reindex=1`; the caller should wait
    /// for `verificationprogress` before trusting this endpoint.
    pub reindex_wait: Option<Duration>,
    /// Interval at which this endpoint should be polled for a new tip while
    /// the push-channel subscriber has not yet attached (see `spec.md` §4.5).
    pub tip_update_interval: Duration,
}

impl NodeEndpoint {
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        reindex_wait: Option<Duration>,
        tip_update_interval: Duration,
    ) -> Self {
        Self { transport, reindex_wait, tip_update_interval }
    }
}

/// The ordered list of ready endpoints plus a monotonically advancing
/// round-robin cursor.
///
/// Insertions are append-only for the process lifetime (`spec.md` §3). The
/// pool is empty until at least one endpoint reports a best-block hash; the
/// caller (the Process Supervisor / connect-mode setup) is responsible for
/// only calling [`NodePool::push`] once an endpoint is proven live.
#[derive(Debug)]
pub struct NodePool {
    endpoints: parking_lot::RwLock<Vec<Arc<NodeEndpoint>>>,
    cursor: AtomicUsize,
    try_all_interval: Duration,
}

impl NodePool {
    pub fn new(try_all_interval: Duration) -> Self {
        Self {
            endpoints: parking_lot::RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            try_all_interval,
        }
    }

    pub fn push(&self, endpoint: Arc<NodeEndpoint>) {
        self.endpoints.write().push(endpoint);
    }

    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn endpoints(&self) -> Vec<Arc<NodeEndpoint>> {
        self.endpoints.read().clone()
    }

    /// Starting at the current cursor, invoke `action` against each
    /// endpoint in turn. On success, return immediately without touching the
    /// cursor. On error, wait `try_all_interval` and move on to the next
    /// endpoint. If every endpoint fails, the cursor is advanced once (so
    /// the *next independent call* starts somewhere else) and the last error
    /// is returned.
    pub async fn try_all_clients<T, F, Fut>(&self, mut action: F) -> Result<T, RpcError>
    where
        F: FnMut(Arc<NodeEndpoint>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let endpoints = self.endpoints();
        if endpoints.is_empty() {
            return Err(RpcError::Transport("node pool has no ready endpoints".into()));
        }

        let start = self.cursor.load(Ordering::SeqCst) % endpoints.len();
        let mut last_err = None;

        for offset in 0..endpoints.len() {
            let idx = (start + offset) % endpoints.len();
            let endpoint = endpoints[idx].clone();

            match action(endpoint.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tracing::debug!(
                        endpoint = endpoint.transport.endpoint(),
                        error = %err,
                        "node pool attempt failed, trying next endpoint"
                    );
                    last_err = Some(err);
                    if offset + 1 < endpoints.len() {
                        tokio::time::sleep(self.try_all_interval).await;
                    }
                }
            }
        }

        // Every endpoint failed: advance the cursor once for the next caller.
        self.cursor.fetch_add(1, Ordering::SeqCst);
        Err(last_err.expect("endpoints is non-empty"))
    }

    /// Convenience wrapper around [`NodePool::try_all_clients`] for a plain
    /// JSON-RPC method call, decoding the result into `T`.
    pub async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: serde_json::Value,
    ) -> Result<T, RpcError> {
        self.try_all_clients(|endpoint| {
            let params = params.clone();
            async move {
                let response = endpoint.transport.call(method, params).await?;
                let raw = response.into_result()?;
                serde_json::from_str(raw.get()).map_err(RpcError::Deserialize)
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qtumd_transport::mock::{Asserter, MockTransport};

    fn endpoint(name: &str, asserter: Asserter) -> Arc<NodeEndpoint> {
        Arc::new(NodeEndpoint::new(
            Arc::new(MockTransport::new(name, asserter)),
            None,
            Duration::from_millis(1),
        ))
    }

    #[tokio::test]
    async fn round_robin_failover_leaves_cursor_unchanged() {
        let pool = NodePool::new(Duration::from_millis(1));

        let a = Asserter::new();
        a.push_error(-1, "boom");
        let b = Asserter::new();
        b.push_error(-1, "boom");
        let c = Asserter::new();
        c.push_success(&"0xdeadbeef");

        pool.push(endpoint("a", a));
        pool.push(endpoint("b", b));
        pool.push(endpoint("c", c));

        let result: String = pool.call("getbestblockhash", serde_json::json!([])).await.unwrap();
        assert_eq!(result, "0xdeadbeef");

        // The cursor is unchanged: a subsequent call starting fresh still begins at endpoint a.
        let a2 = Asserter::new();
        a2.push_success(&"0xfeedface");
        let fresh_pool = NodePool::new(Duration::from_millis(1));
        fresh_pool.push(endpoint("a2", a2));
        let result2: String =
            fresh_pool.call("getbestblockhash", serde_json::json!([])).await.unwrap();
        assert_eq!(result2, "0xfeedface");
    }

    #[tokio::test]
    async fn every_endpoint_failing_returns_last_error() {
        let pool = NodePool::new(Duration::from_millis(1));
        let a = Asserter::new();
        a.push_error(-1, "first");
        let b = Asserter::new();
        b.push_error(-2, "second");
        pool.push(endpoint("a", a));
        pool.push(endpoint("b", b));

        let err = pool
            .call::<String>("getbestblockhash", serde_json::json!([]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(-2));
    }

    #[tokio::test]
    async fn exact_call_counts_per_endpoint() {
        let pool = NodePool::new(Duration::from_millis(1));
        let a = Asserter::new();
        a.push_error(-1, "boom");
        let b = Asserter::new();
        b.push_error(-1, "boom");
        let c = Asserter::new();
        c.push_success(&"0xdeadbeef");

        let transport_a = Arc::new(MockTransport::new("a", a));
        let transport_b = Arc::new(MockTransport::new("b", b));
        let transport_c = Arc::new(MockTransport::new("c", c));

        pool.push(Arc::new(NodeEndpoint::new(transport_a.clone(), None, Duration::from_millis(1))));
        pool.push(Arc::new(NodeEndpoint::new(transport_b.clone(), None, Duration::from_millis(1))));
        pool.push(Arc::new(NodeEndpoint::new(transport_c.clone(), None, Duration::from_millis(1))));

        let _: String = pool.call("getbestblockhash", serde_json::json!([])).await.unwrap();

        assert_eq!(transport_a.call_count(), 1);
        assert_eq!(transport_b.call_count(), 1);
        assert_eq!(transport_c.call_count(), 1);
    }
}
