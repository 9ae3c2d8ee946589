//! Transport abstraction between the RPC client wrapper and a concrete
//! daemon endpoint.
//!
//! A [`RpcTransport`] knows how to send one JSON-RPC request and return its
//! decoded envelope. The only production implementation is [`HttpTransport`];
//! [`mock::MockTransport`] stands in for it in unit tests, the same relation
//! `alloy_transport_http::Http` has to `alloy_transport::mock::MockTransport`.

use async_trait::async_trait;
use qtumd_jsonrpc::{Request, Response, RpcError};
use std::sync::atomic::{AtomicU64, Ordering};
use url::Url;

pub mod mock;

#[async_trait]
pub trait RpcTransport: Send + Sync + std::fmt::Debug {
    /// Send one request and return its decoded envelope.
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<Response, RpcError>;

    /// A human-readable identifier for this endpoint, used in logs and in
    /// round-robin cursor diagnostics (e.g. `http://127.0.0.1:3889`).
    fn endpoint(&self) -> &str;
}

/// An HTTP JSON-RPC transport backed by `reqwest`, authenticating with HTTP
/// basic auth as the daemon's `rpcuser`/`rpcpassword` require.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    user: String,
    password: String,
    next_id: std::sync::Arc<AtomicU64>,
}

impl HttpTransport {
    pub fn new(url: Url, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            user: user.into(),
            password: password.into(),
            next_id: std::sync::Arc::new(AtomicU64::new(0)),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<Response, RpcError> {
        let request = Request::new(method, params, self.next_id());
        tracing::trace!(method, id = request.id, "sending rpc request");

        let resp = self
            .client
            .post(self.url.clone())
            .basic_auth(&self.user, Some(&self.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| RpcError::Transport(Box::new(e)))?;

        let bytes = resp.bytes().await.map_err(|e| RpcError::Transport(Box::new(e)))?;
        serde_json::from_slice(&bytes).map_err(RpcError::Deserialize)
    }

    fn endpoint(&self) -> &str {
        self.url.as_str()
    }
}
