//! A transport that replays pre-scripted responses, for unit tests that
//! exercise the RPC client wrapper and Node Pool without a running daemon.

use crate::RpcTransport;
use async_trait::async_trait;
use qtumd_jsonrpc::{ErrorObject, Response, RpcError};
use serde::Serialize;
use serde_json::value::RawValue;
use std::{collections::VecDeque, sync::Arc};

/// Container for pushing canned responses into a [`MockTransport`], FIFO.
#[derive(Debug, Clone, Default)]
pub struct Asserter {
    responses: Arc<parking_lot::Mutex<VecDeque<Response>>>,
}

impl Asserter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_success<T: Serialize>(&self, value: &T) {
        let raw = RawValue::from_string(serde_json::to_string(value).unwrap()).unwrap();
        self.push(Response { result: Some(raw), error: None, id: Some(0) });
    }

    pub fn push_error(&self, code: i64, message: impl Into<String>) {
        self.push(Response {
            result: None,
            error: Some(ErrorObject { code, message: message.into() }),
            id: Some(0),
        });
    }

    pub fn push(&self, response: Response) {
        self.responses.lock().push_back(response);
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().len()
    }
}

/// A transport whose [`RpcTransport::call`] pops from an [`Asserter`] queue.
#[derive(Debug, Clone)]
pub struct MockTransport {
    endpoint: String,
    asserter: Asserter,
    pub calls: Arc<parking_lot::Mutex<Vec<String>>>,
}

impl MockTransport {
    pub fn new(endpoint: impl Into<String>, asserter: Asserter) -> Self {
        Self { endpoint: endpoint.into(), asserter, calls: Arc::new(parking_lot::Mutex::new(Vec::new())) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl RpcTransport for MockTransport {
    async fn call(&self, method: &str, _params: serde_json::Value) -> Result<Response, RpcError> {
        self.calls.lock().push(method.to_string());
        self.asserter
            .responses
            .lock()
            .pop_front()
            .ok_or_else(|| RpcError::Transport("empty asserter response queue".into()))
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}
