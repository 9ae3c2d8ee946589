//! Wire types for the daemon's JSON-RPC protocol.
//!
//! The daemon speaks a Bitcoin Core-style JSON-RPC 1.0 dialect: a request is
//! `{method, params, id}` and a response is always `{result, error, id}` with
//! exactly one of `result`/`error` populated.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

mod error;
pub use error::{ErrorObject, RpcError};

/// A request envelope sent to the daemon.
#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    pub method: &'a str,
    pub params: serde_json::Value,
    pub id: u64,
}

impl<'a> Request<'a> {
    pub fn new(method: &'a str, params: serde_json::Value, id: u64) -> Self {
        Self { method, params, id }
    }
}

/// A response envelope received from the daemon.
///
/// Exactly one of `result`/`error` is expected to be non-null; both being
/// null (e.g. a subscription ack) is tolerated and surfaced as `RpcError::NullResult`
/// by callers that require a value.
#[derive(Debug, Clone, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub result: Option<Box<RawValue>>,
    #[serde(default)]
    pub error: Option<ErrorObject>,
    #[serde(default)]
    pub id: Option<u64>,
}

impl Response {
    /// Split the envelope into a `Result`, discarding the id.
    pub fn into_result(self) -> Result<Box<RawValue>, RpcError> {
        if let Some(err) = self.error {
            return Err(RpcError::Server(err));
        }
        self.result.ok_or(RpcError::NullResult)
    }
}
