/// Errors raised by public Query Broker operations (`spec.md` §3 pagination
/// fields, §4.8).
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("address count {count} exceeds the configured maximum of {max}")]
    TooManyAddresses { count: usize, max: usize },
    #[error("pagination range [{from}, {to}) is invalid: `from` must be < `to`")]
    OutOfOrderRange { from: u64, to: u64 },
    #[error("pagination range [{from}, {to}) spans {span} entries, exceeding the maximum of {max}")]
    RangeTooWide { from: u64, to: u64, span: u64, max: u64 },
}

/// The core's top-level error taxonomy, aggregating every kind named in
/// `spec.md` §7.
///
/// `Rpc` holds an `Arc` rather than an owned `RpcError` because cache
/// single-flight fetches (`cache.rs`) share one fetch failure across every
/// waiter that arrived while it was in flight.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0}")]
    Rpc(std::sync::Arc<qtumd_jsonrpc::RpcError>),
    #[error(transparent)]
    Configuration(#[from] qtumd_config::ConfigurationError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Supervisor(#[from] qtumd_bindings::SupervisorError),
    #[error("operation rejected: the service is shutting down")]
    ShuttingDown,
}

impl From<qtumd_jsonrpc::RpcError> for CoreError {
    fn from(err: qtumd_jsonrpc::RpcError) -> Self {
        Self::Rpc(std::sync::Arc::new(err))
    }
}

impl From<std::sync::Arc<qtumd_jsonrpc::RpcError>> for CoreError {
    fn from(err: std::sync::Arc<qtumd_jsonrpc::RpcError>) -> Self {
        Self::Rpc(err)
    }
}
