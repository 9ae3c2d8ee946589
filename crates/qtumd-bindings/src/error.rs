/// Errors raised while spawning or supervising the daemon process.
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("could not spawn daemon executable at {path}: {source}")]
    Spawn {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("daemon did not become responsive after {attempts} attempts")]
    NotResponsive { attempts: u32 },
    #[error("stale PID {pid} could not be cleared: {source}")]
    StalePidNotCleared {
        pid: i32,
        #[source]
        source: std::io::Error,
    },
    #[error("daemon did not stop gracefully within {timeout_secs}s")]
    GracefulStopTimeout { timeout_secs: u64 },
    #[error("neither spawn nor connect configuration was provided")]
    NoEndpointsConfigured,
    #[error(transparent)]
    Rpc(#[from] qtumd_jsonrpc::RpcError),
}
