use std::{path::PathBuf, time::Duration};

/// Tunable timeouts for the spawn, retry, and shutdown protocols (`spec.md` §5).
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub try_all_interval: Duration,
    pub start_retry_interval: Duration,
    pub start_retry_attempts: u32,
    pub spawn_stop_time: Duration,
    pub shutdown_timeout: Duration,
    pub spawn_restart_time: Duration,
    pub reindex_wait_interval: Duration,
    /// `verificationprogress` threshold at which a reindexing daemon is
    /// considered caught up.
    pub reindex_threshold: f64,
    /// How often a [`NodeEndpoint`](qtumd_rpc_client::NodeEndpoint) should be
    /// polled for a new tip before the push-channel subscriber attaches
    /// (`spec.md` §3, §4.5's `tip-update-interval`).
    pub tip_update_interval: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            try_all_interval: Duration::from_secs(1),
            start_retry_interval: Duration::from_secs(5),
            start_retry_attempts: 60,
            spawn_stop_time: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(15),
            spawn_restart_time: Duration::from_secs(5),
            reindex_wait_interval: Duration::from_secs(5),
            reindex_threshold: 0.9999,
            tip_update_interval: Duration::from_secs(5),
        }
    }
}

/// Everything the supervisor needs to launch and reach one local daemon.
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    pub executable: PathBuf,
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
    /// `--testnet` / `--regtest`, or `None` for livenet.
    pub network_flag: Option<&'static str>,
    pub rpc_url: url::Url,
    pub rpc_user: String,
    pub rpc_password: String,
    pub pid_file: PathBuf,
    pub reindex: bool,
}
