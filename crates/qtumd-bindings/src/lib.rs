//! The Process Supervisor: spawns the daemon, waits for it to become
//! reachable, recovers a stale PID file left by a previous run, and
//! respawns it across unexpected exits until told to shut down.
//!
//! Modelled on the lifecycle `alloy-node-bindings` drives for `geth`
//! (spawn, wait for a ready line, kill on drop), adapted to the async
//! world: readiness here is proven by a successful RPC call rather than a
//! stderr pattern match, since the daemon's RPC port is this service's
//! actual dependency.

pub mod config;
pub mod error;
mod pidfile;

pub use config::{SpawnConfig, Timeouts};
pub use error::SupervisorError;

use async_trait::async_trait;
use qtumd_rpc_client::NodeEndpoint;
use qtumd_transport::HttpTransport;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;
use tokio::process::{Child, Command};

/// Invoked once a spawned (or connected) endpoint has proven reachable, so
/// the push-channel subscriber can attach without this crate depending on
/// it directly.
#[async_trait]
pub trait PushAttacher: Send + Sync {
    async fn attach(&self, endpoint: Arc<NodeEndpoint>);
}

/// A [`PushAttacher`] that does nothing, for connect-only deployments or tests.
#[derive(Debug, Default)]
pub struct NoopPushAttacher;

#[async_trait]
impl PushAttacher for NoopPushAttacher {
    async fn attach(&self, _endpoint: Arc<NodeEndpoint>) {}
}

/// Owns one local daemon's lifecycle: spawn, readiness wait, optional
/// reindex wait, and graceful stop.
#[derive(Debug)]
pub struct DaemonSupervisor {
    config: SpawnConfig,
    timeouts: Timeouts,
    stopping: Arc<AtomicBool>,
}

impl DaemonSupervisor {
    pub fn new(config: SpawnConfig, timeouts: Timeouts) -> Self {
        Self { config, timeouts, stopping: Arc::new(AtomicBool::new(false)) }
    }

    /// A shared flag other components can poll to learn the service is
    /// shutting down, per the single `stopping` flag named in `spec.md` §5.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        self.stopping.clone()
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Sets the shutdown flag. Never cleared once set.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    /// Runs one full spawn sequence: stale-PID cleanup, launch, tip-load
    /// retry loop, optional reindex wait, push-socket attach. Returns the
    /// live child handle and the endpoint ready to be pushed onto the pool.
    pub async fn spawn(
        &self,
        push_attacher: &dyn PushAttacher,
    ) -> Result<(Child, Arc<NodeEndpoint>), SupervisorError> {
        self.clear_stale_pid().await?;

        let mut command = Command::new(&self.config.executable);
        command
            .arg(format!("--conf={}", self.config.config_path.display()))
            .arg(format!("--datadir={}", self.config.data_dir.display()))
            .stdin(std::process::Stdio::inherit())
            .stdout(std::process::Stdio::inherit())
            .stderr(std::process::Stdio::inherit());
        if let Some(flag) = self.config.network_flag {
            command.arg(flag);
        }

        let child = command.spawn().map_err(|source| SupervisorError::Spawn {
            path: self.config.executable.clone(),
            source,
        })?;

        let transport = Arc::new(HttpTransport::new(
            self.config.rpc_url.clone(),
            self.config.rpc_user.clone(),
            self.config.rpc_password.clone(),
        ));
        let reindex_wait = self.config.reindex.then_some(self.timeouts.reindex_wait_interval);
        let endpoint =
            Arc::new(NodeEndpoint::new(transport, reindex_wait, self.timeouts.tip_update_interval));

        self.wait_for_tip(&endpoint).await?;

        if self.config.reindex {
            self.wait_for_reindex(&endpoint).await?;
        }

        push_attacher.attach(endpoint.clone()).await;

        Ok((child, endpoint))
    }

    /// Spawns and then supervises for the remainder of the process
    /// lifetime: on unexpected exit, waits `spawnRestartTime` and respawns,
    /// unless [`DaemonSupervisor::shutdown`] has been called.
    pub async fn run(
        self: Arc<Self>,
        pool: Arc<qtumd_rpc_client::NodePool>,
        push_attacher: Arc<dyn PushAttacher>,
    ) -> Result<(), SupervisorError> {
        loop {
            let (mut child, endpoint) = self.spawn(push_attacher.as_ref()).await?;
            pool.push(endpoint);

            let status = child.wait().await;
            if self.is_stopping() {
                return Ok(());
            }

            tracing::warn!(?status, "daemon exited unexpectedly, respawning");
            tokio::time::sleep(self.timeouts.spawn_restart_time).await;
        }
    }

    /// Sends the graceful-termination signal and waits up to
    /// `shutdownTimeout` for the child to exit.
    pub async fn graceful_stop(&self, child: &mut Child) -> Result<(), SupervisorError> {
        if let Some(pid) = child.id() {
            let _ = pidfile::send_graceful_stop(pid as i32);
        }
        match tokio::time::timeout(self.timeouts.shutdown_timeout, child.wait()).await {
            Ok(_) => Ok(()),
            Err(_) => Err(SupervisorError::GracefulStopTimeout {
                timeout_secs: self.timeouts.shutdown_timeout.as_secs(),
            }),
        }
    }

    async fn clear_stale_pid(&self) -> Result<(), SupervisorError> {
        let Some(pid) = pidfile::read_pid(&self.config.pid_file) else {
            return Ok(());
        };
        if !pidfile::is_running(pid) {
            return Ok(());
        }

        tracing::info!(pid, "stale daemon process found, sending graceful stop");
        pidfile::send_graceful_stop(pid)
            .map_err(|source| SupervisorError::StalePidNotCleared { pid, source })?;

        let deadline = tokio::time::Instant::now() + self.timeouts.spawn_stop_time;
        while pidfile::is_running(pid) {
            if tokio::time::Instant::now() >= deadline {
                return Err(SupervisorError::StalePidNotCleared {
                    pid,
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "stale process did not exit in time",
                    ),
                });
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }

        Ok(())
    }

    async fn wait_for_tip(&self, endpoint: &Arc<NodeEndpoint>) -> Result<(), SupervisorError> {
        for attempt in 1..=self.timeouts.start_retry_attempts {
            if self.is_stopping() {
                return Ok(());
            }
            match endpoint.transport.call("getbestblockhash", serde_json::json!([])).await {
                Ok(response) => match response.into_result() {
                    Ok(_) => return Ok(()),
                    Err(err) if err.is_retryable() => {
                        tracing::debug!(attempt, "daemon still warming up");
                    }
                    Err(err) => return Err(SupervisorError::Rpc(err)),
                },
                Err(err) => tracing::debug!(attempt, error = %err, "tip load attempt failed"),
            }
            tokio::time::sleep(self.timeouts.start_retry_interval).await;
        }
        Err(SupervisorError::NotResponsive { attempts: self.timeouts.start_retry_attempts })
    }

    async fn wait_for_reindex(&self, endpoint: &Arc<NodeEndpoint>) -> Result<(), SupervisorError> {
        loop {
            if self.is_stopping() {
                return Ok(());
            }

            let response = endpoint
                .transport
                .call("getblockchaininfo", serde_json::json!([]))
                .await
                .map_err(SupervisorError::Rpc)?;
            let raw = response.into_result().map_err(SupervisorError::Rpc)?;
            let info: serde_json::Value = serde_json::from_str(raw.get())
                .map_err(|e| SupervisorError::Rpc(qtumd_jsonrpc::RpcError::Deserialize(e)))?;

            let progress =
                info.get("verificationprogress").and_then(|v| v.as_f64()).unwrap_or(0.0);
            if progress >= self.timeouts.reindex_threshold {
                return Ok(());
            }
            tokio::time::sleep(self.timeouts.reindex_wait_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_spawn_config(pid_file: std::path::PathBuf) -> SpawnConfig {
        SpawnConfig {
            executable: "qtumd".into(),
            config_path: "qtum.conf".into(),
            data_dir: "/tmp/qtumd-test".into(),
            network_flag: None,
            rpc_url: url::Url::parse("http://127.0.0.1:8332").unwrap(),
            rpc_user: "user".into(),
            rpc_password: "pass".into(),
            pid_file,
            reindex: false,
        }
    }

    #[test]
    fn shutdown_flag_is_set_once_and_visible() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor =
            DaemonSupervisor::new(dummy_spawn_config(dir.path().join("qtumd.pid")), Timeouts::default());
        let flag = supervisor.shutdown_flag();

        assert!(!supervisor.is_stopping());
        assert!(!flag.load(Ordering::SeqCst));

        supervisor.shutdown();

        assert!(supervisor.is_stopping());
        assert!(flag.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn graceful_stop_waits_for_child_exit() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = DaemonSupervisor::new(
            dummy_spawn_config(dir.path().join("qtumd.pid")),
            Timeouts { shutdown_timeout: Duration::from_secs(5), ..Timeouts::default() },
        );

        let mut child = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
        supervisor.graceful_stop(&mut child).await.expect("graceful stop");
    }

    #[tokio::test]
    async fn clear_stale_pid_is_a_noop_when_pid_file_absent() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = DaemonSupervisor::new(
            dummy_spawn_config(dir.path().join("no-such.pid")),
            Timeouts::default(),
        );
        supervisor.clear_stale_pid().await.unwrap();
    }
}
