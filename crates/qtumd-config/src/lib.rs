//! The Config Materialiser: reads and writes the *daemon's* config file
//! (distinct from the host service's own config), enforces the index flags
//! a query broker depends on, and computes per-network paths and ports.
//!
//! See `spec.md` §4.1.

mod error;
mod network;
mod parse;
mod template;

pub use error::ConfigurationError;
pub use network::Network;
pub use parse::ConfigMap;

use std::path::{Path, PathBuf};

/// The options a daemon config file must set to `1` for the Query Broker to
/// function: a full transaction, address, and spent-output index, plus the
/// RPC server itself.
const REQUIRED_OPTIONS: &[&str] = &["txindex", "addressindex", "spentindex", "server"];

/// The daemon's materialised, validated configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub network: Network,
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
    pub rpc_port: u16,
    pub rpc_user: Option<String>,
    pub rpc_password: Option<String>,
    /// `host:port` shared by `zmqpubhashblock` and `zmqpubrawtx`.
    pub zmq_endpoint: String,
    /// Set when the config had `reindex=1`; the Process Supervisor must wait
    /// for `verificationprogress` before treating the daemon as ready.
    pub reindex: bool,
    pub map: ConfigMap,
}

impl DaemonConfig {
    /// Resolves `data_dir` to an absolute path relative to `service_config_path`
    /// when given as a relative path, ensures a daemon config file exists
    /// (writing the built-in default template if not), parses and validates
    /// it, and returns the materialised configuration.
    pub fn materialize(
        service_config_path: &Path,
        data_dir: PathBuf,
        network: Network,
    ) -> Result<Self, ConfigurationError> {
        let data_dir = resolve_data_dir(service_config_path, data_dir);
        let config_path = data_dir.join("qtum.conf");

        if !config_path.exists() {
            std::fs::create_dir_all(&data_dir).map_err(|source| {
                ConfigurationError::CreateDataDir { path: data_dir.clone(), source }
            })?;

            let rpc_user = template::random_credential(16);
            let rpc_password = template::random_credential(32);
            let zmq_port = network.default_rpc_port().saturating_add(20_000);
            let contents = template::default_template(&rpc_user, &rpc_password, zmq_port);
            std::fs::write(&config_path, contents).map_err(|source| ConfigurationError::Write {
                path: config_path.clone(),
                source,
            })?;
        }

        let contents = std::fs::read_to_string(&config_path)
            .map_err(|source| ConfigurationError::Read { path: config_path.clone(), source })?;
        let map = ConfigMap::parse(&contents);

        for option in REQUIRED_OPTIONS {
            if !map.is_truthy(option) {
                return Err(ConfigurationError::MissingRequiredOption(option));
            }
        }

        let hashblock = map.get("zmqpubhashblock").unwrap_or_default();
        let rawtx = map.get("zmqpubrawtx").unwrap_or_default();
        let hashblock_url = parse_zmq_endpoint(hashblock)
            .ok_or_else(|| ConfigurationError::InvalidZmqEndpoint(hashblock.to_string()))?;
        let rawtx_url = parse_zmq_endpoint(rawtx)
            .ok_or_else(|| ConfigurationError::InvalidZmqEndpoint(rawtx.to_string()))?;
        if (hashblock_url.host_str(), hashblock_url.port()) != (rawtx_url.host_str(), rawtx_url.port())
        {
            return Err(ConfigurationError::MismatchedZmqEndpoints {
                hashblock: hashblock.to_string(),
                rawtx: rawtx.to_string(),
            });
        }
        let zmq_endpoint = format!(
            "{}:{}",
            hashblock_url.host_str().unwrap_or_default(),
            hashblock_url.port().unwrap_or_default()
        );

        let rpc_port = map
            .get_int("rpcport")
            .and_then(|n| u16::try_from(n).ok())
            .unwrap_or_else(|| network.default_rpc_port());

        let reindex = map.is_truthy("reindex");

        Ok(Self {
            network,
            data_dir,
            config_path,
            rpc_port,
            rpc_user: map.get("rpcuser").map(str::to_string),
            rpc_password: map.get("rpcpassword").map(str::to_string),
            zmq_endpoint,
            reindex,
            map,
        })
    }

    /// Subdirectory of `data_dir` the daemon stores this network's chain
    /// data (and PID file) in.
    pub fn network_data_dir(&self) -> PathBuf {
        self.data_dir.join(self.network.data_subdir())
    }

    pub fn pid_file(&self) -> PathBuf {
        self.network_data_dir().join("qtumd.pid")
    }
}

fn resolve_data_dir(service_config_path: &Path, data_dir: PathBuf) -> PathBuf {
    if data_dir.is_absolute() {
        return data_dir;
    }
    let base = service_config_path.parent().unwrap_or_else(|| Path::new("."));
    base.join(data_dir)
}

/// Parses a `tcp://host:port` ZMQ endpoint with `url::Url`, the same crate
/// `qtumd-bindings` uses for the daemon's RPC URL.
fn parse_zmq_endpoint(endpoint: &str) -> Option<url::Url> {
    let url = url::Url::parse(endpoint).ok()?;
    url.host_str()?;
    url.port()?;
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_default_template_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let service_config = dir.path().join("service.toml");
        std::fs::write(&service_config, "").unwrap();

        let config =
            DaemonConfig::materialize(&service_config, dir.path().join("data"), Network::Livenet)
                .unwrap();

        assert!(config.config_path.exists());
        assert_eq!(config.rpc_port, 8332);
        assert!(config.rpc_user.is_some());
        assert!(!config.reindex);
    }

    #[test]
    fn rejects_missing_required_option() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(
            data_dir.join("qtum.conf"),
            "server=1\ntxindex=1\naddressindex=1\nspentindex=0\n",
        )
        .unwrap();

        let err = DaemonConfig::materialize(&dir.path().join("service.toml"), data_dir, Network::Livenet)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingRequiredOption("spentindex")));
    }

    #[test]
    fn rejects_mismatched_zmq_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("data");
        std::fs::create_dir_all(&data_dir).unwrap();
        std::fs::write(
            data_dir.join("qtum.conf"),
            "server=1\ntxindex=1\naddressindex=1\nspentindex=1\n\
             zmqpubhashblock=tcp://127.0.0.1:28332\nzmqpubrawtx=tcp://127.0.0.1:28333\n",
        )
        .unwrap();

        let err = DaemonConfig::materialize(&dir.path().join("service.toml"), data_dir, Network::Livenet)
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::MismatchedZmqEndpoints { .. }));
    }

    #[test]
    fn relative_data_dir_resolves_against_service_config_parent() {
        let dir = tempfile::tempdir().unwrap();
        let service_config = dir.path().join("nested").join("service.toml");
        std::fs::create_dir_all(service_config.parent().unwrap()).unwrap();
        std::fs::write(&service_config, "").unwrap();

        let config = DaemonConfig::materialize(
            &service_config,
            PathBuf::from("relative-data"),
            Network::Regtest,
        )
        .unwrap();

        assert_eq!(config.data_dir, dir.path().join("nested").join("relative-data"));
        assert_eq!(config.network_data_dir(), config.data_dir.join("regtest/"));
    }
}
