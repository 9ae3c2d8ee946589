/// Errors raised while materialising or validating the daemon config.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("could not read daemon config at {path}: {source}")]
    Read {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write daemon config at {path}: {source}")]
    Write {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not create data directory at {path}: {source}")]
    CreateDataDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("required option `{0}` is missing or not set to 1")]
    MissingRequiredOption(&'static str),
    #[error(
        "zmqpubhashblock ({hashblock}) and zmqpubrawtx ({rawtx}) must resolve to the same host:port"
    )]
    MismatchedZmqEndpoints { hashblock: String, rawtx: String },
    #[error("`{0}` is not a valid tcp:// zmq endpoint")]
    InvalidZmqEndpoint(String),
    #[error("neither spawn nor connect configuration was provided")]
    NoEndpointsConfigured,
}
