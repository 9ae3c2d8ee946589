/// The three networks the daemon can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Livenet,
    Testnet,
    Regtest,
}

impl Network {
    /// Default RPC port when the config file doesn't set `rpcport`.
    pub const fn default_rpc_port(self) -> u16 {
        match self {
            Self::Livenet => 8332,
            Self::Testnet | Self::Regtest => 18332,
        }
    }

    /// Subdirectory of the data directory the daemon stores this network's data in.
    pub const fn data_subdir(self) -> &'static str {
        match self {
            Self::Livenet => "",
            Self::Testnet => "testnet3/",
            Self::Regtest => "regtest/",
        }
    }

    /// The CLI flag passed to the daemon binary to select this network.
    /// `None` for livenet, which is the implicit default.
    pub const fn cli_flag(self) -> Option<&'static str> {
        match self {
            Self::Livenet => None,
            Self::Testnet => Some("--testnet"),
            Self::Regtest => Some("--regtest"),
        }
    }
}
