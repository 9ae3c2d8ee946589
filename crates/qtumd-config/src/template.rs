use rand::Rng;

/// Generates a random alphanumeric credential, matching the entropy level
/// common config generators in the wild use for a freshly bootstrapped
/// `rpcuser`/`rpcpassword` pair.
pub fn random_credential(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char).collect()
}

/// The built-in default config template written when no daemon config file
/// exists yet, per `spec.md` §6.
pub fn default_template(rpc_user: &str, rpc_password: &str, zmq_port: u16) -> String {
    format!(
        "server=1\n\
         whitelist=127.0.0.1\n\
         txindex=1\n\
         addressindex=1\n\
         timestampindex=1\n\
         spentindex=1\n\
         zmqpubrawtx=tcp://127.0.0.1:{zmq_port}\n\
         zmqpubhashblock=tcp://127.0.0.1:{zmq_port}\n\
         rpcallowip=127.0.0.1\n\
         rpcuser={rpc_user}\n\
         rpcpassword={rpc_password}\n\
         uacomment=bitcore\n"
    )
}
