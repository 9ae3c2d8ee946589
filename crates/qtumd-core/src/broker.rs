//! The Query Broker: the full read/query surface over a Node Pool,
//! normalising raw daemon responses and serving reads through
//! [`CacheRegistry`] wherever `spec.md` §4.7 names a cache (§4.8).

use crate::{
    cache::CacheRegistry,
    error::{CoreError, ValidationError},
    mempool,
    model::{
        AddressAppearance, AddressDelta, AddressSummary, BlockOverview, ConfirmedUtxo,
        DetailedAddressTransaction, DetailedInput, DetailedOutput, DetailedTransaction, Utxo,
    },
    options::QueryOptions,
    tip::TipTracker,
};
use qtumd_jsonrpc::ErrorObject;
use qtumd_rpc_client::NodePool;
use std::{
    collections::{BTreeMap, HashSet},
    sync::{atomic::AtomicBool, Arc},
};

/// Parsing a raw block or transaction into structured fields, and
/// synthesising a `scriptPubKey` for an address, are chain-primitives
/// concerns this crate does not own (`spec.md` §1).
pub trait ChainPrimitives: Send + Sync {
    fn parse_block(&self, raw: &[u8]) -> serde_json::Value;
    fn parse_transaction(&self, raw: &[u8]) -> serde_json::Value;
    fn script_for_address(&self, address: &str) -> Option<String>;
}

/// The two tunables `spec.md` §9 leaves as "taken from the source".
#[derive(Debug, Clone, Copy)]
pub struct BrokerLimits {
    pub max_addresses_query: usize,
    pub max_transaction_history: usize,
    pub max_txids: usize,
}

impl Default for BrokerLimits {
    fn default() -> Self {
        Self { max_addresses_query: 10_000, max_transaction_history: 50, max_txids: 1_000 }
    }
}

/// `getBlock`/`getRawBlock`/`getBlockHeader` accept either a block hash or a
/// height; a 64-character string is always treated as a hash even if it
/// happens to be all digits, since real block hashes are never that short.
enum HashOrHeight {
    Hash(String),
    Height(i64),
}

impl HashOrHeight {
    fn parse(input: &str) -> Self {
        if input.len() != 64 {
            if let Ok(height) = input.parse::<i64>() {
                return Self::Height(height);
            }
        }
        Self::Hash(input.to_string())
    }
}

fn normalise_single_address(addresses: Option<&serde_json::Value>) -> Option<String> {
    let arr = addresses?.as_array()?;
    match arr.as_slice() {
        [one] => one.as_str().map(str::to_string),
        _ => None,
    }
}

pub struct QueryBroker {
    pool: Arc<NodePool>,
    cache: Arc<CacheRegistry>,
    tip: Arc<TipTracker>,
    chain: Arc<dyn ChainPrimitives>,
    limits: BrokerLimits,
    stopping: Arc<AtomicBool>,
}

impl QueryBroker {
    pub fn new(
        pool: Arc<NodePool>,
        cache: Arc<CacheRegistry>,
        tip: Arc<TipTracker>,
        chain: Arc<dyn ChainPrimitives>,
        limits: BrokerLimits,
        stopping: Arc<AtomicBool>,
    ) -> Self {
        Self { pool, cache, tip, chain, limits, stopping }
    }

    /// `spec.md` §7: every public operation rejects once shutdown has begun.
    fn check_running(&self) -> Result<(), CoreError> {
        if self.stopping.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CoreError::ShuttingDown);
        }
        Ok(())
    }

    pub async fn sync_percentage(&self) -> Result<f64, CoreError> {
        self.check_running()?;
        Ok(self.tip.sync_percentage().await?)
    }

    pub async fn is_synced(&self) -> Result<bool, CoreError> {
        self.check_running()?;
        Ok(self.tip.is_synced().await?)
    }

    fn validate_address_count(&self, addresses: &[String]) -> Result<(), ValidationError> {
        if addresses.len() > self.limits.max_addresses_query {
            return Err(ValidationError::TooManyAddresses {
                count: addresses.len(),
                max: self.limits.max_addresses_query,
            });
        }
        Ok(())
    }

    fn address_key(addresses: &[String]) -> String {
        let mut sorted = addresses.to_vec();
        sorted.sort();
        sorted.join(",")
    }

    async fn resolve_hash(&self, hash_or_height: &str) -> Result<String, CoreError> {
        match HashOrHeight::parse(hash_or_height) {
            HashOrHeight::Hash(hash) => Ok(hash),
            HashOrHeight::Height(height) => {
                Ok(self.pool.call("getblockhash", serde_json::json!([height])).await?)
            }
        }
    }

    async fn block_header_value(&self, hash: &str) -> Result<serde_json::Value, CoreError> {
        let key = hash.to_string();
        let pool = self.pool.clone();
        let hash = hash.to_string();
        let header = self
            .cache
            .block_headers
            .get_or_fetch(key, move || async move {
                pool.call::<serde_json::Value>("getblockheader", serde_json::json!([hash, true]))
                    .await
            })
            .await?;
        Ok(header)
    }

    async fn raw_block_bytes(&self, hash: &str) -> Result<Vec<u8>, CoreError> {
        let key = hash.to_string();
        let pool = self.pool.clone();
        let hash = hash.to_string();
        let bytes = self
            .cache
            .raw_blocks
            .get_or_fetch(key, move || async move {
                let raw: String = pool.call("getblock", serde_json::json!([hash, 0])).await?;
                hex::decode(&raw).map_err(|e| qtumd_jsonrpc::RpcError::Transport(Box::new(e)))
            })
            .await?;
        Ok(bytes)
    }

    /// `spec.md` §4.8: fetch raw hex, parse into a block object, cache by hash.
    pub async fn get_block(&self, hash_or_height: &str) -> Result<serde_json::Value, CoreError> {
        self.check_running()?;
        let hash = self.resolve_hash(hash_or_height).await?;
        if let Some(cached) = self.cache.parsed_blocks.get(&hash) {
            return Ok(cached);
        }
        let raw = self.raw_block_bytes(&hash).await?;
        let parsed = self.chain.parse_block(&raw);
        self.cache.parsed_blocks.insert(hash, parsed.clone());
        Ok(parsed)
    }

    pub async fn get_raw_block(&self, hash_or_height: &str) -> Result<Vec<u8>, CoreError> {
        self.check_running()?;
        let hash = self.resolve_hash(hash_or_height).await?;
        self.raw_block_bytes(&hash).await
    }

    /// `spec.md` §4.8: normalised header + metadata, cached by hash.
    pub async fn get_block_overview(&self, hash_or_height: &str) -> Result<BlockOverview, CoreError> {
        self.check_running()?;
        let hash = self.resolve_hash(hash_or_height).await?;
        if let Some(cached) = self.cache.block_overviews.get(&hash) {
            return Ok(cached);
        }
        let header = self.block_header_value(&hash).await?;
        let overview = BlockOverview {
            hash: header.get("hash").and_then(|v| v.as_str()).unwrap_or(&hash).to_string(),
            version: header.get("version").and_then(|v| v.as_i64()).unwrap_or(0),
            confirmations: header.get("confirmations").and_then(|v| v.as_i64()).unwrap_or(0),
            height: header.get("height").and_then(|v| v.as_i64()).unwrap_or(-1),
            chain_work: header.get("chainwork").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            prev_hash: header.get("previousblockhash").and_then(|v| v.as_str()).map(str::to_string),
            next_hash: header.get("nextblockhash").and_then(|v| v.as_str()).map(str::to_string),
            merkle_root: header.get("merkleroot").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            time: header.get("time").and_then(|v| v.as_i64()).unwrap_or(0),
            median_time: header.get("mediantime").and_then(|v| v.as_i64()).unwrap_or(0),
            nonce: header.get("nonce").and_then(|v| v.as_i64()).unwrap_or(0),
            bits: header.get("bits").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            difficulty: header.get("difficulty").and_then(|v| v.as_f64()).unwrap_or(0.0),
        };
        self.cache.block_overviews.insert(hash, overview.clone());
        Ok(overview)
    }

    pub async fn get_block_header(&self, hash_or_height: &str) -> Result<serde_json::Value, CoreError> {
        self.check_running()?;
        let hash = self.resolve_hash(hash_or_height).await?;
        self.block_header_value(&hash).await
    }

    pub async fn get_block_hashes_by_timestamp(
        &self,
        high: i64,
        low: i64,
    ) -> Result<Vec<String>, CoreError> {
        self.check_running()?;
        Ok(self.pool.call("getblockhashes", serde_json::json!([high, low])).await?)
    }

    pub async fn get_raw_transaction(&self, txid: &str) -> Result<Vec<u8>, CoreError> {
        self.check_running()?;
        let key = txid.to_string();
        let pool = self.pool.clone();
        let txid_owned = txid.to_string();
        let bytes = self
            .cache
            .raw_transactions
            .get_or_fetch(key, move || async move {
                let raw: String =
                    pool.call("getrawtransaction", serde_json::json!([txid_owned, 0])).await?;
                hex::decode(&raw).map_err(|e| qtumd_jsonrpc::RpcError::Transport(Box::new(e)))
            })
            .await?;
        Ok(bytes)
    }

    pub async fn get_transaction(&self, txid: &str) -> Result<serde_json::Value, CoreError> {
        self.check_running()?;
        if let Some(cached) = self.cache.parsed_transactions.get(&txid.to_string()) {
            return Ok(cached);
        }
        let raw = self.get_raw_transaction(txid).await?;
        let parsed = self.chain.parse_transaction(&raw);
        self.cache.parsed_transactions.insert(txid.to_string(), parsed.clone());
        Ok(parsed)
    }

    /// `spec.md` §4.8 `getDetailedTransaction` and Concrete Scenario #4.
    pub async fn get_detailed_transaction(&self, txid: &str) -> Result<DetailedTransaction, CoreError> {
        self.check_running()?;
        if let Some(cached) = self.cache.detailed_transactions.get(&txid.to_string()) {
            return Ok(cached);
        }
        let raw: serde_json::Value =
            self.pool.call("getrawtransaction", serde_json::json!([txid, 2])).await?;
        let detailed = self.normalise_detailed_transaction(txid, raw).await?;
        self.cache.detailed_transactions.insert(txid.to_string(), detailed.clone());
        Ok(detailed)
    }

    async fn normalise_detailed_transaction(
        &self,
        txid: &str,
        raw: serde_json::Value,
    ) -> Result<DetailedTransaction, CoreError> {
        let block_hash = raw.get("blockhash").and_then(|v| v.as_str()).map(str::to_string);

        let (height, block_timestamp) = match &block_hash {
            Some(hash) => {
                let header = self.block_header_value(hash).await?;
                let height = header.get("height").and_then(|v| v.as_i64()).unwrap_or(-1);
                let timestamp = raw
                    .get("blocktime")
                    .and_then(|v| v.as_i64())
                    .or_else(|| raw.get("time").and_then(|v| v.as_i64()))
                    .unwrap_or(0);
                (height, timestamp)
            }
            None => {
                // Still in the mempool: the block timestamp falls back to
                // the mempool entry's receive time.
                let entry = self
                    .pool
                    .call::<serde_json::Value>("getmempoolentry", serde_json::json!([txid]))
                    .await
                    .unwrap_or_else(|_| serde_json::json!({}));
                let timestamp = entry.get("time").and_then(|v| v.as_i64()).unwrap_or(0);
                (-1, timestamp)
            }
        };

        let empty = Vec::new();
        let vin = raw.get("vin").and_then(|v| v.as_array()).unwrap_or(&empty);
        let coinbase = vin.first().is_some_and(|v| v.get("coinbase").is_some());

        let inputs: Vec<DetailedInput> = vin
            .iter()
            .map(|v| {
                let (script, script_asm) = match v.get("scriptSig") {
                    Some(sig) => (
                        sig.get("hex").and_then(|s| s.as_str()).map(str::to_string),
                        sig.get("asm").and_then(|s| s.as_str()).map(str::to_string),
                    ),
                    None => match v.get("coinbase").and_then(|s| s.as_str()) {
                        Some(cb) => (Some(cb.to_string()), None),
                        None => (None, None),
                    },
                };
                DetailedInput {
                    prev_tx_id: v.get("txid").and_then(|s| s.as_str()).map(str::to_string),
                    output_index: v.get("vout").and_then(|s| s.as_i64()).unwrap_or(0),
                    sequence: v.get("sequence").and_then(|s| s.as_i64()).unwrap_or(0),
                    script,
                    script_asm,
                    address: normalise_single_address(v.get("addresses")),
                    satoshis: v.get("satoshis").and_then(|s| s.as_i64()).unwrap_or(0),
                }
            })
            .collect();

        let vout = raw.get("vout").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let outputs: Vec<DetailedOutput> = vout
            .iter()
            .map(|v| {
                let script_pub_key = v.get("scriptPubKey");
                DetailedOutput {
                    satoshis: v.get("satoshis").and_then(|s| s.as_i64()).unwrap_or(0),
                    script: script_pub_key
                        .and_then(|s| s.get("hex"))
                        .and_then(|s| s.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    script_asm: script_pub_key
                        .and_then(|s| s.get("asm"))
                        .and_then(|s| s.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    address: normalise_single_address(
                        script_pub_key.and_then(|s| s.get("addresses")),
                    ),
                    spent_tx_id: v.get("spentTxId").and_then(|s| s.as_str()).map(str::to_string),
                    spent_index: v.get("spentIndex").and_then(|s| s.as_i64()),
                    spent_height: v.get("spentHeight").and_then(|s| s.as_i64()),
                }
            })
            .collect();

        let input_satoshis = if coinbase { 0 } else { inputs.iter().map(|i| i.satoshis).sum() };
        let output_satoshis: i64 = outputs.iter().map(|o| o.satoshis).sum();
        let fee_satoshis = if coinbase { 0 } else { input_satoshis - output_satoshis };

        Ok(DetailedTransaction {
            hash: raw.get("txid").and_then(|v| v.as_str()).unwrap_or(txid).to_string(),
            hex: raw.get("hex").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            block_hash,
            height,
            block_timestamp,
            version: raw.get("version").and_then(|v| v.as_i64()).unwrap_or(0),
            locktime: raw.get("locktime").and_then(|v| v.as_i64()).unwrap_or(0),
            coinbase,
            inputs,
            outputs,
            input_satoshis,
            output_satoshis,
            fee_satoshis,
            confirmations: mempool::confirmations(height, self.tip.height()),
        })
    }

    /// `spec.md` §4.8: pass to the daemon and return the txid.
    pub async fn send_transaction(
        &self,
        raw_tx_hex: &str,
        options: &QueryOptions,
    ) -> Result<String, CoreError> {
        self.check_running()?;
        let params = if options.allow_absurd_fees {
            serde_json::json!([raw_tx_hex, 0])
        } else {
            serde_json::json!([raw_tx_hex])
        };
        Ok(self.pool.call("sendrawtransaction", params).await?)
    }

    pub async fn estimate_fee(&self, blocks: u32) -> Result<f64, CoreError> {
        self.check_running()?;
        let result: serde_json::Value =
            self.pool.call("estimatefee", serde_json::json!([blocks])).await?;
        Ok(result.as_f64().unwrap_or(-1.0))
    }

    pub async fn get_best_block_hash(&self) -> Result<String, CoreError> {
        self.check_running()?;
        Ok(self.pool.call("getbestblockhash", serde_json::json!([])).await?)
    }

    /// `spec.md` §4.8 and Concrete Scenario #5: code `-5` means "not found"
    /// and is mapped to an empty object, not an error.
    pub async fn get_spent_info(&self, txid: &str, index: i64) -> Result<serde_json::Value, CoreError> {
        self.check_running()?;
        match self
            .pool
            .call::<serde_json::Value>(
                "getspentinfo",
                serde_json::json!([{"txid": txid, "index": index}]),
            )
            .await
        {
            Ok(value) => Ok(value),
            Err(err) if err.code() == Some(ErrorObject::NOT_FOUND) => Ok(serde_json::json!({})),
            Err(err) => Err(err.into()),
        }
    }

    async fn singleton(
        &self,
        key: &'static str,
        method: &'static str,
    ) -> Result<serde_json::Value, CoreError> {
        self.check_running()?;
        let pool = self.pool.clone();
        let value = self
            .cache
            .singleton_info
            .get_or_fetch(key.to_string(), move || async move {
                pool.call::<serde_json::Value>(method, serde_json::json!([])).await
            })
            .await?;
        Ok(value)
    }

    pub async fn get_info(&self) -> Result<serde_json::Value, CoreError> {
        self.singleton("info", "getinfo").await
    }

    pub async fn get_dgp_info(&self) -> Result<serde_json::Value, CoreError> {
        self.singleton("dgp", "getdgpinfo").await
    }

    pub async fn get_mining_info(&self) -> Result<serde_json::Value, CoreError> {
        self.singleton("mining", "getmininginfo").await
    }

    pub async fn get_staking_info(&self) -> Result<serde_json::Value, CoreError> {
        self.singleton("staking", "getstakinginfo").await
    }

    pub async fn generate_block(
        &self,
        num_blocks: u32,
        address: Option<&str>,
    ) -> Result<serde_json::Value, CoreError> {
        self.check_running()?;
        Ok(match address {
            Some(addr) => {
                self.pool.call("generatetoaddress", serde_json::json!([num_blocks, addr])).await?
            }
            None => self.pool.call("generate", serde_json::json!([num_blocks])).await?,
        })
    }

    pub async fn call_contract(
        &self,
        address: &str,
        data: &str,
        sender: Option<&str>,
    ) -> Result<serde_json::Value, CoreError> {
        self.check_running()?;
        let params = match sender {
            Some(sender) => serde_json::json!([address, data, sender]),
            None => serde_json::json!([address, data]),
        };
        Ok(self.pool.call("callcontract", params).await?)
    }

    pub async fn list_unspent(
        &self,
        min_conf: u32,
        max_conf: u32,
        addresses: &[String],
    ) -> Result<serde_json::Value, CoreError> {
        self.check_running()?;
        Ok(self.pool.call("listunspent", serde_json::json!([min_conf, max_conf, addresses])).await?)
    }

    pub async fn get_new_address(&self) -> Result<String, CoreError> {
        self.check_running()?;
        Ok(self.pool.call("getnewaddress", serde_json::json!([])).await?)
    }

    pub async fn get_subsidy(&self, height: Option<i64>) -> Result<serde_json::Value, CoreError> {
        self.check_running()?;
        let height = height.unwrap_or_else(|| self.tip.height());
        let pool = self.pool.clone();
        let value = self
            .cache
            .block_subsidy
            .get_or_fetch(height, move || async move {
                pool.call::<serde_json::Value>("getblocksubsidy", serde_json::json!([height])).await
            })
            .await?;
        Ok(value)
    }

    pub async fn get_account_info(&self, address: &str) -> Result<serde_json::Value, CoreError> {
        self.check_running()?;
        let key = address.to_string();
        let pool = self.pool.clone();
        let addr = address.to_string();
        let value = self
            .cache
            .account_info
            .get_or_fetch(key, move || async move {
                pool.call::<serde_json::Value>("getaccountinfo", serde_json::json!([addr])).await
            })
            .await?;
        Ok(value)
    }

    pub async fn get_transaction_receipt(&self, txid: &str) -> Result<serde_json::Value, CoreError> {
        self.check_running()?;
        let key = txid.to_string();
        let pool = self.pool.clone();
        let txid_owned = txid.to_string();
        let value = self
            .cache
            .transaction_receipts
            .get_or_fetch(key, move || async move {
                pool.call::<serde_json::Value>(
                    "gettransactionreceipt",
                    serde_json::json!([txid_owned]),
                )
                .await
            })
            .await?;
        Ok(value)
    }

    pub async fn get_json_raw_transaction(&self, txid: &str) -> Result<serde_json::Value, CoreError> {
        self.check_running()?;
        let key = txid.to_string();
        let pool = self.pool.clone();
        let txid_owned = txid.to_string();
        let value = self
            .cache
            .json_raw_transactions
            .get_or_fetch(key, move || async move {
                pool.call::<serde_json::Value>(
                    "getrawtransaction",
                    serde_json::json!([txid_owned, 1]),
                )
                .await
            })
            .await?;
        Ok(value)
    }

    pub async fn get_json_block(&self, hash_or_height: &str) -> Result<serde_json::Value, CoreError> {
        self.check_running()?;
        let hash = self.resolve_hash(hash_or_height).await?;
        let key = hash.clone();
        let pool = self.pool.clone();
        let value = self
            .cache
            .json_blocks
            .get_or_fetch(key, move || async move {
                pool.call::<serde_json::Value>("getblock", serde_json::json!([hash, 1])).await
            })
            .await?;
        Ok(value)
    }

    pub async fn get_address_balance(&self, addresses: &[String]) -> Result<serde_json::Value, CoreError> {
        self.check_running()?;
        self.validate_address_count(addresses)?;
        let key = Self::address_key(addresses);
        let pool = self.pool.clone();
        let addrs = addresses.to_vec();
        let value = self
            .cache
            .address_balances
            .get_or_fetch(key, move || async move {
                pool.call::<serde_json::Value>(
                    "getaddressbalance",
                    serde_json::json!([{"addresses": addrs}]),
                )
                .await
            })
            .await?;
        Ok(value)
    }

    /// `spec.md` §4.8.1: confirmed UTXOs, optionally overlaid with the
    /// mempool when `queryMempool` (default true) is set.
    pub async fn get_address_unspent_outputs(
        &self,
        addresses: &[String],
        options: &QueryOptions,
    ) -> Result<Vec<Utxo>, CoreError> {
        self.check_running()?;
        self.validate_address_count(addresses)?;
        let query_mempool = options.query_mempool_or_default(true);
        let key = format!("{}|mempool={query_mempool}", Self::address_key(addresses));

        if let Some(cached) = self.cache.address_utxos.get(&key) {
            return Ok(cached);
        }

        let confirmed: Vec<ConfirmedUtxo> = self
            .pool
            .call("getaddressutxos", serde_json::json!([{"addresses": addresses}]))
            .await?;

        let result = if query_mempool {
            let deltas: Vec<AddressDelta> = self
                .pool
                .call("getaddressmempool", serde_json::json!([{"addresses": addresses}]))
                .await?;
            let chain = self.chain.clone();
            mempool::overlay_utxos(&confirmed, &deltas, |addr| chain.script_for_address(addr))
        } else {
            confirmed
                .into_iter()
                .map(|u| Utxo {
                    address: u.address,
                    txid: u.txid,
                    output_index: u.output_index,
                    script: Some(u.script),
                    satoshis: u.satoshis,
                    height: Some(u.height),
                    timestamp: None,
                })
                .collect()
        };

        self.cache.address_utxos.insert(key, result.clone());
        Ok(result)
    }

    /// `spec.md` §4.8.2: deduplicated txids in descending block order,
    /// optionally including mempool-only entries.
    pub async fn get_address_txids(
        &self,
        addresses: &[String],
        options: &QueryOptions,
    ) -> Result<Vec<String>, CoreError> {
        self.check_running()?;
        self.validate_address_count(addresses)?;
        let query_mempool = options.query_mempool_or_default(true);
        let has_range = options.has_height_range();
        let key = format!(
            "{}|mempool={query_mempool}|only={}|range={:?}-{:?}",
            Self::address_key(addresses),
            options.query_mempool_only,
            options.start,
            options.end
        );

        if !has_range {
            if let Some(cached) = self.cache.address_txids.get(&key) {
                return Ok(cached);
            }
        }

        let confirmed: Vec<String> = if options.query_mempool_only {
            Vec::new()
        } else {
            let mut params = serde_json::json!({"addresses": addresses});
            if let (Some(start), Some(end)) = (options.start, options.end) {
                params["start"] = serde_json::json!(start);
                params["end"] = serde_json::json!(end);
            }
            self.pool.call("getaddresstxids", serde_json::json!([params])).await?
        };

        let mempool_txids: Vec<String> = if options.query_mempool_only || query_mempool {
            let deltas: Vec<AddressDelta> = self
                .pool
                .call("getaddressmempool", serde_json::json!([{"addresses": addresses}]))
                .await?;
            deltas.into_iter().map(|d| d.txid).collect()
        } else {
            Vec::new()
        };

        let result = mempool::overlay_txids(
            &confirmed,
            &mempool_txids,
            options.query_mempool_only,
            query_mempool,
            has_range,
        );
        if !has_range {
            self.cache.address_txids.insert(key, result.clone());
        }
        Ok(result)
    }

    /// `spec.md` §4.8.3.
    pub async fn get_address_history(
        &self,
        addresses: &[String],
        options: &QueryOptions,
    ) -> Result<Vec<DetailedAddressTransaction>, CoreError> {
        self.check_running()?;
        self.validate_address_count(addresses)?;

        let from = options.from.unwrap_or(0);
        let to = options.to.unwrap_or(from + self.limits.max_transaction_history as u64);
        if from >= to {
            return Err(ValidationError::OutOfOrderRange { from, to }.into());
        }
        let span = to - from;
        if span > self.limits.max_transaction_history as u64 {
            return Err(ValidationError::RangeTooWide {
                from,
                to,
                span,
                max: self.limits.max_transaction_history as u64,
            }
            .into());
        }

        let txids = self.get_address_txids(addresses, options).await?;
        let addr_set: HashSet<&String> = addresses.iter().collect();

        let mut out = Vec::new();
        for txid in txids.iter().skip(from as usize).take(span as usize) {
            let tx = self.get_detailed_transaction(txid).await?;
            let mut addr_map: BTreeMap<String, AddressAppearance> = BTreeMap::new();
            let mut satoshis = 0i64;

            for (idx, input) in tx.inputs.iter().enumerate() {
                if let Some(addr) = input.address.as_ref().filter(|a| addr_set.contains(*a)) {
                    addr_map.entry(addr.clone()).or_default().input_indexes.push(idx);
                    satoshis -= input.satoshis;
                }
            }
            for (idx, output) in tx.outputs.iter().enumerate() {
                if let Some(addr) = output.address.as_ref().filter(|a| addr_set.contains(*a)) {
                    addr_map.entry(addr.clone()).or_default().output_indexes.push(idx);
                    satoshis += output.satoshis;
                }
            }

            out.push(DetailedAddressTransaction { transaction: tx, addresses: addr_map, satoshis });
        }
        Ok(out)
    }

    /// `spec.md` §4.8.4.
    pub async fn get_address_summary(
        &self,
        addresses: &[String],
        options: &QueryOptions,
    ) -> Result<AddressSummary, CoreError> {
        self.check_running()?;
        self.validate_address_count(addresses)?;
        let key = Self::address_key(addresses);

        let mut summary = if let Some(cached) = self.cache.address_summaries.get(&key) {
            cached
        } else {
            let deltas: Vec<AddressDelta> = self
                .pool
                .call("getaddressdeltas", serde_json::json!([{"addresses": addresses}]))
                .await?;
            let mempool_deltas: Vec<AddressDelta> = self
                .pool
                .call("getaddressmempool", serde_json::json!([{"addresses": addresses}]))
                .await?;

            let mut total_received = 0i64;
            let mut total_spent = 0i64;
            let mut confirmed_txids = Vec::new();
            let mut seen = HashSet::new();
            for delta in &deltas {
                if delta.satoshis > 0 {
                    total_received += delta.satoshis;
                } else {
                    total_spent += -delta.satoshis;
                }
                if seen.insert(delta.txid.clone()) {
                    confirmed_txids.push(delta.txid.clone());
                }
            }

            let mut unconfirmed_balance = 0i64;
            let mut mempool_txids = Vec::new();
            let mut mempool_seen = HashSet::new();
            for delta in &mempool_deltas {
                unconfirmed_balance += delta.satoshis;
                if mempool_seen.insert(delta.txid.clone()) {
                    mempool_txids.push(delta.txid.clone());
                }
            }

            let appearances = confirmed_txids.len() as u64;
            let unconfirmed_appearances = mempool_txids.len() as u64;

            // Mempool txids in reverse arrival order, then confirmed txids
            // in descending block order (`spec.md` §4.8.4).
            mempool_txids.reverse();
            let mut txids = mempool_txids;
            txids.extend(confirmed_txids.into_iter().rev());

            let summary = AddressSummary {
                appearances,
                total_received,
                total_spent,
                balance: total_received - total_spent,
                unconfirmed_appearances,
                unconfirmed_balance,
                txids: Some(txids),
            };
            self.cache.address_summaries.insert(key, summary.clone());
            summary
        };

        if options.no_tx_list {
            summary.txids = None;
            return Ok(summary);
        }

        if let Some(txids) = &mut summary.txids {
            let from = options.from.unwrap_or(0) as usize;
            let to = options.to.map(|t| t as usize).unwrap_or(txids.len());
            if from < to {
                let span = (to - from) as u64;
                if span > self.limits.max_txids as u64 {
                    return Err(ValidationError::RangeTooWide {
                        from: from as u64,
                        to: to as u64,
                        span,
                        max: self.limits.max_txids as u64,
                    }
                    .into());
                }
                *txids = txids.iter().skip(from).take(to - from).cloned().collect();
            }
        }

        Ok(summary)
    }

    pub async fn get_addresses_mempool_balance(&self, addresses: &[String]) -> Result<i64, CoreError> {
        self.check_running()?;
        self.validate_address_count(addresses)?;
        let deltas: Vec<AddressDelta> = self
            .pool
            .call("getaddressmempool", serde_json::json!([{"addresses": addresses}]))
            .await?;
        Ok(deltas.iter().map(|d| d.satoshis).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheRegistry;
    use crate::tip::TipTrackerConfig;
    use qtumd_transport::mock::{Asserter, MockTransport};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct NoopChainPrimitives;
    impl ChainPrimitives for NoopChainPrimitives {
        fn parse_block(&self, raw: &[u8]) -> serde_json::Value {
            serde_json::json!({"raw_len": raw.len()})
        }
        fn parse_transaction(&self, raw: &[u8]) -> serde_json::Value {
            serde_json::json!({"raw_len": raw.len()})
        }
        fn script_for_address(&self, _address: &str) -> Option<String> {
            None
        }
    }

    fn broker_with(asserter: Asserter) -> QueryBroker {
        let pool = NodePool::new(Duration::from_millis(1));
        pool.push(Arc::new(qtumd_rpc_client::NodeEndpoint::new(
            Arc::new(MockTransport::new("a", asserter)),
            None,
            Duration::from_secs(1),
        )));
        let pool = Arc::new(pool);
        let cache = Arc::new(CacheRegistry::new(64));
        let tip_pool = Arc::new(NodePool::new(Duration::from_millis(1)));
        let tip = Arc::new(TipTracker::new(
            TipTrackerConfig::default(),
            tip_pool,
            cache.clone(),
            Arc::new(AtomicBool::new(true)),
        ));
        QueryBroker::new(
            pool,
            cache,
            tip,
            Arc::new(NoopChainPrimitives),
            BrokerLimits::default(),
            Arc::new(AtomicBool::new(false)),
        )
    }

    /// Concrete Scenario #4: an address list of length 1 normalises to that
    /// address; empty or multi-address lists normalise to `null`.
    #[tokio::test]
    async fn detailed_transaction_normalises_output_addresses() {
        let asserter = Asserter::new();
        asserter.push_success(&serde_json::json!({
            "txid": "t1",
            "hex": "deadbeef",
            "version": 2,
            "locktime": 0,
            "vin": [{"txid": "prev", "vout": 0, "sequence": 0, "scriptSig": {"hex": "ab", "asm": "OP"}, "satoshis": 1000}],
            "vout": [
                {"satoshis": 400, "scriptPubKey": {"hex": "76a9", "asm": "OP_DUP", "addresses": ["addr1"]}},
                {"satoshis": 600, "scriptPubKey": {"hex": "76a9", "asm": "OP_DUP", "addresses": []}},
            ],
        }));
        // blockHash is absent: this exercises the mempool-entry fallback.
        asserter.push_success(&serde_json::json!({"time": 555}));

        let broker = broker_with(asserter);
        let tx = broker.get_detailed_transaction("t1").await.unwrap();

        assert_eq!(tx.outputs[0].address.as_deref(), Some("addr1"));
        assert_eq!(tx.outputs[1].address, None);
        assert_eq!(tx.height, -1);
        assert_eq!(tx.block_timestamp, 555);
        assert_eq!(tx.input_satoshis, 1000);
        assert_eq!(tx.output_satoshis, 1000);
        assert_eq!(tx.fee_satoshis, 0);
    }

    #[tokio::test]
    async fn detailed_transaction_input_without_scriptsig_or_coinbase_has_no_script() {
        let asserter = Asserter::new();
        asserter.push_success(&serde_json::json!({
            "txid": "t2",
            "hex": "cafe",
            "version": 2,
            "locktime": 0,
            "vin": [{"txid": "prev", "vout": 0, "sequence": 0, "satoshis": 10}],
            "vout": [],
            "blockhash": "h1",
            "blocktime": 100,
        }));
        asserter.push_success(&serde_json::json!({"height": 50}));

        let broker = broker_with(asserter);
        let tx = broker.get_detailed_transaction("t2").await.unwrap();

        assert_eq!(tx.inputs[0].script, None);
        assert_eq!(tx.height, 50);
    }

    /// Concrete Scenario #5: `-5` from the daemon yields `{}`, not an error.
    #[tokio::test]
    async fn spent_info_not_found_yields_empty_object() {
        let asserter = Asserter::new();
        asserter.push_error(-5, "not found");
        let broker = broker_with(asserter);

        let result = broker.get_spent_info("t1", 0).await.unwrap();
        assert_eq!(result, serde_json::json!({}));
    }

    #[tokio::test]
    async fn address_history_rejects_out_of_order_range() {
        let broker = broker_with(Asserter::new());
        let options = QueryOptions { from: Some(5), to: Some(2), ..Default::default() };
        let err = broker.get_address_history(&["A".to_string()], &options).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(ValidationError::OutOfOrderRange { .. })));
    }

    #[tokio::test]
    async fn address_history_rejects_range_wider_than_max() {
        let broker = broker_with(Asserter::new());
        let options = QueryOptions { from: Some(0), to: Some(1000), ..Default::default() };
        let err = broker.get_address_history(&["A".to_string()], &options).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(ValidationError::RangeTooWide { .. })));
    }

    #[tokio::test]
    async fn address_count_over_limit_is_rejected() {
        let broker = broker_with(Asserter::new());
        let addresses: Vec<String> = (0..5).map(|i| format!("addr{i}")).collect();
        let mut limited = broker;
        limited.limits.max_addresses_query = 2;
        let err = limited.get_address_balance(&addresses).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(ValidationError::TooManyAddresses { .. })));
    }

    #[tokio::test]
    async fn operations_reject_once_stopping_flag_is_set() {
        let broker = broker_with(Asserter::new());
        broker.stopping.store(true, std::sync::atomic::Ordering::SeqCst);
        let err = broker.get_best_block_hash().await.unwrap_err();
        assert!(matches!(err, CoreError::ShuttingDown));
    }
}
