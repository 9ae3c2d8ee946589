use serde::{Deserialize, Serialize};

/// One mempool-reported delta for an address (`spec.md` §3).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AddressDelta {
    pub address: String,
    pub txid: String,
    #[serde(rename = "outputIndex")]
    pub output_index: i64,
    pub satoshis: i64,
    pub timestamp: i64,
    #[serde(default, rename = "prevtxid")]
    pub prev_txid: Option<String>,
    #[serde(default, rename = "prevout")]
    pub prev_out: Option<i64>,
}

impl AddressDelta {
    /// Whether this delta spends a previously confirmed output rather than
    /// creating a new one.
    pub fn spends(&self) -> Option<(String, i64)> {
        self.prev_txid.clone().zip(self.prev_out)
    }

    pub fn is_creation(&self) -> bool {
        self.prev_txid.is_none() && self.satoshis > 0
    }
}

/// A confirmed or mempool-synthesised unspent output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Utxo {
    pub address: String,
    pub txid: String,
    #[serde(rename = "outputIndex")]
    pub output_index: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    pub satoshis: i64,
    pub height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

/// Raw confirmed-UTXO shape as the daemon reports it, before the mempool
/// overlay is applied.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfirmedUtxo {
    pub address: String,
    pub txid: String,
    #[serde(rename = "outputIndex")]
    pub output_index: i64,
    pub script: String,
    pub satoshis: i64,
    pub height: i64,
}

/// Normalised block header + metadata (`spec.md` §4.8 `getBlockOverview`).
#[derive(Debug, Clone, Serialize)]
pub struct BlockOverview {
    pub hash: String,
    pub version: i64,
    pub confirmations: i64,
    pub height: i64,
    #[serde(rename = "chainWork")]
    pub chain_work: String,
    #[serde(rename = "prevHash")]
    pub prev_hash: Option<String>,
    #[serde(rename = "nextHash")]
    pub next_hash: Option<String>,
    #[serde(rename = "merkleRoot")]
    pub merkle_root: String,
    pub time: i64,
    #[serde(rename = "medianTime")]
    pub median_time: i64,
    pub nonce: i64,
    pub bits: String,
    pub difficulty: f64,
}

/// One transaction input, normalised per `spec.md` §4.8.
#[derive(Debug, Clone, Serialize)]
pub struct DetailedInput {
    #[serde(rename = "prevTxId")]
    pub prev_tx_id: Option<String>,
    #[serde(rename = "outputIndex")]
    pub output_index: i64,
    pub sequence: i64,
    pub script: Option<String>,
    #[serde(rename = "scriptAsm")]
    pub script_asm: Option<String>,
    pub address: Option<String>,
    pub satoshis: i64,
}

/// One transaction output, normalised per `spec.md` §4.8.
#[derive(Debug, Clone, Serialize)]
pub struct DetailedOutput {
    pub satoshis: i64,
    pub script: String,
    #[serde(rename = "scriptAsm")]
    pub script_asm: String,
    pub address: Option<String>,
    #[serde(rename = "spentTxId")]
    pub spent_tx_id: Option<String>,
    #[serde(rename = "spentIndex")]
    pub spent_index: Option<i64>,
    #[serde(rename = "spentHeight")]
    pub spent_height: Option<i64>,
}

/// The fully normalised verbose transaction form (`spec.md` §4.8
/// `getDetailedTransaction`).
#[derive(Debug, Clone, Serialize)]
pub struct DetailedTransaction {
    pub hash: String,
    pub hex: String,
    #[serde(rename = "blockHash")]
    pub block_hash: Option<String>,
    /// `-1` when the transaction is still in the mempool.
    pub height: i64,
    #[serde(rename = "blockTimestamp")]
    pub block_timestamp: i64,
    pub version: i64,
    pub locktime: i64,
    pub coinbase: bool,
    pub inputs: Vec<DetailedInput>,
    pub outputs: Vec<DetailedOutput>,
    #[serde(rename = "inputSatoshis")]
    pub input_satoshis: i64,
    #[serde(rename = "outputSatoshis")]
    pub output_satoshis: i64,
    #[serde(rename = "feeSatoshis")]
    pub fee_satoshis: i64,
    pub confirmations: i64,
}

/// One paginated entry of `getAddressHistory`: a detailed transaction plus
/// the per-address appearance summary (`spec.md` §4.8.3).
#[derive(Debug, Clone, Default, Serialize)]
pub struct AddressAppearance {
    #[serde(rename = "inputIndexes")]
    pub input_indexes: Vec<usize>,
    #[serde(rename = "outputIndexes")]
    pub output_indexes: Vec<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailedAddressTransaction {
    #[serde(flatten)]
    pub transaction: DetailedTransaction,
    pub addresses: std::collections::BTreeMap<String, AddressAppearance>,
    pub satoshis: i64,
}

/// `getAddressSummary` result (`spec.md` §4.8.4).
#[derive(Debug, Clone, Serialize)]
pub struct AddressSummary {
    pub appearances: u64,
    #[serde(rename = "totalReceived")]
    pub total_received: i64,
    #[serde(rename = "totalSpent")]
    pub total_spent: i64,
    pub balance: i64,
    #[serde(rename = "unconfirmedAppearances")]
    pub unconfirmed_appearances: u64,
    #[serde(rename = "unconfirmedBalance")]
    pub unconfirmed_balance: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txids: Option<Vec<String>>,
}
