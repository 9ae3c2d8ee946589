/// The one options record every public Query Broker operation accepts.
/// Recognised keys only; anything else is ignored by callers that build
/// this directly (`spec.md` §9's "enumerated options record").
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub query_mempool: Option<bool>,
    pub query_mempool_only: bool,
    pub no_tx_list: bool,
    /// Inclusive block-height range.
    pub start: Option<u64>,
    pub end: Option<u64>,
    /// Half-open, 0-indexed pagination range.
    pub from: Option<u64>,
    pub to: Option<u64>,
    pub allow_absurd_fees: bool,
}

impl QueryOptions {
    /// `queryMempool` defaults to `true` when unset (`spec.md` §4.8's
    /// `getAddressUnspentOutputs` contract).
    pub fn query_mempool_or_default(&self, default: bool) -> bool {
        self.query_mempool.unwrap_or(default)
    }

    pub fn has_height_range(&self) -> bool {
        self.start.is_some() || self.end.is_some()
    }
}
