//! Mempool-overlay algorithms: normalising a daemon's confirmed-only index
//! views into mempool-aware ones (`spec.md` §4.8.1, §4.8.2, §4.8.5).

use crate::model::{AddressDelta, ConfirmedUtxo, Utxo};
use std::collections::HashSet;

/// Overlays mempool deltas onto a confirmed UTXO set for one address.
///
/// `script_for_address` synthesises a `scriptPubKey` for a mempool-created
/// output; deriving it is a chain-primitives concern outside this crate.
pub fn overlay_utxos(
    confirmed: &[ConfirmedUtxo],
    mempool: &[AddressDelta],
    script_for_address: impl Fn(&str) -> Option<String>,
) -> Vec<Utxo> {
    let consumed: HashSet<(String, i64)> = mempool.iter().filter_map(AddressDelta::spends).collect();

    let mut filtered: Vec<Utxo> = confirmed
        .iter()
        .filter(|u| !consumed.contains(&(u.txid.clone(), u.output_index)))
        .map(|u| Utxo {
            address: u.address.clone(),
            txid: u.txid.clone(),
            output_index: u.output_index,
            script: Some(u.script.clone()),
            satoshis: u.satoshis,
            height: Some(u.height),
            timestamp: None,
        })
        .collect();

    let mut creations: Vec<(&AddressDelta, Utxo)> = mempool
        .iter()
        .filter(|d| d.is_creation())
        .filter(|d| !consumed.contains(&(d.txid.clone(), d.output_index)))
        .map(|d| {
            let utxo = Utxo {
                address: d.address.clone(),
                txid: d.txid.clone(),
                output_index: d.output_index,
                script: script_for_address(&d.address),
                satoshis: d.satoshis,
                height: None,
                timestamp: Some(d.timestamp),
            };
            (d, utxo)
        })
        .collect();

    creations.sort_by(|a, b| b.0.timestamp.cmp(&a.0.timestamp));

    let mut result: Vec<Utxo> = creations.into_iter().map(|(_, u)| u).collect();
    result.append(&mut filtered);
    result
}

/// Overlays mempool txids onto a confirmed txid list (`spec.md` §4.8.2).
pub fn overlay_txids(
    confirmed: &[String],
    mempool: &[String],
    query_mempool_only: bool,
    query_mempool: bool,
    has_height_range: bool,
) -> Vec<String> {
    if query_mempool_only {
        return mempool.to_vec();
    }
    if has_height_range {
        return confirmed.to_vec();
    }
    if !query_mempool {
        return confirmed.to_vec();
    }

    let mut seen = HashSet::new();
    let mut combined = Vec::with_capacity(mempool.len() + confirmed.len());
    for id in mempool.iter().chain(confirmed.iter()) {
        if seen.insert(id.clone()) {
            combined.push(id.clone());
        }
    }
    combined
}

/// `spec.md` §4.8.5: `0` for mempool transactions, clamped to `0` on overflow.
pub fn confirmations(height: i64, tip: i64) -> i64 {
    if height < 0 {
        return 0;
    }
    match 1i64.checked_add(tip).and_then(|v| v.checked_sub(height)) {
        Some(v) if v >= 0 => v,
        Some(_) => {
            tracing::warn!(height, tip, "confirmations computed negative, clamping to 0");
            0
        }
        None => {
            tracing::warn!(height, tip, "confirmations overflowed, clamping to 0");
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn confirmed_utxo(txid: &str, index: i64, satoshis: i64) -> ConfirmedUtxo {
        ConfirmedUtxo {
            address: "A".to_string(),
            txid: txid.to_string(),
            output_index: index,
            script: "76a914...88ac".to_string(),
            satoshis,
            height: 100,
        }
    }

    fn spend_delta(txid: &str, index: i64) -> AddressDelta {
        AddressDelta {
            address: "A".to_string(),
            txid: "spender".to_string(),
            output_index: 0,
            satoshis: -7_679_241,
            timestamp: 1,
            prev_txid: Some(txid.to_string()),
            prev_out: Some(index),
        }
    }

    /// Concrete Scenario #2: three confirmed UTXOs are each spent in the
    /// mempool and one new output is created; only the creation survives.
    #[test]
    fn mempool_overlay_scenario_two() {
        let confirmed = vec![
            confirmed_utxo("X", 1, 7_679_241),
            confirmed_utxo("X", 2, 7_679_241),
            confirmed_utxo("X", 3, 7_679_241),
        ];
        let mempool = vec![
            spend_delta("X", 1),
            spend_delta("X", 2),
            spend_delta("X", 3),
            AddressDelta {
                address: "A".to_string(),
                txid: "Y".to_string(),
                output_index: 1,
                satoshis: 100_000,
                timestamp: 2,
                prev_txid: None,
                prev_out: None,
            },
        ];

        let result = overlay_utxos(&confirmed, &mempool, |_| None);

        assert_eq!(result.len(), 1);
        assert_eq!(result[0].txid, "Y");
        assert_eq!(result[0].output_index, 1);
        assert_eq!(result[0].satoshis, 100_000);
    }

    #[test]
    fn zero_value_consumed_output_is_still_dropped() {
        let confirmed = vec![confirmed_utxo("X", 1, 0)];
        let mempool = vec![spend_delta("X", 1)];
        assert!(overlay_utxos(&confirmed, &mempool, |_| None).is_empty());
    }

    #[test]
    fn creation_consumed_later_in_same_mempool_is_dropped() {
        let confirmed = vec![];
        let create = AddressDelta {
            address: "A".to_string(),
            txid: "Y".to_string(),
            output_index: 1,
            satoshis: 50_000,
            timestamp: 1,
            prev_txid: None,
            prev_out: None,
        };
        let spend_it = spend_delta("Y", 1);
        let result = overlay_utxos(&confirmed, &[create, spend_it], |_| None);
        assert!(result.is_empty());
    }

    #[test]
    fn txids_query_mempool_only_returns_just_mempool() {
        let confirmed = vec!["c1".to_string()];
        let mempool = vec!["m1".to_string()];
        assert_eq!(overlay_txids(&confirmed, &mempool, true, true, false), vec!["m1".to_string()]);
    }

    #[test]
    fn txids_height_range_bypasses_mempool() {
        let confirmed = vec!["c1".to_string()];
        let mempool = vec!["m1".to_string()];
        assert_eq!(overlay_txids(&confirmed, &mempool, false, true, true), vec!["c1".to_string()]);
    }

    #[test]
    fn txids_combines_and_dedups_mempool_then_confirmed() {
        let confirmed = vec!["shared".to_string(), "c1".to_string()];
        let mempool = vec!["m1".to_string(), "shared".to_string()];
        assert_eq!(
            overlay_txids(&confirmed, &mempool, false, true, false),
            vec!["m1".to_string(), "shared".to_string(), "c1".to_string()]
        );
    }

    #[test]
    fn confirmations_zero_in_mempool() {
        assert_eq!(confirmations(-1, 1000), 0);
    }

    #[test]
    fn confirmations_one_at_tip() {
        assert_eq!(confirmations(1000, 1000), 1);
    }

    #[test]
    fn confirmations_clamped_on_future_height() {
        assert_eq!(confirmations(1000, 500), 0);
    }
}
