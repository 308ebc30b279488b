//! Coin selection over token-carrying contract UTXOs
//!
//! Greedy by design: predictable latency matters more here than a
//! globally minimal input count.

use crate::state::{TokenContract, Utxo};

/// Total token amount held by a contract set
pub fn total_amount(contracts: &[TokenContract]) -> u128 {
    contracts.iter().map(|c| c.state.amount).sum()
}

/// Select token UTXOs covering `target`.
///
/// A single covering UTXO is preferred; otherwise contracts are
/// accumulated in the given order until the running sum covers the
/// target. Returns an empty vector when no subset reaches the target —
/// the caller treats that as insufficient token balance.
pub fn pick(contracts: &[TokenContract], target: u128) -> Vec<TokenContract> {
    if let Some(single) = contracts.iter().find(|c| c.state.amount >= target) {
        return vec![single.clone()];
    }

    let mut selected = Vec::new();
    let mut covered = 0u128;
    for contract in contracts {
        covered = covered.saturating_add(contract.state.amount);
        selected.push(contract.clone());
        if covered >= target {
            tracing::debug!(
                inputs = selected.len(),
                covered = %covered,
                target = %target,
                "picked tokens"
            );
            return selected;
        }
    }

    Vec::new()
}

/// Select the single largest fee UTXO.
///
/// Only called once consolidation has guaranteed a spendable fee input;
/// an empty candidate set is a programming-contract violation, not a
/// runtime condition.
pub fn pick_large_fee_utxo(utxos: &[Utxo]) -> Utxo {
    assert!(!utxos.is_empty(), "no fee UTXO candidates");
    utxos
        .iter()
        .max_by_key(|utxo| utxo.value)
        .cloned()
        .expect("non-empty candidate set")
}
