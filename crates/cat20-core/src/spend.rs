//! Local spend tracking
//!
//! Broadcast does not confirm instantly; the ledger below keeps two
//! concurrent orchestration attempts in one process from selecting the
//! same fee or token UTXO. Attempts consult it before selecting inputs
//! and update it only after a successful broadcast.

use std::collections::HashSet;

use bitcoin::{OutPoint, Transaction};
use parking_lot::RwLock;

use crate::state::Utxo;

/// Spend-tracking boundary consulted by every orchestration attempt
pub trait SpendLedger: Send + Sync {
    /// Whether the outpoint is still spendable as far as we know
    fn is_unspent(&self, outpoint: &OutPoint) -> bool;

    /// Record every input of a successfully broadcast transaction as spent
    fn mark_spent(&self, tx: &Transaction);

    /// Drop UTXOs whose outpoints are already claimed by a broadcast
    fn filter_unspent(&self, utxos: Vec<Utxo>) -> Vec<Utxo> {
        utxos
            .into_iter()
            .filter(|utxo| self.is_unspent(&utxo.outpoint))
            .collect()
    }
}

/// In-process spend ledger over a read/write lock
#[derive(Debug, Default)]
pub struct MemorySpendLedger {
    spent: RwLock<HashSet<OutPoint>>,
}

impl MemorySpendLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked spent outpoints
    pub fn len(&self) -> usize {
        self.spent.read().len()
    }

    /// Whether any outpoint has been marked spent
    pub fn is_empty(&self) -> bool {
        self.spent.read().is_empty()
    }
}

impl SpendLedger for MemorySpendLedger {
    fn is_unspent(&self, outpoint: &OutPoint) -> bool {
        !self.spent.read().contains(outpoint)
    }

    fn mark_spent(&self, tx: &Transaction) {
        let mut spent = self.spent.write();
        for input in &tx.input {
            spent.insert(input.previous_output);
        }
    }
}
