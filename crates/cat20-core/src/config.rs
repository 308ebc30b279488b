//! Orchestration tuning knobs
//!
//! The fan-in threshold, the retry cadence, and the successor count are
//! tuned policy, not protocol invariants, so they travel as explicit
//! configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for the mint/send orchestration loops
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Desired number of successor minter outputs per mint
    pub new_minters: usize,
    /// Selections larger than this many token inputs trigger a merge
    pub merge_fan_in: usize,
    /// Maximum token inputs consumed by one consolidation transaction
    pub max_merge_inputs: usize,
    /// Fixed backoff between retried attempts
    pub retry_backoff: Duration,
    /// Attempt budget for one mint/send request
    pub max_attempts: u32,
    /// Minter UTXOs below this remaining supply are skipped as fragments
    pub min_minter_supply: u128,
    /// Upper bound on minter shards scanned per mint request
    pub max_minter_scan: u64,
    /// Run the contract verifier against finished inputs before broadcast
    pub verify: bool,
    /// Fee rate override in sat/vB; `None` asks the chain source
    pub fee_rate: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            new_minters: 2,
            merge_fan_in: 4,
            max_merge_inputs: 4,
            retry_backoff: Duration::from_secs(6),
            max_attempts: 10,
            min_minter_supply: 100,
            max_minter_scan: 32,
            verify: false,
            fee_rate: None,
        }
    }
}
