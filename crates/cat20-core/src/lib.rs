//! CAT20 transaction-orchestration engine
//!
//! This crate decides *what* transaction to build and *how much* to pay
//! for open-minter token mints and transfers whose state lives entirely
//! in UTXOs: supply split planning, dry-run fee estimation, the two-pass
//! transaction builders, coin selection and consolidation, and the retry
//! classification driving safe re-attempts. Contract execution, signing,
//! and network access stay behind the collaborator traits in [`chain`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod builder;
pub mod chain;
pub mod config;
pub mod error;
pub mod estimator;
pub mod merge;
pub mod orchestrator;
pub mod planner;
pub mod selection;
pub mod send;
pub mod spend;
pub mod state;

#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use builder::{build_mint, BuildContext, MintOutcome};
pub use chain::{
    Backtrace, ChainSource, ContractEngine, MintWitnessArgs, TokenIndex, TokenSigner,
    TransferWitnessArgs,
};
pub use config::OrchestratorConfig;
pub use error::{broadcast_reason_retryable, Error, Result, RetryClass};
pub use estimator::{change_value, fee_for, signed_vsize, SCHNORR_SIGNATURE_SIZE};
pub use merge::{merge_tokens, MergeCache};
pub use orchestrator::Orchestrator;
pub use planner::{plan_mint, split_amounts, MintPlan};
pub use selection::{pick, pick_large_fee_utxo, total_amount};
pub use send::{build_transfer, SendOutcome};
pub use spend::{MemorySpendLedger, SpendLedger};
pub use state::{
    decode_script_num, encode_script_num, ChangeInfo, MinterContract, MinterState, ProtocolState,
    TokenContract, TokenState, Utxo,
};
