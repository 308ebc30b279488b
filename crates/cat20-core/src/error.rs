//! Error types for the orchestration engine
//!
//! Every expected failure is a tagged value of [`Error`]; nonlocal
//! control flow is never used for expected paths such as insufficient
//! balance. The orchestration entry points are the only place the
//! [`RetryClass`] returned by [`Error::classify`] is acted upon.

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Orchestration engine errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad supply/limit arithmetic in the split planner
    #[error("Planning error: {0}")]
    Planning(String),

    /// First mint of a premined token must mint exactly the premine
    #[error("Premine mismatch: first mint must equal premine {expected}, requested {requested}")]
    PremineMismatch {
        /// Configured premine (atomic units)
        expected: u128,
        /// Requested mint amount (atomic units)
        requested: u128,
    },

    /// Requested mint amount exceeds the per-mint limit
    #[error("Mint limit exceeded: limit {limit}, requested {requested}")]
    LimitExceeded {
        /// Per-mint limit (atomic units)
        limit: u128,
        /// Requested mint amount (atomic units)
        requested: u128,
    },

    /// Could not resolve the premine origin from the minter's ancestry
    #[error("Ancestry lookup failed: {0}")]
    AncestryLookup(String),

    /// Satoshi balance cannot cover postage and fees above the dust limit
    #[error("Insufficient satoshis balance: {0}")]
    InsufficientFunds(String),

    /// No token UTXO subset covers the requested transfer amount
    #[error("Insufficient token balance: have {available}, need {required}")]
    InsufficientTokenBalance {
        /// Total available token amount (atomic units)
        available: u128,
        /// Requested transfer amount (atomic units)
        required: u128,
    },

    /// A consolidation round failed; the caller may retry merge-then-send
    #[error("Merge failed: {0}")]
    MergeFailed(#[source] Box<Error>),

    /// The network rejected a broadcast; the reason decides retryability
    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(String),

    /// Post-build contract verification failed (logic bug in the plan)
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Transient network failure
    #[error("Network error: {0}")]
    Network(String),

    /// A referenced transaction is not (yet) known to the chain source
    #[error("Transaction not found: {0}")]
    TxNotFound(String),

    /// Malformed or missing token metadata
    #[error("Invalid token metadata: {0}")]
    Metadata(String),

    /// No mintable minter UTXO is currently available
    #[error("No mintable minter available: {0}")]
    MinterUnavailable(String),

    /// Witness or signature production failed
    #[error("Signing error: {0}")]
    Signing(String),

    /// Sighash computation failed
    #[error("Sighash error: {0}")]
    Sighash(String),

    /// Parameter/metadata arithmetic error
    #[error("Parameter error: {0}")]
    Params(#[from] cat20_params::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// What the orchestration loop should do with a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Transient condition: back off and re-attempt with fresh inputs
    Retryable,
    /// Consolidation failed: retry the merge-then-send sequence
    MergeRequired,
    /// Structural failure: surface to the operator, no automatic retry
    Fatal,
}

/// Relay rejections that indicate mempool/network uncertainty rather than
/// an invalid transaction.
const RETRYABLE_REJECT_REASONS: &[&str] = &[
    "txn-mempool-conflict",
    "bad-txns-inputs-missingorspent",
    "mempool min fee not met",
    "min relay fee not met",
    "insufficient fee",
    "too-long-mempool-chain",
];

impl Error {
    /// Decide how the orchestration loop should react to this error
    pub fn classify(&self) -> RetryClass {
        match self {
            Error::Network(_) | Error::TxNotFound(_) => RetryClass::Retryable,
            Error::BroadcastRejected(reason) => {
                if broadcast_reason_retryable(reason) {
                    RetryClass::Retryable
                } else {
                    RetryClass::Fatal
                }
            }
            Error::MergeFailed(_) => RetryClass::MergeRequired,
            Error::Planning(_)
            | Error::PremineMismatch { .. }
            | Error::LimitExceeded { .. }
            | Error::AncestryLookup(_)
            | Error::InsufficientFunds(_)
            | Error::InsufficientTokenBalance { .. }
            | Error::Verification(_)
            | Error::Metadata(_)
            | Error::MinterUnavailable(_)
            | Error::Signing(_)
            | Error::Sighash(_)
            | Error::Params(_)
            | Error::Io(_)
            | Error::Serialization(_) => RetryClass::Fatal,
        }
    }

    /// Check whether the error should stop the retry loop immediately
    pub fn is_fatal(&self) -> bool {
        self.classify() == RetryClass::Fatal
    }

    /// Wrap an error originating from the merge engine
    pub fn merge(err: Error) -> Self {
        // Do not double-wrap when a nested consolidation already tagged it.
        match err {
            Error::MergeFailed(_) => err,
            other => Error::MergeFailed(Box::new(other)),
        }
    }
}

/// Inspect a relay reject reason for transient mempool conditions
pub fn broadcast_reason_retryable(reason: &str) -> bool {
    RETRYABLE_REJECT_REASONS
        .iter()
        .any(|needle| reason.contains(needle))
}
