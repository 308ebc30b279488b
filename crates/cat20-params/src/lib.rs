//! CAT20 protocol parameters and token metadata
//!
//! This crate provides the protocol-level constants (postage values, dust
//! limit), the token metadata model, and decimal scaling shared by the
//! transaction-orchestration engine.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod postage;
pub mod token;

pub use postage::{
    ProtocolParams, DUST_LIMIT, GUARD_POSTAGE, METADATA_POSTAGE, MINTER_POSTAGE, TOKEN_POSTAGE,
};
pub use token::{scale_by_decimals, MinterKind, ScaledTokenInfo, TokenId, TokenInfo, TokenMetadata};

/// Error types for parameter operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed token id string
    #[error("Invalid token id: {0}")]
    InvalidTokenId(String),

    /// Amount does not fit after decimal scaling
    #[error("Amount overflow: {0}")]
    AmountOverflow(String),
}

/// Result type for parameter operations
pub type Result<T> = std::result::Result<T, Error>;
