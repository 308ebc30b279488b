//! Postage and dust constants
//!
//! Every protocol-carrying output is assigned a fixed minimal satoshi value
//! ("postage"). The values below follow current chain policy.

use serde::{Deserialize, Serialize};

/// Postage assigned to the token metadata output (satoshis)
pub const METADATA_POSTAGE: u64 = 546;

/// Postage assigned to a guard contract output (satoshis)
pub const GUARD_POSTAGE: u64 = 332;

/// Postage assigned to a minter contract output (satoshis)
pub const MINTER_POSTAGE: u64 = 331;

/// Postage assigned to a token balance output (satoshis)
pub const TOKEN_POSTAGE: u64 = 330;

/// Minimum satoshi value for a change output; anything below is disallowed
pub const DUST_LIMIT: u64 = 546;

/// Protocol value policy passed explicitly into the transaction builders.
///
/// Defaults wire the chain-policy constants; tests substitute arbitrary
/// policies to exercise the fee arithmetic deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    /// Satoshi value of each successor minter output
    pub minter_postage: u64,
    /// Satoshi value of the token balance output
    pub token_postage: u64,
    /// Satoshi value of a guard contract output
    pub guard_postage: u64,
    /// Satoshi value of the metadata output
    pub metadata_postage: u64,
    /// Minimum allowed change output value
    pub dust_limit: u64,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            minter_postage: MINTER_POSTAGE,
            token_postage: TOKEN_POSTAGE,
            guard_postage: GUARD_POSTAGE,
            metadata_postage: METADATA_POSTAGE,
            dust_limit: DUST_LIMIT,
        }
    }
}
