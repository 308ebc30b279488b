//! Token metadata model and decimal scaling

use std::fmt;
use std::str::FromStr;

use bitcoin::hashes::Hash;
use bitcoin::{ScriptBuf, Txid};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Identifies a token by its genesis outpoint.
///
/// Rendered as `<txid>_<vout>`; the byte form is the serialized txid
/// followed by the little-endian output index, matching the on-chain
/// genesis commitment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId {
    /// Genesis transaction id
    pub txid: Txid,
    /// Genesis output index
    pub vout: u32,
}

impl TokenId {
    /// Create a token id from its genesis outpoint parts
    pub fn new(txid: Txid, vout: u32) -> Self {
        Self { txid, vout }
    }

    /// Serialized form: txid bytes (as serialized on chain) + u32-LE index
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.txid.to_byte_array().to_vec();
        bytes.extend_from_slice(&self.vout.to_le_bytes());
        bytes
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.txid, self.vout)
    }
}

impl FromStr for TokenId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (txid, vout) = s
            .split_once('_')
            .ok_or_else(|| Error::InvalidTokenId(s.to_string()))?;
        let txid = Txid::from_str(txid).map_err(|_| Error::InvalidTokenId(s.to_string()))?;
        let vout = vout
            .parse::<u32>()
            .map_err(|_| Error::InvalidTokenId(s.to_string()))?;
        Ok(Self { txid, vout })
    }
}

/// Minter contract family attached to a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinterKind {
    /// Open minter: anyone may mint up to the per-mint limit
    #[serde(rename = "open-minter")]
    OpenMinter,
}

/// Issuance configuration in human units (as published in the genesis
/// metadata)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// Token name
    pub name: String,
    /// Ticker symbol
    pub symbol: String,
    /// Number of decimal places
    pub decimals: u8,
    /// Total supply cap
    pub max: u128,
    /// Supply allocated to the issuer on the first mint
    pub premine: u128,
    /// Maximum amount per mint
    pub limit: u128,
    /// Minter contract family
    pub minter: MinterKind,
}

impl TokenInfo {
    /// Scale the issuance configuration into atomic units
    pub fn scaled(&self) -> Result<ScaledTokenInfo> {
        Ok(ScaledTokenInfo {
            decimals: self.decimals,
            max: scale_by_decimals(self.max, self.decimals)?,
            premine: scale_by_decimals(self.premine, self.decimals)?,
            limit: scale_by_decimals(self.limit, self.decimals)?,
        })
    }
}

/// Issuance configuration in atomic units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaledTokenInfo {
    /// Number of decimal places used for scaling
    pub decimals: u8,
    /// Total supply cap (atomic units)
    pub max: u128,
    /// Premine allocation (atomic units)
    pub premine: u128,
    /// Per-mint limit (atomic units)
    pub limit: u128,
}

/// Multiply a human-unit amount into atomic units
pub fn scale_by_decimals(amount: u128, decimals: u8) -> Result<u128> {
    let factor = 10u128
        .checked_pow(decimals as u32)
        .ok_or_else(|| Error::AmountOverflow(format!("10^{decimals} exceeds u128")))?;
    amount
        .checked_mul(factor)
        .ok_or_else(|| Error::AmountOverflow(format!("{amount} * 10^{decimals} exceeds u128")))
}

/// Everything the engine needs to know about a deployed token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    /// Genesis outpoint identifying the token
    pub token_id: TokenId,
    /// Locking script of the minter contract outputs
    pub minter_script: ScriptBuf,
    /// Locking script of the token balance outputs
    pub token_script: ScriptBuf,
    /// Issuance configuration
    pub info: TokenInfo,
}
