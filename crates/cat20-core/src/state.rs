//! Protocol state model
//!
//! A contract UTXO carries its decoded protocol state next to the raw
//! outpoint/script/value triple. The engine never mutates a UTXO in
//! place; it consumes contracts and produces successor contracts.

use bitcoin::{OutPoint, ScriptBuf};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// An unspent output as the engine sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    /// Transaction id and output index
    pub outpoint: OutPoint,
    /// Locking script of the output
    pub script_pubkey: ScriptBuf,
    /// Satoshi value
    pub value: u64,
}

impl Utxo {
    /// Create a UTXO record
    pub fn new(outpoint: OutPoint, script_pubkey: ScriptBuf, value: u64) -> Self {
        Self {
            outpoint,
            script_pubkey,
            value,
        }
    }
}

/// Decoded state of a minter contract output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinterState {
    /// Locking script of the token the minter issues
    pub token_script: ScriptBuf,
    /// Whether the premine allocation has already been minted
    pub is_premined: bool,
    /// Remaining mintable supply (atomic units)
    pub remaining_supply: u128,
}

impl MinterState {
    /// Protocol byte encoding: token script, premined flag, remaining
    /// supply as a minimal script number.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.token_script.to_bytes();
        bytes.push(self.is_premined as u8);
        bytes.extend_from_slice(&encode_script_num(self.remaining_supply));
        bytes
    }
}

/// Decoded state of a token balance output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    /// Owner's locking script
    pub owner: ScriptBuf,
    /// Token balance (atomic units)
    pub amount: u128,
}

impl TokenState {
    /// Protocol byte encoding: owner script, amount as a minimal script
    /// number.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.owner.to_bytes();
        bytes.extend_from_slice(&encode_script_num(self.amount));
        bytes
    }
}

/// Ordered per-output state leaves committed by a transaction.
///
/// The commitment hash and the commitment output script over these leaves
/// belong to the contract engine; the orchestration core only assembles
/// the ordered list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolState {
    leaves: Vec<Vec<u8>>,
}

impl ProtocolState {
    /// Empty state (no committed outputs yet)
    pub fn empty() -> Self {
        Self::default()
    }

    /// Set the state leaf for output `index`, growing the list as needed
    pub fn set_leaf(&mut self, index: usize, data: Vec<u8>) {
        if self.leaves.len() <= index {
            self.leaves.resize(index + 1, Vec::new());
        }
        self.leaves[index] = data;
    }

    /// Ordered state leaves
    pub fn leaves(&self) -> &[Vec<u8>] {
        &self.leaves
    }
}

/// A minter contract UTXO with its decoded state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinterContract {
    /// The underlying output
    pub utxo: Utxo,
    /// Protocol state the output was committed under
    pub protocol_state: ProtocolState,
    /// Decoded minter state
    pub state: MinterState,
}

/// A token balance UTXO with its decoded state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenContract {
    /// The underlying output
    pub utxo: Utxo,
    /// Protocol state the output was committed under
    pub protocol_state: ProtocolState,
    /// Decoded balance state
    pub state: TokenState,
}

/// Change output as the contract witness encodes it.
///
/// The satoshi value is always 8 bytes little-endian so the witness size
/// does not depend on the value — the property the dry-run fee pass
/// relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeInfo {
    /// Change locking script
    pub script: ScriptBuf,
    /// Change satoshi value
    pub value: u64,
}

impl ChangeInfo {
    /// Witness byte encoding: script followed by u64-LE satoshis
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.script.to_bytes();
        bytes.extend_from_slice(&self.value.to_le_bytes());
        bytes
    }
}

/// Minimal little-endian script-number encoding of a non-negative amount.
///
/// Zero encodes as empty; a sign-pad byte is appended when the top bit of
/// the most significant byte is set.
pub fn encode_script_num(value: u128) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let mut bytes = value.to_le_bytes().to_vec();
    while bytes.len() > 1 && bytes[bytes.len() - 1] == 0 {
        bytes.pop();
    }
    if bytes[bytes.len() - 1] & 0x80 != 0 {
        bytes.push(0x00);
    }
    bytes
}

/// Decode a minimal little-endian script number into a non-negative amount
pub fn decode_script_num(bytes: &[u8]) -> Result<u128> {
    if bytes.is_empty() {
        return Ok(0);
    }
    if bytes.len() > 17 {
        return Err(Error::Metadata(format!(
            "script number too wide: {} bytes",
            bytes.len()
        )));
    }
    if bytes[bytes.len() - 1] & 0x80 != 0 {
        return Err(Error::Metadata("negative amount in state".to_string()));
    }
    let mut buf = [0u8; 17];
    buf[..bytes.len()].copy_from_slice(bytes);
    if buf[16] != 0 {
        return Err(Error::Metadata("amount exceeds u128".to_string()));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&buf[..16]);
    Ok(u128::from_le_bytes(low))
}
