//! Collaborator interfaces
//!
//! The engine decides *what* transaction to build and *how much* to pay;
//! everything else crosses one of the narrow boundaries below. Network
//! access is async; signing and contract witness assembly are deferred
//! synchronous computation so nothing is signed before the final digest
//! is known.

use async_trait::async_trait;
use bitcoin::{ScriptBuf, Transaction, TxOut, Txid, Witness};
use cat20_params::{TokenId, TokenMetadata};
use serde::{Deserialize, Serialize};

use crate::state::{
    ChangeInfo, MinterContract, MinterState, ProtocolState, TokenContract, TokenState, Utxo,
};
use crate::Result;

/// Opaque ancestry proof authorizing a contract state transition.
///
/// Produced by the contract engine from the two ancestor transactions of
/// the input being spent; the orchestration core only moves it into the
/// unlocking witness.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backtrace(pub Vec<Vec<u8>>);

/// Read/broadcast access to the base ledger
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Fetch a raw transaction by id
    async fn raw_transaction(&self, txid: Txid) -> Result<Transaction>;

    /// Broadcast a signed transaction, returning its id
    async fn broadcast(&self, tx: &Transaction) -> Result<Txid>;

    /// Current fee rate in satoshis per virtual byte
    async fn fee_rate(&self) -> Result<u64>;
}

/// Indexed queries over token and minter UTXO sets
#[async_trait]
pub trait TokenIndex: Send + Sync {
    /// Plain fee-paying UTXOs locked to `owner`
    async fn fee_utxos(&self, owner: &ScriptBuf) -> Result<Vec<Utxo>>;

    /// Token balance UTXOs of `owner` for the given token
    async fn token_contracts(
        &self,
        metadata: &TokenMetadata,
        owner: &ScriptBuf,
    ) -> Result<Vec<TokenContract>>;

    /// Number of live minter UTXOs for the token
    async fn minter_count(&self, token_id: &TokenId) -> Result<u64>;

    /// Minter UTXO at `offset` in index order, if still live
    async fn minter_at(
        &self,
        metadata: &TokenMetadata,
        offset: u64,
    ) -> Result<Option<MinterContract>>;
}

/// Key custody boundary.
///
/// `sign_schnorr` is the deferred signature callback: a fixed-size
/// signature over whatever digest the builder hands it, which is what
/// makes the dry-run fee pass byte-exact.
pub trait TokenSigner: Send + Sync {
    /// Locking script receiving satoshi change
    fn change_script(&self) -> ScriptBuf;

    /// Locking script receiving minted tokens
    fn token_owner_script(&self) -> ScriptBuf;

    /// Schnorr signature over a 32-byte digest
    fn sign_schnorr(&self, digest: [u8; 32]) -> Result<[u8; 64]>;

    /// Key-spend witness for the fee input at `input_index`
    fn fee_input_witness(
        &self,
        tx: &Transaction,
        prevouts: &[TxOut],
        input_index: usize,
    ) -> Result<Witness>;
}

/// Arguments for assembling a minter unlocking witness
#[derive(Debug)]
pub struct MintWitnessArgs<'a> {
    /// State committed by the new transaction
    pub new_state: &'a ProtocolState,
    /// Token state minted to the receiver
    pub token_state: &'a TokenState,
    /// Successor minter shares (zeros already dropped)
    pub split_amounts: &'a [u128],
    /// State of the minter being consumed
    pub prev_state: &'a MinterState,
    /// Protocol state the consumed minter was committed under
    pub prev_protocol: &'a ProtocolState,
    /// Ancestry proof for the consumed minter
    pub backtrace: &'a Backtrace,
    /// Change output as the witness encodes it
    pub change: &'a ChangeInfo,
    /// Satoshi value of each successor minter output
    pub minter_postage: u64,
    /// Satoshi value of the token output
    pub token_postage: u64,
    /// Schnorr signature over the transaction digest
    pub signature: &'a [u8; 64],
}

/// Arguments for assembling a token-transfer unlocking witness
#[derive(Debug)]
pub struct TransferWitnessArgs<'a> {
    /// State committed by the new transaction
    pub new_state: &'a ProtocolState,
    /// Token states emitted by the transaction, in output order
    pub output_states: &'a [TokenState],
    /// State of the token input being unlocked
    pub input_state: &'a TokenState,
    /// Index of the input being unlocked
    pub input_index: usize,
    /// Protocol state the consumed token was committed under
    pub prev_protocol: &'a ProtocolState,
    /// Ancestry proof for the consumed token
    pub backtrace: &'a Backtrace,
    /// Change output as the witness encodes it
    pub change: &'a ChangeInfo,
    /// Schnorr signature over the transaction digest
    pub signature: &'a [u8; 64],
}

/// Smart-contract execution/verification boundary.
///
/// The engine constructs locking scripts, commitment scripts, unlocking
/// witnesses, and ancestry proofs; this core never inspects their
/// internals.
pub trait ContractEngine: Send + Sync {
    /// Commitment output script for a protocol state
    fn state_script(&self, state: &ProtocolState) -> ScriptBuf;

    /// Tapscript leaf of the minter contract, for sighash computation.
    ///
    /// `premine_owner` is `None` for tokens without a premine.
    fn minter_leaf(
        &self,
        metadata: &TokenMetadata,
        premine_owner: Option<&ScriptBuf>,
    ) -> Result<ScriptBuf>;

    /// Tapscript leaf of the token contract, for sighash computation
    fn token_leaf(&self, metadata: &TokenMetadata) -> Result<ScriptBuf>;

    /// Unlocking witness for a minter input
    fn mint_witness(&self, args: &MintWitnessArgs<'_>) -> Result<Witness>;

    /// Unlocking witness for a token input
    fn transfer_witness(&self, args: &TransferWitnessArgs<'_>) -> Result<Witness>;

    /// Decode the premine owner from a minter's locking witness
    fn premine_owner(&self, locking_witness: &Witness) -> Result<ScriptBuf>;

    /// Ancestry proof from the spent output's transaction and its parent
    fn backtrace(
        &self,
        prev_tx: &Transaction,
        prev_prev_tx: &Transaction,
        input_index: usize,
    ) -> Result<Backtrace>;

    /// Verify a finished input against the contract (policy-gated)
    fn verify(&self, utxo: &Utxo, tx: &Transaction, input_index: usize) -> Result<()>;
}
