//! Deterministic mock collaborators for tests
//!
//! Enabled through the `test-helpers` feature (the crate depends on
//! itself with that feature in dev-dependencies). The mocks honor the
//! size contracts the engine relies on: signatures are 64 bytes derived
//! from the digest, and witness elements never change length with the
//! change amount.

use std::collections::{HashMap, VecDeque};
use std::str::FromStr;

use async_trait::async_trait;
use bitcoin::absolute::LockTime;
use bitcoin::hashes::{sha256, Hash};
use bitcoin::opcodes::all::OP_RETURN;
use bitcoin::script::Builder as ScriptBuilder;
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::transaction::Version;
use bitcoin::{
    OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use cat20_params::{MinterKind, TokenId, TokenInfo, TokenMetadata, MINTER_POSTAGE, TOKEN_POSTAGE};
use parking_lot::Mutex;

use crate::chain::{
    Backtrace, ChainSource, ContractEngine, MintWitnessArgs, TokenIndex, TokenSigner,
    TransferWitnessArgs,
};
use crate::state::{
    MinterContract, MinterState, ProtocolState, TokenContract, TokenState, Utxo,
};
use crate::{Error, Result};

/// A taproot-shaped locking script distinguished by `tag`
pub fn p2tr_script(tag: u8) -> ScriptBuf {
    let mut bytes = vec![0x51, 0x20];
    bytes.extend_from_slice(&[tag; 32]);
    ScriptBuf::from_bytes(bytes)
}

/// 64 deterministic bytes derived from a digest
fn digest_signature(digest: [u8; 32]) -> [u8; 64] {
    let a = sha256::Hash::hash(&digest).to_byte_array();
    let b = sha256::Hash::hash(&a).to_byte_array();
    let mut sig = [0u8; 64];
    sig[..32].copy_from_slice(&a);
    sig[32..].copy_from_slice(&b);
    sig
}

/// Token metadata fixture
pub fn test_metadata(max: u128, premine: u128, limit: u128) -> TokenMetadata {
    let txid = Txid::from_str("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b")
        .expect("valid txid");
    TokenMetadata {
        token_id: TokenId::new(txid, 0),
        minter_script: p2tr_script(0x10),
        token_script: p2tr_script(0x20),
        info: TokenInfo {
            name: "mock".into(),
            symbol: "MOCK".into(),
            decimals: 0,
            max,
            premine,
            limit,
            minter: MinterKind::OpenMinter,
        },
    }
}

/// Deterministic signer over fixed owner scripts
#[derive(Debug, Clone)]
pub struct MockSigner {
    /// Script receiving satoshi change
    pub change: ScriptBuf,
    /// Script receiving tokens
    pub token_owner: ScriptBuf,
}

impl Default for MockSigner {
    fn default() -> Self {
        Self {
            change: p2tr_script(0x30),
            token_owner: p2tr_script(0x40),
        }
    }
}

impl TokenSigner for MockSigner {
    fn change_script(&self) -> ScriptBuf {
        self.change.clone()
    }

    fn token_owner_script(&self) -> ScriptBuf {
        self.token_owner.clone()
    }

    fn sign_schnorr(&self, digest: [u8; 32]) -> Result<[u8; 64]> {
        Ok(digest_signature(digest))
    }

    fn fee_input_witness(
        &self,
        tx: &Transaction,
        prevouts: &[TxOut],
        input_index: usize,
    ) -> Result<Witness> {
        let mut cache = SighashCache::new(tx);
        let sighash = cache
            .taproot_key_spend_signature_hash(
                input_index,
                &Prevouts::All(prevouts),
                TapSighashType::Default,
            )
            .map_err(|e| Error::Sighash(e.to_string()))?;
        let sig = digest_signature(sighash.to_byte_array());
        Ok(Witness::from_slice(&[&sig[..]]))
    }
}

/// Contract engine stub with deterministic, fixed-width witness assembly
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    /// Premine owner returned by ancestry decoding; `None` makes decoding fail
    pub premine_owner: Option<ScriptBuf>,
    /// Force `verify` to fail
    pub fail_verify: bool,
}

impl ContractEngine for MockEngine {
    fn state_script(&self, state: &ProtocolState) -> ScriptBuf {
        let mut data = Vec::new();
        for leaf in state.leaves() {
            data.extend_from_slice(leaf);
            data.push(0xff);
        }
        let digest = sha256::Hash::hash(&data).to_byte_array();
        ScriptBuilder::new()
            .push_opcode(OP_RETURN)
            .push_slice(digest)
            .into_script()
    }

    fn minter_leaf(
        &self,
        metadata: &TokenMetadata,
        premine_owner: Option<&ScriptBuf>,
    ) -> Result<ScriptBuf> {
        let mut bytes = vec![0xc0];
        bytes.extend_from_slice(&metadata.token_id.to_bytes());
        if let Some(owner) = premine_owner {
            bytes.extend_from_slice(owner.as_bytes());
        }
        Ok(ScriptBuf::from_bytes(bytes))
    }

    fn token_leaf(&self, metadata: &TokenMetadata) -> Result<ScriptBuf> {
        let mut bytes = vec![0xc1];
        bytes.extend_from_slice(&metadata.token_id.to_bytes());
        Ok(ScriptBuf::from_bytes(bytes))
    }

    fn mint_witness(&self, args: &MintWitnessArgs<'_>) -> Result<Witness> {
        let mut shares = Vec::new();
        for share in args.split_amounts {
            shares.extend_from_slice(&(*share as u64).to_le_bytes());
        }
        let elements: Vec<Vec<u8>> = vec![
            args.signature.to_vec(),
            shares,
            args.prev_state.to_bytes(),
            args.token_state.to_bytes(),
            args.change.to_bytes(),
            args.minter_postage.to_le_bytes().to_vec(),
            args.token_postage.to_le_bytes().to_vec(),
            args.backtrace.0.concat(),
            vec![0xc0; 33],
        ];
        Ok(Witness::from_slice(&elements))
    }

    fn transfer_witness(&self, args: &TransferWitnessArgs<'_>) -> Result<Witness> {
        let mut states = Vec::new();
        for state in args.output_states {
            states.extend_from_slice(&state.to_bytes());
            states.push(0xfe);
        }
        let elements: Vec<Vec<u8>> = vec![
            args.signature.to_vec(),
            states,
            args.input_state.to_bytes(),
            (args.input_index as u32).to_le_bytes().to_vec(),
            args.change.to_bytes(),
            args.backtrace.0.concat(),
            vec![0xc1; 33],
        ];
        Ok(Witness::from_slice(&elements))
    }

    fn premine_owner(&self, _locking_witness: &Witness) -> Result<ScriptBuf> {
        self.premine_owner
            .clone()
            .ok_or_else(|| Error::AncestryLookup("no premine owner in witness".to_string()))
    }

    fn backtrace(
        &self,
        prev_tx: &Transaction,
        prev_prev_tx: &Transaction,
        input_index: usize,
    ) -> Result<Backtrace> {
        Ok(Backtrace(vec![
            prev_tx.compute_txid().to_byte_array().to_vec(),
            prev_prev_tx.compute_txid().to_byte_array().to_vec(),
            (input_index as u32).to_le_bytes().to_vec(),
        ]))
    }

    fn verify(&self, utxo: &Utxo, _tx: &Transaction, input_index: usize) -> Result<()> {
        if self.fail_verify {
            return Err(Error::Verification(format!(
                "unlocking input {input_index} of {} failed",
                utxo.outpoint
            )));
        }
        Ok(())
    }
}

/// In-memory chain with scriptable broadcast rejections
#[derive(Debug, Default)]
pub struct MockChain {
    txs: Mutex<HashMap<Txid, Transaction>>,
    broadcasts: Mutex<Vec<Transaction>>,
    rejects: Mutex<VecDeque<String>>,
    fee_rate: u64,
}

impl MockChain {
    /// Chain with the given fee rate
    pub fn new(fee_rate: u64) -> Self {
        Self {
            fee_rate,
            ..Default::default()
        }
    }

    /// Make a transaction fetchable
    pub fn register(&self, tx: &Transaction) -> Txid {
        let txid = tx.compute_txid();
        self.txs.lock().insert(txid, tx.clone());
        txid
    }

    /// Queue a reject reason for the next broadcast
    pub fn push_reject(&self, reason: &str) {
        self.rejects.lock().push_back(reason.to_string());
    }

    /// Transactions accepted so far
    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().len()
    }

    /// Clone of the `n`-th accepted transaction
    pub fn broadcast_at(&self, n: usize) -> Transaction {
        self.broadcasts.lock()[n].clone()
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn raw_transaction(&self, txid: Txid) -> Result<Transaction> {
        self.txs
            .lock()
            .get(&txid)
            .cloned()
            .ok_or_else(|| Error::TxNotFound(txid.to_string()))
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<Txid> {
        if let Some(reason) = self.rejects.lock().pop_front() {
            return Err(Error::BroadcastRejected(reason));
        }
        let txid = self.register(tx);
        self.broadcasts.lock().push(tx.clone());
        Ok(txid)
    }

    async fn fee_rate(&self) -> Result<u64> {
        Ok(self.fee_rate)
    }
}

/// In-memory token/minter index
#[derive(Debug, Default)]
pub struct MockIndex {
    fee: Mutex<Vec<Utxo>>,
    tokens: Mutex<Vec<TokenContract>>,
    minters: Mutex<Vec<MinterContract>>,
}

impl MockIndex {
    /// Empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a fee UTXO
    pub fn add_fee_utxo(&self, utxo: Utxo) {
        self.fee.lock().push(utxo);
    }

    /// Add a token contract
    pub fn add_token(&self, contract: TokenContract) {
        self.tokens.lock().push(contract);
    }

    /// Add a minter contract
    pub fn add_minter(&self, contract: MinterContract) {
        self.minters.lock().push(contract);
    }
}

#[async_trait]
impl TokenIndex for MockIndex {
    async fn fee_utxos(&self, _owner: &ScriptBuf) -> Result<Vec<Utxo>> {
        Ok(self.fee.lock().clone())
    }

    async fn token_contracts(
        &self,
        _metadata: &TokenMetadata,
        _owner: &ScriptBuf,
    ) -> Result<Vec<TokenContract>> {
        Ok(self.tokens.lock().clone())
    }

    async fn minter_count(&self, _token_id: &TokenId) -> Result<u64> {
        Ok(self.minters.lock().len() as u64)
    }

    async fn minter_at(
        &self,
        _metadata: &TokenMetadata,
        offset: u64,
    ) -> Result<Option<MinterContract>> {
        Ok(self.minters.lock().get(offset as usize).cloned())
    }
}

fn anchor_tx(tag: u8) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::null(),
            script_sig: ScriptBuf::from_bytes(vec![tag]),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: bitcoin::Amount::from_sat(10_000),
            script_pubkey: p2tr_script(tag),
        }],
    }
}

fn child_of(parent: &Transaction, tag: u8, output: TxOut) -> Transaction {
    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(parent.compute_txid(), 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
            witness: Witness::from_slice(&[&[tag; 16][..], &[0xcb; 33][..]]),
        }],
        output: vec![output],
    }
}

/// Seed a minter contract with a fetchable two-generation ancestry
pub fn seed_minter(
    chain: &MockChain,
    metadata: &TokenMetadata,
    remaining_supply: u128,
    is_premined: bool,
    tag: u8,
) -> MinterContract {
    let grandparent = anchor_tx(tag);
    let parent = child_of(
        &grandparent,
        tag,
        TxOut {
            value: bitcoin::Amount::from_sat(MINTER_POSTAGE),
            script_pubkey: metadata.minter_script.clone(),
        },
    );
    chain.register(&grandparent);
    let parent_txid = chain.register(&parent);

    let state = MinterState {
        token_script: metadata.token_script.clone(),
        is_premined,
        remaining_supply,
    };
    let mut protocol_state = ProtocolState::empty();
    protocol_state.set_leaf(0, state.to_bytes());

    MinterContract {
        utxo: Utxo::new(
            OutPoint::new(parent_txid, 0),
            metadata.minter_script.clone(),
            MINTER_POSTAGE,
        ),
        protocol_state,
        state,
    }
}

/// Seed a token contract with a fetchable two-generation ancestry
pub fn seed_token(
    chain: &MockChain,
    metadata: &TokenMetadata,
    owner: &ScriptBuf,
    amount: u128,
    tag: u8,
) -> TokenContract {
    let grandparent = anchor_tx(tag);
    let parent = child_of(
        &grandparent,
        tag,
        TxOut {
            value: bitcoin::Amount::from_sat(TOKEN_POSTAGE),
            script_pubkey: metadata.token_script.clone(),
        },
    );
    chain.register(&grandparent);
    let parent_txid = chain.register(&parent);

    let state = TokenState {
        owner: owner.clone(),
        amount,
    };
    let mut protocol_state = ProtocolState::empty();
    protocol_state.set_leaf(0, state.to_bytes());

    TokenContract {
        utxo: Utxo::new(
            OutPoint::new(parent_txid, 0),
            metadata.token_script.clone(),
            TOKEN_POSTAGE,
        ),
        protocol_state,
        state,
    }
}

/// A plain fee UTXO unconnected to any registered ancestry
pub fn seed_fee_utxo(value: u64, tag: u8) -> Utxo {
    let tx = anchor_tx(tag);
    Utxo::new(
        OutPoint::new(tx.compute_txid(), 0),
        p2tr_script(tag),
        value,
    )
}
