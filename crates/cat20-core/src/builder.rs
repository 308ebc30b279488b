//! Open-minter mint transaction building
//!
//! One mint consumes the prior minter UTXO plus fee UTXOs and emits the
//! state commitment, the successor minters, the minted token output, and
//! change. Steps 1-7 are pure computation over copies; the only side
//! effects are the final broadcast and the spend-ledger update after it
//! succeeds. Failure at any step produces a tagged error and no
//! transaction.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::taproot::{LeafVersion, TapLeafHash};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};
use cat20_params::{ProtocolParams, TokenMetadata};
use serde::{Deserialize, Serialize};

use crate::chain::{ChainSource, ContractEngine, MintWitnessArgs, TokenSigner};
use crate::estimator::{change_value, signed_vsize};
use crate::planner::MintPlan;
use crate::spend::SpendLedger;
use crate::state::{ChangeInfo, MinterContract, ProtocolState, TokenContract, TokenState, Utxo};
use crate::{Error, Result};

/// The minter contract is always spent as input 0
const MINTER_INPUT: usize = 0;

/// Collaborators and value policy shared by the builders
pub struct BuildContext<'a> {
    /// Base-ledger access
    pub chain: &'a dyn ChainSource,
    /// Contract execution/verification engine
    pub engine: &'a dyn ContractEngine,
    /// Key custody
    pub signer: &'a dyn TokenSigner,
    /// Spend tracking
    pub spends: &'a dyn SpendLedger,
    /// Postage and dust policy
    pub params: &'a ProtocolParams,
}

/// Result of a successful mint broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintOutcome {
    /// Id of the broadcast transaction
    pub txid: Txid,
    /// Amount minted (atomic units)
    pub minted: u128,
    /// Successor minter contracts emitted by the transaction
    pub minters: Vec<MinterContract>,
    /// The minted token contract
    pub token: TokenContract,
}

/// Taproot script-spend digest for one input
pub(crate) fn script_spend_digest(
    tx: &Transaction,
    prevouts: &[TxOut],
    input_index: usize,
    leaf: &ScriptBuf,
) -> Result<[u8; 32]> {
    let leaf_hash = TapLeafHash::from_script(leaf, LeafVersion::TapScript);
    let mut cache = SighashCache::new(tx);
    let sighash = cache
        .taproot_script_spend_signature_hash(
            input_index,
            &Prevouts::All(prevouts),
            leaf_hash,
            TapSighashType::Default,
        )
        .map_err(|e| Error::Sighash(e.to_string()))?;
    Ok(sighash.to_byte_array())
}

/// A spendable input as a transaction input with empty witness
pub(crate) fn unsigned_input(outpoint: OutPoint) -> TxIn {
    TxIn {
        previous_output: outpoint,
        script_sig: ScriptBuf::new(),
        sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
        witness: Witness::new(),
    }
}

/// Prevout records for sighash computation
pub(crate) fn prevouts_of(utxos: &[&Utxo]) -> Vec<TxOut> {
    utxos
        .iter()
        .map(|utxo| TxOut {
            value: Amount::from_sat(utxo.value),
            script_pubkey: utxo.script_pubkey.clone(),
        })
        .collect()
}

/// Sum of input values, guarding against overflow
pub(crate) fn total_input_value(utxos: &[&Utxo]) -> Result<u64> {
    utxos.iter().try_fold(0u64, |acc, utxo| {
        acc.checked_add(utxo.value)
            .ok_or_else(|| Error::InsufficientFunds("input value overflow".to_string()))
    })
}

/// Resolve the premine recipient from the minter's ancestry.
///
/// The original premine owner is committed in the locking witness of the
/// transaction that created the minter being spent.
async fn resolve_premine_owner(
    ctx: &BuildContext<'_>,
    minter: &MinterContract,
) -> Result<ScriptBuf> {
    let funding = ctx
        .chain
        .raw_transaction(minter.utxo.outpoint.txid)
        .await?;
    let input = funding.input.first().ok_or_else(|| {
        Error::AncestryLookup(format!(
            "funding transaction {} has no inputs",
            minter.utxo.outpoint.txid
        ))
    })?;
    ctx.engine
        .premine_owner(&input.witness)
        .map_err(|e| Error::AncestryLookup(e.to_string()))
}

/// Build, sign, and broadcast one mint transaction.
///
/// Two-pass fee flow: the assembled transaction is finalized once against
/// a zero-valued change output to measure its exact signed virtual size,
/// then finalized for real with the computed change. Both passes run the
/// same finalization path, so the sizes agree bit-for-bit in structure.
pub async fn build_mint(
    ctx: &BuildContext<'_>,
    metadata: &TokenMetadata,
    minter: &MinterContract,
    plan: &MintPlan,
    fee_utxos: &[Utxo],
    fee_rate: u64,
    verify: bool,
) -> Result<MintOutcome> {
    let scaled = metadata.info.scaled()?;

    // New protocol state: one leaf per successor minter, then the token.
    let mut new_state = ProtocolState::empty();
    for (index, state) in plan.minter_states.iter().enumerate() {
        new_state.set_leaf(index, state.to_bytes());
    }
    let token_state = TokenState {
        owner: ctx.signer.token_owner_script(),
        amount: plan.mint_amount,
    };
    new_state.set_leaf(plan.successor_count(), token_state.to_bytes());

    // Premine recipient: ourselves on the premine mint, the original
    // premine owner (resolved from ancestry) afterwards.
    let premine_owner = if scaled.premine == 0 {
        None
    } else if plan.is_premine {
        Some(ctx.signer.token_owner_script())
    } else {
        Some(resolve_premine_owner(ctx, minter).await?)
    };

    // Ancestry proof for the consumed minter.
    let funding = ctx
        .chain
        .raw_transaction(minter.utxo.outpoint.txid)
        .await?;
    let grandparent_txid = funding
        .input
        .first()
        .ok_or_else(|| {
            Error::AncestryLookup(format!(
                "funding transaction {} has no inputs",
                minter.utxo.outpoint.txid
            ))
        })?
        .previous_output
        .txid;
    let grandparent = ctx.chain.raw_transaction(grandparent_txid).await?;
    let backtrace = ctx.engine.backtrace(&funding, &grandparent, MINTER_INPUT)?;

    // Assemble inputs and outputs around a placeholder change value.
    let spent: Vec<&Utxo> = std::iter::once(&minter.utxo)
        .chain(fee_utxos.iter())
        .collect();
    let prevouts = prevouts_of(&spent);
    let total_input = total_input_value(&spent)?;

    let mut outputs = vec![TxOut {
        value: Amount::ZERO,
        script_pubkey: ctx.engine.state_script(&new_state),
    }];
    for _ in 0..plan.successor_count() {
        outputs.push(TxOut {
            value: Amount::from_sat(ctx.params.minter_postage),
            script_pubkey: minter.utxo.script_pubkey.clone(),
        });
    }
    outputs.push(TxOut {
        value: Amount::from_sat(ctx.params.token_postage),
        script_pubkey: metadata.token_script.clone(),
    });
    outputs.push(TxOut {
        value: Amount::ZERO,
        script_pubkey: ctx.signer.change_script(),
    });

    let template = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: spent
            .iter()
            .map(|utxo| unsigned_input(utxo.outpoint))
            .collect(),
        output: outputs,
    };

    let leaf = ctx.engine.minter_leaf(metadata, premine_owner.as_ref())?;
    tracing::debug!(
        minter = %minter.utxo.outpoint,
        leaf = %hex::encode(leaf.as_bytes()),
        "assembled mint transaction"
    );

    // Shared finalization path for the dry run and the final build.
    let finalize = |tx: &mut Transaction, change_sats: u64| -> Result<()> {
        let change_index = tx.output.len() - 1;
        tx.output[change_index].value = Amount::from_sat(change_sats);
        let change = ChangeInfo {
            script: ctx.signer.change_script(),
            value: change_sats,
        };
        let digest = script_spend_digest(tx, &prevouts, MINTER_INPUT, &leaf)?;
        let signature = ctx.signer.sign_schnorr(digest)?;
        let witness = ctx.engine.mint_witness(&MintWitnessArgs {
            new_state: &new_state,
            token_state: &token_state,
            split_amounts: &plan.split_amounts,
            prev_state: &minter.state,
            prev_protocol: &minter.protocol_state,
            backtrace: &backtrace,
            change: &change,
            minter_postage: ctx.params.minter_postage,
            token_postage: ctx.params.token_postage,
            signature: &signature,
        })?;
        tx.input[MINTER_INPUT].witness = witness;
        for index in 1..tx.input.len() {
            let witness = ctx.signer.fee_input_witness(tx, &prevouts, index)?;
            tx.input[index].witness = witness;
        }
        Ok(())
    };

    let vsize = signed_vsize(&template, |tx| finalize(tx, 0))?;

    let reserved = ctx
        .params
        .minter_postage
        .checked_mul(plan.successor_count() as u64)
        .and_then(|postage| postage.checked_add(ctx.params.token_postage))
        .ok_or_else(|| Error::InsufficientFunds("postage overflow".to_string()))?;
    let change_sats = change_value(total_input, vsize, fee_rate, reserved, ctx.params.dust_limit)?;

    tracing::debug!(
        vsize,
        fee_rate,
        change_sats,
        successors = plan.successor_count(),
        "mint transaction sized"
    );

    let mut tx = template;
    finalize(&mut tx, change_sats)?;

    if verify {
        ctx.engine
            .verify(&minter.utxo, &tx, MINTER_INPUT)
            .map_err(|e| Error::Verification(e.to_string()))?;
    }

    let txid = ctx.chain.broadcast(&tx).await?;
    ctx.spends.mark_spent(&tx);

    tracing::info!(%txid, minted = %plan.mint_amount, "mint broadcast");

    let minters = plan
        .minter_states
        .iter()
        .enumerate()
        .map(|(index, state)| MinterContract {
            utxo: Utxo::new(
                OutPoint::new(txid, 1 + index as u32),
                minter.utxo.script_pubkey.clone(),
                ctx.params.minter_postage,
            ),
            protocol_state: new_state.clone(),
            state: state.clone(),
        })
        .collect();

    let token = TokenContract {
        utxo: Utxo::new(
            OutPoint::new(txid, 1 + plan.successor_count() as u32),
            metadata.token_script.clone(),
            ctx.params.token_postage,
        ),
        protocol_state: new_state,
        state: token_state,
    };

    Ok(MintOutcome {
        txid,
        minted: plan.mint_amount,
        minters,
        token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan_mint;
    use crate::spend::{MemorySpendLedger, SpendLedger};
    use crate::testing::{seed_fee_utxo, seed_minter, test_metadata, MockChain, MockEngine, MockSigner};

    struct Fixture {
        chain: MockChain,
        engine: MockEngine,
        signer: MockSigner,
        spends: MemorySpendLedger,
        params: ProtocolParams,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                chain: MockChain::new(2),
                engine: MockEngine::default(),
                signer: MockSigner::default(),
                spends: MemorySpendLedger::new(),
                params: ProtocolParams::default(),
            }
        }

        fn ctx(&self) -> BuildContext<'_> {
            BuildContext {
                chain: &self.chain,
                engine: &self.engine,
                signer: &self.signer,
                spends: &self.spends,
                params: &self.params,
            }
        }
    }

    #[tokio::test]
    async fn test_mint_happy_path() {
        let fx = Fixture::new();
        let metadata = test_metadata(10_000, 0, 400);
        let minter = seed_minter(&fx.chain, &metadata, 1_000, true, 1);
        let scaled = metadata.info.scaled().unwrap();
        let plan = plan_mint(&scaled, &minter.state, &metadata.token_script, Some(300), 2).unwrap();

        let fee = seed_fee_utxo(100_000, 2);
        let outcome = build_mint(&fx.ctx(), &metadata, &minter, &plan, &[fee], 2, false)
            .await
            .unwrap();

        assert_eq!(outcome.minted, 300);
        assert_eq!(outcome.minters.len(), 2);
        assert_eq!(outcome.minters[0].state.remaining_supply, 400);
        assert_eq!(outcome.minters[1].state.remaining_supply, 300);
        assert_eq!(outcome.token.state.amount, 300);

        // Output layout: state, successors, token, change.
        let tx = fx.chain.broadcast_at(0);
        assert_eq!(tx.output.len(), 1 + 2 + 1 + 1);
        assert_eq!(tx.output[0].value, Amount::ZERO);
        assert_eq!(tx.output[1].value.to_sat(), fx.params.minter_postage);
        assert_eq!(tx.output[3].value.to_sat(), fx.params.token_postage);
        assert!(tx.output[4].value.to_sat() >= fx.params.dust_limit);

        // Consumed outpoints are tracked as spent.
        assert!(!fx.spends.is_unspent(&minter.utxo.outpoint));
    }

    #[tokio::test]
    async fn test_fee_determinism() {
        // The dry-run vsize equals the final signed vsize: build the same
        // plan twice against very different change values.
        let fx = Fixture::new();
        let metadata = test_metadata(10_000, 0, 400);
        let minter = seed_minter(&fx.chain, &metadata, 1_000, true, 1);
        let scaled = metadata.info.scaled().unwrap();
        let plan = plan_mint(&scaled, &minter.state, &metadata.token_script, Some(300), 2).unwrap();

        let small_fee = seed_fee_utxo(10_000, 2);
        let large_fee = seed_fee_utxo(90_000_000, 3);

        build_mint(&fx.ctx(), &metadata, &minter, &plan, &[small_fee], 2, false)
            .await
            .unwrap();

        let fx2 = Fixture::new();
        let minter2 = seed_minter(&fx2.chain, &metadata, 1_000, true, 1);
        build_mint(&fx2.ctx(), &metadata, &minter2, &plan, &[large_fee], 2, false)
            .await
            .unwrap();

        assert_eq!(
            fx.chain.broadcast_at(0).vsize(),
            fx2.chain.broadcast_at(0).vsize()
        );
    }

    #[tokio::test]
    async fn test_fee_matches_vsize_times_rate() {
        let fx = Fixture::new();
        let metadata = test_metadata(10_000, 0, 400);
        let minter = seed_minter(&fx.chain, &metadata, 1_000, true, 1);
        let scaled = metadata.info.scaled().unwrap();
        let plan = plan_mint(&scaled, &minter.state, &metadata.token_script, Some(300), 2).unwrap();

        let fee = seed_fee_utxo(100_000, 2);
        let fee_value = fee.value;
        build_mint(&fx.ctx(), &metadata, &minter, &plan, &[fee], 3, false)
            .await
            .unwrap();

        let tx = fx.chain.broadcast_at(0);
        let total_in = fee_value + minter.utxo.value;
        let total_out: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
        assert_eq!(total_in - total_out, tx.vsize() as u64 * 3);
    }

    #[tokio::test]
    async fn test_dust_change_rejected_without_broadcast() {
        let fx = Fixture::new();
        let metadata = test_metadata(10_000, 0, 400);
        let minter = seed_minter(&fx.chain, &metadata, 1_000, true, 1);
        let scaled = metadata.info.scaled().unwrap();
        let plan = plan_mint(&scaled, &minter.state, &metadata.token_script, Some(300), 2).unwrap();

        // Enough to cover postage but not fee + dust.
        let fee = seed_fee_utxo(1_500, 2);
        let err = build_mint(&fx.ctx(), &metadata, &minter, &plan, &[fee], 2, false)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InsufficientFunds(_)));
        assert_eq!(fx.chain.broadcast_count(), 0);
        assert!(fx.spends.is_unspent(&minter.utxo.outpoint));
    }

    #[tokio::test]
    async fn test_premine_followup_resolves_ancestry() {
        let mut fx = Fixture::new();
        fx.engine.premine_owner = Some(crate::testing::p2tr_script(0x77));
        let metadata = test_metadata(10_000, 500, 400);
        // Premine already minted: the original owner comes from ancestry.
        let minter = seed_minter(&fx.chain, &metadata, 700, true, 1);
        let scaled = metadata.info.scaled().unwrap();
        let plan = plan_mint(&scaled, &minter.state, &metadata.token_script, Some(300), 2).unwrap();

        let fee = seed_fee_utxo(100_000, 2);
        let outcome = build_mint(&fx.ctx(), &metadata, &minter, &plan, &[fee], 2, false)
            .await
            .unwrap();
        assert_eq!(outcome.minted, 300);
    }

    #[tokio::test]
    async fn test_premine_followup_ancestry_failure_is_fatal() {
        let fx = Fixture::new();
        // Engine cannot decode the premine owner.
        let metadata = test_metadata(10_000, 500, 400);
        let minter = seed_minter(&fx.chain, &metadata, 700, true, 1);
        let scaled = metadata.info.scaled().unwrap();
        let plan = plan_mint(&scaled, &minter.state, &metadata.token_script, Some(300), 2).unwrap();

        let fee = seed_fee_utxo(100_000, 2);
        let err = build_mint(&fx.ctx(), &metadata, &minter, &plan, &[fee], 2, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AncestryLookup(_)));
        assert_eq!(fx.chain.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn test_verification_failure_stops_broadcast() {
        let mut fx = Fixture::new();
        fx.engine.fail_verify = true;
        let metadata = test_metadata(10_000, 0, 400);
        let minter = seed_minter(&fx.chain, &metadata, 1_000, true, 1);
        let scaled = metadata.info.scaled().unwrap();
        let plan = plan_mint(&scaled, &minter.state, &metadata.token_script, Some(300), 2).unwrap();

        let fee = seed_fee_utxo(100_000, 2);
        let err = build_mint(&fx.ctx(), &metadata, &minter, &plan, &[fee], 2, true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Verification(_)));
        assert_eq!(fx.chain.broadcast_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_rejection_propagates() {
        let fx = Fixture::new();
        fx.chain.push_reject("txn-mempool-conflict");
        let metadata = test_metadata(10_000, 0, 400);
        let minter = seed_minter(&fx.chain, &metadata, 1_000, true, 1);
        let scaled = metadata.info.scaled().unwrap();
        let plan = plan_mint(&scaled, &minter.state, &metadata.token_script, Some(300), 2).unwrap();

        let fee = seed_fee_utxo(100_000, 2);
        let err = build_mint(&fx.ctx(), &metadata, &minter, &plan, &[fee], 2, false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BroadcastRejected(_)));
        // Nothing marked spent on a failed broadcast.
        assert!(fx.spends.is_unspent(&minter.utxo.outpoint));
    }
}
