//! Token transfer transaction building
//!
//! A transfer spends selected token UTXOs plus one fee UTXO and emits the
//! state commitment, the receiver's token output, a token change output
//! back to the sender when the selection over-covers, and satoshi change.
//! Every token input carries its own ancestry proof. Same two-pass fee
//! flow and dust rule as the mint builder.

use bitcoin::absolute::LockTime;
use bitcoin::transaction::Version;
use bitcoin::{Amount, OutPoint, ScriptBuf, Transaction, TxOut, Txid};
use cat20_params::TokenMetadata;
use serde::{Deserialize, Serialize};

use crate::builder::{
    prevouts_of, script_spend_digest, total_input_value, unsigned_input, BuildContext,
};
use crate::chain::{Backtrace, TransferWitnessArgs};
use crate::estimator::{change_value, signed_vsize};
use crate::selection::total_amount;
use crate::state::{ChangeInfo, ProtocolState, TokenContract, TokenState, Utxo};
use crate::{Error, Result};

/// Result of a successful transfer broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    /// Id of the broadcast transaction
    pub txid: Txid,
    /// Amount delivered to the receiver (atomic units)
    pub sent: u128,
    /// The receiver's new token contract
    pub receiver: TokenContract,
    /// Token change returned to the sender, when the selection over-covered
    pub token_change: Option<TokenContract>,
    /// The satoshi change output, reusable as the next fee UTXO
    pub fee_change: Utxo,
}

/// A fully built transfer that has not been broadcast yet.
///
/// The merge engine memoizes these so a retried consolidation round
/// reuses prior work instead of rebuilding.
#[derive(Debug, Clone)]
pub(crate) struct TransferAssembly {
    pub(crate) tx: Transaction,
    new_state: ProtocolState,
    receiver_state: TokenState,
    change_state: Option<TokenState>,
    change_sats: u64,
    token_inputs: Vec<Utxo>,
}

impl TransferAssembly {
    /// Token inputs consumed by the assembled transaction
    pub(crate) fn token_inputs(&self) -> &[Utxo] {
        &self.token_inputs
    }

    /// Successor contracts once the transaction is broadcast as `txid`
    pub(crate) fn into_outcome(
        self,
        txid: Txid,
        metadata: &TokenMetadata,
        change_script: ScriptBuf,
        token_postage: u64,
    ) -> SendOutcome {
        let sent = self.receiver_state.amount;
        let receiver = TokenContract {
            utxo: Utxo::new(
                OutPoint::new(txid, 1),
                metadata.token_script.clone(),
                token_postage,
            ),
            protocol_state: self.new_state.clone(),
            state: self.receiver_state,
        };
        let token_change = self.change_state.map(|state| TokenContract {
            utxo: Utxo::new(
                OutPoint::new(txid, 2),
                metadata.token_script.clone(),
                token_postage,
            ),
            protocol_state: self.new_state,
            state,
        });
        let change_vout = (self.tx.output.len() - 1) as u32;
        let fee_change = Utxo::new(OutPoint::new(txid, change_vout), change_script, self.change_sats);

        SendOutcome {
            txid,
            sent,
            receiver,
            token_change,
            fee_change,
        }
    }
}

/// Assemble and sign a transfer without broadcasting it
pub(crate) async fn assemble_transfer(
    ctx: &BuildContext<'_>,
    metadata: &TokenMetadata,
    tokens: &[TokenContract],
    fee_utxo: &Utxo,
    receiver: &ScriptBuf,
    amount: u128,
    fee_rate: u64,
) -> Result<TransferAssembly> {
    let total = total_amount(tokens);
    if total < amount {
        return Err(Error::InsufficientTokenBalance {
            available: total,
            required: amount,
        });
    }

    let receiver_state = TokenState {
        owner: receiver.clone(),
        amount,
    };
    let change_state = (total > amount).then(|| TokenState {
        owner: ctx.signer.token_owner_script(),
        amount: total - amount,
    });

    let mut output_states = vec![receiver_state.clone()];
    if let Some(ref change) = change_state {
        output_states.push(change.clone());
    }

    let mut new_state = ProtocolState::empty();
    for (index, state) in output_states.iter().enumerate() {
        new_state.set_leaf(index, state.to_bytes());
    }

    // One ancestry proof per token input.
    let mut backtraces: Vec<Backtrace> = Vec::with_capacity(tokens.len());
    for token in tokens {
        let funding = ctx.chain.raw_transaction(token.utxo.outpoint.txid).await?;
        let grandparent_txid = funding
            .input
            .first()
            .ok_or_else(|| {
                Error::AncestryLookup(format!(
                    "funding transaction {} has no inputs",
                    token.utxo.outpoint.txid
                ))
            })?
            .previous_output
            .txid;
        let grandparent = ctx.chain.raw_transaction(grandparent_txid).await?;
        backtraces.push(ctx.engine.backtrace(&funding, &grandparent, 0)?);
    }

    let spent: Vec<&Utxo> = tokens
        .iter()
        .map(|token| &token.utxo)
        .chain(std::iter::once(fee_utxo))
        .collect();
    let prevouts = prevouts_of(&spent);
    let total_input = total_input_value(&spent)?;

    let mut outputs = vec![TxOut {
        value: Amount::ZERO,
        script_pubkey: ctx.engine.state_script(&new_state),
    }];
    for _ in &output_states {
        outputs.push(TxOut {
            value: Amount::from_sat(ctx.params.token_postage),
            script_pubkey: metadata.token_script.clone(),
        });
    }
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

    let leaf = ctx.engine.token_leaf(metadata)?;

    let finalize = |tx: &mut Transaction, change_sats: u64| -> Result<()> {
        let change_index = tx.output.len() - 1;
        tx.output[change_index].value = Amount::from_sat(change_sats);
        let change = ChangeInfo {
            script: ctx.signer.change_script(),
            value: change_sats,
        };
        for (index, token) in tokens.iter().enumerate() {
            let digest = script_spend_digest(tx, &prevouts, index, &leaf)?;
            let signature = ctx.signer.sign_schnorr(digest)?;
            let witness = ctx.engine.transfer_witness(&TransferWitnessArgs {
                new_state: &new_state,
                output_states: &output_states,
                input_state: &token.state,
                input_index: index,
                prev_protocol: &token.protocol_state,
                backtrace: &backtraces[index],
                change: &change,
                signature: &signature,
            })?;
            tx.input[index].witness = witness;
        }
        let fee_index = tokens.len();
        let witness = ctx.signer.fee_input_witness(tx, &prevouts, fee_index)?;
        tx.input[fee_index].witness = witness;
        Ok(())
    };

    let vsize = signed_vsize(&template, |tx| finalize(tx, 0))?;

    let reserved = ctx
        .params
        .token_postage
        .checked_mul(output_states.len() as u64)
        .ok_or_else(|| Error::InsufficientFunds("postage overflow".to_string()))?;
    let change_sats = change_value(total_input, vsize, fee_rate, reserved, ctx.params.dust_limit)?;

    tracing::debug!(
        vsize,
        fee_rate,
        change_sats,
        token_inputs = tokens.len(),
        "transfer transaction sized"
    );

    let mut tx = template;
    finalize(&mut tx, change_sats)?;

    Ok(TransferAssembly {
        tx,
        new_state,
        receiver_state,
        change_state,
        change_sats,
        token_inputs: tokens.iter().map(|token| token.utxo.clone()).collect(),
    })
}

/// Build, sign, and broadcast one transfer transaction
pub async fn build_transfer(
    ctx: &BuildContext<'_>,
    metadata: &TokenMetadata,
    tokens: &[TokenContract],
    fee_utxo: &Utxo,
    receiver: &ScriptBuf,
    amount: u128,
    fee_rate: u64,
    verify: bool,
) -> Result<SendOutcome> {
    let assembly =
        assemble_transfer(ctx, metadata, tokens, fee_utxo, receiver, amount, fee_rate).await?;

    if verify {
        for (index, utxo) in assembly.token_inputs().iter().enumerate() {
            ctx.engine
                .verify(utxo, &assembly.tx, index)
                .map_err(|e| Error::Verification(e.to_string()))?;
        }
    }

    let txid = ctx.chain.broadcast(&assembly.tx).await?;
    ctx.spends.mark_spent(&assembly.tx);

    tracing::info!(%txid, sent = %amount, "transfer broadcast");

    Ok(assembly.into_outcome(
        txid,
        metadata,
        ctx.signer.change_script(),
        ctx.params.token_postage,
    ))
}
