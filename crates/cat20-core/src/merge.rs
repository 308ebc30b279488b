//! UTXO consolidation
//!
//! An over-fragmented token UTXO set is folded into fewer, larger-balance
//! UTXOs through rounds of transfer-to-self transactions, each consuming
//! at most the configured input budget. Constructed-but-unbroadcast
//! transactions are memoized by their exact input set so a retried round
//! reuses prior work. Every failure inside the engine is wrapped in the
//! distinguished [`Error::MergeFailed`] kind.

use std::collections::HashMap;

use bitcoin::OutPoint;
use cat20_params::TokenMetadata;

use crate::builder::BuildContext;
use crate::selection::{pick_large_fee_utxo, total_amount};
use crate::send::{assemble_transfer, TransferAssembly};
use crate::state::{TokenContract, Utxo};
use crate::{Error, Result};

/// Memoized consolidation transactions keyed by their input outpoints
#[derive(Debug, Default)]
pub struct MergeCache {
    entries: HashMap<Vec<OutPoint>, TransferAssembly>,
}

impl MergeCache {
    /// Empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached, not-yet-broadcast consolidations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no pending work
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn cache_key(tokens: &[TokenContract], fee_utxo: &Utxo) -> Vec<OutPoint> {
    let mut key: Vec<OutPoint> = tokens
        .iter()
        .map(|token| token.utxo.outpoint)
        .chain(std::iter::once(fee_utxo.outpoint))
        .collect();
    key.sort();
    key
}

/// Consolidate a fragmented token UTXO set.
///
/// Rounds repeat until at most one UTXO remains or no further reduction
/// is possible. Returns the surviving token contracts and the fee UTXOs
/// still spendable (including the change of each consolidation).
pub async fn merge_tokens(
    ctx: &BuildContext<'_>,
    metadata: &TokenMetadata,
    mut tokens: Vec<TokenContract>,
    mut fee_utxos: Vec<Utxo>,
    fee_rate: u64,
    max_inputs: usize,
    cache: &mut MergeCache,
) -> Result<(Vec<TokenContract>, Vec<Utxo>)> {
    let batch_size = max_inputs.max(1);

    while tokens.len() > 1 {
        let mut next_round: Vec<TokenContract> = Vec::new();
        let mut progressed = false;

        let batches: Vec<Vec<TokenContract>> = tokens
            .chunks(batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();

        for batch in batches {
            if batch.len() == 1 {
                next_round.extend(batch);
                continue;
            }

            let spendable = ctx.spends.filter_unspent(fee_utxos.clone());
            if spendable.is_empty() {
                return Err(Error::merge(Error::InsufficientFunds(
                    "no spendable fee UTXOs for consolidation".to_string(),
                )));
            }
            let fee_utxo = pick_large_fee_utxo(&spendable);

            let owner = ctx.signer.token_owner_script();
            let amount = total_amount(&batch);
            let key = cache_key(&batch, &fee_utxo);

            let assembly = match cache.entries.get(&key) {
                Some(hit) => {
                    tracing::debug!(inputs = key.len(), "reusing cached consolidation");
                    hit.clone()
                }
                None => {
                    let built = assemble_transfer(
                        ctx, metadata, &batch, &fee_utxo, &owner, amount, fee_rate,
                    )
                    .await
                    .map_err(Error::merge)?;
                    cache.entries.insert(key.clone(), built.clone());
                    built
                }
            };

            let txid = match ctx.chain.broadcast(&assembly.tx).await {
                Ok(txid) => txid,
                Err(err) => return Err(Error::merge(err)),
            };
            ctx.spends.mark_spent(&assembly.tx);
            cache.entries.remove(&key);

            let outcome = assembly.into_outcome(
                txid,
                metadata,
                ctx.signer.change_script(),
                ctx.params.token_postage,
            );
            fee_utxos.retain(|utxo| utxo.outpoint != fee_utxo.outpoint);
            fee_utxos.push(outcome.fee_change);
            next_round.push(outcome.receiver);
            progressed = true;
        }

        if !progressed {
            break;
        }
        tracing::info!(
            before = tokens.len(),
            after = next_round.len(),
            "consolidation round complete"
        );
        tokens = next_round;
    }

    Ok((tokens, fee_utxos))
}
