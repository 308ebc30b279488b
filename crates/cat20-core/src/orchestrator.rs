//! Mint/send orchestration entry points
//!
//! The single place the retry classifier is applied. Every attempt is
//! strictly sequential (plan, build, sign, broadcast) and starts from
//! freshly fetched inputs and a fresh transaction plan, so no plan is
//! ever broadcast twice. Backoff is a fixed interval; the attempt budget
//! bounds the loop.

use std::sync::Arc;

use bitcoin::ScriptBuf;
use cat20_params::{ProtocolParams, ScaledTokenInfo, TokenMetadata};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::builder::{build_mint, BuildContext, MintOutcome};
use crate::chain::{ChainSource, ContractEngine, TokenIndex, TokenSigner};
use crate::config::OrchestratorConfig;
use crate::error::RetryClass;
use crate::merge::{merge_tokens, MergeCache};
use crate::planner::plan_mint;
use crate::selection::{pick, pick_large_fee_utxo, total_amount};
use crate::send::{build_transfer, SendOutcome};
use crate::spend::SpendLedger;
use crate::state::Utxo;
use crate::{Error, Result};

/// Drives mint and send requests against the collaborator boundaries
pub struct Orchestrator {
    chain: Arc<dyn ChainSource>,
    index: Arc<dyn TokenIndex>,
    engine: Arc<dyn ContractEngine>,
    signer: Arc<dyn TokenSigner>,
    spends: Arc<dyn SpendLedger>,
    params: ProtocolParams,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create an orchestrator with default policy and configuration
    pub fn new(
        chain: Arc<dyn ChainSource>,
        index: Arc<dyn TokenIndex>,
        engine: Arc<dyn ContractEngine>,
        signer: Arc<dyn TokenSigner>,
        spends: Arc<dyn SpendLedger>,
    ) -> Self {
        Self {
            chain,
            index,
            engine,
            signer,
            spends,
            params: ProtocolParams::default(),
            config: OrchestratorConfig::default(),
        }
    }

    /// Replace the orchestration configuration
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the protocol value policy
    pub fn with_params(mut self, params: ProtocolParams) -> Self {
        self.params = params;
        self
    }

    /// Current configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    fn ctx(&self) -> BuildContext<'_> {
        BuildContext {
            chain: self.chain.as_ref(),
            engine: self.engine.as_ref(),
            signer: self.signer.as_ref(),
            spends: self.spends.as_ref(),
            params: &self.params,
        }
    }

    async fn resolve_fee_rate(&self) -> Result<u64> {
        match self.config.fee_rate {
            Some(rate) => Ok(rate),
            None => self.chain.fee_rate().await,
        }
    }

    async fn spendable_fee_utxos(&self) -> Result<Vec<Utxo>> {
        let owner = self.signer.change_script();
        let utxos = self.index.fee_utxos(&owner).await?;
        let utxos = self.spends.filter_unspent(utxos);
        if utxos.is_empty() {
            return Err(Error::InsufficientFunds(
                "no spendable fee UTXOs".to_string(),
            ));
        }
        Ok(utxos)
    }

    /// Mint tokens, retrying transient failures with fixed backoff.
    ///
    /// `amount` of `None` uses the per-mint limit (or the premine on the
    /// first mint of a premined token).
    pub async fn mint(&self, metadata: &TokenMetadata, amount: Option<u128>) -> Result<MintOutcome> {
        let scaled = metadata.info.scaled()?;
        let mut last_err: Option<Error> = None;

        for attempt in 1..=self.config.max_attempts {
            match self.try_mint(metadata, &scaled, amount).await {
                Ok(outcome) => {
                    info!(txid = %outcome.txid, minted = %outcome.minted, "mint complete");
                    return Ok(outcome);
                }
                Err(err) => match err.classify() {
                    RetryClass::Fatal => return Err(err),
                    class => {
                        warn!(attempt, ?class, error = %err, "mint attempt failed, backing off");
                        last_err = Some(err);
                        sleep(self.config.retry_backoff).await;
                    }
                },
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::MinterUnavailable("mint attempts exhausted".to_string())))
    }

    async fn try_mint(
        &self,
        metadata: &TokenMetadata,
        scaled: &ScaledTokenInfo,
        amount: Option<u128>,
    ) -> Result<MintOutcome> {
        let fee_rate = self.resolve_fee_rate().await?;
        let fee_utxos = self.spendable_fee_utxos().await?;

        let count = self.index.minter_count(&metadata.token_id).await?;
        let scan = count.min(self.config.max_minter_scan);

        for offset in 0..scan {
            let Some(minter) = self.index.minter_at(metadata, offset).await? else {
                continue;
            };
            if !self.spends.is_unspent(&minter.utxo.outpoint) {
                continue;
            }
            if minter.state.is_premined
                && minter.state.remaining_supply < self.config.min_minter_supply
            {
                debug!(
                    offset,
                    remaining = %minter.state.remaining_supply,
                    "skipping fragment minter"
                );
                continue;
            }

            let plan = plan_mint(
                scaled,
                &minter.state,
                &metadata.token_script,
                amount,
                self.config.new_minters,
            )?;

            return build_mint(
                &self.ctx(),
                metadata,
                &minter,
                &plan,
                &fee_utxos,
                fee_rate,
                self.config.verify,
            )
            .await;
        }

        Err(Error::MinterUnavailable(format!(
            "no mintable minter among {scan} shards of {}",
            metadata.token_id
        )))
    }

    /// Send tokens, consolidating first when the selection is too
    /// fragmented, retrying per the error classification.
    pub async fn send(
        &self,
        metadata: &TokenMetadata,
        receiver: &ScriptBuf,
        amount: u128,
    ) -> Result<SendOutcome> {
        let mut cache = MergeCache::new();
        let mut last_err: Option<Error> = None;

        for attempt in 1..=self.config.max_attempts {
            match self.try_send(metadata, receiver, amount, &mut cache).await {
                Ok(outcome) => {
                    info!(txid = %outcome.txid, sent = %outcome.sent, "send complete");
                    return Ok(outcome);
                }
                Err(err) => match err.classify() {
                    RetryClass::Fatal => return Err(err),
                    RetryClass::MergeRequired => {
                        warn!(attempt, error = %err, "merge failed, retrying merge-then-send");
                        last_err = Some(err);
                        sleep(self.config.retry_backoff).await;
                    }
                    RetryClass::Retryable => {
                        warn!(attempt, error = %err, "send attempt failed, backing off");
                        last_err = Some(err);
                        sleep(self.config.retry_backoff).await;
                    }
                },
            }
        }

        Err(last_err.unwrap_or_else(|| Error::Network("send attempts exhausted".to_string())))
    }

    async fn try_send(
        &self,
        metadata: &TokenMetadata,
        receiver: &ScriptBuf,
        amount: u128,
        cache: &mut MergeCache,
    ) -> Result<SendOutcome> {
        let fee_rate = self.resolve_fee_rate().await?;
        let fee_utxos = self.spendable_fee_utxos().await?;

        let owner = self.signer.token_owner_script();
        let contracts: Vec<_> = self
            .index
            .token_contracts(metadata, &owner)
            .await?
            .into_iter()
            .filter(|contract| self.spends.is_unspent(&contract.utxo.outpoint))
            .collect();

        let picked = pick(&contracts, amount);
        if picked.is_empty() {
            return Err(Error::InsufficientTokenBalance {
                available: total_amount(&contracts),
                required: amount,
            });
        }

        let (tokens, fee_utxos) = if picked.len() > self.config.merge_fan_in {
            info!(
                inputs = picked.len(),
                fan_in = self.config.merge_fan_in,
                "selection exceeds fan-in, consolidating"
            );
            let (merged, fees) = merge_tokens(
                &self.ctx(),
                metadata,
                picked,
                fee_utxos,
                fee_rate,
                self.config.max_merge_inputs,
                cache,
            )
            .await?;
            let re_picked = pick(&merged, amount);
            if re_picked.is_empty() {
                return Err(Error::InsufficientTokenBalance {
                    available: total_amount(&merged),
                    required: amount,
                });
            }
            (re_picked, fees)
        } else {
            (picked, fee_utxos)
        };

        let spendable = self.spends.filter_unspent(fee_utxos);
        if spendable.is_empty() {
            return Err(Error::InsufficientFunds(
                "no spendable fee UTXOs after consolidation".to_string(),
            ));
        }
        let fee_utxo = pick_large_fee_utxo(&spendable);

        build_transfer(
            &self.ctx(),
            metadata,
            &tokens,
            &fee_utxo,
            receiver,
            amount,
            fee_rate,
            self.config.verify,
        )
        .await
    }
}
