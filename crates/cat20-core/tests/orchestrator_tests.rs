//! End-to-end orchestration tests over mocked collaborators
//!
//! Time is paused so the fixed retry backoff costs nothing.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use cat20_core::TokenSigner;
use cat20_core::testing::{
    p2tr_script, seed_fee_utxo, seed_minter, seed_token, test_metadata, MockChain, MockEngine,
    MockIndex, MockSigner,
};
use cat20_core::{
    Error, MemorySpendLedger, Orchestrator, OrchestratorConfig, SpendLedger, TokenIndex,
};
use cat20_params::TokenMetadata;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

struct Harness {
    chain: Arc<MockChain>,
    index: Arc<MockIndex>,
    signer: MockSigner,
    spends: Arc<MemorySpendLedger>,
    orchestrator: Orchestrator,
}

fn harness(engine: MockEngine, config: OrchestratorConfig) -> Harness {
    init_tracing();
    let chain = Arc::new(MockChain::new(2));
    let index = Arc::new(MockIndex::new());
    let signer = MockSigner::default();
    let spends = Arc::new(MemorySpendLedger::new());

    let orchestrator = Orchestrator::new(
        Arc::clone(&chain) as Arc<dyn cat20_core::ChainSource>,
        Arc::clone(&index) as Arc<dyn cat20_core::TokenIndex>,
        Arc::new(engine),
        Arc::new(signer.clone()),
        Arc::clone(&spends) as Arc<dyn SpendLedger>,
    )
    .with_config(config);

    Harness {
        chain,
        index,
        signer,
        spends,
        orchestrator,
    }
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_attempts: 3,
        retry_backoff: Duration::from_secs(6),
        ..Default::default()
    }
}

fn seed_wallet(h: &Harness) {
    h.index.add_fee_utxo(seed_fee_utxo(50_000_000, 0xf0));
    h.index.add_fee_utxo(seed_fee_utxo(10_000_000, 0xf1));
}

fn seed_tokens(h: &Harness, metadata: &TokenMetadata, amounts: &[u128]) {
    let owner = h.signer.token_owner_script();
    for (index, &amount) in amounts.iter().enumerate() {
        h.index
            .add_token(seed_token(&h.chain, metadata, &owner, amount, 0x50 + index as u8));
    }
}

#[tokio::test(start_paused = true)]
async fn test_mint_end_to_end() -> Result<()> {
    let h = harness(MockEngine::default(), fast_config());
    let metadata = test_metadata(10_000, 0, 400);
    seed_wallet(&h);
    h.index
        .add_minter(seed_minter(&h.chain, &metadata, 1_000, true, 1));

    let outcome = h.orchestrator.mint(&metadata, Some(300)).await?;

    assert_eq!(outcome.minted, 300);
    assert_eq!(outcome.minters.len(), 2);
    assert_eq!(
        outcome
            .minters
            .iter()
            .map(|m| m.state.remaining_supply)
            .sum::<u128>()
            + outcome.minted,
        1_000
    );
    assert_eq!(h.chain.broadcast_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_mint_retries_transient_rejection() -> Result<()> {
    let h = harness(MockEngine::default(), fast_config());
    let metadata = test_metadata(10_000, 0, 400);
    seed_wallet(&h);
    h.index
        .add_minter(seed_minter(&h.chain, &metadata, 1_000, true, 1));

    // First broadcast is rejected by a transient mempool condition.
    h.chain.push_reject("txn-mempool-conflict");

    let outcome = h.orchestrator.mint(&metadata, Some(300)).await?;
    assert_eq!(outcome.minted, 300);
    assert_eq!(h.chain.broadcast_count(), 1);

    // The minter was not burned by the failed attempt.
    assert_eq!(outcome.minters.len(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_mint_fatal_rejection_stops() {
    let h = harness(MockEngine::default(), fast_config());
    let metadata = test_metadata(10_000, 0, 400);
    seed_wallet(&h);
    h.index
        .add_minter(seed_minter(&h.chain, &metadata, 1_000, true, 1));

    h.chain.push_reject("mandatory-script-verify-flag-failed");
    h.chain.push_reject("should never be consumed");

    let err = h.orchestrator.mint(&metadata, Some(300)).await.unwrap_err();
    assert!(matches!(err, Error::BroadcastRejected(_)));
    assert_eq!(h.chain.broadcast_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_mint_premine_mismatch_is_fatal() {
    let h = harness(MockEngine::default(), fast_config());
    let metadata = test_metadata(10_000, 500, 400);
    seed_wallet(&h);
    // Premine not yet minted.
    h.index
        .add_minter(seed_minter(&h.chain, &metadata, 9_500, false, 1));

    let err = h.orchestrator.mint(&metadata, Some(400)).await.unwrap_err();
    assert!(matches!(
        err,
        Error::PremineMismatch {
            expected: 500,
            requested: 400
        }
    ));
    assert_eq!(h.chain.broadcast_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_mint_premine_exact_succeeds() -> Result<()> {
    let h = harness(MockEngine::default(), fast_config());
    // Keep the post-premine leftover within two successor shares.
    let metadata = test_metadata(1_300, 500, 400);
    seed_wallet(&h);
    h.index
        .add_minter(seed_minter(&h.chain, &metadata, 800, false, 1));

    let outcome = h.orchestrator.mint(&metadata, Some(500)).await?;
    assert_eq!(outcome.minted, 500);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_mint_skips_fragment_minters() -> Result<()> {
    let h = harness(MockEngine::default(), fast_config());
    let metadata = test_metadata(10_000, 0, 400);
    seed_wallet(&h);
    // First shard is a dust fragment, second is usable.
    h.index
        .add_minter(seed_minter(&h.chain, &metadata, 50, true, 1));
    h.index
        .add_minter(seed_minter(&h.chain, &metadata, 1_000, true, 2));

    let outcome = h.orchestrator.mint(&metadata, Some(300)).await?;
    assert_eq!(outcome.minted, 300);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_mint_without_fee_utxos_is_fatal() {
    let h = harness(MockEngine::default(), fast_config());
    let metadata = test_metadata(10_000, 0, 400);
    h.index
        .add_minter(seed_minter(&h.chain, &metadata, 1_000, true, 1));

    let err = h.orchestrator.mint(&metadata, Some(300)).await.unwrap_err();
    assert!(matches!(err, Error::InsufficientFunds(_)));
}

#[tokio::test(start_paused = true)]
async fn test_send_small_selection_skips_merge() -> Result<()> {
    let h = harness(MockEngine::default(), fast_config());
    let metadata = test_metadata(100_000, 0, 1_000);
    seed_wallet(&h);
    seed_tokens(&h, &metadata, &[500, 400]);

    let receiver = p2tr_script(0x66);
    let outcome = h.orchestrator.send(&metadata, &receiver, 700).await?;

    assert_eq!(outcome.sent, 700);
    assert_eq!(outcome.token_change.as_ref().unwrap().state.amount, 200);
    // One transfer, no consolidation rounds.
    assert_eq!(h.chain.broadcast_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_send_merges_fragmented_selection() -> Result<()> {
    let h = harness(MockEngine::default(), fast_config());
    let metadata = test_metadata(100_000, 0, 1_000);
    seed_wallet(&h);
    seed_tokens(&h, &metadata, &[10, 20, 30, 40, 50, 60]);

    let receiver = p2tr_script(0x66);
    let outcome = h.orchestrator.send(&metadata, &receiver, 190).await?;

    assert_eq!(outcome.sent, 190);
    assert_eq!(outcome.token_change.as_ref().unwrap().state.amount, 20);
    // Three consolidations (6 -> 2 -> 1) plus the transfer itself.
    assert_eq!(h.chain.broadcast_count(), 4);

    // Every original fragment is now tracked as spent.
    let owner = h.signer.token_owner_script();
    let originals = h
        .index
        .token_contracts(&metadata, &owner)
        .await
        .unwrap_or_default();
    for token in originals {
        assert!(!h.spends.is_unspent(&token.utxo.outpoint));
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_send_retries_failed_merge() -> Result<()> {
    let h = harness(MockEngine::default(), fast_config());
    let metadata = test_metadata(100_000, 0, 1_000);
    seed_wallet(&h);
    seed_tokens(&h, &metadata, &[10, 20, 30, 40, 50, 60]);

    // The first consolidation broadcast fails transiently; the retried
    // attempt reuses the cached transaction and completes the send.
    h.chain.push_reject("txn-mempool-conflict");

    let receiver = p2tr_script(0x66);
    let outcome = h.orchestrator.send(&metadata, &receiver, 190).await?;
    assert_eq!(outcome.sent, 190);
    assert_eq!(h.chain.broadcast_count(), 4);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_send_insufficient_token_balance_is_fatal() {
    let h = harness(MockEngine::default(), fast_config());
    let metadata = test_metadata(100_000, 0, 1_000);
    seed_wallet(&h);
    seed_tokens(&h, &metadata, &[10, 20]);

    let err = h
        .orchestrator
        .send(&metadata, &p2tr_script(0x66), 1_000)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::InsufficientTokenBalance {
            available: 30,
            required: 1_000
        }
    ));
    assert_eq!(h.chain.broadcast_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_send_attempts_budget_exhausts() {
    let h = harness(MockEngine::default(), fast_config());
    let metadata = test_metadata(100_000, 0, 1_000);
    seed_wallet(&h);
    seed_tokens(&h, &metadata, &[500, 400]);

    // Every attempt hits a transient rejection.
    for _ in 0..3 {
        h.chain.push_reject("txn-mempool-conflict");
    }

    let err = h
        .orchestrator
        .send(&metadata, &p2tr_script(0x66), 700)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::BroadcastRejected(_)));
    assert_eq!(h.chain.broadcast_count(), 0);
}
