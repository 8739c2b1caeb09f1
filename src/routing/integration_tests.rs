//! Integration Tests for the Routing Engine
//!
//! Drive PlanBuilder + StepExecutor end to end against the in-memory store
//! and mock collaborators, with an explicit clock.

use std::sync::Arc;

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::RoutingConfig;
use crate::routing::adapters::mock::{MockLedger, MockSigner};
use crate::routing::adapters::{ObservedTransfer, Signer, SignerError, TransferIntent};
use crate::routing::executor::{StepExecutor, StepOutcome};
use crate::routing::fee::{BasisPointsFee, FeePolicy, NoFee};
use crate::routing::planner::{PlanBuilder, PlanRequest};
use crate::routing::probe::ChainProbe;
use crate::routing::state::RouteStatus;
use crate::routing::store::{InMemoryTransferStore, TransferStore};
use crate::routing::types::{Asset, HopWallet, InFlight, LeaseAction, PlanId, TransferRecord};
use crate::routing::worker::SweepWorker;

const T0: i64 = 1_700_000_000_000;
const STALE: i64 = 120_000;
const SRC: &str = "Src1111111111111111111111111111111";
const DST: &str = "Dst1111111111111111111111111111111";
const TREASURY: &str = "Treasury11111111111111111111111111";

/// Signer that yields to the scheduler before every send
struct YieldingSigner(Arc<MockSigner>);

#[async_trait]
impl Signer for YieldingSigner {
    fn name(&self) -> &'static str {
        "yielding-signer"
    }

    async fn create_wallet(&self) -> Result<HopWallet, SignerError> {
        self.0.create_wallet().await
    }

    async fn sign_and_broadcast(&self, intent: TransferIntent<'_>) -> Result<String, SignerError> {
        tokio::task::yield_now().await;
        self.0.sign_and_broadcast(intent).await
    }
}

struct TestHarness {
    ledger: Arc<MockLedger>,
    signer: Arc<MockSigner>,
    store: Arc<InMemoryTransferStore>,
    builder: PlanBuilder,
    executor: Arc<StepExecutor>,
}

impl TestHarness {
    fn new(fee: Arc<dyn FeePolicy>) -> Self {
        Self::with_config(three_hops(1_000), fee, false)
    }

    fn with_config(config: RoutingConfig, fee: Arc<dyn FeePolicy>, yielding: bool) -> Self {
        let ledger = Arc::new(MockLedger::new());
        let signer = Arc::new(MockSigner::with_ledger(ledger.clone()));
        let store = Arc::new(InMemoryTransferStore::new());
        let executor_signer: Arc<dyn Signer> = if yielding {
            Arc::new(YieldingSigner(signer.clone()))
        } else {
            signer.clone()
        };

        let builder = PlanBuilder::with_rng(
            config.clone(),
            Some(TREASURY.to_string()),
            signer.clone(),
            fee,
            store.clone(),
            StdRng::seed_from_u64(42),
        );
        let executor = Arc::new(StepExecutor::new(
            store.clone(),
            executor_signer,
            Arc::new(ChainProbe::new(ledger.clone())),
            config,
        ));

        Self {
            ledger,
            signer,
            store,
            builder,
            executor,
        }
    }

    async fn create(&self, amount: u64) -> TransferRecord {
        self.builder
            .create_plan(PlanRequest {
                from_wallet: SRC.into(),
                to_wallet: DST.into(),
                asset: Asset::Native,
                amount,
            })
            .await
            .unwrap()
    }

    fn fund(&self, record: &TransferRecord) {
        self.ledger.set_balance(
            record.plan.first_hop_address(),
            &record.plan.asset,
            record.plan.amount,
        );
    }

    async fn step(&self, id: &PlanId, now_ms: i64) -> StepOutcome {
        self.executor.step_at(id, None, now_ms).await.unwrap()
    }

    async fn load(&self, id: &PlanId) -> TransferRecord {
        self.store.get(id).await.unwrap().unwrap()
    }

    /// Write a lease as if a step had crashed right after taking it
    async fn inject_lease(&self, id: &PlanId, action: LeaseAction, started_at_unix_ms: i64) {
        let rec = self.load(id).await;
        let mut state = rec.state.clone();
        state.in_flight = Some(InFlight {
            action,
            started_at_unix_ms,
        });
        self.store
            .conditional_update(id, rec.version, rec.status, &state)
            .await
            .unwrap()
            .unwrap();
    }
}

fn three_hops(delay_ms: u64) -> RoutingConfig {
    RoutingConfig {
        min_hops: 3,
        max_hops: 3,
        min_delay_ms: delay_ms,
        max_delay_ms: delay_ms,
        ..RoutingConfig::default()
    }
}

// ========================================================================
// Happy Path Tests
// ========================================================================

/// AWAITING_FUNDING → ROUTING → ROUTING → ROUTING → COMPLETE
#[tokio::test]
async fn test_three_hops_no_fee_happy_path() {
    let h = TestHarness::new(Arc::new(NoFee));
    let rec = h.create(1_000).await;
    assert_eq!(rec.plan.hop_count, 3);
    assert!(!rec.plan.fee_applied);

    let out = h.step(&rec.id, T0).await;
    assert_eq!(out.status, RouteStatus::AwaitingFunding);
    assert_eq!(out.funded, Some(false));

    h.fund(&rec);
    let out = h.step(&rec.id, T0).await;
    assert_eq!(out.status, RouteStatus::Routing);
    assert_eq!(out.funded, Some(true));

    let mut statuses = Vec::new();
    for i in 1..=3 {
        let out = h.step(&rec.id, T0 + i * 1_000).await;
        assert_eq!(out.hop_index, Some((i - 1) as u32));
        statuses.push(out.status);
    }
    assert_eq!(
        statuses,
        vec![RouteStatus::Routing, RouteStatus::Routing, RouteStatus::Complete]
    );

    let done = h.load(&rec.id).await;
    assert_eq!(done.state.hop_results.len(), 3);
    assert_eq!(done.state.current_hop, 3);
    let sent = h.signer.sent();
    assert_eq!(sent.len(), 3);
    assert_eq!(done.state.final_signature.as_deref(), Some(sent[2].signature.as_str()));
    assert_eq!(sent[2].to, DST);
    assert!(sent.iter().all(|s| s.amount == 1_000));

    // each hop sends from its own wallet to the next one
    for (i, s) in sent.iter().enumerate() {
        assert_eq!(s.wallet_id, rec.plan.hops[i].wallet_id);
        assert_eq!(s.from, rec.plan.hops[i].address);
        assert_eq!(s.idempotency_key, format!("{}:hop:{}", rec.id, i));
    }

    let out = h.step(&rec.id, T0 + 10_000).await;
    assert_eq!(out.status, RouteStatus::Complete);
    assert_eq!(h.signer.send_count(), 3);
}

/// A 50 fee leaves hop-0 before the first 950 relay, exactly once
#[tokio::test]
async fn test_fee_collected_once_before_first_hop() {
    let h = TestHarness::new(Arc::new(BasisPointsFee::new(500).unwrap()));
    let rec = h.create(1_000).await;
    assert_eq!(rec.plan.fee, 50);
    assert_eq!(rec.plan.net_amount, 950);

    h.fund(&rec);
    h.step(&rec.id, T0).await;

    let out = h.step(&rec.id, T0 + 1_000).await;
    assert_eq!(out.fee_collected, Some(true));
    let out = h.step(&rec.id, T0 + 1_000).await;
    assert_eq!(out.hop_index, Some(0));

    let mut now = T0 + 1_000;
    while h.load(&rec.id).await.status == RouteStatus::Routing {
        now += 1_000;
        h.step(&rec.id, now).await;
    }

    let sent = h.signer.sent();
    let fees: Vec<_> = sent.iter().filter(|s| s.to == TREASURY).collect();
    assert_eq!(fees.len(), 1);
    assert_eq!(fees[0].amount, 50);
    assert_eq!(fees[0].from, rec.plan.first_hop_address());
    assert_eq!(sent[0].to, TREASURY);
    assert!(sent[1..].iter().all(|s| s.amount == 950));
    assert_eq!(sent.len(), 4);

    let done = h.load(&rec.id).await;
    assert_eq!(done.status, RouteStatus::Complete);
    assert!(done.state.fee_collected);
    assert_eq!(done.state.fee_signature.as_deref(), Some(sent[0].signature.as_str()));
}

#[tokio::test]
async fn test_custody_destination_receives_last_hop() {
    let custody = "Vau1t111111111111111111111111111111";
    let config = RoutingConfig {
        custody_address: Some(custody.to_string()),
        ..three_hops(0)
    };
    let h = TestHarness::with_config(config, Arc::new(NoFee), false);
    let rec = h
        .builder
        .create_plan(PlanRequest {
            from_wallet: SRC.into(),
            to_wallet: String::new(),
            asset: Asset::Native,
            amount: 500,
        })
        .await
        .unwrap();

    h.fund(&rec);
    for _ in 0..4 {
        h.step(&rec.id, T0).await;
    }
    assert_eq!(h.load(&rec.id).await.status, RouteStatus::Complete);
    assert_eq!(h.signer.sent().last().unwrap().to, custody);
}

// ========================================================================
// Ordering & Concurrency Tests
// ========================================================================

#[tokio::test]
async fn test_cursor_monotonic_and_results_ordered() {
    let h = TestHarness::with_config(three_hops(700), Arc::new(NoFee), false);
    let rec = h.create(1_000).await;
    h.fund(&rec);

    let mut last_hop = 0;
    let mut now = T0;
    for _ in 0..40 {
        h.step(&rec.id, now).await;
        let current = h.load(&rec.id).await;
        assert!(current.state.current_hop >= last_hop);
        last_hop = current.state.current_hop;
        now += 250;
    }

    let done = h.load(&rec.id).await;
    assert_eq!(done.status, RouteStatus::Complete);
    let indices: Vec<u32> = done.state.hop_results.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
}

/// Two overlapping steps: one sends, the other sees the fresh lease
#[tokio::test]
async fn test_overlapping_steps_never_duplicate_a_hop() {
    let h = TestHarness::with_config(three_hops(1_000), Arc::new(NoFee), true);
    let rec = h.create(1_000).await;
    h.fund(&rec);
    h.step(&rec.id, T0).await;

    let (a, b) = tokio::join!(
        h.executor.step_at(&rec.id, None, T0 + 1_000),
        h.executor.step_at(&rec.id, None, T0 + 1_000)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let sends: Vec<_> = [&a, &b].iter().filter(|o| o.hop_index.is_some()).map(|o| o.hop_index).collect();
    assert_eq!(sends, vec![Some(0)]);
    assert!(a.busy == Some(true) || b.busy == Some(true));

    assert_eq!(h.signer.send_count(), 1);
    let current = h.load(&rec.id).await;
    assert_eq!(current.state.hop_results.len(), 1);
    assert!(current.state.in_flight.is_none());
}

// ========================================================================
// Crash Recovery Tests
// ========================================================================

/// Stale `hop:1` lease and nothing on chain: cleared, hop 1 retried once
#[tokio::test]
async fn test_stale_lease_without_match_retries_once() {
    let h = TestHarness::new(Arc::new(NoFee));
    let rec = h.create(1_000).await;
    h.fund(&rec);
    h.step(&rec.id, T0).await;
    h.step(&rec.id, T0 + 1_000).await;
    assert_eq!(h.signer.send_count(), 1);

    h.inject_lease(&rec.id, LeaseAction::Hop(1), T0 + 1_500).await;

    let out = h.step(&rec.id, T0 + 1_500 + STALE - 1).await;
    assert_eq!(out.busy, Some(true));
    assert_eq!(h.signer.send_count(), 1);

    let out = h.step(&rec.id, T0 + 1_500 + STALE).await;
    assert_eq!(out.hop_index, Some(1));
    assert_eq!(h.signer.send_count(), 2);
    assert_eq!(h.ledger.history_calls(), 1);

    let out = h.step(&rec.id, T0 + 1_500 + STALE).await;
    assert_eq!(out.waiting, Some(true));
    assert_eq!(h.signer.send_count(), 2);

    let current = h.load(&rec.id).await;
    let indices: Vec<u32> = current.state.hop_results.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![0, 1]);
}

/// Stale lease whose transfer did land: adopted without re-sending
#[tokio::test]
async fn test_stale_lease_with_landed_transfer_is_adopted() {
    let h = TestHarness::new(Arc::new(NoFee));
    let rec = h.create(1_000).await;
    h.fund(&rec);
    h.step(&rec.id, T0).await;
    h.step(&rec.id, T0 + 1_000).await;

    h.inject_lease(&rec.id, LeaseAction::Hop(1), T0 + 1_500).await;
    h.ledger.push_transfer(ObservedTransfer {
        signature: "landed-before-crash".into(),
        source: rec.plan.hops[1].address.clone(),
        destination: rec.plan.hops[2].address.clone(),
        asset: Asset::Native,
        amount: rec.plan.net_amount,
    });

    let now = T0 + 1_500 + STALE;
    let out = h.step(&rec.id, now).await;
    assert_eq!(out.waiting, Some(true));
    assert_eq!(h.signer.send_count(), 1);

    let current = h.load(&rec.id).await;
    assert_eq!(current.state.current_hop, 2);
    assert_eq!(current.state.hop_results[1].signature, "landed-before-crash");
    assert_eq!(current.state.next_action_at_unix_ms, now + 1_000);
    assert!(current.state.in_flight.is_none());

    h.step(&rec.id, now + 1_000).await;
    let done = h.load(&rec.id).await;
    assert_eq!(done.status, RouteStatus::Complete);
    assert_eq!(h.signer.send_count(), 2);
}

/// A failed send parks funds at the hop and stops all further sends
#[tokio::test]
async fn test_failure_mid_route_is_terminal() {
    let h = TestHarness::new(Arc::new(NoFee));
    let rec = h.create(1_000).await;
    h.fund(&rec);
    h.step(&rec.id, T0).await;
    h.step(&rec.id, T0 + 1_000).await;

    h.signer.set_fail_send(true);
    assert!(h.executor.step_at(&rec.id, None, T0 + 2_000).await.is_err());
    h.signer.set_fail_send(false);

    let failed = h.load(&rec.id).await;
    assert_eq!(failed.status, RouteStatus::Failed);
    assert_eq!(failed.state.current_hop, 1);
    assert!(failed.state.last_error.as_deref().unwrap_or("").contains("mock send failure"));

    for t in [T0 + 3_000, T0 + 2_000 + STALE, T0 + 10 * STALE] {
        let out = h.step(&rec.id, t).await;
        assert!(matches!(out.status, RouteStatus::Failed));
    }
    assert_eq!(h.signer.send_count(), 1);
}

// ========================================================================
// Sweep Worker
// ========================================================================

#[tokio::test]
async fn test_sweeper_drives_route_to_completion() {
    let h = TestHarness::with_config(three_hops(0), Arc::new(NoFee), false);
    let rec = h.create(1_000).await;
    h.fund(&rec);

    let worker = SweepWorker::with_defaults(h.executor.clone());
    for _ in 0..10 {
        worker.sweep_once().await.unwrap();
        if h.load(&rec.id).await.status.is_terminal() {
            break;
        }
    }

    let done = h.load(&rec.id).await;
    assert_eq!(done.status, RouteStatus::Complete);
    assert_eq!(h.signer.send_count(), 3);
    assert!(h.store.list_active(None, 10).await.unwrap().is_empty());
}
