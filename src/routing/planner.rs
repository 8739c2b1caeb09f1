//! Plan Builder
//!
//! Validates a routing request, prices it, creates the hop wallets at the
//! signing service and persists the resulting record at `awaiting_funding`.

use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use super::adapters::{Signer, is_valid_address};
use super::error::RoutingError;
use super::fee::FeePolicy;
use super::store::TransferStore;
use super::types::{Asset, HopWallet, PlanId, RoutingPlan, TransferRecord};
use crate::config::RoutingConfig;

/// Routing request as submitted by a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRequest {
    pub from_wallet: String,
    /// Empty selects the configured custody address
    pub to_wallet: String,
    pub asset: Asset,
    pub amount: u64,
}

/// Random draws for one plan, taken together before any I/O
struct PlanDraw {
    hop_count: u32,
    hop_delays_ms: Vec<u64>,
    total_floor_ms: u64,
}

pub struct PlanBuilder {
    config: RoutingConfig,
    fee_destination: Option<String>,
    signer: Arc<dyn Signer>,
    fee_policy: Arc<dyn FeePolicy>,
    store: Arc<dyn TransferStore>,
    rng: Mutex<StdRng>,
}

impl PlanBuilder {
    pub fn new(
        config: RoutingConfig,
        fee_destination: Option<String>,
        signer: Arc<dyn Signer>,
        fee_policy: Arc<dyn FeePolicy>,
        store: Arc<dyn TransferStore>,
    ) -> Self {
        Self::with_rng(
            config,
            fee_destination,
            signer,
            fee_policy,
            store,
            StdRng::from_entropy(),
        )
    }

    /// Builder with an explicit RNG; tests pass `StdRng::seed_from_u64`
    pub fn with_rng(
        config: RoutingConfig,
        fee_destination: Option<String>,
        signer: Arc<dyn Signer>,
        fee_policy: Arc<dyn FeePolicy>,
        store: Arc<dyn TransferStore>,
        rng: StdRng,
    ) -> Self {
        Self {
            config,
            fee_destination,
            signer,
            fee_policy,
            store,
            rng: Mutex::new(rng),
        }
    }

    /// Build, persist and return a new plan record
    pub async fn create_plan(&self, request: PlanRequest) -> Result<TransferRecord, RoutingError> {
        let plan = self.build_plan(request).await?;
        let record = self.store.create(TransferRecord::new(plan)).await?;

        info!(
            plan_id = %record.id,
            hop_count = record.plan.hop_count,
            asset = %record.plan.asset,
            amount = record.plan.amount,
            fee = record.plan.fee,
            eta_ms = record.plan.estimated_completion_ms,
            "Routing plan created"
        );
        Ok(record)
    }

    /// Build a plan without persisting it
    pub async fn build_plan(&self, request: PlanRequest) -> Result<RoutingPlan, RoutingError> {
        // === Validation: no side effects before this passes ===
        let custody_address = self.validate(&request)?;

        let fee = self
            .fee_policy
            .fee_for(&request.from_wallet, &request.asset, request.amount)
            .await?;
        if fee >= request.amount {
            return Err(RoutingError::Validation(format!(
                "fee {} leaves nothing to route from {}",
                fee, request.amount
            )));
        }
        let fee_destination = if fee > 0 {
            let destination = self.fee_destination.clone().ok_or_else(|| {
                RoutingError::Configuration("fee charged but no fee destination configured".into())
            })?;
            Some(destination)
        } else {
            None
        };

        let draw = self.draw();
        let hops = self.create_hop_wallets(draw.hop_count).await?;

        let delay_sum: u64 = draw.hop_delays_ms.iter().sum();
        let estimated_completion_ms = (delay_sum
            + draw.hop_count as u64 * self.config.fixed_hop_overhead_ms)
            .max(draw.total_floor_ms);

        Ok(RoutingPlan {
            id: PlanId::new(),
            from_wallet: request.from_wallet,
            to_wallet: request.to_wallet,
            asset: request.asset,
            amount: request.amount,
            net_amount: request.amount - fee,
            hop_count: draw.hop_count,
            hops,
            hop_delays_ms: draw.hop_delays_ms,
            fee_applied: fee > 0,
            fee,
            fee_destination,
            custody_address,
            estimated_completion_ms,
            created_at_unix: chrono::Utc::now().timestamp(),
        })
    }

    /// Returns the custody address to pin when the destination is empty
    fn validate(&self, request: &PlanRequest) -> Result<Option<String>, RoutingError> {
        if request.amount == 0 {
            return Err(RoutingError::Validation("amount must be positive".into()));
        }
        if request.from_wallet.is_empty() {
            return Err(RoutingError::Validation("from_wallet is required".into()));
        }
        if !is_valid_address(&request.from_wallet) {
            return Err(RoutingError::Validation(format!(
                "invalid from_wallet: {}",
                request.from_wallet
            )));
        }
        if let Asset::Fungible { mint } = &request.asset
            && !is_valid_address(mint)
        {
            return Err(RoutingError::Validation(format!("invalid mint: {}", mint)));
        }

        if request.to_wallet.is_empty() {
            return match &self.config.custody_address {
                Some(custody) => Ok(Some(custody.clone())),
                None => Err(RoutingError::Validation("to_wallet is required".into())),
            };
        }
        if !is_valid_address(&request.to_wallet) {
            return Err(RoutingError::Validation(format!(
                "invalid to_wallet: {}",
                request.to_wallet
            )));
        }
        if request.to_wallet == request.from_wallet {
            return Err(RoutingError::Validation(
                "source and destination must differ".into(),
            ));
        }
        Ok(None)
    }

    fn draw(&self) -> PlanDraw {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let hop_count = rng.gen_range(self.config.min_hops..=self.config.max_hops);
        let hop_delays_ms = (0..hop_count)
            .map(|_| rng.gen_range(self.config.min_delay_ms..=self.config.max_delay_ms))
            .collect();
        let total_floor_ms = rng.gen_range(self.config.min_total_ms..=self.config.max_total_ms);
        PlanDraw {
            hop_count,
            hop_delays_ms,
            total_floor_ms,
        }
    }

    /// Wallets are created one at a time; nothing is persisted unless all
    /// of them succeed, and wallets created before a failure are reported.
    async fn create_hop_wallets(&self, hop_count: u32) -> Result<Vec<HopWallet>, RoutingError> {
        let mut hops = Vec::with_capacity(hop_count as usize);
        for index in 0..hop_count {
            match self.signer.create_wallet().await {
                Ok(wallet) => hops.push(wallet),
                Err(e) => {
                    let orphaned: Vec<&str> = hops.iter().map(|h| h.wallet_id.as_str()).collect();
                    warn!(
                        signer = self.signer.name(),
                        failed_index = index,
                        orphaned = ?orphaned,
                        error = %e,
                        "Hop wallet creation failed; created wallets are orphaned"
                    );
                    return Err(e.into());
                }
            }
        }
        Ok(hops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::adapters::mock::MockSigner;
    use crate::routing::fee::{BasisPointsFee, NoFee};
    use crate::routing::state::RouteStatus;
    use crate::routing::store::InMemoryTransferStore;

    const SRC: &str = "Src1111111111111111111111111111111";
    const DST: &str = "Dst1111111111111111111111111111111";
    const TREASURY: &str = "Treasury11111111111111111111111111";

    struct Harness {
        signer: Arc<MockSigner>,
        store: Arc<InMemoryTransferStore>,
        builder: PlanBuilder,
    }

    fn harness(config: RoutingConfig, fee: Arc<dyn FeePolicy>, seed: u64) -> Harness {
        let signer = Arc::new(MockSigner::new());
        let store = Arc::new(InMemoryTransferStore::new());
        let builder = PlanBuilder::with_rng(
            config,
            Some(TREASURY.to_string()),
            signer.clone(),
            fee,
            store.clone(),
            StdRng::seed_from_u64(seed),
        );
        Harness {
            signer,
            store,
            builder,
        }
    }

    fn request(amount: u64) -> PlanRequest {
        PlanRequest {
            from_wallet: SRC.into(),
            to_wallet: DST.into(),
            asset: Asset::Native,
            amount,
        }
    }

    #[tokio::test]
    async fn test_plan_shape_across_seeds() {
        let config = RoutingConfig::default();
        for seed in 0..25 {
            let h = harness(config.clone(), Arc::new(NoFee), seed);
            let rec = h.builder.create_plan(request(1_000)).await.unwrap();
            let plan = &rec.plan;

            assert!((config.min_hops..=config.max_hops).contains(&plan.hop_count));
            assert_eq!(plan.hops.len(), plan.hop_count as usize);
            assert_eq!(plan.hop_delays_ms.len(), plan.hop_count as usize);
            assert!(plan.hop_delays_ms.iter().all(|d| (500..=3_000).contains(d)));
            assert!(plan.estimated_completion_ms >= config.min_total_ms);
            assert_eq!(plan.net_amount + plan.fee, plan.amount);
            assert_eq!(h.signer.wallets_created(), plan.hop_count as usize);

            assert_eq!(rec.status, RouteStatus::AwaitingFunding);
            assert_eq!(rec.version, 1);
            assert_eq!(rec.state.current_hop, 0);
            assert!(rec.state.fee_collected);
        }
    }

    #[tokio::test]
    async fn test_same_seed_same_draws() {
        let a = harness(RoutingConfig::default(), Arc::new(NoFee), 7);
        let b = harness(RoutingConfig::default(), Arc::new(NoFee), 7);
        let pa = a.builder.build_plan(request(1_000)).await.unwrap();
        let pb = b.builder.build_plan(request(1_000)).await.unwrap();
        assert_eq!(pa.hop_count, pb.hop_count);
        assert_eq!(pa.hop_delays_ms, pb.hop_delays_ms);
        assert_eq!(pa.estimated_completion_ms, pb.estimated_completion_ms);
    }

    #[tokio::test]
    async fn test_fee_frozen_into_plan() {
        let h = harness(
            RoutingConfig::default(),
            Arc::new(BasisPointsFee::new(500).unwrap()),
            1,
        );
        let rec = h.builder.create_plan(request(1_000)).await.unwrap();
        assert_eq!(rec.plan.fee, 50);
        assert_eq!(rec.plan.net_amount, 950);
        assert!(rec.plan.fee_applied);
        assert_eq!(rec.plan.fee_destination.as_deref(), Some(TREASURY));
        assert!(!rec.state.fee_collected);
    }

    #[tokio::test]
    async fn test_validation_has_no_side_effects() {
        let h = harness(RoutingConfig::default(), Arc::new(NoFee), 1);
        let bad = [
            request(0),
            PlanRequest {
                from_wallet: String::new(),
                ..request(10)
            },
            PlanRequest {
                to_wallet: "0xdeadbeef".into(),
                ..request(10)
            },
            PlanRequest {
                to_wallet: String::new(),
                ..request(10)
            },
            PlanRequest {
                asset: Asset::Fungible { mint: String::new() },
                ..request(10)
            },
            PlanRequest {
                to_wallet: SRC.into(),
                ..request(10)
            },
        ];
        for req in bad {
            let err = h.builder.create_plan(req).await.unwrap_err();
            assert!(matches!(err, RoutingError::Validation(_)), "{:?}", err);
        }
        assert_eq!(h.signer.wallets_created(), 0);
        assert!(h.store.is_empty());
    }

    #[tokio::test]
    async fn test_fee_must_leave_net_amount() {
        let h = harness(
            RoutingConfig::default(),
            Arc::new(BasisPointsFee::new(10_000).unwrap()),
            1,
        );
        let err = h.builder.create_plan(request(1_000)).await.unwrap_err();
        assert!(matches!(err, RoutingError::Validation(_)));
        assert_eq!(h.signer.wallets_created(), 0);
    }

    #[tokio::test]
    async fn test_fee_without_destination() {
        let signer = Arc::new(MockSigner::new());
        let builder = PlanBuilder::with_rng(
            RoutingConfig::default(),
            None,
            signer.clone(),
            Arc::new(BasisPointsFee::new(100).unwrap()),
            Arc::new(InMemoryTransferStore::new()),
            StdRng::seed_from_u64(1),
        );
        let err = builder.create_plan(request(1_000)).await.unwrap_err();
        assert!(matches!(err, RoutingError::Configuration(_)));
        assert_eq!(signer.wallets_created(), 0);
    }

    #[tokio::test]
    async fn test_custody_mode() {
        let custody = "Vau1t111111111111111111111111111111".to_string();
        let config = RoutingConfig {
            custody_address: Some(custody.clone()),
            ..RoutingConfig::default()
        };
        let h = harness(config, Arc::new(NoFee), 3);
        let rec = h
            .builder
            .create_plan(PlanRequest {
                to_wallet: String::new(),
                ..request(1_000)
            })
            .await
            .unwrap();
        assert!(rec.plan.to_wallet.is_empty());
        assert_eq!(rec.plan.custody_address.as_deref(), Some(custody.as_str()));
        assert_eq!(rec.plan.final_destination(), custody);
    }

    #[tokio::test]
    async fn test_wallet_failure_persists_nothing() {
        let config = RoutingConfig {
            min_hops: 5,
            max_hops: 5,
            ..RoutingConfig::default()
        };
        let h = harness(config, Arc::new(NoFee), 1);
        h.signer.set_fail_create_after(Some(3));

        let err = h.builder.create_plan(request(1_000)).await.unwrap_err();
        assert!(matches!(err, RoutingError::UpstreamSigning(_)));
        assert_eq!(h.signer.wallets_created(), 3);
        assert!(h.store.is_empty());
    }
}
