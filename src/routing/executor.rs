//! Step Executor
//!
//! Advances one routing plan by at most one unit of work per call. There is
//! no internal timer: an external driver (the sweep worker or an API client)
//! calls [`StepExecutor::step`] until the plan is terminal.
//!
//! # Step order
//!
//! ```text
//! stale lease?   → reconcile against chain history, clear lease
//! fresh lease?   → busy
//! terminal?      → as-is
//! AWAITING_FUNDING → hop-0 balance >= amount ? ROUTING : funded=false
//! ROUTING        → rate gate → fee (once) → hop[current_hop] → ... → COMPLETE
//! ```
//!
//! # Lease protocol
//!
//! 1. **Lease-Before-Send**: the in-flight lease is written through CAS before
//!    the signer is called; the mutation refuses while any lease is present.
//! 2. **Result-Then-Release**: the signature is recorded and the lease cleared
//!    in one CAS after the signer returns.
//! 3. **Failed sends keep the lease** so reconciliation can still adopt a
//!    transfer that landed.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info};
use utoipa::ToSchema;

use super::adapters::{Signer, TransferIntent};
use super::error::RoutingError;
use super::probe::ChainProbe;
use super::state::RouteStatus;
use super::store::{RecordUpdate, TransferStore, mutate};
use super::types::{InFlight, LeaseAction, PlanId, TransferRecord, TransferState};
use crate::config::RoutingConfig;

/// Result of one `step()` call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct StepOutcome {
    pub ok: bool,
    #[schema(value_type = String)]
    pub id: PlanId,
    #[schema(value_type = String, example = "routing")]
    pub status: RouteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hop_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waiting: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funded: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub busy: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_collected: Option<bool>,
}

impl StepOutcome {
    pub fn of(record: &TransferRecord) -> Self {
        Self {
            ok: true,
            id: record.id,
            status: record.status,
            hop_index: None,
            signature: None,
            waiting: None,
            funded: None,
            busy: None,
            fee_collected: None,
        }
    }

    fn busy(record: &TransferRecord) -> Self {
        Self {
            busy: Some(true),
            ..Self::of(record)
        }
    }
}

/// Idempotency key forwarded to the signer for one side effect
pub fn idempotency_key(id: &PlanId, action: LeaseAction) -> String {
    format!("{}:{}", id, action)
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct StepExecutor {
    pub(super) store: Arc<dyn TransferStore>,
    pub(super) signer: Arc<dyn Signer>,
    pub(super) probe: Arc<ChainProbe>,
    pub(super) config: RoutingConfig,
}

impl StepExecutor {
    pub fn new(
        store: Arc<dyn TransferStore>,
        signer: Arc<dyn Signer>,
        probe: Arc<ChainProbe>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            store,
            signer,
            probe,
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn TransferStore> {
        &self.store
    }

    /// Execute one step of the routing workflow
    ///
    /// `funding_hint` is the client's funding transaction signature; it is
    /// recorded when funding is detected and otherwise ignored.
    pub async fn step(
        &self,
        id: &PlanId,
        funding_hint: Option<&str>,
    ) -> Result<StepOutcome, RoutingError> {
        self.step_at(id, funding_hint, now_ms()).await
    }

    /// [`step`](Self::step) at an explicit wall-clock time
    pub async fn step_at(
        &self,
        id: &PlanId,
        funding_hint: Option<&str>,
        now_ms: i64,
    ) -> Result<StepOutcome, RoutingError> {
        let mut record = self.load(id).await?;

        if let Some(lease) = record.state.in_flight {
            if !lease.is_stale(now_ms, self.config.stale_ms as i64) {
                debug!(plan_id = %id, action = %lease.action, "Lease fresh, skipping step");
                return Ok(StepOutcome::busy(&record));
            }
            let (reconciled, _) = self.reconcile_stale(&record, lease, now_ms).await?;
            record = reconciled;
            if record.state.in_flight.is_some() {
                return Ok(StepOutcome::busy(&record));
            }
        }

        if record.status.is_terminal() {
            return Ok(StepOutcome::of(&record));
        }

        match self.advance(&record, funding_hint, now_ms).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.fails_plan() => {
                self.fail(id, &e).await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    async fn load(&self, id: &PlanId) -> Result<TransferRecord, RoutingError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| RoutingError::NotFound(id.to_string()))
    }

    async fn advance(
        &self,
        record: &TransferRecord,
        funding_hint: Option<&str>,
        now_ms: i64,
    ) -> Result<StepOutcome, RoutingError> {
        match record.status {
            RouteStatus::AwaitingFunding => self.detect_funding(record, funding_hint, now_ms).await,
            RouteStatus::Routing => {
                if now_ms < record.state.next_action_at_unix_ms {
                    return Ok(StepOutcome {
                        waiting: Some(true),
                        ..StepOutcome::of(record)
                    });
                }
                if record.plan.fee > 0 && !record.state.fee_collected {
                    return self.collect_fee(record, now_ms).await;
                }
                self.execute_hop(record, now_ms).await
            }
            RouteStatus::Complete | RouteStatus::Failed => Ok(StepOutcome::of(record)),
        }
    }

    // === AWAITING_FUNDING ===

    async fn detect_funding(
        &self,
        record: &TransferRecord,
        funding_hint: Option<&str>,
        now_ms: i64,
    ) -> Result<StepOutcome, RoutingError> {
        let plan = &record.plan;
        let balance = self
            .probe
            .balance(plan.first_hop_address(), &plan.asset)
            .await?;

        if balance < plan.amount {
            debug!(
                plan_id = %record.id,
                balance = balance,
                required = plan.amount,
                "Hop-0 not funded yet"
            );
            return Ok(StepOutcome {
                funded: Some(false),
                ..StepOutcome::of(record)
            });
        }

        let updated = mutate(
            self.store.as_ref(),
            &record.id,
            self.config.store_attempts,
            |current| {
                if current.status != RouteStatus::AwaitingFunding {
                    return Ok(None);
                }
                let mut state = current.state.clone();
                state.funded = true;
                if state.funding_signature.is_none() {
                    state.funding_signature = funding_hint.map(str::to_string);
                }
                state.next_action_at_unix_ms = now_ms + current.plan.delay_for(0) as i64;
                Ok(Some(RecordUpdate::new(RouteStatus::Routing, state)))
            },
        )
        .await?;

        info!(
            plan_id = %record.id,
            balance = balance,
            funding_signature = ?updated.state.funding_signature,
            "Hop-0 funded, routing started"
        );
        Ok(StepOutcome {
            funded: Some(true),
            ..StepOutcome::of(&updated)
        })
    }

    // === ROUTING: fee ===

    async fn collect_fee(
        &self,
        record: &TransferRecord,
        now_ms: i64,
    ) -> Result<StepOutcome, RoutingError> {
        let plan = &record.plan;
        let hop0 = plan
            .hop(0)
            .ok_or_else(|| RoutingError::Internal(format!("route {} has no hops", record.id)))?;
        let destination = plan.fee_destination.as_deref().ok_or_else(|| {
            RoutingError::Configuration(format!("route {} has a fee but no fee destination", record.id))
        })?;

        let lease = InFlight {
            action: LeaseAction::Fee,
            started_at_unix_ms: now_ms,
        };
        if !self.acquire(&record.id, lease, now_ms).await? {
            return self.current_outcome(&record.id).await;
        }

        let key = idempotency_key(&record.id, lease.action);
        let signature = self
            .signer
            .sign_and_broadcast(TransferIntent {
                wallet_id: &hop0.wallet_id,
                from: &hop0.address,
                to: destination,
                asset: &plan.asset,
                amount: plan.fee,
                idempotency_key: &key,
            })
            .await?;

        let updated = mutate(
            self.store.as_ref(),
            &record.id,
            self.config.store_attempts,
            |current| {
                let mut state = current.state.clone();
                let recorded = !state.fee_collected;
                if recorded {
                    state.fee_collected = true;
                    state.fee_signature = Some(signature.clone());
                }
                let released = release(&mut state, lease);
                if !recorded && !released {
                    return Ok(None);
                }
                Ok(Some(RecordUpdate::new(current.status, state)))
            },
        )
        .await?;

        info!(
            plan_id = %record.id,
            fee = plan.fee,
            signature = %signature,
            "Fee collected"
        );
        Ok(StepOutcome {
            signature: Some(signature),
            fee_collected: Some(true),
            ..StepOutcome::of(&updated)
        })
    }

    // === ROUTING: hops ===

    async fn execute_hop(
        &self,
        record: &TransferRecord,
        now_ms: i64,
    ) -> Result<StepOutcome, RoutingError> {
        let plan = &record.plan;
        let index = record.state.current_hop;

        if index >= plan.hop_count {
            let updated = mutate(
                self.store.as_ref(),
                &record.id,
                self.config.store_attempts,
                |current| {
                    if current.status != RouteStatus::Routing
                        || current.state.current_hop < current.plan.hop_count
                    {
                        return Ok(None);
                    }
                    Ok(Some(RecordUpdate::new(
                        RouteStatus::Complete,
                        current.state.clone(),
                    )))
                },
            )
            .await?;
            return Ok(StepOutcome::of(&updated));
        }

        let hop = plan.hop(index).ok_or_else(|| {
            RoutingError::Internal(format!("route {} has no hop {}", record.id, index))
        })?;
        let destination = plan
            .destination_for_hop(index)
            .filter(|d| !d.is_empty())
            .ok_or_else(|| {
                RoutingError::Internal(format!("route {} hop {} has no destination", record.id, index))
            })?;

        let lease = InFlight {
            action: LeaseAction::Hop(index),
            started_at_unix_ms: now_ms,
        };
        if !self.acquire(&record.id, lease, now_ms).await? {
            return self.current_outcome(&record.id).await;
        }

        let key = idempotency_key(&record.id, lease.action);
        let signature = self
            .signer
            .sign_and_broadcast(TransferIntent {
                wallet_id: &hop.wallet_id,
                from: &hop.address,
                to: destination,
                asset: &plan.asset,
                amount: plan.net_amount,
                idempotency_key: &key,
            })
            .await?;

        let updated = mutate(
            self.store.as_ref(),
            &record.id,
            self.config.store_attempts,
            |current| {
                let mut state = current.state.clone();
                let recorded = state.record_hop(&current.plan, index, &signature, now_ms);
                let released = release(&mut state, lease);
                if !recorded && !released {
                    return Ok(None);
                }
                let status = if current.status == RouteStatus::Routing
                    && state.current_hop == current.plan.hop_count
                {
                    RouteStatus::Complete
                } else {
                    current.status
                };
                Ok(Some(RecordUpdate::new(status, state)))
            },
        )
        .await?;

        if updated.status == RouteStatus::Complete {
            info!(
                plan_id = %record.id,
                hops = plan.hop_count,
                final_signature = %signature,
                "Route complete"
            );
        } else {
            info!(
                plan_id = %record.id,
                hop = index,
                of = plan.hop_count,
                signature = %signature,
                "Hop executed"
            );
        }

        Ok(StepOutcome {
            hop_index: Some(index),
            signature: Some(signature),
            ..StepOutcome::of(&updated)
        })
    }

    // === Lease & failure ===

    /// Take the in-flight lease for `lease.action` if it is still due.
    ///
    /// Returns `false` when another caller holds a lease or already did the work.
    async fn acquire(&self, id: &PlanId, lease: InFlight, now_ms: i64) -> Result<bool, RoutingError> {
        let result = mutate(
            self.store.as_ref(),
            id,
            self.config.store_attempts,
            |current| {
                if let Some(held) = current.state.in_flight {
                    return Err(RoutingError::LeaseHeld(held.action.to_string()));
                }
                if !action_due(current, lease.action, now_ms) {
                    return Ok(None);
                }
                let mut state = current.state.clone();
                state.in_flight = Some(lease);
                Ok(Some(RecordUpdate::new(current.status, state)))
            },
        )
        .await;

        match result {
            Ok(record) if record.state.in_flight == Some(lease) => {
                debug!(plan_id = %id, action = %lease.action, version = record.version, "Lease acquired");
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(RoutingError::LeaseHeld(held)) => {
                debug!(plan_id = %id, action = %lease.action, held = %held, "Lease held elsewhere");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn current_outcome(&self, id: &PlanId) -> Result<StepOutcome, RoutingError> {
        let record = self.load(id).await?;
        Ok(if record.state.in_flight.is_some() {
            StepOutcome::busy(&record)
        } else {
            StepOutcome::of(&record)
        })
    }

    /// Move the plan to FAILED; the lease, if any, is left in place.
    async fn fail(&self, id: &PlanId, err: &RoutingError) {
        let message = err.to_string();
        let result = mutate(
            self.store.as_ref(),
            id,
            self.config.store_attempts,
            |current| {
                if current.status.is_terminal() {
                    return Ok(None);
                }
                let mut state = current.state.clone();
                state.last_error = Some(message.clone());
                Ok(Some(RecordUpdate::new(RouteStatus::Failed, state)))
            },
        )
        .await;

        match result {
            Ok(record) => error!(
                plan_id = %id,
                code = err.code(),
                error = %message,
                current_hop = record.state.current_hop,
                in_flight = ?record.state.in_flight,
                "Route failed; funds parked at last custodian hop"
            ),
            Err(e) => error!(
                plan_id = %id,
                error = %message,
                persist_error = %e,
                "Route failed and the failure could not be persisted"
            ),
        }
    }
}

/// Whether `action` is the next unit of work for `record` at `now_ms`
fn action_due(record: &TransferRecord, action: LeaseAction, now_ms: i64) -> bool {
    if record.status != RouteStatus::Routing || now_ms < record.state.next_action_at_unix_ms {
        return false;
    }
    match action {
        LeaseAction::Fee => record.plan.fee > 0 && !record.state.fee_collected,
        LeaseAction::Hop(i) => {
            record.state.fee_collected
                && record.state.current_hop == i
                && i < record.plan.hop_count
        }
    }
}

/// Clear the lease if it is still ours
fn release(state: &mut TransferState, lease: InFlight) -> bool {
    if state.in_flight == Some(lease) {
        state.in_flight = None;
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::adapters::mock::{MockLedger, MockSigner};
    use crate::routing::store::InMemoryTransferStore;
    use crate::routing::types::{Asset, fixtures};

    const T0: i64 = 1_700_000_000_000;

    struct Harness {
        signer: Arc<MockSigner>,
        ledger: Arc<MockLedger>,
        store: Arc<InMemoryTransferStore>,
        executor: StepExecutor,
    }

    fn harness() -> Harness {
        let ledger = Arc::new(MockLedger::new());
        let signer = Arc::new(MockSigner::with_ledger(ledger.clone()));
        let store = Arc::new(InMemoryTransferStore::new());
        let executor = StepExecutor::new(
            store.clone(),
            signer.clone(),
            Arc::new(ChainProbe::new(ledger.clone())),
            RoutingConfig::default(),
        );
        Harness {
            signer,
            ledger,
            store,
            executor,
        }
    }

    async fn funded(h: &Harness, hop_count: u32, amount: u64, fee: u64) -> TransferRecord {
        let rec = h
            .store
            .create(TransferRecord::new(fixtures::plan(hop_count, amount, fee)))
            .await
            .unwrap();
        h.ledger.set_balance("hop0", &Asset::Native, amount);
        let out = h.executor.step_at(&rec.id, Some("fund-sig"), T0).await.unwrap();
        assert_eq!(out.funded, Some(true));
        h.store.get(&rec.id).await.unwrap().unwrap()
    }

    #[test]
    fn test_idempotency_key_format() {
        let id = PlanId::new();
        assert_eq!(idempotency_key(&id, LeaseAction::Fee), format!("{}:fee", id));
        assert_eq!(idempotency_key(&id, LeaseAction::Hop(3)), format!("{}:hop:3", id));
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let h = harness();
        let err = h.executor.step_at(&PlanId::new(), None, T0).await.unwrap_err();
        assert!(matches!(err, RoutingError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unfunded_stays_awaiting() {
        let h = harness();
        let rec = h
            .store
            .create(TransferRecord::new(fixtures::plan(3, 1000, 0)))
            .await
            .unwrap();
        h.ledger.set_balance("hop0", &Asset::Native, 999);

        let out = h.executor.step_at(&rec.id, None, T0).await.unwrap();
        assert_eq!(out.status, RouteStatus::AwaitingFunding);
        assert_eq!(out.funded, Some(false));
        assert_eq!(h.store.get(&rec.id).await.unwrap().unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_funding_records_hint_and_gate() {
        let h = harness();
        let rec = funded(&h, 3, 1000, 0).await;
        assert_eq!(rec.status, RouteStatus::Routing);
        assert!(rec.state.funded);
        assert_eq!(rec.state.funding_signature.as_deref(), Some("fund-sig"));
        assert_eq!(rec.state.next_action_at_unix_ms, T0 + 1_000);

        let out = h.executor.step_at(&rec.id, None, T0 + 999).await.unwrap();
        assert_eq!(out.waiting, Some(true));
        assert_eq!(h.signer.send_count(), 0);
    }

    #[tokio::test]
    async fn test_fee_precedes_first_hop() {
        let h = harness();
        let rec = funded(&h, 2, 1000, 50).await;

        let out = h.executor.step_at(&rec.id, None, T0 + 1_000).await.unwrap();
        assert_eq!(out.fee_collected, Some(true));
        assert_eq!(out.hop_index, None);

        let out = h.executor.step_at(&rec.id, None, T0 + 1_000).await.unwrap();
        assert_eq!(out.hop_index, Some(0));

        let sent = h.signer.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].amount, 50);
        assert_eq!(sent[0].to, "Treasury11111111111111111111111111");
        assert_eq!(sent[0].idempotency_key, format!("{}:fee", rec.id));
        assert_eq!(sent[1].amount, 950);
        assert_eq!(sent[1].from, "hop0");
        assert_eq!(sent[1].to, "hop1");
    }

    #[tokio::test]
    async fn test_fresh_lease_is_busy() {
        let h = harness();
        let rec = funded(&h, 3, 1000, 0).await;
        let mut state = rec.state.clone();
        state.in_flight = Some(InFlight {
            action: LeaseAction::Hop(0),
            started_at_unix_ms: T0 + 1_000,
        });
        h.store
            .conditional_update(&rec.id, rec.version, rec.status, &state)
            .await
            .unwrap()
            .unwrap();

        let out = h.executor.step_at(&rec.id, None, T0 + 60_000).await.unwrap();
        assert_eq!(out.busy, Some(true));
        assert_eq!(h.signer.send_count(), 0);
        assert_eq!(h.ledger.history_calls(), 0, "no reconciliation for a fresh lease");
    }

    #[tokio::test]
    async fn test_signer_failure_fails_plan_and_keeps_lease() {
        let h = harness();
        let rec = funded(&h, 3, 1000, 0).await;
        h.signer.set_fail_send(true);

        let err = h.executor.step_at(&rec.id, None, T0 + 1_000).await.unwrap_err();
        assert!(matches!(err, RoutingError::UpstreamSigning(_)));

        let rec = h.store.get(&rec.id).await.unwrap().unwrap();
        assert_eq!(rec.status, RouteStatus::Failed);
        assert!(rec.state.last_error.is_some());
        assert_eq!(rec.state.in_flight.map(|l| l.action), Some(LeaseAction::Hop(0)));

        let out = h.executor.step_at(&rec.id, None, T0 + 1_000_000).await.unwrap();
        assert_eq!(out.status, RouteStatus::Failed);
        assert!(h.store.get(&rec.id).await.unwrap().unwrap().state.in_flight.is_none());
    }

    #[tokio::test]
    async fn test_ledger_failure_during_funding_fails_plan() {
        let h = harness();
        let rec = h
            .store
            .create(TransferRecord::new(fixtures::plan(3, 1000, 0)))
            .await
            .unwrap();
        h.ledger.set_fail(true);

        let err = h.executor.step_at(&rec.id, None, T0).await.unwrap_err();
        assert!(matches!(err, RoutingError::UpstreamLedger(_)));
        let rec = h.store.get(&rec.id).await.unwrap().unwrap();
        assert_eq!(rec.status, RouteStatus::Failed);
    }

    #[tokio::test]
    async fn test_terminal_is_noop() {
        let h = harness();
        let rec = h
            .store
            .create(TransferRecord::new(fixtures::plan(3, 1000, 0)))
            .await
            .unwrap();
        h.store
            .conditional_update(&rec.id, 1, RouteStatus::Failed, &rec.state)
            .await
            .unwrap();

        let out = h.executor.step_at(&rec.id, None, T0).await.unwrap();
        assert_eq!(out.status, RouteStatus::Failed);
        assert_eq!(h.ledger.balance_calls(), 0);
    }
}
