//! Stale Lease Reconciliation
//!
//! A lease older than `stale_ms` means a previous step dispatched a send and
//! never recorded the outcome (crash, timeout, lost CAS). The sending hop's
//! recent history decides what happened: an exact match is adopted as the
//! action's result; otherwise the lease is dropped and the action becomes due
//! again. A duplicate send after an inconclusive probe is possible when the
//! transfer landed outside the lookback window; the signer's idempotency key
//! is the remaining guard.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use super::error::RoutingError;
use super::executor::StepExecutor;
use super::state::RouteStatus;
use super::store::{RecordUpdate, mutate};
use super::types::{InFlight, LeaseAction, TransferRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The transfer landed; its signature was recorded
    Adopted {
        action: LeaseAction,
        signature: String,
    },
    /// No match in the lookback window; lease cleared, action will re-run
    Inconclusive { action: LeaseAction },
    /// Another caller resolved this lease first
    Superseded { action: LeaseAction },
}

impl StepExecutor {
    pub(super) async fn reconcile_stale(
        &self,
        record: &TransferRecord,
        lease: InFlight,
        now_ms: i64,
    ) -> Result<(TransferRecord, ReconcileOutcome), RoutingError> {
        let plan = &record.plan;
        let (from, to, amount) = match lease.action {
            LeaseAction::Fee => {
                let to = plan.fee_destination.as_deref().ok_or_else(|| {
                    RoutingError::Internal(format!("route {} has a fee lease but no fee destination", record.id))
                })?;
                (plan.first_hop_address(), to, plan.fee)
            }
            LeaseAction::Hop(i) => {
                let hop = plan.hop(i).ok_or_else(|| {
                    RoutingError::Internal(format!("route {} lease names missing hop {}", record.id, i))
                })?;
                let to = plan.destination_for_hop(i).unwrap_or_default();
                (hop.address.as_str(), to, plan.net_amount)
            }
        };

        let found = self
            .probe
            .find_recent_transfer(from, to, amount, &plan.asset, self.config.reconcile_lookback)
            .await?;

        let applied = AtomicBool::new(false);
        let updated = mutate(
            self.store.as_ref(),
            &record.id,
            self.config.store_attempts,
            |current| {
                applied.store(false, Ordering::SeqCst);
                if current.state.in_flight != Some(lease) {
                    return Ok(None);
                }
                let mut state = current.state.clone();
                let mut status = current.status;
                if let Some(signature) = &found {
                    match lease.action {
                        LeaseAction::Fee => {
                            if !state.fee_collected {
                                state.fee_collected = true;
                                state.fee_signature = Some(signature.clone());
                            }
                        }
                        LeaseAction::Hop(i) => {
                            if state.record_hop(&current.plan, i, signature, now_ms)
                                && status == RouteStatus::Routing
                                && state.current_hop == current.plan.hop_count
                            {
                                status = RouteStatus::Complete;
                            }
                        }
                    }
                }
                state.in_flight = None;
                applied.store(true, Ordering::SeqCst);
                Ok(Some(RecordUpdate::new(status, state)))
            },
        )
        .await?;

        let outcome = match (applied.load(Ordering::SeqCst), found) {
            (false, _) => ReconcileOutcome::Superseded {
                action: lease.action,
            },
            (true, Some(signature)) => ReconcileOutcome::Adopted {
                action: lease.action,
                signature,
            },
            (true, None) => ReconcileOutcome::Inconclusive {
                action: lease.action,
            },
        };

        warn!(
            plan_id = %record.id,
            action = %lease.action,
            lease_age_ms = now_ms - lease.started_at_unix_ms,
            outcome = ?outcome,
            status = %updated.status,
            "Stale lease reconciled"
        );
        Ok((updated, outcome))
    }
}
