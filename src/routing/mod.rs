//! Multi-Hop Routing Engine
//!
//! Moves an amount of a native coin or fungible token from a source wallet to
//! a destination through a randomized chain of short-lived hop wallets.
//!
//! # Architecture
//!
//! - [`planner::PlanBuilder`] validates a request, prices it and creates the
//!   hop wallets at the remote signer
//! - [`store::TransferStore`] persists plan + state under a CAS version
//! - [`executor::StepExecutor`] advances one unit of work per call
//! - [`probe::ChainProbe`] reads balances and, for reconciliation only,
//!   recent hop history
//! - [`worker::SweepWorker`] drives every active route on an interval
//!
//! # State Machine
//!
//! ```text
//! AWAITING_FUNDING → ROUTING → COMPLETE
//!         ↓             ↓
//!       FAILED ←────────┘
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Ordered hops**: hop `i` is dispatched only when `current_hop == i`
//! 2. **Lease-Before-Send**: every send is preceded by a persisted lease
//! 3. **Fee first**: a non-zero fee leaves hop-0 before any relay does
//! 4. **Signature is truth**: a returned signature is the binding result;
//!    chain history is consulted only for stale leases

pub mod adapters;
pub mod api;
pub mod db;
pub mod error;
pub mod executor;
pub mod fee;
pub mod planner;
pub mod probe;
pub mod reconcile;
pub mod state;
pub mod store;
pub mod types;
pub mod worker;

#[cfg(test)]
mod integration_tests;

// Re-exports for convenience
pub use api::{CreateRouteRequest, CreateRouteResponse, RouteStatusView, StepRouteRequest};
pub use db::PgTransferStore;
pub use error::RoutingError;
pub use executor::{StepExecutor, StepOutcome};
pub use fee::FeePolicy;
pub use planner::{PlanBuilder, PlanRequest};
pub use probe::ChainProbe;
pub use reconcile::ReconcileOutcome;
pub use state::RouteStatus;
pub use store::{InMemoryTransferStore, RecordUpdate, TransferStore, mutate};
pub use types::{Asset, PlanId, RoutingPlan, TransferRecord, TransferState};
pub use worker::SweepWorker;
