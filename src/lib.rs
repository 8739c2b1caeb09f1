//! Hop Router - multi-hop transfer orchestration
//!
//! Moves funds from a source wallet to a destination through a randomized
//! chain of burner wallets, one externally triggered step at a time.
//!
//! # Modules
//!
//! - [`routing`] - Planner, step executor, stores and chain adapters
//! - [`gateway`] - HTTP API over the routing operations
//! - [`config`] - YAML application config
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod gateway;
pub mod logging;
pub mod routing;

pub use config::AppConfig;
pub use routing::{
    PlanBuilder, PlanRequest, RouteStatus, RoutingError, StepExecutor, StepOutcome, TransferRecord,
    TransferStore,
};
