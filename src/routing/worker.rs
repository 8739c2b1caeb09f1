//! Sweep Worker
//!
//! Background driver that steps every non-terminal route on a fixed interval.
//! Stepping is idempotent under the lease protocol, so the sweeper can run
//! alongside API-driven steps and other sweeper instances.
//!
//! Each sweep takes the next page of at most `batch_size` active routes after
//! a cursor kept between sweeps; a short page wraps the cursor back to the
//! start. Routes that never get funded cannot starve newer ones.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info};

use super::error::RoutingError;
use super::executor::StepExecutor;
use super::types::PlanId;
use crate::config::SweeperConfig;

/// Configuration for the sweep worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pause between sweeps
    pub scan_interval: Duration,
    /// Maximum routes stepped per sweep
    pub batch_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(2),
            batch_size: 100,
        }
    }
}

impl From<&SweeperConfig> for WorkerConfig {
    fn from(config: &SweeperConfig) -> Self {
        Self {
            scan_interval: Duration::from_millis(config.interval_ms),
            batch_size: config.batch_size,
        }
    }
}

pub struct SweepWorker {
    executor: Arc<StepExecutor>,
    config: WorkerConfig,
    /// Last id of the previous full page
    cursor: Mutex<Option<PlanId>>,
}

impl SweepWorker {
    pub fn new(executor: Arc<StepExecutor>, config: WorkerConfig) -> Self {
        Self {
            executor,
            config,
            cursor: Mutex::new(None),
        }
    }

    pub fn with_defaults(executor: Arc<StepExecutor>) -> Self {
        Self::new(executor, WorkerConfig::default())
    }

    /// Run the sweep loop forever
    pub async fn run(&self) -> ! {
        info!(
            scan_interval_ms = self.config.scan_interval.as_millis() as u64,
            batch_size = self.config.batch_size,
            "Starting sweep worker"
        );

        loop {
            if let Err(e) = self.sweep_once().await {
                error!(error = %e, "Sweep failed");
            }

            tokio::time::sleep(self.config.scan_interval).await;
        }
    }

    /// Step the next page of active routes once; returns how many changed status
    pub async fn sweep_once(&self) -> Result<usize, RoutingError> {
        let after = *self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
        let active = self
            .executor
            .store()
            .list_active(after.as_ref(), self.config.batch_size)
            .await?;

        let next = if active.len() < self.config.batch_size {
            None
        } else {
            active.last().map(|r| r.id)
        };
        *self.cursor.lock().unwrap_or_else(PoisonError::into_inner) = next;

        if active.is_empty() {
            debug!("No active routes");
            return Ok(0);
        }

        let mut advanced = 0;
        for record in &active {
            match self.executor.step(&record.id, None).await {
                Ok(outcome) => {
                    if outcome.status != record.status {
                        info!(
                            plan_id = %record.id,
                            old_status = %record.status,
                            new_status = %outcome.status,
                            "Route status advanced"
                        );
                        advanced += 1;
                    } else if outcome.hop_index.is_some() || outcome.fee_collected.is_some() {
                        debug!(plan_id = %record.id, hop = ?outcome.hop_index, "Route progressed");
                    }
                }
                Err(e) => {
                    error!(
                        plan_id = %record.id,
                        code = e.code(),
                        error = %e,
                        "Sweep step failed"
                    );
                }
            }
        }

        Ok(advanced)
    }
}
