use std::sync::Arc;

use crate::routing::{PgTransferStore, PlanBuilder, StepExecutor, TransferStore};

/// Gateway shared state
#[derive(Clone)]
pub struct AppState {
    pub builder: Arc<PlanBuilder>,
    pub executor: Arc<StepExecutor>,
    pub store: Arc<dyn TransferStore>,
    /// Set when the PostgreSQL backend is in use; pinged by the health check
    pub pg_store: Option<Arc<PgTransferStore>>,
}

impl AppState {
    pub fn new(
        builder: Arc<PlanBuilder>,
        executor: Arc<StepExecutor>,
        store: Arc<dyn TransferStore>,
    ) -> Self {
        Self {
            builder,
            executor,
            store,
            pg_store: None,
        }
    }

    pub fn with_pg_store(mut self, pg_store: Arc<PgTransferStore>) -> Self {
        self.pg_store = Some(pg_store);
        self
    }
}
