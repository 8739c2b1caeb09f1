//! Hop Router service entry point
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │ Gateway  │───▶│ Planner  │───▶│  Store   │◀───│ Sweeper  │
//! │  (HTTP)  │    │ (Signer) │    │ (PG/mem) │    │ (steps)  │
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Usage: `hop_router [--env dev] [--port 8080]`

use std::sync::Arc;

use hop_router::config::AppConfig;
use hop_router::gateway::{self, state::AppState};
use hop_router::logging;
use hop_router::routing::adapters::ledger_rpc::JsonRpcLedger;
use hop_router::routing::adapters::signer_http::RemoteSigner;
use hop_router::routing::adapters::{LedgerClient, Signer};
use hop_router::routing::worker::WorkerConfig;
use hop_router::routing::{
    ChainProbe, InMemoryTransferStore, PgTransferStore, PlanBuilder, StepExecutor, SweepWorker,
    TransferStore, fee,
};

// ============================================================
// COMMAND LINE
// ============================================================

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _log_guard = logging::init_logging(&config);

    tracing::info!("Starting hop router in {} mode", env);

    let signer: Arc<dyn Signer> = Arc::new(RemoteSigner::new(&config.signer)?);
    let ledger: Arc<dyn LedgerClient> = Arc::new(JsonRpcLedger::new(&config.ledger)?);
    tracing::info!("Signer: {} Ledger: {}", signer.name(), ledger.name());

    let probe = Arc::new(ChainProbe::new(ledger));
    let fee_policy = fee::from_config(&config.fee, probe.clone())?;

    let (store, pg_store): (Arc<dyn TransferStore>, Option<Arc<PgTransferStore>>) =
        match &config.store.postgres_url {
            Some(url) => {
                let pg = Arc::new(PgTransferStore::connect(url, config.store.max_connections).await?);
                pg.init_schema().await?;
                (pg.clone(), Some(pg))
            }
            None => {
                tracing::warn!("No postgres_url configured, routes are kept in memory only");
                (Arc::new(InMemoryTransferStore::new()), None)
            }
        };

    let builder = Arc::new(PlanBuilder::new(
        config.routing.clone(),
        config.fee.destination.clone(),
        signer.clone(),
        fee_policy,
        store.clone(),
    ));
    let executor = Arc::new(StepExecutor::new(
        store.clone(),
        signer,
        probe,
        config.routing.clone(),
    ));

    if config.sweeper.enabled {
        let worker = SweepWorker::new(executor.clone(), WorkerConfig::from(&config.sweeper));
        tokio::spawn(async move {
            worker.run().await;
        });
    } else {
        tracing::info!("Sweeper disabled; routes advance only via the step endpoint");
    }

    let mut state = AppState::new(builder, executor, store);
    if let Some(pg) = pg_store {
        state = state.with_pg_store(pg);
    }

    let port = get_port_override().unwrap_or(config.gateway.port);
    gateway::run_server(&config.gateway.host, port, Arc::new(state)).await
}
