//! PostgreSQL Route Store
//!
//! One row per route. The plan and state are JSONB documents; `status` is
//! kept as a SMALLINT column for sweeps and `version` is the CAS token used
//! in every UPDATE's WHERE clause.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;

use super::error::RoutingError;
use super::state::RouteStatus;
use super::store::TransferStore;
use super::types::{PlanId, RoutingPlan, TransferRecord, TransferState};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS hop_routes_tb (
    id          TEXT PRIMARY KEY,
    status      SMALLINT NOT NULL,
    version     BIGINT NOT NULL,
    plan        JSONB NOT NULL,
    state       JSONB NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

const CREATE_STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_hop_routes_status ON hop_routes_tb (status, id)";

pub struct PgTransferStore {
    pool: PgPool,
}

impl PgTransferStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a pool sized for the executor and sweeper
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, RoutingError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    pub async fn init_schema(&self) -> Result<(), RoutingError> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_STATUS_INDEX).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), RoutingError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<TransferRecord, RoutingError> {
        let id_str: String = row.try_get("id")?;
        let id: PlanId = id_str
            .parse()
            .map_err(|_| RoutingError::Internal(format!("Invalid route id: {}", id_str)))?;

        let status_id: i16 = row.try_get("status")?;
        let status = RouteStatus::from_id(status_id)
            .ok_or_else(|| RoutingError::Internal(format!("Invalid status ID: {}", status_id)))?;

        let plan: RoutingPlan = serde_json::from_value(row.try_get("plan")?)?;
        let state: TransferState = serde_json::from_value(row.try_get("state")?)?;

        Ok(TransferRecord {
            id,
            status,
            version: row.try_get("version")?,
            plan,
            state,
        })
    }
}

#[async_trait]
impl TransferStore for PgTransferStore {
    async fn create(&self, record: TransferRecord) -> Result<TransferRecord, RoutingError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO hop_routes_tb (id, status, version, plan, state, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, NOW(), NOW())
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(record.id.to_string())
        .bind(record.status.id())
        .bind(record.version)
        .bind(serde_json::to_value(&record.plan)?)
        .bind(serde_json::to_value(&record.state)?)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(RoutingError::Storage(format!(
                "duplicate route id {}",
                record.id
            )));
        }
        Ok(record)
    }

    async fn get(&self, id: &PlanId) -> Result<Option<TransferRecord>, RoutingError> {
        let row = sqlx::query(
            "SELECT id, status, version, plan, state FROM hop_routes_tb WHERE id = $1",
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn conditional_update(
        &self,
        id: &PlanId,
        expected_version: i64,
        status: RouteStatus,
        state: &TransferState,
    ) -> Result<Option<TransferRecord>, RoutingError> {
        let row = sqlx::query(
            r#"
            UPDATE hop_routes_tb
            SET status = $1, state = $2, version = version + 1, updated_at = NOW()
            WHERE id = $3 AND version = $4
            RETURNING id, status, version, plan, state
            "#,
        )
        .bind(status.id())
        .bind(serde_json::to_value(state)?)
        .bind(id.to_string())
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn list_active(
        &self,
        after: Option<&PlanId>,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, RoutingError> {
        // ULID text sorts in the same order as the ULID itself
        let rows = sqlx::query(
            r#"
            SELECT id, status, version, plan, state
            FROM hop_routes_tb
            WHERE status NOT IN ($1, $2)
              AND ($3::TEXT IS NULL OR id > $3)
            ORDER BY id ASC
            LIMIT $4
            "#,
        )
        .bind(RouteStatus::Complete.id())
        .bind(RouteStatus::Failed.id())
        .bind(after.map(|id| id.to_string()))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }
}
