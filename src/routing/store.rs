//! Transfer Store
//!
//! Versioned persistence for [`TransferRecord`]s. Every write goes through
//! [`TransferStore::conditional_update`], which succeeds only when the stored
//! version equals the caller's expected version; [`mutate`] wraps it in a
//! bounded read-compute-CAS retry loop.

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::error::RoutingError;
use super::state::RouteStatus;
use super::types::{PlanId, TransferRecord, TransferState};

/// Default CAS attempts for [`mutate`]
pub const DEFAULT_MUTATE_ATTEMPTS: u32 = 4;

/// Replacement status and state computed by a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    pub status: RouteStatus,
    pub state: TransferState,
}

impl RecordUpdate {
    pub fn new(status: RouteStatus, state: TransferState) -> Self {
        Self { status, state }
    }
}

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Insert a new record; fails if the id already exists
    async fn create(&self, record: TransferRecord) -> Result<TransferRecord, RoutingError>;

    async fn get(&self, id: &PlanId) -> Result<Option<TransferRecord>, RoutingError>;

    /// Atomic CAS: write `status`/`state` and bump the version only if the
    /// stored version is `expected_version`.
    ///
    /// Returns `None` on version mismatch or unknown id.
    async fn conditional_update(
        &self,
        id: &PlanId,
        expected_version: i64,
        status: RouteStatus,
        state: &TransferState,
    ) -> Result<Option<TransferRecord>, RoutingError>;

    /// Non-terminal records in id (creation) order, starting strictly after
    /// `after` when given
    async fn list_active(
        &self,
        after: Option<&PlanId>,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, RoutingError>;
}

/// Read, compute `f(current)`, CAS; retry from a fresh read on conflict.
///
/// `f` must be pure. `Ok(None)` from `f` means "no change": the current
/// record is returned without a write. An error from `f` aborts the loop.
pub async fn mutate<F>(
    store: &dyn TransferStore,
    id: &PlanId,
    attempts: u32,
    f: F,
) -> Result<TransferRecord, RoutingError>
where
    F: Fn(&TransferRecord) -> Result<Option<RecordUpdate>, RoutingError> + Send,
{
    for attempt in 1..=attempts.max(1) {
        let current = store
            .get(id)
            .await?
            .ok_or_else(|| RoutingError::NotFound(id.to_string()))?;

        let Some(update) = f(&current)? else {
            return Ok(current);
        };

        if let Some(updated) = store
            .conditional_update(id, current.version, update.status, &update.state)
            .await?
        {
            return Ok(updated);
        }

        debug!(
            plan_id = %id,
            attempt = attempt,
            expected_version = current.version,
            "CAS conflict, retrying"
        );
    }

    Err(RoutingError::ConcurrencyConflict(id.to_string()))
}

/// In-process store for tests and local development
#[derive(Default)]
pub struct InMemoryTransferStore {
    records: DashMap<PlanId, TransferRecord>,
}

impl InMemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl TransferStore for InMemoryTransferStore {
    async fn create(&self, record: TransferRecord) -> Result<TransferRecord, RoutingError> {
        use dashmap::mapref::entry::Entry;

        match self.records.entry(record.id) {
            Entry::Occupied(_) => Err(RoutingError::Storage(format!(
                "duplicate route id {}",
                record.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn get(&self, id: &PlanId) -> Result<Option<TransferRecord>, RoutingError> {
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    async fn conditional_update(
        &self,
        id: &PlanId,
        expected_version: i64,
        status: RouteStatus,
        state: &TransferState,
    ) -> Result<Option<TransferRecord>, RoutingError> {
        // The shard write lock held by get_mut makes compare + write atomic
        let Some(mut entry) = self.records.get_mut(id) else {
            return Ok(None);
        };
        if entry.version != expected_version {
            return Ok(None);
        }
        entry.status = status;
        entry.state = state.clone();
        entry.version += 1;
        Ok(Some(entry.value().clone()))
    }

    async fn list_active(
        &self,
        after: Option<&PlanId>,
        limit: usize,
    ) -> Result<Vec<TransferRecord>, RoutingError> {
        let mut active: Vec<TransferRecord> = self
            .records
            .iter()
            .filter(|r| !r.status.is_terminal())
            .filter(|r| after.is_none_or(|a| r.id.inner() > a.inner()))
            .map(|r| r.value().clone())
            .collect();
        // ULIDs sort by creation time
        active.sort_by_key(|r| r.id.inner());
        active.truncate(limit);
        Ok(active)
    }
}
