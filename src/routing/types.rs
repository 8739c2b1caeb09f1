//! Routing Core Types
//!
//! The immutable [`RoutingPlan`], the mutable [`TransferState`] and the
//! persisted [`TransferRecord`] that pairs them under a version counter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::state::RouteStatus;

/// Plan ID - ULID-based unique identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(ulid::Ulid);

impl PlanId {
    /// Generate a new unique PlanId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Get the inner ULID value
    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for PlanId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PlanId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Asset being routed
///
/// The single point where transfer mechanics differ is the collaborator
/// call; everything else in the workflow is asset-agnostic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Asset {
    /// Chain-native coin (lamports, wei, ...)
    Native,
    /// Fungible token identified by its mint address
    Fungible { mint: String },
}

impl Asset {
    pub fn mint(&self) -> Option<&str> {
        match self {
            Asset::Native => None,
            Asset::Fungible { mint } => Some(mint),
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Asset::Native => write!(f, "native"),
            Asset::Fungible { mint } => write!(f, "fungible:{}", mint),
        }
    }
}

/// Ephemeral hop address plus its signing-service handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopWallet {
    /// Opaque wallet identifier at the signing service
    pub wallet_id: String,
    /// On-chain address
    pub address: String,
}

/// Immutable routing plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingPlan {
    pub id: PlanId,
    pub from_wallet: String,
    /// Final destination; empty in custody mode (see `custody_address`)
    pub to_wallet: String,
    pub asset: Asset,
    /// Gross amount the user funds hop-0 with (smallest units)
    pub amount: u64,
    /// Amount relayed through every hop: `amount - fee`
    pub net_amount: u64,
    pub hop_count: u32,
    pub hops: Vec<HopWallet>,
    pub hop_delays_ms: Vec<u64>,
    pub fee_applied: bool,
    pub fee: u64,
    /// Where the fee goes; required when `fee > 0`
    #[serde(default)]
    pub fee_destination: Option<String>,
    /// Final address when `to_wallet` is empty
    #[serde(default)]
    pub custody_address: Option<String>,
    /// Reported ETA, never below the configured floor
    pub estimated_completion_ms: u64,
    pub created_at_unix: i64,
}

impl RoutingPlan {
    pub fn first_hop_address(&self) -> &str {
        self.hops.first().map(|h| h.address.as_str()).unwrap_or("")
    }

    /// Address the last hop sends to
    pub fn final_destination(&self) -> &str {
        if self.to_wallet.is_empty() {
            self.custody_address.as_deref().unwrap_or("")
        } else {
            &self.to_wallet
        }
    }

    /// Destination of hop `index`: the next hop, or the final destination
    /// for the last one.
    pub fn destination_for_hop(&self, index: u32) -> Option<&str> {
        let i = index as usize;
        if i + 1 < self.hops.len() {
            Some(self.hops[i + 1].address.as_str())
        } else if i + 1 == self.hops.len() {
            Some(self.final_destination())
        } else {
            None
        }
    }

    pub fn hop(&self, index: u32) -> Option<&HopWallet> {
        self.hops.get(index as usize)
    }

    pub fn delay_for(&self, index: u32) -> u64 {
        self.hop_delays_ms.get(index as usize).copied().unwrap_or(0)
    }
}

/// Outcome of one executed hop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopResult {
    pub index: u32,
    pub signature: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Side-effecting action guarded by the in-flight lease
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum LeaseAction {
    /// Fee transfer from hop-0 to the fee destination
    Fee,
    /// Relay of `net_amount` out of hop `i`
    Hop(u32),
}

impl fmt::Display for LeaseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LeaseAction::Fee => write!(f, "fee"),
            LeaseAction::Hop(i) => write!(f, "hop:{}", i),
        }
    }
}

impl FromStr for LeaseAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "fee" {
            return Ok(LeaseAction::Fee);
        }
        s.strip_prefix("hop:")
            .and_then(|i| i.parse::<u32>().ok())
            .map(LeaseAction::Hop)
            .ok_or_else(|| format!("invalid lease action: {}", s))
    }
}

impl From<LeaseAction> for String {
    fn from(action: LeaseAction) -> Self {
        action.to_string()
    }
}

impl TryFrom<String> for LeaseAction {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Soft lease: an action was dispatched but its outcome is not yet recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InFlight {
    pub action: LeaseAction,
    pub started_at_unix_ms: i64,
}

impl InFlight {
    pub fn is_stale(&self, now_ms: i64, stale_ms: i64) -> bool {
        now_ms - self.started_at_unix_ms >= stale_ms
    }
}

/// Mutable execution state
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransferState {
    pub funded: bool,
    #[serde(default)]
    pub funding_signature: Option<String>,
    pub fee_collected: bool,
    #[serde(default)]
    pub fee_signature: Option<String>,
    pub current_hop: u32,
    #[serde(default)]
    pub hop_results: Vec<HopResult>,
    #[serde(default)]
    pub final_signature: Option<String>,
    pub next_action_at_unix_ms: i64,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub in_flight: Option<InFlight>,
}

impl TransferState {
    /// Initial state; a zero fee counts as already collected.
    pub fn new(fee: u64) -> Self {
        Self {
            fee_collected: fee == 0,
            ..Self::default()
        }
    }

    /// Record a completed hop and advance the cursor.
    ///
    /// Returns `false` (and changes nothing) unless `index` is the current hop.
    pub fn record_hop(&mut self, plan: &RoutingPlan, index: u32, signature: &str, now_ms: i64) -> bool {
        if index != self.current_hop || index >= plan.hop_count {
            return false;
        }
        self.hop_results.push(HopResult {
            index,
            signature: signature.to_string(),
            success: true,
            error: None,
        });
        self.current_hop = index + 1;
        if self.current_hop == plan.hop_count {
            self.final_signature = Some(signature.to_string());
        } else {
            self.next_action_at_unix_ms = now_ms + plan.delay_for(self.current_hop) as i64;
        }
        true
    }
}

/// Persisted record: plan + state under an optimistic-concurrency version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: PlanId,
    pub status: RouteStatus,
    /// Incremented by exactly 1 on every successful update
    pub version: i64,
    pub plan: RoutingPlan,
    pub state: TransferState,
}

impl TransferRecord {
    /// Create a new record at AWAITING_FUNDING, version 1
    pub fn new(plan: RoutingPlan) -> Self {
        let state = TransferState::new(plan.fee);
        Self {
            id: plan.id,
            status: RouteStatus::AwaitingFunding,
            version: 1,
            plan,
            state,
        }
    }
}

impl fmt::Display for TransferRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Route[{}] {} hops={}/{} asset={} amount={} status={} v{}",
            self.id,
            self.plan.from_wallet,
            self.state.current_hop,
            self.plan.hop_count,
            self.plan.asset,
            self.plan.amount,
            self.status,
            self.version
        )
    }
}
