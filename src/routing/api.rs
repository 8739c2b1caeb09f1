//! Routing API Layer
//!
//! Request/response shapes for the three client operations (create, step,
//! status) and the conversions between them and the core types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::RoutingError;
use super::executor::{StepExecutor, StepOutcome};
use super::planner::{PlanBuilder, PlanRequest};
use super::store::TransferStore;
use super::types::{Asset, HopResult, InFlight, PlanId, TransferRecord};

// ============================================================================
// API Request/Response Types
// ============================================================================

/// Create-route request
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateRouteRequest {
    #[schema(example = "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T")]
    pub from_wallet: String,
    /// Empty only when a custody address is configured
    #[serde(default)]
    pub to_wallet: String,
    /// Token mint; omitted for the native coin
    #[serde(default)]
    pub mint: Option<String>,
    /// Amount in smallest units, as a string to avoid float precision issues
    #[schema(example = "1000000000")]
    pub amount: String,
}

/// Create-route response
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreateRouteResponse {
    pub id: String,
    pub hop_count: u32,
    pub estimated_completion_ms: u64,
    pub fee_applied: bool,
    pub fee: String,
    /// Address the client must fund with `amount`
    pub first_hop_address: String,
}

/// Step request body; all fields optional
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct StepRouteRequest {
    /// Signature of the client's funding transaction
    #[serde(default)]
    pub funding_signature: Option<String>,
}

/// Read-only projection of a route record
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct RouteStatusView {
    pub id: String,
    pub status: String,
    pub asset: String,
    pub amount: String,
    pub net_amount: String,
    pub fee: String,
    pub from_wallet: String,
    pub to_wallet: String,
    pub first_hop_address: String,
    pub hop_count: u32,
    pub current_hop: u32,
    pub funded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub funding_signature: Option<String>,
    pub fee_collected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee_signature: Option<String>,
    #[schema(value_type = Vec<Object>)]
    pub hop_results: Vec<HopResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_signature: Option<String>,
    pub next_action_at_unix_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub in_flight: Option<InFlight>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub estimated_completion_ms: u64,
    pub created_at_unix: i64,
    pub version: i64,
}

impl From<&TransferRecord> for CreateRouteResponse {
    fn from(record: &TransferRecord) -> Self {
        Self {
            id: record.id.to_string(),
            hop_count: record.plan.hop_count,
            estimated_completion_ms: record.plan.estimated_completion_ms,
            fee_applied: record.plan.fee_applied,
            fee: record.plan.fee.to_string(),
            first_hop_address: record.plan.first_hop_address().to_string(),
        }
    }
}

impl From<&TransferRecord> for RouteStatusView {
    fn from(record: &TransferRecord) -> Self {
        let plan = &record.plan;
        let state = &record.state;
        Self {
            id: record.id.to_string(),
            status: record.status.as_str().to_string(),
            asset: plan.asset.to_string(),
            amount: plan.amount.to_string(),
            net_amount: plan.net_amount.to_string(),
            fee: plan.fee.to_string(),
            from_wallet: plan.from_wallet.clone(),
            to_wallet: plan.final_destination().to_string(),
            first_hop_address: plan.first_hop_address().to_string(),
            hop_count: plan.hop_count,
            current_hop: state.current_hop,
            funded: state.funded,
            funding_signature: state.funding_signature.clone(),
            fee_collected: state.fee_collected,
            fee_signature: state.fee_signature.clone(),
            hop_results: state.hop_results.clone(),
            final_signature: state.final_signature.clone(),
            next_action_at_unix_ms: state.next_action_at_unix_ms,
            in_flight: state.in_flight,
            last_error: state.last_error.clone(),
            estimated_completion_ms: plan.estimated_completion_ms,
            created_at_unix: plan.created_at_unix,
            version: record.version,
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Parse a smallest-unit integer amount
fn parse_amount(s: &str) -> Result<u64, RoutingError> {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(RoutingError::Validation(format!(
            "amount must be a non-negative integer in smallest units: {:?}",
            s
        )));
    }
    s.parse::<u64>()
        .map_err(|_| RoutingError::Validation(format!("amount out of range: {}", s)))
}

pub fn parse_plan_id(s: &str) -> Result<PlanId, RoutingError> {
    s.parse()
        .map_err(|_| RoutingError::Validation(format!("invalid route id: {}", s)))
}

impl TryFrom<CreateRouteRequest> for PlanRequest {
    type Error = RoutingError;

    fn try_from(req: CreateRouteRequest) -> Result<Self, Self::Error> {
        let asset = match req.mint {
            Some(mint) if !mint.trim().is_empty() => Asset::Fungible {
                mint: mint.trim().to_string(),
            },
            _ => Asset::Native,
        };
        Ok(PlanRequest {
            from_wallet: req.from_wallet.trim().to_string(),
            to_wallet: req.to_wallet.trim().to_string(),
            asset,
            amount: parse_amount(&req.amount)?,
        })
    }
}

// ============================================================================
// Operations
// ============================================================================

pub async fn create_route(
    builder: &PlanBuilder,
    req: CreateRouteRequest,
) -> Result<CreateRouteResponse, RoutingError> {
    let record = builder.create_plan(PlanRequest::try_from(req)?).await?;
    Ok(CreateRouteResponse::from(&record))
}

pub async fn step_route(
    executor: &StepExecutor,
    id: &str,
    req: StepRouteRequest,
) -> Result<StepOutcome, RoutingError> {
    let id = parse_plan_id(id)?;
    executor
        .step(&id, req.funding_signature.as_deref().filter(|s| !s.is_empty()))
        .await
}

pub async fn get_route_status(
    store: &dyn TransferStore,
    id: &str,
) -> Result<RouteStatusView, RoutingError> {
    let id = parse_plan_id(id)?;
    let record = store
        .get(&id)
        .await?
        .ok_or_else(|| RoutingError::NotFound(id.to_string()))?;
    Ok(RouteStatusView::from(&record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::state::RouteStatus;
    use crate::routing::store::InMemoryTransferStore;
    use crate::routing::types::fixtures;

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("1000").unwrap(), 1000);
        assert_eq!(parse_amount(" 42 ").unwrap(), 42);
        assert!(parse_amount("").is_err());
        assert!(parse_amount("1.5").is_err());
        assert!(parse_amount("-3").is_err());
        assert!(parse_amount("99999999999999999999999").is_err());
    }

    #[test]
    fn test_request_conversion() {
        let req = CreateRouteRequest {
            from_wallet: " Src ".into(),
            to_wallet: "Dst".into(),
            mint: Some("Mint".into()),
            amount: "10".into(),
        };
        let plan_req = PlanRequest::try_from(req).unwrap();
        assert_eq!(plan_req.from_wallet, "Src");
        assert_eq!(plan_req.asset, Asset::Fungible { mint: "Mint".into() });

        let native = PlanRequest::try_from(CreateRouteRequest {
            from_wallet: "Src".into(),
            to_wallet: "Dst".into(),
            mint: Some("  ".into()),
            amount: "10".into(),
        })
        .unwrap();
        assert_eq!(native.asset, Asset::Native);
    }

    #[tokio::test]
    async fn test_status_projection() {
        let store = InMemoryTransferStore::new();
        let rec = store
            .create(TransferRecord::new(fixtures::plan(3, 1000, 50)))
            .await
            .unwrap();

        let view = get_route_status(&store, &rec.id.to_string()).await.unwrap();
        assert_eq!(view.status, RouteStatus::AwaitingFunding.as_str());
        assert_eq!(view.first_hop_address, "hop0");
        assert_eq!(view.net_amount, "950");
        assert_eq!(view.current_hop, 0);
        assert_eq!(view.hop_count, 3);

        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("in_flight").is_none());
        assert!(json.get("last_error").is_none());
    }

    #[tokio::test]
    async fn test_status_bad_and_unknown_ids() {
        let store = InMemoryTransferStore::new();
        assert!(matches!(
            get_route_status(&store, "nope").await,
            Err(RoutingError::Validation(_))
        ));
        assert!(matches!(
            get_route_status(&store, &PlanId::new().to_string()).await,
            Err(RoutingError::NotFound(_))
        ));
    }
}
