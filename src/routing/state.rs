//! Route Status Definitions
//!
//! Status IDs are stable for PostgreSQL storage (SMALLINT); names are the
//! wire form used by the API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a routed transfer
///
/// ```text
/// AWAITING_FUNDING → ROUTING → COMPLETE
///        ↓              ↓
///      FAILED ←─────────┘
/// ```
///
/// Terminal states: COMPLETE (30), FAILED (-10)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i16)]
pub enum RouteStatus {
    /// Plan created, waiting for the user to fund hop-0
    AwaitingFunding = 0,

    /// Hop-0 funded; fee and hops are being executed
    Routing = 10,

    /// Terminal: funds delivered to the final destination
    Complete = 30,

    /// Terminal: executor error, funds parked at the last custodian hop
    Failed = -10,
}

impl RouteStatus {
    /// Check if this is a terminal status (no more transitions possible)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, RouteStatus::Complete | RouteStatus::Failed)
    }

    /// Get the numeric status ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL status ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(RouteStatus::AwaitingFunding),
            10 => Some(RouteStatus::Routing),
            30 => Some(RouteStatus::Complete),
            -10 => Some(RouteStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteStatus::AwaitingFunding => "awaiting_funding",
            RouteStatus::Routing => "routing",
            RouteStatus::Complete => "complete",
            RouteStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RouteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "awaiting_funding" => Ok(RouteStatus::AwaitingFunding),
            "routing" => Ok(RouteStatus::Routing),
            "complete" => Ok(RouteStatus::Complete),
            "failed" => Ok(RouteStatus::Failed),
            other => Err(format!("unknown route status: {}", other)),
        }
    }
}

impl TryFrom<i16> for RouteStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        RouteStatus::from_id(value).ok_or(())
    }
}
