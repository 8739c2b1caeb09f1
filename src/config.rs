use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;

use crate::routing::RoutingError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub fee: FeeConfig,
    pub signer: SignerConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
}

/// Routing constants
///
/// Defaults match the production deployment: 7..=12 hops, 0.5-3s between
/// hops, reported ETA never under 45s.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RoutingConfig {
    pub min_hops: u32,
    pub max_hops: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub fixed_hop_overhead_ms: u64,
    pub min_total_ms: u64,
    pub max_total_ms: u64,
    /// In-flight lease age after which reconciliation kicks in
    pub stale_ms: u64,
    /// Transactions inspected when reconciling a stale lease
    pub reconcile_lookback: usize,
    /// CAS attempts per state mutation
    pub store_attempts: u32,
    /// Final address for plans created without a destination
    pub custody_address: Option<String>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            min_hops: 7,
            max_hops: 12,
            min_delay_ms: 500,
            max_delay_ms: 3_000,
            fixed_hop_overhead_ms: 1_500,
            min_total_ms: 45_000,
            max_total_ms: 120_000,
            stale_ms: 120_000,
            reconcile_lookback: 50,
            store_attempts: 4,
            custody_address: None,
        }
    }
}

impl RoutingConfig {
    pub fn validate(&self) -> Result<(), RoutingError> {
        if self.min_hops == 0 || self.min_hops > self.max_hops {
            return Err(RoutingError::Configuration(format!(
                "invalid hop range {}..={}",
                self.min_hops, self.max_hops
            )));
        }
        if self.min_delay_ms > self.max_delay_ms {
            return Err(RoutingError::Configuration(format!(
                "invalid delay range {}..={} ms",
                self.min_delay_ms, self.max_delay_ms
            )));
        }
        if self.min_total_ms > self.max_total_ms {
            return Err(RoutingError::Configuration(format!(
                "invalid total range {}..={} ms",
                self.min_total_ms, self.max_total_ms
            )));
        }
        if self.stale_ms == 0 || self.reconcile_lookback == 0 || self.store_attempts == 0 {
            return Err(RoutingError::Configuration(
                "stale_ms, reconcile_lookback and store_attempts must be positive".into(),
            ));
        }
        if let Some(custody) = &self.custody_address
            && !crate::routing::adapters::is_valid_address(custody)
        {
            return Err(RoutingError::Configuration(format!(
                "invalid custody address: {}",
                custody
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct FeeConfig {
    /// `none` or `bps`
    pub policy: String,
    pub bps: u32,
    /// Fee recipient; required once any fee is charged
    pub destination: Option<String>,
    /// Holders of this mint route for free
    pub holder_mint: Option<String>,
    pub holder_min_balance: u64,
}

impl FeeConfig {
    /// Catch a bad fee setup at startup instead of on the first funded route
    pub fn validate(&self) -> Result<(), RoutingError> {
        use crate::routing::adapters::is_valid_address;

        match self.policy.as_str() {
            "none" => {}
            "bps" => {
                if self.bps > 10_000 {
                    return Err(RoutingError::Configuration(format!(
                        "fee bps {} exceeds 10000",
                        self.bps
                    )));
                }
                if self.bps > 0 && self.destination.is_none() {
                    return Err(RoutingError::Configuration(
                        "fee.destination is required when fee.bps > 0".into(),
                    ));
                }
            }
            other => {
                return Err(RoutingError::Configuration(format!(
                    "unknown fee policy: {}",
                    other
                )));
            }
        }
        if let Some(destination) = &self.destination
            && !is_valid_address(destination)
        {
            return Err(RoutingError::Configuration(format!(
                "invalid fee destination: {}",
                destination
            )));
        }
        if let Some(mint) = &self.holder_mint
            && !is_valid_address(mint)
        {
            return Err(RoutingError::Configuration(format!(
                "invalid fee holder mint: {}",
                mint
            )));
        }
        Ok(())
    }
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            policy: "none".to_string(),
            bps: 0,
            destination: None,
            holder_mint: None,
            holder_min_balance: 1,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SignerConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    pub rpc_url: String,
    #[serde(default = "default_commitment")]
    pub commitment: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_commitment() -> String {
    "confirmed".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct StoreConfig {
    /// PostgreSQL URL; the in-memory store is used when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SweeperConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub batch_size: usize,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 2_000,
            batch_size: 100,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml_str(&content).with_context(|| format!("Invalid config: {}", config_path))
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = serde_yaml::from_str(content).context("Failed to parse config yaml")?;
        config.routing.validate()?;
        config.fee.validate()?;
        Ok(config)
    }
}
