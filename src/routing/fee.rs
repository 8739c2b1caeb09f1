//! Fee Policies
//!
//! The fee is decided once at plan creation and frozen into the plan.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::error::RoutingError;
use super::probe::ChainProbe;
use super::types::Asset;
use crate::config::FeeConfig;

const BPS_DENOMINATOR: u128 = 10_000;

#[async_trait]
pub trait FeePolicy: Send + Sync {
    /// Fee in smallest units of `asset` for routing `amount` from `from_wallet`
    async fn fee_for(&self, from_wallet: &str, asset: &Asset, amount: u64) -> Result<u64, RoutingError>;
}

/// No fee
pub struct NoFee;

#[async_trait]
impl FeePolicy for NoFee {
    async fn fee_for(&self, _from_wallet: &str, _asset: &Asset, _amount: u64) -> Result<u64, RoutingError> {
        Ok(0)
    }
}

/// `amount * bps / 10_000`, rounded down
pub struct BasisPointsFee {
    bps: u32,
}

impl BasisPointsFee {
    pub fn new(bps: u32) -> Result<Self, RoutingError> {
        if bps as u128 > BPS_DENOMINATOR {
            return Err(RoutingError::Configuration(format!(
                "fee bps {} exceeds 10000",
                bps
            )));
        }
        Ok(Self { bps })
    }
}

#[async_trait]
impl FeePolicy for BasisPointsFee {
    async fn fee_for(&self, _from_wallet: &str, _asset: &Asset, amount: u64) -> Result<u64, RoutingError> {
        // bps <= 10_000 so the quotient always fits back into u64
        Ok((amount as u128 * self.bps as u128 / BPS_DENOMINATOR) as u64)
    }
}

/// Waives the inner policy's fee for holders of `holder_asset`
pub struct HolderExemptFee {
    inner: Arc<dyn FeePolicy>,
    probe: Arc<ChainProbe>,
    holder_asset: Asset,
    min_balance: u64,
}

impl HolderExemptFee {
    pub fn new(
        inner: Arc<dyn FeePolicy>,
        probe: Arc<ChainProbe>,
        holder_asset: Asset,
        min_balance: u64,
    ) -> Self {
        Self {
            inner,
            probe,
            holder_asset,
            min_balance,
        }
    }
}

#[async_trait]
impl FeePolicy for HolderExemptFee {
    async fn fee_for(&self, from_wallet: &str, asset: &Asset, amount: u64) -> Result<u64, RoutingError> {
        let held = self.probe.balance(from_wallet, &self.holder_asset).await?;
        if held >= self.min_balance.max(1) {
            debug!(wallet = %from_wallet, held = held, "Holder fee exemption");
            return Ok(0);
        }
        self.inner.fee_for(from_wallet, asset, amount).await
    }
}

/// Build the configured policy
pub fn from_config(
    config: &FeeConfig,
    probe: Arc<ChainProbe>,
) -> Result<Arc<dyn FeePolicy>, RoutingError> {
    let base: Arc<dyn FeePolicy> = match config.policy.as_str() {
        "none" => Arc::new(NoFee),
        "bps" => Arc::new(BasisPointsFee::new(config.bps)?),
        other => {
            return Err(RoutingError::Configuration(format!(
                "unknown fee policy: {} (use 'none' or 'bps')",
                other
            )));
        }
    };

    Ok(match &config.holder_mint {
        Some(mint) => Arc::new(HolderExemptFee::new(
            base,
            probe,
            Asset::Fungible { mint: mint.clone() },
            config.holder_min_balance,
        )),
        None => base,
    })
}
