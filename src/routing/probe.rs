//! Chain Probe
//!
//! Read-only ledger queries used by the executor: hop balances for funding
//! detection, and the bounded history search used only to reconcile a
//! stale in-flight action. A freshly sent transaction is never confirmed
//! through here; the signer's returned signature is the binding result.

use std::sync::Arc;

use tracing::debug;

use super::adapters::LedgerClient;
use super::error::RoutingError;
use super::types::Asset;

pub struct ChainProbe {
    ledger: Arc<dyn LedgerClient>,
}

impl ChainProbe {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    /// Current balance of `address` for `asset`
    pub async fn balance(&self, address: &str, asset: &Asset) -> Result<u64, RoutingError> {
        Ok(self.ledger.get_balance(address, asset).await?)
    }

    /// Search the `lookback` most recent transactions of `from` for an
    /// exact transfer of `amount` of `asset` to `to`.
    pub async fn find_recent_transfer(
        &self,
        from: &str,
        to: &str,
        amount: u64,
        asset: &Asset,
        lookback: usize,
    ) -> Result<Option<String>, RoutingError> {
        let recent = self.ledger.get_recent_transfers(from, lookback).await?;
        let found = recent
            .into_iter()
            .find(|t| t.source == from && t.destination == to && t.amount == amount && &t.asset == asset)
            .map(|t| t.signature);

        debug!(
            ledger = self.ledger.name(),
            from = %from,
            to = %to,
            amount = amount,
            asset = %asset,
            found = found.is_some(),
            "History probe"
        );
        Ok(found)
    }
}
