//! Collaborator Adapters
//!
//! Contracts the routing core needs from the outside world:
//! - [`Signer`]: remote custodial signing service (wallet creation + send)
//! - [`LedgerClient`]: read-only blockchain RPC
//!
//! Concrete clients live in [`signer_http`] and [`ledger_rpc`].

pub mod ledger_rpc;
pub mod signer_http;

pub use ledger_rpc::JsonRpcLedger;
pub use signer_http::RemoteSigner;

use async_trait::async_trait;
use thiserror::Error;

use super::types::{Asset, HopWallet};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("Network error: {0}")]
    Network(String),
    /// The service answered and refused the request
    #[error("Rejected: {0}")]
    Rejected(String),
    #[error("Malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("RPC connection failed: {0}")]
    Connection(String),
    #[error("RPC error: {0}")]
    Rpc(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

/// One transfer of funds
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferIntent<'a> {
    pub wallet_id: &'a str,
    pub from: &'a str,
    pub to: &'a str,
    pub asset: &'a Asset,
    pub amount: u64,
    /// `<plan_id>:<action>`; services that support it dedupe on this key
    pub idempotency_key: &'a str,
}

/// Remote custodial signer
///
/// No key material ever reaches this process: every hop is addressed by
/// the opaque `wallet_id` the service handed out at creation.
#[async_trait]
pub trait Signer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create a fresh ephemeral wallet
    async fn create_wallet(&self) -> Result<HopWallet, SignerError>;

    /// Sign and broadcast a transfer, returning the transaction signature
    ///
    /// A returned signature is the binding confirmation of the send.
    async fn sign_and_broadcast(&self, intent: TransferIntent<'_>) -> Result<String, SignerError>;
}

/// Transfer observed in chain history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTransfer {
    pub signature: String,
    pub source: String,
    pub destination: String,
    pub asset: Asset,
    pub amount: u64,
}

/// Read-only ledger RPC
#[async_trait]
pub trait LedgerClient: Send + Sync {
    fn name(&self) -> &'static str;

    /// Balance of `address` for `asset` in smallest units
    async fn get_balance(&self, address: &str, asset: &Asset) -> Result<u64, LedgerError>;

    /// Transfers out of recent transactions touching `address`, newest
    /// first, looking at no more than `limit` transactions
    async fn get_recent_transfers(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<ObservedTransfer>, LedgerError>;
}

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Address format check (base58, 32..=44 chars)
pub fn is_valid_address(address: &str) -> bool {
    (32..=44).contains(&address.len()) && address.chars().all(|c| BASE58_ALPHABET.contains(c))
}
