//! Remote Signing Service Client
//!
//! Talks JSON over HTTP to the custodial signing service:
//!
//! - `POST {base}/v1/wallets` → `{ "wallet_id", "address" }`
//! - `POST {base}/v1/transfers` → `{ "signature" }`
//!
//! Every transfer carries an `Idempotency-Key` header (`<plan_id>:<action>`)
//! so a service that dedupes can absorb a re-dispatch after reconciliation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Signer, SignerError, TransferIntent};
use crate::config::SignerConfig;
use crate::routing::types::{Asset, HopWallet};

pub struct RemoteSigner {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct TransferBody<'a> {
    wallet_id: &'a str,
    from: &'a str,
    to: &'a str,
    asset: &'a Asset,
    amount: u64,
}

#[derive(Deserialize)]
struct WalletResponse {
    wallet_id: String,
    address: String,
}

#[derive(Deserialize)]
struct TransferResponse {
    signature: String,
}

impl RemoteSigner {
    pub fn new(config: &SignerConfig) -> Result<Self, SignerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| SignerError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn read<R>(response: reqwest::Response) -> Result<R, SignerError>
    where
        R: for<'de> Deserialize<'de>,
    {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if status.is_client_error() {
                SignerError::Rejected(format!("{}: {}", status, body))
            } else {
                SignerError::Network(format!("{}: {}", status, body))
            });
        }
        response
            .json()
            .await
            .map_err(|e| SignerError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl Signer for RemoteSigner {
    fn name(&self) -> &'static str {
        "remote-signer"
    }

    async fn create_wallet(&self) -> Result<HopWallet, SignerError> {
        let response = self
            .post("/v1/wallets")
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| SignerError::Network(format!("HTTP request failed: {}", e)))?;

        let wallet: WalletResponse = Self::read(response).await?;
        debug!(wallet_id = %wallet.wallet_id, address = %wallet.address, "Hop wallet created");
        Ok(HopWallet {
            wallet_id: wallet.wallet_id,
            address: wallet.address,
        })
    }

    async fn sign_and_broadcast(&self, intent: TransferIntent<'_>) -> Result<String, SignerError> {
        let body = TransferBody {
            wallet_id: intent.wallet_id,
            from: intent.from,
            to: intent.to,
            asset: intent.asset,
            amount: intent.amount,
        };

        let response = self
            .post("/v1/transfers")
            .header("Idempotency-Key", intent.idempotency_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SignerError::Network(format!("HTTP request failed: {}", e)))?;

        let sent: TransferResponse = Self::read(response).await?;
        if sent.signature.is_empty() {
            return Err(SignerError::Malformed("empty signature".into()));
        }
        Ok(sent.signature)
    }
}
