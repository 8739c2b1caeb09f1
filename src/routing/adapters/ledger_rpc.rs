//! Ledger JSON-RPC Client
//!
//! Read-only queries against a Solana-style JSON-RPC endpoint:
//! - `getBalance` / `getTokenAccountsByOwner` for balances
//! - `getSignaturesForAddress` + `getTransaction` (jsonParsed) for history
//!
//! Token transfers are reported by owner, not by token account, using the
//! transaction's `postTokenBalances` to map accounts to owners.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{LedgerClient, LedgerError, ObservedTransfer};
use crate::config::LedgerConfig;
use crate::routing::types::Asset;

/// JSON-RPC request structure
#[derive(Serialize)]
struct JsonRpcRequest<T> {
    jsonrpc: &'static str,
    method: &'static str,
    params: T,
    id: u64,
}

/// JSON-RPC response structure
#[derive(Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct SignatureInfo {
    signature: String,
    #[serde(default)]
    err: Option<Value>,
}

pub struct JsonRpcLedger {
    client: reqwest::Client,
    url: String,
    commitment: String,
}

impl JsonRpcLedger {
    pub fn new(config: &LedgerConfig) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| LedgerError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.rpc_url.clone(),
            commitment: config.commitment.clone(),
        })
    }

    /// Make a JSON-RPC call
    async fn rpc_call<T, R>(&self, method: &'static str, params: T) -> Result<Option<R>, LedgerError>
    where
        T: Serialize,
        R: for<'de> Deserialize<'de>,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: 1,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| LedgerError::Connection(format!("HTTP request failed: {}", e)))?;

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| LedgerError::Parse(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = rpc_response.error {
            return Err(LedgerError::Rpc(format!(
                "{} failed ({}): {}",
                method, error.code, error.message
            )));
        }

        Ok(rpc_response.result)
    }

    async fn native_balance(&self, address: &str) -> Result<u64, LedgerError> {
        let result: Option<Value> = self
            .rpc_call("getBalance", json!([address, { "commitment": self.commitment }]))
            .await?;
        result
            .as_ref()
            .and_then(|r| r["value"].as_u64())
            .ok_or_else(|| LedgerError::Parse("getBalance: missing value".into()))
    }

    async fn token_balance(&self, owner: &str, mint: &str) -> Result<u64, LedgerError> {
        let result: Option<Value> = self
            .rpc_call(
                "getTokenAccountsByOwner",
                json!([
                    owner,
                    { "mint": mint },
                    { "encoding": "jsonParsed", "commitment": self.commitment }
                ]),
            )
            .await?;

        let accounts = result
            .as_ref()
            .and_then(|r| r["value"].as_array())
            .ok_or_else(|| LedgerError::Parse("getTokenAccountsByOwner: missing value".into()))?;

        let mut total: u64 = 0;
        for account in accounts {
            let amount = account["account"]["data"]["parsed"]["info"]["tokenAmount"]["amount"]
                .as_str()
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| LedgerError::Parse("token account without amount".into()))?;
            total = total.saturating_add(amount);
        }
        Ok(total)
    }

    async fn transaction_transfers(&self, signature: &str) -> Result<Vec<ObservedTransfer>, LedgerError> {
        let tx: Option<Value> = self
            .rpc_call(
                "getTransaction",
                json!([
                    signature,
                    {
                        "encoding": "jsonParsed",
                        "commitment": self.commitment,
                        "maxSupportedTransactionVersion": 0
                    }
                ]),
            )
            .await?;

        // A listed, non-failed signature must be readable; null means the node
        // has not caught up at this commitment.
        let tx = tx.ok_or_else(|| {
            LedgerError::Rpc(format!("getTransaction: {} not available yet", signature))
        })?;
        Ok(parse_transfers(signature, &tx))
    }
}

/// Extract system and SPL token transfers from a jsonParsed transaction
fn parse_transfers(signature: &str, tx: &Value) -> Vec<ObservedTransfer> {
    let keys: Vec<&str> = tx["transaction"]["message"]["accountKeys"]
        .as_array()
        .map(|keys| {
            keys.iter()
                .map(|k| k["pubkey"].as_str().or_else(|| k.as_str()).unwrap_or(""))
                .collect()
        })
        .unwrap_or_default();

    // token account -> (owner, mint)
    let mut token_accounts: HashMap<&str, (&str, &str)> = HashMap::new();
    if let Some(balances) = tx["meta"]["postTokenBalances"].as_array() {
        for b in balances {
            if let (Some(idx), Some(owner), Some(mint)) = (
                b["accountIndex"].as_u64(),
                b["owner"].as_str(),
                b["mint"].as_str(),
            ) && let Some(account) = keys.get(idx as usize)
            {
                token_accounts.insert(*account, (owner, mint));
            }
        }
    }

    let Some(instructions) = tx["transaction"]["message"]["instructions"].as_array() else {
        return Vec::new();
    };

    let mut transfers = Vec::new();
    for ix in instructions {
        let kind = ix["parsed"]["type"].as_str().unwrap_or("");
        let info = &ix["parsed"]["info"];
        match (ix["program"].as_str(), kind) {
            (Some("system"), "transfer") => {
                if let (Some(source), Some(destination), Some(lamports)) = (
                    info["source"].as_str(),
                    info["destination"].as_str(),
                    info["lamports"].as_u64(),
                ) {
                    transfers.push(ObservedTransfer {
                        signature: signature.to_string(),
                        source: source.to_string(),
                        destination: destination.to_string(),
                        asset: Asset::Native,
                        amount: lamports,
                    });
                }
            }
            (Some("spl-token"), "transfer" | "transferChecked") => {
                let amount = info["amount"]
                    .as_str()
                    .or_else(|| info["tokenAmount"]["amount"].as_str())
                    .and_then(|s| s.parse::<u64>().ok());
                let source_account = info["source"].as_str().unwrap_or("");
                let dest_account = info["destination"].as_str().unwrap_or("");
                let Some((dest_owner, mint)) = token_accounts.get(dest_account).copied() else {
                    continue;
                };
                let source_owner = info["authority"]
                    .as_str()
                    .or_else(|| token_accounts.get(source_account).map(|(o, _)| *o));
                if let (Some(source), Some(amount)) = (source_owner, amount) {
                    transfers.push(ObservedTransfer {
                        signature: signature.to_string(),
                        source: source.to_string(),
                        destination: dest_owner.to_string(),
                        asset: Asset::Fungible {
                            mint: mint.to_string(),
                        },
                        amount,
                    });
                }
            }
            _ => {}
        }
    }
    transfers
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    fn name(&self) -> &'static str {
        "json-rpc-ledger"
    }

    async fn get_balance(&self, address: &str, asset: &Asset) -> Result<u64, LedgerError> {
        match asset {
            Asset::Native => self.native_balance(address).await,
            Asset::Fungible { mint } => self.token_balance(address, mint).await,
        }
    }

    async fn get_recent_transfers(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<ObservedTransfer>, LedgerError> {
        let signatures: Vec<SignatureInfo> = self
            .rpc_call(
                "getSignaturesForAddress",
                json!([address, { "limit": limit, "commitment": self.commitment }]),
            )
            .await?
            .unwrap_or_default();

        debug!(address = %address, count = signatures.len(), "Fetched recent signatures");

        // Any unreadable transaction fails the whole lookup: a partial history
        // must not read as "transfer absent".
        let mut transfers = Vec::new();
        for info in signatures.iter().filter(|s| s.err.is_none()) {
            let mut found = self
                .transaction_transfers(&info.signature)
                .await
                .inspect_err(|e| {
                    warn!(signature = %info.signature, error = %e, "Unreadable transaction in history");
                })?;
            transfers.append(&mut found);
        }
        Ok(transfers)
    }
}
