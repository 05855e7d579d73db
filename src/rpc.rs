//! The external ledger-node collaborator.
//!
//! The pipeline consumes a deliberately narrow interface: funding, delegated
//! blinding, delegated finalization, broadcast and a mining helper for
//! development chains. `ElementsRpc` implements it over blocking JSON-RPC
//! 2.0 with HTTP basic auth, the way an Elements-style node exposes its
//! wallet. Errors split into transport (`Network`) and protocol (`Rpc`);
//! the finalizer's fallback logic depends on that distinction.

use crate::finalize::FinalizationResult;
use crate::primitives::pset::Pset;
use crate::types::FundingRequest;
use crate::{PsetError, Result};
use serde_json::{json, Value};
use std::str::FromStr;
use uuid::Uuid;

/// Operations the pipeline needs from a ledger node.
pub trait LedgerNode {
    /// Build an unblinded container skeleton funding the requested outputs,
    /// with change and fee selected by the node wallet.
    fn create_funded_pset(&self, request: &FundingRequest) -> Result<Pset>;

    /// Delegated blinding: the node wallet blinds the container.
    fn process_pset(&self, pset: &Pset) -> Result<Pset>;

    /// Delegated finalization verdict for a canonical container.
    fn finalize_pset(&self, pset: &Pset) -> Result<FinalizationResult>;

    /// Mempool pre-acceptance check for final transaction bytes.
    fn test_mempool_accept(&self, tx_hex: &str) -> Result<bool>;

    /// Broadcast final transaction bytes; returns the txid.
    fn broadcast(&self, tx_hex: &str) -> Result<String>;

    /// Advance a development chain. Never used against production networks.
    fn generate_to_address(&self, blocks: u32, address: &str) -> Result<()>;
}

/// Blocking JSON-RPC client for an Elements-style node.
pub struct ElementsRpc {
    url: String,
    user: String,
    password: String,
    client: reqwest::blocking::Client,
}

impl ElementsRpc {
    pub fn new(url: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        ElementsRpc {
            url: url.into(),
            user: user.into(),
            password: password.into(),
            client: reqwest::blocking::Client::new(),
        }
    }

    /// Scope this client to a named wallet.
    pub fn wallet(&self, wallet_name: &str) -> ElementsRpc {
        ElementsRpc {
            url: format!("{}/wallet/{}", self.url.trim_end_matches('/'), wallet_name),
            user: self.user.clone(),
            password: self.password.clone(),
            client: self.client.clone(),
        }
    }

    pub fn call(&self, method: &str, params: Value) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        let body = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": method,
            "params": params,
        });

        log::debug!("rpc call {} to {}", method, self.url);
        let response = self
            .client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .map_err(|e| PsetError::Network(format!("{}: {}", method, e)))?;

        let status = response.status();
        let payload: Value = response
            .json()
            .map_err(|e| PsetError::Network(format!("{}: invalid response body: {}", method, e)))?;

        if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
            return Err(PsetError::Rpc {
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-1),
                message: error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            });
        }
        if !status.is_success() {
            return Err(PsetError::Network(format!(
                "{}: http status {}",
                method, status
            )));
        }

        payload
            .get("result")
            .cloned()
            .ok_or_else(|| PsetError::Network(format!("{}: response missing result", method)))
    }

    fn pset_from_result(value: &Value) -> Result<Pset> {
        let encoded = value
            .get("pset")
            .and_then(Value::as_str)
            .or_else(|| value.as_str())
            .ok_or_else(|| PsetError::Network("response carries no container".to_string()))?;
        Pset::from_str(encoded)
    }
}

impl LedgerNode for ElementsRpc {
    fn create_funded_pset(&self, request: &FundingRequest) -> Result<Pset> {
        let outputs: Vec<Value> = request
            .recipients
            .iter()
            .map(|recipient| {
                json!({
                    "script": hex::encode(recipient.script_pubkey.as_bytes()),
                    "blinding_pubkey": recipient
                        .blinding_pubkey
                        .map(|key| hex::encode(key.serialize())),
                    "asset": recipient.asset.to_string(),
                    "amount": recipient.amount,
                })
            })
            .collect();

        let result = self.call(
            "createfundedpset",
            json!([outputs, { "fee_rate": request.fee_rate }]),
        )?;
        Self::pset_from_result(&result)
    }

    fn process_pset(&self, pset: &Pset) -> Result<Pset> {
        let result = self.call("processpset", json!([pset.to_string()]))?;
        Self::pset_from_result(&result)
    }

    fn finalize_pset(&self, pset: &Pset) -> Result<FinalizationResult> {
        let result = self.call("finalizepset", json!([pset.to_string()]))?;

        let complete = result
            .get("complete")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if complete {
            let tx_hex = result.get("hex").and_then(Value::as_str).ok_or_else(|| {
                PsetError::Network("complete verdict carries no transaction".to_string())
            })?;
            Ok(FinalizationResult::Complete(hex::decode(tx_hex)?))
        } else {
            Ok(FinalizationResult::Incomplete(
                "node reported the container incomplete".to_string(),
            ))
        }
    }

    fn test_mempool_accept(&self, tx_hex: &str) -> Result<bool> {
        let result = self.call("testmempoolaccept", json!([[tx_hex]]))?;
        Ok(result
            .get(0)
            .and_then(|entry| entry.get("allowed"))
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    fn broadcast(&self, tx_hex: &str) -> Result<String> {
        let result = self.call("sendrawtransaction", json!([tx_hex]))?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| PsetError::Network("broadcast returned no txid".to_string()))
    }

    fn generate_to_address(&self, blocks: u32, address: &str) -> Result<()> {
        self.call("generatetoaddress", json!([blocks, address]))?;
        Ok(())
    }
}
