use base64::Engine;
use serde_json::{json, Value};

use super::tx::public_key_string;
use crate::error::{Error, Result};
use crate::pipeline::BroadcastReceipt;
use crate::rpc::RpcClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessKey {
	/// Last used nonce; the next transaction uses `nonce + 1`.
	pub nonce: u64,
	pub block_hash: [u8; 32],
}

#[async_trait::async_trait]
pub trait NearState: Send + Sync {
	/// `None` when the key is not registered on the account.
	async fn access_key(&self, account_id: &str, public_key: &[u8; 32]) -> Result<Option<AccessKey>>;

	async fn broadcast(&self, signed_tx: &[u8]) -> Result<BroadcastReceipt>;
}

pub struct JsonRpcNearState {
	rpc: RpcClient,
}

impl JsonRpcNearState {
	pub fn new(url: &str) -> Self {
		Self {
			rpc: RpcClient::new(url),
		}
	}
}

#[async_trait::async_trait]
impl NearState for JsonRpcNearState {
	async fn access_key(&self, account_id: &str, public_key: &[u8; 32]) -> Result<Option<AccessKey>> {
		let params = json!({
			"request_type": "view_access_key",
			"finality": "final",
			"account_id": account_id,
			"public_key": public_key_string(public_key),
		});
		match self.rpc.call("query", params).await {
			Ok(result) => parse_access_key(&result),
			Err(Error::ChainRpc(msg)) if is_unknown_key(&msg) => Ok(None),
			Err(e) => Err(e),
		}
	}

	async fn broadcast(&self, signed_tx: &[u8]) -> Result<BroadcastReceipt> {
		let encoded = base64::engine::general_purpose::STANDARD.encode(signed_tx);
		let outcome = self
			.rpc
			.call("broadcast_tx_commit", json!([encoded]))
			.await?;
		parse_outcome(&outcome)
	}
}

fn is_unknown_key(msg: &str) -> bool {
	msg.contains("UNKNOWN_ACCESS_KEY") || msg.contains("does not exist while viewing")
}

/// Older nodes report a missing key as an `error` string inside `result`.
pub fn parse_access_key(result: &Value) -> Result<Option<AccessKey>> {
	if let Some(err) = result.get("error").and_then(Value::as_str) {
		if is_unknown_key(err) {
			return Ok(None);
		}
		return Err(Error::ChainRpc(format!("view_access_key: {err}")));
	}

	let nonce = result
		.get("nonce")
		.and_then(Value::as_u64)
		.ok_or_else(|| Error::ChainRpc(format!("access key without nonce: {result}")))?;
	let hash = result
		.get("block_hash")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::ChainRpc("access key without block_hash".into()))?;
	let block_hash = bs58::decode(hash)
		.into_vec()
		.ok()
		.and_then(|v| <[u8; 32]>::try_from(v).ok())
		.ok_or_else(|| Error::ChainRpc(format!("invalid block hash {hash}")))?;

	Ok(Some(AccessKey { nonce, block_hash }))
}

/// Map a final execution outcome onto a receipt. Any `Failure` status is
/// reported with code 1 and the failure as the log.
pub fn parse_outcome(outcome: &Value) -> Result<BroadcastReceipt> {
	let tx_id = outcome
		.pointer("/transaction/hash")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::ChainRpc(format!("outcome without transaction hash: {outcome}")))?
		.to_owned();
	let gas_used = outcome
		.pointer("/transaction_outcome/outcome/gas_burnt")
		.and_then(Value::as_u64);

	let failure = outcome.pointer("/status/Failure");
	Ok(BroadcastReceipt {
		code: i64::from(failure.is_some()),
		tx_id,
		gas_used,
		gas_wanted: None,
		log: failure.map(Value::to_string),
	})
}
