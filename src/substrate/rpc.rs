use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::rpc::RpcClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeVersion {
	pub spec_version: u32,
	pub transaction_version: u32,
}

#[async_trait::async_trait]
pub trait SubstrateState: Send + Sync {
	/// Next nonce for `address`, counting pending pool transactions.
	async fn next_index(&self, address: &str) -> Result<u32>;

	async fn genesis_hash(&self) -> Result<[u8; 32]>;

	async fn runtime_version(&self) -> Result<RuntimeVersion>;

	/// Submit a SCALE-encoded extrinsic, returning its hash.
	async fn submit(&self, extrinsic: &[u8]) -> Result<String>;
}

pub struct JsonRpcSubstrateState {
	rpc: RpcClient,
}

impl JsonRpcSubstrateState {
	pub fn new(url: &str) -> Self {
		Self {
			rpc: RpcClient::new(url),
		}
	}
}

#[async_trait::async_trait]
impl SubstrateState for JsonRpcSubstrateState {
	async fn next_index(&self, address: &str) -> Result<u32> {
		self.rpc.call_as("system_accountNextIndex", json!([address])).await
	}

	async fn genesis_hash(&self) -> Result<[u8; 32]> {
		let hash = self.rpc.call("chain_getBlockHash", json!([0])).await?;
		parse_hash(&hash)
	}

	async fn runtime_version(&self) -> Result<RuntimeVersion> {
		self.rpc.call_as("state_getRuntimeVersion", json!([])).await
	}

	async fn submit(&self, extrinsic: &[u8]) -> Result<String> {
		let hash = self
			.rpc
			.call(
				"author_submitExtrinsic",
				json!([format!("0x{}", hex::encode(extrinsic))]),
			)
			.await?;
		hash.as_str()
			.map(str::to_owned)
			.ok_or_else(|| Error::ChainRpc(format!("unexpected submit result: {hash}")))
	}
}

pub fn parse_hash(value: &Value) -> Result<[u8; 32]> {
	value
		.as_str()
		.and_then(|s| s.strip_prefix("0x"))
		.and_then(|s| hex::decode(s).ok())
		.and_then(|v| <[u8; 32]>::try_from(v).ok())
		.ok_or_else(|| Error::ChainRpc(format!("not a 32-byte hash: {value}")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn runtime_version_shape() {
		let v: RuntimeVersion = serde_json::from_value(json!({
			"specName": "westend",
			"specVersion": 1014000,
			"transactionVersion": 26,
			"apis": []
		}))
		.unwrap();
		assert_eq!(v.spec_version, 1_014_000);
		assert_eq!(v.transaction_version, 26);
	}

	#[test]
	fn genesis_hash_parsing() {
		let h = parse_hash(&json!(
			"0xe143f23803ac50e8f6f8e62695d1ce9e4e1d68aa36c1cd2cfd15340213f3423e"
		))
		.unwrap();
		assert_eq!(h[0], 0xe1);
		assert!(parse_hash(&json!("0x1234")).is_err());
		assert!(parse_hash(&json!(null)).is_err());
	}

	#[tokio::test]
	#[ignore = "requires the public Westend RPC"]
	async fn westend_genesis() {
		let state = JsonRpcSubstrateState::new("https://westend-rpc.polkadot.io");
		let h = state.genesis_hash().await.unwrap();
		assert_eq!(
			hex::encode(h),
			"e143f23803ac50e8f6f8e62695d1ce9e4e1d68aa36c1cd2cfd15340213f3423e"
		);
	}
}
