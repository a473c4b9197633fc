use std::time::Duration;

use base64::Engine;
use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::pipeline::BroadcastReceipt;
use crate::rpc::RpcClient;

const INCLUSION_TIMEOUT: Duration = Duration::from_secs(60);
const INCLUSION_POLL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountInfo {
	pub account_number: u64,
	pub sequence: u64,
}

/// Chain state a Cosmos SDK pipeline reads and writes.
#[async_trait::async_trait]
pub trait CosmosState: Send + Sync {
	async fn chain_id(&self) -> Result<String>;

	/// `None` when the account has never been seen on chain.
	async fn account(&self, address: &str) -> Result<Option<AccountInfo>>;

	async fn broadcast(&self, tx_bytes: &[u8]) -> Result<BroadcastReceipt>;
}

/// Cosmos SDK REST gateway.
pub struct RestCosmosState {
	rpc: RpcClient,
}

impl RestCosmosState {
	pub fn new(url: &str) -> Self {
		Self {
			rpc: RpcClient::new(url),
		}
	}

	async fn wait_for_inclusion(&self, hash: &str) -> Result<BroadcastReceipt> {
		let started = tokio::time::Instant::now();
		loop {
			if let Some(found) = self
				.rpc
				.get_json_opt(&format!("/cosmos/tx/v1beta1/txs/{hash}"))
				.await?
			{
				return parse_tx_response(&found);
			}
			if started.elapsed() >= INCLUSION_TIMEOUT {
				return Err(Error::ChainRpc(format!(
					"transaction {hash} was submitted but was not found on chain within {}s",
					INCLUSION_TIMEOUT.as_secs()
				)));
			}
			tracing::debug!(target: "cosmos", %hash, "waiting for inclusion");
			tokio::time::sleep(INCLUSION_POLL).await;
		}
	}
}

#[async_trait::async_trait]
impl CosmosState for RestCosmosState {
	async fn chain_id(&self) -> Result<String> {
		let info = self
			.rpc
			.get_json("/cosmos/base/tendermint/v1beta1/node_info")
			.await?;
		info.pointer("/default_node_info/network")
			.and_then(Value::as_str)
			.map(str::to_owned)
			.ok_or_else(|| Error::ChainRpc("node_info has no network id".into()))
	}

	async fn account(&self, address: &str) -> Result<Option<AccountInfo>> {
		let Some(resp) = self
			.rpc
			.get_json_opt(&format!("/cosmos/auth/v1beta1/accounts/{address}"))
			.await?
		else {
			return Ok(None);
		};
		parse_account(&resp).map(Some)
	}

	async fn broadcast(&self, tx_bytes: &[u8]) -> Result<BroadcastReceipt> {
		let body = json!({
			"tx_bytes": base64::engine::general_purpose::STANDARD.encode(tx_bytes),
			"mode": "BROADCAST_MODE_SYNC",
		});
		let resp = self.rpc.post_json("/cosmos/tx/v1beta1/txs", &body).await?;
		let checked = parse_tx_response(&resp)?;
		if checked.code != 0 {
			return Ok(checked);
		}
		self.wait_for_inclusion(&checked.tx_id).await
	}
}

/// Account number and sequence, unwrapping vesting account wrappers.
pub fn parse_account(resp: &Value) -> Result<AccountInfo> {
	let account = resp
		.get("account")
		.ok_or_else(|| Error::ChainRpc("account response has no account".into()))?;
	let base = account
		.pointer("/base_vesting_account/base_account")
		.or_else(|| account.get("base_account"))
		.unwrap_or(account);

	let number = |key: &str| -> Result<u64> {
		match base.get(key) {
			None | Some(Value::Null) => Ok(0),
			Some(Value::String(s)) => s
				.parse()
				.map_err(|_| Error::ChainRpc(format!("account {key} is not a number: {s}"))),
			Some(Value::Number(n)) => n
				.as_u64()
				.ok_or_else(|| Error::ChainRpc(format!("account {key} out of range"))),
			Some(other) => Err(Error::ChainRpc(format!("unexpected account {key}: {other}"))),
		}
	};

	Ok(AccountInfo {
		account_number: number("account_number")?,
		sequence: number("sequence")?,
	})
}

fn parse_tx_response(resp: &Value) -> Result<BroadcastReceipt> {
	let tx = resp
		.get("tx_response")
		.ok_or_else(|| Error::ChainRpc(format!("missing tx_response in {resp}")))?;
	let num = |key: &str| {
		tx.get(key).and_then(|v| match v {
			Value::String(s) => s.parse().ok(),
			Value::Number(n) => n.as_u64(),
			_ => None,
		})
	};
	Ok(BroadcastReceipt {
		code: tx.get("code").and_then(Value::as_i64).unwrap_or(0),
		tx_id: tx
			.get("txhash")
			.and_then(Value::as_str)
			.unwrap_or_default()
			.to_owned(),
		gas_used: num("gas_used"),
		gas_wanted: num("gas_wanted"),
		log: tx
			.get("raw_log")
			.and_then(Value::as_str)
			.filter(|s| !s.is_empty())
			.map(str::to_owned),
	})
}
