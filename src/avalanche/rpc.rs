use serde_json::{json, Value};

use super::tx::{self, Id, Utxo};
use super::Chain;
use crate::crypto;
use crate::error::{Error, Result};
use crate::rpc::{parse_quantity, RpcClient};

const UTXO_PAGE: u64 = 1024;

/// Identifiers every transaction needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainContext {
	pub network_id: u32,
	pub p_chain: Id,
	pub c_chain: Id,
	pub x_chain: Id,
	pub avax_asset: Id,
}

impl ChainContext {
	pub fn chain_id(&self, chain: Chain) -> Id {
		match chain {
			Chain::P => self.p_chain,
			Chain::C => self.c_chain,
			Chain::X => self.x_chain,
		}
	}
}

#[async_trait::async_trait]
pub trait AvalancheState: Send + Sync {
	async fn context(&self) -> Result<ChainContext>;

	/// Current P-chain time, unix seconds.
	async fn timestamp(&self) -> Result<u64>;

	/// UTXOs owned by `address` on `chain`. With `source` set, the atomic
	/// UTXOs exported from that chain and not yet imported.
	async fn utxos(&self, chain: Chain, address: &str, source: Option<Chain>) -> Result<Vec<Utxo>>;

	/// C-chain base fee in wei.
	async fn base_fee(&self) -> Result<u128>;

	/// C-chain account nonce, counting pending transactions.
	async fn nonce(&self, address: &str) -> Result<u64>;

	/// Issue a signed transaction, returning its id.
	async fn issue(&self, chain: Chain, tx: &[u8]) -> Result<String>;
}

/// Node APIs under `/ext/...` of a single AvalancheGo endpoint.
pub struct JsonRpcAvalancheState {
	info: RpcClient,
	platform: RpcClient,
	x: RpcClient,
	c_avax: RpcClient,
	c_eth: RpcClient,
}

impl JsonRpcAvalancheState {
	pub fn new(url: &str) -> Self {
		let base = RpcClient::new(url);
		Self {
			info: base.at("/ext/info"),
			platform: base.at("/ext/bc/P"),
			x: base.at("/ext/bc/X"),
			c_avax: base.at("/ext/bc/C/avax"),
			c_eth: base.at("/ext/bc/C/rpc"),
		}
	}

	fn atomic_api(&self, chain: Chain) -> (&RpcClient, &'static str) {
		match chain {
			Chain::P => (&self.platform, "platform"),
			Chain::C => (&self.c_avax, "avax"),
			Chain::X => (&self.x, "avm"),
		}
	}

	async fn blockchain_id(&self, alias: &str) -> Result<Id> {
		let result = self
			.info
			.call("info.getBlockchainID", json!({ "alias": alias }))
			.await?;
		parse_id(result.get("blockchainID"))
	}
}

#[async_trait::async_trait]
impl AvalancheState for JsonRpcAvalancheState {
	async fn context(&self) -> Result<ChainContext> {
		let network = self.info.call("info.getNetworkID", json!({})).await?;
		let network_id = network
			.get("networkID")
			.map(parse_quantity)
			.transpose()?
			.and_then(|id| u32::try_from(id).ok())
			.ok_or_else(|| Error::ChainRpc(format!("unexpected network id: {network}")))?;

		let asset = self
			.x
			.call("avm.getAssetDescription", json!({ "assetID": "AVAX" }))
			.await?;

		Ok(ChainContext {
			network_id,
			p_chain: [0; 32],
			c_chain: self.blockchain_id("C").await?,
			x_chain: self.blockchain_id("X").await?,
			avax_asset: parse_id(asset.get("assetID"))?,
		})
	}

	async fn timestamp(&self) -> Result<u64> {
		let result = self.platform.call("platform.getTimestamp", json!({})).await?;
		parse_timestamp(&result)
	}

	async fn utxos(&self, chain: Chain, address: &str, source: Option<Chain>) -> Result<Vec<Utxo>> {
		let (api, namespace) = self.atomic_api(chain);
		let method = format!("{namespace}.getUTXOs");

		let mut out = Vec::new();
		let mut start: Option<Value> = None;
		loop {
			let mut params = json!({
				"addresses": [address],
				"limit": UTXO_PAGE,
				"encoding": "hex",
			});
			if let Some(source) = source {
				params["sourceChain"] = json!(source.to_string());
			}
			if let Some(index) = &start {
				params["startIndex"] = index.clone();
			}

			let page = api.call(&method, params).await?;
			let (utxos, fetched) = parse_utxos(&page)?;
			out.extend(utxos);
			if fetched < UTXO_PAGE {
				break;
			}
			start = page.get("endIndex").cloned();
		}
		tracing::debug!(target: "avalanche", %chain, count = out.len(), "fetched utxos");
		Ok(out)
	}

	async fn base_fee(&self) -> Result<u128> {
		let fee = self.c_eth.call("eth_baseFee", json!([])).await?;
		parse_quantity(&fee)
	}

	async fn nonce(&self, address: &str) -> Result<u64> {
		let count = self
			.c_eth
			.call("eth_getTransactionCount", json!([address, "pending"]))
			.await?;
		u64::try_from(parse_quantity(&count)?)
			.map_err(|_| Error::ChainRpc(format!("nonce out of range: {count}")))
	}

	async fn issue(&self, chain: Chain, signed_tx: &[u8]) -> Result<String> {
		let (api, namespace) = self.atomic_api(chain);
		let result = api
			.call(
				&format!("{namespace}.issueTx"),
				json!({ "tx": tx::encode_hex(signed_tx), "encoding": "hex" }),
			)
			.await?;
		result
			.get("txID")
			.and_then(Value::as_str)
			.map(str::to_owned)
			.ok_or_else(|| Error::ChainRpc(format!("issueTx without txID: {result}")))
	}
}

fn parse_id(value: Option<&Value>) -> Result<Id> {
	let s = value
		.and_then(Value::as_str)
		.ok_or_else(|| Error::ChainRpc(format!("missing id: {value:?}")))?;
	crypto::cb58_decode(s)?
		.try_into()
		.map_err(|_| Error::ChainRpc(format!("{s} is not a 32-byte id")))
}

pub fn parse_timestamp(result: &Value) -> Result<u64> {
	let raw = result
		.get("timestamp")
		.and_then(Value::as_str)
		.ok_or_else(|| Error::ChainRpc(format!("unexpected timestamp result: {result}")))?;
	let time = chrono::DateTime::parse_from_rfc3339(raw)
		.map_err(|e| Error::ChainRpc(format!("invalid timestamp {raw}: {e}")))?;
	u64::try_from(time.timestamp()).map_err(|_| Error::ChainRpc(format!("timestamp before epoch: {raw}")))
}

/// Decode one `getUTXOs` page, returning the transfer outputs and the
/// number of entries the node reported.
pub fn parse_utxos(page: &Value) -> Result<(Vec<Utxo>, u64)> {
	let fetched = page
		.get("numFetched")
		.map(parse_quantity)
		.transpose()?
		.map_or(0, |n| n as u64);
	let encoded = page
		.get("utxos")
		.and_then(Value::as_array)
		.ok_or_else(|| Error::ChainRpc(format!("getUTXOs without utxos: {page}")))?;

	let mut utxos = Vec::new();
	for item in encoded {
		let hex = item
			.as_str()
			.ok_or_else(|| Error::ChainRpc(format!("utxo is not a string: {item}")))?;
		if let Some(utxo) = Utxo::parse(&tx::decode_hex(hex)?)? {
			utxos.push(utxo);
		}
	}
	Ok((utxos, fetched))
}
