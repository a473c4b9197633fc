use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::{Error, Result};

/// Thin HTTP client shared by the per-chain state providers.
///
/// Substrate, NEAR and Avalanche expose JSON-RPC 2.0 over HTTP, Cosmos
/// nodes are queried through their REST gateway. Both styles go through
/// this wrapper so transport and node errors surface the same way.
#[derive(Clone)]
pub struct RpcClient {
	url: String,
	http: reqwest::Client,
}

impl RpcClient {
	pub fn new(url: &str) -> Self {
		Self {
			url: url.trim_end_matches('/').to_owned(),
			http: reqwest::Client::new(),
		}
	}

	pub fn url(&self) -> &str {
		&self.url
	}

	/// Same client, pointed at a sub-path of the base URL.
	pub fn at(&self, path: &str) -> Self {
		Self {
			url: format!("{}{path}", self.url),
			http: self.http.clone(),
		}
	}

	// -- JSON-RPC --

	/// Issue a single JSON-RPC call and return its `result` member.
	pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
		let body = json!({
			"id": 1,
			"jsonrpc": "2.0",
			"method": method,
			"params": params,
		});

		tracing::debug!(target: "rpc", url = %self.url, method, "json-rpc call");
		let resp: Value = self
			.http
			.post(&self.url)
			.json(&body)
			.send()
			.await
			.map_err(|e| Error::ChainRpc(format!("{method}: {e}")))?
			.json()
			.await
			.map_err(|e| Error::ChainRpc(format!("{method}: invalid response: {e}")))?;

		rpc_result(method, resp)
	}

	pub async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
		let value = self.call(method, params).await?;
		serde_json::from_value(value)
			.map_err(|e| Error::ChainRpc(format!("{method}: unexpected result shape: {e}")))
	}

	// -- REST --

	pub async fn get_json(&self, path: &str) -> Result<Value> {
		let url = format!("{}{path}", self.url);
		tracing::debug!(target: "rpc", %url, "GET");
		let resp = self
			.http
			.get(&url)
			.send()
			.await
			.map_err(|e| Error::ChainRpc(format!("GET {path}: {e}")))?;
		Self::rest_body(path, resp).await
	}

	/// Like [`Self::get_json`] but a 404 is `None` rather than an error.
	pub async fn get_json_opt(&self, path: &str) -> Result<Option<Value>> {
		let url = format!("{}{path}", self.url);
		tracing::debug!(target: "rpc", %url, "GET");
		let resp = self
			.http
			.get(&url)
			.send()
			.await
			.map_err(|e| Error::ChainRpc(format!("GET {path}: {e}")))?;
		if resp.status() == reqwest::StatusCode::NOT_FOUND {
			return Ok(None);
		}
		Self::rest_body(path, resp).await.map(Some)
	}

	pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value> {
		let url = format!("{}{path}", self.url);
		tracing::debug!(target: "rpc", %url, "POST");
		let resp = self
			.http
			.post(&url)
			.json(body)
			.send()
			.await
			.map_err(|e| Error::ChainRpc(format!("POST {path}: {e}")))?;
		Self::rest_body(path, resp).await
	}

	async fn rest_body(path: &str, resp: reqwest::Response) -> Result<Value> {
		let status = resp.status();
		let body: Value = resp
			.json()
			.await
			.map_err(|e| Error::ChainRpc(format!("{path}: invalid response: {e}")))?;
		if !status.is_success() {
			let msg = body.get("message").cloned().unwrap_or(body);
			return Err(Error::ChainRpc(format!("{path} returned {status}: {msg}")));
		}
		Ok(body)
	}
}

/// Extract `result` from a JSON-RPC response, turning `error` into
/// a [`Error::ChainRpc`].
pub fn rpc_result(method: &str, resp: Value) -> Result<Value> {
	if let Some(err) = resp.get("error").filter(|e| !e.is_null()) {
		return Err(Error::ChainRpc(format!("{method} RPC error: {err}")));
	}
	resp.get("result")
		.cloned()
		.ok_or_else(|| Error::ChainRpc(format!("{method}: response has no result")))
}

/// Read a `0x`-prefixed hex quantity or a decimal string/number as u128.
pub fn parse_quantity(value: &Value) -> Result<u128> {
	let bad = || Error::ChainRpc(format!("not a numeric quantity: {value}"));
	match value {
		Value::Number(n) => n.as_u64().map(u128::from).ok_or_else(bad),
		Value::String(s) => match s.strip_prefix("0x") {
			Some(hex) => u128::from_str_radix(hex, 16).map_err(|_| bad()),
			None => s.parse().map_err(|_| bad()),
		},
		_ => Err(bad()),
	}
}
