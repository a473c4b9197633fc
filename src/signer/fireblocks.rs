use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{
	KeyAlgorithm, PublicKeyMaterial, SignatureMaterial, SignerBackend, SigningRequest,
	SigningStatus, Vault,
};
use crate::config::FireblocksConfig;
use crate::crypto;
use crate::error::{Error, Result};

/// Lifetime of each request token, in seconds.
const TOKEN_TTL: i64 = 55;

/// Remote custody backend speaking the Fireblocks REST API. Every call
/// is authenticated with a short-lived RS256 token bound to the request
/// path and body.
pub struct FireblocksBackend {
	http: reqwest::Client,
	base_url: String,
	api_key: String,
	key: EncodingKey,
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
	uri: &'a str,
	nonce: String,
	iat: i64,
	exp: i64,
	sub: &'a str,
	#[serde(rename = "bodyHash")]
	body_hash: String,
}

// -- Wire types --

#[derive(Debug, Deserialize)]
struct PagedVaults {
	#[serde(default)]
	accounts: Vec<WireVault>,
}

#[derive(Debug, Deserialize)]
struct WireVault {
	id: String,
	name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePublicKey {
	algorithm: String,
	#[serde(default)]
	derivation_path: Vec<u32>,
	public_key: String,
}

#[derive(Debug, Deserialize)]
struct CreatedTransaction {
	id: String,
	status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTransaction {
	id: String,
	status: String,
	#[serde(default)]
	sub_status: String,
	#[serde(default)]
	note: String,
	#[serde(default)]
	signed_messages: Vec<WireSignedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSignedMessage {
	#[serde(default)]
	content: String,
	signature: WireSignature,
	#[serde(default)]
	public_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireSignature {
	#[serde(default)]
	full_sig: String,
	#[serde(default)]
	r: Option<String>,
	#[serde(default)]
	s: Option<String>,
	#[serde(default)]
	v: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct WireDepositAddress {
	address: String,
}

impl FireblocksBackend {
	pub fn new(base_url: &str, api_key: &str, secret_pem: &[u8]) -> Result<Self> {
		let key = EncodingKey::from_rsa_pem(secret_pem)
			.map_err(|e| Error::Configuration(format!("invalid fireblocks API secret: {e}")))?;
		let base_url = base_url.trim_end_matches('/').to_owned();
		endpoint(&base_url, &[], &[])?;
		Ok(Self {
			http: reqwest::Client::new(),
			base_url,
			api_key: api_key.trim().to_owned(),
			key,
		})
	}

	pub fn from_config(config: &FireblocksConfig) -> Result<Self> {
		let read = |path: &std::path::Path| {
			std::fs::read(path)
				.map_err(|e| Error::Configuration(format!("failed to read {}: {e}", path.display())))
		};
		let secret = read(&config.api_secret_key_path)?;
		let api_key = String::from_utf8(read(&config.api_key_path)?)
			.map_err(|_| Error::Configuration("fireblocks API key is not valid UTF-8".into()))?;
		Self::new(&config.base_url, &api_key, &secret)
	}

	fn token(&self, uri: &str, body: &str) -> Result<String> {
		let iat = chrono::Utc::now().timestamp();
		let claims = Claims {
			uri,
			nonce: hex::encode(rand::random::<[u8; 16]>()),
			iat,
			exp: iat + TOKEN_TTL,
			sub: &self.api_key,
			body_hash: hex::encode(crypto::sha256(body.as_bytes())),
		};
		encode(&Header::new(Algorithm::RS256), &claims, &self.key)
			.map_err(|e| Error::Configuration(format!("failed to sign API token: {e}")))
	}

	fn url(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url> {
		endpoint(&self.base_url, segments, query)
	}

	async fn get<T: for<'de> Deserialize<'de>>(&self, url: Url) -> Result<T> {
		let uri = request_uri(&url);
		// GET requests hash the JSON encoding of an empty body.
		let token = self.token(&uri, "\"\"")?;
		let resp = self
			.http
			.get(url)
			.header("X-API-Key", &self.api_key)
			.bearer_auth(token)
			.send()
			.await?;
		Self::decode(&uri, resp).await
	}

	async fn post<T: for<'de> Deserialize<'de>>(&self, url: Url, body: &Value) -> Result<T> {
		let uri = request_uri(&url);
		let body = body.to_string();
		let token = self.token(&uri, &body)?;
		let resp = self
			.http
			.post(url)
			.header("X-API-Key", &self.api_key)
			.header(reqwest::header::CONTENT_TYPE, "application/json")
			.bearer_auth(token)
			.body(body)
			.send()
			.await?;
		Self::decode(&uri, resp).await
	}

	async fn decode<T: for<'de> Deserialize<'de>>(path: &str, resp: reqwest::Response) -> Result<T> {
		let status = resp.status();
		if !status.is_success() {
			let body = resp.text().await.unwrap_or_default();
			return Err(Error::BackendUnavailable(format!("{path} returned {status}: {body}")));
		}
		resp.json::<T>()
			.await
			.map_err(|e| Error::BackendProtocolViolation(format!("{path}: unexpected response: {e}")))
	}

	/// Look up a public key by derivation path, independent of any vault.
	pub async fn public_key_info(
		&self,
		derivation_path: &[u32],
		algorithm: KeyAlgorithm,
	) -> Result<PublicKeyMaterial> {
		let url = public_key_info_url(&self.base_url, derivation_path, algorithm)?;
		let wire: WirePublicKey = self.get(url).await?;
		to_public_key(wire, "")
	}
}

/// API endpoint under `base_url`. Path segments are percent-encoded one
/// by one and query pairs are form-encoded.
fn endpoint(base_url: &str, segments: &[&str], query: &[(&str, &str)]) -> Result<Url> {
	let invalid = || Error::Configuration(format!("invalid fireblocks base URL {base_url:?}"));
	let mut url = Url::parse(base_url).map_err(|_| invalid())?;
	url.path_segments_mut()
		.map_err(|_| invalid())?
		.pop_if_empty()
		.extend(segments);
	if !query.is_empty() {
		url.query_pairs_mut().extend_pairs(query);
	}
	Ok(url)
}

/// Path and query as sent on the wire; the token's `uri` claim must match
/// it byte for byte.
fn request_uri(url: &Url) -> String {
	match url.query() {
		Some(query) => format!("{}?{query}", url.path()),
		None => url.path().to_owned(),
	}
}

fn algorithm_name(algorithm: KeyAlgorithm) -> &'static str {
	match algorithm {
		KeyAlgorithm::Secp256k1 => "MPC_ECDSA_SECP256K1",
		KeyAlgorithm::Ed25519 => "MPC_EDDSA_ED25519",
	}
}

fn public_key_info_url(base_url: &str, derivation_path: &[u32], algorithm: KeyAlgorithm) -> Result<Url> {
	let path = derivation_path
		.iter()
		.map(u32::to_string)
		.collect::<Vec<_>>()
		.join(",");
	let path = format!("[{path}]");
	endpoint(
		base_url,
		&["v1", "vault", "public_key_info"],
		&[
			("derivationPath", path.as_str()),
			("algorithm", algorithm_name(algorithm)),
			("compressed", "true"),
		],
	)
}

fn to_public_key(wire: WirePublicKey, asset_id: &str) -> Result<PublicKeyMaterial> {
	let algorithm = match wire.algorithm.as_str() {
		"MPC_ECDSA_SECP256K1" => KeyAlgorithm::Secp256k1,
		"MPC_EDDSA_ED25519" => KeyAlgorithm::Ed25519,
		other => {
			return Err(Error::BackendProtocolViolation(format!(
				"unsupported key algorithm {other}"
			)))
		}
	};
	let public_key = decode_hex(&wire.public_key, "publicKey")?;
	let at = |i: usize| wire.derivation_path.get(i).copied().unwrap_or(0);
	Ok(PublicKeyMaterial {
		public_key,
		algorithm,
		asset_id: asset_id.to_owned(),
		account: at(2),
		change: at(3),
		address_index: at(4),
	})
}

fn decode_hex(s: &str, field: &str) -> Result<Vec<u8>> {
	hex::decode(s.trim_start_matches("0x"))
		.map_err(|e| Error::BackendProtocolViolation(format!("{field} is not hex: {e}")))
}

fn to_request(wire: WireTransaction) -> Result<SigningRequest> {
	let digest_hex = wire
		.signed_messages
		.first()
		.map(|m| m.content.clone())
		.unwrap_or_default();
	let signatures = wire
		.signed_messages
		.into_iter()
		.map(|m| {
			Ok(SignatureMaterial {
				r: decode_hex(m.signature.r.as_deref().unwrap_or_default(), "signature.r")?,
				s: decode_hex(m.signature.s.as_deref().unwrap_or_default(), "signature.s")?,
				v: m.signature.v,
				full_sig: decode_hex(&m.signature.full_sig, "signature.fullSig")?,
				public_key: decode_hex(&m.public_key, "publicKey")?,
			})
		})
		.collect::<Result<Vec<_>>>()?;

	Ok(SigningRequest {
		id: wire.id,
		digest_hex,
		note: wire.note,
		status: SigningStatus::from_wire(&wire.status),
		sub_status: wire.sub_status,
		signatures,
	})
}

fn raw_signing_body(
	vault: &Vault,
	asset_id: &str,
	source_address: &str,
	digest_hex: &str,
	note: &str,
) -> Value {
	json!({
		"assetId": asset_id,
		"source": {
			"type": "VAULT_ACCOUNT",
			"id": vault.id,
			"address": source_address,
		},
		"note": note,
		"operation": "RAW",
		"extraParameters": {
			"rawMessageData": {
				"messages": [{ "content": digest_hex }]
			}
		}
	})
}

#[async_trait::async_trait]
impl SignerBackend for FireblocksBackend {
	async fn list_vaults_by_name(&self, name_prefix: &str) -> Result<Vec<Vault>> {
		let url = self.url(&["v1", "vault", "accounts_paged"], &[("namePrefix", name_prefix)])?;
		let page: PagedVaults = self.get(url).await?;
		Ok(page
			.accounts
			.into_iter()
			.map(|a| Vault { id: a.id, name: a.name })
			.collect())
	}

	async fn public_key(&self, vault: &Vault, asset_id: &str) -> Result<PublicKeyMaterial> {
		let url = self.url(
			&["v1", "vault", "accounts", vault.id.as_str(), asset_id, "0", "0", "public_key_info"],
			&[("compressed", "true")],
		)?;
		let wire: WirePublicKey = self.get(url).await?;
		to_public_key(wire, asset_id)
	}

	async fn submit(
		&self,
		vault: &Vault,
		asset_id: &str,
		source_address: &str,
		digest_hex: &str,
		note: &str,
	) -> Result<SigningRequest> {
		let body = raw_signing_body(vault, asset_id, source_address, digest_hex, note);
		let url = self.url(&["v1", "transactions"], &[])?;
		let created: CreatedTransaction = self.post(url, &body).await?;
		Ok(SigningRequest {
			id: created.id,
			digest_hex: digest_hex.to_owned(),
			note: note.to_owned(),
			status: SigningStatus::from_wire(&created.status),
			sub_status: String::new(),
			signatures: Vec::new(),
		})
	}

	async fn poll_status(&self, request_id: &str) -> Result<SigningRequest> {
		let url = self.url(&["v1", "transactions", request_id], &[])?;
		let wire: WireTransaction = self.get(url).await?;
		to_request(wire)
	}

	async fn deposit_address(&self, vault: &Vault, asset_id: &str) -> Result<Option<String>> {
		let url = self.url(&["v1", "vault", "accounts", vault.id.as_str(), asset_id, "addresses"], &[])?;
		let addresses: Vec<WireDepositAddress> = self.get(url).await?;
		Ok(addresses.into_iter().next().map(|a| a.address))
	}
}
