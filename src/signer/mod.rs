pub mod fireblocks;
pub mod local;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{Config, NetworkType};
use crate::error::{Error, Result};

// -- Data model --

/// A custody account holding key material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
	pub id: String,
	pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAlgorithm {
	Secp256k1,
	Ed25519,
}

/// Public key of the vault's signing key plus where it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyMaterial {
	#[serde(with = "hex::serde")]
	pub public_key: Vec<u8>,
	pub algorithm: KeyAlgorithm,
	pub asset_id: String,
	pub account: u32,
	pub change: u32,
	pub address_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SigningStatus {
	Submitted,
	PendingSignature,
	Completed,
	Failed,
	Blocked,
	/// Any other backend-specific intermediate state.
	Other(String),
}

impl SigningStatus {
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Completed | Self::Failed | Self::Blocked)
	}

	/// Map a custodian status string onto the known set.
	pub fn from_wire(status: &str) -> Self {
		match status {
			"SUBMITTED" => Self::Submitted,
			"PENDING_SIGNATURE" => Self::PendingSignature,
			"COMPLETED" => Self::Completed,
			"FAILED" => Self::Failed,
			"BLOCKED" => Self::Blocked,
			other => Self::Other(other.to_owned()),
		}
	}
}

impl fmt::Display for SigningStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Submitted => f.write_str("SUBMITTED"),
			Self::PendingSignature => f.write_str("PENDING_SIGNATURE"),
			Self::Completed => f.write_str("COMPLETED"),
			Self::Failed => f.write_str("FAILED"),
			Self::Blocked => f.write_str("BLOCKED"),
			Self::Other(s) => f.write_str(s),
		}
	}
}

/// Raw signature components as returned by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SignatureMaterial {
	#[serde(with = "hex::serde")]
	pub r: Vec<u8>,
	#[serde(with = "hex::serde")]
	pub s: Vec<u8>,
	/// Recovery id, present for recoverable ECDSA.
	pub v: Option<u8>,
	#[serde(with = "hex::serde")]
	pub full_sig: Vec<u8>,
	#[serde(with = "hex::serde")]
	pub public_key: Vec<u8>,
}

impl SignatureMaterial {
	/// The 64-byte `r || s` form, taken from the components when present
	/// and from the full signature otherwise.
	pub fn rs(&self) -> Result<[u8; 64]> {
		let mut out = [0u8; 64];
		if self.r.len() == 32 && self.s.len() == 32 {
			out[..32].copy_from_slice(&self.r);
			out[32..].copy_from_slice(&self.s);
			return Ok(out);
		}
		if self.full_sig.len() >= 64 {
			out.copy_from_slice(&self.full_sig[..64]);
			return Ok(out);
		}
		Err(Error::BackendProtocolViolation(format!(
			"signature is neither r||s nor a 64-byte full signature (r: {}, s: {}, full: {})",
			self.r.len(),
			self.s.len(),
			self.full_sig.len()
		)))
	}

	/// Recovery id normalised to 0..=3; backends may report Ethereum-style 27/28.
	pub fn recovery_id(&self) -> Option<u8> {
		self.v.map(|v| if v >= 27 { v - 27 } else { v })
	}
}

/// One outstanding ask-for-signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningRequest {
	pub id: String,
	pub digest_hex: String,
	pub note: String,
	pub status: SigningStatus,
	pub sub_status: String,
	pub signatures: Vec<SignatureMaterial>,
}

// -- Backend capability --

/// Operations a signing backend offers to the coordinator. Every
/// implementation must report the same request/poll shape so pipelines
/// do not care which one they run against.
#[async_trait::async_trait]
pub trait SignerBackend: Send + Sync {
	async fn list_vaults_by_name(&self, name_prefix: &str) -> Result<Vec<Vault>>;

	async fn public_key(&self, vault: &Vault, asset_id: &str) -> Result<PublicKeyMaterial>;

	async fn submit(
		&self,
		vault: &Vault,
		asset_id: &str,
		source_address: &str,
		digest_hex: &str,
		note: &str,
	) -> Result<SigningRequest>;

	/// Current state of a request. Safe to call repeatedly.
	async fn poll_status(&self, request_id: &str) -> Result<SigningRequest>;

	/// Deposit address the backend attests to, if it tracks one.
	async fn deposit_address(&self, vault: &Vault, asset_id: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendKind {
	Fireblocks,
	Local,
}

/// The closed set of backends, chosen once at startup.
pub enum Backend {
	Fireblocks(fireblocks::FireblocksBackend),
	Local(local::LocalKeyBackend),
}

impl Backend {
	pub fn from_config(kind: BackendKind, config: &Config) -> Result<Self> {
		match kind {
			BackendKind::Fireblocks => Ok(Self::Fireblocks(
				fireblocks::FireblocksBackend::from_config(&config.fireblocks)?,
			)),
			BackendKind::Local => {
				let local = config.local_signer.as_ref().ok_or_else(|| {
					Error::Configuration("local_signer section is required for the local signer".into())
				})?;
				Ok(Self::Local(local::LocalKeyBackend::from_config(
					local,
					&config.fireblocks.vault_name,
					config.network_type,
				)?))
			}
		}
	}
}

#[async_trait::async_trait]
impl SignerBackend for Backend {
	async fn list_vaults_by_name(&self, name_prefix: &str) -> Result<Vec<Vault>> {
		match self {
			Self::Fireblocks(b) => b.list_vaults_by_name(name_prefix).await,
			Self::Local(b) => b.list_vaults_by_name(name_prefix).await,
		}
	}

	async fn public_key(&self, vault: &Vault, asset_id: &str) -> Result<PublicKeyMaterial> {
		match self {
			Self::Fireblocks(b) => b.public_key(vault, asset_id).await,
			Self::Local(b) => b.public_key(vault, asset_id).await,
		}
	}

	async fn submit(
		&self,
		vault: &Vault,
		asset_id: &str,
		source_address: &str,
		digest_hex: &str,
		note: &str,
	) -> Result<SigningRequest> {
		match self {
			Self::Fireblocks(b) => b.submit(vault, asset_id, source_address, digest_hex, note).await,
			Self::Local(b) => b.submit(vault, asset_id, source_address, digest_hex, note).await,
		}
	}

	async fn poll_status(&self, request_id: &str) -> Result<SigningRequest> {
		match self {
			Self::Fireblocks(b) => b.poll_status(request_id).await,
			Self::Local(b) => b.poll_status(request_id).await,
		}
	}

	async fn deposit_address(&self, vault: &Vault, asset_id: &str) -> Result<Option<String>> {
		match self {
			Self::Fireblocks(b) => b.deposit_address(vault, asset_id).await,
			Self::Local(b) => b.deposit_address(vault, asset_id).await,
		}
	}
}

/// Algorithm a network family signs with.
pub fn algorithm_for(network: NetworkType) -> KeyAlgorithm {
	match network {
		NetworkType::Cosmos | NetworkType::Avalanche => KeyAlgorithm::Secp256k1,
		NetworkType::Near | NetworkType::Substrate => KeyAlgorithm::Ed25519,
	}
}

// -- Coordinator --

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
	pub interval: Duration,
	/// `None` waits for a terminal status forever.
	pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(1),
			timeout: None,
		}
	}
}

impl PollPolicy {
	pub fn from_config(config: &Config) -> Self {
		Self {
			interval: config.poll_interval(),
			timeout: config.poll_timeout(),
		}
	}
}

/// Owns a backend and drives the submit-then-poll signing protocol.
pub struct Signer {
	backend: Box<dyn SignerBackend>,
	policy: PollPolicy,
}

impl Signer {
	pub fn new(backend: Box<dyn SignerBackend>, policy: PollPolicy) -> Self {
		Self { backend, policy }
	}

	pub fn backend(&self) -> &dyn SignerBackend {
		self.backend.as_ref()
	}

	/// Resolve the vault whose name is exactly `name`.
	pub async fn get_vault(&self, name: &str) -> Result<Vault> {
		let mut vaults: Vec<Vault> = self
			.backend
			.list_vaults_by_name(name)
			.await?
			.into_iter()
			.filter(|v| v.name == name)
			.collect();

		if vaults.len() != 1 {
			return Err(Error::VaultNotFound {
				name: name.to_owned(),
				count: vaults.len(),
			});
		}
		let vault = vaults.remove(0);
		tracing::debug!(target: "signer", vault_id = %vault.id, "vault resolved");
		Ok(vault)
	}

	pub async fn public_key(&self, vault: &Vault, asset_id: &str) -> Result<PublicKeyMaterial> {
		self.backend.public_key(vault, asset_id).await
	}

	pub async fn deposit_address(&self, vault: &Vault, asset_id: &str) -> Result<Option<String>> {
		self.backend.deposit_address(vault, asset_id).await
	}

	/// Submit a signing request and wait until the backend reaches a
	/// terminal status. Poll transport errors are logged and retried.
	///
	/// The create response never ends the wait on its own: its status may
	/// already be terminal while sub-status details only show up in the
	/// polled request.
	pub async fn request_signature(
		&self,
		vault: &Vault,
		asset_id: &str,
		source_address: &str,
		digest_hex: &str,
		note: &str,
	) -> Result<SignatureMaterial> {
		let submitted = self
			.backend
			.submit(vault, asset_id, source_address, digest_hex, note)
			.await?;
		let id = submitted.id.clone();
		tracing::info!(target: "signer", request_id = %id, status = %submitted.status, "signing request submitted");

		let started = tokio::time::Instant::now();
		let mut latest = submitted;
		let mut polled = false;

		while !(polled && latest.status.is_terminal()) {
			println!("* signer request ID: {id} with status: {}", latest.status);

			if let Some(limit) = self.policy.timeout {
				if started.elapsed() >= limit {
					return Err(Error::SigningTimeout {
						request_id: id,
						waited_secs: limit.as_secs(),
					});
				}
			}

			tokio::time::sleep(self.policy.interval).await;

			match self.backend.poll_status(&id).await {
				Ok(req) => {
					latest = req;
					polled = true;
				}
				Err(e) => {
					tracing::warn!(target: "signer", request_id = %id, error = %e, "polling remote signer failed");
				}
			}
		}

		let details = if latest.sub_status.is_empty() {
			"none"
		} else {
			latest.sub_status.as_str()
		};
		println!(
			"* signer request ID finished with status {}; details: {details}",
			latest.status
		);

		match latest.status {
			SigningStatus::Completed => latest.signatures.into_iter().next().ok_or_else(|| {
				Error::BackendProtocolViolation(format!(
					"signer request {id} completed without any signed message"
				))
			}),
			status => Err(Error::SigningRejected {
				request_id: id,
				status: status.to_string(),
				sub_status: latest.sub_status,
			}),
		}
	}
}
