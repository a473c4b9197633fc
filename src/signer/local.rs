use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bip39::{Language, Mnemonic};
use hmac::{Hmac, Mac};
use secp256k1::{Message, Secp256k1, SecretKey};
use sha2::Sha512;
use zeroize::Zeroizing;

use super::{
	algorithm_for, KeyAlgorithm, PublicKeyMaterial, SignatureMaterial, SignerBackend,
	SigningRequest, SigningStatus, Vault,
};
use crate::config::{LocalSignerConfig, NetworkType};
use crate::error::{Error, Result};

type HmacSha512 = Hmac<Sha512>;

/// Default derivation path per network family.
pub fn default_path(network: NetworkType) -> &'static str {
	match network {
		NetworkType::Cosmos => "m/44'/118'/0'/0/0",
		NetworkType::Avalanche => "m/44'/9000'/0'/0/0",
		NetworkType::Near => "m/44'/397'/0'",
		NetworkType::Substrate => "m/44'/354'/0'/0'/0'",
	}
}

enum LocalKey {
	Secp256k1(SecretKey),
	Ed25519(ed25519_dalek::SigningKey),
}

impl Drop for LocalKey {
	fn drop(&mut self) {
		if let Self::Secp256k1(sk) = self {
			sk.non_secure_erase();
		}
	}
}

/// Signs in-process with a key derived from a recovery phrase. Requests
/// follow the same submit/poll shape as the remote backend: submit
/// answers `Submitted`, the next poll answers `Completed`.
pub struct LocalKeyBackend {
	key: LocalKey,
	vault_name: String,
	requests: Mutex<HashMap<String, SigningRequest>>,
	next_id: AtomicU64,
}

impl LocalKeyBackend {
	pub fn from_config(
		config: &LocalSignerConfig,
		vault_name: &str,
		network: NetworkType,
	) -> Result<Self> {
		let phrase = Zeroizing::new(std::fs::read_to_string(&config.mnemonic_path).map_err(|e| {
			Error::Configuration(format!(
				"failed to read mnemonic {}: {e}",
				config.mnemonic_path.display()
			))
		})?);
		let path = config
			.derivation_path
			.as_deref()
			.unwrap_or_else(|| default_path(network));
		Self::from_mnemonic(phrase.trim(), path, algorithm_for(network), vault_name)
	}

	pub fn from_mnemonic(
		phrase: &str,
		path: &str,
		algorithm: KeyAlgorithm,
		vault_name: &str,
	) -> Result<Self> {
		let mnemonic = Mnemonic::parse_in(Language::English, phrase)
			.map_err(|e| Error::Configuration(format!("invalid mnemonic: {e}")))?;
		let seed = Zeroizing::new(mnemonic.to_seed(""));

		let key = match algorithm {
			KeyAlgorithm::Secp256k1 => LocalKey::Secp256k1(derive_secp256k1(&seed[..], path)?),
			KeyAlgorithm::Ed25519 => {
				let secret = slip10_ed25519(&seed[..], path)?;
				LocalKey::Ed25519(ed25519_dalek::SigningKey::from_bytes(&secret))
			}
		};

		tracing::info!(target: "signer", ?algorithm, path, "local signing key derived");
		Ok(Self {
			key,
			vault_name: vault_name.to_owned(),
			requests: Mutex::new(HashMap::new()),
			next_id: AtomicU64::new(1),
		})
	}

	fn public_key_bytes(&self) -> Vec<u8> {
		match &self.key {
			LocalKey::Secp256k1(sk) => sk.public_key(&Secp256k1::new()).serialize().to_vec(),
			LocalKey::Ed25519(sk) => sk.verifying_key().to_bytes().to_vec(),
		}
	}

	fn algorithm(&self) -> KeyAlgorithm {
		match self.key {
			LocalKey::Secp256k1(_) => KeyAlgorithm::Secp256k1,
			LocalKey::Ed25519(_) => KeyAlgorithm::Ed25519,
		}
	}

	fn sign(&self, message: &[u8]) -> Result<SignatureMaterial> {
		match &self.key {
			LocalKey::Secp256k1(sk) => {
				let digest: [u8; 32] = message.try_into().map_err(|_| {
					Error::InvalidInput(format!(
						"secp256k1 signing needs a 32-byte digest, got {} bytes",
						message.len()
					))
				})?;
				let secp = Secp256k1::new();
				let (id, rs) = secp
					.sign_ecdsa_recoverable(&Message::from_digest(digest), sk)
					.serialize_compact();
				Ok(SignatureMaterial {
					r: rs[..32].to_vec(),
					s: rs[32..].to_vec(),
					v: Some(id.to_i32() as u8),
					full_sig: rs.to_vec(),
					public_key: self.public_key_bytes(),
				})
			}
			LocalKey::Ed25519(sk) => {
				use ed25519_dalek::Signer;
				let sig = sk.sign(message).to_bytes();
				Ok(SignatureMaterial {
					r: sig[..32].to_vec(),
					s: sig[32..].to_vec(),
					v: None,
					full_sig: sig.to_vec(),
					public_key: self.public_key_bytes(),
				})
			}
		}
	}
}

#[async_trait::async_trait]
impl SignerBackend for LocalKeyBackend {
	async fn list_vaults_by_name(&self, name_prefix: &str) -> Result<Vec<Vault>> {
		if !self.vault_name.starts_with(name_prefix) {
			return Ok(Vec::new());
		}
		Ok(vec![Vault {
			id: "1".into(),
			name: self.vault_name.clone(),
		}])
	}

	async fn public_key(&self, _vault: &Vault, asset_id: &str) -> Result<PublicKeyMaterial> {
		Ok(PublicKeyMaterial {
			public_key: self.public_key_bytes(),
			algorithm: self.algorithm(),
			asset_id: asset_id.to_owned(),
			account: 0,
			change: 0,
			address_index: 0,
		})
	}

	async fn submit(
		&self,
		_vault: &Vault,
		_asset_id: &str,
		_source_address: &str,
		digest_hex: &str,
		note: &str,
	) -> Result<SigningRequest> {
		let message = hex::decode(digest_hex)
			.map_err(|e| Error::InvalidInput(format!("digest is not hex: {e}")))?;
		let signature = self.sign(&message)?;

		let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
		let completed = SigningRequest {
			id: id.clone(),
			digest_hex: digest_hex.to_owned(),
			note: note.to_owned(),
			status: SigningStatus::Completed,
			sub_status: String::new(),
			signatures: vec![signature],
		};
		self.requests
			.lock()
			.unwrap_or_else(|p| p.into_inner())
			.insert(id.clone(), completed.clone());

		Ok(SigningRequest {
			status: SigningStatus::Submitted,
			signatures: Vec::new(),
			..completed
		})
	}

	async fn poll_status(&self, request_id: &str) -> Result<SigningRequest> {
		self.requests
			.lock()
			.unwrap_or_else(|p| p.into_inner())
			.get(request_id)
			.cloned()
			.ok_or_else(|| Error::BackendUnavailable(format!("unknown signing request {request_id}")))
	}

	async fn deposit_address(&self, _vault: &Vault, _asset_id: &str) -> Result<Option<String>> {
		Ok(None)
	}
}

// -- Key derivation --

fn derive_secp256k1(seed: &[u8], path: &str) -> Result<SecretKey> {
	use bitcoin::bip32::{DerivationPath, Xpriv};

	let secp = bitcoin::secp256k1::Secp256k1::new();
	let path = DerivationPath::from_str(path)
		.map_err(|e| Error::Configuration(format!("invalid derivation path {path:?}: {e}")))?;
	let master = Xpriv::new_master(bitcoin::Network::Bitcoin, seed)
		.map_err(|e| Error::Configuration(format!("failed to create master key: {e}")))?;
	let child = master
		.derive_priv(&secp, &path)
		.map_err(|e| Error::Configuration(format!("failed to derive key: {e}")))?;

	let bytes = Zeroizing::new(child.private_key.secret_bytes());
	SecretKey::from_slice(&bytes[..]).map_err(|e| Error::Configuration(e.to_string()))
}

/// Parse `m/44'/397'/0'` into hardened indices. ed25519 derivation has
/// no public parent derivation, so every level must be hardened.
fn parse_hardened_path(path: &str) -> Result<Vec<u32>> {
	let invalid = || Error::Configuration(format!("invalid ed25519 derivation path {path:?}"));

	let mut parts = path.split('/');
	if parts.next() != Some("m") {
		return Err(invalid());
	}
	parts
		.map(|p| {
			let index = p
				.strip_suffix('\'')
				.or_else(|| p.strip_suffix('h'))
				.ok_or_else(invalid)?;
			let index: u32 = index.parse().map_err(|_| invalid())?;
			if index >= 0x8000_0000 {
				return Err(invalid());
			}
			Ok(index)
		})
		.collect()
}

/// SLIP-10 private key derivation on ed25519.
fn slip10_ed25519(seed: &[u8], path: &str) -> Result<Zeroizing<[u8; 32]>> {
	let indices = parse_hardened_path(path)?;

	let mut mac = HmacSha512::new_from_slice(b"ed25519 seed").expect("HMAC accepts any key length");
	mac.update(seed);
	let mut out = Zeroizing::new([0u8; 64]);
	out.copy_from_slice(&mac.finalize().into_bytes());

	for index in indices {
		let mut mac = HmacSha512::new_from_slice(&out[32..]).expect("HMAC accepts any key length");
		mac.update(&[0u8]);
		mac.update(&out[..32]);
		mac.update(&(index | 0x8000_0000).to_be_bytes());
		out.copy_from_slice(&mac.finalize().into_bytes());
	}

	let mut key = Zeroizing::new([0u8; 32]);
	key.copy_from_slice(&out[..32]);
	Ok(key)
}
