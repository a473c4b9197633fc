use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::config::RewardDestination;
use crate::crypto;
use crate::error::{Error, Result};

/// Signed extrinsic, format version 4.
const EXTRINSIC_V4_SIGNED: u8 = 0x84;
const MULTI_ADDRESS_ID: u8 = 0x00;
const MULTI_SIGNATURE_ED25519: u8 = 0x00;
const IMMORTAL_ERA: u8 = 0x00;
/// `CheckMetadataHash` mode `Disabled`, and `None` for its implicit hash.
const METADATA_HASH_DISABLED: u8 = 0x00;
const METADATA_HASH_NONE: u8 = 0x00;

/// Signing payloads longer than this are hashed first.
const MAX_RAW_PAYLOAD: usize = 256;

/// Staking pallet calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
	Bond { value: u128, payee: Payee },
	BondExtra { value: u128 },
	Unbond { value: u128 },
	WithdrawUnbonded { num_slashing_spans: u32 },
	Nominate { targets: Vec<[u8; 32]> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payee {
	Staked,
	Stash,
	Controller,
	Account([u8; 32]),
	None,
}

impl Payee {
	pub fn from_config(dest: &RewardDestination) -> Result<Self> {
		Ok(match dest {
			RewardDestination::Staked => Self::Staked,
			RewardDestination::Stash => Self::Stash,
			RewardDestination::Controller => Self::Controller,
			RewardDestination::None => Self::None,
			RewardDestination::Account(addr) => Self::Account(crypto::ss58_decode(addr)?.1),
		})
	}

	fn encode(&self, out: &mut Vec<u8>) {
		match self {
			Self::Staked => out.push(0),
			Self::Stash => out.push(1),
			Self::Controller => out.push(2),
			Self::Account(id) => {
				out.push(3);
				out.extend_from_slice(id);
			}
			Self::None => out.push(4),
		}
	}

	fn to_json(&self) -> Value {
		match self {
			Self::Staked => json!("Staked"),
			Self::Stash => json!("Stash"),
			Self::Controller => json!("Controller"),
			Self::Account(id) => json!({ "Account": format!("0x{}", hex::encode(id)) }),
			Self::None => json!("None"),
		}
	}
}

impl Call {
	fn call_index(&self) -> u8 {
		match self {
			Self::Bond { .. } => 0,
			Self::BondExtra { .. } => 1,
			Self::Unbond { .. } => 2,
			Self::WithdrawUnbonded { .. } => 3,
			Self::Nominate { .. } => 5,
		}
	}

	pub fn method(&self) -> &'static str {
		match self {
			Self::Bond { .. } => "bond",
			Self::BondExtra { .. } => "bondExtra",
			Self::Unbond { .. } => "unbond",
			Self::WithdrawUnbonded { .. } => "withdrawUnbonded",
			Self::Nominate { .. } => "nominate",
		}
	}

	pub fn encode(&self, pallet_index: u8) -> Vec<u8> {
		let mut out = vec![pallet_index, self.call_index()];
		match self {
			Self::Bond { value, payee } => {
				compact(*value, &mut out);
				payee.encode(&mut out);
			}
			Self::BondExtra { value } | Self::Unbond { value } => compact(*value, &mut out),
			Self::WithdrawUnbonded { num_slashing_spans } => {
				out.extend_from_slice(&num_slashing_spans.to_le_bytes())
			}
			Self::Nominate { targets } => {
				compact(targets.len() as u128, &mut out);
				for target in targets {
					out.push(MULTI_ADDRESS_ID);
					out.extend_from_slice(target);
				}
			}
		}
		out
	}

	fn args(&self, ss58_prefix: u16) -> Value {
		match self {
			Self::Bond { value, payee } => json!({ "value": value.to_string(), "payee": payee.to_json() }),
			Self::BondExtra { value } => json!({ "maxAdditional": value.to_string() }),
			Self::Unbond { value } => json!({ "value": value.to_string() }),
			Self::WithdrawUnbonded { num_slashing_spans } => {
				json!({ "numSlashingSpans": num_slashing_spans })
			}
			Self::Nominate { targets } => json!({
				"targets": targets
					.iter()
					.map(|t| crypto::ss58_encode(ss58_prefix, t))
					.collect::<Vec<_>>()
			}),
		}
	}
}

/// Everything needed to produce the signing payload of one extrinsic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedExtrinsic {
	pub call: Call,
	pub pallet_index: u8,
	pub signer: [u8; 32],
	pub ss58_prefix: u16,
	pub nonce: u32,
	pub spec_version: u32,
	pub transaction_version: u32,
	pub genesis_hash: [u8; 32],
	pub check_metadata_hash: bool,
}

impl UnsignedExtrinsic {
	/// Signed extension data carried inside the extrinsic.
	fn extra(&self) -> Vec<u8> {
		let mut out = vec![IMMORTAL_ERA];
		compact(u128::from(self.nonce), &mut out);
		compact(0, &mut out); // tip
		if self.check_metadata_hash {
			out.push(METADATA_HASH_DISABLED);
		}
		out
	}

	/// Signed extension data only committed to by the signature.
	fn additional(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(4 + 4 + 32 + 32 + 1);
		out.extend_from_slice(&self.spec_version.to_le_bytes());
		out.extend_from_slice(&self.transaction_version.to_le_bytes());
		out.extend_from_slice(&self.genesis_hash);
		// immortal: the era checkpoint is the genesis block
		out.extend_from_slice(&self.genesis_hash);
		if self.check_metadata_hash {
			out.push(METADATA_HASH_NONE);
		}
		out
	}

	/// Bytes the signer signs: call, extra and additional, blake2b-256
	/// hashed when longer than 256 bytes.
	pub fn signing_payload(&self) -> Vec<u8> {
		let mut payload = self.call.encode(self.pallet_index);
		payload.extend_from_slice(&self.extra());
		payload.extend_from_slice(&self.additional());
		if payload.len() > MAX_RAW_PAYLOAD {
			crypto::blake2b_256(&payload).to_vec()
		} else {
			payload
		}
	}

	pub fn signer_address(&self) -> String {
		crypto::ss58_encode(self.ss58_prefix, &self.signer)
	}
}

impl Serialize for UnsignedExtrinsic {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		json!({
			"signer": self.signer_address(),
			"call": {
				"section": "staking",
				"method": self.call.method(),
				"args": self.call.args(self.ss58_prefix),
			},
			"era": "immortal",
			"nonce": self.nonce,
			"tip": 0,
			"specVersion": self.spec_version,
			"transactionVersion": self.transaction_version,
			"genesisHash": format!("0x{}", hex::encode(self.genesis_hash)),
		})
		.serialize(serializer)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedExtrinsic {
	pub unsigned: UnsignedExtrinsic,
	pub signature: [u8; 64],
	pub signer_key: Vec<u8>,
}

impl SignedExtrinsic {
	/// Length-prefixed extrinsic, ready for `author_submitExtrinsic`.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut body = vec![EXTRINSIC_V4_SIGNED, MULTI_ADDRESS_ID];
		body.extend_from_slice(&self.unsigned.signer);
		body.push(MULTI_SIGNATURE_ED25519);
		body.extend_from_slice(&self.signature);
		body.extend_from_slice(&self.unsigned.extra());
		body.extend_from_slice(&self.unsigned.call.encode(self.unsigned.pallet_index));

		let mut out = Vec::with_capacity(body.len() + 5);
		compact(body.len() as u128, &mut out);
		out.extend_from_slice(&body);
		out
	}

	pub fn hash(&self) -> [u8; 32] {
		crypto::blake2b_256(&self.to_bytes())
	}

	pub fn to_json(&self) -> Value {
		json!({
			"extrinsic": format!("0x{}", hex::encode(self.to_bytes())),
			"signature": format!("0x{}", hex::encode(self.signature)),
			"hash": format!("0x{}", hex::encode(self.hash())),
		})
	}
}

/// SCALE compact integer encoding.
pub fn compact(value: u128, out: &mut Vec<u8>) {
	match value {
		0..=0x3f => out.push((value as u8) << 2),
		0x40..=0x3fff => out.extend_from_slice(&(((value as u16) << 2) | 0b01).to_le_bytes()),
		0x4000..=0x3fff_ffff => out.extend_from_slice(&(((value as u32) << 2) | 0b10).to_le_bytes()),
		_ => {
			let bytes = value.to_le_bytes();
			let len = 16 - (value.leading_zeros() / 8) as usize;
			out.push((((len - 4) as u8) << 2) | 0b11);
			out.extend_from_slice(&bytes[..len]);
		}
	}
}

/// Parse comma-separated SS58 validator addresses.
pub fn parse_targets(list: &str) -> Result<Vec<[u8; 32]>> {
	let targets: Vec<[u8; 32]> = list
		.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(|addr| crypto::ss58_decode(addr).map(|(_, id)| id))
		.collect::<Result<_>>()?;
	if targets.is_empty() {
		return Err(Error::InvalidInput("no validators to nominate".into()));
	}
	Ok(targets)
}
