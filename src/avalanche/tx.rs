//! Avalanche linear codec (version 0) for the P-chain and coreth atomic
//! transactions used to move and stake AVAX.

use serde_json::{json, Value};

use crate::crypto;
use crate::error::{Error, Result};

pub const CODEC_VERSION: u16 = 0;

pub type Id = [u8; 32];
pub type ShortId = [u8; 20];

/// Type ids as registered in the P-chain and coreth codecs.
pub mod type_id {
	pub const TRANSFER_INPUT: u32 = 5;
	pub const TRANSFER_OUTPUT: u32 = 7;
	pub const CREDENTIAL: u32 = 9;
	pub const OUTPUT_OWNERS: u32 = 11;

	pub const P_IMPORT: u32 = 17;
	pub const P_EXPORT: u32 = 18;
	pub const P_ADD_PERMISSIONLESS_DELEGATOR: u32 = 26;

	pub const C_IMPORT: u32 = 0;
	pub const C_EXPORT: u32 = 1;
}

/// Size of one secp256k1 credential holding a single signature.
pub const CREDENTIAL_LEN: usize = 4 + 4 + 65;

// -- Packer --

#[derive(Default)]
pub struct Packer {
	buf: Vec<u8>,
}

impl Packer {
	pub fn u16(&mut self, v: u16) -> &mut Self {
		self.buf.extend_from_slice(&v.to_be_bytes());
		self
	}

	pub fn u32(&mut self, v: u32) -> &mut Self {
		self.buf.extend_from_slice(&v.to_be_bytes());
		self
	}

	pub fn u64(&mut self, v: u64) -> &mut Self {
		self.buf.extend_from_slice(&v.to_be_bytes());
		self
	}

	pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
		self.buf.extend_from_slice(bytes);
		self
	}

	/// Length-prefixed byte slice.
	pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
		self.u32(bytes.len() as u32).raw(bytes)
	}

	pub fn array<T>(&mut self, items: &[T], mut pack: impl FnMut(&mut Self, &T)) -> &mut Self {
		self.u32(items.len() as u32);
		for item in items {
			pack(self, item);
		}
		self
	}

	pub fn finish(self) -> Vec<u8> {
		self.buf
	}
}

struct Reader<'a> {
	data: &'a [u8],
}

impl<'a> Reader<'a> {
	fn take(&mut self, n: usize) -> Result<&'a [u8]> {
		if self.data.len() < n {
			return Err(Error::Codec(format!(
				"unexpected end of input: wanted {n} bytes, {} left",
				self.data.len()
			)));
		}
		let (head, tail) = self.data.split_at(n);
		self.data = tail;
		Ok(head)
	}

	fn u16(&mut self) -> Result<u16> {
		Ok(u16::from_be_bytes(self.array()?))
	}

	fn u32(&mut self) -> Result<u32> {
		Ok(u32::from_be_bytes(self.array()?))
	}

	fn u64(&mut self) -> Result<u64> {
		Ok(u64::from_be_bytes(self.array()?))
	}

	fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
		let mut out = [0u8; N];
		out.copy_from_slice(self.take(N)?);
		Ok(out)
	}
}

// -- Components --

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputOwners {
	pub locktime: u64,
	pub threshold: u32,
	/// Kept sorted.
	pub addresses: Vec<ShortId>,
}

impl OutputOwners {
	pub fn single(address: ShortId) -> Self {
		Self {
			locktime: 0,
			threshold: 1,
			addresses: vec![address],
		}
	}

	fn pack(&self, p: &mut Packer) {
		p.u64(self.locktime)
			.u32(self.threshold)
			.array(&self.addresses, |p, a| {
				p.raw(a);
			});
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferableOutput {
	pub asset_id: Id,
	pub amount: u64,
	pub owners: OutputOwners,
}

impl TransferableOutput {
	pub fn new(asset_id: Id, amount: u64, owner: ShortId) -> Self {
		Self {
			asset_id,
			amount,
			owners: OutputOwners::single(owner),
		}
	}

	fn pack_output(&self, p: &mut Packer) {
		p.u32(type_id::TRANSFER_OUTPUT).u64(self.amount);
		self.owners.pack(p);
	}

	fn pack(&self, p: &mut Packer) {
		p.raw(&self.asset_id);
		self.pack_output(p);
	}

	fn output_bytes(&self) -> Vec<u8> {
		let mut p = Packer::default();
		self.pack_output(&mut p);
		p.finish()
	}

	fn to_json(&self) -> Value {
		json!({
			"assetID": crypto::cb58_encode(&self.asset_id),
			"amount": self.amount.to_string(),
			"locktime": self.owners.locktime,
			"threshold": self.owners.threshold,
			"addresses": self.owners.addresses.iter().map(|a| format!("0x{}", hex::encode(a))).collect::<Vec<_>>(),
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferableInput {
	pub tx_id: Id,
	pub output_index: u32,
	pub asset_id: Id,
	pub amount: u64,
	pub sig_indices: Vec<u32>,
}

impl TransferableInput {
	fn pack(&self, p: &mut Packer) {
		p.raw(&self.tx_id)
			.u32(self.output_index)
			.raw(&self.asset_id)
			.u32(type_id::TRANSFER_INPUT)
			.u64(self.amount)
			.array(&self.sig_indices, |p, i| {
				p.u32(*i);
			});
	}

	fn to_json(&self) -> Value {
		json!({
			"txID": crypto::cb58_encode(&self.tx_id),
			"outputIndex": self.output_index,
			"assetID": crypto::cb58_encode(&self.asset_id),
			"amount": self.amount.to_string(),
		})
	}
}

/// Sort inputs by (tx id, output index).
pub fn sort_inputs(inputs: &mut [TransferableInput]) {
	inputs.sort_by(|a, b| (a.tx_id, a.output_index).cmp(&(b.tx_id, b.output_index)));
}

/// Sort outputs by asset id, then by their serialized form.
pub fn sort_outputs(outputs: &mut [TransferableOutput]) {
	outputs.sort_by(|a, b| {
		a.asset_id
			.cmp(&b.asset_id)
			.then_with(|| a.output_bytes().cmp(&b.output_bytes()))
	});
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseTx {
	pub network_id: u32,
	pub blockchain_id: Id,
	pub outputs: Vec<TransferableOutput>,
	pub inputs: Vec<TransferableInput>,
	pub memo: Vec<u8>,
}

impl BaseTx {
	fn pack(&self, p: &mut Packer) {
		p.u32(self.network_id)
			.raw(&self.blockchain_id)
			.array(&self.outputs, |p, o| o.pack(p))
			.array(&self.inputs, |p, i| i.pack(p))
			.bytes(&self.memo);
	}

	fn to_json(&self) -> Value {
		json!({
			"networkID": self.network_id,
			"blockchainID": crypto::cb58_encode(&self.blockchain_id),
			"outputs": self.outputs.iter().map(TransferableOutput::to_json).collect::<Vec<_>>(),
			"inputs": self.inputs.iter().map(TransferableInput::to_json).collect::<Vec<_>>(),
			"memo": format!("0x{}", hex::encode(&self.memo)),
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validator {
	pub node_id: ShortId,
	/// Unix seconds.
	pub start: u64,
	pub end: u64,
	pub weight: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmOutput {
	pub address: [u8; 20],
	pub amount: u64,
	pub asset_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmInput {
	pub address: [u8; 20],
	pub amount: u64,
	pub asset_id: Id,
	pub nonce: u64,
}

// -- Transactions --

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnsignedTx {
	/// P-chain import of atomic UTXOs exported from `source_chain`.
	PImport {
		base: BaseTx,
		source_chain: Id,
		imported_inputs: Vec<TransferableInput>,
	},
	PExport {
		base: BaseTx,
		destination_chain: Id,
		exported_outputs: Vec<TransferableOutput>,
	},
	/// Delegation to a primary network validator.
	PAddDelegator {
		base: BaseTx,
		validator: Validator,
		subnet_id: Id,
		stake_outputs: Vec<TransferableOutput>,
		rewards_owner: OutputOwners,
	},
	CImport {
		network_id: u32,
		blockchain_id: Id,
		source_chain: Id,
		imported_inputs: Vec<TransferableInput>,
		outputs: Vec<EvmOutput>,
	},
	CExport {
		network_id: u32,
		blockchain_id: Id,
		destination_chain: Id,
		inputs: Vec<EvmInput>,
		exported_outputs: Vec<TransferableOutput>,
	},
}

impl UnsignedTx {
	pub fn kind(&self) -> &'static str {
		match self {
			Self::PImport { .. } => "ImportTx",
			Self::PExport { .. } => "ExportTx",
			Self::PAddDelegator { .. } => "AddPermissionlessDelegatorTx",
			Self::CImport { .. } => "EVMImportTx",
			Self::CExport { .. } => "EVMExportTx",
		}
	}

	/// One credential is needed per spent input.
	pub fn credential_count(&self) -> usize {
		match self {
			Self::PImport {
				base, imported_inputs, ..
			} => base.inputs.len() + imported_inputs.len(),
			Self::PExport { base, .. } | Self::PAddDelegator { base, .. } => base.inputs.len(),
			Self::CImport { imported_inputs, .. } => imported_inputs.len(),
			Self::CExport { inputs, .. } => inputs.len(),
		}
	}

	/// Codec-versioned, type-tagged bytes; sha256 of these is what gets signed.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut p = Packer::default();
		p.u16(CODEC_VERSION);
		match self {
			Self::PImport {
				base,
				source_chain,
				imported_inputs,
			} => {
				p.u32(type_id::P_IMPORT);
				base.pack(&mut p);
				p.raw(source_chain).array(imported_inputs, |p, i| i.pack(p));
			}
			Self::PExport {
				base,
				destination_chain,
				exported_outputs,
			} => {
				p.u32(type_id::P_EXPORT);
				base.pack(&mut p);
				p.raw(destination_chain).array(exported_outputs, |p, o| o.pack(p));
			}
			Self::PAddDelegator {
				base,
				validator,
				subnet_id,
				stake_outputs,
				rewards_owner,
			} => {
				p.u32(type_id::P_ADD_PERMISSIONLESS_DELEGATOR);
				base.pack(&mut p);
				p.raw(&validator.node_id)
					.u64(validator.start)
					.u64(validator.end)
					.u64(validator.weight)
					.raw(subnet_id)
					.array(stake_outputs, |p, o| o.pack(p))
					.u32(type_id::OUTPUT_OWNERS);
				rewards_owner.pack(&mut p);
			}
			Self::CImport {
				network_id,
				blockchain_id,
				source_chain,
				imported_inputs,
				outputs,
			} => {
				p.u32(type_id::C_IMPORT)
					.u32(*network_id)
					.raw(blockchain_id)
					.raw(source_chain)
					.array(imported_inputs, |p, i| i.pack(p))
					.array(outputs, |p, o| {
						p.raw(&o.address).u64(o.amount).raw(&o.asset_id);
					});
			}
			Self::CExport {
				network_id,
				blockchain_id,
				destination_chain,
				inputs,
				exported_outputs,
			} => {
				p.u32(type_id::C_EXPORT)
					.u32(*network_id)
					.raw(blockchain_id)
					.raw(destination_chain)
					.array(inputs, |p, i| {
						p.raw(&i.address).u64(i.amount).raw(&i.asset_id).u64(i.nonce);
					})
					.array(exported_outputs, |p, o| o.pack(p));
			}
		}
		p.finish()
	}

	/// Length of the signed transaction once every credential is attached.
	pub fn signed_len(&self) -> usize {
		self.to_bytes().len() + 4 + CREDENTIAL_LEN * self.credential_count()
	}

	pub fn to_json(&self) -> Value {
		let ids = |id: &Id| crypto::cb58_encode(id);
		let body = match self {
			Self::PImport {
				base,
				source_chain,
				imported_inputs,
			} => json!({
				"baseTx": base.to_json(),
				"sourceChain": ids(source_chain),
				"importedInputs": imported_inputs.iter().map(TransferableInput::to_json).collect::<Vec<_>>(),
			}),
			Self::PExport {
				base,
				destination_chain,
				exported_outputs,
			} => json!({
				"baseTx": base.to_json(),
				"destinationChain": ids(destination_chain),
				"exportedOutputs": exported_outputs.iter().map(TransferableOutput::to_json).collect::<Vec<_>>(),
			}),
			Self::PAddDelegator {
				base,
				validator,
				subnet_id,
				stake_outputs,
				rewards_owner,
			} => json!({
				"baseTx": base.to_json(),
				"validator": {
					"nodeID": format!("NodeID-{}", crypto::cb58_encode(&validator.node_id)),
					"start": validator.start,
					"end": validator.end,
					"weight": validator.weight.to_string(),
				},
				"subnetID": ids(subnet_id),
				"stake": stake_outputs.iter().map(TransferableOutput::to_json).collect::<Vec<_>>(),
				"rewardsOwner": rewards_owner.addresses.iter().map(|a| format!("0x{}", hex::encode(a))).collect::<Vec<_>>(),
			}),
			Self::CImport {
				network_id,
				blockchain_id,
				source_chain,
				imported_inputs,
				outputs,
			} => json!({
				"networkID": network_id,
				"blockchainID": ids(blockchain_id),
				"sourceChain": ids(source_chain),
				"importedInputs": imported_inputs.iter().map(TransferableInput::to_json).collect::<Vec<_>>(),
				"outputs": outputs.iter().map(|o| json!({
					"address": format!("0x{}", hex::encode(o.address)),
					"amount": o.amount.to_string(),
					"assetID": ids(&o.asset_id),
				})).collect::<Vec<_>>(),
			}),
			Self::CExport {
				network_id,
				blockchain_id,
				destination_chain,
				inputs,
				exported_outputs,
			} => json!({
				"networkID": network_id,
				"blockchainID": ids(blockchain_id),
				"destinationChain": ids(destination_chain),
				"inputs": inputs.iter().map(|i| json!({
					"address": format!("0x{}", hex::encode(i.address)),
					"amount": i.amount.to_string(),
					"assetID": ids(&i.asset_id),
					"nonce": i.nonce,
				})).collect::<Vec<_>>(),
				"exportedOutputs": exported_outputs.iter().map(TransferableOutput::to_json).collect::<Vec<_>>(),
			}),
		};
		json!({ "type": self.kind(), "tx": body })
	}
}

impl serde::Serialize for UnsignedTx {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		self.to_json().serialize(serializer)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
	pub unsigned: UnsignedTx,
	/// 65-byte `r || s || v`, one per credential.
	pub credentials: Vec<[u8; 65]>,
	/// Compressed key that produced the signatures.
	pub signer_key: Vec<u8>,
}

impl SignedTx {
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut p = Packer::default();
		p.raw(&self.unsigned.to_bytes())
			.array(&self.credentials, |p, sig| {
				p.u32(type_id::CREDENTIAL).u32(1).raw(sig);
			});
		p.finish()
	}

	pub fn tx_id(&self) -> String {
		crypto::cb58_encode(&crypto::sha256(&self.to_bytes()))
	}

	pub fn to_json(&self) -> Value {
		json!({
			"txID": self.tx_id(),
			"unsignedTx": self.unsigned.to_json(),
			"credentials": self.credentials.iter().map(|c| format!("0x{}", hex::encode(c))).collect::<Vec<_>>(),
			"tx": encode_hex(&self.to_bytes()),
		})
	}
}

// -- UTXOs --

/// A spendable secp256k1 transfer output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
	pub tx_id: Id,
	pub output_index: u32,
	pub asset_id: Id,
	pub amount: u64,
	pub owners: OutputOwners,
}

impl Utxo {
	/// Decode a serialized UTXO. Outputs other than plain secp256k1
	/// transfers (stakeable locks, NFTs, ...) yield `None`.
	pub fn parse(bytes: &[u8]) -> Result<Option<Self>> {
		let mut r = Reader { data: bytes };
		let version = r.u16()?;
		if version != CODEC_VERSION {
			return Err(Error::Codec(format!("unsupported codec version {version}")));
		}
		let tx_id = r.array()?;
		let output_index = r.u32()?;
		let asset_id = r.array()?;
		if r.u32()? != type_id::TRANSFER_OUTPUT {
			return Ok(None);
		}
		let amount = r.u64()?;
		let locktime = r.u64()?;
		let threshold = r.u32()?;
		let count = r.u32()? as usize;
		let addresses = (0..count).map(|_| r.array()).collect::<Result<Vec<ShortId>>>()?;

		Ok(Some(Self {
			tx_id,
			output_index,
			asset_id,
			amount,
			owners: OutputOwners {
				locktime,
				threshold,
				addresses,
			},
		}))
	}

	/// Input spending this UTXO with a signature by `owner`.
	pub fn spend_by(&self, owner: &ShortId) -> Option<TransferableInput> {
		let index = self.owners.addresses.iter().position(|a| a == owner)?;
		Some(TransferableInput {
			tx_id: self.tx_id,
			output_index: self.output_index,
			asset_id: self.asset_id,
			amount: self.amount,
			sig_indices: vec![index as u32],
		})
	}
}

// -- Hex with checksum --

/// `0x`-prefixed hex with the trailing 4 bytes of sha256, as accepted by
/// the node APIs with `"encoding": "hex"`.
pub fn encode_hex(data: &[u8]) -> String {
	let checksum = crypto::sha256(data);
	format!("0x{}{}", hex::encode(data), hex::encode(&checksum[28..]))
}

pub fn decode_hex(s: &str) -> Result<Vec<u8>> {
	let raw = hex::decode(s.trim_start_matches("0x")).map_err(|e| Error::Codec(format!("invalid hex: {e}")))?;
	if raw.len() < 4 {
		return Err(Error::Codec("hex payload shorter than its checksum".into()));
	}
	let (data, checksum) = raw.split_at(raw.len() - 4);
	if crypto::sha256(data)[28..] != *checksum {
		return Err(Error::Codec("hex payload checksum mismatch".into()));
	}
	Ok(data.to_vec())
}

/// `NodeID-<cb58>` into the 20-byte node id.
pub fn parse_node_id(node_id: &str) -> Result<ShortId> {
	let encoded = node_id
		.strip_prefix("NodeID-")
		.ok_or_else(|| Error::InvalidInput(format!("{node_id} is not a NodeID-... identifier")))?;
	let raw = crypto::cb58_decode(encoded)?;
	raw.try_into()
		.map_err(|_| Error::InvalidInput(format!("{node_id} is not a 20-byte node id")))
}
