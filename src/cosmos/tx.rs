use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::error::{Error, Result};

pub const MSG_DELEGATE: &str = "/cosmos.staking.v1beta1.MsgDelegate";
pub const MSG_UNDELEGATE: &str = "/cosmos.staking.v1beta1.MsgUndelegate";
pub const MSG_BEGIN_REDELEGATE: &str = "/cosmos.staking.v1beta1.MsgBeginRedelegate";
pub const MSG_WITHDRAW_REWARD: &str = "/cosmos.distribution.v1beta1.MsgWithdrawDelegatorReward";
const SECP256K1_PUBKEY: &str = "/cosmos.crypto.secp256k1.PubKey";

/// `SIGN_MODE_LEGACY_AMINO_JSON`
const SIGN_MODE_LEGACY_AMINO_JSON: u64 = 127;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coin {
	pub denom: String,
	pub amount: u128,
}

impl Coin {
	/// Parse `10utia`-style amounts, requiring the configured denom.
	pub fn parse(amount: &str, expected_denom: &str) -> Result<Self> {
		let split = amount
			.find(|c: char| !c.is_ascii_digit())
			.unwrap_or(amount.len());
		let (total, denom) = amount.split_at(split);
		if total.is_empty() || denom.is_empty() {
			return Err(Error::InvalidInput(format!(
				"failed to extract denom and total amount of tokens from: {amount}"
			)));
		}
		if denom != expected_denom {
			return Err(Error::InvalidInput(format!(
				"denom mismatch, expected: {expected_denom} got: {denom}"
			)));
		}
		let amount = total
			.parse()
			.map_err(|_| Error::InvalidInput(format!("amount too large: {total}")))?;
		Ok(Self {
			denom: denom.to_owned(),
			amount,
		})
	}

	fn amino(&self) -> Value {
		json!({ "amount": self.amount.to_string(), "denom": self.denom })
	}

	fn proto(&self) -> Vec<u8> {
		let mut w = ProtoWriter::default();
		w.string(1, &self.denom);
		w.string(2, &self.amount.to_string());
		w.finish()
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Msg {
	Delegate {
		delegator: String,
		validator: String,
		amount: Coin,
	},
	Undelegate {
		delegator: String,
		validator: String,
		amount: Coin,
	},
	BeginRedelegate {
		delegator: String,
		validator_src: String,
		validator_dst: String,
		amount: Coin,
	},
	WithdrawReward {
		delegator: String,
		validator: String,
	},
}

impl Msg {
	pub fn type_url(&self) -> &'static str {
		match self {
			Self::Delegate { .. } => MSG_DELEGATE,
			Self::Undelegate { .. } => MSG_UNDELEGATE,
			Self::BeginRedelegate { .. } => MSG_BEGIN_REDELEGATE,
			Self::WithdrawReward { .. } => MSG_WITHDRAW_REWARD,
		}
	}

	/// Legacy amino JSON form, as displayed to approvers and signed.
	pub fn amino(&self) -> Value {
		match self {
			Self::Delegate {
				delegator,
				validator,
				amount,
			} => json!({
				"type": "cosmos-sdk/MsgDelegate",
				"value": {
					"amount": amount.amino(),
					"delegator_address": delegator,
					"validator_address": validator,
				}
			}),
			Self::Undelegate {
				delegator,
				validator,
				amount,
			} => json!({
				"type": "cosmos-sdk/MsgUndelegate",
				"value": {
					"amount": amount.amino(),
					"delegator_address": delegator,
					"validator_address": validator,
				}
			}),
			Self::BeginRedelegate {
				delegator,
				validator_src,
				validator_dst,
				amount,
			} => json!({
				"type": "cosmos-sdk/MsgBeginRedelegate",
				"value": {
					"amount": amount.amino(),
					"delegator_address": delegator,
					"validator_dst_address": validator_dst,
					"validator_src_address": validator_src,
				}
			}),
			Self::WithdrawReward {
				delegator,
				validator,
			} => json!({
				"type": "cosmos-sdk/MsgWithdrawDelegationReward",
				"value": {
					"delegator_address": delegator,
					"validator_address": validator,
				}
			}),
		}
	}

	/// Protobuf encoding of the message value (without the `Any` wrapper).
	pub fn proto(&self) -> Vec<u8> {
		let mut w = ProtoWriter::default();
		match self {
			Self::Delegate {
				delegator,
				validator,
				amount,
			}
			| Self::Undelegate {
				delegator,
				validator,
				amount,
			} => {
				w.string(1, delegator);
				w.string(2, validator);
				w.message(3, &amount.proto());
			}
			Self::BeginRedelegate {
				delegator,
				validator_src,
				validator_dst,
				amount,
			} => {
				w.string(1, delegator);
				w.string(2, validator_src);
				w.string(3, validator_dst);
				w.message(4, &amount.proto());
			}
			Self::WithdrawReward {
				delegator,
				validator,
			} => {
				w.string(1, delegator);
				w.string(2, validator);
			}
		}
		w.finish()
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fee {
	pub amount: Vec<Coin>,
	pub gas: u64,
}

/// Unsigned transaction in its legacy amino `StdSignDoc` shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignDoc {
	pub chain_id: String,
	pub account_number: u64,
	pub sequence: u64,
	pub fee: Fee,
	pub memo: String,
	pub msgs: Vec<Msg>,
}

impl SignDoc {
	pub fn amino(&self) -> Value {
		json!({
			"account_number": self.account_number.to_string(),
			"chain_id": self.chain_id,
			"fee": {
				"amount": self.fee.amount.iter().map(Coin::amino).collect::<Vec<_>>(),
				"gas": self.fee.gas.to_string(),
			},
			"memo": self.memo,
			"msgs": self.msgs.iter().map(Msg::amino).collect::<Vec<_>>(),
			"sequence": self.sequence.to_string(),
		})
	}

	/// Canonical bytes the amino sign mode hashes.
	pub fn sign_bytes(&self) -> Vec<u8> {
		sorted_json(&self.amino()).into_bytes()
	}

	pub fn body_bytes(&self) -> Vec<u8> {
		let mut w = ProtoWriter::default();
		for msg in &self.msgs {
			w.message(1, &any(msg.type_url(), &msg.proto()));
		}
		w.string(2, &self.memo);
		w.finish()
	}

	pub fn auth_info_bytes(&self, public_key: &[u8]) -> Vec<u8> {
		let mut pk = ProtoWriter::default();
		pk.bytes(1, public_key);

		let mut single = ProtoWriter::default();
		single.uint64(1, SIGN_MODE_LEGACY_AMINO_JSON);
		let mut mode_info = ProtoWriter::default();
		mode_info.message(1, &single.finish());

		let mut signer_info = ProtoWriter::default();
		signer_info.message(1, &any(SECP256K1_PUBKEY, &pk.finish()));
		signer_info.message(2, &mode_info.finish());
		signer_info.uint64(3, self.sequence);

		let mut fee = ProtoWriter::default();
		for coin in &self.fee.amount {
			fee.message(1, &coin.proto());
		}
		fee.uint64(2, self.fee.gas);

		let mut auth_info = ProtoWriter::default();
		auth_info.message(1, &signer_info.finish());
		auth_info.message(2, &fee.finish());
		auth_info.finish()
	}
}

impl Serialize for SignDoc {
	fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
		self.amino().serialize(serializer)
	}
}

/// Assembled `TxRaw` plus what is needed to check it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
	pub body_bytes: Vec<u8>,
	pub auth_info_bytes: Vec<u8>,
	pub signature: [u8; 64],
	pub public_key: Vec<u8>,
	pub sign_bytes: Vec<u8>,
}

impl SignedTx {
	/// Protobuf `TxRaw` wire bytes.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut w = ProtoWriter::default();
		w.bytes(1, &self.body_bytes);
		w.bytes(2, &self.auth_info_bytes);
		w.bytes(3, &self.signature);
		w.finish()
	}

	/// `TxRaw` JSON view with base64 fields.
	pub fn to_json(&self) -> Value {
		use base64::Engine;
		let b64 = base64::engine::general_purpose::STANDARD;
		json!({
			"bodyBytes": b64.encode(&self.body_bytes),
			"authInfoBytes": b64.encode(&self.auth_info_bytes),
			"signatures": [b64.encode(self.signature)],
		})
	}
}

fn any(type_url: &str, value: &[u8]) -> Vec<u8> {
	let mut w = ProtoWriter::default();
	w.string(1, type_url);
	w.bytes(2, value);
	w.finish()
}

// -- Canonical JSON --

/// Compact JSON with object keys sorted and `&`, `<`, `>` escaped the
/// way the Cosmos SDK's amino JSON does.
pub fn sorted_json(value: &Value) -> String {
	let mut out = String::new();
	write_sorted(value, &mut out);
	out.replace('&', "\\u0026")
		.replace('<', "\\u003c")
		.replace('>', "\\u003e")
}

fn write_sorted(value: &Value, out: &mut String) {
	match value {
		Value::Object(map) => {
			let mut entries: Vec<_> = map.iter().collect();
			entries.sort_by(|a, b| a.0.cmp(b.0));
			out.push('{');
			for (i, (k, v)) in entries.into_iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				out.push_str(&Value::String(k.clone()).to_string());
				out.push(':');
				write_sorted(v, out);
			}
			out.push('}');
		}
		Value::Array(items) => {
			out.push('[');
			for (i, v) in items.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				write_sorted(v, out);
			}
			out.push(']');
		}
		other => out.push_str(&other.to_string()),
	}
}

// -- Protobuf --

/// Minimal proto3 writer. Scalars equal to their default are omitted,
/// embedded messages are always written.
#[derive(Default)]
pub struct ProtoWriter {
	buf: Vec<u8>,
}

impl ProtoWriter {
	fn key(&mut self, field: u32, wire_type: u8) {
		put_varint(&mut self.buf, (u64::from(field) << 3) | u64::from(wire_type));
	}

	pub fn uint64(&mut self, field: u32, value: u64) {
		if value == 0 {
			return;
		}
		self.key(field, 0);
		put_varint(&mut self.buf, value);
	}

	pub fn bytes(&mut self, field: u32, value: &[u8]) {
		if value.is_empty() {
			return;
		}
		self.message(field, value);
	}

	pub fn string(&mut self, field: u32, value: &str) {
		self.bytes(field, value.as_bytes());
	}

	pub fn message(&mut self, field: u32, encoded: &[u8]) {
		self.key(field, 2);
		put_varint(&mut self.buf, encoded.len() as u64);
		self.buf.extend_from_slice(encoded);
	}

	pub fn finish(self) -> Vec<u8> {
		self.buf
	}
}

pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
	while value >= 0x80 {
		buf.push((value as u8) | 0x80);
		value >>= 7;
	}
	buf.push(value as u8);
}
