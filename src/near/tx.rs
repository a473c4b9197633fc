use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use serde_json::{json, Value};

use crate::crypto;

/// 30 TGas, the default for function calls.
pub const FUNCTION_CALL_GAS: u64 = 30_000_000_000_000;

const ED25519_KEY_TYPE: u8 = 0;
const FUNCTION_CALL_ACTION: u8 = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
	FunctionCall {
		method_name: String,
		args: Vec<u8>,
		gas: u64,
		deposit: u128,
	},
}

impl Action {
	pub fn call(method_name: &str, args: Value, deposit: u128) -> Self {
		Self::FunctionCall {
			method_name: method_name.to_owned(),
			args: args.to_string().into_bytes(),
			gas: FUNCTION_CALL_GAS,
			deposit,
		}
	}

	fn encode(&self, w: &mut BorshWriter) {
		match self {
			Self::FunctionCall {
				method_name,
				args,
				gas,
				deposit,
			} => {
				w.u8(FUNCTION_CALL_ACTION);
				w.string(method_name);
				w.bytes(args);
				w.u64(*gas);
				w.u128(*deposit);
			}
		}
	}

	fn to_json(&self) -> Value {
		match self {
			Self::FunctionCall {
				method_name,
				args,
				gas,
				deposit,
			} => json!({
				"FunctionCall": {
					"methodName": method_name,
					"args": serde_json::from_slice::<Value>(args).unwrap_or(Value::Null),
					"gas": gas,
					"deposit": deposit.to_string(),
				}
			}),
		}
	}

	/// Short human form, e.g. `unstake {"amount":"1"}`.
	pub fn summary(&self) -> String {
		match self {
			Self::FunctionCall {
				method_name,
				args,
				deposit,
				..
			} => {
				let args = String::from_utf8_lossy(args);
				if *deposit > 0 {
					format!("{method_name} {deposit}")
				} else if args == "{}" {
					method_name.clone()
				} else {
					format!("{method_name} {args}")
				}
			}
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
	pub signer_id: String,
	pub public_key: [u8; 32],
	pub nonce: u64,
	pub receiver_id: String,
	pub block_hash: [u8; 32],
	pub actions: Vec<Action>,
}

impl Transaction {
	/// Borsh encoding.
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut w = BorshWriter::default();
		w.string(&self.signer_id);
		w.u8(ED25519_KEY_TYPE);
		w.raw(&self.public_key);
		w.u64(self.nonce);
		w.string(&self.receiver_id);
		w.raw(&self.block_hash);
		w.u32(self.actions.len() as u32);
		for action in &self.actions {
			action.encode(&mut w);
		}
		w.buf
	}

	pub fn hash(&self) -> [u8; 32] {
		crypto::sha256(&self.to_bytes())
	}
}

pub fn public_key_string(pk: &[u8; 32]) -> String {
	format!("ed25519:{}", bs58::encode(pk).into_string())
}

impl Serialize for Transaction {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		let actions: Vec<Value> = self.actions.iter().map(Action::to_json).collect();
		let mut s = serializer.serialize_struct("Transaction", 6)?;
		s.serialize_field("signerId", &self.signer_id)?;
		s.serialize_field("publicKey", &public_key_string(&self.public_key))?;
		s.serialize_field("nonce", &self.nonce)?;
		s.serialize_field("receiverId", &self.receiver_id)?;
		s.serialize_field("blockHash", &bs58::encode(self.block_hash).into_string())?;
		s.serialize_field("actions", &actions)?;
		s.end()
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
	pub transaction: Transaction,
	pub signature: [u8; 64],
	/// Key the backend reports having signed with.
	pub signer_key: Vec<u8>,
}

impl SignedTransaction {
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut out = self.transaction.to_bytes();
		out.push(ED25519_KEY_TYPE);
		out.extend_from_slice(&self.signature);
		out
	}

	pub fn to_json(&self) -> Value {
		json!({
			"transaction": self.transaction,
			"signature": format!("ed25519:{}", bs58::encode(self.signature).into_string()),
			"hash": bs58::encode(self.transaction.hash()).into_string(),
		})
	}
}

#[derive(Default)]
struct BorshWriter {
	buf: Vec<u8>,
}

impl BorshWriter {
	fn u8(&mut self, v: u8) {
		self.buf.push(v);
	}

	fn u32(&mut self, v: u32) {
		self.buf.extend_from_slice(&v.to_le_bytes());
	}

	fn u64(&mut self, v: u64) {
		self.buf.extend_from_slice(&v.to_le_bytes());
	}

	fn u128(&mut self, v: u128) {
		self.buf.extend_from_slice(&v.to_le_bytes());
	}

	fn raw(&mut self, v: &[u8]) {
		self.buf.extend_from_slice(v);
	}

	fn bytes(&mut self, v: &[u8]) {
		self.u32(v.len() as u32);
		self.raw(v);
	}

	fn string(&mut self, v: &str) {
		self.bytes(v.as_bytes());
	}
}
