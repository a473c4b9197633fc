//! NEAR staking pool calls.

pub mod rpc;
pub mod tx;

use serde_json::{json, Value};

use crate::amount;
use crate::config::{Config, NearNetworkConfig};
use crate::crypto;
use crate::error::{Error, Result};
use crate::pipeline::{BroadcastReceipt, ChainPipeline, SignPayload, SigningAccount};
use crate::signer::{SignatureMaterial, Signer};

use self::rpc::NearState;
use self::tx::{Action, SignedTransaction, Transaction};

const NEAR_DECIMALS: u32 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NearOp {
	Delegate { amount: String },
	Unbond { amount: String },
	/// An amount of `0` withdraws everything.
	Withdraw { amount: String },
}

pub struct NearPipeline<S> {
	account: SigningAccount,
	network: NearNetworkConfig,
	public_key: [u8; 32],
	validator: String,
	state: S,
}

/// Implicit account ids are the hex of the ed25519 key.
fn is_implicit(account_id: &str) -> bool {
	account_id.len() == 64 && account_id.chars().all(|c| c.is_ascii_hexdigit())
}

impl<S: NearState> NearPipeline<S> {
	pub async fn init(signer: &Signer, config: &Config, state: S) -> Result<Self> {
		let network = config.network::<NearNetworkConfig>()?.clone();
		let account = SigningAccount::resolve(
			signer,
			&config.fireblocks.vault_name,
			&config.fireblocks.asset_id,
			&config.delegator_address,
		)
		.await?;

		let public_key: [u8; 32] = account.public_key.public_key.as_slice().try_into().map_err(|_| {
			Error::BackendProtocolViolation(format!(
				"expected a 32-byte ed25519 key, got {} bytes",
				account.public_key.public_key.len()
			))
		})?;

		if is_implicit(&account.delegator) {
			account.expect_delegator(&hex::encode(public_key))?;
		} else if state.access_key(&account.delegator, &public_key).await?.is_none() {
			return Err(Error::Configuration(format!(
				"{} is not an access key of account {}",
				tx::public_key_string(&public_key),
				account.delegator
			)));
		}

		tracing::info!(target: "near", network = %network.network_id, account = %account.delegator, "near pipeline ready");
		Ok(Self {
			account,
			network,
			public_key,
			validator: config.validator_address.clone(),
			state,
		})
	}

	fn action(op: &NearOp) -> Result<Action> {
		let yocto = |a: &str| amount::to_base_units(a, NEAR_DECIMALS);
		Ok(match op {
			NearOp::Delegate { amount } => Action::call("deposit_and_stake", json!({}), yocto(amount)?),
			NearOp::Unbond { amount } => {
				Action::call("unstake", json!({ "amount": yocto(amount)?.to_string() }), 0)
			}
			NearOp::Withdraw { amount } => match yocto(amount)? {
				0 => Action::call("withdraw_all", json!({}), 0),
				units => Action::call("withdraw", json!({ "amount": units.to_string() }), 0),
			},
		})
	}

	/// Build against the current access key nonce and a recent block.
	pub async fn build(&self, op: &NearOp) -> Result<Transaction> {
		let action = Self::action(op)?;
		let key = self
			.state
			.access_key(&self.account.delegator, &self.public_key)
			.await?
			.ok_or_else(|| Error::ChainRpc(format!("access key of {} disappeared", self.account.delegator)))?;

		Ok(Transaction {
			signer_id: self.account.delegator.clone(),
			public_key: self.public_key,
			nonce: key.nonce + 1,
			receiver_id: self.validator.clone(),
			block_hash: key.block_hash,
			actions: vec![action],
		})
	}
}

#[async_trait::async_trait]
impl<S: NearState> ChainPipeline for NearPipeline<S> {
	type Unsigned = Transaction;
	type Signed = SignedTransaction;

	fn account(&self) -> &SigningAccount {
		&self.account
	}

	fn digest(&self, unsigned: &Transaction) -> Result<SignPayload> {
		let actions: Vec<String> = unsigned.actions.iter().map(Action::summary).collect();
		Ok(SignPayload {
			message: unsigned.hash().to_vec(),
			note: format!(
				"{} to {} from {}",
				actions.join(", "),
				unsigned.receiver_id,
				unsigned.signer_id
			),
		})
	}

	fn assemble(&self, unsigned: Transaction, signature: &SignatureMaterial) -> Result<SignedTransaction> {
		let signer_key = if signature.public_key.is_empty() {
			self.public_key.to_vec()
		} else {
			signature.public_key.clone()
		};
		Ok(SignedTransaction {
			transaction: unsigned,
			signature: signature.rs()?,
			signer_key,
		})
	}

	fn verify(&self, signed: &SignedTransaction) -> Result<()> {
		if signed.signer_key != signed.transaction.public_key {
			return Err(Error::AddressMismatch {
				derived: hex::encode(&signed.signer_key),
				expected: self.account.delegator.clone(),
			});
		}
		if !crypto::verify_ed25519(
			&signed.transaction.public_key,
			&signed.transaction.hash(),
			&signed.signature,
		) {
			return Err(Error::BackendProtocolViolation(
				"signature does not verify against the transaction hash".into(),
			));
		}
		Ok(())
	}

	fn describe(&self, signed: &SignedTransaction) -> Value {
		signed.to_json()
	}

	async fn broadcast(&self, signed: &SignedTransaction) -> Result<BroadcastReceipt> {
		self.state.broadcast(&signed.to_bytes()).await
	}

	fn explorer_link(&self, _signed: &SignedTransaction, receipt: &BroadcastReceipt) -> Option<String> {
		self.network
			.explorer_url
			.as_ref()
			.map(|url| format!("{url}{}", receipt.tx_id))
	}
}
