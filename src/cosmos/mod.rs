//! Cosmos SDK staking: amino JSON signing, protobuf `TxRaw` broadcast.

pub mod rpc;
pub mod tx;

use serde_json::Value;

use crate::config::{Config, CosmosNetworkConfig};
use crate::crypto;
use crate::error::{Error, Result};
use crate::pipeline::{BroadcastReceipt, ChainPipeline, SignPayload, SigningAccount};
use crate::signer::{SignatureMaterial, Signer};

use self::rpc::{AccountInfo, CosmosState};
use self::tx::{Coin, Fee, Msg, SignDoc, SignedTx};

/// What the operator asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CosmosOp {
	Delegate { amount: String },
	Undelegate { amount: String },
	Redelegate { amount: String, validator_dst: String },
	/// Defaults to the configured validator.
	WithdrawRewards { validator: Option<String> },
}

pub struct CosmosPipeline<S> {
	account: SigningAccount,
	network: CosmosNetworkConfig,
	validator: String,
	chain_id: String,
	chain_account: AccountInfo,
	state: S,
}

/// bech32 account address of a compressed secp256k1 key.
pub fn address_of(prefix: &str, public_key: &[u8]) -> Result<String> {
	let pk = crypto::parse_secp256k1(public_key)?;
	crypto::bech32_encode(prefix, &crypto::hash160(&pk.serialize()))
}

impl<S: CosmosState> CosmosPipeline<S> {
	pub async fn init(signer: &Signer, config: &Config, state: S) -> Result<Self> {
		let network = config.network::<CosmosNetworkConfig>()?.clone();

		let chain_account = state
			.account(&config.delegator_address)
			.await?
			.ok_or_else(|| {
				Error::Configuration(format!(
					"failed to query account: {} are you sure the account exists?",
					config.delegator_address
				))
			})?;
		let chain_id = state.chain_id().await?;

		let account = SigningAccount::resolve(
			signer,
			&config.fireblocks.vault_name,
			&config.fireblocks.asset_id,
			&config.delegator_address,
		)
		.await?;
		account.expect_delegator(&address_of(&network.bech_prefix, &account.public_key.public_key)?)?;

		tracing::info!(
			target: "cosmos",
			%chain_id,
			account_number = chain_account.account_number,
			sequence = chain_account.sequence,
			"cosmos pipeline ready"
		);
		Ok(Self {
			account,
			network,
			validator: config.validator_address.clone(),
			chain_id,
			chain_account,
			state,
		})
	}

	pub fn build(&self, op: &CosmosOp, memo: &str) -> Result<SignDoc> {
		let delegator = self.account.delegator.clone();
		let coin = |amount: &str| Coin::parse(amount, &self.network.denom);

		let msg = match op {
			CosmosOp::Delegate { amount } => Msg::Delegate {
				delegator,
				validator: self.validator.clone(),
				amount: coin(amount)?,
			},
			CosmosOp::Undelegate { amount } => Msg::Undelegate {
				delegator,
				validator: self.validator.clone(),
				amount: coin(amount)?,
			},
			CosmosOp::Redelegate {
				amount,
				validator_dst,
			} => Msg::BeginRedelegate {
				delegator,
				validator_src: self.validator.clone(),
				validator_dst: validator_dst.clone(),
				amount: coin(amount)?,
			},
			CosmosOp::WithdrawRewards { validator } => Msg::WithdrawReward {
				delegator,
				validator: validator.clone().unwrap_or_else(|| self.validator.clone()),
			},
		};

		Ok(SignDoc {
			chain_id: self.chain_id.clone(),
			account_number: self.chain_account.account_number,
			sequence: self.chain_account.sequence,
			fee: Fee {
				amount: vec![Coin {
					denom: self.network.denom.clone(),
					amount: self.network.fee_amount()?,
				}],
				gas: self.network.gas,
			},
			memo: memo.to_owned(),
			msgs: vec![msg],
		})
	}
}

#[async_trait::async_trait]
impl<S: CosmosState> ChainPipeline for CosmosPipeline<S> {
	type Unsigned = SignDoc;
	type Signed = SignedTx;

	fn account(&self) -> &SigningAccount {
		&self.account
	}

	fn digest(&self, unsigned: &SignDoc) -> Result<SignPayload> {
		let note = serde_json::to_string_pretty(&unsigned.amino())
			.map_err(|e| Error::Codec(e.to_string()))?;
		Ok(SignPayload {
			message: crypto::sha256(&unsigned.sign_bytes()).to_vec(),
			note,
		})
	}

	fn assemble(&self, unsigned: SignDoc, signature: &SignatureMaterial) -> Result<SignedTx> {
		// the recovery id is not part of a Cosmos signature
		let (rs, _) = crypto::normalize_s(&signature.rs()?)?;

		let reported = if signature.public_key.is_empty() {
			&self.account.public_key.public_key
		} else {
			&signature.public_key
		};
		let public_key = crypto::parse_secp256k1(reported)?.serialize().to_vec();

		Ok(SignedTx {
			body_bytes: unsigned.body_bytes(),
			auth_info_bytes: unsigned.auth_info_bytes(&public_key),
			signature: rs,
			public_key,
			sign_bytes: unsigned.sign_bytes(),
		})
	}

	fn verify(&self, signed: &SignedTx) -> Result<()> {
		self.account
			.expect_delegator(&address_of(&self.network.bech_prefix, &signed.public_key)?)?;

		let pk = crypto::parse_secp256k1(&signed.public_key)?;
		if !crypto::verify_ecdsa(&pk, &crypto::sha256(&signed.sign_bytes), &signed.signature) {
			return Err(Error::BackendProtocolViolation(
				"signature does not verify against the sign doc".into(),
			));
		}
		Ok(())
	}

	fn describe(&self, signed: &SignedTx) -> Value {
		signed.to_json()
	}

	async fn broadcast(&self, signed: &SignedTx) -> Result<BroadcastReceipt> {
		self.state.broadcast(&signed.to_bytes()).await
	}

	fn explorer_link(&self, _signed: &SignedTx, receipt: &BroadcastReceipt) -> Option<String> {
		self.network
			.block_explorer_url
			.as_ref()
			.map(|url| format!("{url}{}", receipt.tx_id))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::Config;
	use crate::journal::tests::MemoryJournal;
	use crate::pipeline::{Flow, Stage};
	use crate::prompt::FixedAnswer;
	use crate::signer::local::LocalKeyBackend;
	use crate::signer::{KeyAlgorithm, PollPolicy};
	use std::sync::Mutex;

	const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
	const DELEGATOR: &str = "cosmos19rl4cm2hmr8afy4kldpxz3fka4jguq0auqdal4";

	#[derive(Default)]
	struct FakeChain {
		broadcasts: Mutex<Vec<Vec<u8>>>,
		missing: bool,
	}

	#[async_trait::async_trait]
	impl CosmosState for FakeChain {
		async fn chain_id(&self) -> Result<String> {
			Ok("cosmoshub-4".into())
		}

		async fn account(&self, _address: &str) -> Result<Option<AccountInfo>> {
			Ok((!self.missing).then_some(AccountInfo {
				account_number: 12,
				sequence: 4,
			}))
		}

		async fn broadcast(&self, tx_bytes: &[u8]) -> Result<BroadcastReceipt> {
			self.broadcasts.lock().unwrap().push(tx_bytes.to_vec());
			Ok(BroadcastReceipt::accepted("E3B0"))
		}
	}

	fn config(delegator: &str) -> Config {
		Config::parse(&format!(
			r#"
validator_address = "cosmosvaloper1sjllsnramtg3ewxqwwrwjxfgc4n4ef9u2lcnj0"
delegator_address = "{delegator}"
network_type = "cosmos"

[fireblocks]
api_secret_key_path = "unused"
api_key_path = "unused"
vault_name = "staking"
asset_id = "ATOM"

[cosmos]
rpc_url = "http://localhost:1317"
bech_prefix = "cosmos"
denom = "uatom"
gas = 250000
gas_price = 0.025
block_explorer_url = "https://mintscan.io/cosmos/tx/"
"#
		))
		.unwrap()
	}

	fn signer(path: &str) -> Signer {
		let backend =
			LocalKeyBackend::from_mnemonic(ABANDON, path, KeyAlgorithm::Secp256k1, "staking").unwrap();
		Signer::new(Box::new(backend), PollPolicy::default())
	}

	async fn sign_delegate(signer: &Signer) -> (CosmosPipeline<FakeChain>, SignedTx) {
		let pipeline = CosmosPipeline::init(signer, &config(DELEGATOR), FakeChain::default())
			.await
			.unwrap();
		let doc = pipeline
			.build(&CosmosOp::Delegate { amount: "100000uatom".into() }, "")
			.unwrap();

		let journal = MemoryJournal::default();
		let yes = FixedAnswer(true);
		let mut flow = Flow::new(signer, &journal, &yes);
		let signed = flow.sign(&pipeline, doc).await.unwrap();
		assert_eq!(flow.stage(), Stage::Verified);
		(pipeline, signed)
	}

	#[tokio::test(start_paused = true)]
	async fn delegate_is_verified_and_broadcast_once() {
		let signer = signer("m/44'/118'/0'/0/0");
		let pipeline = CosmosPipeline::init(&signer, &config(DELEGATOR), FakeChain::default())
			.await
			.unwrap();
		let doc = pipeline
			.build(&CosmosOp::Delegate { amount: "100000uatom".into() }, "")
			.unwrap();

		let journal = MemoryJournal::default();
		let yes = FixedAnswer(true);
		let mut flow = Flow::new(&signer, &journal, &yes);
		let signed = flow.sign(&pipeline, doc).await.unwrap();
		let receipt = flow.broadcast(&pipeline, &signed, true).await.unwrap().unwrap();

		assert_eq!(receipt.code, 0);
		assert_eq!(flow.stage(), Stage::Broadcast);
		assert_eq!(journal.kinds(), vec!["unsignedTx", "signedTx", "txBroadcast"]);
		let sent = pipeline.state.broadcasts.lock().unwrap();
		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0], signed.to_bytes());
		assert_eq!(
			pipeline.explorer_link(&signed, &receipt).unwrap(),
			"https://mintscan.io/cosmos/tx/E3B0"
		);
	}

	#[tokio::test(start_paused = true)]
	async fn signed_delegate_matches_recorded_bytes() {
		let (pipeline, signed) = sign_delegate(&signer("m/44'/118'/0'/0/0")).await;
		let doc = pipeline
			.build(&CosmosOp::Delegate { amount: "100000uatom".into() }, "")
			.unwrap();
		assert_eq!(
			hex::encode(pipeline.digest(&doc).unwrap().message),
			"9db790ac2b41444f0e12ce6c1e55ef5887f34f9a210c7b7ed0383696a6e99ef4"
		);

		let expected = concat!(
			"0aa0010a9d010a232f636f736d6f732e7374616b696e672e763162657461312e",
			"4d736744656c656761746512760a2d636f736d6f733139726c34636d32686d72",
			"38616679346b6c6470787a33666b61346a6775713061757164616c341234636f",
			"736d6f7376616c6f70657231736a6c6c736e72616d7467336577787177777277",
			"6a78666763346e3465663975326c636e6a301a0f0a057561746f6d1206313030",
			"30303012670a500a460a1f2f636f736d6f732e63727970746f2e736563703235",
			"366b312e5075624b657912230a21024f4e2ad99c34d60b9ba6283c9431a8418a",
			"f8673212961f97a77b6377fcd05b6212040a02087f180412130a0d0a05756174",
			"6f6d1204363235301090a10f1a40999bd5fadffa76a713f15d0dc74ebdb3020f",
			"10e84b5d3ab75d8c1050574e2b7227adecd3955fbd82a5c165427ffa1f52404b",
			"0820e895c4eac105027ab56660b0",
		);
		assert_eq!(hex::encode(signed.to_bytes()), expected);

		// low-S
		let order_half = hex::decode("7fffffffffffffffffffffffffffffff5d576e7357a4501ddfe92f46681b20a0").unwrap();
		assert!(signed.signature[32..] <= order_half[..]);
	}

	#[tokio::test(start_paused = true)]
	async fn init_rejects_key_for_other_account() {
		let err = CosmosPipeline::init(&signer("m/44'/118'/0'/0/1"), &config(DELEGATOR), FakeChain::default())
			.await
			.err()
			.unwrap();
		assert!(matches!(err, Error::AddressMismatch { .. }));
	}

	#[tokio::test]
	async fn init_requires_existing_account() {
		let chain = FakeChain {
			missing: true,
			..Default::default()
		};
		let err = CosmosPipeline::init(&signer("m/44'/118'/0'/0/0"), &config(DELEGATOR), chain)
			.await
			.err()
			.unwrap();
		assert!(err.to_string().contains("are you sure the account exists?"));
	}

	#[tokio::test(start_paused = true)]
	async fn signature_from_other_key_fails_verification() {
		let (pipeline, _) = sign_delegate(&signer("m/44'/118'/0'/0/0")).await;
		let doc = pipeline
			.build(&CosmosOp::Undelegate { amount: "5uatom".into() }, "memo")
			.unwrap();
		let digest = pipeline.digest(&doc).unwrap();

		let other = LocalKeyBackend::from_mnemonic(
			ABANDON,
			"m/44'/118'/0'/0/7",
			KeyAlgorithm::Secp256k1,
			"staking",
		)
		.unwrap();
		let other = Signer::new(Box::new(other), PollPolicy::default());
		let vault = other.get_vault("staking").await.unwrap();
		let sig = other
			.request_signature(&vault, "ATOM", DELEGATOR, &hex::encode(&digest.message), "")
			.await
			.unwrap();

		let signed = pipeline.assemble(doc, &sig).unwrap();
		assert!(matches!(
			pipeline.verify(&signed).unwrap_err(),
			Error::AddressMismatch { .. }
		));
	}

	#[tokio::test]
	async fn build_uses_config_defaults() {
		let signer = signer("m/44'/118'/0'/0/0");
		let pipeline = CosmosPipeline::init(&signer, &config(DELEGATOR), FakeChain::default())
			.await
			.unwrap();

		let doc = pipeline
			.build(&CosmosOp::WithdrawRewards { validator: None }, "")
			.unwrap();
		assert_eq!(doc.account_number, 12);
		assert_eq!(doc.sequence, 4);
		assert_eq!(doc.fee.amount[0].amount, 6250);
		assert_eq!(
			doc.amino()["msgs"][0]["value"]["validator_address"],
			"cosmosvaloper1sjllsnramtg3ewxqwwrwjxfgc4n4ef9u2lcnj0"
		);

		let err = pipeline
			.build(&CosmosOp::Delegate { amount: "10utia".into() }, "")
			.unwrap_err();
		assert!(matches!(err, Error::InvalidInput(_)));
	}
}
