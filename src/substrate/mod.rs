//! Substrate staking pallet extrinsics signed with ed25519.

pub mod rpc;
pub mod tx;

use serde_json::Value;

use crate::amount;
use crate::config::{Config, SubstrateNetworkConfig};
use crate::crypto;
use crate::error::{Error, Result};
use crate::pipeline::{BroadcastReceipt, ChainPipeline, SignPayload, SigningAccount};
use crate::signer::{SignatureMaterial, Signer};

use self::rpc::SubstrateState;
use self::tx::{Call, Payee, SignedExtrinsic, UnsignedExtrinsic};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubstrateOp {
	/// First bond of funds from the stash.
	Delegate { amount: String },
	BondExtra { amount: String },
	/// Nominate the configured validators with the bonded funds.
	Nominate,
	Unbond { amount: String },
	/// Withdraw everything that finished unbonding.
	Withdraw,
}

pub struct SubstratePipeline<S> {
	account: SigningAccount,
	network: SubstrateNetworkConfig,
	signer_key: [u8; 32],
	validators: String,
	state: S,
}

impl<S: SubstrateState> SubstratePipeline<S> {
	pub async fn init(signer: &Signer, config: &Config, state: S) -> Result<Self> {
		let network = config.network::<SubstrateNetworkConfig>()?.clone();
		let account = SigningAccount::resolve(
			signer,
			&config.fireblocks.vault_name,
			&config.fireblocks.asset_id,
			&config.delegator_address,
		)
		.await?;

		let signer_key: [u8; 32] = account.public_key.public_key.as_slice().try_into().map_err(|_| {
			Error::BackendProtocolViolation(format!(
				"expected a 32-byte ed25519 key, got {} bytes",
				account.public_key.public_key.len()
			))
		})?;
		account.expect_delegator(&crypto::ss58_encode(network.ss58_prefix, &signer_key))?;

		if let Some(deposit) = signer.deposit_address(&account.vault, &account.asset_id).await? {
			if deposit != account.delegator {
				return Err(Error::AddressMismatch {
					derived: deposit,
					expected: account.delegator.clone(),
				});
			}
		}

		tracing::info!(target: "substrate", delegator = %account.delegator, "substrate pipeline ready");
		Ok(Self {
			account,
			network,
			signer_key,
			validators: config.validator_address.clone(),
			state,
		})
	}

	fn call(&self, op: &SubstrateOp) -> Result<Call> {
		let units = |a: &str| amount::to_base_units(a, self.network.decimals);
		Ok(match op {
			SubstrateOp::Delegate { amount } => Call::Bond {
				value: units(amount)?,
				payee: Payee::from_config(&self.network.reward_destination)?,
			},
			SubstrateOp::BondExtra { amount } => Call::BondExtra {
				value: units(amount)?,
			},
			SubstrateOp::Nominate => Call::Nominate {
				targets: tx::parse_targets(&self.validators)?,
			},
			SubstrateOp::Unbond { amount } => Call::Unbond {
				value: units(amount)?,
			},
			SubstrateOp::Withdraw => Call::WithdrawUnbonded {
				num_slashing_spans: 0,
			},
		})
	}

	pub async fn build(&self, op: &SubstrateOp) -> Result<UnsignedExtrinsic> {
		let call = self.call(op)?;
		let nonce = self.state.next_index(&self.account.delegator).await?;
		let genesis_hash = self.state.genesis_hash().await?;
		let version = self.state.runtime_version().await?;

		Ok(UnsignedExtrinsic {
			call,
			pallet_index: self.network.staking_pallet_index,
			signer: self.signer_key,
			ss58_prefix: self.network.ss58_prefix,
			nonce,
			spec_version: version.spec_version,
			transaction_version: version.transaction_version,
			genesis_hash,
			check_metadata_hash: self.network.check_metadata_hash,
		})
	}
}

#[async_trait::async_trait]
impl<S: SubstrateState> ChainPipeline for SubstratePipeline<S> {
	type Unsigned = UnsignedExtrinsic;
	type Signed = SignedExtrinsic;

	fn account(&self) -> &SigningAccount {
		&self.account
	}

	fn digest(&self, unsigned: &UnsignedExtrinsic) -> Result<SignPayload> {
		Ok(SignPayload {
			message: unsigned.signing_payload(),
			note: format!("staking.{} from {}", unsigned.call.method(), self.account.delegator),
		})
	}

	fn assemble(&self, unsigned: UnsignedExtrinsic, signature: &SignatureMaterial) -> Result<SignedExtrinsic> {
		let signer_key = if signature.public_key.is_empty() {
			self.signer_key.to_vec()
		} else {
			signature.public_key.clone()
		};
		Ok(SignedExtrinsic {
			unsigned,
			signature: signature.rs()?,
			signer_key,
		})
	}

	fn verify(&self, signed: &SignedExtrinsic) -> Result<()> {
		let reported: [u8; 32] = signed.signer_key.as_slice().try_into().map_err(|_| {
			Error::BackendProtocolViolation("signature carries a malformed public key".into())
		})?;
		self.account
			.expect_delegator(&crypto::ss58_encode(self.network.ss58_prefix, &reported))?;

		if !crypto::verify_ed25519(
			&signed.unsigned.signer,
			&signed.unsigned.signing_payload(),
			&signed.signature,
		) {
			return Err(Error::BackendProtocolViolation(
				"signature does not verify against the signing payload".into(),
			));
		}
		Ok(())
	}

	fn describe(&self, signed: &SignedExtrinsic) -> Value {
		signed.to_json()
	}

	async fn broadcast(&self, signed: &SignedExtrinsic) -> Result<BroadcastReceipt> {
		let hash = self.state.submit(&signed.to_bytes()).await?;
		Ok(BroadcastReceipt::accepted(hash))
	}

	fn explorer_link(&self, _signed: &SignedExtrinsic, _receipt: &BroadcastReceipt) -> Option<String> {
		self.network
			.block_explorer_url
			.as_ref()
			.map(|url| format!("{}/{}", url.trim_end_matches('/'), self.account.delegator))
	}
}

#[cfg(test)]
mod tests {
	use super::rpc::RuntimeVersion;
	use super::*;
	use crate::journal::tests::MemoryJournal;
	use crate::pipeline::{Flow, Stage};
	use crate::prompt::FixedAnswer;
	use crate::signer::local::LocalKeyBackend;
	use crate::signer::{KeyAlgorithm, PollPolicy};
	use std::sync::Mutex;

	const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
	const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";

	#[derive(Default)]
	struct FakeSubstrate {
		submitted: Mutex<Vec<Vec<u8>>>,
	}

	#[async_trait::async_trait]
	impl SubstrateState for FakeSubstrate {
		async fn next_index(&self, _address: &str) -> Result<u32> {
			Ok(3)
		}

		async fn genesis_hash(&self) -> Result<[u8; 32]> {
			Ok([0xe1; 32])
		}

		async fn runtime_version(&self) -> Result<RuntimeVersion> {
			Ok(RuntimeVersion {
				spec_version: 1_014_000,
				transaction_version: 26,
			})
		}

		async fn submit(&self, extrinsic: &[u8]) -> Result<String> {
			self.submitted.lock().unwrap().push(extrinsic.to_vec());
			Ok(format!("0x{}", hex::encode(crypto::blake2b_256(extrinsic))))
		}
	}

	fn signer(path: &str) -> Signer {
		let backend = LocalKeyBackend::from_mnemonic(ABANDON, path, KeyAlgorithm::Ed25519, "dot").unwrap();
		Signer::new(Box::new(backend), PollPolicy::default())
	}

	async fn address(signer: &Signer) -> String {
		let vault = signer.get_vault("dot").await.unwrap();
		let pk = signer.public_key(&vault, "WND").await.unwrap().public_key;
		crypto::ss58_encode(42, &pk.try_into().unwrap())
	}

	fn config(delegator: &str) -> Config {
		Config::parse(&format!(
			r#"
validator_address = "{ALICE}"
delegator_address = "{delegator}"
network_type = "substrate"

[fireblocks]
api_secret_key_path = "unused"
api_key_path = "unused"
vault_name = "dot"
asset_id = "WND"

[substrate]
rpc_url = "https://westend-rpc.polkadot.io"
decimals = 12
reward_destination = "staked"
block_explorer_url = "https://westend.subscan.io/account/"
"#
		))
		.unwrap()
	}

	#[tokio::test(start_paused = true)]
	async fn bond_is_signed_and_submitted() {
		let signer = signer("m/44'/354'/0'/0'/0'");
		let delegator = address(&signer).await;
		let pipeline = SubstratePipeline::init(&signer, &config(&delegator), FakeSubstrate::default())
			.await
			.unwrap();

		let ext = pipeline
			.build(&SubstrateOp::Delegate { amount: "1".into() })
			.await
			.unwrap();
		assert_eq!(
			ext.call,
			Call::Bond {
				value: 1_000_000_000_000,
				payee: Payee::Staked
			}
		);

		let journal = MemoryJournal::default();
		let yes = FixedAnswer(true);
		let mut flow = Flow::new(&signer, &journal, &yes);
		let signed = flow.sign(&pipeline, ext).await.unwrap();
		let receipt = flow.broadcast(&pipeline, &signed, true).await.unwrap().unwrap();

		assert_eq!(flow.stage(), Stage::Broadcast);
		assert_eq!(receipt.tx_id, format!("0x{}", hex::encode(signed.hash())));
		assert_eq!(pipeline.state.submitted.lock().unwrap().len(), 1);
		assert_eq!(
			pipeline.explorer_link(&signed, &receipt).unwrap(),
			format!("https://westend.subscan.io/account/{delegator}")
		);
	}

	#[tokio::test(start_paused = true)]
	async fn signed_bond_matches_recorded_bytes() {
		let signer = signer("m/44'/354'/0'/0'/0'");
		let delegator = address(&signer).await;
		assert_eq!(delegator, "5FHrJZLfgv3Ej8rrPbZpwjQJyV9kPwHSCUv7UhjBTv3BCHcc");
		let pipeline = SubstratePipeline::init(&signer, &config(&delegator), FakeSubstrate::default())
			.await
			.unwrap();
		let ext = pipeline
			.build(&SubstrateOp::Delegate { amount: "1".into() })
			.await
			.unwrap();
		let expected_payload = concat!(
			"0700070010a5d4e800000c0000f0780f001a000000e1e1e1e1e1e1e1e1e1e1e1",
			"e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1",
			"e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e1e100",
		);
		assert_eq!(hex::encode(pipeline.digest(&ext).unwrap().message), expected_payload);

		let journal = MemoryJournal::default();
		let yes = FixedAnswer(true);
		let signed = Flow::new(&signer, &journal, &yes).sign(&pipeline, ext).await.unwrap();
		let expected = concat!(
			"c10184008ebb52da3030f06e0c0c5f7d0fbacf6a22cedb1229bb4824a230fbe8",
			"4bf8930400046d3a093173742596222e441ca862cde8d69d4a928102db62b048",
			"53708946745e11d58882b392c5e01c5531132ba25e9bb602e0a0adcf7fd53b6d",
			"ba2b62ac04000c00000700070010a5d4e800",
		);
		assert_eq!(hex::encode(signed.to_bytes()), expected);
	}

	#[tokio::test]
	async fn init_rejects_other_address() {
		let err = SubstratePipeline::init(
			&signer("m/44'/354'/0'/0'/0'"),
			&config(ALICE),
			FakeSubstrate::default(),
		)
		.await
		.err()
		.unwrap();
		assert!(matches!(err, Error::AddressMismatch { .. }));
	}

	#[tokio::test]
	async fn nominate_uses_configured_validators() {
		let signer = signer("m/44'/354'/0'/0'/0'");
		let delegator = address(&signer).await;
		let pipeline = SubstratePipeline::init(&signer, &config(&delegator), FakeSubstrate::default())
			.await
			.unwrap();
		let ext = pipeline.build(&SubstrateOp::Nominate).await.unwrap();
		match ext.call {
			Call::Nominate { targets } => assert_eq!(targets.len(), 1),
			other => panic!("unexpected call {other:?}"),
		}
		let view = serde_json::to_value(&pipeline.build(&SubstrateOp::Withdraw).await.unwrap()).unwrap();
		assert_eq!(view["call"]["method"], "withdrawUnbonded");
		assert_eq!(view["nonce"], 3);
	}

	#[tokio::test]
	async fn too_precise_amount_is_rejected() {
		let signer = signer("m/44'/354'/0'/0'/0'");
		let delegator = address(&signer).await;
		let pipeline = SubstratePipeline::init(&signer, &config(&delegator), FakeSubstrate::default())
			.await
			.unwrap();
		let err = pipeline
			.build(&SubstrateOp::Unbond {
				amount: "0.0000000000001".into(),
			})
			.await
			.unwrap_err();
		assert!(matches!(err, Error::InvalidInput(_)));
	}
}
