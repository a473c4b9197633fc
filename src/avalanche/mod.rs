//! Avalanche primary network delegation and C/P cross-chain transfers.

pub mod rpc;
pub mod tx;

use std::fmt;
use std::str::FromStr;

use secp256k1::PublicKey;
use serde::Serialize;
use serde_json::Value;

use crate::amount;
use crate::config::{AvalancheNetworkConfig, Config};
use crate::crypto;
use crate::error::{Error, Result};
use crate::pipeline::{BroadcastReceipt, ChainPipeline, SignPayload, SigningAccount};
use crate::signer::{SignatureMaterial, Signer};

use self::rpc::{AvalancheState, ChainContext};
use self::tx::{
	EvmInput, EvmOutput, Id, OutputOwners, ShortId, SignedTx, TransferableInput, TransferableOutput,
	UnsignedTx, Utxo, Validator,
};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

// coreth atomic transaction gas schedule
const TX_BYTES_GAS: u64 = 1;
const COST_PER_SIGNATURE: u64 = 1_000;
const ATOMIC_TX_INTRINSIC_GAS: u64 = 10_000;
const WEI_PER_NAVAX: u128 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Chain {
	P,
	C,
	X,
}

impl fmt::Display for Chain {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::P => "P",
			Self::C => "C",
			Self::X => "X",
		})
	}
}

impl FromStr for Chain {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		match s.to_ascii_uppercase().as_str() {
			"P" => Ok(Self::P),
			"C" => Ok(Self::C),
			"X" => Ok(Self::X),
			_ => Err(Error::InvalidInput(format!("unknown chain {s:?}, expected P, C or X"))),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AvalancheOp {
	/// Delegate `amount` AVAX from the P-chain for `days` days.
	Delegate { amount: String, days: u64 },
	Export {
		source: Chain,
		destination: Chain,
		amount: String,
	},
	/// Import everything previously exported from `source`.
	Import { source: Chain, destination: Chain },
}

/// Only C <-> P transfers are supported.
pub fn validate_chains(source: Chain, destination: Chain) -> Result<()> {
	let supported = |c: Chain| matches!(c, Chain::C | Chain::P);
	if !supported(source) || !supported(destination) {
		return Err(Error::InvalidInput(format!(
			"unsupported chain pair {source} -> {destination}: only C and P are supported"
		)));
	}
	if source == destination {
		return Err(Error::InvalidInput(format!(
			"source and destination chain must differ, got {source} twice"
		)));
	}
	Ok(())
}

// -- Addresses --

/// Every address controlled by one secp256k1 key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct KeyInfo {
	pub vault_name: String,
	pub c_chain: String,
	pub p_chain: String,
	pub x_chain: String,
	pub c_chain_core: String,
}

#[derive(Debug, Clone)]
struct Addresses {
	short: ShortId,
	evm: [u8; 20],
	c_address: String,
	p_bech: String,
	c_bech: String,
	x_bech: String,
}

impl Addresses {
	fn derive(hrp: &str, public_key: &PublicKey) -> Result<Self> {
		let short = crypto::hash160(&public_key.serialize());
		let c_address = crypto::eth_address(public_key);
		let mut evm = [0u8; 20];
		hex::decode_to_slice(&c_address[2..], &mut evm)
			.map_err(|e| Error::Codec(format!("invalid evm address: {e}")))?;

		let bech = crypto::bech32_encode(hrp, &short)?;
		Ok(Self {
			short,
			evm,
			c_address,
			p_bech: format!("P-{bech}"),
			c_bech: format!("C-{bech}"),
			x_bech: format!("X-{bech}"),
		})
	}
}

/// Addresses of `public_key` for the `keys get` listing.
pub fn key_info(vault_name: &str, hrp: &str, public_key: &[u8]) -> Result<KeyInfo> {
	let addrs = Addresses::derive(hrp, &crypto::parse_secp256k1(public_key)?)?;
	Ok(KeyInfo {
		vault_name: vault_name.to_owned(),
		c_chain: addrs.c_address,
		p_chain: addrs.p_bech,
		x_chain: addrs.x_bech,
		c_chain_core: addrs.c_bech,
	})
}

fn check_delegator(account: &SigningAccount, public_key: &PublicKey) -> Result<()> {
	let c_address = crypto::eth_address(public_key);
	if c_address.eq_ignore_ascii_case(&account.delegator) {
		return Ok(());
	}
	account.expect_delegator(&c_address)
}

// -- Fees and spending --

/// Dynamic fee in nAVAX of a C-chain atomic transaction. The base fee is
/// truncated to whole nAVAX before multiplying.
pub fn c_chain_fee(tx: &UnsignedTx, base_fee_wei: u128) -> Result<u64> {
	let gas = tx.signed_len() as u64 * TX_BYTES_GAS
		+ tx.credential_count() as u64 * COST_PER_SIGNATURE
		+ ATOMIC_TX_INTRINSIC_GAS;
	let fee = u128::from(gas) * (base_fee_wei / WEI_PER_NAVAX);
	u64::try_from(fee).map_err(|_| Error::ChainRpc(format!("fee of {fee} nAVAX is out of range")))
}

fn checked_add(a: u64, b: u64, what: &str) -> Result<u64> {
	a.checked_add(b)
		.ok_or_else(|| Error::InvalidInput(format!("{what} overflows: {a} + {b} nAVAX")))
}

/// Pick unlocked AVAX UTXOs of `owner` until `needed` is covered.
/// Returns the sorted inputs and the change left over.
fn spend(utxos: &[Utxo], owner: &ShortId, asset: &Id, needed: u64) -> Result<(Vec<TransferableInput>, u64)> {
	let mut inputs = Vec::new();
	let mut total: u64 = 0;
	for utxo in utxos {
		if total >= needed && !inputs.is_empty() {
			break;
		}
		if utxo.asset_id != *asset || utxo.owners.locktime != 0 || utxo.owners.threshold > 1 {
			continue;
		}
		if let Some(input) = utxo.spend_by(owner) {
			total = total.saturating_add(input.amount);
			inputs.push(input);
		}
	}
	if total < needed || inputs.is_empty() {
		return Err(Error::InvalidInput(format!(
			"insufficient funds: need {needed} nAVAX, spendable {total} nAVAX"
		)));
	}
	tx::sort_inputs(&mut inputs);
	Ok((inputs, total - needed))
}

/// Every spendable input of `owner`, for imports.
fn spend_all(utxos: &[Utxo], owner: &ShortId, asset: &Id) -> (Vec<TransferableInput>, u64) {
	let mut inputs: Vec<TransferableInput> = utxos
		.iter()
		.filter(|u| u.asset_id == *asset && u.owners.locktime == 0 && u.owners.threshold <= 1)
		.filter_map(|u| u.spend_by(owner))
		.collect();
	tx::sort_inputs(&mut inputs);
	let total = inputs.iter().map(|i| i.amount).fold(0u64, u64::saturating_add);
	(inputs, total)
}

/// Chain a transaction is issued on.
pub fn issuing_chain(tx: &UnsignedTx) -> Chain {
	match tx {
		UnsignedTx::PImport { .. } | UnsignedTx::PExport { .. } | UnsignedTx::PAddDelegator { .. } => Chain::P,
		UnsignedTx::CImport { .. } | UnsignedTx::CExport { .. } => Chain::C,
	}
}

// -- Pipeline --

pub struct AvalanchePipeline<S> {
	account: SigningAccount,
	network: AvalancheNetworkConfig,
	public_key: PublicKey,
	addrs: Addresses,
	validator: String,
	state: S,
}

impl<S: AvalancheState> AvalanchePipeline<S> {
	pub async fn init(signer: &Signer, config: &Config, state: S) -> Result<Self> {
		let network = config.network::<AvalancheNetworkConfig>()?.clone();
		let account = SigningAccount::resolve(
			signer,
			&config.fireblocks.vault_name,
			&config.fireblocks.asset_id,
			&config.delegator_address,
		)
		.await?;

		let public_key = crypto::parse_secp256k1(&account.public_key.public_key)?;
		check_delegator(&account, &public_key)?;
		let addrs = Addresses::derive(&network.hrp, &public_key)?;

		tracing::info!(target: "avalanche", c_chain = %addrs.c_address, p_chain = %addrs.p_bech, "avalanche pipeline ready");
		Ok(Self {
			account,
			network,
			public_key,
			addrs,
			validator: config.validator_address.clone(),
			state,
		})
	}

	fn navax(&self, amount: &str) -> Result<u64> {
		amount::to_base_units_u64(amount, self.network.decimals)
	}

	pub async fn build(&self, op: &AvalancheOp) -> Result<UnsignedTx> {
		let ctx = self.state.context().await?;
		match op {
			AvalancheOp::Delegate { amount, days } => self.delegate(&ctx, amount, *days).await,
			AvalancheOp::Export {
				source,
				destination,
				amount,
			} => {
				validate_chains(*source, *destination)?;
				let amount = self.navax(amount)?;
				match source {
					Chain::C => self.export_from_c(&ctx, *destination, amount).await,
					_ => self.export_from_p(&ctx, *destination, amount).await,
				}
			}
			AvalancheOp::Import { source, destination } => {
				validate_chains(*source, *destination)?;
				match destination {
					Chain::C => self.import_to_c(&ctx, *source).await,
					_ => self.import_to_p(&ctx, *source).await,
				}
			}
		}
	}

	async fn delegate(&self, ctx: &ChainContext, amount: &str, days: u64) -> Result<UnsignedTx> {
		if days == 0 {
			return Err(Error::InvalidInput("number of days must be greater than 0".into()));
		}
		let weight = self.navax(amount)?;
		let node_id = tx::parse_node_id(&self.validator)?;
		let start = self.state.timestamp().await?;
		let end = days
			.checked_mul(SECONDS_PER_DAY)
			.and_then(|secs| start.checked_add(secs))
			.ok_or_else(|| Error::InvalidInput(format!("delegation of {days} days ends out of range")))?;

		let utxos = self.state.utxos(Chain::P, &self.addrs.p_bech, None).await?;
		let (inputs, change) = spend(
			&utxos,
			&self.addrs.short,
			&ctx.avax_asset,
			checked_add(weight, self.network.p_chain_fee, "stake plus fee")?,
		)?;

		Ok(UnsignedTx::PAddDelegator {
			base: self.p_base(ctx, inputs, change),
			validator: Validator {
				node_id,
				start,
				end,
				weight,
			},
			subnet_id: [0; 32],
			stake_outputs: vec![TransferableOutput::new(ctx.avax_asset, weight, self.addrs.short)],
			rewards_owner: OutputOwners::single(self.addrs.short),
		})
	}

	async fn export_from_p(&self, ctx: &ChainContext, destination: Chain, amount: u64) -> Result<UnsignedTx> {
		let utxos = self.state.utxos(Chain::P, &self.addrs.p_bech, None).await?;
		let (inputs, change) = spend(
			&utxos,
			&self.addrs.short,
			&ctx.avax_asset,
			checked_add(amount, self.network.p_chain_fee, "export plus fee")?,
		)?;
		Ok(UnsignedTx::PExport {
			base: self.p_base(ctx, inputs, change),
			destination_chain: ctx.chain_id(destination),
			exported_outputs: vec![TransferableOutput::new(ctx.avax_asset, amount, self.addrs.short)],
		})
	}

	async fn export_from_c(&self, ctx: &ChainContext, destination: Chain, amount: u64) -> Result<UnsignedTx> {
		let nonce = self.state.nonce(&self.addrs.c_address).await?;
		let base_fee = self.state.base_fee().await?;

		let with_fee = |fee: u64| -> Result<UnsignedTx> {
			Ok(UnsignedTx::CExport {
				network_id: ctx.network_id,
				blockchain_id: ctx.c_chain,
				destination_chain: ctx.chain_id(destination),
				inputs: vec![EvmInput {
					address: self.addrs.evm,
					amount: checked_add(amount, fee, "export plus fee")?,
					asset_id: ctx.avax_asset,
					nonce,
				}],
				exported_outputs: vec![TransferableOutput::new(ctx.avax_asset, amount, self.addrs.short)],
			})
		};
		// the encoded size does not depend on the amounts
		let fee = c_chain_fee(&with_fee(0)?, base_fee)?;
		tracing::debug!(target: "avalanche", fee, "c-chain export fee");
		with_fee(fee)
	}

	async fn import_to_p(&self, ctx: &ChainContext, source: Chain) -> Result<UnsignedTx> {
		let utxos = self
			.state
			.utxos(Chain::P, &self.addrs.p_bech, Some(source))
			.await?;
		let (imported_inputs, total) = spend_all(&utxos, &self.addrs.short, &ctx.avax_asset);
		let fee = self.network.p_chain_fee;
		if imported_inputs.is_empty() || total <= fee {
			return Err(Error::InvalidInput(format!(
				"nothing to import from {source}: {total} nAVAX available, fee is {fee} nAVAX"
			)));
		}

		Ok(UnsignedTx::PImport {
			base: tx::BaseTx {
				network_id: ctx.network_id,
				blockchain_id: ctx.p_chain,
				outputs: vec![TransferableOutput::new(ctx.avax_asset, total - fee, self.addrs.short)],
				inputs: Vec::new(),
				memo: Vec::new(),
			},
			source_chain: ctx.chain_id(source),
			imported_inputs,
		})
	}

	async fn import_to_c(&self, ctx: &ChainContext, source: Chain) -> Result<UnsignedTx> {
		let utxos = self
			.state
			.utxos(Chain::C, &self.addrs.c_bech, Some(source))
			.await?;
		let (imported_inputs, total) = spend_all(&utxos, &self.addrs.short, &ctx.avax_asset);
		let base_fee = self.state.base_fee().await?;

		let with_fee = |fee: u64| UnsignedTx::CImport {
			network_id: ctx.network_id,
			blockchain_id: ctx.c_chain,
			source_chain: ctx.chain_id(source),
			imported_inputs: imported_inputs.clone(),
			outputs: vec![EvmOutput {
				address: self.addrs.evm,
				amount: total.saturating_sub(fee),
				asset_id: ctx.avax_asset,
			}],
		};
		let fee = c_chain_fee(&with_fee(0), base_fee)?;
		if imported_inputs.is_empty() || total <= fee {
			return Err(Error::InvalidInput(format!(
				"nothing to import from {source}: {total} nAVAX available, fee is {fee} nAVAX"
			)));
		}
		Ok(with_fee(fee))
	}

	fn p_base(&self, ctx: &ChainContext, inputs: Vec<TransferableInput>, change: u64) -> tx::BaseTx {
		let mut outputs = Vec::new();
		if change > 0 {
			outputs.push(TransferableOutput::new(ctx.avax_asset, change, self.addrs.short));
		}
		tx::sort_outputs(&mut outputs);
		tx::BaseTx {
			network_id: ctx.network_id,
			blockchain_id: ctx.p_chain,
			outputs,
			inputs,
			memo: Vec::new(),
		}
	}
}

#[async_trait::async_trait]
impl<S: AvalancheState> ChainPipeline for AvalanchePipeline<S> {
	type Unsigned = UnsignedTx;
	type Signed = SignedTx;

	fn account(&self) -> &SigningAccount {
		&self.account
	}

	fn digest(&self, unsigned: &UnsignedTx) -> Result<SignPayload> {
		Ok(SignPayload {
			message: crypto::sha256(&unsigned.to_bytes()).to_vec(),
			note: format!(
				"{} on the {}-chain from {}",
				unsigned.kind(),
				issuing_chain(unsigned),
				self.account.delegator
			),
		})
	}

	fn assemble(&self, unsigned: UnsignedTx, signature: &SignatureMaterial) -> Result<SignedTx> {
		let digest = crypto::sha256(&unsigned.to_bytes());
		let (rs, flipped) = crypto::normalize_s(&signature.rs()?)?;

		let reported = if signature.public_key.is_empty() {
			self.public_key
		} else {
			crypto::parse_secp256k1(&signature.public_key)?
		};
		let v = match signature.recovery_id() {
			Some(v) => v ^ u8::from(flipped),
			None => crypto::find_recovery_id(&digest, &rs, &reported).ok_or_else(|| {
				Error::BackendProtocolViolation("no recovery id matches the reported public key".into())
			})?,
		};

		let mut credential = [0u8; 65];
		credential[..64].copy_from_slice(&rs);
		credential[64] = v;

		Ok(SignedTx {
			credentials: vec![credential; unsigned.credential_count()],
			unsigned,
			signer_key: reported.serialize().to_vec(),
		})
	}

	fn verify(&self, signed: &SignedTx) -> Result<()> {
		let digest = crypto::sha256(&signed.unsigned.to_bytes());
		if signed.credentials.len() != signed.unsigned.credential_count() || signed.credentials.is_empty() {
			return Err(Error::BackendProtocolViolation(format!(
				"expected {} credentials, got {}",
				signed.unsigned.credential_count(),
				signed.credentials.len()
			)));
		}

		for credential in &signed.credentials {
			let rs: [u8; 64] = credential[..64]
				.try_into()
				.map_err(|_| Error::Codec("short credential".into()))?;
			let recovered = crypto::recover_ecdsa(&digest, &rs, credential[64])?;
			check_delegator(&self.account, &recovered)?;

			if !crypto::verify_ecdsa(&self.public_key, &digest, &rs) {
				return Err(Error::BackendProtocolViolation(
					"signature does not verify against the transaction hash".into(),
				));
			}
		}
		Ok(())
	}

	fn describe(&self, signed: &SignedTx) -> Value {
		signed.to_json()
	}

	async fn broadcast(&self, signed: &SignedTx) -> Result<BroadcastReceipt> {
		let chain = issuing_chain(&signed.unsigned);
		let tx_id = self.state.issue(chain, &signed.to_bytes()).await?;
		if tx_id != signed.tx_id() {
			tracing::warn!(target: "avalanche", issued = %tx_id, computed = %signed.tx_id(), "node reported a different tx id");
		}
		Ok(BroadcastReceipt::accepted(tx_id))
	}

	fn explorer_link(&self, signed: &SignedTx, receipt: &BroadcastReceipt) -> Option<String> {
		let chain = issuing_chain(&signed.unsigned).to_string().to_lowercase();
		self.network.block_explorer_url.as_ref().map(|url| {
			format!("{}/{chain}/tx/{}", url.trim_end_matches('/'), receipt.tx_id)
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::journal::tests::MemoryJournal;
	use crate::pipeline::{Flow, Stage};
	use crate::prompt::FixedAnswer;
	use crate::signer::local::LocalKeyBackend;
	use crate::signer::{KeyAlgorithm, PollPolicy};
	use std::sync::Mutex;

	const ABANDON: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
	const AVAX: Id = [0x3d; 32];

	struct FakeAvalanche {
		owner: ShortId,
		utxos: Vec<Utxo>,
		issued: Mutex<Vec<(Chain, Vec<u8>)>>,
	}

	impl FakeAvalanche {
		fn with_balance(owner: ShortId, amounts: &[u64]) -> Self {
			let utxos = amounts
				.iter()
				.enumerate()
				.map(|(i, &amount)| Utxo {
					tx_id: [i as u8 + 1; 32],
					output_index: 0,
					asset_id: AVAX,
					amount,
					owners: OutputOwners::single(owner),
				})
				.collect();
			Self {
				owner,
				utxos,
				issued: Mutex::new(Vec::new()),
			}
		}
	}

	#[async_trait::async_trait]
	impl AvalancheState for FakeAvalanche {
		async fn context(&self) -> Result<ChainContext> {
			Ok(ChainContext {
				network_id: 5,
				p_chain: [0; 32],
				c_chain: [0xc; 32],
				x_chain: [0xa; 32],
				avax_asset: AVAX,
			})
		}

		async fn timestamp(&self) -> Result<u64> {
			Ok(1_700_000_000)
		}

		async fn utxos(&self, _chain: Chain, address: &str, _source: Option<Chain>) -> Result<Vec<Utxo>> {
			let (_, data) = crypto::bech32_decode(&address[2..])?;
			assert_eq!(data, self.owner);
			Ok(self.utxos.clone())
		}

		async fn base_fee(&self) -> Result<u128> {
			Ok(25_000_000_000)
		}

		async fn nonce(&self, _address: &str) -> Result<u64> {
			Ok(7)
		}

		async fn issue(&self, chain: Chain, tx: &[u8]) -> Result<String> {
			self.issued.lock().unwrap().push((chain, tx.to_vec()));
			Ok(crypto::cb58_encode(&crypto::sha256(tx)))
		}
	}

	fn signer() -> Signer {
		let backend =
			LocalKeyBackend::from_mnemonic(ABANDON, "m/44'/9000'/0'/0/0", KeyAlgorithm::Secp256k1, "avax").unwrap();
		Signer::new(Box::new(backend), PollPolicy::default())
	}

	async fn public_key(signer: &Signer) -> PublicKey {
		let vault = signer.get_vault("avax").await.unwrap();
		crypto::parse_secp256k1(&signer.public_key(&vault, "AVAXTEST").await.unwrap().public_key).unwrap()
	}

	fn config(delegator: &str) -> Config {
		Config::parse(&format!(
			r#"
validator_address = "NodeID-{node}"
delegator_address = "{delegator}"
network_type = "avalanche"

[fireblocks]
api_secret_key_path = "unused"
api_key_path = "unused"
vault_name = "avax"
asset_id = "AVAXTEST"

[avalanche]
rpc_url = "https://api.avax-test.network"
block_explorer_url = "https://subnets-test.avax.network/"
"#,
			node = crypto::cb58_encode(&[0x11; 20])
		))
		.unwrap()
	}

	async fn pipeline(amounts: &[u64]) -> (Signer, AvalanchePipeline<FakeAvalanche>) {
		let signer = signer();
		let pk = public_key(&signer).await;
		let owner = crypto::hash160(&pk.serialize());
		let config = config(&crypto::eth_address(&pk).to_uppercase().replacen("0X", "0x", 1));
		let pipeline = AvalanchePipeline::init(&signer, &config, FakeAvalanche::with_balance(owner, amounts))
			.await
			.unwrap();
		(signer, pipeline)
	}

	#[test]
	fn chain_pairs() {
		assert!(validate_chains(Chain::C, Chain::P).is_ok());
		assert!(validate_chains(Chain::P, Chain::C).is_ok());
		assert!(validate_chains(Chain::P, Chain::P).is_err());
		assert!(validate_chains(Chain::X, Chain::P).is_err());
		assert_eq!("c".parse::<Chain>().unwrap(), Chain::C);
		assert!("Z".parse::<Chain>().is_err());
	}

	#[tokio::test(start_paused = true)]
	async fn delegate_spends_and_stakes() {
		let (signer, pipeline) = pipeline(&[600_000_000, 30_000_000_000]).await;
		let tx = pipeline
			.build(&AvalancheOp::Delegate {
				amount: "25".into(),
				days: 14,
			})
			.await
			.unwrap();

		match &tx {
			UnsignedTx::PAddDelegator {
				base,
				validator,
				stake_outputs,
				..
			} => {
				assert_eq!(validator.weight, 25_000_000_000);
				assert_eq!(validator.end - validator.start, 14 * SECONDS_PER_DAY);
				assert_eq!(validator.node_id, [0x11; 20]);
				assert_eq!(stake_outputs[0].amount, 25_000_000_000);
				let spent: u64 = base.inputs.iter().map(|i| i.amount).sum();
				let change: u64 = base.outputs.iter().map(|o| o.amount).sum();
				assert_eq!(spent - change, 25_000_000_000 + 1_000_000);
			}
			other => panic!("unexpected tx {other:?}"),
		}

		let journal = MemoryJournal::default();
		let yes = FixedAnswer(true);
		let mut flow = Flow::new(&signer, &journal, &yes);
		let signed = flow.sign(&pipeline, tx).await.unwrap();
		assert_eq!(signed.credentials.len(), 2);
		let receipt = flow.broadcast(&pipeline, &signed, true).await.unwrap().unwrap();

		assert_eq!(flow.stage(), Stage::Broadcast);
		assert_eq!(receipt.tx_id, signed.tx_id());
		let issued = pipeline.state.issued.lock().unwrap();
		assert_eq!(issued.len(), 1);
		assert_eq!(issued[0].0, Chain::P);
		assert_eq!(
			pipeline.explorer_link(&signed, &receipt).unwrap(),
			format!("https://subnets-test.avax.network/p/tx/{}", receipt.tx_id)
		);
	}

	#[tokio::test]
	async fn zero_days_is_rejected() {
		let (_, pipeline) = pipeline(&[1_000_000_000]).await;
		let err = pipeline
			.build(&AvalancheOp::Delegate {
				amount: "1".into(),
				days: 0,
			})
			.await
			.unwrap_err();
		assert!(matches!(err, Error::InvalidInput(_)));
	}

	#[tokio::test]
	async fn insufficient_funds() {
		let (_, pipeline) = pipeline(&[1_000_000]).await;
		let err = pipeline
			.build(&AvalancheOp::Export {
				source: Chain::P,
				destination: Chain::C,
				amount: "1".into(),
			})
			.await
			.unwrap_err();
		assert!(err.to_string().contains("insufficient funds"));
	}

	#[tokio::test]
	async fn c_export_pays_gas_fee() {
		let (_, pipeline) = pipeline(&[]).await;
		let tx = pipeline
			.build(&AvalancheOp::Export {
				source: Chain::C,
				destination: Chain::P,
				amount: "2".into(),
			})
			.await
			.unwrap();
		let expected_fee = c_chain_fee(&tx, 25_000_000_000).unwrap();
		assert!(expected_fee > 0);
		match &tx {
			UnsignedTx::CExport {
				inputs, destination_chain, ..
			} => {
				assert_eq!(inputs[0].nonce, 7);
				assert_eq!(inputs[0].amount, 2_000_000_000 + expected_fee);
				assert_eq!(*destination_chain, [0; 32]);
			}
			other => panic!("unexpected tx {other:?}"),
		}
		assert_eq!(issuing_chain(&tx), Chain::C);
	}

	#[tokio::test(start_paused = true)]
	async fn signed_c_export_matches_recorded_bytes() {
		let (signer, pipeline) = pipeline(&[]).await;
		assert_eq!(
			pipeline.addrs.c_address.to_lowercase(),
			"0x38edc949dac6a37cf9d825e26f64aa2cb323cd82"
		);
		let tx = pipeline
			.build(&AvalancheOp::Export {
				source: Chain::C,
				destination: Chain::P,
				amount: "2".into(),
			})
			.await
			.unwrap();
		assert_eq!(tx.to_bytes().len(), 230);
		assert_eq!(c_chain_fee(&tx, 25_000_000_000).unwrap(), 282_675);
		assert_eq!(
			hex::encode(pipeline.digest(&tx).unwrap().message),
			"ddf05a6605b263153fe45d8d8317852f82163101cb68814031da9cb799487cd4"
		);

		let journal = MemoryJournal::default();
		let yes = FixedAnswer(true);
		let signed = Flow::new(&signer, &journal, &yes).sign(&pipeline, tx).await.unwrap();
		let expected = concat!(
			"000000000001000000050c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c",
			"0c0c0c0c0c0c0c0c0c0c00000000000000000000000000000000000000000000",
			"000000000000000000000000000138edc949dac6a37cf9d825e26f64aa2cb323",
			"cd82000000007739e4333d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d",
			"3d3d3d3d3d3d3d3d3d3d0000000000000007000000013d3d3d3d3d3d3d3d3d3d",
			"3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d3d00000007000000007735",
			"9400000000000000000000000001000000010969ea62e2bb30e66d82e82fe267",
			"edf6871ea5f7000000010000000900000001e74f7be9988ca6296590cbd7e4eb",
			"d8d1612728aac8369d2a9de8e978849ad94661c0a37c282e98cdad8d5a010ac4",
			"d1067b00d8f9223bf914fcb68edc5055c0d000",
		);
		assert_eq!(hex::encode(signed.to_bytes()), expected);
		assert_eq!(signed.tx_id(), "fv6rX125EaWh2wtMpnmLgPSJuD65oNVysP8V3tPFVwAdMdHQu");
	}

	#[tokio::test]
	async fn overflowing_amounts_are_rejected() {
		let (_, pipeline) = pipeline(&[1_000_000_000]).await;
		let max = "18446744073.709551615";

		let err = pipeline
			.build(&AvalancheOp::Delegate {
				amount: "1".into(),
				days: u64::MAX / 2,
			})
			.await
			.unwrap_err();
		assert!(matches!(err, Error::InvalidInput(_)), "{err}");

		let err = pipeline
			.build(&AvalancheOp::Delegate {
				amount: max.into(),
				days: 14,
			})
			.await
			.unwrap_err();
		assert!(err.to_string().contains("overflows"), "{err}");

		for source in [Chain::P, Chain::C] {
			let destination = if source == Chain::P { Chain::C } else { Chain::P };
			let err = pipeline
				.build(&AvalancheOp::Export {
					source,
					destination,
					amount: max.into(),
				})
				.await
				.unwrap_err();
			assert!(err.to_string().contains("overflows"), "{source}: {err}");
		}
	}

	#[tokio::test]
	async fn import_to_p_deducts_fee() {
		let (_, pipeline) = pipeline(&[3_000_000, 2_000_000]).await;
		let tx = pipeline
			.build(&AvalancheOp::Import {
				source: Chain::C,
				destination: Chain::P,
			})
			.await
			.unwrap();
		match &tx {
			UnsignedTx::PImport {
				base,
				imported_inputs,
				source_chain,
			} => {
				assert_eq!(imported_inputs.len(), 2);
				assert!(imported_inputs[0].tx_id < imported_inputs[1].tx_id);
				assert_eq!(base.outputs[0].amount, 4_000_000);
				assert_eq!(*source_chain, [0xc; 32]);
			}
			other => panic!("unexpected tx {other:?}"),
		}
	}

	#[tokio::test]
	async fn import_with_nothing_exported_fails() {
		let (_, pipeline) = pipeline(&[]).await;
		let err = pipeline
			.build(&AvalancheOp::Import {
				source: Chain::P,
				destination: Chain::C,
			})
			.await
			.unwrap_err();
		assert!(matches!(err, Error::InvalidInput(_)));
	}

	#[tokio::test]
	async fn init_rejects_other_delegator() {
		let err = AvalanchePipeline::init(
			&signer(),
			&config("0x0000000000000000000000000000000000000001"),
			FakeAvalanche::with_balance([0; 20], &[]),
		)
		.await
		.err()
		.unwrap();
		assert!(matches!(err, Error::AddressMismatch { .. }));
	}

	#[tokio::test]
	async fn keys_cover_every_chain() {
		let pk = public_key(&signer()).await;
		let info = key_info("avax", "fuji", &pk.serialize()).unwrap();
		assert_eq!(info.vault_name, "avax");
		assert!(info.p_chain.starts_with("P-fuji1"));
		assert!(info.x_chain.starts_with("X-fuji1"));
		assert_eq!(info.p_chain[2..], info.c_chain_core[2..]);
		assert!(info.c_chain.starts_with("0x"));

		let json = serde_json::to_value(&info).unwrap();
		assert!(json.get("c-chain-core").is_some());
		assert!(json.get("vault-name").is_some());
	}

	#[tokio::test(start_paused = true)]
	async fn high_s_signature_is_normalized() {
		let (_, pipeline) = pipeline(&[5_000_000_000]).await;
		let tx = pipeline
			.build(&AvalancheOp::Export {
				source: Chain::P,
				destination: Chain::C,
				amount: "1".into(),
			})
			.await
			.unwrap();
		let payload = pipeline.digest(&tx).unwrap();

		let signer = signer();
		let vault = signer.get_vault("avax").await.unwrap();
		let mut sig = signer
			.request_signature(&vault, "AVAXTEST", "", &hex::encode(&payload.message), &payload.note)
			.await
			.unwrap();

		// flip s to the high half and the recovery id with it
		let rs = sig.rs().unwrap();
		let order = secp256k1::constants::CURVE_ORDER;
		let mut high = [0u8; 32];
		let mut borrow = 0i16;
		for i in (0..32).rev() {
			let d = i16::from(order[i]) - i16::from(rs[32 + i]) - borrow;
			borrow = i16::from(d < 0);
			high[i] = (d + 256 * borrow) as u8;
		}
		sig.s = high.to_vec();
		sig.r = rs[..32].to_vec();
		sig.v = sig.v.map(|v| v ^ 1);

		let signed = pipeline.assemble(tx, &sig).unwrap();
		pipeline.verify(&signed).unwrap();
		assert_eq!(signed.credentials[0][32..64], rs[32..]);
	}
}
