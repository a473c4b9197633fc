use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::amount;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
	/// Validator to interact with (delegate, undelegate etc). Substrate
	/// nominations accept a comma-separated list.
	pub validator_address: String,

	/// The account the operator expects to control.
	pub delegator_address: String,

	pub network_type: NetworkType,

	pub fireblocks: FireblocksConfig,

	#[serde(default)]
	pub local_signer: Option<LocalSignerConfig>,

	#[serde(default)]
	pub signing: SigningConfig,

	#[serde(default = "default_journal_path")]
	pub journal_path: PathBuf,

	#[serde(default)]
	pub cosmos: Option<CosmosNetworkConfig>,
	#[serde(default)]
	pub near: Option<NearNetworkConfig>,
	#[serde(default)]
	pub substrate: Option<SubstrateNetworkConfig>,
	#[serde(default)]
	pub avalanche: Option<AvalancheNetworkConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
	Cosmos,
	Near,
	Substrate,
	Avalanche,
}

impl NetworkType {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Cosmos => "cosmos",
			Self::Near => "near",
			Self::Substrate => "substrate",
			Self::Avalanche => "avalanche",
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FireblocksConfig {
	/// File holding the RSA private key used to sign API tokens.
	pub api_secret_key_path: PathBuf,
	/// File holding the API key.
	pub api_key_path: PathBuf,
	/// Vault name, e.g. `celestia-wallet`.
	pub vault_name: String,
	/// Asset identifier, e.g. `CELESTIA` or `CELESTIA_TEST`.
	pub asset_id: String,
	#[serde(default = "default_fireblocks_url")]
	pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalSignerConfig {
	/// File containing the delegator mnemonic.
	pub mnemonic_path: PathBuf,
	/// Overrides the per-network default derivation path.
	#[serde(default)]
	pub derivation_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
	#[serde(default = "default_poll_interval")]
	pub poll_interval_secs: u64,
	/// Overall limit on waiting for a terminal status. Absent means the
	/// coordinator waits for the custodian indefinitely.
	#[serde(default)]
	pub poll_timeout_secs: Option<u64>,
}

impl Default for SigningConfig {
	fn default() -> Self {
		Self {
			poll_interval_secs: default_poll_interval(),
			poll_timeout_secs: None,
		}
	}
}

// -- Network sections --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosmosNetworkConfig {
	/// REST (LCD) endpoint, e.g. `https://api.celestia.chorus.one`.
	pub rpc_url: String,
	/// Address prefix, e.g. `celestia`.
	pub bech_prefix: String,
	/// Coin denom, e.g. `utia`.
	pub denom: String,
	pub gas: u64,
	pub gas_price: f64,
	/// Fixed fee, overrides `gas_price * gas`.
	#[serde(default)]
	pub fee: Option<u128>,
	/// Prefix the transaction hash is appended to, e.g.
	/// `https://mintscan.io/celestia/tx/`.
	#[serde(default)]
	pub block_explorer_url: Option<String>,
}

impl CosmosNetworkConfig {
	/// Fee amount in the base denom, rounded up. The gas price is taken at
	/// its shortest decimal form, so `0.07` is exactly seven hundredths.
	pub fn fee_amount(&self) -> Result<u128> {
		if let Some(fee) = self.fee {
			return Ok(fee);
		}
		let price = self.gas_price.to_string();
		let invalid = || Error::Configuration(format!("invalid gas_price {price} for {} gas", self.gas));

		let scale = price.split_once('.').map_or(0, |(_, frac)| frac.len() as u32);
		let units = amount::to_base_units(&price, scale).map_err(|_| invalid())?;
		let denominator = 10u128.checked_pow(scale).ok_or_else(invalid)?;
		let total = units.checked_mul(u128::from(self.gas)).ok_or_else(invalid)?;
		Ok(total.div_ceil(denominator))
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearNetworkConfig {
	pub network_id: String,
	pub node_url: String,
	#[serde(default)]
	pub explorer_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubstrateNetworkConfig {
	/// HTTP JSON-RPC endpoint.
	pub rpc_url: String,
	#[serde(default)]
	pub block_explorer_url: Option<String>,
	/// Token decimals, e.g. 10 for DOT and 12 for WND.
	pub decimals: u32,
	pub reward_destination: RewardDestination,
	#[serde(default = "default_ss58_prefix")]
	pub ss58_prefix: u16,
	#[serde(default = "default_staking_pallet")]
	pub staking_pallet_index: u8,
	#[serde(default = "default_true")]
	pub check_metadata_hash: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardDestination {
	Staked,
	Stash,
	Controller,
	None,
	Account(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvalancheNetworkConfig {
	/// Node base URL, e.g. `https://api.avax-test.network`.
	pub rpc_url: String,
	#[serde(default = "default_avalanche_hrp")]
	pub hrp: String,
	#[serde(default = "default_avalanche_decimals")]
	pub decimals: u32,
	/// Static P-chain transaction fee in nAVAX.
	#[serde(default = "default_p_chain_fee")]
	pub p_chain_fee: u64,
	#[serde(default)]
	pub block_explorer_url: Option<String>,
}

/// Ties a network section type to its slot in [`Config`].
pub trait NetworkSection: DeserializeOwned {
	const NETWORK: NetworkType;

	fn section(config: &Config) -> Option<&Self>;
}

impl NetworkSection for CosmosNetworkConfig {
	const NETWORK: NetworkType = NetworkType::Cosmos;

	fn section(config: &Config) -> Option<&Self> {
		config.cosmos.as_ref()
	}
}

impl NetworkSection for NearNetworkConfig {
	const NETWORK: NetworkType = NetworkType::Near;

	fn section(config: &Config) -> Option<&Self> {
		config.near.as_ref()
	}
}

impl NetworkSection for SubstrateNetworkConfig {
	const NETWORK: NetworkType = NetworkType::Substrate;

	fn section(config: &Config) -> Option<&Self> {
		config.substrate.as_ref()
	}
}

impl NetworkSection for AvalancheNetworkConfig {
	const NETWORK: NetworkType = NetworkType::Avalanche;

	fn section(config: &Config) -> Option<&Self> {
		config.avalanche.as_ref()
	}
}

impl Config {
	/// Load and parse the config file at `path`.
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path).map_err(|e| {
			Error::Configuration(format!("failed to read {}: {e}", path.display()))
		})?;
		Self::parse(&content)
	}

	pub fn parse(content: &str) -> Result<Self> {
		let config: Self =
			toml::from_str(content).map_err(|e| Error::Configuration(e.to_string()))?;
		if config.signing.poll_interval_secs == 0 {
			return Err(Error::Configuration(
				"signing.poll_interval_secs must be greater than 0".into(),
			));
		}
		Ok(config)
	}

	/// Return the network section selected by `network_type`. Fails when
	/// the command family does not match the configured network or the
	/// section is missing.
	pub fn network<T: NetworkSection>(&self) -> Result<&T> {
		if self.network_type != T::NETWORK {
			return Err(Error::Configuration(format!(
				"network_type is {} but a {} command was invoked",
				self.network_type.as_str(),
				T::NETWORK.as_str()
			)));
		}
		T::section(self).ok_or_else(|| {
			Error::Configuration(format!("{} configuration is missing", T::NETWORK.as_str()))
		})
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_secs(self.signing.poll_interval_secs)
	}

	pub fn poll_timeout(&self) -> Option<Duration> {
		self.signing.poll_timeout_secs.map(Duration::from_secs)
	}
}

fn default_journal_path() -> PathBuf {
	PathBuf::from("journal.log")
}

fn default_fireblocks_url() -> String {
	"https://api.fireblocks.io".into()
}

fn default_poll_interval() -> u64 {
	1
}

fn default_ss58_prefix() -> u16 {
	42
}

fn default_staking_pallet() -> u8 {
	7
}

fn default_true() -> bool {
	true
}

fn default_avalanche_hrp() -> String {
	"fuji".into()
}

fn default_avalanche_decimals() -> u32 {
	9
}

fn default_p_chain_fee() -> u64 {
	1_000_000
}
