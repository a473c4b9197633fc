use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::avalanche::Chain;
use crate::signer::BackendKind;

#[derive(Parser)]
#[command(
	name = "custody-stake",
	about = "Sign and broadcast staking transactions with keys held by a custodian.",
	version
)]
pub struct Cli {
	/// Path to the configuration file.
	#[arg(short, long, default_value = "config.toml", global = true)]
	pub config: PathBuf,

	/// Signing backend.
	#[arg(long, value_enum, default_value = "fireblocks", global = true)]
	pub signer: BackendKind,

	/// Diagnostic log format on stderr.
	#[arg(long, value_enum, default_value = "text", global = true)]
	pub log_format: LogFormat,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormat {
	Text,
	Json,
}

#[derive(Subcommand)]
pub enum Command {
	/// Cosmos SDK chains.
	Cosmos {
		#[command(subcommand)]
		command: CosmosCommand,
	},

	/// NEAR staking pools.
	Near {
		#[command(subcommand)]
		command: NearCommand,
	},

	/// Substrate nominated proof-of-stake.
	Substrate {
		#[command(subcommand)]
		command: SubstrateCommand,
	},

	/// Avalanche primary network.
	Avalanche {
		#[command(subcommand)]
		command: AvalancheCommand,
	},
}

/// Flags shared by every `tx` command.
#[derive(Args, Clone)]
pub struct TxOptions {
	/// Broadcast the signed transaction.
	#[arg(short, long, global = true)]
	pub broadcast: bool,

	/// Write transactions to the local journal.
	#[arg(
		short,
		long,
		global = true,
		default_value = "true",
		action = clap::ArgAction::Set
	)]
	pub journal: bool,
}

// -- Cosmos --

#[derive(Subcommand)]
pub enum CosmosCommand {
	/// Generate, sign and optionally broadcast a transaction.
	Tx {
		#[command(flatten)]
		options: TxOptions,

		/// Note attached to the transaction.
		#[arg(short, long, global = true, default_value = "")]
		memo: String,

		#[command(subcommand)]
		command: CosmosTx,
	},
}

#[derive(Subcommand)]
pub enum CosmosTx {
	/// Delegate funds to the configured validator.
	Delegate {
		/// Amount with denom, e.g. `10utia`.
		amount: String,
	},

	/// Undelegate funds from the configured validator.
	Unbond {
		/// Amount with denom, e.g. `10utia`.
		amount: String,
	},

	/// Move a delegation to another validator.
	Redelegate {
		/// Amount with denom, e.g. `10utia`.
		amount: String,

		/// Destination validator address.
		validator_dst: String,
	},

	/// Withdraw delegation rewards.
	WithdrawRewards {
		/// Validator to withdraw from, defaults to the configured one.
		validator: Option<String>,
	},
}

// -- NEAR --

#[derive(Subcommand)]
pub enum NearCommand {
	/// Generate, sign and optionally broadcast a transaction.
	Tx {
		#[command(flatten)]
		options: TxOptions,

		#[command(subcommand)]
		command: NearTx,
	},
}

#[derive(Subcommand)]
pub enum NearTx {
	/// Deposit and stake NEAR with the staking pool.
	Delegate {
		/// Amount in NEAR, e.g. `0.5`.
		amount: String,
	},

	/// Unstake NEAR from the staking pool.
	Unbond {
		/// Amount in NEAR.
		amount: String,
	},

	/// Withdraw unstaked NEAR.
	Withdraw {
		/// Amount in NEAR, `0` withdraws everything.
		amount: String,
	},
}

// -- Substrate --

#[derive(Subcommand)]
pub enum SubstrateCommand {
	/// Generate, sign and optionally broadcast a transaction.
	Tx {
		#[command(flatten)]
		options: TxOptions,

		#[command(subcommand)]
		command: SubstrateTx,
	},
}

#[derive(Subcommand)]
pub enum SubstrateTx {
	/// Bond funds from the stash.
	Delegate {
		/// Amount in tokens, e.g. `1.5`.
		amount: String,
	},

	/// Bond additional funds.
	BondExtra {
		amount: String,
	},

	/// Nominate the configured validators.
	Nominate,

	/// Schedule bonded funds to be unlocked.
	Unbond {
		amount: String,
	},

	/// Withdraw funds that finished unbonding.
	Withdraw,
}

// -- Avalanche --

#[derive(Subcommand)]
pub enum AvalancheCommand {
	/// Generate, sign and optionally broadcast a transaction.
	Tx {
		#[command(flatten)]
		options: TxOptions,

		#[command(subcommand)]
		command: AvalancheTx,
	},

	/// Inspect the vault keys.
	Keys {
		#[command(subcommand)]
		command: KeysCommand,
	},
}

#[derive(Subcommand)]
pub enum AvalancheTx {
	/// Delegate AVAX from the P-chain to the configured validator.
	Delegate {
		/// Amount in AVAX.
		amount: String,

		/// Number of days to delegate funds for.
		days: u64,
	},

	/// Export AVAX from one chain to another, e.g. `C P 1.5`.
	Export {
		source: Chain,
		destination: Chain,
		amount: String,
	},

	/// Import AVAX previously exported to the destination chain.
	Import {
		source: Chain,
		destination: Chain,
	},
}

#[derive(Subcommand)]
pub enum KeysCommand {
	/// Print the vault's addresses on every chain.
	Get,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn journal_defaults_to_enabled() {
		let cli = Cli::try_parse_from(["custody-stake", "near", "tx", "delegate", "1"]).unwrap();
		let Command::Near {
			command: NearCommand::Tx { options, .. },
		} = cli.command
		else {
			panic!("expected near tx");
		};
		assert!(options.journal);
		assert!(!options.broadcast);
		assert_eq!(cli.config, PathBuf::from("config.toml"));
	}

	#[test]
	fn journal_can_be_disabled() {
		let cli = Cli::try_parse_from([
			"custody-stake",
			"--signer",
			"local",
			"cosmos",
			"tx",
			"--journal",
			"false",
			"-b",
			"--memo",
			"hi",
			"redelegate",
			"10utia",
			"celestiavaloper1dst",
		])
		.unwrap();
		assert_eq!(cli.signer, BackendKind::Local);
		let Command::Cosmos {
			command: CosmosCommand::Tx {
				options,
				memo,
				command,
			},
		} = cli.command
		else {
			panic!("expected cosmos tx");
		};
		assert!(!options.journal);
		assert!(options.broadcast);
		assert_eq!(memo, "hi");
		assert!(matches!(command, CosmosTx::Redelegate { .. }));
	}

	#[test]
	fn avalanche_chains_parse() {
		let cli = Cli::try_parse_from(["custody-stake", "avalanche", "tx", "export", "c", "P", "1"]).unwrap();
		let Command::Avalanche {
			command: AvalancheCommand::Tx {
				command: AvalancheTx::Export {
					source, destination, ..
				},
				..
			},
		} = cli.command
		else {
			panic!("expected avalanche export");
		};
		assert_eq!((source, destination), (Chain::C, Chain::P));

		assert!(Cli::try_parse_from(["custody-stake", "avalanche", "tx", "import", "Q", "P"]).is_err());
	}
}
