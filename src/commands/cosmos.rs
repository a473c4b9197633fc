use anyhow::{Context, Result};

use crate::cli::{Cli, CosmosCommand, CosmosTx};
use crate::commands::{connect_signer, load_config, run_flow};
use crate::config::CosmosNetworkConfig;
use crate::cosmos::rpc::RestCosmosState;
use crate::cosmos::{CosmosOp, CosmosPipeline};

pub async fn run(cli: &Cli, cmd: &CosmosCommand) -> Result<()> {
	let config = load_config(cli)?;
	let network = config.network::<CosmosNetworkConfig>()?;

	match cmd {
		CosmosCommand::Tx {
			options,
			memo,
			command,
		} => {
			let signer = connect_signer(cli, &config)?;
			let state = RestCosmosState::new(&network.rpc_url);
			let pipeline = CosmosPipeline::init(&signer, &config, state)
				.await
				.context("failed to prepare the cosmos account")?;

			let unsigned = pipeline.build(&op(command), memo)?;
			run_flow(&config, options, &signer, &pipeline, unsigned).await
		}
	}
}

fn op(cmd: &CosmosTx) -> CosmosOp {
	match cmd {
		CosmosTx::Delegate { amount } => CosmosOp::Delegate {
			amount: amount.clone(),
		},
		CosmosTx::Unbond { amount } => CosmosOp::Undelegate {
			amount: amount.clone(),
		},
		CosmosTx::Redelegate {
			amount,
			validator_dst,
		} => CosmosOp::Redelegate {
			amount: amount.clone(),
			validator_dst: validator_dst.clone(),
		},
		CosmosTx::WithdrawRewards { validator } => CosmosOp::WithdrawRewards {
			validator: validator.clone(),
		},
	}
}
