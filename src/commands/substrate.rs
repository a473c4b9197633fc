use anyhow::{Context, Result};

use crate::cli::{Cli, SubstrateCommand, SubstrateTx};
use crate::commands::{connect_signer, load_config, run_flow};
use crate::config::SubstrateNetworkConfig;
use crate::substrate::rpc::JsonRpcSubstrateState;
use crate::substrate::{SubstrateOp, SubstratePipeline};

pub async fn run(cli: &Cli, cmd: &SubstrateCommand) -> Result<()> {
	let config = load_config(cli)?;
	let network = config.network::<SubstrateNetworkConfig>()?;

	match cmd {
		SubstrateCommand::Tx { options, command } => {
			let signer = connect_signer(cli, &config)?;
			let state = JsonRpcSubstrateState::new(&network.rpc_url);
			let pipeline = SubstratePipeline::init(&signer, &config, state)
				.await
				.context("failed to prepare the substrate account")?;

			let op = match command {
				SubstrateTx::Delegate { amount } => SubstrateOp::Delegate {
					amount: amount.clone(),
				},
				SubstrateTx::BondExtra { amount } => SubstrateOp::BondExtra {
					amount: amount.clone(),
				},
				SubstrateTx::Nominate => SubstrateOp::Nominate,
				SubstrateTx::Unbond { amount } => SubstrateOp::Unbond {
					amount: amount.clone(),
				},
				SubstrateTx::Withdraw => SubstrateOp::Withdraw,
			};
			let unsigned = pipeline.build(&op).await?;
			run_flow(&config, options, &signer, &pipeline, unsigned).await
		}
	}
}
