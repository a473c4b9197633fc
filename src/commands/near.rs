use anyhow::{Context, Result};

use crate::cli::{Cli, NearCommand, NearTx};
use crate::commands::{connect_signer, load_config, run_flow};
use crate::config::NearNetworkConfig;
use crate::near::rpc::JsonRpcNearState;
use crate::near::{NearOp, NearPipeline};

pub async fn run(cli: &Cli, cmd: &NearCommand) -> Result<()> {
	let config = load_config(cli)?;
	let network = config.network::<NearNetworkConfig>()?;

	match cmd {
		NearCommand::Tx { options, command } => {
			let signer = connect_signer(cli, &config)?;
			let state = JsonRpcNearState::new(&network.node_url);
			let pipeline = NearPipeline::init(&signer, &config, state)
				.await
				.context("failed to prepare the near account")?;

			let op = match command {
				NearTx::Delegate { amount } => NearOp::Delegate {
					amount: amount.clone(),
				},
				NearTx::Unbond { amount } => NearOp::Unbond {
					amount: amount.clone(),
				},
				NearTx::Withdraw { amount } => NearOp::Withdraw {
					amount: amount.clone(),
				},
			};
			let unsigned = pipeline.build(&op).await?;
			run_flow(&config, options, &signer, &pipeline, unsigned).await
		}
	}
}
