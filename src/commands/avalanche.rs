use anyhow::{Context, Result};

use crate::avalanche::rpc::JsonRpcAvalancheState;
use crate::avalanche::{self, AvalancheOp, AvalanchePipeline};
use crate::cli::{AvalancheCommand, AvalancheTx, Cli, KeysCommand};
use crate::commands::{connect_signer, load_config, run_flow};
use crate::config::AvalancheNetworkConfig;

pub async fn run(cli: &Cli, cmd: &AvalancheCommand) -> Result<()> {
	let config = load_config(cli)?;
	let network = config.network::<AvalancheNetworkConfig>()?;
	let signer = connect_signer(cli, &config)?;

	match cmd {
		AvalancheCommand::Keys {
			command: KeysCommand::Get,
		} => {
			let vault = signer.get_vault(&config.fireblocks.vault_name).await?;
			let key = signer.public_key(&vault, &config.fireblocks.asset_id).await?;
			let info = avalanche::key_info(&vault.name, &network.hrp, &key.public_key)?;
			println!("{}", serde_json::to_string_pretty(&info)?);
			Ok(())
		}
		AvalancheCommand::Tx { options, command } => {
			let state = JsonRpcAvalancheState::new(&network.rpc_url);
			let pipeline = AvalanchePipeline::init(&signer, &config, state)
				.await
				.context("failed to prepare the avalanche account")?;

			let op = match command {
				AvalancheTx::Delegate { amount, days } => AvalancheOp::Delegate {
					amount: amount.clone(),
					days: *days,
				},
				AvalancheTx::Export {
					source,
					destination,
					amount,
				} => AvalancheOp::Export {
					source: *source,
					destination: *destination,
					amount: amount.clone(),
				},
				AvalancheTx::Import { source, destination } => AvalancheOp::Import {
					source: *source,
					destination: *destination,
				},
			};
			let unsigned = pipeline.build(&op).await?;
			run_flow(&config, options, &signer, &pipeline, unsigned).await
		}
	}
}
