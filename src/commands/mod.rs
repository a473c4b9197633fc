pub mod avalanche;
pub mod cosmos;
pub mod near;
pub mod substrate;

use anyhow::{Context, Result};

use crate::cli::{Cli, TxOptions};
use crate::config::Config;
use crate::journal;
use crate::pipeline::{ChainPipeline, Flow};
use crate::prompt::StdinConfirm;
use crate::signer::{Backend, PollPolicy, Signer};

/// Load the config file named on the command line.
pub fn load_config(cli: &Cli) -> Result<Config> {
	Config::load(&cli.config).with_context(|| format!("failed to load {}", cli.config.display()))
}

/// Build the signer backend selected with `--signer`.
pub fn connect_signer(cli: &Cli, config: &Config) -> Result<Signer> {
	let backend = Backend::from_config(cli.signer, config)
		.with_context(|| format!("failed to set up the {:?} signer", cli.signer))?;
	Ok(Signer::new(Box::new(backend), PollPolicy::from_config(config)))
}

/// Sign `unsigned` interactively and broadcast it when asked to.
pub async fn run_flow<P: ChainPipeline>(
	config: &Config,
	options: &TxOptions,
	signer: &Signer,
	pipeline: &P,
	unsigned: P::Unsigned,
) -> Result<()> {
	let journal = journal::open(options.journal, &config.journal_path);
	let confirm = StdinConfirm;
	let mut flow = Flow::new(signer, journal.as_ref(), &confirm);

	let signed = flow.sign(pipeline, unsigned).await?;
	flow.broadcast(pipeline, &signed, options.broadcast).await?;

	tracing::info!(target: "pipeline", stage = %flow.stage(), "transaction flow finished");
	Ok(())
}
