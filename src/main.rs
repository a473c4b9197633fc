use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use custody_stake::cli::{Cli, Command, LogFormat};
use custody_stake::{commands, error};

fn init_tracing(format: LogFormat) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
	let registry = tracing_subscriber::registry().with(filter);
	match format {
		LogFormat::Text => registry.with(fmt::layer().with_writer(std::io::stderr)).init(),
		LogFormat::Json => registry
			.with(fmt::layer().json().with_writer(std::io::stderr))
			.init(),
	}
}

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	init_tracing(cli.log_format);

	let result = match &cli.command {
		Command::Cosmos { command } => commands::cosmos::run(&cli, command).await,
		Command::Near { command } => commands::near::run(&cli, command).await,
		Command::Substrate { command } => commands::substrate::run(&cli, command).await,
		Command::Avalanche { command } => commands::avalanche::run(&cli, command).await,
	};

	match result {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			eprintln!("error: {err:#}");
			ExitCode::from(error::exit_code_for(&err) as u8)
		}
	}
}
