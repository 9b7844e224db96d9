mod cli;
mod config;
mod logging;

use anyhow::Context;
use clap::Parser;
use herd_runtime::{IdentityCache, Supervisor};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let cli = cli::Cli::parse();
	logging::init_logging(cli.verbose);

	let config = config::Config::load(&cli.config)
		.with_context(|| format!("failed to load {}", cli.config.display()))?;
	let identities = config.identities()?;
	let cache = IdentityCache::load(&config.store_path);
	info!(
		config = %cli.config.display(),
		store = %config.store_path.display(),
		identities = identities.len(),
		"starting"
	);

	Supervisor::new(config.session(), cache, identities)
		.run()
		.await;
	Ok(())
}
