use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "herd")]
#[command(about = "Keeps a fleet of proxy-bound gateway sessions alive")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v debug, -vv trace)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Fleet configuration file
	#[arg(short, long, value_name = "FILE", default_value = "config.json")]
	pub config: PathBuf,
}
