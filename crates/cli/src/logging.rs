use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

pub fn init_logging(verbosity: u8) {
	// 0 = session lifecycle only
	// 1 (-v) = debug for herd, quiet deps
	// 2+ (-vv) = everything
	let filter = match verbosity {
		0 => "info,hyper=warn,reqwest=warn,tungstenite=warn",
		1 => "debug,hyper=info,reqwest=info,tungstenite=info",
		_ => "trace",
	};

	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.init();
}
