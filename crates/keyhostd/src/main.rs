//! Keyhost import server daemon.
//!
//! Hosts instances of the built-in static import and serves them to hosts
//! over a Unix domain socket, or over stdin/stdout with `--stdio`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use keyhost_sdk::Import;
use keyhost_server::{ImportServer, ServerConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::static_import::StaticImport;

mod static_import;

/// Daemon command line arguments.
#[derive(Parser, Debug)]
#[command(name = "keyhostd")]
#[command(about = "Keyhost import server")]
struct Args {
	/// Configuration file
	#[arg(short, long, value_name = "PATH")]
	config: Option<PathBuf>,

	/// Socket path for IPC, overriding the configuration
	#[arg(short, long, value_name = "PATH")]
	socket: Option<PathBuf>,

	/// Serve a single host over stdin/stdout instead of a socket
	#[arg(long, conflicts_with = "socket")]
	stdio: bool,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	let mut config = match &args.config {
		Some(path) => ServerConfig::load(path)?,
		None => ServerConfig::default(),
	};
	if args.socket.is_some() {
		config.socket = args.socket;
	}

	setup_tracing(args.verbose, config.log_dir.as_deref());
	info!(version = env!("CARGO_PKG_VERSION"), "starting keyhostd");

	let server = Arc::new(ImportServer::new(Arc::new(|| {
		Box::new(StaticImport::new()) as Box<dyn Import>
	})));
	let protocol = config.protocol();

	if args.stdio {
		info!("serving on stdio");
		keyhost_server::ipc::serve_stdio(server, protocol).await?;
		return Ok(());
	}

	let socket_path = config.socket_path();
	if let Some(parent) = socket_path.parent()
		&& !parent.exists()
	{
		std::fs::create_dir_all(parent)?;
	}
	info!(socket = %socket_path.display(), max_frame_len = protocol.max_frame_len(), "IPC socket path");

	let shutdown = CancellationToken::new();
	tokio::spawn({
		let shutdown = shutdown.clone();
		async move {
			if tokio::signal::ctrl_c().await.is_ok() {
				info!("interrupt received");
			}
			shutdown.cancel();
		}
	});

	keyhost_server::ipc::serve(&socket_path, server, protocol, shutdown).await?;
	info!("keyhostd stopped");
	Ok(())
}

fn setup_tracing(verbose: bool, configured_dir: Option<&Path>) {
	use std::fs::OpenOptions;

	use tracing_subscriber::EnvFilter;
	use tracing_subscriber::fmt::format::FmtSpan;
	use tracing_subscriber::prelude::*;

	let log_dir = std::env::var_os("KEYHOST_LOG_DIR")
		.map(PathBuf::from)
		.or_else(|| configured_dir.map(Path::to_path_buf));

	if let Some(log_dir) = log_dir
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let log_path = log_dir.join(format!("keyhostd.{}.log", std::process::id()));

		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
				if verbose {
					EnvFilter::new("keyhost=trace,debug")
				} else {
					EnvFilter::new("keyhost=debug,info")
				}
			});

			let file_layer = tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false)
				.with_span_events(FmtSpan::CLOSE)
				.with_target(true);

			tracing_subscriber::registry().with(filter).with(file_layer).init();

			tracing::info!(path = ?log_path, "keyhostd tracing initialized");
			return;
		}
	}

	// stdout may carry frames in stdio mode, so logs stay on stderr
	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
			EnvFilter::new(if verbose { "debug" } else { "info" })
		}))
		.init();
}
