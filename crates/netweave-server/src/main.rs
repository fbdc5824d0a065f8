// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! netweave control-plane server binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use netweave_server::{version, Core, LicenseError};
use netweave_server_config::LogFormat;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// netweave server - WireGuard mesh control plane.
#[derive(Parser, Debug)]
#[command(name = "netweave-server", about = "WireGuard mesh control plane", version)]
struct Args {
	/// TOML config file; environment variables still override it.
	#[arg(long, global = true, env = "NETWEAVE_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Run the server (default)
	Run,
	/// Show version and build information
	Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	let config = match &args.config {
		Some(path) => netweave_server_config::load_config_with_file(path)?,
		None => netweave_server_config::load_config()?,
	};

	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| config.logging.level.clone().into());
	match config.logging.format {
		LogFormat::Pretty => tracing_subscriber::registry()
			.with(filter)
			.with(tracing_subscriber::fmt::layer())
			.init(),
		LogFormat::Json => tracing_subscriber::registry()
			.with(filter)
			.with(tracing_subscriber::fmt::layer().json())
			.init(),
	}

	let info = version::BuildInfo::current();
	tracing::info!(
		version = info.version,
		environment = %config.server.environment,
		database = %config.database.url,
		"starting netweave-server"
	);

	let core = Core::builder(config).build().await?;

	if core.license().is_configured() {
		match core.license().refresh().await {
			Ok(_) => {}
			Err(e @ LicenseError::Rejected(_)) => {
				core.shutdown().await;
				return Err(e.into());
			}
			Err(e) => tracing::warn!(error = %e, "initial license check failed, will retry"),
		}
	}

	let scheduler = core.scheduler();
	scheduler.start().await?;
	tracing::info!(jobs = ?scheduler.job_ids(), "background jobs started");

	let shutdown_token = core.shutdown_token();
	tokio::select! {
		result = tokio::signal::ctrl_c() => {
			if let Err(e) = result {
				tracing::error!(error = %e, "failed to listen for shutdown signal");
			}
			tracing::info!("shutdown signal received");
		}
		_ = shutdown_token.cancelled() => {}
	}

	scheduler.shutdown().await;
	core.shutdown().await;
	tracing::info!("netweave-server stopped");
	Ok(())
}
