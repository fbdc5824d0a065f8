// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Centralized configuration for the netweave server.
//!
//! This crate provides:
//! - Layered configuration from defaults, a TOML file and the environment
//! - Per-feature optional sections (SMTP, license) so a missing variable
//!   disables only the feature that needs it
//! - Fatal validation for settings the process cannot run without
//!
//! # Usage
//!
//! ```ignore
//! use netweave_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("database at {}", config.database.url);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{load_secret_env, ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub server: ServerSection,
	pub database: DatabaseConfig,
	pub mqtt: MqttConfig,
	pub smtp: Option<SmtpConfig>,
	pub auth: AuthConfig,
	pub license: Option<LicenseConfig>,
	pub audit: AuditConfig,
	pub jobs: JobsConfig,
	pub logging: LoggingConfig,
}

impl Default for ServerConfig {
	fn default() -> Self {
		Self {
			server: ServerSection::default(),
			database: DatabaseConfig::default(),
			mqtt: MqttConfig::default(),
			smtp: None,
			auth: AuthConfig::default(),
			license: None,
			audit: AuditConfig::default(),
			jobs: JobsConfig::default(),
			logging: LoggingConfig::default(),
		}
	}
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables
/// 2. Config file (`/etc/netweave/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<ServerConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize a merged layer into resolved config.
pub fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let server = layer.server.unwrap_or_default().finalize()?;
	let database = layer.database.unwrap_or_default().finalize();
	let mqtt = layer.mqtt.unwrap_or_default().finalize();
	let auth = layer.auth.unwrap_or_default().finalize();
	let audit = layer.audit.unwrap_or_default().finalize();
	let jobs = layer.jobs.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	let smtp = layer.smtp.and_then(|l| l.finalize());
	let license = layer.license.and_then(|l| l.finalize());

	validate_config(&server, &license)?;

	info!(
		environment = %server.environment,
		database = %database.url,
		mqtt_broker = mqtt.host.as_deref().unwrap_or("in-process"),
		smtp_configured = smtp.is_some(),
		license_configured = license.is_some(),
		audit_enabled = audit.enabled,
		audit_retention_days = audit.retention_days,
		"Server configuration loaded"
	);

	Ok(ServerConfig {
		server,
		database,
		mqtt,
		smtp,
		auth,
		license,
		audit,
		jobs,
		logging,
	})
}

/// Cross-section rules.
fn validate_config(
	server: &ServerSection,
	license: &Option<LicenseConfig>,
) -> Result<(), ConfigError> {
	if server.environment == Environment::Prod && license.is_none() {
		return Err(ConfigError::Validation(
			"ENVIRONMENT=prod requires LICENSE_KEY and NETMAKER_TENANT_ID".to_string(),
		));
	}
	if server.checkin_threshold_secs == 0 {
		return Err(ConfigError::Validation(
			"NETWEAVE_CHECKIN_THRESHOLD_SECS must be positive".to_string(),
		));
	}
	Ok(())
}
