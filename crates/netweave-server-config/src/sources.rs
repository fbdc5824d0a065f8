// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: built-in defaults, a TOML file, environment variables.

use std::path::PathBuf;

use netweave_common_secret::SecretString;
use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	AuditConfigLayer, AuthConfigLayer, AuthProvider, DatabaseConfigLayer, JobsConfigLayer,
	LicenseConfigLayer, LogFormat, LoggingConfigLayer, MqttConfigLayer, QueueOverflowPolicy,
	ServerSectionLayer, SmtpConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/netweave/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Core settings use the historical names (`LICENSE_KEY`,
/// `NETMAKER_TENANT_ID`, `ENVIRONMENT`, `AUTH_PROVIDER`,
/// `JWT_VALIDITY_DURATION`, `AUDIT_LOGS_RETENTION_PERIOD_IN_DAYS`);
/// everything else is `NETWEAVE_<SECTION>_<FIELD>`.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			server: Some(load_server_from_env()?),
			database: Some(load_database_from_env()?),
			mqtt: Some(load_mqtt_from_env()?),
			smtp: Some(load_smtp_from_env()?),
			auth: Some(load_auth_from_env()?),
			license: Some(load_license_from_env()?),
			audit: Some(load_audit_from_env()?),
			jobs: Some(load_jobs_from_env()?),
			logging: Some(load_logging_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid value '{v}'"),
		}),
		None => Ok(None),
	}
}

/// Read a secret from `NAME`, or from the file named by `NAME_FILE`.
pub fn load_secret_env(name: &str) -> Result<Option<SecretString>, ConfigError> {
	if let Some(value) = env_var(name) {
		return Ok(Some(SecretString::new(value)));
	}
	let file_var = format!("{name}_FILE");
	match env_var(&file_var) {
		Some(path) => {
			let content = std::fs::read_to_string(&path)
				.map_err(|e| ConfigError::Secret(format!("{file_var}: {e}")))?;
			Ok(Some(SecretString::new(content.trim().to_string())))
		}
		None => Ok(None),
	}
}

fn load_server_from_env() -> Result<ServerSectionLayer, ConfigError> {
	Ok(ServerSectionLayer {
		environment: env_var("ENVIRONMENT"),
		server_version: env_var("NETWEAVE_SERVER_VERSION"),
		checkin_threshold_secs: env_parse("NETWEAVE_CHECKIN_THRESHOLD_SECS")?,
	})
}

fn load_database_from_env() -> Result<DatabaseConfigLayer, ConfigError> {
	Ok(DatabaseConfigLayer {
		url: env_var("NETWEAVE_DATABASE_URL"),
		kv_timeout_ms: env_parse("NETWEAVE_KV_TIMEOUT_MS")?,
	})
}

fn load_mqtt_from_env() -> Result<MqttConfigLayer, ConfigError> {
	Ok(MqttConfigLayer {
		host: env_var("NETWEAVE_MQTT_HOST"),
		port: env_parse("NETWEAVE_MQTT_PORT")?,
		client_id: env_var("NETWEAVE_MQTT_CLIENT_ID"),
		username: env_var("NETWEAVE_MQTT_USERNAME"),
		password: load_secret_env("NETWEAVE_MQTT_PASSWORD")?,
		keep_alive_secs: env_parse("NETWEAVE_MQTT_KEEP_ALIVE_SECS")?,
		queue_capacity: env_parse("NETWEAVE_MQTT_QUEUE_CAPACITY")?,
		publish_timeout_ms: env_parse("NETWEAVE_MQTT_PUBLISH_TIMEOUT_MS")?,
		dedup_capacity: env_parse("NETWEAVE_MQTT_DEDUP_CAPACITY")?,
	})
}

fn load_smtp_from_env() -> Result<SmtpConfigLayer, ConfigError> {
	Ok(SmtpConfigLayer {
		host: env_var("NETWEAVE_SMTP_HOST"),
		port: env_parse("NETWEAVE_SMTP_PORT")?,
		username: env_var("NETWEAVE_SMTP_USERNAME"),
		password: load_secret_env("NETWEAVE_SMTP_PASSWORD")?,
		from_address: env_var("NETWEAVE_SMTP_FROM_ADDRESS"),
		from_name: env_var("NETWEAVE_SMTP_FROM_NAME"),
		use_tls: env_bool("NETWEAVE_SMTP_USE_TLS"),
	})
}

fn load_auth_from_env() -> Result<AuthConfigLayer, ConfigError> {
	let provider = match env_var("AUTH_PROVIDER") {
		Some(v) => Some(v.parse::<AuthProvider>().map_err(|message| {
			ConfigError::InvalidValue {
				key: "AUTH_PROVIDER".to_string(),
				message,
			}
		})?),
		None => None,
	};
	Ok(AuthConfigLayer {
		jwt_validity_secs: env_parse("JWT_VALIDITY_DURATION")?,
		provider,
	})
}

fn load_license_from_env() -> Result<LicenseConfigLayer, ConfigError> {
	Ok(LicenseConfigLayer {
		license_key: load_secret_env("LICENSE_KEY")?,
		tenant_id: env_var("NETMAKER_TENANT_ID"),
	})
}

fn load_audit_from_env() -> Result<AuditConfigLayer, ConfigError> {
	let overflow_policy = match env_var("NETWEAVE_AUDIT_QUEUE_OVERFLOW") {
		Some(v) => Some(v.parse::<QueueOverflowPolicy>().map_err(|message| {
			ConfigError::InvalidValue {
				key: "NETWEAVE_AUDIT_QUEUE_OVERFLOW".to_string(),
				message,
			}
		})?),
		None => None,
	};
	Ok(AuditConfigLayer {
		enabled: env_bool("NETWEAVE_AUDIT_ENABLED"),
		queue_capacity: env_parse("NETWEAVE_AUDIT_QUEUE_CAPACITY")?,
		overflow_policy,
		retention_days: env_parse("AUDIT_LOGS_RETENTION_PERIOD_IN_DAYS")?,
	})
}

fn load_jobs_from_env() -> Result<JobsConfigLayer, ConfigError> {
	Ok(JobsConfigLayer {
		jit_expiry_interval_secs: env_parse("NETWEAVE_JOBS_JIT_EXPIRY_INTERVAL_SECS")?,
		flow_cleanup_interval_secs: env_parse("NETWEAVE_JOBS_FLOW_CLEANUP_INTERVAL_SECS")?,
		flow_retention_days: env_parse("NETWEAVE_JOBS_FLOW_RETENTION_DAYS")?,
		metrics_rollup_interval_secs: env_parse("NETWEAVE_JOBS_METRICS_ROLLUP_INTERVAL_SECS")?,
		license_refresh_interval_secs: env_parse("NETWEAVE_JOBS_LICENSE_REFRESH_INTERVAL_SECS")?,
		event_retention_interval_secs: env_parse("NETWEAVE_JOBS_EVENT_RETENTION_INTERVAL_SECS")?,
		publish_reconcile_interval_secs: env_parse("NETWEAVE_JOBS_PUBLISH_RECONCILE_INTERVAL_SECS")?,
		status_sweep_interval_secs: env_parse("NETWEAVE_JOBS_STATUS_SWEEP_INTERVAL_SECS")?,
		posture_check_interval_secs: env_parse("NETWEAVE_JOBS_POSTURE_CHECK_INTERVAL_SECS")?,
		history_retention_days: env_parse("NETWEAVE_JOBS_HISTORY_RETENTION_DAYS")?,
	})
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	let format = match env_var("NETWEAVE_LOG_FORMAT").as_deref() {
		Some("json") => Some(LogFormat::Json),
		Some("pretty") => Some(LogFormat::Pretty),
		Some(other) => {
			return Err(ConfigError::InvalidValue {
				key: "NETWEAVE_LOG_FORMAT".to_string(),
				message: format!("expected pretty or json, got '{other}'"),
			})
		}
		None => None,
	};
	Ok(LoggingConfigLayer {
		level: env_var("NETWEAVE_LOG_LEVEL"),
		format,
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;

	#[test]
	fn precedence_orders_env_last() {
		let mut sources: Vec<Box<dyn ConfigSource>> = vec![
			Box::new(EnvSource),
			Box::new(DefaultsSource),
			Box::new(TomlSource::new("/nonexistent")),
		];
		sources.sort_by_key(|s| s.precedence());
		let names: Vec<_> = sources.iter().map(|s| s.name()).collect();
		assert_eq!(names, vec!["defaults", "toml-config", "environment"]);
	}

	#[test]
	fn missing_toml_file_is_empty_layer() {
		let layer = TomlSource::new("/definitely/not/here.toml").load().unwrap();
		assert!(layer.database.is_none());
	}

	#[test]
	fn toml_file_is_parsed() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(
			file,
			r#"
[server]
environment = "staging"

[mqtt]
host = "mq.internal"
port = 8883
"#
		)
		.unwrap();
		let layer = TomlSource::new(file.path()).load().unwrap();
		assert_eq!(
			layer.server.unwrap().environment.as_deref(),
			Some("staging")
		);
		let mqtt = layer.mqtt.unwrap();
		assert_eq!(mqtt.host.as_deref(), Some("mq.internal"));
		assert_eq!(mqtt.port, Some(8883));
	}

	#[test]
	fn malformed_toml_reports_path() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "[mqtt\nhost = ").unwrap();
		let err = TomlSource::new(file.path()).load().unwrap_err();
		assert!(matches!(err, ConfigError::TomlParse { .. }));
	}
}
