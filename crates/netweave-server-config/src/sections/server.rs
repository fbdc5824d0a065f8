// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Process-level settings: deployment environment, version, check-in threshold.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
	Dev,
	Staging,
	Prod,
}

impl std::str::FromStr for Environment {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"dev" => Ok(Environment::Dev),
			"staging" => Ok(Environment::Staging),
			"prod" => Ok(Environment::Prod),
			other => Err(ConfigError::InvalidValue {
				key: "ENVIRONMENT".to_string(),
				message: format!("expected dev, staging or prod, got '{other}'"),
			}),
		}
	}
}

impl std::fmt::Display for Environment {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(match self {
			Environment::Dev => "dev",
			Environment::Staging => "staging",
			Environment::Prod => "prod",
		})
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerSection {
	pub environment: Environment,
	pub server_version: String,
	pub checkin_threshold_secs: u64,
}

impl Default for ServerSection {
	fn default() -> Self {
		Self {
			environment: Environment::Dev,
			server_version: env!("CARGO_PKG_VERSION").to_string(),
			checkin_threshold_secs: 300,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerSectionLayer {
	#[serde(default)]
	pub environment: Option<String>,
	#[serde(default)]
	pub server_version: Option<String>,
	#[serde(default)]
	pub checkin_threshold_secs: Option<u64>,
}

impl ServerSectionLayer {
	pub fn merge(&mut self, other: ServerSectionLayer) {
		if other.environment.is_some() {
			self.environment = other.environment;
		}
		if other.server_version.is_some() {
			self.server_version = other.server_version;
		}
		if other.checkin_threshold_secs.is_some() {
			self.checkin_threshold_secs = other.checkin_threshold_secs;
		}
	}

	/// An unrecognised environment is fatal.
	pub fn finalize(self) -> Result<ServerSection, ConfigError> {
		let defaults = ServerSection::default();
		let environment = match self.environment {
			Some(env) => env.parse()?,
			None => defaults.environment,
		};
		Ok(ServerSection {
			environment,
			server_version: self.server_version.unwrap_or(defaults.server_version),
			checkin_threshold_secs: self
				.checkin_threshold_secs
				.unwrap_or(defaults.checkin_threshold_secs),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn unknown_environment_is_rejected() {
		let layer = ServerSectionLayer {
			environment: Some("qa".to_string()),
			..Default::default()
		};
		let err = layer.finalize().unwrap_err();
		assert!(err.to_string().contains("ENVIRONMENT"));
	}

	#[test]
	fn defaults_to_dev() {
		let section = ServerSectionLayer::default().finalize().unwrap();
		assert_eq!(section.environment, Environment::Dev);
		assert_eq!(section.checkin_threshold_secs, 300);
	}
}
