// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background job intervals.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct JobsConfigLayer {
	pub jit_expiry_interval_secs: Option<u64>,
	pub flow_cleanup_interval_secs: Option<u64>,
	pub flow_retention_days: Option<u32>,
	pub metrics_rollup_interval_secs: Option<u64>,
	pub license_refresh_interval_secs: Option<u64>,
	pub event_retention_interval_secs: Option<u64>,
	pub publish_reconcile_interval_secs: Option<u64>,
	pub status_sweep_interval_secs: Option<u64>,
	pub posture_check_interval_secs: Option<u64>,
	pub history_retention_days: Option<u32>,
}

impl JobsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.jit_expiry_interval_secs.is_some() {
			self.jit_expiry_interval_secs = other.jit_expiry_interval_secs;
		}
		if other.flow_cleanup_interval_secs.is_some() {
			self.flow_cleanup_interval_secs = other.flow_cleanup_interval_secs;
		}
		if other.flow_retention_days.is_some() {
			self.flow_retention_days = other.flow_retention_days;
		}
		if other.metrics_rollup_interval_secs.is_some() {
			self.metrics_rollup_interval_secs = other.metrics_rollup_interval_secs;
		}
		if other.license_refresh_interval_secs.is_some() {
			self.license_refresh_interval_secs = other.license_refresh_interval_secs;
		}
		if other.event_retention_interval_secs.is_some() {
			self.event_retention_interval_secs = other.event_retention_interval_secs;
		}
		if other.publish_reconcile_interval_secs.is_some() {
			self.publish_reconcile_interval_secs = other.publish_reconcile_interval_secs;
		}
		if other.status_sweep_interval_secs.is_some() {
			self.status_sweep_interval_secs = other.status_sweep_interval_secs;
		}
		if other.posture_check_interval_secs.is_some() {
			self.posture_check_interval_secs = other.posture_check_interval_secs;
		}
		if other.history_retention_days.is_some() {
			self.history_retention_days = other.history_retention_days;
		}
	}

	pub fn finalize(self) -> JobsConfig {
		let d = JobsConfig::default();
		JobsConfig {
			jit_expiry_interval_secs: self.jit_expiry_interval_secs.unwrap_or(d.jit_expiry_interval_secs),
			flow_cleanup_interval_secs: self
				.flow_cleanup_interval_secs
				.unwrap_or(d.flow_cleanup_interval_secs),
			flow_retention_days: self.flow_retention_days.unwrap_or(d.flow_retention_days),
			metrics_rollup_interval_secs: self
				.metrics_rollup_interval_secs
				.unwrap_or(d.metrics_rollup_interval_secs),
			license_refresh_interval_secs: self
				.license_refresh_interval_secs
				.unwrap_or(d.license_refresh_interval_secs),
			event_retention_interval_secs: self
				.event_retention_interval_secs
				.unwrap_or(d.event_retention_interval_secs),
			publish_reconcile_interval_secs: self
				.publish_reconcile_interval_secs
				.unwrap_or(d.publish_reconcile_interval_secs),
			status_sweep_interval_secs: self
				.status_sweep_interval_secs
				.unwrap_or(d.status_sweep_interval_secs),
			posture_check_interval_secs: self
				.posture_check_interval_secs
				.unwrap_or(d.posture_check_interval_secs),
			history_retention_days: self.history_retention_days.unwrap_or(d.history_retention_days),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
	pub jit_expiry_interval_secs: u64,
	pub flow_cleanup_interval_secs: u64,
	pub flow_retention_days: u32,
	pub metrics_rollup_interval_secs: u64,
	pub license_refresh_interval_secs: u64,
	pub event_retention_interval_secs: u64,
	pub publish_reconcile_interval_secs: u64,
	pub status_sweep_interval_secs: u64,
	pub posture_check_interval_secs: u64,
	pub history_retention_days: u32,
}

impl Default for JobsConfig {
	fn default() -> Self {
		Self {
			jit_expiry_interval_secs: 3600,
			flow_cleanup_interval_secs: 86400, // 24 hours
			flow_retention_days: 7,
			metrics_rollup_interval_secs: 300,
			license_refresh_interval_secs: 86400,
			event_retention_interval_secs: 86400,
			publish_reconcile_interval_secs: 30,
			status_sweep_interval_secs: 60,
			posture_check_interval_secs: 3600,
			history_retention_days: 30,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_values() {
		let config = JobsConfig::default();
		assert_eq!(config.jit_expiry_interval_secs, 3600);
		assert_eq!(config.flow_cleanup_interval_secs, 86400);
		assert_eq!(config.publish_reconcile_interval_secs, 30);
		assert_eq!(config.posture_check_interval_secs, 3600);
	}

	#[test]
	fn test_layer_finalize_defaults() {
		assert_eq!(JobsConfigLayer::default().finalize(), JobsConfig::default());
	}

	#[test]
	fn test_merge_overwrites() {
		let mut base = JobsConfigLayer {
			jit_expiry_interval_secs: Some(3600),
			flow_retention_days: Some(7),
			..Default::default()
		};
		let overlay = JobsConfigLayer {
			jit_expiry_interval_secs: Some(60),
			flow_retention_days: None,
			..Default::default()
		};
		base.merge(overlay);
		assert_eq!(base.jit_expiry_interval_secs, Some(60));
		assert_eq!(base.flow_retention_days, Some(7));
	}

	#[test]
	fn test_serde_roundtrip() {
		let config = JobsConfig {
			status_sweep_interval_secs: 15,
			..Default::default()
		};
		let toml_str = toml::to_string(&config).unwrap();
		let parsed: JobsConfig = toml::from_str(&toml_str).unwrap();
		assert_eq!(config, parsed);
	}

	#[test]
	fn test_deserialize_layer_partial() {
		let layer: JobsConfigLayer = toml::from_str("flow_retention_days = 3\n").unwrap();
		assert_eq!(layer.flow_retention_days, Some(3));
		assert!(layer.jit_expiry_interval_secs.is_none());
	}
}
