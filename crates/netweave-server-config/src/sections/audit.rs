// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event bus configuration.

use serde::{Deserialize, Serialize};

/// The bus never runs with less buffering than this.
pub const MIN_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOverflowPolicy {
	/// Wait for room in the queue.
	#[default]
	Block,
	/// Drop the event being logged when the queue is full.
	DropNewest,
}

impl std::str::FromStr for QueueOverflowPolicy {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"block" => Ok(QueueOverflowPolicy::Block),
			"drop_newest" => Ok(QueueOverflowPolicy::DropNewest),
			_ => Err(format!("unknown overflow policy '{s}'")),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditConfig {
	pub enabled: bool,
	pub queue_capacity: usize,
	pub overflow_policy: QueueOverflowPolicy,
	pub retention_days: i64,
}

impl Default for AuditConfig {
	fn default() -> Self {
		AuditConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditConfigLayer {
	#[serde(default)]
	pub enabled: Option<bool>,
	#[serde(default)]
	pub queue_capacity: Option<usize>,
	#[serde(default)]
	pub overflow_policy: Option<QueueOverflowPolicy>,
	#[serde(default)]
	pub retention_days: Option<i64>,
}

impl AuditConfigLayer {
	pub fn merge(&mut self, other: AuditConfigLayer) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.queue_capacity.is_some() {
			self.queue_capacity = other.queue_capacity;
		}
		if other.overflow_policy.is_some() {
			self.overflow_policy = other.overflow_policy;
		}
		if other.retention_days.is_some() {
			self.retention_days = other.retention_days;
		}
	}

	pub fn finalize(self) -> AuditConfig {
		AuditConfig {
			enabled: self.enabled.unwrap_or(true),
			queue_capacity: self.queue_capacity.unwrap_or(1024).max(MIN_QUEUE_CAPACITY),
			overflow_policy: self.overflow_policy.unwrap_or_default(),
			retention_days: self.retention_days.unwrap_or(7).max(1),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn capacity_has_a_floor() {
		let config = AuditConfigLayer {
			queue_capacity: Some(5),
			..Default::default()
		}
		.finalize();
		assert_eq!(config.queue_capacity, MIN_QUEUE_CAPACITY);
	}

	#[test]
	fn overflow_policy_parses_from_toml() {
		let layer: AuditConfigLayer = toml::from_str("overflow_policy = \"drop_newest\"").unwrap();
		assert_eq!(layer.overflow_policy, Some(QueueOverflowPolicy::DropNewest));
	}
}
