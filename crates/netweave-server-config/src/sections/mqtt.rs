// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! MQTT broker and publisher settings.

use netweave_common_secret::SecretString;
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
	/// Broker host. `None` disables delivery to agents.
	pub host: Option<String>,
	pub port: u16,
	pub client_id: String,
	pub username: Option<String>,
	pub password: Option<SecretString>,
	pub keep_alive_secs: u64,
	pub queue_capacity: usize,
	pub publish_timeout_ms: u64,
	/// Payload hashes remembered per node for duplicate suppression.
	pub dedup_capacity: usize,
}

impl Default for MqttConfig {
	fn default() -> Self {
		MqttConfigLayer::default().finalize()
	}
}

impl MqttConfig {
	pub fn broker_enabled(&self) -> bool {
		self.host.is_some()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MqttConfigLayer {
	#[serde(default)]
	pub host: Option<String>,
	#[serde(default)]
	pub port: Option<u16>,
	#[serde(default)]
	pub client_id: Option<String>,
	#[serde(default)]
	pub username: Option<String>,
	#[serde(default)]
	pub password: Option<SecretString>,
	#[serde(default)]
	pub keep_alive_secs: Option<u64>,
	#[serde(default)]
	pub queue_capacity: Option<usize>,
	#[serde(default)]
	pub publish_timeout_ms: Option<u64>,
	#[serde(default)]
	pub dedup_capacity: Option<usize>,
}

impl MqttConfigLayer {
	pub fn merge(&mut self, other: MqttConfigLayer) {
		if other.host.is_some() {
			self.host = other.host;
		}
		if other.port.is_some() {
			self.port = other.port;
		}
		if other.client_id.is_some() {
			self.client_id = other.client_id;
		}
		if other.username.is_some() {
			self.username = other.username;
		}
		if other.password.is_some() {
			self.password = other.password;
		}
		if other.keep_alive_secs.is_some() {
			self.keep_alive_secs = other.keep_alive_secs;
		}
		if other.queue_capacity.is_some() {
			self.queue_capacity = other.queue_capacity;
		}
		if other.publish_timeout_ms.is_some() {
			self.publish_timeout_ms = other.publish_timeout_ms;
		}
		if other.dedup_capacity.is_some() {
			self.dedup_capacity = other.dedup_capacity;
		}
	}

	pub fn finalize(self) -> MqttConfig {
		MqttConfig {
			host: self.host,
			port: self.port.unwrap_or(1883),
			client_id: self.client_id.unwrap_or_else(|| "netweave-server".to_string()),
			username: self.username,
			password: self.password,
			keep_alive_secs: self.keep_alive_secs.unwrap_or(30).max(5),
			queue_capacity: self.queue_capacity.unwrap_or(1024).max(1),
			publish_timeout_ms: self.publish_timeout_ms.unwrap_or(5000),
			dedup_capacity: self.dedup_capacity.unwrap_or(16).max(1),
		}
	}
}
