// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;

use crate::ids::{HostId, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
	Linux,
	Windows,
	Darwin,
	Freebsd,
	Other,
}

impl HostOs {
	pub fn as_str(&self) -> &'static str {
		match self {
			HostOs::Linux => "linux",
			HostOs::Windows => "windows",
			HostOs::Darwin => "darwin",
			HostOs::Freebsd => "freebsd",
			HostOs::Other => "other",
		}
	}
}

impl std::str::FromStr for HostOs {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"linux" => Ok(HostOs::Linux),
			"windows" => Ok(HostOs::Windows),
			"darwin" | "macos" => Ok(HostOs::Darwin),
			"freebsd" => Ok(HostOs::Freebsd),
			"other" => Ok(HostOs::Other),
			_ => Err(format!("unknown host os: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
	pub id: HostId,
	pub name: String,
	pub os: HostOs,
	/// WireGuard public key, base64.
	pub public_key: String,
	/// X25519 key used to seal MQTT payloads for this host, base64.
	#[serde(default)]
	pub traffic_key_public: Option<String>,
	#[serde(default)]
	pub firewall_capabilities: BTreeSet<String>,
	#[serde(default)]
	pub version: String,
	#[serde(default)]
	pub os_version: String,
	#[serde(default)]
	pub os_family: String,
	#[serde(default)]
	pub kernel_version: String,
	#[serde(default)]
	pub auto_update: bool,
	/// ISO 3166 alpha-2 code of where the host connects from.
	#[serde(default)]
	pub country_code: String,
	pub listen_port: u16,
	#[serde(default)]
	pub endpoint_ip: Option<IpAddr>,
	/// Node memberships. Rebuilt from the nodes table on load.
	#[serde(default)]
	pub nodes: BTreeSet<NodeId>,
	#[serde(default)]
	pub is_default: bool,
	pub created_at: DateTime<Utc>,
}

impl Host {
	pub fn new(name: impl Into<String>, os: HostOs, public_key: impl Into<String>) -> Self {
		Self {
			id: HostId::new(),
			name: name.into(),
			os,
			public_key: public_key.into(),
			traffic_key_public: None,
			firewall_capabilities: BTreeSet::new(),
			version: String::new(),
			os_version: String::new(),
			os_family: String::new(),
			kernel_version: String::new(),
			auto_update: false,
			country_code: String::new(),
			listen_port: 51821,
			endpoint_ip: None,
			nodes: BTreeSet::new(),
			is_default: false,
			created_at: Utc::now(),
		}
	}

	pub fn is_linux(&self) -> bool {
		self.os == HostOs::Linux
	}
}
