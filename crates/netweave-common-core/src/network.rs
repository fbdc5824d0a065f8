// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use ipnet::{Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::ids::NetworkId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsEntry {
	pub name: String,
	pub address: IpAddr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Network {
	pub id: NetworkId,
	pub address_range: Option<Ipv4Net>,
	#[serde(default)]
	pub address_range6: Option<Ipv6Net>,
	/// Default-ACL flag applied to nodes joining this network.
	#[serde(default = "default_true")]
	pub default_acl: bool,
	#[serde(default)]
	pub jit_enabled: bool,
	#[serde(default)]
	pub default_keepalive: u32,
	#[serde(default)]
	pub dns_entries: Vec<DnsEntry>,
	pub created_at: DateTime<Utc>,
}

fn default_true() -> bool {
	true
}

impl Network {
	pub fn new(id: impl Into<NetworkId>, address_range: Option<Ipv4Net>) -> Self {
		Self {
			id: id.into(),
			address_range,
			address_range6: None,
			default_acl: true,
			jit_enabled: false,
			default_keepalive: 20,
			dns_entries: Vec::new(),
			created_at: Utc::now(),
		}
	}
}
