// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Messages published to host agents.
//!
//! Field names on the node and peer updates are part of the agent
//! protocol (`Action`, `Node`, `Network`, `Peers`, `DNS`, `ServerVersion`,
//! `PeerIDs`) and must not change.

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;

use crate::acl::Protocol;
use crate::host::Host;
use crate::ids::{HostId, NetworkId, NodeId};
use crate::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeAction {
	Noop,
	Delete,
	UpdateKey,
	ForceUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NodeUpdate {
	pub action: NodeAction,
	pub node: Node,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerConfig {
	pub public_key: String,
	#[serde(default)]
	pub endpoint: Option<SocketAddr>,
	pub allowed_ips: Vec<IpNet>,
	/// Seconds.
	#[serde(default)]
	pub persistent_keepalive: Option<u32>,
	#[serde(default)]
	pub replace_allowed_ips: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRouteInfo {
	pub id: String,
	#[serde(default)]
	pub address: String,
	#[serde(default)]
	pub name: String,
}

/// One allow rule. Rules are deduplicated on `(src, dst, proto, ports)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FwRule {
	pub src: Vec<IpNet>,
	pub dst: Vec<IpNet>,
	pub proto: Protocol,
	pub ports: Vec<String>,
	pub allow: bool,
}

impl FwRule {
	pub fn allow(src: Vec<IpNet>, dst: Vec<IpNet>, proto: Protocol, ports: Vec<String>) -> Self {
		Self {
			src,
			dst,
			proto,
			ports,
			allow: true,
		}
	}

	fn key(&self) -> (Vec<IpNet>, Vec<IpNet>, Protocol, Vec<String>) {
		let mut src = self.src.clone();
		let mut dst = self.dst.clone();
		let mut ports = self.ports.clone();
		src.sort();
		src.dedup();
		dst.sort();
		dst.dedup();
		ports.sort();
		ports.dedup();
		(src, dst, self.proto, ports)
	}
}

/// Drop rules whose `(src, dst, proto, ports)` was already seen, keeping
/// first occurrence order.
pub fn dedup_rules(rules: Vec<FwRule>) -> Vec<FwRule> {
	let mut seen = BTreeSet::new();
	rules
		.into_iter()
		.filter(|r| seen.insert(r.key()))
		.collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PeerUpdate {
	pub network: NetworkId,
	pub peers: Vec<PeerConfig>,
	#[serde(rename = "DNS")]
	pub dns: String,
	pub server_version: String,
	#[serde(rename = "PeerIDs")]
	pub peer_ids: BTreeMap<String, PeerRouteInfo>,
	#[serde(default)]
	pub fw_rules: Vec<FwRule>,
	#[serde(default)]
	pub egress_ranges: Vec<IpNet>,
}

impl PeerUpdate {
	pub fn peer(&self, public_key: &str) -> Option<&PeerConfig> {
		self.peers.iter().find(|p| p.public_key == public_key)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostAction {
	UpdateHost,
	DeleteHost,
	JoinHostToNetwork,
	DeleteNode,
	UpdateKeys,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostUpdate {
	pub action: HostAction,
	pub host: Host,
	#[serde(default)]
	pub node: Option<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
	ConnectViaRelay,
	FailOverPeer,
	ResetAutoRelay,
	ResetFailOver,
}

/// Host-to-host coordination message relayed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
	pub action: SignalAction,
	pub from_host: HostId,
	pub to_host: HostId,
	pub from_node: NodeId,
	pub to_node: NodeId,
	#[serde(default)]
	pub via: Option<NodeId>,
	pub ts: DateTime<Utc>,
}
