// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::ids::{HostId, NetworkId, NodeId, TagId};
use crate::posture::PostureState;

/// Schema version written by the normalize pass.
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

/// A host's participation in one network.
///
/// Role flags are orthogonal bits. The cross-node fields (`relayed_by`,
/// `relayed_nodes`, `auto_relayed_peers`, `failed_over_by`,
/// `fail_over_peers`, `internet_gw_id`, `inet_node_clients`) are lookup
/// keys into the same network and are kept consistent on both sides by the
/// gateway service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
	pub id: NodeId,
	pub host_id: HostId,
	pub network: NetworkId,
	pub address: Option<Ipv4Addr>,
	#[serde(default)]
	pub address6: Option<Ipv6Addr>,
	#[serde(default)]
	pub local_address: Option<IpNet>,
	#[serde(default)]
	pub endpoint: Option<IpAddr>,
	#[serde(default)]
	pub listen_port: u16,
	/// Seconds; zero means unset.
	#[serde(default)]
	pub persistent_keepalive: u32,
	#[serde(default)]
	pub default_acl: bool,
	#[serde(default)]
	pub is_server: bool,
	#[serde(default)]
	pub connected: bool,
	#[serde(default)]
	pub pending_delete: bool,
	pub last_check_in: DateTime<Utc>,
	#[serde(default)]
	pub version: String,

	#[serde(default)]
	pub is_ingress_gateway: bool,
	#[serde(default)]
	pub is_egress_gateway: bool,

	#[serde(default)]
	pub is_relay: bool,
	#[serde(default)]
	pub is_relayed: bool,
	#[serde(default)]
	pub relayed_by: Option<NodeId>,
	#[serde(default)]
	pub relayed_nodes: BTreeSet<NodeId>,

	#[serde(default)]
	pub is_auto_relay: bool,
	/// peer -> auto-relay node carrying traffic between `self` and `peer`.
	#[serde(default)]
	pub auto_relayed_peers: BTreeMap<NodeId, NodeId>,

	#[serde(default)]
	pub is_internet_gateway: bool,
	#[serde(default)]
	pub internet_gw_id: Option<NodeId>,
	#[serde(default)]
	pub inet_node_clients: BTreeSet<NodeId>,

	#[serde(default)]
	pub is_fail_over: bool,
	#[serde(default)]
	pub failed_over_by: Option<NodeId>,
	#[serde(default)]
	pub fail_over_peers: BTreeSet<NodeId>,

	#[serde(default)]
	pub tags: BTreeSet<TagId>,
	#[serde(default)]
	pub posture: PostureState,
	#[serde(default)]
	pub schema_version: u32,
}

impl Node {
	pub fn new(host_id: HostId, network: NetworkId) -> Self {
		Self {
			id: NodeId::new(),
			host_id,
			network,
			address: None,
			address6: None,
			local_address: None,
			endpoint: None,
			listen_port: 51821,
			persistent_keepalive: 0,
			default_acl: true,
			is_server: false,
			connected: true,
			pending_delete: false,
			last_check_in: Utc::now(),
			version: String::new(),
			is_ingress_gateway: false,
			is_egress_gateway: false,
			is_relay: false,
			is_relayed: false,
			relayed_by: None,
			relayed_nodes: BTreeSet::new(),
			is_auto_relay: false,
			auto_relayed_peers: BTreeMap::new(),
			is_internet_gateway: false,
			internet_gw_id: None,
			inet_node_clients: BTreeSet::new(),
			is_fail_over: false,
			failed_over_by: None,
			fail_over_peers: BTreeSet::new(),
			tags: BTreeSet::new(),
			posture: PostureState::default(),
			schema_version: CURRENT_SCHEMA_VERSION,
		}
	}

	/// `address/32` and `address6/128`, whichever are set.
	pub fn host_routes(&self) -> Vec<IpNet> {
		let mut out = Vec::with_capacity(2);
		if let Some(v4) = self.address {
			out.push(IpNet::V4(Ipv4Net::from(v4)));
		}
		if let Some(v6) = self.address6 {
			out.push(IpNet::V6(Ipv6Net::from(v6)));
		}
		out
	}

	pub fn addresses(&self) -> Vec<IpAddr> {
		let mut out = Vec::with_capacity(2);
		if let Some(v4) = self.address {
			out.push(IpAddr::V4(v4));
		}
		if let Some(v6) = self.address6 {
			out.push(IpAddr::V6(v6));
		}
		out
	}

	/// Tag id that names this node alone in ACLs.
	pub fn id_tag(&self) -> String {
		self.id.to_string()
	}
}
