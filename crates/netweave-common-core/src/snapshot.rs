// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Point-in-time copy of everything one network's peer graph depends on.
//!
//! The entity store clones its caches into a snapshot at the read
//! boundary; the policy and peer engines are pure functions over it.

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::acl::{Acl, RuleType};
use crate::egress::Egress;
use crate::ext_client::ExtClient;
use crate::host::Host;
use crate::ids::{EgressId, HostId, NodeId, RoleId, TagId, UserGroupId};
use crate::metrics::Metrics;
use crate::network::Network;
use crate::node::Node;
use crate::tag::Tag;
use crate::user::{Role, User, UserGroup};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkSnapshot {
	pub network: Network,
	pub nodes: BTreeMap<NodeId, Node>,
	pub hosts: BTreeMap<HostId, Host>,
	pub ext_clients: BTreeMap<String, ExtClient>,
	pub acls: Vec<Acl>,
	pub tags: BTreeMap<TagId, Tag>,
	pub egresses: BTreeMap<EgressId, Egress>,
	pub users: BTreeMap<String, User>,
	pub groups: BTreeMap<UserGroupId, UserGroup>,
	pub roles: BTreeMap<RoleId, Role>,
	pub metrics: BTreeMap<NodeId, Metrics>,
	pub taken_at: DateTime<Utc>,
}

impl NetworkSnapshot {
	pub fn new(network: Network) -> Self {
		Self {
			network,
			nodes: BTreeMap::new(),
			hosts: BTreeMap::new(),
			ext_clients: BTreeMap::new(),
			acls: Vec::new(),
			tags: BTreeMap::new(),
			egresses: BTreeMap::new(),
			users: BTreeMap::new(),
			groups: BTreeMap::new(),
			roles: BTreeMap::new(),
			metrics: BTreeMap::new(),
			taken_at: Utc::now(),
		}
	}

	pub fn node(&self, id: &NodeId) -> Option<&Node> {
		self.nodes.get(id)
	}

	pub fn host_of(&self, node: &Node) -> Option<&Host> {
		self.hosts.get(&node.host_id)
	}

	/// Enabled ACLs of one rule type.
	pub fn policies(&self, rule_type: RuleType) -> impl Iterator<Item = &Acl> {
		self
			.acls
			.iter()
			.filter(move |a| a.enabled && a.rule_type == rule_type)
	}

	/// The enabled default policy for a rule type, if any.
	pub fn default_policy(&self, rule_type: RuleType) -> Option<&Acl> {
		self.policies(rule_type).find(|a| a.default)
	}

	/// Enabled egress rules the node is a member of.
	pub fn egresses_for<'a>(&'a self, node: &'a Node) -> impl Iterator<Item = &'a Egress> + 'a {
		self
			.egresses
			.values()
			.filter(move |e| e.status && e.has_member(node))
	}

	/// CIDRs routed through the node, deduplicated.
	pub fn egress_ranges_for(&self, node: &Node) -> Vec<IpNet> {
		let mut out: Vec<IpNet> = self.egresses_for(node).flat_map(|e| e.ranges()).collect();
		out.sort();
		out.dedup();
		out
	}

	pub fn ext_clients_on<'a>(&'a self, ingress: &'a NodeId) -> impl Iterator<Item = &'a ExtClient> + 'a {
		self
			.ext_clients
			.values()
			.filter(move |c| &c.ingress_id == ingress)
	}

	pub fn node_by_public_key(&self, public_key: &str) -> Option<&Node> {
		self.nodes.values().find(|n| {
			self
				.host_of(n)
				.map(|h| h.public_key == public_key)
				.unwrap_or(false)
		})
	}
}
