// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Snapshot builders for tests across the workspace.

use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

use crate::acl::{Acl, RuleType};
use crate::ext_client::ExtClient;
use crate::host::{Host, HostOs};
use crate::ids::{NetworkId, NodeId};
use crate::network::Network;
use crate::node::Node;
use crate::snapshot::NetworkSnapshot;
use crate::user::{Role, UserGroup};

/// A network with both default policies, default groups and roles.
pub fn network(name: &str, range: Ipv4Net) -> NetworkSnapshot {
	let net = NetworkId::from(name);
	let mut snap = NetworkSnapshot::new(Network::new(net.clone(), Some(range)));
	snap.acls.push(Acl::default_device(&net));
	snap.acls.push(Acl::default_user(&net));
	for group in [
		UserGroup::network_admin_default(&net),
		UserGroup::network_user_default(&net),
	] {
		snap.groups.insert(group.id.clone(), group);
	}
	for role in [Role::network_admin(&net), Role::network_user(&net)] {
		snap.roles.insert(role.id.clone(), role);
	}
	snap
}

pub fn set_default_policy(snap: &mut NetworkSnapshot, rule_type: RuleType, enabled: bool) {
	for acl in snap.acls.iter_mut().filter(|a| a.default && a.rule_type == rule_type) {
		acl.enabled = enabled;
	}
}

/// Adds a connected Linux host and its node with the given address.
pub fn add_node(snap: &mut NetworkSnapshot, name: &str, address: Ipv4Addr) -> NodeId {
	let mut host = Host::new(name, HostOs::Linux, format!("pk-{name}"));
	let mut node = Node::new(host.id, snap.network.id.clone());
	node.address = Some(address);
	host.nodes.insert(node.id);
	let id = node.id;
	snap.hosts.insert(host.id, host);
	snap.nodes.insert(id, node);
	id
}

pub fn add_ext_client(
	snap: &mut NetworkSnapshot,
	ingress: NodeId,
	client_id: &str,
	address: Ipv4Addr,
	owner: Option<&str>,
) -> String {
	let mut client = ExtClient::new(
		client_id,
		snap.network.id.clone(),
		ingress,
		format!("pk-{client_id}"),
	);
	client.address = Some(address);
	client.owner = owner.map(str::to_string);
	if owner.is_some() {
		client.remote_access_client_id = Some(format!("rac-{client_id}"));
	}
	snap.ext_clients.insert(client.client_id.clone(), client);
	client_id.to_string()
}

pub fn node_mut<'a>(snap: &'a mut NetworkSnapshot, id: &NodeId) -> &'a mut Node {
	match snap.nodes.get_mut(id) {
		Some(node) => node,
		None => panic!("fixture node {id} missing"),
	}
}
