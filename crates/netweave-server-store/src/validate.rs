// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Invariant checks run before anything is written.
//!
//! Checks read a [`NetworkSnapshot`] that already reflects the pending
//! write, so a batch that updates both ends of an edge validates as a whole.

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use netweave_common_core::{
	Acl, AclTag, AclTagKind, EgressId, ExtClient, JitGrant, NetworkSnapshot, Node, NodeId, RuleType,
	TagId, UserGroupId,
};

use crate::error::{Invariant, StoreError, StoreResult};

fn violated<T>(which: Invariant, message: String) -> StoreResult<T> {
	Err(StoreError::violated(which, message))
}

pub fn validate_node(node: &Node, view: &NetworkSnapshot) -> StoreResult<()> {
	check_addresses(node, view)?;
	check_relay(node, view)?;

	if node.is_relayed && node.is_ingress_gateway {
		return violated(
			Invariant::RelayedNotIngress,
			format!("node {} is relayed and an ingress gateway", node.id),
		);
	}
	if node.is_auto_relay && node.is_relayed {
		return violated(
			Invariant::AutoRelayNotRelayed,
			format!("auto-relay {} is itself relayed", node.id),
		);
	}

	check_auto_relay(node, view)?;

	if node.is_fail_over {
		if let Some(other) = view.nodes.values().find(|n| n.is_fail_over && n.id != node.id) {
			return violated(
				Invariant::SingleFailover,
				format!("network {} already has failover {}", view.network.id, other.id),
			);
		}
	}

	if node.is_internet_gateway {
		let linux = view.host_of(node).map(|h| h.is_linux()).unwrap_or(false);
		if !linux {
			return violated(
				Invariant::InternetGatewayLinux,
				format!("internet gateway {} is not on a linux host", node.id),
			);
		}
	}
	Ok(())
}

fn check_addresses(node: &Node, view: &NetworkSnapshot) -> StoreResult<()> {
	if let (Some(addr), Some(range)) = (node.address, view.network.address_range) {
		if !range.contains(&addr) {
			return violated(
				Invariant::AddressInCidr,
				format!("{addr} is outside {range}"),
			);
		}
	}
	if let (Some(addr), Some(range)) = (node.address6, view.network.address_range6) {
		if !range.contains(&addr) {
			return violated(
				Invariant::AddressInCidr,
				format!("{addr} is outside {range}"),
			);
		}
	}

	let clash_node = view.nodes.values().find(|other| {
		other.id != node.id
			&& ((node.address.is_some() && other.address == node.address)
				|| (node.address6.is_some() && other.address6 == node.address6))
	});
	if let Some(other) = clash_node {
		return violated(
			Invariant::AddressUnique,
			format!("node {} already uses that address", other.id),
		);
	}
	let clash_client = view.ext_clients.values().find(|c| {
		(node.address.is_some() && c.address == node.address)
			|| (node.address6.is_some() && c.address6 == node.address6)
	});
	if let Some(client) = clash_client {
		return violated(
			Invariant::AddressUnique,
			format!("ext-client {} already uses that address", client.client_id),
		);
	}
	Ok(())
}

/// Ext-client placement: an ingress gateway of the same network, an
/// address inside the network range that no node or other client uses.
pub fn validate_ext_client(client: &ExtClient, view: &NetworkSnapshot) -> StoreResult<()> {
	let ingress_ok = view
		.node(&client.ingress_id)
		.map(|n| n.is_ingress_gateway && n.network == client.network)
		.unwrap_or(false);
	if !ingress_ok {
		return Err(StoreError::NotFound(format!(
			"ingress gateway {} in {}",
			client.ingress_id, client.network
		)));
	}
	if let (Some(addr), Some(range)) = (client.address, view.network.address_range) {
		if !range.contains(&addr) {
			return violated(Invariant::AddressInCidr, format!("{addr} is outside {range}"));
		}
	}
	let clash = view.nodes.values().any(|n| {
		(client.address.is_some() && n.address == client.address)
			|| (client.address6.is_some() && n.address6 == client.address6)
	}) || view.ext_clients.values().any(|c| {
		c.client_id != client.client_id
			&& ((client.address.is_some() && c.address == client.address)
				|| (client.address6.is_some() && c.address6 == client.address6))
	});
	if clash {
		return violated(
			Invariant::AddressUnique,
			format!("ext-client {} address is already in use", client.client_id),
		);
	}
	Ok(())
}

fn check_relay(node: &Node, view: &NetworkSnapshot) -> StoreResult<()> {
	if node.is_relay && node.is_relayed {
		return violated(
			Invariant::RelayConsistency,
			format!("node {} cannot be a relay and relayed", node.id),
		);
	}

	match (node.is_relayed, node.relayed_by) {
		(false, None) => {}
		(true, Some(relay_id)) => {
			let ok = view
				.node(&relay_id)
				.map(|r| r.is_relay && r.relayed_nodes.contains(&node.id))
				.unwrap_or(false);
			if !ok {
				return violated(
					Invariant::RelayConsistency,
					format!("node {} claims relay {relay_id} which does not list it", node.id),
				);
			}
		}
		_ => {
			return violated(
				Invariant::RelayConsistency,
				format!("node {} has inconsistent relayed flags", node.id),
			);
		}
	}

	if !node.is_relay && !node.relayed_nodes.is_empty() {
		return violated(
			Invariant::RelayConsistency,
			format!("node {} lists relayed nodes but is not a relay", node.id),
		);
	}
	for child in &node.relayed_nodes {
		let ok = view
			.node(child)
			.map(|c| c.relayed_by == Some(node.id) && c.is_relayed)
			.unwrap_or(false);
		if !ok {
			return violated(
				Invariant::RelayConsistency,
				format!("relay {} lists {child} which is not relayed by it", node.id),
			);
		}
	}
	Ok(())
}

fn check_auto_relay(node: &Node, view: &NetworkSnapshot) -> StoreResult<()> {
	for (peer_id, relay_id) in &node.auto_relayed_peers {
		let mirrored = view
			.node(peer_id)
			.and_then(|p| p.auto_relayed_peers.get(&node.id))
			== Some(relay_id);
		let relay_ok = view.node(relay_id).map(|g| g.is_auto_relay).unwrap_or(false);
		if !mirrored || !relay_ok {
			return violated(
				Invariant::AutoRelaySymmetric,
				format!(
					"pair ({}, {peer_id}) via {relay_id} is not symmetric or {relay_id} is not an auto-relay",
					node.id
				),
			);
		}
	}
	Ok(())
}

fn tag_resolves(tag: &AclTag, view: &NetworkSnapshot) -> bool {
	if tag.is_wildcard() {
		return true;
	}
	match tag.kind {
		AclTagKind::Wildcard => true,
		AclTagKind::Node => {
			let node_hit = tag
				.value
				.parse::<NodeId>()
				.map(|id| view.nodes.contains_key(&id))
				.unwrap_or(false);
			node_hit || view.ext_clients.contains_key(&tag.value)
		}
		AclTagKind::NodeTag => view.tags.contains_key(&TagId::new(tag.value.as_str())),
		AclTagKind::Egress => tag
			.value
			.parse::<EgressId>()
			.map(|id| view.egresses.contains_key(&id))
			.unwrap_or(false),
		AclTagKind::EgressRange => {
			let by_id = tag
				.value
				.parse::<EgressId>()
				.map(|id| view.egresses.contains_key(&id))
				.unwrap_or(false);
			let by_range = tag
				.value
				.parse::<IpNet>()
				.map(|net| view.egresses.values().any(|e| e.ranges().contains(&net)))
				.unwrap_or(false);
			by_id || by_range
		}
		AclTagKind::User => view.users.contains_key(&tag.value),
		AclTagKind::UserGroup => view.groups.contains_key(&UserGroupId::new(tag.value.as_str())),
	}
}

pub fn validate_acl(acl: &Acl, view: &NetworkSnapshot) -> StoreResult<()> {
	if acl.src.is_empty() || acl.dst.is_empty() {
		return violated(
			Invariant::AclTagResolves,
			format!("policy {} needs at least one source and one destination", acl.name),
		);
	}

	for tag in &acl.src {
		let allowed = match acl.rule_type {
			RuleType::UserPolicy => tag.is_wildcard() || tag.kind.is_user_kind(),
			RuleType::DevicePolicy => !tag.kind.is_user_kind(),
		};
		if !allowed {
			return violated(
				Invariant::AclTagResolves,
				format!(
					"{} source {}:{} has the wrong kind for this rule type",
					acl.name,
					tag.kind.as_str(),
					tag.value
				),
			);
		}
	}
	if let Some(tag) = acl.dst.iter().find(|t| t.kind.is_user_kind()) {
		return violated(
			Invariant::AclTagResolves,
			format!("{} destination {} names a user", acl.name, tag.value),
		);
	}

	if let Some(tag) = acl.src.iter().chain(acl.dst.iter()).find(|t| !tag_resolves(t, view)) {
		return violated(
			Invariant::AclTagResolves,
			format!("{} references unknown {} {}", acl.name, tag.kind.as_str(), tag.value),
		);
	}
	Ok(())
}

/// `existing` is every grant for the same network and user, excluding
/// `grant` itself.
pub fn validate_grant(grant: &JitGrant, existing: &[JitGrant], now: DateTime<Utc>) -> StoreResult<()> {
	if grant.expires_at <= grant.granted_at {
		return violated(
			Invariant::JitGrantWindow,
			format!("grant {} expires before it starts", grant.id),
		);
	}
	if let Some(active) = existing
		.iter()
		.find(|g| g.id != grant.id && g.is_active_at(now))
	{
		return violated(
			Invariant::JitSingleGrant,
			format!("user {} already holds active grant {}", grant.user, active.id),
		);
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use netweave_common_core::fixtures::{self, add_node, node_mut};
	use netweave_common_core::{HostOs, JitRequestId, NetworkId, Tag, User, PlatformRole};

	fn net() -> NetworkSnapshot {
		fixtures::network("n1", "10.0.0.0/24".parse().unwrap())
	}

	#[test]
	fn address_outside_cidr_is_rejected() {
		let mut snap = net();
		let a = add_node(&mut snap, "a", "10.0.1.1".parse().unwrap());
		let err = validate_node(&snap.nodes[&a], &snap).unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::AddressInCidr));
	}

	#[test]
	fn duplicate_address_is_rejected() {
		let mut snap = net();
		let a = add_node(&mut snap, "a", "10.0.0.1".parse().unwrap());
		add_node(&mut snap, "b", "10.0.0.1".parse().unwrap());
		let err = validate_node(&snap.nodes[&a], &snap).unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::AddressUnique));
	}

	#[test]
	fn half_written_relay_edge_is_rejected() {
		let mut snap = net();
		let r = add_node(&mut snap, "r", "10.0.0.1".parse().unwrap());
		let c = add_node(&mut snap, "c", "10.0.0.2".parse().unwrap());
		{
			let child = node_mut(&mut snap, &c);
			child.is_relayed = true;
			child.relayed_by = Some(r);
		}
		let err = validate_node(&snap.nodes[&c], &snap).unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::RelayConsistency));

		{
			let relay = node_mut(&mut snap, &r);
			relay.is_relay = true;
			relay.relayed_nodes.insert(c);
		}
		validate_node(&snap.nodes[&c], &snap).unwrap();
		validate_node(&snap.nodes[&r], &snap).unwrap();
	}

	#[test]
	fn relayed_ingress_is_rejected() {
		let mut snap = net();
		let r = add_node(&mut snap, "r", "10.0.0.1".parse().unwrap());
		let c = add_node(&mut snap, "c", "10.0.0.2".parse().unwrap());
		node_mut(&mut snap, &r).is_relay = true;
		node_mut(&mut snap, &r).relayed_nodes.insert(c);
		let child = node_mut(&mut snap, &c);
		child.is_relayed = true;
		child.relayed_by = Some(r);
		child.is_ingress_gateway = true;
		let err = validate_node(&snap.nodes[&c], &snap).unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::RelayedNotIngress));
	}

	#[test]
	fn auto_relay_pairs_must_mirror() {
		let mut snap = net();
		let a = add_node(&mut snap, "a", "10.0.0.1".parse().unwrap());
		let b = add_node(&mut snap, "b", "10.0.0.2".parse().unwrap());
		let g = add_node(&mut snap, "g", "10.0.0.3".parse().unwrap());
		node_mut(&mut snap, &g).is_auto_relay = true;
		node_mut(&mut snap, &a).auto_relayed_peers.insert(b, g);
		let err = validate_node(&snap.nodes[&a], &snap).unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::AutoRelaySymmetric));

		node_mut(&mut snap, &b).auto_relayed_peers.insert(a, g);
		validate_node(&snap.nodes[&a], &snap).unwrap();
	}

	#[test]
	fn second_failover_is_rejected() {
		let mut snap = net();
		let a = add_node(&mut snap, "a", "10.0.0.1".parse().unwrap());
		let b = add_node(&mut snap, "b", "10.0.0.2".parse().unwrap());
		node_mut(&mut snap, &a).is_fail_over = true;
		validate_node(&snap.nodes[&a], &snap).unwrap();

		node_mut(&mut snap, &b).is_fail_over = true;
		let err = validate_node(&snap.nodes[&b], &snap).unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::SingleFailover));
	}

	#[test]
	fn internet_gateway_needs_linux() {
		let mut snap = net();
		let a = add_node(&mut snap, "a", "10.0.0.1".parse().unwrap());
		node_mut(&mut snap, &a).is_internet_gateway = true;
		validate_node(&snap.nodes[&a], &snap).unwrap();

		let host_id = snap.nodes[&a].host_id;
		snap.hosts.get_mut(&host_id).unwrap().os = HostOs::Windows;
		let err = validate_node(&snap.nodes[&a], &snap).unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::InternetGatewayLinux));
	}

	#[test]
	fn acl_tags_must_resolve() {
		let mut snap = net();
		let a = add_node(&mut snap, "a", "10.0.0.1".parse().unwrap());
		let tag = Tag::new(NetworkId::from("n1"), "db");
		snap.tags.insert(tag.id.clone(), tag.clone());

		let ok = Acl::new(
			NetworkId::from("n1"),
			"a-to-db",
			RuleType::DevicePolicy,
			vec![AclTag::new(AclTagKind::Node, a.to_string())],
			vec![AclTag::new(AclTagKind::NodeTag, tag.id.as_str())],
		);
		validate_acl(&ok, &snap).unwrap();

		let dangling = Acl::new(
			NetworkId::from("n1"),
			"dangling",
			RuleType::DevicePolicy,
			vec![AclTag::wildcard()],
			vec![AclTag::new(AclTagKind::NodeTag, "n1.missing")],
		);
		assert_eq!(
			validate_acl(&dangling, &snap).unwrap_err().invariant(),
			Some(Invariant::AclTagResolves)
		);
	}

	#[test]
	fn user_policy_source_cannot_name_node() {
		let mut snap = net();
		let a = add_node(&mut snap, "a", "10.0.0.1".parse().unwrap());
		snap.users.insert("u".into(), User::new("u", PlatformRole::PlatformUser));

		let bad = Acl::new(
			NetworkId::from("n1"),
			"bad",
			RuleType::UserPolicy,
			vec![AclTag::new(AclTagKind::Node, a.to_string())],
			vec![AclTag::wildcard()],
		);
		assert!(validate_acl(&bad, &snap).is_err());

		let good = Acl::new(
			NetworkId::from("n1"),
			"good",
			RuleType::UserPolicy,
			vec![AclTag::new(AclTagKind::User, "u")],
			vec![AclTag::new(AclTagKind::Node, a.to_string())],
		);
		validate_acl(&good, &snap).unwrap();
	}

	#[test]
	fn second_active_grant_is_rejected() {
		let now = Utc::now();
		let grant = |hours: i64| JitGrant {
			id: netweave_common_core::JitGrantId::new(),
			network: NetworkId::from("n1"),
			user: "u".into(),
			request_id: JitRequestId::new(),
			granted_at: now,
			expires_at: now + chrono::Duration::hours(hours),
		};
		let first = grant(1);
		let second = grant(2);
		assert_eq!(
			validate_grant(&second, &[first.clone()], now).unwrap_err().invariant(),
			Some(Invariant::JitSingleGrant)
		);
		assert_eq!(
			validate_grant(&grant(0), &[], now).unwrap_err().invariant(),
			Some(Invariant::JitGrantWindow)
		);
		validate_grant(&second, &[], now).unwrap();
	}

	#[test]
	fn ext_client_needs_ingress_and_free_address() {
		let mut snap = net();
		let gw = add_node(&mut snap, "gw", "10.0.0.1".parse().unwrap());
		let mut client = ExtClient::new("c1", NetworkId::from("n1"), gw, "pk-c1");
		client.address = Some("10.0.0.5".parse().unwrap());
		assert!(matches!(
			validate_ext_client(&client, &snap),
			Err(StoreError::NotFound(_))
		));

		node_mut(&mut snap, &gw).is_ingress_gateway = true;
		validate_ext_client(&client, &snap).unwrap();

		client.address = Some("10.0.0.1".parse().unwrap());
		assert_eq!(
			validate_ext_client(&client, &snap).unwrap_err().invariant(),
			Some(Invariant::AddressUnique)
		);
	}
}
