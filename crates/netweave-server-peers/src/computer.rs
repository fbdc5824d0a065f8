// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-node peer lists.
//!
//! A [`PeerComputer`] is built over one [`NetworkSnapshot`] and is a pure
//! function of it: the same snapshot always yields the same updates.

use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, SocketAddr};

use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use netweave_common_core::{
	ExtClient, Host, NetworkSnapshot, Node, NodeId, PeerConfig, PeerRouteInfo, PeerUpdate,
};
use netweave_server_policy::{Member, PolicyEngine};
use tracing::{debug, instrument, warn};

use crate::dns::render_hosts;
use crate::error::{PeersError, Result};

/// Keepalive pushed to every peer of a server node.
pub const SERVER_KEEPALIVE_SECS: u32 = 5;

fn default_routes() -> [IpNet; 2] {
	[IpNet::V4(Ipv4Net::default()), IpNet::V6(Ipv6Net::default())]
}

fn is_live(node: &Node) -> bool {
	node.connected && !node.pending_delete
}

fn primary_address(addrs: Vec<IpAddr>) -> String {
	addrs.first().map(|a| a.to_string()).unwrap_or_default()
}

struct Entry {
	config: PeerConfig,
	route: PeerRouteInfo,
}

pub struct PeerComputer<'a> {
	snap: &'a NetworkSnapshot,
	engine: PolicyEngine<'a>,
	server_version: String,
}

impl<'a> PeerComputer<'a> {
	pub fn new(snap: &'a NetworkSnapshot, server_version: impl Into<String>) -> Self {
		Self {
			snap,
			engine: PolicyEngine::new(snap),
			server_version: server_version.into(),
		}
	}

	pub fn engine(&self) -> &PolicyEngine<'a> {
		&self.engine
	}

	/// The full peer update for one node.
	#[instrument(skip(self), fields(network = %self.snap.network.id))]
	pub fn peer_update(&self, id: &NodeId) -> Result<PeerUpdate> {
		let node = self.snap.node(id).ok_or(PeersError::UnknownNode(*id))?;
		Ok(self.build(node))
	}

	/// Updates for every live node of the network.
	pub fn peer_updates(&self) -> BTreeMap<NodeId, PeerUpdate> {
		self.snap
			.nodes
			.values()
			.filter(|n| is_live(n))
			.map(|n| (n.id, self.build(n)))
			.collect()
	}

	/// Peer entries only; the rest of [`PeerComputer::peer_update`] is
	/// skipped.
	pub fn peers(&self, node: &Node) -> Vec<PeerConfig> {
		self.entries(node).into_iter().map(|e| e.config).collect()
	}

	fn build(&self, node: &Node) -> PeerUpdate {
		let entries = self.entries(node);
		let mut peers = Vec::with_capacity(entries.len());
		let mut peer_ids = BTreeMap::new();
		for entry in entries {
			peer_ids.insert(entry.config.public_key.clone(), entry.route);
			peers.push(entry.config);
		}
		debug!(node_id = %node.id, peers = peers.len(), "computed peers");
		PeerUpdate {
			network: self.snap.network.id.clone(),
			peers,
			dns: render_hosts(self.snap),
			server_version: self.server_version.clone(),
			peer_ids,
			fw_rules: self.engine.fw_rules(node),
			egress_ranges: self.snap.egress_ranges_for(node),
		}
	}

	fn entries(&self, node: &Node) -> Vec<Entry> {
		let mut out = match self.relay_of(node) {
			Some(relay) => self.relayed_entries(node, relay),
			None => self.direct_entries(node),
		};
		if node.is_ingress_gateway {
			out.extend(
				self.snap
					.ext_clients_on(&node.id)
					.filter(|c| c.enabled)
					.map(|c| self.client_entry(node, c)),
			);
		}
		out
	}

	fn member(&self, id: &NodeId) -> Option<&Member> {
		self.engine.member(&id.to_string())
	}

	fn allowed(&self, a: &Member, b: &Member) -> bool {
		self.engine.is_peer_allowed(a, b, true)
	}

	fn clients_of(&self, ingress: &Node) -> impl Iterator<Item = &'a ExtClient> + '_ {
		let id = ingress.id;
		self.snap
			.ext_clients
			.values()
			.filter(move |c| c.ingress_id == id && c.enabled)
	}

	/// Whether `node` needs a tunnel towards `peer`, either for itself or on
	/// behalf of the clients and relayed nodes it carries.
	fn reachable(&self, node: &Node, peer: &Node) -> bool {
		let (Some(a), Some(b)) = (self.member(&node.id), self.member(&peer.id)) else {
			return false;
		};
		if self.allowed(a, b) {
			return true;
		}
		if node.is_ingress_gateway {
			let via_client = self
				.clients_of(node)
				.filter_map(|c| self.engine.member(&c.client_id))
				.any(|c| self.allowed(c, b));
			if via_client {
				return true;
			}
		}
		if node.is_relay {
			return self
				.relayed_children(node)
				.filter(|k| k.id != peer.id)
				.filter_map(|k| self.member(&k.id))
				.any(|k| self.allowed(k, b));
		}
		false
	}

	/// The live relay carrying `node`, if any.
	fn relay_of(&self, node: &Node) -> Option<&'a Node> {
		let relay = self.snap.node(&node.relayed_by?)?;
		(relay.is_relay && is_live(relay) && relay.relayed_nodes.contains(&node.id)).then_some(relay)
	}

	fn relayed_children<'n>(&'n self, relay: &'n Node) -> impl Iterator<Item = &'a Node> + 'n {
		let snap = self.snap;
		relay
			.relayed_nodes
			.iter()
			.filter_map(move |id| snap.node(id))
			.filter(move |k| is_live(k) && k.relayed_by == Some(relay.id))
	}

	/// Egress CIDRs `via` advertises to `node`. A CIDR that would capture
	/// the gateway's own endpoint or `node`'s local address is left out.
	fn egress_routes(&self, node: &Node, via: &Node) -> Vec<IpNet> {
		if !via.is_egress_gateway {
			return Vec::new();
		}
		let endpoint = self.endpoint_ip(via);
		let local = node.local_address.map(|l| l.addr());
		self.snap
			.egress_ranges_for(via)
			.into_iter()
			.filter(|range| {
				if range.prefix_len() == 0 {
					return true;
				}
				let overlaps = endpoint.map_or(false, |ip| range.contains(&ip))
					|| local.map_or(false, |ip| range.contains(&ip));
				if overlaps {
					debug!(gateway = %via.id, %range, "egress range overlaps endpoint, omitting");
				}
				!overlaps
			})
			.collect()
	}

	/// Addresses of the policy-allowed clients attached to `ingress`.
	fn client_routes(&self, node: &Node, ingress: &Node) -> Vec<IpNet> {
		let Some(me) = self.member(&node.id) else {
			return Vec::new();
		};
		self.clients_of(ingress)
			.filter(|c| {
				self.engine
					.member(&c.client_id)
					.map_or(false, |m| self.allowed(me, m))
			})
			.flat_map(|c| c.allowed_ips())
			.collect()
	}

	/// Everything `node` reaches through the tunnel to `peer`, relayed
	/// children included.
	fn routes_via(&self, node: &Node, peer: &Node) -> BTreeSet<IpNet> {
		let mut out = BTreeSet::new();
		self.extend_own(&mut out, node, peer);
		if peer.is_internet_gateway && node.internet_gw_id == Some(peer.id) {
			out.extend(default_routes());
		}
		if peer.is_relay {
			for child in self.relayed_children(peer).filter(|k| k.id != node.id) {
				self.extend_own(&mut out, node, child);
			}
		}
		out
	}

	fn extend_own(&self, out: &mut BTreeSet<IpNet>, node: &Node, peer: &Node) {
		if self.reachable(node, peer) {
			out.extend(peer.host_routes());
			out.extend(self.egress_routes(node, peer));
		}
		if peer.is_ingress_gateway {
			out.extend(self.client_routes(node, peer));
		}
	}

	/// A relayed node talks to its relay only; every other destination is
	/// folded into the relay's allowed IPs.
	fn relayed_entries(&self, node: &Node, relay: &'a Node) -> Vec<Entry> {
		let mut routes = self.routes_via(node, relay);
		// The relay must stay reachable whatever the policies say.
		routes.extend(relay.host_routes());
		for peer in self.candidates(node) {
			if peer.id == relay.id || self.relay_of(peer).is_some() {
				continue;
			}
			routes.extend(self.routes_via(node, peer));
		}
		self.node_entry(node, relay, routes).into_iter().collect()
	}

	fn candidates<'n>(&'n self, node: &'n Node) -> impl Iterator<Item = &'a Node> + 'n {
		let snap = self.snap;
		snap.nodes
			.values()
			.filter(move |m| m.id != node.id && is_live(m))
	}

	/// Symmetric auto-relay pairs of `node`: peer -> auto-relay.
	fn auto_relay_pairs(&self, node: &Node) -> BTreeMap<NodeId, NodeId> {
		node.auto_relayed_peers
			.iter()
			.filter(|(peer, via)| {
				let relay_ok = self
					.snap
					.node(via)
					.map_or(false, |g| g.is_auto_relay && is_live(g) && g.id != node.id);
				let mirrored = self
					.snap
					.node(peer)
					.map_or(false, |q| is_live(q) && q.auto_relayed_peers.get(&node.id) == Some(*via));
				relay_ok && mirrored && *peer != *via
			})
			.map(|(p, g)| (*p, *g))
			.collect()
	}

	/// The failover node of `node` and the peers whose traffic it carries.
	/// Only pairs recorded on both sides count.
	fn failover_pairs(&self, node: &Node) -> Option<(NodeId, BTreeSet<NodeId>)> {
		let failover = self.snap.node(&node.failed_over_by?)?;
		if !failover.is_fail_over || !is_live(failover) {
			return None;
		}
		let peers = node
			.fail_over_peers
			.iter()
			.filter_map(|id| self.snap.node(id))
			.filter(|p| {
				p.id != failover.id
					&& is_live(p)
					&& p.failed_over_by == Some(failover.id)
					&& p.fail_over_peers.contains(&node.id)
			})
			.map(|p| p.id)
			.collect();
		Some((failover.id, peers))
	}

	fn direct_entries(&self, node: &Node) -> Vec<Entry> {
		let auto = self.auto_relay_pairs(node);
		let (failover, failed_over) = match self.failover_pairs(node) {
			Some((f, peers)) => (Some(f), peers),
			None => (None, BTreeSet::new()),
		};

		let mut out = Vec::new();
		for peer in self.candidates(node) {
			if let Some(relay) = self.relay_of(peer) {
				if relay.id != node.id {
					continue;
				}
				// Relays forward for their children unconditionally.
				let mut routes = self.routes_via(node, peer);
				routes.extend(peer.host_routes());
				routes.extend(self.egress_routes(node, peer));
				routes.extend(self.clients_of(peer).flat_map(|c| c.allowed_ips()));
				out.extend(self.node_entry(node, peer, routes));
				continue;
			}
			if auto.contains_key(&peer.id) || failed_over.contains(&peer.id) {
				continue;
			}

			let mut routes = self.routes_via(node, peer);
			for (q, _) in auto.iter().filter(|(_, via)| **via == peer.id) {
				if let Some(q) = self.snap.node(q) {
					routes.extend(self.routes_via(node, q));
				}
			}
			if failover == Some(peer.id) {
				for p in failed_over.iter().filter(|p| !auto.contains_key(*p)) {
					if let Some(p) = self.snap.node(p) {
						routes.extend(self.routes_via(node, p));
					}
				}
			}
			out.extend(self.node_entry(node, peer, routes));
		}
		out
	}

	fn endpoint_ip(&self, node: &Node) -> Option<IpAddr> {
		node.endpoint
			.or_else(|| self.snap.host_of(node).and_then(|h| h.endpoint_ip))
	}

	fn listen_port(node: &Node, host: &Host) -> u16 {
		if node.listen_port != 0 {
			node.listen_port
		} else {
			host.listen_port
		}
	}

	/// Public endpoint of `peer`, or its local address when both sides sit
	/// behind the same public address on a shared local range.
	fn endpoint(&self, node: &Node, peer: &Node, peer_host: &Host) -> Option<SocketAddr> {
		let port = Self::listen_port(peer, peer_host);
		let public = self.endpoint_ip(peer);
		if let (Some(mine), Some(theirs)) = (node.local_address, peer.local_address) {
			let same_nat = match (self.endpoint_ip(node), public) {
				(Some(a), Some(b)) => a == b,
				_ => false,
			};
			if same_nat && mine != theirs && mine.trunc().contains(&theirs.addr()) {
				return Some(SocketAddr::new(theirs.addr(), port));
			}
		}
		public.map(|ip| SocketAddr::new(ip, port))
	}

	fn keepalive(node: &Node) -> Option<u32> {
		if node.is_server {
			Some(SERVER_KEEPALIVE_SECS)
		} else if node.persistent_keepalive > 0 {
			Some(node.persistent_keepalive)
		} else {
			None
		}
	}

	fn node_entry(&self, node: &Node, peer: &Node, routes: BTreeSet<IpNet>) -> Option<Entry> {
		if routes.is_empty() {
			return None;
		}
		let Some(host) = self.snap.host_of(peer) else {
			warn!(peer = %peer.id, "peer host missing from snapshot, skipping");
			return None;
		};
		Some(Entry {
			config: PeerConfig {
				public_key: host.public_key.clone(),
				endpoint: self.endpoint(node, peer, host),
				allowed_ips: routes.into_iter().collect(),
				persistent_keepalive: Self::keepalive(node),
				replace_allowed_ips: true,
			},
			route: PeerRouteInfo {
				id: peer.id.to_string(),
				address: primary_address(peer.addresses()),
				name: host.name.clone(),
			},
		})
	}

	fn client_entry(&self, node: &Node, client: &ExtClient) -> Entry {
		let address = client
			.address
			.map(IpAddr::V4)
			.or(client.address6.map(IpAddr::V6))
			.map(|a| a.to_string())
			.unwrap_or_default();
		Entry {
			config: PeerConfig {
				public_key: client.public_key.clone(),
				endpoint: None,
				allowed_ips: client.allowed_ips(),
				persistent_keepalive: Self::keepalive(node),
				replace_allowed_ips: true,
			},
			route: PeerRouteInfo {
				id: client.client_id.clone(),
				address,
				name: client.client_id.clone(),
			},
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use netweave_common_core::fixtures::{self, add_ext_client, add_node, node_mut, set_default_policy};
	use netweave_common_core::{Acl, AclTag, Egress, RuleType};
	use proptest::prelude::*;

	fn net(s: &str) -> IpNet {
		s.parse().unwrap()
	}

	fn mesh() -> (NetworkSnapshot, NodeId, NodeId, NodeId) {
		let mut s = fixtures::network("n1", "10.0.0.0/24".parse().unwrap());
		let a = add_node(&mut s, "a", "10.0.0.1".parse().unwrap());
		let b = add_node(&mut s, "b", "10.0.0.2".parse().unwrap());
		let c = add_node(&mut s, "c", "10.0.0.3".parse().unwrap());
		(s, a, b, c)
	}

	fn allowed_ips(update: &PeerUpdate, key: &str) -> Vec<IpNet> {
		update.peer(key).map(|p| p.allowed_ips.clone()).unwrap_or_default()
	}

	#[test]
	fn full_mesh_under_default_policy() {
		let (s, a, _, _) = mesh();
		let update = PeerComputer::new(&s, "0.1.0").peer_update(&a).unwrap();
		assert_eq!(update.peers.len(), 2);
		assert_eq!(allowed_ips(&update, "pk-b"), vec![net("10.0.0.2/32")]);
		assert_eq!(allowed_ips(&update, "pk-c"), vec![net("10.0.0.3/32")]);
		assert_eq!(update.peer_ids["pk-b"].name, "b");
		assert_eq!(update.server_version, "0.1.0");
	}

	#[test]
	fn disconnected_peers_are_left_out() {
		let (mut s, a, b, _) = mesh();
		node_mut(&mut s, &b).connected = false;
		let update = PeerComputer::new(&s, "0.1.0").peer_update(&a).unwrap();
		assert!(update.peer("pk-b").is_none());
		assert!(update.peer("pk-c").is_some());
	}

	#[test]
	fn relay_carries_its_children() {
		let (mut s, a, b, c) = mesh();
		set_default_policy(&mut s, RuleType::DevicePolicy, false);
		s.acls.push(Acl::new(
			s.network.id.clone(),
			"all",
			RuleType::DevicePolicy,
			vec![AclTag::wildcard()],
			vec![AclTag::wildcard()],
		));
		node_mut(&mut s, &b).is_relay = true;
		node_mut(&mut s, &b).relayed_nodes.insert(c);
		node_mut(&mut s, &c).is_relayed = true;
		node_mut(&mut s, &c).relayed_by = Some(b);

		let computer = PeerComputer::new(&s, "0.1.0");
		let from_a = computer.peer_update(&a).unwrap();
		assert_eq!(from_a.peers.len(), 1);
		assert_eq!(allowed_ips(&from_a, "pk-b"), vec![net("10.0.0.2/32"), net("10.0.0.3/32")]);

		let from_c = computer.peer_update(&c).unwrap();
		assert_eq!(from_c.peers.len(), 1);
		assert_eq!(allowed_ips(&from_c, "pk-b"), vec![net("10.0.0.1/32"), net("10.0.0.2/32")]);

		let from_b = computer.peer_update(&b).unwrap();
		assert_eq!(allowed_ips(&from_b, "pk-c"), vec![net("10.0.0.3/32")]);
	}

	#[test]
	fn egress_ranges_ride_on_the_gateway() {
		let (mut s, a, _, c) = mesh();
		node_mut(&mut s, &c).is_egress_gateway = true;
		let mut egress = Egress::new(s.network.id.clone(), "lan", Some(net("192.168.50.0/24")));
		egress.nodes.insert(c);
		s.egresses.insert(egress.id, egress);

		let computer = PeerComputer::new(&s, "0.1.0");
		let update = computer.peer_update(&a).unwrap();
		assert_eq!(allowed_ips(&update, "pk-c"), vec![net("10.0.0.3/32"), net("192.168.50.0/24")]);
		assert_eq!(computer.peer_update(&c).unwrap().egress_ranges, vec![net("192.168.50.0/24")]);
	}

	#[test]
	fn egress_range_covering_endpoint_is_dropped() {
		let (mut s, a, _, c) = mesh();
		node_mut(&mut s, &c).is_egress_gateway = true;
		node_mut(&mut s, &c).endpoint = Some("192.168.50.7".parse().unwrap());
		let mut egress = Egress::new(s.network.id.clone(), "lan", Some(net("192.168.50.0/24")));
		egress.nodes.insert(c);
		s.egresses.insert(egress.id, egress);

		let update = PeerComputer::new(&s, "0.1.0").peer_update(&a).unwrap();
		assert_eq!(allowed_ips(&update, "pk-c"), vec![net("10.0.0.3/32")]);
		let endpoint = update.peer("pk-c").unwrap().endpoint.unwrap();
		assert_eq!(endpoint.ip().to_string(), "192.168.50.7");
	}

	#[test]
	fn internet_gateway_adds_default_routes() {
		let (mut s, a, b, _) = mesh();
		node_mut(&mut s, &a).is_internet_gateway = true;
		node_mut(&mut s, &a).inet_node_clients.insert(b);
		node_mut(&mut s, &b).internet_gw_id = Some(a);

		let computer = PeerComputer::new(&s, "0.1.0");
		let from_b = computer.peer_update(&b).unwrap();
		let ips = allowed_ips(&from_b, "pk-a");
		assert!(ips.contains(&net("0.0.0.0/0")));
		assert!(ips.contains(&net("::/0")));
		assert!(computer.peer_update(&a).unwrap().peer("pk-b").is_some());
	}

	#[test]
	fn ingress_lists_clients_and_peers_see_them() {
		let (mut s, a, b, _) = mesh();
		node_mut(&mut s, &a).is_ingress_gateway = true;
		add_ext_client(&mut s, a, "laptop", "10.0.0.40".parse().unwrap(), None);

		let computer = PeerComputer::new(&s, "0.1.0");
		let from_a = computer.peer_update(&a).unwrap();
		assert_eq!(allowed_ips(&from_a, "pk-laptop"), vec![net("10.0.0.40/32")]);
		assert_eq!(from_a.peer_ids["pk-laptop"].id, "laptop");

		let from_b = computer.peer_update(&b).unwrap();
		assert_eq!(allowed_ips(&from_b, "pk-a"), vec![net("10.0.0.1/32"), net("10.0.0.40/32")]);
	}

	#[test]
	fn auto_relay_pair_goes_through_the_relay() {
		let (mut s, a, b, c) = mesh();
		node_mut(&mut s, &b).is_auto_relay = true;
		node_mut(&mut s, &a).auto_relayed_peers.insert(c, b);
		node_mut(&mut s, &c).auto_relayed_peers.insert(a, b);

		let computer = PeerComputer::new(&s, "0.1.0");
		let from_a = computer.peer_update(&a).unwrap();
		assert!(from_a.peer("pk-c").is_none());
		assert_eq!(allowed_ips(&from_a, "pk-b"), vec![net("10.0.0.2/32"), net("10.0.0.3/32")]);

		// One-sided records are ignored.
		node_mut(&mut s, &c).auto_relayed_peers.clear();
		let computer = PeerComputer::new(&s, "0.1.0");
		assert!(computer.peer_update(&a).unwrap().peer("pk-c").is_some());
	}

	#[test]
	fn failover_carries_recorded_pairs() {
		let (mut s, a, b, c) = mesh();
		node_mut(&mut s, &b).is_fail_over = true;
		node_mut(&mut s, &a).failed_over_by = Some(b);
		node_mut(&mut s, &a).fail_over_peers.insert(c);
		node_mut(&mut s, &c).failed_over_by = Some(b);
		node_mut(&mut s, &c).fail_over_peers.insert(a);

		let from_a = PeerComputer::new(&s, "0.1.0").peer_update(&a).unwrap();
		assert!(from_a.peer("pk-c").is_none());
		assert_eq!(allowed_ips(&from_a, "pk-b"), vec![net("10.0.0.2/32"), net("10.0.0.3/32")]);
	}

	#[test]
	fn keepalive_and_local_endpoint() {
		let (mut s, a, b, _) = mesh();
		node_mut(&mut s, &a).is_server = true;
		for (id, local) in [(a, "192.168.1.10/24"), (b, "192.168.1.11/24")] {
			let n = node_mut(&mut s, &id);
			n.local_address = Some(net(local));
			n.endpoint = Some("203.0.113.9".parse().unwrap());
		}
		node_mut(&mut s, &b).persistent_keepalive = 25;

		let computer = PeerComputer::new(&s, "0.1.0");
		let from_a = computer.peer_update(&a).unwrap();
		let to_b = from_a.peer("pk-b").unwrap();
		assert_eq!(to_b.persistent_keepalive, Some(SERVER_KEEPALIVE_SECS));
		assert_eq!(to_b.endpoint.unwrap().ip().to_string(), "192.168.1.11");

		let from_b = computer.peer_update(&b).unwrap();
		assert_eq!(from_b.peer("pk-a").unwrap().persistent_keepalive, Some(25));
	}

	#[test]
	fn unknown_node_is_not_found() {
		let (s, ..) = mesh();
		let err = PeerComputer::new(&s, "0.1.0").peer_update(&NodeId::new()).unwrap_err();
		assert!(matches!(err, PeersError::UnknownNode(_)));
	}

	proptest! {
		#[test]
		fn peers_are_symmetric_and_deterministic(
			edges in proptest::collection::vec((0usize..4, 0usize..4), 0..6),
			down in proptest::collection::btree_set(0usize..4, 0..2),
		) {
			let mut s = fixtures::network("n1", "10.0.0.0/24".parse().unwrap());
			set_default_policy(&mut s, RuleType::DevicePolicy, false);
			let ids: Vec<NodeId> = (0..4)
				.map(|i| add_node(&mut s, &format!("h{i}"), format!("10.0.0.{}", i + 1).parse().unwrap()))
				.collect();
			for (src, dst) in edges {
				s.acls.push(Acl::new(
					s.network.id.clone(),
					"p",
					RuleType::DevicePolicy,
					vec![AclTag::new(netweave_common_core::AclTagKind::Node, ids[src].to_string())],
					vec![AclTag::new(netweave_common_core::AclTagKind::Node, ids[dst].to_string())],
				));
			}
			for i in &down {
				node_mut(&mut s, &ids[*i]).connected = false;
			}

			let computer = PeerComputer::new(&s, "0.1.0");
			let again = PeerComputer::new(&s, "0.1.0");
			for (i, a) in ids.iter().enumerate() {
				if down.contains(&i) {
					continue;
				}
				let from_a = computer.peer_update(a).unwrap();
				prop_assert_eq!(&from_a, &again.peer_update(a).unwrap());
				for (j, b) in ids.iter().enumerate() {
					if i == j || down.contains(&j) {
						continue;
					}
					let from_b = computer.peer_update(b).unwrap();
					let a_sees_b = from_a.peer(&format!("pk-h{j}")).is_some();
					let b_sees_a = from_b.peer(&format!("pk-h{i}")).is_some();
					prop_assert_eq!(a_sees_b, b_sees_a);
				}
			}
		}

		#[test]
		fn relayed_pairs_reach_each_other_through_the_relay(
			edges in proptest::collection::vec((0usize..5, 0usize..5), 0..8),
			children in proptest::collection::btree_set(1usize..5, 1..4),
		) {
			let mut s = fixtures::network("n1", "10.0.0.0/24".parse().unwrap());
			set_default_policy(&mut s, RuleType::DevicePolicy, false);
			let ids: Vec<NodeId> = (0..5)
				.map(|i| add_node(&mut s, &format!("h{i}"), format!("10.0.0.{}", i + 1).parse().unwrap()))
				.collect();
			for (src, dst) in edges {
				s.acls.push(Acl::new(
					s.network.id.clone(),
					"p",
					RuleType::DevicePolicy,
					vec![AclTag::new(netweave_common_core::AclTagKind::Node, ids[src].to_string())],
					vec![AclTag::new(netweave_common_core::AclTagKind::Node, ids[dst].to_string())],
				));
			}
			let relay = ids[0];
			node_mut(&mut s, &relay).is_relay = true;
			for i in &children {
				node_mut(&mut s, &relay).relayed_nodes.insert(ids[*i]);
				let child = node_mut(&mut s, &ids[*i]);
				child.is_relayed = true;
				child.relayed_by = Some(relay);
			}

			let computer = PeerComputer::new(&s, "0.1.0");
			let engine = computer.engine();
			for (i, x) in ids.iter().enumerate().skip(1) {
				let from_x = computer.peer_update(x).unwrap();
				if children.contains(&i) {
					prop_assert_eq!(from_x.peers.len(), 1, "relayed h{} talks to its relay only", i);
					prop_assert!(from_x.peer("pk-h0").is_some());
				}
				for (j, y) in ids.iter().enumerate().skip(1) {
					if i == j || !engine.is_node_allowed(x, y, true).unwrap() {
						continue;
					}
					let target = net(&format!("10.0.0.{}/32", j + 1));
					let carried_by_relay = children.contains(&i) || children.contains(&j);
					let key = if carried_by_relay { "pk-h0".to_string() } else { format!("pk-h{j}") };
					prop_assert!(
						allowed_ips(&from_x, &key).contains(&target),
						"h{} cannot reach h{} via {}", i, j, key
					);
					if children.contains(&j) {
						let child_key = format!("pk-h{j}");
						prop_assert!(from_x.peer(&child_key).is_none());
					}
				}
			}
		}
	}
}
