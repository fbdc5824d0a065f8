// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Derived node status. Nothing here is persisted.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use netweave_common_core::{ExtClient, Metrics, NetworkSnapshot, Node, NodeId, NodeStatus, RuleType};
use netweave_server_policy::PolicyEngine;

use crate::error::{PeersError, Result};

/// Default check-in threshold, in seconds.
pub const DEFAULT_CHECKIN_THRESHOLD_SECS: i64 = 300;

pub struct StatusEngine<'a> {
	snap: &'a NetworkSnapshot,
	policy: PolicyEngine<'a>,
	threshold: Duration,
	now: DateTime<Utc>,
}

impl<'a> StatusEngine<'a> {
	pub fn new(snap: &'a NetworkSnapshot, threshold: Duration, now: DateTime<Utc>) -> Self {
		Self {
			snap,
			policy: PolicyEngine::new(snap),
			threshold,
			now,
		}
	}

	fn stale(&self, node: &Node) -> bool {
		self.now - node.last_check_in > self.threshold
	}

	fn default_open(&self) -> bool {
		self.snap.default_policy(RuleType::DevicePolicy).is_some()
	}

	pub fn status_of(&self, id: &NodeId) -> Result<NodeStatus> {
		let node = self.snap.node(id).ok_or(PeersError::UnknownNode(*id))?;
		Ok(self.node_status(node))
	}

	pub fn node_status(&self, node: &Node) -> NodeStatus {
		if !node.connected {
			return NodeStatus::Disconnected;
		}
		if self.stale(node) {
			return NodeStatus::Offline;
		}
		match self.snap.metrics.get(&node.id) {
			Some(metrics) if !metrics.connectivity.is_empty() => self.connectivity(node, metrics, true),
			_ => NodeStatus::Online,
		}
	}

	/// Status of an ext-client as seen by its ingress gateway.
	pub fn ext_client_status(&self, client: &ExtClient) -> NodeStatus {
		if !client.enabled || self.snap.node(&client.ingress_id).is_none() {
			return NodeStatus::Offline;
		}
		let Some(metrics) = self.snap.metrics.get(&client.ingress_id) else {
			return NodeStatus::Unknown;
		};
		match metrics.peer(&client.client_id) {
			Some(m) if m.connected => NodeStatus::Online,
			Some(_) => NodeStatus::Offline,
			None => NodeStatus::Unknown,
		}
	}

	pub fn client_status_of(&self, client_id: &str) -> Result<NodeStatus> {
		let client = self
			.snap
			.ext_clients
			.get(client_id)
			.ok_or_else(|| PeersError::UnknownExtClient(client_id.to_string()))?;
		Ok(self.ext_client_status(client))
	}

	/// Every node and ext-client of the network keyed by id.
	pub fn network_status(&self) -> BTreeMap<String, NodeStatus> {
		let nodes = self
			.snap
			.nodes
			.values()
			.map(|n| (n.id.to_string(), self.node_status(n)));
		let clients = self
			.snap
			.ext_clients
			.values()
			.map(|c| (c.client_id.clone(), self.ext_client_status(c)));
		nodes.chain(clients).collect()
	}

	fn peer_counts(&self, node: &Node, peer: &Node) -> bool {
		if self.stale(peer) {
			return false;
		}
		if self.default_open() {
			return true;
		}
		self.policy
			.is_node_allowed(&node.id, &peer.id, true)
			.unwrap_or(false)
	}

	/// Online when every reachable peer reports a handshake, Error when none
	/// does, Warning in between. Peers that are themselves in Error are not
	/// held against the node; `nested` bounds that lookup to one level.
	fn connectivity(&self, node: &Node, metrics: &Metrics, nested: bool) -> NodeStatus {
		let mut considered = 0usize;
		let mut unreachable = 0usize;
		for (peer_id, metric) in &metrics.connectivity {
			let Some(peer) = peer_id.parse::<NodeId>().ok().and_then(|id| self.snap.node(&id)) else {
				continue;
			};
			if !self.peer_counts(node, peer) {
				continue;
			}
			if nested && self.shallow_status(peer) == NodeStatus::Error {
				continue;
			}
			considered += 1;
			if !metric.connected {
				unreachable += 1;
			}
		}
		match unreachable {
			0 => NodeStatus::Online,
			n if n == considered => NodeStatus::Error,
			_ => NodeStatus::Warning,
		}
	}

	fn shallow_status(&self, node: &Node) -> NodeStatus {
		if !node.connected {
			return NodeStatus::Disconnected;
		}
		if self.stale(node) {
			return NodeStatus::Offline;
		}
		match self.snap.metrics.get(&node.id) {
			Some(metrics) if !metrics.connectivity.is_empty() => self.connectivity(node, metrics, false),
			_ => NodeStatus::Online,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use netweave_common_core::fixtures::{self, add_ext_client, add_node, node_mut, set_default_policy};
	use netweave_common_core::PeerMetric;

	fn threshold() -> Duration {
		Duration::seconds(DEFAULT_CHECKIN_THRESHOLD_SECS)
	}

	fn sample(s: &mut NetworkSnapshot, node: NodeId, peers: &[(String, bool)]) {
		let mut m = Metrics::new(node, s.network.id.clone());
		for (id, connected) in peers {
			m.connectivity.insert(
				id.clone(),
				PeerMetric {
					connected: *connected,
					..Default::default()
				},
			);
		}
		s.metrics.insert(node, m);
	}

	fn mesh() -> (NetworkSnapshot, NodeId, NodeId, NodeId) {
		let mut s = fixtures::network("n1", "10.0.0.0/24".parse().unwrap());
		let a = add_node(&mut s, "a", "10.0.0.1".parse().unwrap());
		let b = add_node(&mut s, "b", "10.0.0.2".parse().unwrap());
		let c = add_node(&mut s, "c", "10.0.0.3".parse().unwrap());
		(s, a, b, c)
	}

	#[test]
	fn stale_check_in_is_offline() {
		let (mut s, a, ..) = mesh();
		node_mut(&mut s, &a).last_check_in = Utc::now() - Duration::minutes(30);
		let engine = StatusEngine::new(&s, threshold(), Utc::now());
		assert_eq!(engine.status_of(&a).unwrap(), NodeStatus::Offline);
	}

	#[test]
	fn disconnected_wins_over_everything() {
		let (mut s, a, ..) = mesh();
		node_mut(&mut s, &a).connected = false;
		let engine = StatusEngine::new(&s, threshold(), Utc::now());
		assert_eq!(engine.status_of(&a).unwrap(), NodeStatus::Disconnected);
	}

	#[test]
	fn no_metrics_yet_is_online() {
		let (s, a, ..) = mesh();
		let engine = StatusEngine::new(&s, threshold(), Utc::now());
		assert_eq!(engine.status_of(&a).unwrap(), NodeStatus::Online);
	}

	#[test]
	fn warning_and_error_from_peer_reachability() {
		let (mut s, a, b, c) = mesh();
		sample(&mut s, a, &[(b.to_string(), true), (c.to_string(), false)]);
		let engine = StatusEngine::new(&s, threshold(), Utc::now());
		assert_eq!(engine.status_of(&a).unwrap(), NodeStatus::Warning);

		sample(&mut s, a, &[(b.to_string(), false), (c.to_string(), false)]);
		let engine = StatusEngine::new(&s, threshold(), Utc::now());
		assert_eq!(engine.status_of(&a).unwrap(), NodeStatus::Error);
	}

	#[test]
	fn stale_and_disallowed_peers_do_not_count() {
		let (mut s, a, b, c) = mesh();
		set_default_policy(&mut s, RuleType::DevicePolicy, false);
		node_mut(&mut s, &c).last_check_in = Utc::now() - Duration::hours(1);
		sample(&mut s, a, &[(b.to_string(), false), (c.to_string(), false)]);
		let engine = StatusEngine::new(&s, threshold(), Utc::now());
		assert_eq!(engine.status_of(&a).unwrap(), NodeStatus::Online);
	}

	#[test]
	fn peer_in_error_is_not_held_against_node() {
		let (mut s, a, b, c) = mesh();
		sample(&mut s, a, &[(b.to_string(), true), (c.to_string(), false)]);
		sample(&mut s, c, &[(a.to_string(), false), (b.to_string(), false)]);
		let engine = StatusEngine::new(&s, threshold(), Utc::now());
		assert_eq!(engine.status_of(&c).unwrap(), NodeStatus::Error);
		assert_eq!(engine.status_of(&a).unwrap(), NodeStatus::Online);
	}

	#[test]
	fn ext_client_status_comes_from_ingress_metrics() {
		let (mut s, a, ..) = mesh();
		node_mut(&mut s, &a).is_ingress_gateway = true;
		add_ext_client(&mut s, a, "phone", "10.0.0.9".parse().unwrap(), None);
		add_ext_client(&mut s, a, "tablet", "10.0.0.10".parse().unwrap(), None);
		add_ext_client(&mut s, a, "watch", "10.0.0.11".parse().unwrap(), None);

		let engine = StatusEngine::new(&s, threshold(), Utc::now());
		assert_eq!(engine.client_status_of("phone").unwrap(), NodeStatus::Unknown);

		sample(&mut s, a, &[("phone".into(), true), ("tablet".into(), false)]);
		s.ext_clients.get_mut("watch").unwrap().enabled = false;
		let engine = StatusEngine::new(&s, threshold(), Utc::now());
		let all = engine.network_status();
		assert_eq!(all["phone"], NodeStatus::Online);
		assert_eq!(all["tablet"], NodeStatus::Offline);
		assert_eq!(all["watch"], NodeStatus::Offline);
		assert!(engine.client_status_of("ghost").is_err());
	}
}
