// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Recompute-and-publish helpers used after a mutation has committed.
//!
//! Nothing here fails the caller because of a single undeliverable
//! message: per-recipient errors are logged and counted in the report.
//! Only a failure to read the network state is returned.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use netweave_common_core::{
	Host, HostAction, HostId, HostUpdate, NetworkId, Node, NodeAction, NodeId, NodeUpdate, Signal,
	SignalAction,
};
use netweave_server_peers::PeerComputer;
use netweave_server_store::EntityStore;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::publisher::Publisher;
use crate::topic::Recipient;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanoutReport {
	pub published: usize,
	pub suppressed: usize,
	pub failed: usize,
}

impl FanoutReport {
	fn record(&mut self, outcome: Result<bool>, what: &str, id: &dyn std::fmt::Display) {
		match outcome {
			Ok(true) => self.published += 1,
			Ok(false) => self.suppressed += 1,
			Err(e) => {
				warn!(%id, error = %e, "{what} not published");
				self.failed += 1;
			}
		}
	}

	pub fn merge(&mut self, other: FanoutReport) {
		self.published += other.published;
		self.suppressed += other.suppressed;
		self.failed += other.failed;
	}
}

pub struct Fanout {
	store: Arc<EntityStore>,
	publisher: Arc<Publisher>,
	server_version: String,
}

impl Fanout {
	pub fn new(store: Arc<EntityStore>, publisher: Arc<Publisher>, server_version: impl Into<String>) -> Self {
		Self {
			store,
			publisher,
			server_version: server_version.into(),
		}
	}

	pub fn publisher(&self) -> &Arc<Publisher> {
		&self.publisher
	}

	pub fn store(&self) -> &Arc<EntityStore> {
		&self.store
	}

	/// Peer updates for every live node of `network`.
	#[instrument(skip(self), fields(network = %network))]
	pub async fn network(&self, network: &NetworkId) -> Result<FanoutReport> {
		self.peers_for(network, None).await
	}

	/// Peer updates for the listed nodes only. Ids outside the network or
	/// no longer present are skipped.
	#[instrument(skip(self, nodes), fields(network = %network, count = nodes.len()))]
	pub async fn nodes(&self, network: &NetworkId, nodes: &BTreeSet<NodeId>) -> Result<FanoutReport> {
		self.peers_for(network, Some(nodes)).await
	}

	async fn peers_for(&self, network: &NetworkId, only: Option<&BTreeSet<NodeId>>) -> Result<FanoutReport> {
		let snap = self.store.snapshot(network).await?;
		let computer = PeerComputer::new(&snap, self.server_version.as_str());
		let mut report = FanoutReport::default();

		for (id, update) in computer.peer_updates() {
			if only.is_some_and(|set| !set.contains(&id)) {
				continue;
			}
			let Some(host) = snap.node(&id).and_then(|n| snap.host_of(n)) else {
				debug!(node_id = %id, "node has no host, skipping");
				continue;
			};
			let outcome = self.publisher.publish_peer_update(host, &id, &update).await;
			report.record(outcome, "peer update", &id);
		}
		debug!(?report, "peer fan-out done");
		Ok(report)
	}

	pub async fn node_update(&self, node: &Node, action: NodeAction) -> Result<FanoutReport> {
		let host = self.store.get_host(&node.host_id).await?;
		let update = NodeUpdate {
			action,
			node: node.clone(),
		};
		let mut report = FanoutReport::default();
		let outcome = self.publisher.publish_node_update(&host, &update).await;
		report.record(outcome, "node update", &node.id);
		Ok(report)
	}

	pub async fn host_update(&self, host: &Host, action: HostAction, node: Option<Node>) -> FanoutReport {
		let update = HostUpdate {
			action,
			host: host.clone(),
			node,
		};
		let mut report = FanoutReport::default();
		let outcome = self.publisher.publish_host_update(&update).await;
		report.record(outcome, "host update", &host.id);
		report
	}

	pub async fn signal(&self, signal: &Signal) -> Result<FanoutReport> {
		let to = self.store.get_host(&signal.to_host).await?;
		let mut report = FanoutReport::default();
		let outcome = self.publisher.publish_signal(&to, signal).await;
		report.record(outcome, "signal", &to.id);
		Ok(report)
	}

	/// Signal both hosts of a peer pair that a node is now in between.
	pub async fn pair_signals(
		&self,
		action: SignalAction,
		a: &Node,
		b: &Node,
		via: Option<NodeId>,
	) -> Result<FanoutReport> {
		let mut report = FanoutReport::default();
		for (from, to) in [(a, b), (b, a)] {
			let signal = Signal {
				action,
				from_host: from.host_id,
				to_host: to.host_id,
				from_node: from.id,
				to_node: to.id,
				via,
				ts: Utc::now(),
			};
			report.merge(self.signal(&signal).await?);
		}
		Ok(report)
	}

	/// Republish everything whose last message never went out.
	#[instrument(skip(self))]
	pub async fn reconcile(&self) -> Result<FanoutReport> {
		let pending = self.publisher.take_reconcile().await;
		if pending.is_empty() {
			return Ok(FanoutReport::default());
		}

		let mut networks: BTreeSet<NetworkId> = BTreeSet::new();
		let mut nodes: BTreeSet<NodeId> = BTreeSet::new();
		let mut hosts: BTreeSet<HostId> = BTreeSet::new();
		for recipient in &pending {
			match recipient {
				Recipient::Node(id) => {
					if let Some(node) = self.store.find_node(id).await? {
						networks.insert(node.network.clone());
						nodes.insert(node.id);
					}
				}
				Recipient::Host(id) => {
					hosts.insert(*id);
				}
			}
		}

		let mut report = FanoutReport::default();
		for id in &nodes {
			if let Some(node) = self.store.find_node(id).await? {
				report.merge(self.node_update(&node, NodeAction::Noop).await?);
			}
		}
		for network in &networks {
			report.merge(self.nodes(network, &nodes).await?);
		}
		for id in &hosts {
			match self.store.get_host(id).await {
				Ok(host) => report.merge(self.host_update(&host, HostAction::UpdateHost, None).await),
				Err(e) => debug!(host_id = %id, error = %e, "host gone, dropping reconcile"),
			}
		}
		info!(pending = pending.len(), ?report, "reconcile pass done");
		Ok(report)
	}
}
