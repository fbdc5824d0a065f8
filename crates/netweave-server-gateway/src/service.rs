// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use netweave_common_core::{Host, NetworkId, Node, NodeAction, NodeId};
use netweave_server_publish::{Fanout, FanoutReport};
use netweave_server_store::{Ctx, EntityStore, StoreError};
use tracing::{debug, warn};

use crate::error::Result;

/// Outcome of a role transition.
#[derive(Debug, Clone, Default)]
pub struct Transition {
	/// Nodes whose stored record changed, as written.
	pub changed: Vec<Node>,
	pub report: FanoutReport,
}

impl Transition {
	pub fn is_noop(&self) -> bool {
		self.changed.is_empty()
	}

	pub fn node(&self, id: &NodeId) -> Option<&Node> {
		self.changed.iter().find(|n| n.id == *id)
	}
}

/// Role transitions for the gateway-like node roles.
///
/// Every transition locks the full set of nodes whose back-references it
/// touches, rewrites both sides of each edge in one `save_nodes` batch,
/// releases the locks and only then publishes.
#[derive(Clone)]
pub struct GatewayService {
	store: Arc<EntityStore>,
	fanout: Arc<Fanout>,
}

impl GatewayService {
	pub fn new(store: Arc<EntityStore>, fanout: Arc<Fanout>) -> Self {
		Self { store, fanout }
	}

	pub fn store(&self) -> &EntityStore {
		&self.store
	}

	pub fn fanout(&self) -> &Fanout {
		&self.fanout
	}

	pub(crate) async fn host(&self, node: &Node) -> Result<Host> {
		Ok(self.store.get_host(&node.host_id).await?)
	}

	/// Ids of every node in `network` matching `pred`.
	pub(crate) async fn ids_where(&self, network: &NetworkId, pred: impl Fn(&Node) -> bool) -> BTreeSet<NodeId> {
		self.store
			.list_nodes(network)
			.await
			.into_iter()
			.filter(|n| pred(n))
			.map(|n| n.id)
			.collect()
	}

	/// Lock `ids`, load them, let `mutate` edit the loaded records and save
	/// the ones that changed as one batch.
	pub(crate) async fn transact<F>(&self, ctx: &Ctx, ids: BTreeSet<NodeId>, mutate: F) -> Result<Vec<Node>>
	where
		F: FnOnce(&mut BTreeMap<NodeId, Node>) -> Result<()>,
	{
		let _held = self.store.lock_nodes(ids.iter().copied()).await;
		let mut loaded = BTreeMap::new();
		for id in &ids {
			loaded.insert(*id, self.store.get_node(id).await?);
		}
		let before = loaded.clone();
		mutate(&mut loaded)?;

		let changed: Vec<Node> = loaded
			.into_values()
			.filter(|n| before.get(&n.id) != Some(n))
			.collect();
		if changed.is_empty() {
			debug!("transition changed nothing");
			return Ok(changed);
		}
		self.store.save_nodes(ctx, changed.clone()).await?;
		Ok(changed)
	}

	/// Node updates for `changed`, then peer updates for the whole network.
	pub(crate) async fn publish(&self, network: &NetworkId, changed: Vec<Node>) -> Transition {
		let mut report = FanoutReport::default();
		if changed.is_empty() {
			return Transition { changed, report };
		}
		for node in &changed {
			match self.fanout.node_update(node, NodeAction::Noop).await {
				Ok(r) => report.merge(r),
				Err(e) => warn!(node_id = %node.id, error = %e, "node update not published"),
			}
		}
		match self.fanout.network(network).await {
			Ok(r) => report.merge(r),
			Err(e) => warn!(network = %network, error = %e, "peer fan-out failed"),
		}
		Transition { changed, report }
	}
}

pub(crate) fn node_mut<'m>(nodes: &'m mut BTreeMap<NodeId, Node>, id: &NodeId) -> Result<&'m mut Node> {
	nodes
		.get_mut(id)
		.ok_or_else(|| StoreError::NotFound(format!("node {id}")).into())
}

/// Drop `node` from every failover pair, on both sides.
pub(crate) fn clear_failover_pairs(nodes: &mut BTreeMap<NodeId, Node>, id: &NodeId) {
	let partners = match nodes.get_mut(id) {
		Some(node) => {
			node.failed_over_by = None;
			std::mem::take(&mut node.fail_over_peers)
		}
		None => return,
	};
	for partner in partners {
		if let Some(p) = nodes.get_mut(&partner) {
			p.fail_over_peers.remove(id);
			if p.fail_over_peers.is_empty() {
				p.failed_over_by = None;
			}
		}
	}
}

/// Drop `node` from every auto-relay pair, on both sides.
pub(crate) fn clear_auto_relay_pairs(nodes: &mut BTreeMap<NodeId, Node>, id: &NodeId) {
	let partners: Vec<NodeId> = match nodes.get_mut(id) {
		Some(node) => std::mem::take(&mut node.auto_relayed_peers).into_keys().collect(),
		None => return,
	};
	for partner in partners {
		if let Some(p) = nodes.get_mut(&partner) {
			p.auto_relayed_peers.remove(id);
		}
	}
}

#[cfg(test)]
pub(crate) mod testing {
	use std::sync::Arc;

	use netweave_common_core::{HostOs, NetworkId, Node};
	use netweave_server_publish::{Fanout, MemoryBroker, Publisher, PublisherOptions, ServerKeys};
	use netweave_server_store::testing::{node_on, seeded_store};
	use netweave_server_store::{Ctx, EntityStore};
	use std::time::Duration;

	use super::GatewayService;

	pub struct Harness {
		pub gateways: GatewayService,
		pub store: Arc<EntityStore>,
		pub broker: Arc<MemoryBroker>,
		pub net: NetworkId,
	}

	impl Harness {
		pub async fn new() -> Self {
			let (store, net) = seeded_store().await;
			let store = Arc::new(store);
			let broker = Arc::new(MemoryBroker::new());
			let options = PublisherOptions {
				base_backoff: Duration::from_millis(1),
				..PublisherOptions::default()
			};
			let publisher = Arc::new(Publisher::new(broker.clone(), ServerKeys::generate(), options));
			let fanout = Arc::new(Fanout::new(store.clone(), publisher, "0.1.0"));
			Self {
				gateways: GatewayService::new(store.clone(), fanout),
				store,
				broker,
				net,
			}
		}

		pub async fn node(&self, name: &str, address: &str) -> Node {
			self.node_os(name, address, HostOs::Linux).await
		}

		pub async fn node_os(&self, name: &str, address: &str, os: HostOs) -> Node {
			let node = node_on(&self.store, &self.net, name, address, os).await;
			let mut host = self.store.get_host(&node.host_id).await.unwrap();
			host.traffic_key_public = Some(ServerKeys::generate().public_base64());
			self.store.upsert_host(&Ctx::startup(), host).await.unwrap();
			node
		}

		pub async fn get(&self, node: &Node) -> Node {
			self.store.get_node(&node.id).await.unwrap()
		}
	}
}
