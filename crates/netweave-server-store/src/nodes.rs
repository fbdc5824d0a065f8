// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use netweave_common_core::{
	AclTagKind, EventAction, ExtClient, Host, HostId, NetworkId, NetworkSnapshot, Node, NodeId,
};
use tracing::{info, instrument};

use crate::acls::strip_acl_refs;
use crate::context::Ctx;
use crate::error::{StoreError, StoreResult};
use crate::store::{audit_to_store, EntityStore};
use crate::addresses::{self, Fill};
use crate::validate::validate_node;

/// What a node deletion touched, for the caller to republish.
#[derive(Debug, Clone)]
pub struct NodeDeletion {
	pub node: Node,
	pub peers_touched: BTreeSet<NodeId>,
	pub ext_clients_removed: Vec<ExtClient>,
}

/// Nodes whose stored fields point at `id`.
fn referencing(view: &NetworkSnapshot, id: &NodeId) -> BTreeSet<NodeId> {
	view.nodes
		.values()
		.filter(|m| {
			m.id != *id
				&& (m.relayed_by == Some(*id)
					|| m.relayed_nodes.contains(id)
					|| m.auto_relayed_peers.contains_key(id)
					|| m.auto_relayed_peers.values().any(|g| g == id)
					|| m.failed_over_by == Some(*id)
					|| m.fail_over_peers.contains(id)
					|| m.internet_gw_id == Some(*id)
					|| m.inet_node_clients.contains(id))
		})
		.map(|m| m.id)
		.collect()
}

/// Nodes related to `node` through an edge in either direction.
pub(crate) fn neighbours(node: &Node, view: &NetworkSnapshot) -> BTreeSet<NodeId> {
	let mut out = referencing(view, &node.id);
	out.extend(node.relayed_by);
	out.extend(node.relayed_nodes.iter().copied());
	out.extend(node.auto_relayed_peers.keys().copied());
	out.extend(node.auto_relayed_peers.values().copied());
	out.extend(node.failed_over_by);
	out.extend(node.fail_over_peers.iter().copied());
	out.extend(node.internet_gw_id);
	out.extend(node.inet_node_clients.iter().copied());
	out.remove(&node.id);
	out
}

/// Remove every back-reference to `gone` from `m`. Returns whether `m` changed.
fn forget(m: &mut Node, gone: &NodeId) -> bool {
	let before = m.clone();
	if m.relayed_by == Some(*gone) {
		m.relayed_by = None;
		m.is_relayed = false;
	}
	m.relayed_nodes.remove(gone);
	m.auto_relayed_peers.remove(gone);
	m.auto_relayed_peers.retain(|_, g| g != gone);
	if m.failed_over_by == Some(*gone) {
		m.failed_over_by = None;
	}
	m.fail_over_peers.remove(gone);
	if m.internet_gw_id == Some(*gone) {
		m.internet_gw_id = None;
	}
	m.inet_node_clients.remove(gone);
	*m != before
}

impl EntityStore {
	pub async fn get_node(&self, id: &NodeId) -> StoreResult<Node> {
		self.require::<Node>(&id.to_string()).await
	}

	pub async fn find_node(&self, id: &NodeId) -> StoreResult<Option<Node>> {
		self.read::<Node>(&id.to_string()).await
	}

	pub async fn list_nodes(&self, network: &NetworkId) -> Vec<Node> {
		self.all_in::<Node>(network).await
	}

	pub async fn all_nodes(&self) -> Vec<Node> {
		self.all::<Node>().await
	}

	pub async fn get_host(&self, id: &HostId) -> StoreResult<Host> {
		self.require::<Host>(&id.to_string()).await
	}

	pub async fn list_hosts(&self) -> Vec<Host> {
		self.all::<Host>().await
	}

	/// Create or update a host. The node set is owned by the nodes and
	/// is never taken from the caller.
	#[instrument(skip(self, ctx, host), fields(host_id = %host.id))]
	pub async fn upsert_host(&self, ctx: &Ctx, mut host: Host) -> StoreResult<Host> {
		let _held = self.lock_key(format!("host/{}", host.id)).await;
		let existing = self.read::<Host>(&host.id.to_string()).await?;
		host.nodes = match &existing {
			Some(old) => old.nodes.clone(),
			None => BTreeSet::new(),
		};
		self.write(&host).await?;
		let action = if existing.is_some() {
			EventAction::Update
		} else {
			EventAction::Create
		};
		self.emit(ctx, action, existing.as_ref(), Some(&host)).await;
		Ok(host)
	}

	/// Join a host to a network.
	#[instrument(skip(self, ctx, node), fields(node_id = %node.id, network = %node.network))]
	pub async fn create_node(&self, ctx: &Ctx, mut node: Node) -> StoreResult<Node> {
		if self.read::<Node>(&node.id.to_string()).await?.is_some() {
			return Err(StoreError::AlreadyExists(format!("node {}", node.id)));
		}
		let _held = self
			.locks()
			.lock_all([
				addresses::lock_key(node.network.as_str()),
				format!("node/{}", node.id),
				format!("host/{}", node.host_id),
			])
			.await;
		let mut host = self.get_host(&node.host_id).await?;

		let mut view = self.view(&node.network).await?;
		addresses::assign(&view, &mut node.address, &mut node.address6, Fill::Up)?;
		view.hosts.insert(host.id, host.clone());
		view.nodes.insert(node.id, node.clone());
		validate_node(&node, &view)?;

		self.write(&node).await?;
		host.nodes.insert(node.id);
		self.write(&host).await?;

		self.emit(ctx, EventAction::Create, None, Some(&node)).await;
		info!("node created");
		Ok(node)
	}

	/// Persist a batch of nodes of one network as a unit.
	///
	/// The caller holds the node locks. The batch is validated against the
	/// network with the whole batch applied, together with every node the
	/// batch points at or is pointed at by.
	#[instrument(skip(self, ctx, nodes), fields(count = nodes.len()))]
	pub async fn save_nodes(&self, ctx: &Ctx, nodes: Vec<Node>) -> StoreResult<()> {
		let Some(first) = nodes.first() else {
			return Ok(());
		};
		let network = first.network.clone();
		if let Some(stray) = nodes.iter().find(|n| n.network != network) {
			return Err(StoreError::violated(
				crate::error::Invariant::RelayConsistency,
				format!("node {} is not in network {network}", stray.id),
			));
		}

		let mut view = self.view(&network).await?;
		let mut old = Vec::with_capacity(nodes.len());
		for node in &nodes {
			match view.nodes.insert(node.id, node.clone()) {
				Some(prev) => old.push(prev),
				None => return Err(StoreError::NotFound(format!("node {}", node.id))),
			}
		}

		let mut to_check: BTreeSet<NodeId> = BTreeSet::new();
		for node in &nodes {
			to_check.insert(node.id);
			to_check.extend(neighbours(node, &view));
		}
		for prev in &old {
			to_check.extend(neighbours(prev, &view));
		}
		for id in &to_check {
			if let Some(n) = view.nodes.get(id) {
				validate_node(n, &view)?;
			}
		}

		for (node, prev) in nodes.iter().zip(old.iter()) {
			if node == prev {
				continue;
			}
			self.write(node).await?;
			self.emit(ctx, EventAction::Update, Some(prev), Some(node)).await;
		}
		Ok(())
	}

	/// Lock, mutate and save a single node.
	pub async fn update_node<F>(&self, ctx: &Ctx, id: &NodeId, mutate: F) -> StoreResult<Node>
	where
		F: FnOnce(&mut Node) -> StoreResult<()>,
	{
		let _held = self.lock_nodes([*id]).await;
		let mut node = self.get_node(id).await?;
		mutate(&mut node)?;
		self.save_nodes(ctx, vec![node.clone()]).await?;
		Ok(node)
	}

	/// Record a check-in.
	#[instrument(skip(self), fields(node_id = %id))]
	pub async fn touch_node(&self, id: &NodeId, at: DateTime<Utc>) -> StoreResult<Node> {
		let _held = self.lock_nodes([*id]).await;
		let mut node = self.get_node(id).await?;
		let was_connected = node.connected;
		node.last_check_in = at;
		node.connected = true;
		self.write(&node).await?;
		if !was_connected {
			let ctx = Ctx::mqtt(node.id.to_string());
			self.emit::<Node>(&ctx, EventAction::Connect, None, Some(&node)).await;
		}
		Ok(node)
	}

	/// Clear the connected flag after a missed check-in window.
	pub async fn mark_disconnected(&self, id: &NodeId) -> StoreResult<bool> {
		let _held = self.lock_nodes([*id]).await;
		let mut node = self.get_node(id).await?;
		if !node.connected {
			return Ok(false);
		}
		node.connected = false;
		self.write(&node).await?;
		self.emit::<Node>(&Ctx::scheduler(), EventAction::Disconnect, None, Some(&node))
			.await;
		Ok(true)
	}

	/// Delete a node and every reference to it.
	#[instrument(skip(self, ctx), fields(node_id = %id))]
	pub async fn delete_node(&self, ctx: &Ctx, id: &NodeId) -> StoreResult<NodeDeletion> {
		let node = self.get_node(id).await?;
		let view = self.view(&node.network).await?;

		let touched = neighbours(&node, &view);
		let mut lock_ids = touched.clone();
		lock_ids.insert(*id);
		let _held = self.lock_nodes(lock_ids).await;

		let node = self.get_node(id).await?;
		let mut changed = Vec::new();
		for peer_id in &touched {
			if let Some(mut peer) = self.find_node(peer_id).await? {
				if forget(&mut peer, id) {
					changed.push(peer);
				}
			}
		}

		let mut ext_clients_removed = Vec::new();
		for client in self.all_in::<ExtClient>(&node.network).await {
			if client.ingress_id == *id {
				ext_clients_removed.push(self.remove::<ExtClient>(&client.client_id).await?);
			}
		}

		for mut egress in self.list_egresses(&node.network).await {
			if egress.nodes.remove(id) {
				self.write(&egress).await?;
			}
		}
		strip_acl_refs(self, ctx, &node.network, &[AclTagKind::Node], &id.to_string()).await?;

		self.remove::<Node>(&id.to_string()).await?;
		for peer in &changed {
			self.write(peer).await?;
		}
		if let Some(mut host) = self.read::<Host>(&node.host_id.to_string()).await? {
			if host.nodes.remove(id) {
				self.write(&host).await?;
			}
		}
		self.metrics_repo().delete(id).await.map_err(audit_to_store)?;

		for client in &ext_clients_removed {
			self.emit(ctx, EventAction::Delete, Some(client), None).await;
		}
		self.emit(ctx, EventAction::Delete, Some(&node), None).await;
		info!(
			peers_touched = changed.len(),
			ext_clients_removed = ext_clients_removed.len(),
			"node deleted"
		);

		Ok(NodeDeletion {
			node,
			peers_touched: changed.into_iter().map(|n| n.id).collect(),
			ext_clients_removed,
		})
	}

	/// Delete a host after deleting each of its nodes.
	#[instrument(skip(self, ctx), fields(host_id = %id))]
	pub async fn delete_host(&self, ctx: &Ctx, id: &HostId) -> StoreResult<(Host, Vec<NodeDeletion>)> {
		let host = self.get_host(id).await?;
		let mut deletions = Vec::new();
		for node in self.all::<Node>().await.into_iter().filter(|n| n.host_id == *id) {
			deletions.push(self.delete_node(ctx, &node.id).await?);
		}
		let host = self.remove::<Host>(&host.id.to_string()).await?;
		self.emit(ctx, EventAction::Delete, Some(&host), None).await;
		Ok((host, deletions))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{seeded_store, node_in};
	use netweave_common_core::HostOs;

	#[tokio::test]
	async fn create_rejects_address_clash() {
		let (store, net) = seeded_store().await;
		node_in(&store, &net, "a", "10.0.0.1").await;
		let err = store
			.create_node(&Ctx::startup(), {
				let host = store
					.upsert_host(&Ctx::startup(), Host::new("b", HostOs::Linux, "pk-b"))
					.await
					.unwrap();
				let mut n = Node::new(host.id, net.clone());
				n.address = Some("10.0.0.1".parse().unwrap());
				n
			})
			.await
			.unwrap_err();
		assert_eq!(err.invariant(), Some(crate::error::Invariant::AddressUnique));
	}

	async fn bare_node(store: &EntityStore, network: &NetworkId, name: &str) -> StoreResult<Node> {
		let host = store
			.upsert_host(&Ctx::startup(), Host::new(name, HostOs::Linux, format!("pk-{name}")))
			.await
			.unwrap();
		store.create_node(&Ctx::startup(), Node::new(host.id, network.clone())).await
	}

	#[tokio::test]
	async fn unset_address_takes_lowest_free() {
		let (store, net) = seeded_store().await;
		let first = bare_node(&store, &net, "a").await.unwrap();
		assert_eq!(first.address, Some("10.0.0.1".parse().unwrap()));
		assert_eq!(first.address6, None);

		node_in(&store, &net, "b", "10.0.0.2").await;
		let third = bare_node(&store, &net, "c").await.unwrap();
		assert_eq!(third.address, Some("10.0.0.3".parse().unwrap()));
	}

	#[tokio::test]
	async fn full_network_reports_exhaustion() {
		let store = crate::testing::memory_store().await;
		let net = NetworkId::from("tiny");
		store
			.create_network(
				&Ctx::startup(),
				netweave_common_core::Network::new(net.clone(), Some("10.9.0.0/30".parse().unwrap())),
			)
			.await
			.unwrap();
		bare_node(&store, &net, "a").await.unwrap();
		bare_node(&store, &net, "b").await.unwrap();
		let err = bare_node(&store, &net, "c").await.unwrap_err();
		assert!(matches!(err, StoreError::AddressExhausted { family: "ipv4", .. }));
	}

	#[tokio::test]
	async fn touch_marks_connected() {
		let (store, net) = seeded_store().await;
		let a = node_in(&store, &net, "a", "10.0.0.1").await;
		assert!(store.mark_disconnected(&a.id).await.unwrap());
		assert!(!store.mark_disconnected(&a.id).await.unwrap());

		let at = Utc::now();
		let node = store.touch_node(&a.id, at).await.unwrap();
		assert!(node.connected);
		assert_eq!(node.last_check_in, at);
	}

	#[tokio::test]
	async fn half_relay_batch_is_rejected_whole_batch_passes() {
		let (store, net) = seeded_store().await;
		let mut r = node_in(&store, &net, "r", "10.0.0.1").await;
		let mut c = node_in(&store, &net, "c", "10.0.0.2").await;

		c.is_relayed = true;
		c.relayed_by = Some(r.id);
		let err = store.save_nodes(&Ctx::startup(), vec![c.clone()]).await.unwrap_err();
		assert!(err.invariant().is_some());

		r.is_relay = true;
		r.relayed_nodes.insert(c.id);
		store.save_nodes(&Ctx::startup(), vec![r.clone(), c.clone()]).await.unwrap();
		assert_eq!(store.get_node(&c.id).await.unwrap().relayed_by, Some(r.id));
	}

	#[tokio::test]
	async fn delete_clears_back_references() {
		let (store, net) = seeded_store().await;
		let mut r = node_in(&store, &net, "r", "10.0.0.1").await;
		let mut c = node_in(&store, &net, "c", "10.0.0.2").await;
		r.is_relay = true;
		r.relayed_nodes.insert(c.id);
		c.is_relayed = true;
		c.relayed_by = Some(r.id);
		store.save_nodes(&Ctx::startup(), vec![r.clone(), c.clone()]).await.unwrap();

		let deletion = store.delete_node(&Ctx::startup(), &r.id).await.unwrap();
		assert!(deletion.peers_touched.contains(&c.id));
		let c = store.get_node(&c.id).await.unwrap();
		assert!(!c.is_relayed);
		assert_eq!(c.relayed_by, None);
		assert!(store.find_node(&r.id).await.unwrap().is_none());
		assert!(!store.get_host(&r.host_id).await.unwrap().nodes.contains(&r.id));
	}

	#[tokio::test]
	async fn deleting_missing_node_is_not_found() {
		let (store, _net) = seeded_store().await;
		let err = store.delete_node(&Ctx::startup(), &NodeId::new()).await.unwrap_err();
		assert!(matches!(err, StoreError::NotFound(_)));
	}
}
