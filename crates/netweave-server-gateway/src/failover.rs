// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Failover: at most one node per network that takes over traffic between
//! peers whose direct tunnel broke. Each node of a pair records the
//! failover in `failed_over_by` and the other node in `fail_over_peers`.

use std::collections::BTreeSet;

use netweave_common_core::{NetworkId, Node, NodeId, SignalAction};
use netweave_server_store::{Ctx, StoreError};
use tracing::{info, instrument, warn};

use crate::error::{conflict, GatewayError, Result};
use crate::service::{clear_failover_pairs, node_mut, GatewayService, Transition};

fn failover_lock(network: &NetworkId) -> String {
	format!("failover/{network}")
}

impl GatewayService {
	/// The failover node of `network`, if one is set.
	pub async fn failover_of(&self, network: &NetworkId) -> Option<Node> {
		self.store()
			.list_nodes(network)
			.await
			.into_iter()
			.find(|n| n.is_fail_over)
	}

	#[instrument(skip(self, ctx), fields(node_id = %id))]
	pub async fn create_failover(&self, ctx: &Ctx, id: &NodeId) -> Result<Transition> {
		let network = self.store().get_node(id).await?.network;
		// held across the uniqueness check and the write; taken before any node lock
		let _network_held = self.store().lock_key(failover_lock(&network)).await;
		let node = self.store().get_node(id).await?;
		if !self.host(&node).await?.is_linux() {
			return conflict(format!("failover {id} must run on linux"));
		}
		if node.is_relayed {
			return conflict(format!("relayed node {id} cannot be a failover"));
		}
		if let Some(existing) = self.failover_of(&node.network).await.filter(|n| n.id != *id) {
			return conflict(format!(
				"network {} already has failover {}",
				node.network, existing.id
			));
		}

		// a failover node carries pairs, it is never part of one
		let mut ids = node.fail_over_peers.clone();
		ids.insert(*id);
		let target = *id;
		let changed = self
			.transact(ctx, ids, move |nodes| {
				clear_failover_pairs(nodes, &target);
				node_mut(nodes, &target)?.is_fail_over = true;
				Ok(())
			})
			.await?;
		Ok(self.publish(&node.network, changed).await)
	}

	/// Drop the failover role; every pair it carried goes back to direct.
	#[instrument(skip(self, ctx), fields(node_id = %id))]
	pub async fn delete_failover(&self, ctx: &Ctx, id: &NodeId) -> Result<Transition> {
		let node = self.store().get_node(id).await?;
		let mut ids = self
			.ids_where(&node.network, |n| n.failed_over_by == Some(*id))
			.await;
		ids.insert(*id);

		let target = *id;
		let changed = self
			.transact(ctx, ids, move |nodes| {
				for n in nodes.values_mut() {
					if n.failed_over_by == Some(target) {
						n.failed_over_by = None;
						n.fail_over_peers.clear();
					}
				}
				node_mut(nodes, &target)?.is_fail_over = false;
				Ok(())
			})
			.await?;
		info!(changed = changed.len(), "failover removed");
		Ok(self.publish(&node.network, changed).await)
	}

	/// Route traffic between `node_id` and `peer_id` through the network's
	/// failover node.
	#[instrument(skip(self, ctx), fields(node_id = %node_id, peer = %peer_id))]
	pub async fn set_failover_peer(&self, ctx: &Ctx, node_id: &NodeId, peer_id: &NodeId) -> Result<Transition> {
		if node_id == peer_id {
			return conflict(format!("node {node_id} cannot fail over to itself"));
		}
		let node = self.store().get_node(node_id).await?;
		let peer = self.store().get_node(peer_id).await?;
		if peer.network != node.network {
			return Err(StoreError::NotFound(format!("node {peer_id} in {}", node.network)).into());
		}
		let failover = self
			.failover_of(&node.network)
			.await
			.ok_or_else(|| GatewayError::NotInRole(node.network.to_string(), "failover"))?;
		if failover.id == *node_id || failover.id == *peer_id {
			return conflict("the failover node cannot be part of a failover pair");
		}
		if node.is_relayed || peer.is_relayed {
			return conflict("relayed nodes already route through their relay");
		}

		let (a, b, via) = (*node_id, *peer_id, failover.id);
		let changed = self
			.transact(ctx, BTreeSet::from([a, b]), move |nodes| {
				for (me, other) in [(a, b), (b, a)] {
					let n = node_mut(nodes, &me)?;
					n.failed_over_by = Some(via);
					n.fail_over_peers.insert(other);
				}
				Ok(())
			})
			.await?;
		if changed.is_empty() {
			return Ok(Transition::default());
		}

		let mut transition = self.publish(&node.network, changed).await;
		match self
			.fanout()
			.pair_signals(SignalAction::FailOverPeer, &node, &peer, Some(via))
			.await
		{
			Ok(report) => transition.report.merge(report),
			Err(e) => warn!(error = %e, "failover signal not sent"),
		}
		Ok(transition)
	}

	/// Take `id` out of every failover pair, on both sides.
	#[instrument(skip(self, ctx), fields(node_id = %id))]
	pub async fn reset_failed_over_peer(&self, ctx: &Ctx, id: &NodeId) -> Result<Transition> {
		let node = self.store().get_node(id).await?;
		let mut ids = node.fail_over_peers.clone();
		ids.extend(
			self.ids_where(&node.network, |n| n.fail_over_peers.contains(id))
				.await,
		);
		ids.insert(*id);

		let target = *id;
		let changed = self
			.transact(ctx, ids, move |nodes| {
				clear_failover_pairs(nodes, &target);
				for n in nodes.values_mut() {
					if n.fail_over_peers.remove(&target) && n.fail_over_peers.is_empty() {
						n.failed_over_by = None;
					}
				}
				Ok(())
			})
			.await?;
		Ok(self.publish(&node.network, changed).await)
	}

	/// Clear every failover pair in `network`.
	#[instrument(skip(self, ctx), fields(network = %network))]
	pub async fn reset_failovered_peers(&self, ctx: &Ctx, network: &NetworkId) -> Result<Transition> {
		let changed = self.clear_network_failover(ctx, network).await?;
		info!(changed = changed.len(), "failover pairs reset");
		Ok(self.publish(network, changed).await)
	}

	pub(crate) async fn clear_network_failover(&self, ctx: &Ctx, network: &NetworkId) -> Result<Vec<Node>> {
		let ids = self
			.ids_where(network, |n| n.failed_over_by.is_some() || !n.fail_over_peers.is_empty())
			.await;
		self.transact(ctx, ids, |nodes| {
			for n in nodes.values_mut() {
				n.failed_over_by = None;
				n.fail_over_peers.clear();
			}
			Ok(())
		})
		.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::service::testing::Harness;
	use netweave_server_peers::PeerComputer;
	use netweave_server_publish::Topic;
	use netweave_server_store::Invariant;

	#[tokio::test]
	async fn failover_pair_routes_through_the_failover() {
		let h = Harness::new().await;
		let f = h.node("f", "10.0.0.1").await;
		let a = h.node("a", "10.0.0.2").await;
		let b = h.node("b", "10.0.0.3").await;
		let ctx = Ctx::startup();
		h.gateways.create_failover(&ctx, &f.id).await.unwrap();

		let t = h.gateways.set_failover_peer(&ctx, &a.id, &b.id).await.unwrap();
		assert_eq!(t.changed.len(), 2);
		let a_now = h.get(&a).await;
		assert_eq!(a_now.failed_over_by, Some(f.id));
		assert!(a_now.fail_over_peers.contains(&b.id));
		assert!(h.get(&b).await.fail_over_peers.contains(&a.id));

		h.gateways.fanout().publisher().flush().await;
		assert_eq!(h.broker.delivered_to(&Topic::Signal(b.host_id)).len(), 1);

		let snap = h.store.snapshot(&h.net).await.unwrap();
		let peers_a = PeerComputer::new(&snap, "0.1.0").peer_update(&a.id).unwrap();
		assert!(peers_a.peer("pk-b").is_none());
		assert!(peers_a
			.peer("pk-f")
			.unwrap()
			.allowed_ips
			.contains(&"10.0.0.3/32".parse().unwrap()));
	}

	#[tokio::test]
	async fn one_failover_per_network() {
		let h = Harness::new().await;
		let f = h.node("f", "10.0.0.1").await;
		let g = h.node("g", "10.0.0.2").await;
		let ctx = Ctx::startup();
		h.gateways.create_failover(&ctx, &f.id).await.unwrap();
		let err = h.gateways.create_failover(&ctx, &g.id).await.unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::RoleConflict));
		assert!(h.gateways.create_failover(&ctx, &f.id).await.unwrap().is_noop());
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrent_creates_leave_one_failover() {
		for _ in 0..20 {
			let h = Harness::new().await;
			let f = h.node("f", "10.0.0.1").await;
			let g = h.node("g", "10.0.0.2").await;

			let tasks: Vec<_> = [f.id, g.id]
				.into_iter()
				.map(|id| {
					let gateways = h.gateways.clone();
					tokio::spawn(async move { gateways.create_failover(&Ctx::startup(), &id).await })
				})
				.collect();
			let mut created = 0;
			for task in tasks {
				if task.await.unwrap().is_ok() {
					created += 1;
				}
			}
			assert_eq!(created, 1);

			let failovers = h
				.store
				.list_nodes(&h.net)
				.await
				.into_iter()
				.filter(|n| n.is_fail_over)
				.count();
			assert_eq!(failovers, 1);
		}
	}

	#[tokio::test]
	async fn store_rejects_a_second_failover() {
		let h = Harness::new().await;
		let f = h.node("f", "10.0.0.1").await;
		let g = h.node("g", "10.0.0.2").await;
		let ctx = Ctx::startup();
		h.gateways.create_failover(&ctx, &f.id).await.unwrap();

		let mut second = h.get(&g).await;
		second.is_fail_over = true;
		let err = h.store.save_nodes(&ctx, vec![second]).await.unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::SingleFailover));
		assert!(!h.get(&g).await.is_fail_over);
	}

	#[tokio::test]
	async fn pair_needs_a_failover() {
		let h = Harness::new().await;
		let a = h.node("a", "10.0.0.2").await;
		let b = h.node("b", "10.0.0.3").await;
		let err = h
			.gateways
			.set_failover_peer(&Ctx::startup(), &a.id, &b.id)
			.await
			.unwrap_err();
		assert!(matches!(err, GatewayError::NotInRole(..)));
	}

	#[tokio::test]
	async fn resets_and_delete_clear_pairs() {
		let h = Harness::new().await;
		let f = h.node("f", "10.0.0.1").await;
		let a = h.node("a", "10.0.0.2").await;
		let b = h.node("b", "10.0.0.3").await;
		let c = h.node("c", "10.0.0.4").await;
		let ctx = Ctx::startup();
		h.gateways.create_failover(&ctx, &f.id).await.unwrap();
		h.gateways.set_failover_peer(&ctx, &a.id, &b.id).await.unwrap();
		h.gateways.set_failover_peer(&ctx, &b.id, &c.id).await.unwrap();

		h.gateways.reset_failed_over_peer(&ctx, &a.id).await.unwrap();
		let a_now = h.get(&a).await;
		assert!(a_now.failed_over_by.is_none() && a_now.fail_over_peers.is_empty());
		assert_eq!(h.get(&b).await.fail_over_peers, BTreeSet::from([c.id]));

		h.gateways.reset_failovered_peers(&ctx, &h.net).await.unwrap();
		assert!(h.get(&b).await.failed_over_by.is_none());

		h.gateways.set_failover_peer(&ctx, &a.id, &c.id).await.unwrap();
		h.gateways.delete_failover(&ctx, &f.id).await.unwrap();
		assert!(!h.get(&f).await.is_fail_over);
		assert!(h.get(&a).await.failed_over_by.is_none());
		assert!(h.get(&c).await.fail_over_peers.is_empty());
	}

	#[tokio::test]
	async fn relaying_a_node_drops_its_failover_pairs() {
		let h = Harness::new().await;
		let f = h.node("f", "10.0.0.1").await;
		let r = h.node("r", "10.0.0.2").await;
		let a = h.node("a", "10.0.0.3").await;
		let b = h.node("b", "10.0.0.4").await;
		let ctx = Ctx::startup();
		h.gateways.create_failover(&ctx, &f.id).await.unwrap();
		h.gateways.set_failover_peer(&ctx, &a.id, &b.id).await.unwrap();

		h.gateways.create_relay(&ctx, &r.id, BTreeSet::from([a.id])).await.unwrap();
		assert!(h.get(&a).await.failed_over_by.is_none());
		let b_now = h.get(&b).await;
		assert!(b_now.failed_over_by.is_none() && b_now.fail_over_peers.is_empty());
	}
}
