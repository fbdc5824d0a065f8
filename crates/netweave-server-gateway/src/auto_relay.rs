// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Auto-relay: a Linux node that carries traffic for pairs of peers that
//! cannot reach each other directly. Pairs are recorded symmetrically as
//! `auto_relayed_peers[peer] = relay` on both nodes.

use std::collections::BTreeSet;

use netweave_common_core::{NetworkId, NodeId, SignalAction};
use netweave_server_store::{Ctx, Invariant, StoreError};
use tracing::{info, instrument, warn};

use crate::error::{conflict, violated, GatewayError, Result};
use crate::service::{clear_auto_relay_pairs, node_mut, GatewayService, Transition};

impl GatewayService {
	#[instrument(skip(self, ctx), fields(node_id = %id))]
	pub async fn create_auto_relay(&self, ctx: &Ctx, id: &NodeId) -> Result<Transition> {
		let node = self.store().get_node(id).await?;
		if !self.host(&node).await?.is_linux() {
			return conflict(format!("auto-relay {id} must run on linux"));
		}
		if node.is_relayed {
			return violated(
				Invariant::AutoRelayNotRelayed,
				format!("relayed node {id} cannot be an auto-relay"),
			);
		}
		let target = *id;
		let changed = self
			.transact(ctx, BTreeSet::from([target]), move |nodes| {
				node_mut(nodes, &target)?.is_auto_relay = true;
				Ok(())
			})
			.await?;
		Ok(self.publish(&node.network, changed).await)
	}

	/// Drop the auto-relay role and every pair routed through the node.
	#[instrument(skip(self, ctx), fields(node_id = %id))]
	pub async fn delete_auto_relay(&self, ctx: &Ctx, id: &NodeId) -> Result<Transition> {
		let node = self.store().get_node(id).await?;
		let mut ids = self
			.ids_where(&node.network, |n| n.auto_relayed_peers.values().any(|via| via == id))
			.await;
		ids.insert(*id);

		let target = *id;
		let changed = self
			.transact(ctx, ids, move |nodes| {
				for n in nodes.values_mut() {
					n.auto_relayed_peers.retain(|_, via| *via != target);
				}
				node_mut(nodes, &target)?.is_auto_relay = false;
				Ok(())
			})
			.await?;
		info!(changed = changed.len(), "auto-relay removed");
		Ok(self.publish(&node.network, changed).await)
	}

	/// Route traffic between `node_id` and `peer_id` through `relay_id`.
	#[instrument(skip(self, ctx), fields(node_id = %node_id, peer = %peer_id, relay = %relay_id))]
	pub async fn set_auto_relay_peer(
		&self,
		ctx: &Ctx,
		node_id: &NodeId,
		peer_id: &NodeId,
		relay_id: &NodeId,
	) -> Result<Transition> {
		if node_id == peer_id || node_id == relay_id || peer_id == relay_id {
			return conflict("auto-relay pair needs three distinct nodes");
		}
		let node = self.store().get_node(node_id).await?;
		let peer = self.store().get_node(peer_id).await?;
		let relay = self.store().get_node(relay_id).await?;
		if peer.network != node.network || relay.network != node.network {
			return Err(StoreError::NotFound(format!("pair in network {}", node.network)).into());
		}
		if !relay.is_auto_relay {
			return Err(GatewayError::NotInRole(relay_id.to_string(), "auto-relay"));
		}
		if node.is_relayed || peer.is_relayed {
			return conflict("relayed nodes already route through their relay");
		}

		let (a, b, via) = (*node_id, *peer_id, *relay_id);
		let changed = self
			.transact(ctx, BTreeSet::from([a, b]), move |nodes| {
				node_mut(nodes, &a)?.auto_relayed_peers.insert(b, via);
				node_mut(nodes, &b)?.auto_relayed_peers.insert(a, via);
				Ok(())
			})
			.await?;
		if changed.is_empty() {
			return Ok(Transition::default());
		}

		let mut transition = self.publish(&node.network, changed).await;
		match self
			.fanout()
			.pair_signals(SignalAction::ConnectViaRelay, &node, &peer, Some(via))
			.await
		{
			Ok(report) => transition.report.merge(report),
			Err(e) => warn!(error = %e, "auto-relay signal not sent"),
		}
		Ok(transition)
	}

	/// Remove every pair `id` takes part in, on both sides.
	#[instrument(skip(self, ctx), fields(node_id = %id))]
	pub async fn reset_auto_relay(&self, ctx: &Ctx, id: &NodeId) -> Result<Transition> {
		let node = self.store().get_node(id).await?;
		let mut ids: BTreeSet<NodeId> = node.auto_relayed_peers.keys().copied().collect();
		ids.extend(
			self.ids_where(&node.network, |n| n.auto_relayed_peers.contains_key(id))
				.await,
		);
		ids.insert(*id);

		let target = *id;
		let changed = self
			.transact(ctx, ids, move |nodes| {
				clear_auto_relay_pairs(nodes, &target);
				for n in nodes.values_mut() {
					n.auto_relayed_peers.remove(&target);
				}
				Ok(())
			})
			.await?;
		Ok(self.publish(&node.network, changed).await)
	}

	/// Clear every auto-relay pair in `network`.
	#[instrument(skip(self, ctx), fields(network = %network))]
	pub async fn reset_auto_relayed_peers(&self, ctx: &Ctx, network: &NetworkId) -> Result<Transition> {
		let ids = self
			.ids_where(network, |n| !n.auto_relayed_peers.is_empty())
			.await;
		let changed = self
			.transact(ctx, ids, |nodes| {
				for n in nodes.values_mut() {
					n.auto_relayed_peers.clear();
				}
				Ok(())
			})
			.await?;
		info!(changed = changed.len(), "auto-relay pairs reset");
		Ok(self.publish(network, changed).await)
	}
}
