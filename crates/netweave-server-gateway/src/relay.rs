// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeSet;

use netweave_common_core::NodeId;
use netweave_server_store::{Ctx, Invariant, StoreError};
use tracing::{info, instrument};

use crate::error::{conflict, violated, GatewayError, Result};
use crate::service::{clear_failover_pairs, node_mut, GatewayService, Transition};

impl GatewayService {
	/// Make `relay_id` a relay for exactly `relayed`.
	///
	/// Calling it on an existing relay replaces the relayed set: nodes that
	/// drop out are released, new ones are attached. Newly relayed nodes
	/// leave any failover pair they were in.
	#[instrument(skip(self, ctx, relayed), fields(node_id = %relay_id, relayed = relayed.len()))]
	pub async fn create_relay(&self, ctx: &Ctx, relay_id: &NodeId, relayed: BTreeSet<NodeId>) -> Result<Transition> {
		let relay = self.store().get_node(relay_id).await?;
		if !self.host(&relay).await?.is_linux() {
			return conflict(format!("relay {relay_id} must run on linux"));
		}
		if relay.is_relayed {
			return violated(
				Invariant::RelayConsistency,
				format!("node {relay_id} is relayed and cannot be a relay"),
			);
		}
		if relayed.contains(relay_id) {
			return conflict(format!("node {relay_id} cannot relay itself"));
		}

		let mut partners = BTreeSet::new();
		for id in &relayed {
			let child = self.store().get_node(id).await?;
			if child.network != relay.network {
				return Err(StoreError::NotFound(format!("node {id} in {}", relay.network)).into());
			}
			if child.is_ingress_gateway {
				return violated(
					Invariant::RelayedNotIngress,
					format!("ingress gateway {id} cannot be relayed"),
				);
			}
			if child.is_relay || child.is_auto_relay || child.is_internet_gateway || child.is_fail_over {
				return conflict(format!("gateway node {id} cannot be relayed"));
			}
			if let Some(other) = child.relayed_by.filter(|r| r != relay_id) {
				return conflict(format!("node {id} is already relayed by {other}"));
			}
			if !relay.relayed_nodes.contains(id) {
				partners.extend(child.fail_over_peers.iter().copied());
			}
		}

		let mut ids: BTreeSet<NodeId> = relay.relayed_nodes.clone();
		ids.extend(relayed.iter().copied());
		ids.extend(partners);
		ids.insert(*relay_id);

		let target = *relay_id;
		let changed = self
			.transact(ctx, ids, move |nodes| {
				let previous = node_mut(nodes, &target)?.relayed_nodes.clone();
				for id in previous.difference(&relayed) {
					let child = node_mut(nodes, id)?;
					child.is_relayed = false;
					child.relayed_by = None;
				}
				for id in relayed.difference(&previous) {
					clear_failover_pairs(nodes, id);
				}
				for id in &relayed {
					let child = node_mut(nodes, id)?;
					child.is_relayed = true;
					child.relayed_by = Some(target);
				}
				let relay = node_mut(nodes, &target)?;
				relay.is_relay = true;
				relay.relayed_nodes = relayed;
				Ok(())
			})
			.await?;

		info!(changed = changed.len(), "relay set");
		Ok(self.publish(&relay.network, changed).await)
	}

	/// Replace the relayed set of an existing relay.
	pub async fn update_relay(&self, ctx: &Ctx, relay_id: &NodeId, relayed: BTreeSet<NodeId>) -> Result<Transition> {
		let relay = self.store().get_node(relay_id).await?;
		if !relay.is_relay {
			return Err(GatewayError::NotInRole(relay_id.to_string(), "relay"));
		}
		self.create_relay(ctx, relay_id, relayed).await
	}

	/// Release every relayed node and drop the relay role.
	#[instrument(skip(self, ctx), fields(node_id = %relay_id))]
	pub async fn delete_relay(&self, ctx: &Ctx, relay_id: &NodeId) -> Result<Transition> {
		let relay = self.store().get_node(relay_id).await?;
		let mut ids = relay.relayed_nodes.clone();
		// children that still point here without being listed
		ids.extend(self.ids_where(&relay.network, |n| n.relayed_by == Some(*relay_id)).await);
		ids.insert(*relay_id);

		let target = *relay_id;
		let changed = self
			.transact(ctx, ids, move |nodes| {
				for node in nodes.values_mut() {
					if node.relayed_by == Some(target) {
						node.relayed_by = None;
						node.is_relayed = false;
					}
				}
				let relay = node_mut(nodes, &target)?;
				relay.is_relay = false;
				relay.relayed_nodes.clear();
				Ok(())
			})
			.await?;

		info!(changed = changed.len(), "relay removed");
		Ok(self.publish(&relay.network, changed).await)
	}
}
