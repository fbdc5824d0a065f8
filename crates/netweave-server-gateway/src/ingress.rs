// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeSet;

use ipnet::IpNet;
use netweave_common_core::{Egress, NodeId};
use netweave_server_store::{Ctx, Invariant};
use tracing::{info, instrument};

use crate::error::{violated, Result};
use crate::service::{node_mut, GatewayService, Transition};

impl GatewayService {
	#[instrument(skip(self, ctx), fields(node_id = %id))]
	pub async fn create_ingress(&self, ctx: &Ctx, id: &NodeId) -> Result<Transition> {
		let node = self.store().get_node(id).await?;
		if node.is_relayed {
			return violated(
				Invariant::RelayedNotIngress,
				format!("relayed node {id} cannot be an ingress gateway"),
			);
		}
		let target = *id;
		let changed = self
			.transact(ctx, BTreeSet::from([target]), move |nodes| {
				node_mut(nodes, &target)?.is_ingress_gateway = true;
				Ok(())
			})
			.await?;
		Ok(self.publish(&node.network, changed).await)
	}

	/// Drop the ingress role together with every ext-client attached to it.
	#[instrument(skip(self, ctx), fields(node_id = %id))]
	pub async fn delete_ingress(&self, ctx: &Ctx, id: &NodeId) -> Result<Transition> {
		let node = self.store().get_node(id).await?;
		let target = *id;
		let removed = self
			.store()
			.delete_ext_clients_where(ctx, move |c| c.ingress_id == target)
			.await?;
		let changed = self
			.transact(ctx, BTreeSet::from([target]), move |nodes| {
				node_mut(nodes, &target)?.is_ingress_gateway = false;
				Ok(())
			})
			.await?;
		info!(ext_clients_removed = removed.len(), "ingress removed");
		Ok(self.publish(&node.network, changed).await)
	}

	/// Route `ranges` through `id`, one egress rule per range.
	#[instrument(skip(self, ctx, ranges), fields(node_id = %id, ranges = ranges.len()))]
	pub async fn create_egress_gateway(
		&self,
		ctx: &Ctx,
		id: &NodeId,
		ranges: Vec<IpNet>,
		nat: bool,
	) -> Result<(Vec<Egress>, Transition)> {
		let node = self.store().get_node(id).await?;
		if ranges.is_empty() {
			return violated(
				Invariant::RoleConflict,
				format!("egress gateway {id} needs at least one range"),
			);
		}
		let host = self.host(&node).await?;

		let existing = self.store().list_egresses(&node.network).await;
		let mut created = Vec::new();
		for range in ranges {
			let covered = existing
				.iter()
				.any(|e| e.range == Some(range) && e.nodes.contains(id));
			if covered {
				continue;
			}
			let mut egress = Egress::new(node.network.clone(), format!("{}-{range}", host.name), Some(range));
			egress.nodes.insert(*id);
			egress.nat = nat;
			created.push(self.store().create_egress(ctx, egress).await?);
		}

		let after = self.store().get_node(id).await?;
		let changed = if after != node { vec![after] } else { Vec::new() };
		info!(rules = created.len(), "egress gateway set");
		Ok((created, self.publish(&node.network, changed).await))
	}

	/// Take `id` out of every egress rule; rules left with no members are
	/// deleted.
	#[instrument(skip(self, ctx), fields(node_id = %id))]
	pub async fn delete_egress_gateway(&self, ctx: &Ctx, id: &NodeId) -> Result<Transition> {
		let node = self.store().get_node(id).await?;
		for mut egress in self.store().list_egresses(&node.network).await {
			if !egress.nodes.remove(id) {
				continue;
			}
			if egress.nodes.is_empty() && egress.tags.is_empty() {
				self.store().delete_egress(ctx, &egress.id).await?;
			} else {
				self.store().update_egress(ctx, egress).await?;
			}
		}
		let after = self.store().get_node(id).await?;
		let changed = if after != node { vec![after] } else { Vec::new() };
		Ok(self.publish(&node.network, changed).await)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::service::testing::Harness;
	use netweave_common_core::ExtClient;
	use netweave_server_peers::PeerComputer;

	#[tokio::test]
	async fn deleting_ingress_removes_its_clients() {
		let h = Harness::new().await;
		let gw = h.node("gw", "10.0.0.1").await;
		let ctx = Ctx::startup();
		h.gateways.create_ingress(&ctx, &gw.id).await.unwrap();

		let mut client = ExtClient::new("phone", h.net.clone(), gw.id, "pk-phone");
		client.address = Some("10.0.0.9".parse().unwrap());
		h.store.create_ext_client(&ctx, client).await.unwrap();

		h.gateways.delete_ingress(&ctx, &gw.id).await.unwrap();
		assert!(!h.get(&gw).await.is_ingress_gateway);
		assert!(h.store.list_ext_clients(&h.net).await.is_empty());
	}

	#[tokio::test]
	async fn relayed_node_cannot_be_ingress() {
		let h = Harness::new().await;
		let r = h.node("r", "10.0.0.1").await;
		let a = h.node("a", "10.0.0.2").await;
		let ctx = Ctx::startup();
		h.gateways.create_relay(&ctx, &r.id, BTreeSet::from([a.id])).await.unwrap();
		let err = h.gateways.create_ingress(&ctx, &a.id).await.unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::RelayedNotIngress));
	}

	#[tokio::test]
	async fn egress_gateway_routes_ranges_and_is_idempotent() {
		let h = Harness::new().await;
		let e = h.node("e", "10.0.0.1").await;
		let b = h.node("b", "10.0.0.2").await;
		let ctx = Ctx::startup();
		let lan: IpNet = "192.168.1.0/24".parse().unwrap();

		let (rules, t) = h
			.gateways
			.create_egress_gateway(&ctx, &e.id, vec![lan], true)
			.await
			.unwrap();
		assert_eq!(rules.len(), 1);
		assert!(t.node(&e.id).unwrap().is_egress_gateway);

		let (again, t) = h
			.gateways
			.create_egress_gateway(&ctx, &e.id, vec![lan], true)
			.await
			.unwrap();
		assert!(again.is_empty());
		assert!(t.is_noop());

		let snap = h.store.snapshot(&h.net).await.unwrap();
		let peers_b = PeerComputer::new(&snap, "0.1.0").peer_update(&b.id).unwrap();
		assert!(peers_b.peer("pk-e").unwrap().allowed_ips.contains(&lan));

		h.gateways.delete_egress_gateway(&ctx, &e.id).await.unwrap();
		assert!(!h.get(&e).await.is_egress_gateway);
		assert!(h.store.list_egresses(&h.net).await.is_empty());
	}

	#[tokio::test]
	async fn egress_needs_a_range() {
		let h = Harness::new().await;
		let e = h.node("e", "10.0.0.1").await;
		let err = h
			.gateways
			.create_egress_gateway(&Ctx::startup(), &e.id, Vec::new(), true)
			.await
			.unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::RoleConflict));
	}
}
