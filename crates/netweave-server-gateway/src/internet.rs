// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::{BTreeMap, BTreeSet};

use netweave_common_core::{HostOs, NetworkId, Node, NodeId};
use netweave_server_store::{Ctx, Invariant, StoreError};
use tracing::{info, instrument};

use crate::error::{conflict, violated, GatewayError, Result};
use crate::service::{node_mut, GatewayService, Transition};

impl GatewayService {
	/// Make `gw_id` the internet gateway of exactly `clients`.
	///
	/// Clients dropped from a previous call stop using the gateway. When the
	/// network has a failover node its pairs are reset before anything is
	/// published, since default routes change what the pairs carry.
	#[instrument(skip(self, ctx, clients), fields(node_id = %gw_id, clients = clients.len()))]
	pub async fn create_internet_gateway(
		&self,
		ctx: &Ctx,
		gw_id: &NodeId,
		clients: BTreeSet<NodeId>,
	) -> Result<Transition> {
		let gw = self.store().get_node(gw_id).await?;
		if !self.host(&gw).await?.is_linux() {
			return violated(
				Invariant::InternetGatewayLinux,
				format!("internet gateway {gw_id} must run on linux"),
			);
		}
		if gw.is_relayed {
			return conflict(format!("relayed node {gw_id} cannot be an internet gateway"));
		}
		if gw.internet_gw_id.is_some() {
			return conflict(format!("node {gw_id} already uses an internet gateway"));
		}
		if clients.contains(gw_id) {
			return conflict(format!("node {gw_id} cannot use itself as internet gateway"));
		}

		for id in &clients {
			let client = self.store().get_node(id).await?;
			if client.network != gw.network {
				return Err(StoreError::NotFound(format!("node {id} in {}", gw.network)).into());
			}
			let os = self.host(&client).await?.os;
			if !matches!(os, HostOs::Linux | HostOs::Windows) {
				return conflict(format!("node {id} on {os:?} cannot route through an internet gateway"));
			}
			if client.is_internet_gateway {
				return conflict(format!("internet gateway {id} cannot use another one"));
			}
			if let Some(other) = client.internet_gw_id.filter(|g| g != gw_id) {
				return conflict(format!("node {id} already uses internet gateway {other}"));
			}
			if client.relayed_by.is_some_and(|r| r != *gw_id) {
				return conflict(format!("relayed node {id} must use its relay as internet gateway"));
			}
		}

		let mut ids = gw.inet_node_clients.clone();
		ids.extend(self.ids_where(&gw.network, |n| n.internet_gw_id == Some(*gw_id)).await);
		ids.extend(clients.iter().copied());
		ids.insert(*gw_id);

		let target = *gw_id;
		let changed = self
			.transact(ctx, ids, move |nodes| {
				for n in nodes.values_mut() {
					if n.internet_gw_id == Some(target) && !clients.contains(&n.id) {
						n.internet_gw_id = None;
					}
				}
				for id in &clients {
					node_mut(nodes, id)?.internet_gw_id = Some(target);
				}
				let gw = node_mut(nodes, &target)?;
				gw.is_internet_gateway = true;
				gw.inet_node_clients = clients;
				Ok(())
			})
			.await?;
		if changed.is_empty() {
			return Ok(Transition::default());
		}

		let changed = self.with_failover_reset(ctx, &gw.network, changed).await?;
		info!(changed = changed.len(), "internet gateway set");
		Ok(self.publish(&gw.network, changed).await)
	}

	pub async fn update_internet_gateway(
		&self,
		ctx: &Ctx,
		gw_id: &NodeId,
		clients: BTreeSet<NodeId>,
	) -> Result<Transition> {
		let gw = self.store().get_node(gw_id).await?;
		if !gw.is_internet_gateway {
			return Err(GatewayError::NotInRole(gw_id.to_string(), "internet gateway"));
		}
		self.create_internet_gateway(ctx, gw_id, clients).await
	}

	/// Drop the role; every client loses its default route.
	#[instrument(skip(self, ctx), fields(node_id = %gw_id))]
	pub async fn delete_internet_gateway(&self, ctx: &Ctx, gw_id: &NodeId) -> Result<Transition> {
		let gw = self.store().get_node(gw_id).await?;
		let mut ids = gw.inet_node_clients.clone();
		ids.extend(self.ids_where(&gw.network, |n| n.internet_gw_id == Some(*gw_id)).await);
		ids.insert(*gw_id);

		let target = *gw_id;
		let changed = self
			.transact(ctx, ids, move |nodes| {
				for n in nodes.values_mut() {
					if n.internet_gw_id == Some(target) {
						n.internet_gw_id = None;
					}
				}
				let gw = node_mut(nodes, &target)?;
				gw.is_internet_gateway = false;
				gw.inet_node_clients.clear();
				Ok(())
			})
			.await?;
		if changed.is_empty() {
			return Ok(Transition::default());
		}
		let changed = self.with_failover_reset(ctx, &gw.network, changed).await?;
		Ok(self.publish(&gw.network, changed).await)
	}

	/// Clear failover pairs of the network when it has a failover node and
	/// fold the result into `changed`, later writes winning.
	async fn with_failover_reset(
		&self,
		ctx: &Ctx,
		network: &NetworkId,
		changed: Vec<Node>,
	) -> Result<Vec<Node>> {
		if self.failover_of(network).await.is_none() {
			return Ok(changed);
		}
		let mut merged: BTreeMap<NodeId, _> = changed.into_iter().map(|n| (n.id, n)).collect();
		for n in self.clear_network_failover(ctx, network).await? {
			merged.insert(n.id, n);
		}
		Ok(merged.into_values().collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::service::testing::Harness;
	use ipnet::IpNet;
	use netweave_server_peers::PeerComputer;

	#[tokio::test]
	async fn client_gets_default_routes_and_gateway_keeps_client() {
		let h = Harness::new().await;
		let a = h.node("a", "10.0.0.1").await;
		let b = h.node("b", "10.0.0.2").await;
		let ctx = Ctx::startup();

		let t = h
			.gateways
			.create_internet_gateway(&ctx, &a.id, BTreeSet::from([b.id]))
			.await
			.unwrap();
		assert_eq!(t.changed.len(), 2);
		assert_eq!(h.get(&b).await.internet_gw_id, Some(a.id));
		assert_eq!(h.get(&a).await.inet_node_clients, BTreeSet::from([b.id]));

		let snap = h.store.snapshot(&h.net).await.unwrap();
		let computer = PeerComputer::new(&snap, "0.1.0");
		let peers_b = computer.peer_update(&b.id).unwrap();
		let via_a = &peers_b.peer("pk-a").unwrap().allowed_ips;
		assert!(via_a.contains(&"0.0.0.0/0".parse::<IpNet>().unwrap()));
		assert!(via_a.contains(&"::/0".parse::<IpNet>().unwrap()));
		assert!(computer.peer_update(&a.id).unwrap().peer("pk-b").is_some());
	}

	#[tokio::test]
	async fn update_and_delete_release_clients() {
		let h = Harness::new().await;
		let a = h.node("a", "10.0.0.1").await;
		let b = h.node("b", "10.0.0.2").await;
		let c = h.node("c", "10.0.0.3").await;
		let ctx = Ctx::startup();
		h.gateways
			.create_internet_gateway(&ctx, &a.id, BTreeSet::from([b.id]))
			.await
			.unwrap();
		h.gateways
			.update_internet_gateway(&ctx, &a.id, BTreeSet::from([c.id]))
			.await
			.unwrap();
		assert!(h.get(&b).await.internet_gw_id.is_none());
		assert_eq!(h.get(&c).await.internet_gw_id, Some(a.id));

		h.gateways.delete_internet_gateway(&ctx, &a.id).await.unwrap();
		let a_now = h.get(&a).await;
		assert!(!a_now.is_internet_gateway && a_now.inet_node_clients.is_empty());
		assert!(h.get(&c).await.internet_gw_id.is_none());
	}

	#[tokio::test]
	async fn illegal_gateway_compositions() {
		let h = Harness::new().await;
		let a = h.node("a", "10.0.0.1").await;
		let b = h.node("b", "10.0.0.2").await;
		let c = h.node("c", "10.0.0.3").await;
		let mac = h.node_os("m", "10.0.0.4", HostOs::Darwin).await;
		let ctx = Ctx::startup();

		let err = h
			.gateways
			.create_internet_gateway(&ctx, &mac.id, BTreeSet::from([a.id]))
			.await
			.unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::InternetGatewayLinux));

		let err = h
			.gateways
			.create_internet_gateway(&ctx, &a.id, BTreeSet::from([mac.id]))
			.await
			.unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::RoleConflict));

		h.gateways
			.create_internet_gateway(&ctx, &a.id, BTreeSet::from([b.id]))
			.await
			.unwrap();
		// b already routes through a
		let err = h
			.gateways
			.create_internet_gateway(&ctx, &c.id, BTreeSet::from([b.id]))
			.await
			.unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::RoleConflict));
		// a gateway cannot be a client
		let err = h
			.gateways
			.create_internet_gateway(&ctx, &c.id, BTreeSet::from([a.id]))
			.await
			.unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::RoleConflict));
		// a client cannot become a gateway
		let err = h
			.gateways
			.create_internet_gateway(&ctx, &b.id, BTreeSet::new())
			.await
			.unwrap_err();
		assert_eq!(err.invariant(), Some(Invariant::RoleConflict));
	}

	#[tokio::test]
	async fn failover_pairs_reset_when_gateway_changes() {
		let h = Harness::new().await;
		let f = h.node("f", "10.0.0.1").await;
		let a = h.node("a", "10.0.0.2").await;
		let b = h.node("b", "10.0.0.3").await;
		let g = h.node("g", "10.0.0.4").await;
		let ctx = Ctx::startup();
		h.gateways.create_failover(&ctx, &f.id).await.unwrap();
		h.gateways.set_failover_peer(&ctx, &a.id, &b.id).await.unwrap();

		let t = h
			.gateways
			.create_internet_gateway(&ctx, &g.id, BTreeSet::from([a.id]))
			.await
			.unwrap();
		let a_now = t.node(&a.id).unwrap();
		assert_eq!(a_now.internet_gw_id, Some(g.id));
		assert!(a_now.failed_over_by.is_none());
		assert!(h.get(&b).await.fail_over_peers.is_empty());
	}
}
