// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Store builders for tests in this and downstream crates.

use std::sync::Arc;
use std::time::Duration;

use netweave_common_core::{Host, HostOs, Network, NetworkId, Node};
use netweave_server_audit::{EventService, QueueOverflowPolicy};
use netweave_server_db::{CallPolicy, MemoryKvStore};

use crate::context::Ctx;
use crate::store::EntityStore;

/// An empty store over an in-memory KV with no event sinks.
pub async fn memory_store() -> EntityStore {
	let events = Arc::new(EventService::new(100, QueueOverflowPolicy::Block, Vec::new()));
	let store = EntityStore::new(
		Arc::new(MemoryKvStore::new()),
		CallPolicy::new(Duration::from_secs(5)),
		events,
	);
	store.bulk_reload().await.unwrap();
	store
}

/// A store holding network `n1` on `10.0.0.0/24` with its defaults.
pub async fn seeded_store() -> (EntityStore, NetworkId) {
	let store = memory_store().await;
	let net = NetworkId::from("n1");
	store
		.create_network(
			&Ctx::startup(),
			Network::new(net.clone(), Some("10.0.0.0/24".parse().unwrap())),
		)
		.await
		.unwrap();
	(store, net)
}

/// A Linux host named `name` joined to `network` at `address`.
pub async fn node_in(store: &EntityStore, network: &NetworkId, name: &str, address: &str) -> Node {
	node_on(store, network, name, address, HostOs::Linux).await
}

pub async fn node_on(
	store: &EntityStore,
	network: &NetworkId,
	name: &str,
	address: &str,
	os: HostOs,
) -> Node {
	let host = store
		.upsert_host(&Ctx::startup(), Host::new(name, os, format!("pk-{name}")))
		.await
		.unwrap();
	let mut node = Node::new(host.id, network.clone());
	node.address = Some(address.parse().unwrap());
	store.create_node(&Ctx::startup(), node).await.unwrap()
}

/// Like [`node_in`] with the ingress role already set.
pub async fn ingress_in(store: &EntityStore, network: &NetworkId, name: &str, address: &str) -> Node {
	let node = node_in(store, network, name, address).await;
	store
		.update_node(&Ctx::startup(), &node.id, |n| {
			n.is_ingress_gateway = true;
			Ok(())
		})
		.await
		.unwrap()
}
