// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use netweave_common_core::{
	Acl, Egress, Event, EventAction, ExtClient, Host, JitGrant, JitRequest, Metrics, Network,
	NetworkId, NetworkSnapshot, Node, NodeId, PostureCheck, Role, RoleId, Tag, User, UserGroup,
};
use netweave_server_audit::{EventService, MetricsRepo};
use netweave_server_db::{CallPolicy, KvStore, Table};
use tracing::{debug, info, instrument, warn};

use crate::cache::Cached;
use crate::context::Ctx;
use crate::entity::{Caches, Entity};
use crate::error::{StoreError, StoreResult};
use crate::locks::{EntityLocks, LockSet};
use crate::normalize::normalize_node;

/// Typed, cached access to every persisted entity.
///
/// Only this type mutates the caches. Mutations validate, write through
/// the KV store, refresh the cache entry and queue an event, in that order.
pub struct EntityStore {
	kv: Arc<dyn KvStore>,
	policy: CallPolicy,
	events: Arc<EventService>,
	metrics: MetricsRepo,
	pub(crate) caches: Caches,
	locks: EntityLocks,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReloadStats {
	pub rows: usize,
	pub normalized: usize,
	pub skipped: usize,
}

impl EntityStore {
	pub fn new(kv: Arc<dyn KvStore>, policy: CallPolicy, events: Arc<EventService>) -> Self {
		let metrics = MetricsRepo::new(Arc::clone(&kv), policy.clone());
		Self {
			kv,
			policy,
			events,
			metrics,
			caches: Caches::default(),
			locks: EntityLocks::new(),
		}
	}

	pub fn events(&self) -> &Arc<EventService> {
		&self.events
	}

	pub fn metrics_repo(&self) -> &MetricsRepo {
		&self.metrics
	}

	pub fn locks(&self) -> &EntityLocks {
		&self.locks
	}

	pub fn call_policy(&self) -> &CallPolicy {
		&self.policy
	}

	/// Lock a set of nodes in ascending id order.
	pub async fn lock_nodes(&self, ids: impl IntoIterator<Item = NodeId>) -> LockSet {
		self.locks
			.lock_all(ids.into_iter().map(|id| format!("node/{id}")))
			.await
	}

	pub async fn lock_key(&self, key: impl Into<String>) -> LockSet {
		self.locks.lock(key).await
	}

	async fn load_table<E: Entity>(&self) -> StoreResult<(BTreeMap<String, Cached<E>>, usize)> {
		let rows = self.policy.with_retry(|| self.kv.list_versioned(E::TABLE)).await?;
		let mut out = BTreeMap::new();
		let mut skipped = 0;
		for (key, row) in rows {
			match serde_json::from_str::<E>(&row.value) {
				Ok(value) => {
					out.insert(
						key,
						Cached {
							value,
							version: row.version,
						},
					);
				}
				Err(e) => {
					warn!(table = %E::TABLE, key = %key, error = %e, "skipping unreadable record");
					skipped += 1;
				}
			}
		}
		Ok((out, skipped))
	}

	async fn reload<E: Entity>(&self, stats: &mut ReloadStats) -> StoreResult<()> {
		let (rows, skipped) = self.load_table::<E>().await?;
		stats.rows += rows.len();
		stats.skipped += skipped;
		E::cache(&self.caches).replace_all(rows).await;
		Ok(())
	}

	/// Cold start: fill every cache from the KV store, normalize legacy
	/// nodes and rebuild each host's node set from the nodes.
	#[instrument(skip(self))]
	pub async fn bulk_reload(&self) -> StoreResult<ReloadStats> {
		let mut stats = ReloadStats::default();
		self.reload::<Network>(&mut stats).await?;
		self.reload::<Host>(&mut stats).await?;
		self.reload::<Node>(&mut stats).await?;
		self.reload::<ExtClient>(&mut stats).await?;
		self.reload::<Acl>(&mut stats).await?;
		self.reload::<Tag>(&mut stats).await?;
		self.reload::<Egress>(&mut stats).await?;
		self.reload::<UserGroup>(&mut stats).await?;
		self.reload::<Role>(&mut stats).await?;
		self.reload::<User>(&mut stats).await?;
		self.reload::<JitRequest>(&mut stats).await?;
		self.reload::<JitGrant>(&mut stats).await?;
		self.reload::<PostureCheck>(&mut stats).await?;

		let networks: BTreeMap<NetworkId, Network> = self
			.caches
			.networks
			.values()
			.await
			.into_iter()
			.map(|n| (n.id.clone(), n))
			.collect();
		for mut node in self.caches.nodes.values().await {
			let network = networks.get(&node.network);
			if normalize_node(&mut node, network) {
				self.write(&node).await?;
				stats.normalized += 1;
			}
		}

		for mut host in self.caches.hosts.values().await {
			let owned: BTreeSet<NodeId> = self
				.caches
				.nodes
				.filter(|n| n.host_id == host.id)
				.await
				.into_iter()
				.map(|n| n.id)
				.collect();
			if owned != host.nodes {
				host.nodes = owned;
				self.write(&host).await?;
			}
		}

		self.ensure_global_roles().await?;

		info!(
			rows = stats.rows,
			normalized = stats.normalized,
			skipped = stats.skipped,
			"entity caches loaded"
		);
		Ok(stats)
	}

	async fn ensure_global_roles(&self) -> StoreResult<()> {
		let globals = [
			Role {
				id: RoleId::new(RoleId::GLOBAL_NETWORK_ADMIN),
				network: None,
				default: true,
				full_access: true,
				network_admin: true,
			},
			Role {
				id: RoleId::new(RoleId::GLOBAL_NETWORK_USER),
				network: None,
				default: true,
				full_access: false,
				network_admin: false,
			},
		];
		for role in globals {
			if self.read::<Role>(role.id.as_str()).await?.is_none() {
				self.write(&role).await?;
			}
		}
		Ok(())
	}

	/// Cache first, then the KV store; a KV hit is memoized.
	pub(crate) async fn read<E: Entity>(&self, key: &str) -> StoreResult<Option<E>> {
		let cache = E::cache(&self.caches);
		if let Some(hit) = cache.get(key).await {
			return Ok(Some(hit.value));
		}
		let Some(row) = self.policy.with_retry(|| self.kv.get(E::TABLE, key)).await? else {
			return Ok(None);
		};
		let entity: E = serde_json::from_str(&row.value).map_err(|source| StoreError::Corrupt {
			key: format!("{}/{key}", E::TABLE),
			source,
		})?;
		cache.insert(key.to_string(), entity.clone(), row.version).await;
		Ok(Some(entity))
	}

	pub(crate) async fn require<E: Entity>(&self, key: &str) -> StoreResult<E> {
		self.read::<E>(key)
			.await?
			.ok_or_else(|| StoreError::NotFound(format!("{}/{key}", E::TABLE)))
	}

	pub(crate) async fn all<E: Entity>(&self) -> Vec<E> {
		E::cache(&self.caches).values().await
	}

	pub(crate) async fn all_in<E: Entity>(&self, network: &NetworkId) -> Vec<E> {
		E::cache(&self.caches)
			.filter(|e| e.network() == Some(network))
			.await
	}

	/// Write through. A cached row is replaced only if the stored version
	/// still matches; a stale cache yields `Conflict` and is invalidated.
	pub(crate) async fn write<E: Entity>(&self, entity: &E) -> StoreResult<()> {
		let key = entity.key();
		let value = serde_json::to_string(entity).map_err(|source| StoreError::Corrupt {
			key: format!("{}/{key}", E::TABLE),
			source,
		})?;
		let cache = E::cache(&self.caches);

		let expected = match cache.get(&key).await {
			Some(hit) => Some(hit.version),
			None => self
				.policy
				.with_retry(|| self.kv.get(E::TABLE, &key))
				.await?
				.map(|v| v.version),
		};

		let result = match expected {
			Some(version) => {
				self.policy
					.with_retry(|| self.kv.compare_and_swap(E::TABLE, &key, version, &value))
					.await
			}
			None => self.policy.with_retry(|| self.kv.insert(E::TABLE, &key, &value)).await,
		};

		match result {
			Ok(version) => {
				cache.insert(key, entity.clone(), version).await;
				Ok(())
			}
			Err(e) => {
				cache.invalidate(&key).await;
				Err(e.into())
			}
		}
	}

	/// Insert only.
	pub(crate) async fn create<E: Entity>(&self, entity: &E) -> StoreResult<()> {
		let key = entity.key();
		if self.read::<E>(&key).await?.is_some() {
			return Err(StoreError::AlreadyExists(format!("{}/{key}", E::TABLE)));
		}
		self.write(entity).await
	}

	pub(crate) async fn remove<E: Entity>(&self, key: &str) -> StoreResult<E> {
		let existing = self.require::<E>(key).await?;
		self.policy.with_retry(|| self.kv.delete(E::TABLE, key)).await?;
		E::cache(&self.caches).invalidate(key).await;
		Ok(existing)
	}

	pub(crate) async fn emit<E: Entity>(
		&self,
		ctx: &Ctx,
		action: EventAction,
		old: Option<&E>,
		new: Option<&E>,
	) {
		let Some(subject) = new.or(old) else {
			return;
		};
		let mut builder = Event::builder(action, E::KIND, subject.key())
			.actor(ctx.actor.clone())
			.origin(ctx.origin)
			.name(subject.label())
			.diff(old, new);
		if let Some(network) = subject.network() {
			builder = builder.network(network);
		}
		if !self.events.emit(builder.build()).await {
			debug!(kind = %E::KIND, "event dropped");
		}
	}

	/// Every entity of one network, without metrics. Validation runs
	/// against this view with the pending write overlaid.
	pub(crate) async fn view(&self, network: &NetworkId) -> StoreResult<NetworkSnapshot> {
		let net = self.require::<Network>(network.as_str()).await?;
		let mut snap = NetworkSnapshot::new(net);

		for node in self.all_in::<Node>(network).await {
			snap.nodes.insert(node.id, node);
		}
		for node in snap.nodes.values() {
			if let Some(host) = self.caches.hosts.get(&node.host_id.to_string()).await {
				snap.hosts.insert(host.value.id, host.value);
			}
		}
		for client in self.all_in::<ExtClient>(network).await {
			snap.ext_clients.insert(client.client_id.clone(), client);
		}
		snap.acls = self.all_in::<Acl>(network).await;
		snap.acls.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
		for tag in self.all_in::<Tag>(network).await {
			snap.tags.insert(tag.id.clone(), tag);
		}
		for egress in self.all_in::<Egress>(network).await {
			snap.egresses.insert(egress.id, egress);
		}
		for user in self.all::<User>().await {
			snap.users.insert(user.username.clone(), user);
		}
		for group in self.all::<UserGroup>().await {
			snap.groups.insert(group.id.clone(), group);
		}
		for role in self.all::<Role>().await {
			snap.roles.insert(role.id.clone(), role);
		}
		Ok(snap)
	}

	/// Read-boundary copy of everything one network's peer graph needs.
	#[instrument(skip(self), fields(network = %network))]
	pub async fn snapshot(&self, network: &NetworkId) -> StoreResult<NetworkSnapshot> {
		let mut snap = self.view(network).await?;
		for metrics in self.metrics.list().await.map_err(audit_to_store)? {
			if snap.nodes.contains_key(&metrics.node_id) {
				snap.metrics.insert(metrics.node_id, metrics);
			}
		}
		snap.taken_at = Utc::now();
		debug!(
			nodes = snap.nodes.len(),
			ext_clients = snap.ext_clients.len(),
			acls = snap.acls.len(),
			"snapshot taken"
		);
		Ok(snap)
	}

	pub async fn update_metrics(&self, metrics: Metrics) -> StoreResult<()> {
		self.require::<Node>(&metrics.node_id.to_string())
			.await?;
		self.metrics.update_metrics(metrics).await.map_err(audit_to_store)
	}

	pub async fn metrics(&self, node_id: &NodeId) -> StoreResult<Option<Metrics>> {
		self.metrics.metrics(node_id).await.map_err(audit_to_store)
	}

	/// Raw server-level settings under `servercfg/<key>`.
	pub async fn server_config(&self, key: &str) -> StoreResult<Option<String>> {
		Ok(self
			.policy
			.with_retry(|| self.kv.get(Table::ServerConf, key))
			.await?
			.map(|v| v.value))
	}

	pub async fn put_server_config(&self, key: &str, value: &str) -> StoreResult<()> {
		self.policy
			.with_retry(|| self.kv.put(Table::ServerConf, key, value))
			.await?;
		Ok(())
	}
}

pub(crate) fn audit_to_store(e: netweave_server_audit::AuditError) -> StoreError {
	match e {
		netweave_server_audit::AuditError::Store(db) => db.into(),
		other => StoreError::Db(netweave_server_db::DbError::Internal(other.to_string())),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{node_in, seeded_store};
	use netweave_common_core::{Host, HostOs};
	use netweave_server_audit::QueueOverflowPolicy;
	use netweave_server_db::MemoryKvStore;
	use std::time::Duration;

	fn store_over(kv: Arc<MemoryKvStore>) -> EntityStore {
		let events = Arc::new(EventService::new(100, QueueOverflowPolicy::Block, Vec::new()));
		EntityStore::new(kv, CallPolicy::new(Duration::from_secs(5)), events)
	}

	#[tokio::test]
	async fn stale_cache_write_conflicts_then_recovers() {
		let kv = Arc::new(MemoryKvStore::new());
		let store = store_over(Arc::clone(&kv));
		let network = Network::new("n1", Some("10.0.0.0/24".parse().unwrap()));
		store.write(&network).await.unwrap();

		let mut other = network.clone();
		other.default_keepalive = 30;
		kv.put(Table::Networks, "n1", &serde_json::to_string(&other).unwrap())
			.await
			.unwrap();

		let mut mine = network.clone();
		mine.default_keepalive = 40;
		let err = store.write(&mine).await.unwrap_err();
		assert!(matches!(err, StoreError::Conflict(_)));

		let fresh: Network = store.require("n1").await.unwrap();
		assert_eq!(fresh.default_keepalive, 30);
		store.write(&mine).await.unwrap();
	}

	#[tokio::test]
	async fn transient_failures_are_retried() {
		let kv = Arc::new(MemoryKvStore::new());
		let store = store_over(Arc::clone(&kv));
		kv.fail_next(2);
		store
			.write(&Network::new("n1", Some("10.0.0.0/24".parse().unwrap())))
			.await
			.unwrap();
		assert!(kv.get(Table::Networks, "n1").await.unwrap().is_some());
	}

	#[tokio::test]
	async fn bulk_reload_upgrades_legacy_nodes_and_host_sets() {
		let kv = Arc::new(MemoryKvStore::new());
		let network = Network::new("n1", Some("10.0.0.0/24".parse().unwrap()));
		let host = Host::new("h", HostOs::Linux, "pk");
		let mut legacy = Node::new(host.id, network.id.clone());
		legacy.schema_version = 1;
		legacy.persistent_keepalive = 0;
		legacy.relayed_nodes.insert(NodeId::new());

		kv.put(Table::Networks, "n1", &serde_json::to_string(&network).unwrap())
			.await
			.unwrap();
		kv.put(Table::Hosts, &host.id.to_string(), &serde_json::to_string(&host).unwrap())
			.await
			.unwrap();
		kv.put(Table::Nodes, &legacy.id.to_string(), &serde_json::to_string(&legacy).unwrap())
			.await
			.unwrap();
		kv.put(Table::Nodes, "garbage", "{not json").await.unwrap();

		let store = store_over(Arc::clone(&kv));
		let stats = store.bulk_reload().await.unwrap();
		assert_eq!(stats.normalized, 1);
		assert_eq!(stats.skipped, 1);

		let node = store.get_node(&legacy.id).await.unwrap();
		assert_eq!(node.persistent_keepalive, network.default_keepalive);
		assert!(node.relayed_nodes.is_empty());
		assert!(store.get_host(&host.id).await.unwrap().nodes.contains(&legacy.id));
		assert!(store.get_role(&RoleId::new(RoleId::GLOBAL_NETWORK_ADMIN)).await.is_ok());
	}

	#[tokio::test]
	async fn snapshot_carries_metrics_for_live_nodes() {
		let (store, net) = seeded_store().await;
		let a = node_in(&store, &net, "a", "10.0.0.1").await;
		store
			.update_metrics(Metrics::new(a.id, net.clone()))
			.await
			.unwrap();
		let snap = store.snapshot(&net).await.unwrap();
		assert!(snap.metrics.contains_key(&a.id));
		assert_eq!(snap.acls.len(), 2);
	}
}
