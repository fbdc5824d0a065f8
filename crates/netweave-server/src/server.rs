// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The composition root. One [`Core`] owns every service of a running
//! server; handlers and jobs reach the services through it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use netweave_common_core::{
	Acl, AclId, Event, ExtClient, Metrics, NetworkId, Node, NodeAction, NodeId, NodeStatus, PeerUpdate,
	PostureReport,
};
use netweave_server_audit::{EventFilter, EventLog, EventService, EventSink, KvEventSink, TracingEventSink};
use netweave_server_config::ServerConfig;
use netweave_server_db::{
	create_memory_pool, create_pool, run_migrations, CallPolicy, FlowQuery, FlowRecord, FlowSink, JobRepository, KvStore,
	MemoryFlowSink, MemoryKvStore, SqliteKvStore, SqlitePool,
};
use netweave_server_gateway::GatewayService;
use netweave_server_jit::{JitService, Notifier};
use netweave_server_jobs::{CancellationToken, JobScheduler};
use netweave_server_peers::{PeerComputer, StatusEngine};
use netweave_server_policy::PolicyEngine;
use netweave_server_publish::{
	Broker, DiscardBroker, Fanout, MqttBroker, PublishError, Publisher, PublisherOptions, Recipient, ServerKeys,
};
use netweave_server_smtp::{Mailer, SmtpClient};
use netweave_server_store::{Ctx, EntityStore, NodeDeletion, UserDeletion};
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::jobs;
use crate::license::{LicenseMonitor, LicenseValidator, OfflineValidator};

enum Storage {
	Sqlite(String),
	Memory,
}

/// Assembles a [`Core`]. Defaults: SQLite at the configured URL, MQTT when
/// a broker host is configured, SMTP from config, offline license validation.
pub struct CoreBuilder {
	config: ServerConfig,
	storage: Storage,
	broker: Option<Arc<dyn Broker>>,
	mailer: Option<Arc<dyn Mailer>>,
	validator: Arc<dyn LicenseValidator>,
	publisher_options: Option<PublisherOptions>,
}

impl CoreBuilder {
	pub fn new(config: ServerConfig) -> Self {
		Self {
			storage: Storage::Sqlite(config.database.url.clone()),
			config,
			broker: None,
			mailer: None,
			validator: Arc::new(OfflineValidator),
			publisher_options: None,
		}
	}

	/// Keep entities in memory and job history in an in-memory SQLite.
	pub fn in_memory(mut self) -> Self {
		self.storage = Storage::Memory;
		self
	}

	pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
		self.broker = Some(broker);
		self
	}

	pub fn mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
		self.mailer = Some(mailer);
		self
	}

	pub fn license_validator(mut self, validator: Arc<dyn LicenseValidator>) -> Self {
		self.validator = validator;
		self
	}

	pub fn publisher_options(mut self, options: PublisherOptions) -> Self {
		self.publisher_options = Some(options);
		self
	}

	#[instrument(skip(self))]
	pub async fn build(self) -> Result<Core> {
		let config = self.config;
		let shutdown = CancellationToken::new();

		let (kv, pool): (Arc<dyn KvStore>, SqlitePool) = match &self.storage {
			Storage::Sqlite(url) => {
				let pool = create_pool(url).await?;
				run_migrations(&pool).await?;
				(Arc::new(SqliteKvStore::new(pool.clone())), pool)
			}
			Storage::Memory => {
				let pool = create_memory_pool().await?;
				run_migrations(&pool).await?;
				(Arc::new(MemoryKvStore::new()), pool)
			}
		};
		let policy = CallPolicy::new(Duration::from_millis(config.database.kv_timeout_ms)).with_cancel(shutdown.child_token());

		let mut sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(TracingEventSink::new())];
		if config.audit.enabled {
			sinks.push(Arc::new(KvEventSink::new(Arc::clone(&kv), policy.clone())));
		}
		let events = Arc::new(EventService::from_config(&config.audit, sinks));
		let event_log = EventLog::new(Arc::clone(&kv), policy.clone());

		let store = Arc::new(EntityStore::new(Arc::clone(&kv), policy, Arc::clone(&events)));
		let stats = store.bulk_reload().await?;
		info!(rows = stats.rows, skipped = stats.skipped, "entity caches loaded");

		let keys = ServerKeys::load_or_create(&store).await?;
		let broker: Arc<dyn Broker> = match self.broker {
			Some(broker) => broker,
			None if config.mqtt.broker_enabled() => {
				Arc::new(MqttBroker::connect(&config.mqtt, shutdown.child_token()).map_err(PublishError::from)?)
			}
			None => {
				warn!("no MQTT broker configured, updates will not reach agents");
				Arc::new(DiscardBroker::new())
			}
		};
		let options = self
			.publisher_options
			.unwrap_or_else(|| PublisherOptions::from_config(&config.mqtt));
		let publisher = Arc::new(Publisher::new(broker, keys, options));
		let fanout = Arc::new(Fanout::new(
			Arc::clone(&store),
			Arc::clone(&publisher),
			config.server.server_version.clone(),
		));

		let mailer = match self.mailer {
			Some(mailer) => Some(mailer),
			None => match &config.smtp {
				Some(smtp) => match SmtpClient::new(smtp) {
					Ok(client) => Some(Arc::new(client) as Arc<dyn Mailer>),
					Err(e) => {
						warn!(error = %e, "SMTP client not created, JIT email disabled");
						None
					}
				},
				None => None,
			},
		};
		let jit = Arc::new(JitService::new(
			Arc::clone(&store),
			Arc::clone(&fanout),
			Notifier::new(mailer),
		));
		let gateways = GatewayService::new(Arc::clone(&store), Arc::clone(&fanout));
		let license = Arc::new(LicenseMonitor::new(
			config.license.clone(),
			self.validator,
			Arc::clone(&store),
		));

		Ok(Core {
			config,
			store,
			events,
			event_log,
			publisher,
			fanout,
			gateways,
			jit,
			flows: Arc::new(MemoryFlowSink::new()),
			job_repository: Arc::new(JobRepository::new(pool)),
			license,
			shutdown,
		})
	}
}

pub struct Core {
	config: ServerConfig,
	store: Arc<EntityStore>,
	events: Arc<EventService>,
	event_log: EventLog,
	publisher: Arc<Publisher>,
	fanout: Arc<Fanout>,
	gateways: GatewayService,
	jit: Arc<JitService>,
	flows: Arc<dyn FlowSink>,
	job_repository: Arc<JobRepository>,
	license: Arc<LicenseMonitor>,
	shutdown: CancellationToken,
}

impl Core {
	pub fn builder(config: ServerConfig) -> CoreBuilder {
		CoreBuilder::new(config)
	}

	pub fn config(&self) -> &ServerConfig {
		&self.config
	}

	pub fn store(&self) -> &Arc<EntityStore> {
		&self.store
	}

	pub fn publisher(&self) -> &Arc<Publisher> {
		&self.publisher
	}

	pub fn fanout(&self) -> &Arc<Fanout> {
		&self.fanout
	}

	pub fn gateways(&self) -> &GatewayService {
		&self.gateways
	}

	pub fn jit(&self) -> &Arc<JitService> {
		&self.jit
	}

	pub fn flows(&self) -> &Arc<dyn FlowSink> {
		&self.flows
	}

	pub fn license(&self) -> &Arc<LicenseMonitor> {
		&self.license
	}

	pub fn shutdown_token(&self) -> CancellationToken {
		self.shutdown.clone()
	}

	fn checkin_threshold(&self) -> chrono::Duration {
		chrono::Duration::seconds(self.config.server.checkin_threshold_secs as i64)
	}

	async fn republish(&self, network: &NetworkId) {
		if let Err(e) = self.fanout.network(network).await {
			warn!(network = %network, error = %e, "peer fan-out failed");
		}
	}

	/// A node checked in. Reconnecting nodes get their peers republished.
	#[instrument(skip(self), fields(node_id = %id))]
	pub async fn check_in(&self, id: &NodeId, at: DateTime<Utc>) -> Result<Node> {
		let was_connected = self.store.get_node(id).await?.connected;
		let node = self.store.touch_node(id, at).await?;
		if !was_connected {
			self.republish(&node.network).await;
		}
		Ok(node)
	}

	#[instrument(skip(self, ctx), fields(node_id = %id))]
	pub async fn delete_node(&self, ctx: &Ctx, id: &NodeId) -> Result<NodeDeletion> {
		let deletion = self.store.delete_node(ctx, id).await?;
		if let Err(e) = self.fanout.node_update(&deletion.node, NodeAction::Delete).await {
			warn!(error = %e, "delete notice not published");
		}
		self.publisher.forget(Recipient::Node(*id)).await;
		self.republish(&deletion.node.network).await;
		Ok(deletion)
	}

	/// Delete a user with its clients and policy references, then refresh
	/// every network that lost something.
	#[instrument(skip(self, ctx))]
	pub async fn delete_user(&self, ctx: &Ctx, username: &str) -> Result<UserDeletion> {
		let deletion = self.store.delete_user(ctx, username).await?;
		for network in &deletion.networks_touched {
			self.republish(network).await;
		}
		Ok(deletion)
	}

	pub async fn create_ext_client(&self, ctx: &Ctx, client: ExtClient) -> Result<ExtClient> {
		let client = self.store.create_ext_client(ctx, client).await?;
		self.republish(&client.network).await;
		Ok(client)
	}

	pub async fn delete_ext_client(&self, ctx: &Ctx, client_id: &str) -> Result<ExtClient> {
		let client = self.store.delete_ext_client(ctx, client_id).await?;
		self.republish(&client.network).await;
		Ok(client)
	}

	pub async fn create_acl(&self, ctx: &Ctx, acl: Acl) -> Result<Acl> {
		let acl = self.store.create_acl(ctx, acl).await?;
		self.republish(&acl.network).await;
		Ok(acl)
	}

	pub async fn update_acl(&self, ctx: &Ctx, acl: Acl) -> Result<Acl> {
		let acl = self.store.update_acl(ctx, acl).await?;
		self.republish(&acl.network).await;
		Ok(acl)
	}

	pub async fn delete_acl(&self, ctx: &Ctx, id: &AclId) -> Result<Acl> {
		let acl = self.store.delete_acl(ctx, id).await?;
		self.republish(&acl.network).await;
		Ok(acl)
	}

	/// What would be published to `peers/<network>/<node>` right now.
	pub async fn peer_update(&self, id: &NodeId) -> Result<PeerUpdate> {
		let node = self.store.get_node(id).await?;
		let snap = self.store.snapshot(&node.network).await?;
		Ok(PeerComputer::new(&snap, self.config.server.server_version.as_str()).peer_update(id)?)
	}

	pub async fn is_user_allowed(&self, network: &NetworkId, username: &str, node: &NodeId) -> Result<bool> {
		let snap = self.store.snapshot(network).await?;
		let engine = PolicyEngine::new(&snap);
		let member = engine.node_member(node)?;
		Ok(engine.is_user_allowed(username, member))
	}

	pub async fn node_status(&self, id: &NodeId) -> Result<NodeStatus> {
		let node = self.store.get_node(id).await?;
		let snap = self.store.snapshot(&node.network).await?;
		Ok(StatusEngine::new(&snap, self.checkin_threshold(), Utc::now()).status_of(id)?)
	}

	/// Status of every node and ext-client in the network, keyed by id.
	pub async fn network_status(&self, network: &NetworkId) -> Result<BTreeMap<String, NodeStatus>> {
		let snap = self.store.snapshot(network).await?;
		Ok(StatusEngine::new(&snap, self.checkin_threshold(), Utc::now()).network_status())
	}

	/// Devices of the network whose last posture evaluation failed.
	pub async fn posture_violations(&self, network: &NetworkId) -> Result<Vec<PostureReport>> {
		self.store.get_network(network).await?;
		Ok(self.store.posture_violations(network).await)
	}

	pub async fn update_metrics(&self, metrics: Metrics) -> Result<()> {
		Ok(self.store.update_metrics(metrics).await?)
	}

	pub async fn list_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
		Ok(self.event_log.list_events(filter).await?)
	}

	pub async fn ingest_flows(&self, records: Vec<FlowRecord>) -> Result<usize> {
		Ok(self.flows.append(records).await?)
	}

	pub async fn query_flows(&self, query: &FlowQuery) -> Result<Vec<FlowRecord>> {
		Ok(self.flows.query(query).await?)
	}

	/// A scheduler with every background job registered. Jobs stop when
	/// the core shuts down.
	pub fn scheduler(&self) -> JobScheduler {
		let jobs_config = &self.config.jobs;
		let every = Duration::from_secs;
		let mut scheduler = JobScheduler::with_shutdown(Arc::clone(&self.job_repository), self.shutdown.child_token());

		scheduler.register_periodic(
			Arc::new(jobs::JitExpiryJob::new(Arc::clone(&self.jit))),
			every(jobs_config.jit_expiry_interval_secs),
		);
		scheduler.register_periodic(
			Arc::new(jobs::FlowCleanupJob::new(Arc::clone(&self.flows), jobs_config.flow_retention_days)),
			every(jobs_config.flow_cleanup_interval_secs),
		);
		scheduler.register_periodic(
			Arc::new(jobs::MetricsRollupJob::new(Arc::clone(&self.store))),
			every(jobs_config.metrics_rollup_interval_secs),
		);
		if self.license.is_configured() {
			scheduler.register_periodic(
				Arc::new(jobs::LicenseRefreshJob::new(Arc::clone(&self.license))),
				every(jobs_config.license_refresh_interval_secs),
			);
		}
		scheduler.register_periodic(
			Arc::new(jobs::EventRetentionJob::new(
				self.event_log.clone(),
				self.config.audit.retention_days,
			)),
			every(jobs_config.event_retention_interval_secs),
		);
		scheduler.register_periodic(
			Arc::new(jobs::PublishReconcileJob::pending(Arc::clone(&self.fanout))),
			every(jobs_config.publish_reconcile_interval_secs),
		);
		scheduler.register_startup(Arc::new(jobs::PublishReconcileJob::full(Arc::clone(&self.fanout))));
		scheduler.register_periodic(
			Arc::new(jobs::StatusSweepJob::new(Arc::clone(&self.fanout), self.checkin_threshold())),
			every(jobs_config.status_sweep_interval_secs),
		);
		scheduler.register_periodic(
			Arc::new(jobs::PostureCheckJob::new(Arc::clone(&self.store))),
			every(jobs_config.posture_check_interval_secs),
		);
		scheduler.register_periodic(
			Arc::new(jobs::JobHistoryCleanupJob::new(
				Arc::clone(&self.job_repository),
				jobs_config.history_retention_days,
			)),
			every(24 * 60 * 60),
		);
		scheduler
	}

	/// Cancel outstanding work, then drain the publish and event queues.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.shutdown.cancel();
		self.publisher.shutdown().await;
		self.events.shutdown().await;
		info!(dropped_events = self.events.dropped(), "core shut down");
	}
}
