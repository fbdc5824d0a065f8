// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use netweave_common_core::{Host, HostUpdate, NodeId, NodeUpdate, PeerUpdate, Signal};
use netweave_server_config::MqttConfig;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::broker::Broker;
use crate::dedup::{payload_hash, DedupCache, PayloadHash};
use crate::error::{BrokerError, PublishError, Result};
use crate::keys::{decode_public_key, ServerKeys};
use crate::seal::seal;
use crate::topic::{Recipient, Topic};

pub const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 50;
const MAX_BACKOFF_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct PublisherOptions {
	pub queue_capacity: usize,
	pub publish_timeout: Duration,
	pub dedup_capacity: usize,
	pub max_attempts: u32,
	pub base_backoff: Duration,
}

impl Default for PublisherOptions {
	fn default() -> Self {
		Self::from_config(&MqttConfig::default())
	}
}

impl PublisherOptions {
	pub fn from_config(config: &MqttConfig) -> Self {
		Self {
			queue_capacity: config.queue_capacity,
			publish_timeout: Duration::from_millis(config.publish_timeout_ms),
			dedup_capacity: config.dedup_capacity,
			max_attempts: MAX_ATTEMPTS,
			base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishStats {
	pub sent: u64,
	pub suppressed: u64,
	pub failed: u64,
}

#[derive(Default)]
struct Counters {
	sent: AtomicU64,
	suppressed: AtomicU64,
	failed: AtomicU64,
}

struct Outgoing {
	topic: Topic,
	sealed: Vec<u8>,
	hash: PayloadHash,
}

enum Command {
	Publish(Outgoing),
	/// Answered once every earlier command has been handled.
	Flush(oneshot::Sender<()>),
}

/// State shared between the enqueueing side and the worker.
struct Shared {
	dedup: Mutex<DedupCache>,
	reconcile: Mutex<BTreeSet<Recipient>>,
	counters: Counters,
}

/// Serializes, seals and hands messages to the broker.
///
/// Messages go through one bounded queue drained by a single worker, so
/// per-recipient order is the order of the publish calls. Each delivery is
/// bounded by the publish timeout and retried with backoff; a message that
/// still fails puts its recipient in the reconcile set instead of failing
/// the caller.
pub struct Publisher {
	tx: mpsc::Sender<Command>,
	keys: ServerKeys,
	broker_name: String,
	shared: Arc<Shared>,
	shutdown: CancellationToken,
	worker: Mutex<Option<JoinHandle<u64>>>,
}

impl Publisher {
	pub fn new(broker: Arc<dyn Broker>, keys: ServerKeys, options: PublisherOptions) -> Self {
		let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));
		let broker_name = broker.name().to_string();
		let shutdown = CancellationToken::new();
		let shared = Arc::new(Shared {
			dedup: Mutex::new(DedupCache::new(options.dedup_capacity)),
			reconcile: Mutex::new(BTreeSet::new()),
			counters: Counters::default(),
		});

		let worker = tokio::spawn(Self::background_task(
			rx,
			broker,
			options,
			Arc::clone(&shared),
			shutdown.clone(),
		));

		Self {
			tx,
			keys,
			broker_name,
			shared,
			shutdown,
			worker: Mutex::new(Some(worker)),
		}
	}

	pub fn server_keys(&self) -> &ServerKeys {
		&self.keys
	}

	/// Transport messages leave through.
	pub fn broker_name(&self) -> &str {
		&self.broker_name
	}

	async fn background_task(
		mut rx: mpsc::Receiver<Command>,
		broker: Arc<dyn Broker>,
		options: PublisherOptions,
		shared: Arc<Shared>,
		shutdown: CancellationToken,
	) -> u64 {
		let mut handled = 0u64;
		loop {
			tokio::select! {
				biased;
				maybe = rx.recv() => match maybe {
					Some(cmd) => handled += Self::handle(broker.as_ref(), &options, &shared, cmd).await,
					None => break,
				},
				_ = shutdown.cancelled() => {
					rx.close();
					while let Some(cmd) = rx.recv().await {
						handled += Self::handle(broker.as_ref(), &options, &shared, cmd).await;
					}
					break;
				}
			}
		}
		debug!(handled, broker = broker.name(), "publish worker stopped");
		handled
	}

	async fn handle(broker: &dyn Broker, options: &PublisherOptions, shared: &Shared, cmd: Command) -> u64 {
		match cmd {
			Command::Publish(msg) => {
				Self::deliver(broker, options, shared, msg).await;
				1
			}
			Command::Flush(done) => {
				let _ = done.send(());
				0
			}
		}
	}

	async fn deliver(broker: &dyn Broker, options: &PublisherOptions, shared: &Shared, msg: Outgoing) {
		let attempts = options.max_attempts.max(1);
		let mut last_error = None;
		for attempt in 1..=attempts {
			let outcome = tokio::time::timeout(
				options.publish_timeout,
				broker.publish(&msg.topic, msg.sealed.clone()),
			)
			.await
			.unwrap_or_else(|_| {
				Err(BrokerError::Timeout(options.publish_timeout.as_millis() as u64))
			});

			match outcome {
				Ok(()) => {
					shared.counters.sent.fetch_add(1, Ordering::Relaxed);
					debug!(topic = %msg.topic, attempt, "published");
					return;
				}
				Err(e) => {
					let transient = e.is_transient();
					warn!(topic = %msg.topic, attempt, error = %e, "publish attempt failed");
					last_error = Some(e);
					if !transient {
						break;
					}
					if attempt < attempts {
						tokio::time::sleep(backoff(options.base_backoff, attempt)).await;
					}
				}
			}
		}

		shared.counters.failed.fetch_add(1, Ordering::Relaxed);
		shared.dedup.lock().await.forget(&msg.topic, &msg.hash);
		let recipient = msg.topic.recipient();
		shared.reconcile.lock().await.insert(recipient);
		warn!(
			topic = %msg.topic,
			error = %last_error.map(|e| e.to_string()).unwrap_or_default(),
			"publish failed, scheduled for reconcile"
		);
	}

	/// Seal `payload` for `host` and queue it. Returns `false` when the
	/// payload equals the last one sent on that topic.
	async fn enqueue<T: Serialize>(&self, topic: Topic, host: &Host, payload: &T) -> Result<bool> {
		let plaintext = serde_json::to_vec(payload)?;
		let recipient_key = host
			.traffic_key_public
			.as_deref()
			.ok_or(PublishError::NoTrafficKey(host.id))?;
		let recipient_key = decode_public_key(recipient_key)?;

		let hash = payload_hash(&plaintext);
		if !self.shared.dedup.lock().await.admit(&topic, hash) {
			self.shared.counters.suppressed.fetch_add(1, Ordering::Relaxed);
			debug!(topic = %topic, "payload unchanged, not republished");
			return Ok(false);
		}

		let sealed = match seal(&plaintext, &recipient_key, self.keys.secret()) {
			Ok(sealed) => sealed,
			Err(e) => {
				self.shared.dedup.lock().await.forget(&topic, &hash);
				return Err(e);
			}
		};

		let msg = Outgoing {
			topic: topic.clone(),
			sealed,
			hash,
		};
		if self.tx.send(Command::Publish(msg)).await.is_err() {
			self.shared.dedup.lock().await.forget(&topic, &hash);
			return Err(PublishError::Shutdown);
		}
		Ok(true)
	}

	#[instrument(skip(self, host, update), fields(network = %update.node.network, node_id = %update.node.id))]
	pub async fn publish_node_update(&self, host: &Host, update: &NodeUpdate) -> Result<bool> {
		let topic = Topic::NodeUpdate {
			network: update.node.network.clone(),
			node: update.node.id,
		};
		self.enqueue(topic, host, update).await
	}

	#[instrument(skip(self, host, update), fields(network = %update.network, node_id = %node))]
	pub async fn publish_peer_update(&self, host: &Host, node: &NodeId, update: &PeerUpdate) -> Result<bool> {
		let topic = Topic::Peers {
			network: update.network.clone(),
			node: *node,
		};
		self.enqueue(topic, host, update).await
	}

	#[instrument(skip(self, update), fields(host_id = %update.host.id))]
	pub async fn publish_host_update(&self, update: &HostUpdate) -> Result<bool> {
		self.enqueue(Topic::Host(update.host.id), &update.host, update).await
	}

	#[instrument(skip(self, to, signal), fields(to_host = %to.id, action = ?signal.action))]
	pub async fn publish_signal(&self, to: &Host, signal: &Signal) -> Result<bool> {
		self.enqueue(Topic::Signal(to.id), to, signal).await
	}

	/// Forget dedup state and pending reconcile for a removed node or host.
	pub async fn forget(&self, recipient: Recipient) {
		self.shared.dedup.lock().await.forget_recipient(&recipient);
		self.shared.reconcile.lock().await.remove(&recipient);
	}

	/// Recipients whose last message never made it out, cleared on read.
	pub async fn take_reconcile(&self) -> BTreeSet<Recipient> {
		std::mem::take(&mut *self.shared.reconcile.lock().await)
	}

	pub fn stats(&self) -> PublishStats {
		let c = &self.shared.counters;
		PublishStats {
			sent: c.sent.load(Ordering::Relaxed),
			suppressed: c.suppressed.load(Ordering::Relaxed),
			failed: c.failed.load(Ordering::Relaxed),
		}
	}

	/// Wait until everything queued so far has been handled by the worker.
	pub async fn flush(&self) {
		let (done, wait) = oneshot::channel();
		if self.tx.send(Command::Flush(done)).await.is_ok() {
			let _ = wait.await;
		}
	}

	/// Stop accepting messages, drain the queue and wait for the worker.
	pub async fn shutdown(&self) {
		self.shutdown.cancel();
		let handle = self.worker.lock().await.take();
		if let Some(handle) = handle {
			match handle.await {
				Ok(handled) => info!(handled, stats = ?self.stats(), "publisher drained"),
				Err(e) => warn!(error = %e, "publish worker panicked"),
			}
		}
	}
}

fn backoff(base: Duration, attempt: u32) -> Duration {
	let base_ms = base.as_millis() as u64;
	let exp = base_ms.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(16));
	let capped = exp.min(MAX_BACKOFF_MS);
	let jitter = fastrand::u64(0..=capped / 2);
	Duration::from_millis(capped + jitter)
}
