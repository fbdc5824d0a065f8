// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use netweave_common_core::Event;
use netweave_server_config::{AuditConfig, QueueOverflowPolicy};
use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{AuditError, AuditResult};
use crate::sink::EventSink;

/// Bounded producer/consumer queue for events.
///
/// A single consumer drains the queue and hands each event to every sink
/// in order, so sinks observe events in the order they were queued.
pub struct EventService {
	tx: mpsc::Sender<Event>,
	overflow_policy: QueueOverflowPolicy,
	dropped: Arc<AtomicU64>,
	shutdown: CancellationToken,
	worker: Mutex<Option<JoinHandle<u64>>>,
}

impl EventService {
	pub fn new(
		queue_capacity: usize,
		overflow_policy: QueueOverflowPolicy,
		sinks: Vec<Arc<dyn EventSink>>,
	) -> Self {
		let (tx, rx) = mpsc::channel(queue_capacity.max(1));
		let shutdown = CancellationToken::new();

		let worker = tokio::spawn(Self::background_task(rx, sinks, shutdown.clone()));

		Self {
			tx,
			overflow_policy,
			dropped: Arc::new(AtomicU64::new(0)),
			shutdown,
			worker: Mutex::new(Some(worker)),
		}
	}

	pub fn from_config(config: &AuditConfig, sinks: Vec<Arc<dyn EventSink>>) -> Self {
		Self::new(config.queue_capacity, config.overflow_policy, sinks)
	}

	async fn background_task(
		mut rx: mpsc::Receiver<Event>,
		sinks: Vec<Arc<dyn EventSink>>,
		shutdown: CancellationToken,
	) -> u64 {
		let mut delivered = 0u64;
		loop {
			tokio::select! {
				biased;
				maybe = rx.recv() => match maybe {
					Some(event) => {
						Self::deliver(&sinks, event).await;
						delivered += 1;
					}
					None => break,
				},
				_ = shutdown.cancelled() => {
					rx.close();
					while let Some(event) = rx.recv().await {
						Self::deliver(&sinks, event).await;
						delivered += 1;
					}
					break;
				}
			}
		}
		debug!(delivered, "event bus consumer stopped");
		delivered
	}

	async fn deliver(sinks: &[Arc<dyn EventSink>], event: Event) {
		let event = Arc::new(event);
		for sink in sinks {
			if let Err(e) = sink.publish(Arc::clone(&event)).await {
				warn!(sink = sink.name(), event_id = %event.id, error = %e, "event sink publish failed");
			}
		}
	}

	/// Queue an event without waiting.
	///
	/// Returns `true` if the event was queued, `false` if it was dropped.
	/// Under `Block` a full queue hands the send to a task so the caller is
	/// never suspended; use [`EventService::emit`] from async code to keep
	/// ordering under backpressure.
	#[instrument(skip(self, event), fields(action = %event.action, subject = %event.subject.kind))]
	pub fn log(&self, event: Event) -> bool {
		match self.tx.try_send(event) {
			Ok(()) => true,
			Err(mpsc::error::TrySendError::Full(event)) => match self.overflow_policy {
				QueueOverflowPolicy::Block => {
					let tx = self.tx.clone();
					tokio::spawn(async move {
						let _ = tx.send(event).await;
					});
					true
				}
				QueueOverflowPolicy::DropNewest => {
					self.dropped.fetch_add(1, Ordering::Relaxed);
					false
				}
			},
			Err(mpsc::error::TrySendError::Closed(_)) => false,
		}
	}

	/// Queue an event, waiting for room under `Block`.
	pub async fn emit(&self, event: Event) -> bool {
		match self.overflow_policy {
			QueueOverflowPolicy::Block => self.tx.send(event).await.is_ok(),
			QueueOverflowPolicy::DropNewest => self.log(event),
		}
	}

	pub async fn log_blocking(&self, event: Event) -> AuditResult<()> {
		self.tx.send(event).await.map_err(|_| AuditError::Shutdown)
	}

	pub fn dropped(&self) -> u64 {
		self.dropped.load(Ordering::Relaxed)
	}

	/// Stop accepting events, drain what is queued, and wait for the consumer.
	pub async fn shutdown(&self) {
		self.shutdown.cancel();
		let handle = self.worker.lock().await.take();
		if let Some(handle) = handle {
			match handle.await {
				Ok(delivered) => info!(delivered, dropped = self.dropped(), "event bus drained"),
				Err(e) => warn!(error = %e, "event bus consumer panicked"),
			}
		}
	}
}
