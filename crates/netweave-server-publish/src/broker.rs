// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::trace;

use crate::error::BrokerError;
use crate::topic::Topic;

/// Transport that carries sealed payloads to host agents.
#[async_trait]
pub trait Broker: Send + Sync {
	fn name(&self) -> &str;

	async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<(), BrokerError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
	pub topic: Topic,
	pub payload: Vec<u8>,
}

/// Used when no broker host is configured: payloads are counted and
/// dropped, nothing is retained.
#[derive(Debug, Default)]
pub struct DiscardBroker {
	discarded: AtomicU64,
}

impl DiscardBroker {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn discarded(&self) -> u64 {
		self.discarded.load(Ordering::Relaxed)
	}
}

#[async_trait]
impl Broker for DiscardBroker {
	fn name(&self) -> &str {
		"discard"
	}

	async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<(), BrokerError> {
		self.discarded.fetch_add(1, Ordering::Relaxed);
		trace!(topic = %topic, bytes = payload.len(), "no broker configured, payload dropped");
		Ok(())
	}
}

/// Records every delivery in process for inspection. Test transport:
/// nothing drains the log except [`MemoryBroker::take`].
#[derive(Default)]
pub struct MemoryBroker {
	delivered: Mutex<Vec<Delivered>>,
	fail_next: AtomicU32,
}

impl MemoryBroker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make the next `n` publishes fail with `BrokerError::Unavailable`.
	pub fn fail_next(&self, n: u32) {
		self.fail_next.store(n, Ordering::SeqCst);
	}

	pub fn delivered(&self) -> Vec<Delivered> {
		self.delivered
			.lock()
			.map(|d| d.clone())
			.unwrap_or_default()
	}

	pub fn delivered_to(&self, topic: &Topic) -> Vec<Vec<u8>> {
		self.delivered()
			.into_iter()
			.filter(|d| &d.topic == topic)
			.map(|d| d.payload)
			.collect()
	}

	pub fn take(&self) -> Vec<Delivered> {
		self.delivered
			.lock()
			.map(|mut d| std::mem::take(&mut *d))
			.unwrap_or_default()
	}
}

#[async_trait]
impl Broker for MemoryBroker {
	fn name(&self) -> &str {
		"memory"
	}

	async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<(), BrokerError> {
		let hit = self
			.fail_next
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if hit {
			return Err(BrokerError::Unavailable("injected failure".to_string()));
		}
		let mut delivered = self
			.delivered
			.lock()
			.map_err(|_| BrokerError::Rejected("delivery log poisoned".to_string()))?;
		delivered.push(Delivered {
			topic: topic.clone(),
			payload,
		});
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use netweave_common_core::HostId;

	#[tokio::test]
	async fn discard_broker_keeps_nothing() {
		let broker = DiscardBroker::new();
		for i in 0..1000u32 {
			broker
				.publish(&Topic::Host(HostId::new()), i.to_be_bytes().repeat(64))
				.await
				.unwrap();
		}
		assert_eq!(broker.discarded(), 1000);
	}

	#[tokio::test]
	async fn memory_broker_fails_on_request() {
		let broker = MemoryBroker::new();
		let topic = Topic::Host(HostId::new());
		broker.fail_next(1);
		assert!(broker.publish(&topic, b"a".to_vec()).await.is_err());
		broker.publish(&topic, b"b".to_vec()).await.unwrap();
		assert_eq!(broker.delivered_to(&topic), vec![b"b".to_vec()]);
		assert_eq!(broker.take().len(), 1);
		assert!(broker.delivered().is_empty());
	}
}
