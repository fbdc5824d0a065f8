// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Suppression of repeated identical payloads.
//!
//! Each recipient gets a small LRU of `topic -> hash of the last payload`.
//! Only the most recent hash per topic counts, so a message equal to an
//! older one but different from the latest is still sent.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lru::LruCache;
use sha2::{Digest, Sha256};

use crate::topic::{Recipient, Topic};

pub type PayloadHash = [u8; 32];

pub fn payload_hash(payload: &[u8]) -> PayloadHash {
	Sha256::digest(payload).into()
}

pub struct DedupCache {
	capacity: NonZeroUsize,
	recipients: HashMap<Recipient, LruCache<Topic, PayloadHash>>,
}

impl DedupCache {
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity: NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
			recipients: HashMap::new(),
		}
	}

	/// Record `hash` as the latest for `topic`. Returns `false` when it
	/// equals what was last recorded, meaning the publish can be skipped.
	pub fn admit(&mut self, topic: &Topic, hash: PayloadHash) -> bool {
		let capacity = self.capacity;
		let lru = self
			.recipients
			.entry(topic.recipient())
			.or_insert_with(|| LruCache::new(capacity));
		if lru.get(topic) == Some(&hash) {
			return false;
		}
		lru.put(topic.clone(), hash);
		true
	}

	/// Drop the record for `topic` if it still holds `hash`, so the same
	/// payload is retried after a failed delivery.
	pub fn forget(&mut self, topic: &Topic, hash: &PayloadHash) {
		if let Some(lru) = self.recipients.get_mut(&topic.recipient()) {
			if lru.peek(topic) == Some(hash) {
				lru.pop(topic);
			}
		}
	}

	/// Drop everything remembered for a deleted node or host.
	pub fn forget_recipient(&mut self, recipient: &Recipient) {
		self.recipients.remove(recipient);
	}

	pub fn len(&self) -> usize {
		self.recipients.len()
	}

	pub fn is_empty(&self) -> bool {
		self.recipients.is_empty()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use netweave_common_core::{HostId, NetworkId, NodeId};

	#[test]
	fn repeats_are_suppressed_until_content_changes() {
		let topic = Topic::Host(HostId::new());
		let mut cache = DedupCache::new(4);
		let a = payload_hash(b"a");
		let b = payload_hash(b"b");

		assert!(cache.admit(&topic, a));
		assert!(!cache.admit(&topic, a));
		assert!(cache.admit(&topic, b));
		// back to an older state still goes out
		assert!(cache.admit(&topic, a));
	}

	#[test]
	fn topics_of_one_node_are_tracked_separately() {
		let node = NodeId::new();
		let net = NetworkId::from("n1");
		let update = Topic::NodeUpdate {
			network: net.clone(),
			node,
		};
		let peers = Topic::Peers { network: net, node };
		let mut cache = DedupCache::new(4);
		let h = payload_hash(b"same");
		assert!(cache.admit(&update, h));
		assert!(cache.admit(&peers, h));
		assert!(!cache.admit(&peers, h));
		assert_eq!(cache.len(), 1);

		cache.forget_recipient(&Recipient::Node(node));
		assert!(cache.is_empty());
		assert!(cache.admit(&peers, h));
	}

	#[test]
	fn forget_only_clears_matching_hash() {
		let topic = Topic::Signal(HostId::new());
		let mut cache = DedupCache::new(4);
		let a = payload_hash(b"a");
		let b = payload_hash(b"b");
		cache.admit(&topic, a);
		cache.admit(&topic, b);
		cache.forget(&topic, &a);
		assert!(!cache.admit(&topic, b));
		cache.forget(&topic, &b);
		assert!(cache.admit(&topic, b));
	}

	#[test]
	fn zero_capacity_still_works() {
		let topic = Topic::Host(HostId::new());
		let mut cache = DedupCache::new(0);
		assert!(cache.admit(&topic, payload_hash(b"x")));
		assert!(!cache.admit(&topic, payload_hash(b"x")));
	}
}
