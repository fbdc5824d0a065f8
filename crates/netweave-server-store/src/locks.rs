// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-entity mutexes.
//!
//! Multi-entity critical sections take their locks in ascending key order,
//! which rules out lock-order inversions between two writers.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub struct EntityLocks {
	table: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Held locks; released on drop.
#[derive(Debug)]
pub struct LockSet {
	keys: Vec<String>,
	_guards: Vec<OwnedMutexGuard<()>>,
}

impl LockSet {
	pub fn keys(&self) -> &[String] {
		&self.keys
	}

	pub fn holds(&self, key: &str) -> bool {
		self.keys.binary_search_by(|k| k.as_str().cmp(key)).is_ok()
	}
}

impl EntityLocks {
	pub fn new() -> Self {
		Self::default()
	}

	async fn handle(&self, key: &str) -> Arc<Mutex<()>> {
		let mut table = self.table.lock().await;
		Arc::clone(table.entry(key.to_string()).or_default())
	}

	pub async fn lock(&self, key: impl Into<String>) -> LockSet {
		self.lock_all([key.into()]).await
	}

	pub async fn lock_all<I, S>(&self, keys: I) -> LockSet
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let ordered: BTreeSet<String> = keys.into_iter().map(Into::into).collect();
		let mut guards = Vec::with_capacity(ordered.len());
		for key in &ordered {
			guards.push(self.handle(key).await.lock_owned().await);
		}
		LockSet {
			keys: ordered.into_iter().collect(),
			_guards: guards,
		}
	}

	/// Drop table entries nobody holds or waits on.
	pub async fn prune(&self) -> usize {
		let mut table = self.table.lock().await;
		let before = table.len();
		table.retain(|_, m| Arc::strong_count(m) > 1);
		before - table.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	#[tokio::test]
	async fn keys_are_sorted_and_deduplicated() {
		let locks = EntityLocks::new();
		let set = locks.lock_all(["b", "a", "b"]).await;
		assert_eq!(set.keys(), &["a".to_string(), "b".to_string()]);
		assert!(set.holds("a"));
		assert!(!set.holds("c"));
	}

	#[tokio::test]
	async fn opposite_orders_do_not_deadlock() {
		let locks = Arc::new(EntityLocks::new());
		let mut tasks = Vec::new();
		for i in 0..50 {
			let locks = Arc::clone(&locks);
			tasks.push(tokio::spawn(async move {
				let keys = if i % 2 == 0 { ["x", "y"] } else { ["y", "x"] };
				let _held = locks.lock_all(keys).await;
				tokio::task::yield_now().await;
			}));
		}
		let all = async {
			for t in tasks {
				t.await.unwrap();
			}
		};
		tokio::time::timeout(Duration::from_secs(5), all).await.unwrap();
	}

	#[tokio::test]
	async fn second_locker_waits_for_release() {
		let locks = Arc::new(EntityLocks::new());
		let held = locks.lock("n1").await;

		let other = Arc::clone(&locks);
		let waiter = tokio::spawn(async move {
			let _g = other.lock("n1").await;
		});
		tokio::time::sleep(Duration::from_millis(20)).await;
		assert!(!waiter.is_finished());

		drop(held);
		tokio::time::timeout(Duration::from_secs(1), waiter)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(locks.prune().await, 1);
	}
}
