// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub(crate) struct Cached<V> {
	pub value: V,
	pub version: i64,
}

/// One entity kind's memoized rows, keyed by the entity's store key.
#[derive(Debug)]
pub(crate) struct Cache<V> {
	rows: RwLock<BTreeMap<String, Cached<V>>>,
}

impl<V> Default for Cache<V> {
	fn default() -> Self {
		Self {
			rows: RwLock::new(BTreeMap::new()),
		}
	}
}

impl<V: Clone> Cache<V> {
	pub async fn get(&self, key: &str) -> Option<Cached<V>> {
		self.rows.read().await.get(key).cloned()
	}

	pub async fn insert(&self, key: String, value: V, version: i64) {
		self.rows.write().await.insert(key, Cached { value, version });
	}

	pub async fn invalidate(&self, key: &str) -> Option<V> {
		self.rows.write().await.remove(key).map(|c| c.value)
	}

	pub async fn values(&self) -> Vec<V> {
		self.rows.read().await.values().map(|c| c.value.clone()).collect()
	}

	pub async fn filter(&self, mut keep: impl FnMut(&V) -> bool) -> Vec<V> {
		self.rows
			.read()
			.await
			.values()
			.filter(|c| keep(&c.value))
			.map(|c| c.value.clone())
			.collect()
	}

	pub async fn replace_all(&self, rows: BTreeMap<String, Cached<V>>) {
		*self.rows.write().await = rows;
	}

	pub async fn len(&self) -> usize {
		self.rows.read().await.len()
	}
}
