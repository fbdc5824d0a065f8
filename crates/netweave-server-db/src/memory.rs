// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process [`KvStore`] used by tests and by the server when no database
//! URL is configured.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

use crate::error::{DbError, Result};
use crate::kv::{KvStore, Table, Versioned};

#[derive(Default)]
pub struct MemoryKvStore {
	rows: Mutex<BTreeMap<(Table, String), Versioned>>,
	fail_next: AtomicU32,
}

impl MemoryKvStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make the next `n` calls fail with `DbError::Unavailable`.
	pub fn fail_next(&self, n: u32) {
		self.fail_next.store(n, Ordering::SeqCst);
	}

	fn injected_failure(&self) -> Result<()> {
		let hit = self
			.fail_next
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok();
		if hit {
			return Err(DbError::Unavailable("injected failure".to_string()));
		}
		Ok(())
	}
}

#[async_trait]
impl KvStore for MemoryKvStore {
	async fn get(&self, table: Table, key: &str) -> Result<Option<Versioned>> {
		self.injected_failure()?;
		let rows = self.rows.lock().await;
		Ok(rows.get(&(table, key.to_string())).cloned())
	}

	async fn put(&self, table: Table, key: &str, value: &str) -> Result<i64> {
		self.injected_failure()?;
		let mut rows = self.rows.lock().await;
		let entry = rows
			.entry((table, key.to_string()))
			.or_insert_with(|| Versioned {
				value: String::new(),
				version: 0,
			});
		entry.value = value.to_string();
		entry.version += 1;
		Ok(entry.version)
	}

	async fn insert(&self, table: Table, key: &str, value: &str) -> Result<i64> {
		self.injected_failure()?;
		let mut rows = self.rows.lock().await;
		let k = (table, key.to_string());
		if rows.contains_key(&k) {
			return Err(DbError::AlreadyExists(format!("{table}/{key}")));
		}
		rows.insert(
			k,
			Versioned {
				value: value.to_string(),
				version: 1,
			},
		);
		Ok(1)
	}

	async fn compare_and_swap(&self, table: Table, key: &str, expected: i64, value: &str) -> Result<i64> {
		self.injected_failure()?;
		let mut rows = self.rows.lock().await;
		match rows.get_mut(&(table, key.to_string())) {
			None => Err(DbError::NotFound(format!("{table}/{key}"))),
			Some(row) if row.version != expected => Err(DbError::Conflict(format!(
				"{table}/{key}: expected version {expected}, found {}",
				row.version
			))),
			Some(row) => {
				row.value = value.to_string();
				row.version += 1;
				Ok(row.version)
			}
		}
	}

	async fn delete(&self, table: Table, key: &str) -> Result<bool> {
		self.injected_failure()?;
		let mut rows = self.rows.lock().await;
		Ok(rows.remove(&(table, key.to_string())).is_some())
	}

	async fn list(&self, table: Table) -> Result<Vec<(String, String)>> {
		self.injected_failure()?;
		let rows = self.rows.lock().await;
		Ok(rows
			.iter()
			.filter(|((t, _), _)| *t == table)
			.map(|((_, k), v)| (k.clone(), v.value.clone()))
			.collect())
	}

	async fn list_versioned(&self, table: Table) -> Result<Vec<(String, Versioned)>> {
		self.injected_failure()?;
		let rows = self.rows.lock().await;
		Ok(rows
			.iter()
			.filter(|((t, _), _)| *t == table)
			.map(|((_, k), v)| (k.clone(), v.clone()))
			.collect())
	}
}
