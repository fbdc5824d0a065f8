// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use sqlx::SqlitePool;

use crate::error::{DbError, Result};
use crate::kv::{KvStore, Table, Versioned};

/// [`KvStore`] over a single `kv` table keyed by `(tbl, key)`.
#[derive(Clone)]
pub struct SqliteKvStore {
	pool: SqlitePool,
}

impl SqliteKvStore {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}
}

fn now() -> String {
	Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl KvStore for SqliteKvStore {
	#[tracing::instrument(skip(self), fields(table = %table))]
	async fn get(&self, table: Table, key: &str) -> Result<Option<Versioned>> {
		let row = sqlx::query_as::<_, (String, i64)>(
			"SELECT value, version FROM kv WHERE tbl = ? AND key = ?",
		)
		.bind(table.as_str())
		.bind(key)
		.fetch_optional(&self.pool)
		.await?;

		Ok(row.map(|(value, version)| Versioned { value, version }))
	}

	#[tracing::instrument(skip(self, value), fields(table = %table))]
	async fn put(&self, table: Table, key: &str, value: &str) -> Result<i64> {
		let version = sqlx::query_scalar::<_, i64>(
			r#"
			INSERT INTO kv (tbl, key, value, version, updated_at)
			VALUES (?, ?, ?, 1, ?)
			ON CONFLICT(tbl, key) DO UPDATE SET
				value = excluded.value,
				version = kv.version + 1,
				updated_at = excluded.updated_at
			RETURNING version
			"#,
		)
		.bind(table.as_str())
		.bind(key)
		.bind(value)
		.bind(now())
		.fetch_one(&self.pool)
		.await?;

		Ok(version)
	}

	#[tracing::instrument(skip(self, value), fields(table = %table))]
	async fn insert(&self, table: Table, key: &str, value: &str) -> Result<i64> {
		let result = sqlx::query(
			r#"
			INSERT INTO kv (tbl, key, value, version, updated_at)
			VALUES (?, ?, ?, 1, ?)
			ON CONFLICT(tbl, key) DO NOTHING
			"#,
		)
		.bind(table.as_str())
		.bind(key)
		.bind(value)
		.bind(now())
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 0 {
			return Err(DbError::AlreadyExists(format!("{table}/{key}")));
		}
		Ok(1)
	}

	#[tracing::instrument(skip(self, value), fields(table = %table, expected))]
	async fn compare_and_swap(&self, table: Table, key: &str, expected: i64, value: &str) -> Result<i64> {
		let result = sqlx::query(
			r#"
			UPDATE kv SET value = ?, version = version + 1, updated_at = ?
			WHERE tbl = ? AND key = ? AND version = ?
			"#,
		)
		.bind(value)
		.bind(now())
		.bind(table.as_str())
		.bind(key)
		.bind(expected)
		.execute(&self.pool)
		.await?;

		if result.rows_affected() == 1 {
			return Ok(expected + 1);
		}

		match self.get(table, key).await? {
			Some(current) => Err(DbError::Conflict(format!(
				"{table}/{key}: expected version {expected}, found {}",
				current.version
			))),
			None => Err(DbError::NotFound(format!("{table}/{key}"))),
		}
	}

	#[tracing::instrument(skip(self), fields(table = %table))]
	async fn delete(&self, table: Table, key: &str) -> Result<bool> {
		let result = sqlx::query("DELETE FROM kv WHERE tbl = ? AND key = ?")
			.bind(table.as_str())
			.bind(key)
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected() > 0)
	}

	#[tracing::instrument(skip(self), fields(table = %table))]
	async fn list(&self, table: Table) -> Result<Vec<(String, String)>> {
		let rows = sqlx::query_as::<_, (String, String)>(
			"SELECT key, value FROM kv WHERE tbl = ? ORDER BY key",
		)
		.bind(table.as_str())
		.fetch_all(&self.pool)
		.await?;

		Ok(rows)
	}

	#[tracing::instrument(skip(self), fields(table = %table))]
	async fn list_versioned(&self, table: Table) -> Result<Vec<(String, Versioned)>> {
		let rows = sqlx::query_as::<_, (String, String, i64)>(
			"SELECT key, value, version FROM kv WHERE tbl = ? ORDER BY key",
		)
		.bind(table.as_str())
		.fetch_all(&self.pool)
		.await?;

		Ok(rows
			.into_iter()
			.map(|(key, value, version)| (key, Versioned { value, version }))
			.collect())
	}
}
