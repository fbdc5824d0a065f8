// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Table-namespaced key/value persistence.
//!
//! Values are opaque JSON text to the store. Every row carries a version
//! that increments on each write so callers can detect a concurrent writer
//! with [`KvStore::compare_and_swap`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
	Nodes,
	Hosts,
	Networks,
	ExtClients,
	Acls,
	Tags,
	Egresses,
	UserGroups,
	UserRoles,
	Users,
	JitRequests,
	JitGrants,
	PostureChecks,
	Metrics,
	Events,
	ServerConf,
	Cache,
}

impl Table {
	pub const ALL: [Table; 17] = [
		Table::Nodes,
		Table::Hosts,
		Table::Networks,
		Table::ExtClients,
		Table::Acls,
		Table::Tags,
		Table::Egresses,
		Table::UserGroups,
		Table::UserRoles,
		Table::Users,
		Table::JitRequests,
		Table::JitGrants,
		Table::PostureChecks,
		Table::Metrics,
		Table::Events,
		Table::ServerConf,
		Table::Cache,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			Table::Nodes => "nodes",
			Table::Hosts => "hosts",
			Table::Networks => "networks",
			Table::ExtClients => "extclients",
			Table::Acls => "acls",
			Table::Tags => "tags",
			Table::Egresses => "egresses",
			Table::UserGroups => "usergroups",
			Table::UserRoles => "userroles",
			Table::Users => "users",
			Table::JitRequests => "jit_requests",
			Table::JitGrants => "jit_grants",
			Table::PostureChecks => "posture_checks",
			Table::Metrics => "metrics",
			Table::Events => "events",
			Table::ServerConf => "servercfg",
			Table::Cache => "cache",
		}
	}
}

impl fmt::Display for Table {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned {
	pub value: String,
	pub version: i64,
}

#[async_trait]
pub trait KvStore: Send + Sync {
	async fn get(&self, table: Table, key: &str) -> Result<Option<Versioned>>;

	/// Insert-or-replace; returns the new version.
	async fn put(&self, table: Table, key: &str, value: &str) -> Result<i64>;

	/// Insert only; `DbError::AlreadyExists` if the key is present.
	async fn insert(&self, table: Table, key: &str, value: &str) -> Result<i64>;

	/// Replace only if the stored version still equals `expected`.
	///
	/// `DbError::Conflict` when another writer got there first,
	/// `DbError::NotFound` when the row is gone.
	async fn compare_and_swap(&self, table: Table, key: &str, expected: i64, value: &str) -> Result<i64>;

	/// Returns whether a row was removed.
	async fn delete(&self, table: Table, key: &str) -> Result<bool>;

	/// All `(key, value)` pairs of a table, ordered by key.
	async fn list(&self, table: Table) -> Result<Vec<(String, String)>>;

	/// Like [`KvStore::list`] but with each row's version.
	async fn list_versioned(&self, table: Table) -> Result<Vec<(String, Versioned)>>;
}
