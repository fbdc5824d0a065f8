// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-node metric records.
//!
//! A new sample replaces the previous one wholesale, which is what ages out
//! connectivity entries for peers the node no longer reports.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use netweave_common_core::{Metrics, NodeId};
use netweave_server_db::{CallPolicy, DbError, KvStore, Table};
use tracing::{debug, instrument};

use crate::error::{AuditError, AuditResult};

#[derive(Clone)]
pub struct MetricsRepo {
	kv: Arc<dyn KvStore>,
	policy: CallPolicy,
}

impl MetricsRepo {
	pub fn new(kv: Arc<dyn KvStore>, policy: CallPolicy) -> Self {
		Self { kv, policy }
	}

	#[instrument(skip(self, metrics), fields(node_id = %metrics.node_id, peers = metrics.connectivity.len()))]
	pub async fn update_metrics(&self, mut metrics: Metrics) -> AuditResult<()> {
		metrics.updated_at = Utc::now();
		let key = metrics.node_id.to_string();
		let value = serde_json::to_string(&metrics).map_err(DbError::from)?;
		self.policy
			.with_retry(|| self.kv.put(Table::Metrics, &key, &value))
			.await?;
		Ok(())
	}

	pub async fn metrics(&self, node_id: &NodeId) -> AuditResult<Option<Metrics>> {
		let key = node_id.to_string();
		let row = self.policy.with_retry(|| self.kv.get(Table::Metrics, &key)).await?;
		match row {
			Some(v) => Ok(Some(
				serde_json::from_str(&v.value).map_err(DbError::from)?,
			)),
			None => Ok(None),
		}
	}

	pub async fn list(&self) -> AuditResult<Vec<Metrics>> {
		let rows = self.policy.with_retry(|| self.kv.list(Table::Metrics)).await?;
		rows.into_iter()
			.map(|(_, v)| {
				serde_json::from_str(&v).map_err(|e| AuditError::from(DbError::from(e)))
			})
			.collect()
	}

	pub async fn delete(&self, node_id: &NodeId) -> AuditResult<bool> {
		let key = node_id.to_string();
		Ok(self.policy.with_retry(|| self.kv.delete(Table::Metrics, &key)).await?)
	}

	/// Drop records of nodes that no longer exist and peer entries for peers
	/// that no longer exist. `live` holds node ids and ext-client ids.
	#[instrument(skip(self, live), fields(live = live.len()))]
	pub async fn rollup(&self, live: &BTreeSet<String>) -> AuditResult<RollupStats> {
		let mut stats = RollupStats::default();
		for mut record in self.list().await? {
			if !live.contains(&record.node_id.to_string()) {
				self.delete(&record.node_id).await?;
				stats.records_removed += 1;
				continue;
			}
			let before = record.connectivity.len();
			record.connectivity.retain(|peer, _| live.contains(peer));
			let pruned = before - record.connectivity.len();
			if pruned > 0 {
				stats.peers_pruned += pruned;
				let key = record.node_id.to_string();
				let value = serde_json::to_string(&record).map_err(DbError::from)?;
				self.policy
					.with_retry(|| self.kv.put(Table::Metrics, &key, &value))
					.await?;
			}
		}
		debug!(?stats, "metrics rollup complete");
		Ok(stats)
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollupStats {
	pub records_removed: usize,
	pub peers_pruned: usize,
}
