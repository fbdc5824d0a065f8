// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flow-log sink with daily partitions keyed by ingestion time.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use netweave_common_core::{NetworkId, NodeId, Protocol};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use tokio::sync::RwLock;

use crate::error::{DbError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
	pub network: NetworkId,
	pub node_id: NodeId,
	pub src_ip: IpAddr,
	pub dst_ip: IpAddr,
	pub proto: Protocol,
	pub src_port: Option<u16>,
	pub dst_port: Option<u16>,
	pub bytes_sent: u64,
	pub bytes_received: u64,
	pub started_at: DateTime<Utc>,
	pub ended_at: DateTime<Utc>,
}

/// Time range is inclusive of `from` and exclusive of `to`, applied to
/// `started_at`.
#[derive(Debug, Clone, Default)]
pub struct FlowQuery {
	pub from: Option<DateTime<Utc>>,
	pub to: Option<DateTime<Utc>>,
	pub network: Option<NetworkId>,
	pub node_id: Option<NodeId>,
	pub src_ip: Option<IpAddr>,
	pub dst_ip: Option<IpAddr>,
	pub limit: Option<usize>,
}

impl FlowQuery {
	fn matches(&self, r: &FlowRecord) -> bool {
		self.from.map_or(true, |from| r.started_at >= from)
			&& self.to.map_or(true, |to| r.started_at < to)
			&& self.network.as_ref().map_or(true, |n| *n == r.network)
			&& self.node_id.map_or(true, |id| id == r.node_id)
			&& self.src_ip.map_or(true, |ip| ip == r.src_ip)
			&& self.dst_ip.map_or(true, |ip| ip == r.dst_ip)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowPartition {
	pub id: String,
	pub day: NaiveDate,
	pub rows: usize,
}

pub fn partition_id(day: NaiveDate) -> String {
	format!("flows_{}", day.format("%Y%m%d"))
}

fn parse_partition_id(id: &str) -> Result<NaiveDate> {
	id.strip_prefix("flows_")
		.and_then(|d| NaiveDate::parse_from_str(d, "%Y%m%d").ok())
		.ok_or_else(|| DbError::NotFound(format!("flow partition {id}")))
}

#[async_trait]
pub trait FlowSink: Send + Sync {
	async fn append(&self, records: Vec<FlowRecord>) -> Result<usize>;

	/// Rows ordered by `started_at`.
	async fn query(&self, query: &FlowQuery) -> Result<Vec<FlowRecord>>;

	async fn list_partitions(&self) -> Result<Vec<FlowPartition>>;

	async fn drop_partition(&self, id: &str) -> Result<bool>;
}

/// Drop every partition whose day is strictly before `today - retention_days`.
pub async fn drop_partitions_older_than(
	sink: &dyn FlowSink,
	today: NaiveDate,
	retention_days: u32,
) -> Result<Vec<String>> {
	let horizon = today - chrono::Duration::days(retention_days as i64);
	let mut dropped = Vec::new();
	for partition in sink.list_partitions().await? {
		if partition.day < horizon && sink.drop_partition(&partition.id).await? {
			dropped.push(partition.id);
		}
	}
	Ok(dropped)
}

#[derive(Default)]
pub struct MemoryFlowSink {
	partitions: RwLock<BTreeMap<NaiveDate, Vec<FlowRecord>>>,
}

impl MemoryFlowSink {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append with an explicit ingestion time.
	pub async fn append_at(&self, ingested_at: DateTime<Utc>, records: Vec<FlowRecord>) -> usize {
		let n = records.len();
		let mut partitions = self.partitions.write().await;
		partitions
			.entry(ingested_at.date_naive())
			.or_default()
			.extend(records);
		n
	}
}

#[async_trait]
impl FlowSink for MemoryFlowSink {
	async fn append(&self, records: Vec<FlowRecord>) -> Result<usize> {
		Ok(self.append_at(Utc::now(), records).await)
	}

	async fn query(&self, query: &FlowQuery) -> Result<Vec<FlowRecord>> {
		let partitions = self.partitions.read().await;
		let mut rows: Vec<FlowRecord> = partitions
			.values()
			.flatten()
			.filter(|r| query.matches(r))
			.cloned()
			.collect();
		rows.sort_by_key(|r| r.started_at);
		if let Some(limit) = query.limit {
			rows.truncate(limit);
		}
		Ok(rows)
	}

	async fn list_partitions(&self) -> Result<Vec<FlowPartition>> {
		let partitions = self.partitions.read().await;
		Ok(partitions
			.iter()
			.map(|(day, rows)| FlowPartition {
				id: partition_id(*day),
				day: *day,
				rows: rows.len(),
			})
			.collect())
	}

	async fn drop_partition(&self, id: &str) -> Result<bool> {
		let day = parse_partition_id(id)?;
		let removed = self.partitions.write().await.remove(&day).is_some();
		if removed {
			tracing::debug!(partition = %id, "dropped flow partition");
		}
		Ok(removed)
	}
}
