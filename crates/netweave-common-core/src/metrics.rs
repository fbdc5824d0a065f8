// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::{NetworkId, NodeId};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PeerMetric {
	#[serde(default)]
	pub node_name: String,
	pub connected: bool,
	#[serde(default)]
	pub latency_ms: i64,
	#[serde(default)]
	pub total_sent: u64,
	#[serde(default)]
	pub total_received: u64,
	/// Minutes observed up during the sampling window.
	#[serde(default)]
	pub uptime: i64,
	/// Minutes in the sampling window.
	#[serde(default)]
	pub total_time: i64,
	#[serde(default)]
	pub percent_up: f64,
	#[serde(default)]
	pub actual_uptime_secs: i64,
}

/// Per-node connectivity sample keyed by peer id (node id or ext-client id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
	pub node_id: NodeId,
	pub network: NetworkId,
	#[serde(default)]
	pub connectivity: BTreeMap<String, PeerMetric>,
	pub updated_at: DateTime<Utc>,
}

impl Metrics {
	pub fn new(node_id: NodeId, network: NetworkId) -> Self {
		Self {
			node_id,
			network,
			connectivity: BTreeMap::new(),
			updated_at: Utc::now(),
		}
	}

	pub fn peer(&self, peer_id: &str) -> Option<&PeerMetric> {
		self.connectivity.get(peer_id)
	}
}
