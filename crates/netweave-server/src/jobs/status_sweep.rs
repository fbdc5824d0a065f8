// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use netweave_server_jobs::{Job, JobContext, JobError, JobOutput};
use netweave_server_peers::StatusEngine;
use netweave_server_publish::Fanout;
use tracing::{instrument, warn};

/// A node silent for this many check-in thresholds is marked disconnected
/// and drops out of its peers' lists. Between one threshold and this it is
/// only reported offline.
pub const DISCONNECT_AFTER_THRESHOLDS: i32 = 3;

pub struct StatusSweepJob {
	fanout: Arc<Fanout>,
	threshold: Duration,
}

impl StatusSweepJob {
	pub fn new(fanout: Arc<Fanout>, threshold: Duration) -> Self {
		Self { fanout, threshold }
	}
}

#[async_trait]
impl Job for StatusSweepJob {
	fn id(&self) -> &str {
		"status-sweep"
	}

	fn name(&self) -> &str {
		"Status Sweep"
	}

	fn description(&self) -> &str {
		"Summarize node status and disconnect long-silent nodes"
	}

	#[instrument(skip(self, ctx), fields(job_id = "status-sweep"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		let store = self.fanout.store();
		let now = Utc::now();
		let cutoff = now - self.threshold * DISCONNECT_AFTER_THRESHOLDS;
		let mut disconnected = 0usize;
		let mut counts: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();

		for network in store.list_networks().await {
			ctx.check_cancelled()?;
			let mut changed = false;
			for node in store.list_nodes(&network.id).await {
				if node.connected && node.last_check_in < cutoff {
					match store.mark_disconnected(&node.id).await {
						Ok(true) => {
							disconnected += 1;
							changed = true;
						}
						Ok(false) => {}
						Err(e) => warn!(node_id = %node.id, error = %e, "could not mark node disconnected"),
					}
				}
			}
			if changed {
				if let Err(e) = self.fanout.network(&network.id).await {
					warn!(network = %network.id, error = %e, "peer fan-out after disconnect failed");
				}
			}

			let snap = store
				.snapshot(&network.id)
				.await
				.map_err(|e| JobError::retryable(e.to_string()))?;
			let per_status = counts.entry(network.id.to_string()).or_default();
			for status in StatusEngine::new(&snap, self.threshold, now).network_status().values() {
				*per_status.entry(status.to_string()).or_default() += 1;
			}
		}

		tracing::info!(disconnected, networks = counts.len(), "Status sweep completed");

		Ok(JobOutput {
			message: format!("Marked {disconnected} nodes disconnected"),
			metadata: Some(serde_json::json!({
				"disconnected": disconnected,
				"networks": counts,
			})),
		})
	}
}
