// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use netweave_server_jobs::{Job, JobContext, JobError, JobOutput};
use netweave_server_store::EntityStore;
use tracing::instrument;

pub struct MetricsRollupJob {
	store: Arc<EntityStore>,
}

impl MetricsRollupJob {
	pub fn new(store: Arc<EntityStore>) -> Self {
		Self { store }
	}

	/// Ids a metrics record may legitimately mention: nodes and ext-clients.
	async fn live_ids(&self) -> BTreeSet<String> {
		let mut live: BTreeSet<String> = self.store.all_nodes().await.iter().map(|n| n.id.to_string()).collect();
		for network in self.store.list_networks().await {
			live.extend(
				self.store
					.list_ext_clients(&network.id)
					.await
					.into_iter()
					.map(|c| c.client_id),
			);
		}
		live
	}
}

#[async_trait]
impl Job for MetricsRollupJob {
	fn id(&self) -> &str {
		"metrics-rollup"
	}

	fn name(&self) -> &str {
		"Metrics Rollup"
	}

	fn description(&self) -> &str {
		"Prune metrics of deleted nodes and peers"
	}

	#[instrument(skip(self, ctx), fields(job_id = "metrics-rollup"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		ctx.check_cancelled()?;

		let live = self.live_ids().await;
		let stats = self
			.store
			.metrics_repo()
			.rollup(&live)
			.await
			.map_err(|e| JobError::Failed {
				message: e.to_string(),
				retryable: true,
			})?;

		tracing::info!(
			records_removed = stats.records_removed,
			peers_pruned = stats.peers_pruned,
			"Metrics rollup completed"
		);

		Ok(JobOutput {
			message: format!(
				"Removed {} metrics records and {} stale peer entries",
				stats.records_removed, stats.peers_pruned
			),
			metadata: Some(serde_json::json!({
				"records_removed": stats.records_removed,
				"peers_pruned": stats.peers_pruned,
			})),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::jobs::test_context;
	use netweave_common_core::{Metrics, PeerMetric};
	use netweave_server_store::testing::{node_in, seeded_store};
	use netweave_server_store::Ctx;

	#[tokio::test]
	async fn deleted_peers_are_pruned() {
		let (store, net) = seeded_store().await;
		let a = node_in(&store, &net, "a", "10.0.0.1").await;
		let b = node_in(&store, &net, "b", "10.0.0.2").await;
		let mut metrics = Metrics::new(a.id, net.clone());
		metrics.connectivity.insert(b.id.to_string(), PeerMetric::default());
		metrics.connectivity.insert("gone-client".to_string(), PeerMetric::default());
		store.update_metrics(metrics).await.unwrap();
		store.delete_node(&Ctx::api("admin"), &b.id).await.unwrap();
		// a sample from b that landed after the delete
		store
			.metrics_repo()
			.update_metrics(Metrics::new(b.id, net.clone()))
			.await
			.unwrap();
		assert!(store.metrics(&b.id).await.unwrap().is_some());

		let store = Arc::new(store);
		let output = MetricsRollupJob::new(store.clone()).run(&test_context()).await.unwrap();
		let meta = output.metadata.unwrap();
		assert_eq!(meta["peers_pruned"], 2);
		assert_eq!(meta["records_removed"], 1);

		let kept = store.metrics(&a.id).await.unwrap().unwrap();
		assert!(kept.connectivity.is_empty());
		assert!(store.metrics(&b.id).await.unwrap().is_none());
	}
}
