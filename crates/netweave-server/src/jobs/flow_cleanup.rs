// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use netweave_server_db::{drop_partitions_older_than, FlowSink};
use netweave_server_jobs::{Job, JobContext, JobError, JobOutput};
use tracing::instrument;

pub struct FlowCleanupJob {
	flows: Arc<dyn FlowSink>,
	retention_days: u32,
}

impl FlowCleanupJob {
	pub fn new(flows: Arc<dyn FlowSink>, retention_days: u32) -> Self {
		Self { flows, retention_days }
	}
}

#[async_trait]
impl Job for FlowCleanupJob {
	fn id(&self) -> &str {
		"flow-cleanup"
	}

	fn name(&self) -> &str {
		"Flow Partition Cleanup"
	}

	fn description(&self) -> &str {
		"Drop daily flow partitions older than the retention window"
	}

	#[instrument(skip(self, ctx), fields(job_id = "flow-cleanup"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		ctx.check_cancelled()?;

		let dropped = drop_partitions_older_than(self.flows.as_ref(), Utc::now().date_naive(), self.retention_days)
			.await
			.map_err(|e| JobError::Failed {
				message: format!("Flow cleanup failed: {e}"),
				retryable: true,
			})?;

		tracing::info!(
			dropped = dropped.len(),
			retention_days = self.retention_days,
			"Flow partition cleanup completed"
		);

		Ok(JobOutput {
			message: format!("Dropped {} flow partitions", dropped.len()),
			metadata: Some(serde_json::json!({
				"dropped": dropped,
				"retention_days": self.retention_days,
			})),
		})
	}
}
