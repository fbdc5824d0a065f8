// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use netweave_server_jobs::{Job, JobContext, JobError, JobOutput, JobRepository};

pub struct JobHistoryCleanupJob {
	repository: Arc<JobRepository>,
	retention_days: u32,
}

impl JobHistoryCleanupJob {
	pub fn new(repository: Arc<JobRepository>, retention_days: u32) -> Self {
		Self {
			repository,
			retention_days,
		}
	}
}

#[async_trait]
impl Job for JobHistoryCleanupJob {
	fn id(&self) -> &str {
		"job-history-cleanup"
	}

	fn name(&self) -> &str {
		"Job History Cleanup"
	}

	fn description(&self) -> &str {
		"Removes old job run history entries"
	}

	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		ctx.check_cancelled()?;

		let count = self
			.repository
			.cleanup_old_runs(self.retention_days)
			.await
			.map_err(|e| JobError::retryable(format!("Job history cleanup failed: {e}")))?;
		tracing::info!(
			deleted = count,
			retention_days = self.retention_days,
			"Job history cleanup completed"
		);
		Ok(JobOutput::new(format!("Cleaned up {count} old job run records")).with_metadata(
			serde_json::json!({
				"deleted_count": count,
				"retention_days": self.retention_days
			}),
		))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::jobs::test_context;
	use netweave_server_db::testing::create_job_test_pool;

	#[tokio::test]
	async fn empty_history_is_a_no_op() {
		let repo = Arc::new(JobRepository::new(create_job_test_pool().await));
		let output = JobHistoryCleanupJob::new(repo, 30).run(&test_context()).await.unwrap();
		assert_eq!(output.metadata.unwrap()["deleted_count"], 0);
	}
}
