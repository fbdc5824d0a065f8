// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use chrono::Utc;
use netweave_server_audit::EventLog;
use netweave_server_jobs::{Job, JobContext, JobError, JobOutput};
use tracing::instrument;

pub struct EventRetentionJob {
	log: EventLog,
	retention_days: i64,
}

impl EventRetentionJob {
	pub fn new(log: EventLog, retention_days: i64) -> Self {
		Self { log, retention_days }
	}
}

#[async_trait]
impl Job for EventRetentionJob {
	fn id(&self) -> &str {
		"event-retention"
	}

	fn name(&self) -> &str {
		"Event Retention"
	}

	fn description(&self) -> &str {
		"Purge audit events older than the retention period"
	}

	#[instrument(skip(self, ctx), fields(job_id = "event-retention"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		ctx.check_cancelled()?;

		match self.log.purge_retention(self.retention_days, Utc::now()).await {
			Ok(count) => {
				tracing::info!(
					deleted = count,
					retention_days = self.retention_days,
					"Event retention purge completed"
				);
				Ok(JobOutput {
					message: format!("Purged {count} audit events"),
					metadata: Some(serde_json::json!({
						"deleted_count": count,
						"retention_days": self.retention_days
					})),
				})
			}
			Err(e) => Err(JobError::Failed {
				message: format!("Event retention purge failed: {e}"),
				retryable: true,
			}),
		}
	}
}
