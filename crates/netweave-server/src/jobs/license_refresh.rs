// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use netweave_server_jobs::{Job, JobContext, JobError, JobOutput};
use tracing::instrument;

use crate::license::{LicenseError, LicenseMonitor};

pub struct LicenseRefreshJob {
	monitor: Arc<LicenseMonitor>,
}

impl LicenseRefreshJob {
	pub fn new(monitor: Arc<LicenseMonitor>) -> Self {
		Self { monitor }
	}
}

#[async_trait]
impl Job for LicenseRefreshJob {
	fn id(&self) -> &str {
		"license-refresh"
	}

	fn name(&self) -> &str {
		"License Refresh"
	}

	fn description(&self) -> &str {
		"Validate the license key and report usage"
	}

	#[instrument(skip(self, ctx), fields(job_id = "license-refresh"))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		ctx.check_cancelled()?;

		match self.monitor.refresh().await {
			Ok(Some(status)) => Ok(JobOutput {
				message: format!("License valid for tenant {}", status.tenant_id),
				metadata: Some(serde_json::json!({
					"key_fingerprint": status.key_fingerprint,
					"usage": status.usage,
				})),
			}),
			Ok(None) => Ok(JobOutput::new("No license configured")),
			Err(e @ LicenseError::Rejected(_)) => Err(JobError::permanent(e.to_string())),
			Err(e) => Err(JobError::retryable(e.to_string())),
		}
	}
}
